use similar::{Algorithm, DiffTag, TextDiff};
use std::collections::HashMap;

/// Scores how alike two fingerprint texts are, in `[0, 1]`.
///
/// Implementations must be symmetric and return exactly 1.0 for identical
/// input.
pub trait SimilarityScorer: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, a: &str, b: &str) -> f64;

    /// A value no lower than `score(a, b)`, used to skip hopeless candidates.
    fn upper_bound(&self, _a: &str, _b: &str) -> f64 {
        1.0
    }
}

/// Character-level alignment ratio `2*M / (|a| + |b|)`, where `M` is the
/// number of characters in the optimal common subsequence.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceRatio;

impl SimilarityScorer for SequenceRatio {
    fn name(&self) -> &'static str {
        "sequence-ratio"
    }

    fn score(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        // Fixed argument order so score(a, b) and score(b, a) run the same diff.
        let (old, new) = if a <= b { (a, b) } else { (b, a) };
        let diff = TextDiff::configure()
            .algorithm(Algorithm::Myers)
            .diff_chars(old, new);
        let matched: usize = diff
            .ops()
            .iter()
            .filter_map(|op| match op.as_tag_tuple() {
                (DiffTag::Equal, old_range, _) => Some(old_range.len()),
                _ => None,
            })
            .sum();
        ratio(matched, old.chars().count() + new.chars().count())
    }

    /// Shared character multiset: no alignment can match more characters
    /// than both sides have in common.
    fn upper_bound(&self, a: &str, b: &str) -> f64 {
        let (la, lb) = (a.chars().count(), b.chars().count());
        if la + lb == 0 {
            return 1.0;
        }
        if la.min(lb) == 0 {
            return 0.0;
        }
        let mut counts: HashMap<char, isize> = HashMap::new();
        for c in a.chars() {
            *counts.entry(c).or_default() += 1;
        }
        let mut shared = 0usize;
        for c in b.chars() {
            let left = counts.entry(c).or_default();
            if *left > 0 {
                shared += 1;
            }
            *left -= 1;
        }
        ratio(shared, la + lb)
    }
}

fn ratio(matched: usize, total: usize) -> f64 {
    if total == 0 {
        return 1.0;
    }
    (2.0 * matched as f64 / total as f64).clamp(0.0, 1.0)
}
