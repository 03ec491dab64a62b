use crate::merge::fingerprint::Fingerprint;
use crate::merge::similarity::SimilarityScorer;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Best target candidate for one source fingerprint.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    pub best_match: Option<&'a Fingerprint>,
    pub similarity: f64,
    pub exact: bool,
}

impl MatchResult<'_> {
    pub fn none() -> Self {
        Self {
            best_match: None,
            similarity: 0.0,
            exact: false,
        }
    }
}

/// Target fingerprints bucketed by content hash, plus the full list for
/// approximate scans. Degenerate targets are kept out of both.
pub struct MatchIndex<'a> {
    targets: Vec<&'a Fingerprint>,
    by_hash: HashMap<&'a str, Vec<usize>>,
    scorer: &'a dyn SimilarityScorer,
    min_candidate: f64,
}

/// Prefer the more complete transcript, then the smaller path.
fn prefer(a: &Fingerprint, b: &Fingerprint) -> Ordering {
    b.turn_count
        .cmp(&a.turn_count)
        .then_with(|| a.source_path.cmp(&b.source_path))
}

impl<'a> MatchIndex<'a> {
    pub fn build(
        targets: &'a [Fingerprint],
        scorer: &'a dyn SimilarityScorer,
        min_candidate: f64,
    ) -> Self {
        let targets: Vec<&Fingerprint> = targets.iter().filter(|t| !t.is_degenerate()).collect();
        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, target) in targets.iter().enumerate() {
            by_hash.entry(target.content_hash.as_str()).or_default().push(i);
        }
        Self {
            targets,
            by_hash,
            scorer,
            min_candidate,
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    /// All targets sharing `hash`.
    pub fn exact(&self, hash: &str) -> Vec<&'a Fingerprint> {
        self.by_hash
            .get(hash)
            .map(|ids| ids.iter().map(|&i| self.targets[i]).collect())
            .unwrap_or_default()
    }

    pub fn find(&self, source: &Fingerprint) -> MatchResult<'a> {
        if source.is_degenerate() {
            return MatchResult::none();
        }

        if let Some(best) = self
            .exact(&source.content_hash)
            .into_iter()
            .min_by(|a, b| prefer(a, b))
        {
            return MatchResult {
                best_match: Some(best),
                similarity: 1.0,
                exact: true,
            };
        }

        let mut best: Option<(&'a Fingerprint, f64)> = None;
        for &target in &self.targets {
            let floor = best.map_or(self.min_candidate, |(_, s)| s);
            let bound = self
                .scorer
                .upper_bound(&source.fingerprint_text, &target.fingerprint_text);
            if bound < floor {
                continue;
            }
            let score = self
                .scorer
                .score(&source.fingerprint_text, &target.fingerprint_text);
            if score < self.min_candidate {
                continue;
            }
            let better = match best {
                None => true,
                Some((current, current_score)) => {
                    score > current_score
                        || (score == current_score && prefer(target, current) == Ordering::Less)
                }
            };
            if better {
                best = Some((target, score));
            }
        }

        match best {
            Some((target, similarity)) => MatchResult {
                best_match: Some(target),
                similarity,
                exact: false,
            },
            None => MatchResult::none(),
        }
    }
}
