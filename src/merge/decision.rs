use crate::merge::fingerprint::Fingerprint;
use crate::merge::index::{MatchIndex, MatchResult};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionKind {
    New,
    Update,
    Skip,
    Review,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Update => "UPDATE",
            Self::Skip => "SKIP",
            Self::Review => "REVIEW",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub source: Fingerprint,
    pub target: Option<Fingerprint>,
    pub similarity: f64,
    pub exact: bool,
    pub reason: String,
}

impl Decision {
    pub fn target_turns(&self) -> Option<usize> {
        self.target.as_ref().map(|t| t.turn_count)
    }
}

/// Pure classification of one source against its best target candidate.
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine {
    threshold: f64,
}

impl DecisionEngine {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn decide(&self, source: &Fingerprint, found: MatchResult<'_>) -> Decision {
        let build = |kind: DecisionKind, reason: String| Decision {
            kind,
            source: source.clone(),
            target: found.best_match.cloned(),
            similarity: found.similarity,
            exact: found.exact,
            reason,
        };

        if source.is_degenerate() {
            let why = source
                .parse_error
                .as_deref()
                .unwrap_or("no conversation turns found");
            return build(
                DecisionKind::Review,
                format!("cannot fingerprint source ({why}); needs manual check"),
            );
        }

        let Some(target) = found.best_match else {
            return build(
                DecisionKind::New,
                "no similar conversation in target".to_string(),
            );
        };

        let (s, t) = (source.turn_count, target.turn_count);
        if found.exact {
            return match s.cmp(&t) {
                std::cmp::Ordering::Equal => build(
                    DecisionKind::Skip,
                    format!("exact duplicate of {} ({s} turns)", target.file_name()),
                ),
                std::cmp::Ordering::Greater => build(
                    DecisionKind::Update,
                    format!("source is more complete ({s} vs {t} turns), exact prefix match"),
                ),
                std::cmp::Ordering::Less => build(
                    DecisionKind::Skip,
                    format!("target is more complete ({t} vs {s} turns)"),
                ),
            };
        }

        if found.similarity < self.threshold {
            return build(
                DecisionKind::Review,
                format!(
                    "best candidate {} is only {:.0}% similar (threshold {:.0}%)",
                    target.file_name(),
                    found.similarity * 100.0,
                    self.threshold * 100.0
                ),
            );
        }

        match s.cmp(&t) {
            std::cmp::Ordering::Greater => build(
                DecisionKind::Update,
                format!(
                    "source is more complete ({s} vs {t} turns), {:.0}% similar",
                    found.similarity * 100.0
                ),
            ),
            std::cmp::Ordering::Less => build(
                DecisionKind::Skip,
                format!("target is more complete ({t} vs {s} turns)"),
            ),
            // Same length, similar but not identical: may still be a different
            // conversation, so the reason names it as a near-duplicate.
            std::cmp::Ordering::Equal => build(
                DecisionKind::Skip,
                format!(
                    "near-duplicate of {} ({:.0}% similar, {s} turns each)",
                    target.file_name(),
                    found.similarity * 100.0
                ),
            ),
        }
    }
}

/// Classify every source fingerprint against the index on a bounded rayon
/// pool; output order matches `sources`.
pub fn classify_all(
    index: &MatchIndex<'_>,
    engine: &DecisionEngine,
    sources: &[Fingerprint],
    jobs: usize,
) -> Result<Vec<Decision>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .build()
        .context("failed to build matching worker pool")?;
    Ok(pool.install(|| classify_in_pool(index, engine, sources)))
}

fn classify_in_pool(
    index: &MatchIndex<'_>,
    engine: &DecisionEngine,
    sources: &[Fingerprint],
) -> Vec<Decision> {
    sources
        .par_iter()
        .map(|source| {
            let decision = engine.decide(source, index.find(source));
            tracing::debug!(
                source = %source.source_path.display(),
                kind = %decision.kind,
                similarity = decision.similarity,
                reason = %decision.reason,
                "classified"
            );
            decision
        })
        .collect()
}
