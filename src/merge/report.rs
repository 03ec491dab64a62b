use crate::merge::decision::{Decision, DecisionKind};
use crate::merge::fsops::atomic_write;
use crate::merge::strategy::RunMode;
use anyhow::{Context, Result};
use chrono::Local;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// What actually happened to one decision during the apply phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Applied {
        destination: PathBuf,
        #[serde(skip_serializing_if = "Option::is_none")]
        backup: Option<PathBuf>,
    },
    Planned,
    NoOp,
    Held,
    Declined,
    Deferred,
    Failed {
        error: String,
    },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::Planned => "planned",
            Self::NoOp => "no-op",
            Self::Held => "held for review",
            Self::Declined => "declined",
            Self::Deferred => "deferred",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub decision: DecisionKind,
    pub reason: String,
    pub source_path: PathBuf,
    pub target_path: Option<PathBuf>,
    pub similarity: f64,
    pub exact: bool,
    pub source_turns: usize,
    pub target_turns: Option<usize>,
    pub first_user_turn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub outcome: Outcome,
}

impl ReportEntry {
    pub fn new(decision: &Decision, outcome: Outcome) -> Self {
        Self {
            decision: decision.kind,
            reason: decision.reason.clone(),
            source_path: decision.source.source_path.clone(),
            target_path: decision.target.as_ref().map(|t| t.source_path.clone()),
            similarity: decision.similarity,
            exact: decision.exact,
            source_turns: decision.source.turn_count,
            target_turns: decision.target_turns(),
            first_user_turn: decision.source.first_user_turn.clone(),
            parse_error: decision.source.parse_error.clone(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct DecisionCounts {
    pub new: usize,
    pub update: usize,
    pub skip: usize,
    pub review: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub applied: usize,
    pub planned: usize,
    pub held: usize,
    pub declined: usize,
    pub deferred: usize,
    pub failed: usize,
}

/// Run-level settings echoed into the report.
#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    pub mode: RunMode,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub similarity_threshold: f64,
    pub min_candidate_similarity: f64,
    pub fingerprint_messages: usize,
    pub scorer: String,
    pub backup: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    #[serde(flatten)]
    pub settings: RunSettings,
    pub generated_at: String,
    pub counts: DecisionCounts,
    pub outcomes: OutcomeCounts,
    pub aborted: bool,
    pub entries: Vec<ReportEntry>,
}

impl MergeReport {
    pub fn new(settings: RunSettings, entries: Vec<ReportEntry>, aborted: bool) -> Self {
        let mut counts = DecisionCounts::default();
        let mut outcomes = OutcomeCounts::default();
        for entry in &entries {
            match entry.decision {
                DecisionKind::New => counts.new += 1,
                DecisionKind::Update => counts.update += 1,
                DecisionKind::Skip => counts.skip += 1,
                DecisionKind::Review => counts.review += 1,
            }
            match entry.outcome {
                Outcome::Applied { .. } => outcomes.applied += 1,
                Outcome::Planned => outcomes.planned += 1,
                Outcome::Held => outcomes.held += 1,
                Outcome::Declined => outcomes.declined += 1,
                Outcome::Deferred => outcomes.deferred += 1,
                Outcome::Failed { .. } => outcomes.failed += 1,
                Outcome::NoOp => {}
            }
        }
        Self {
            settings,
            generated_at: Local::now().to_rfc3339(),
            counts,
            outcomes,
            aborted,
            entries,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, Outcome::Failed { .. }))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let data = format!("{}\n", self.to_json()?);
        atomic_write(path, data.as_bytes(), None, true)
            .with_context(|| format!("failed to write report {}", path.display()))
    }

    /// Human summary; per-file lines are included when `detailed`.
    pub fn render(&self, detailed: bool) -> String {
        let mut out = String::new();
        let c = &self.counts;
        let o = &self.outcomes;
        let _ = writeln!(
            out,
            "{} merge: {} -> {}",
            match self.settings.mode {
                RunMode::Preview => "preview",
                RunMode::Interactive => "interactive",
                RunMode::Automatic => "automatic",
            },
            self.settings.source_dir.display(),
            self.settings.target_dir.display()
        );
        let _ = writeln!(
            out,
            "decisions: new={} update={} skip={} review={}",
            c.new, c.update, c.skip, c.review
        );
        let _ = writeln!(
            out,
            "outcomes: applied={} planned={} held={} declined={} deferred={} failed={}",
            o.applied, o.planned, o.held, o.declined, o.deferred, o.failed
        );
        if self.aborted {
            let _ = writeln!(out, "run stopped early by operator; earlier changes kept");
        }

        if detailed {
            for e in &self.entries {
                let _ = write!(
                    out,
                    "{:<6} {} [{}]",
                    e.decision.as_str(),
                    e.source_path.display(),
                    e.outcome.label()
                );
                if let Some(target) = &e.target_path {
                    let _ = write!(out, " -> {} ({:.1}%)", target.display(), e.similarity * 100.0);
                }
                let _ = writeln!(out, ": {}", e.reason);
            }
        }

        for e in self.failures() {
            if let Outcome::Failed { error } = &e.outcome {
                let _ = writeln!(out, "FAILED {}: {error}", e.source_path.display());
            }
        }
        out
    }
}
