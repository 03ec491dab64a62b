use anyhow::{Result, bail};
use std::io;
use std::path::{Path, PathBuf};

use crate::commands::CommandReport;
use crate::merge::config::{ConfigOverrides, load_config};
use crate::merge::decision::{DecisionEngine, classify_all};
use crate::merge::executor::{ApplyTarget, execute};
use crate::merge::fingerprint::FingerprintExtractor;
use crate::merge::fsops::TargetLock;
use crate::merge::index::MatchIndex;
use crate::merge::plan;
use crate::merge::report::{MergeReport, RunSettings};
use crate::merge::scan::scan_dir;
use crate::merge::similarity::{SequenceRatio, SimilarityScorer};
use crate::merge::strategy::{
    ApplyStrategy, AutomaticStrategy, InteractiveStrategy, PreviewStrategy, RunMode,
};

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub source: PathBuf,
    pub target: PathBuf,
    pub mode: RunMode,
    pub overrides: ConfigOverrides,
    pub report_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct MergeRun {
    pub command: CommandReport,
    pub report: MergeReport,
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

pub fn run(opts: &MergeOptions) -> Result<MergeRun> {
    let scorer = SequenceRatio;
    run_with_scorer(opts, &scorer)
}

pub fn run_with_scorer(opts: &MergeOptions, scorer: &dyn SimilarityScorer) -> Result<MergeRun> {
    let cfg = load_config(&opts.overrides)?;
    let mut command = CommandReport::new("merge");

    // Both directories are checked before anything is written.
    let source_paths = scan_dir(&opts.source, &cfg.apply.extension)?;
    let target_paths = scan_dir(&opts.target, &cfg.apply.extension)?;
    if same_dir(&opts.source, &opts.target) {
        bail!(
            "source and target are the same directory: {}",
            opts.source.display()
        );
    }
    command.detail(format!("source_files={}", source_paths.len()));
    command.detail(format!("target_files={}", target_paths.len()));

    let extractor = FingerprintExtractor::new(
        cfg.matching.fingerprint_messages,
        cfg.matching.preview_chars,
    );
    let sources = extractor.extract_all(&source_paths, cfg.apply.jobs)?;
    let targets = extractor.extract_all(&target_paths, cfg.apply.jobs)?;

    let index = MatchIndex::build(&targets, scorer, cfg.matching.min_candidate_similarity);
    let engine = DecisionEngine::new(cfg.matching.similarity_threshold);
    if index.is_empty() {
        tracing::debug!("target has no fingerprintable conversations");
    }
    tracing::debug!(
        indexed = index.len(),
        scorer = index.scorer_name(),
        threshold = engine.threshold(),
        "match index ready"
    );
    let decisions = plan::resolve(classify_all(&index, &engine, &sources, cfg.apply.jobs)?);

    let mut strategy: Box<dyn ApplyStrategy> = match opts.mode {
        RunMode::Preview => Box::new(PreviewStrategy),
        RunMode::Automatic => Box::new(AutomaticStrategy),
        RunMode::Interactive => Box::new(InteractiveStrategy::new(
            io::stdin().lock(),
            io::stderr(),
        )),
    };

    let _lock = if strategy.mutates() {
        let lock = TargetLock::acquire(&opts.target)?;
        tracing::debug!(lock = %lock.path().display(), "target locked");
        Some(lock)
    } else {
        None
    };

    let apply = ApplyTarget {
        target_dir: opts.target.clone(),
        backup: cfg.apply.backup,
    };
    let execution = execute(&decisions, strategy.as_mut(), &apply);

    let settings = RunSettings {
        mode: opts.mode,
        source_dir: opts.source.clone(),
        target_dir: opts.target.clone(),
        similarity_threshold: cfg.matching.similarity_threshold,
        min_candidate_similarity: cfg.matching.min_candidate_similarity,
        fingerprint_messages: cfg.matching.fingerprint_messages,
        scorer: scorer.name().to_string(),
        backup: cfg.apply.backup,
    };
    let report = MergeReport::new(settings, execution.entries, execution.aborted);

    for failed in report.failures() {
        command.issue(format!("failed to apply {}", failed.source_path.display()));
    }
    if let Some(path) = &opts.report_path {
        match report.write_to(path) {
            Ok(()) => command.detail(format!("report_path={}", path.display())),
            Err(err) => command.issue(format!("{err:#}")),
        }
    }

    Ok(MergeRun { command, report })
}
