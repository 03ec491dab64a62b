use anyhow::Result;
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use crate::commands::merge::{self, MergeOptions};
use crate::merge::config::{ConfigOverrides, warn_unknown_env_keys};
use crate::merge::strategy::RunMode;

/// Reconcile freshly exported chat transcripts into an archive directory.
#[derive(Debug, Parser)]
#[command(name = "chat-merge", version, about)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .args(["preview", "interactive", "auto"])
))]
pub struct Cli {
    /// Directory of newly exported conversation files.
    #[arg(long, value_name = "DIR")]
    pub source: PathBuf,

    /// Archive directory to reconcile into.
    #[arg(long, value_name = "DIR")]
    pub target: PathBuf,

    /// Show what would happen without touching the target.
    #[arg(long)]
    pub preview: bool,

    /// Ask before each copy or overwrite.
    #[arg(long)]
    pub interactive: bool,

    /// Apply NEW and UPDATE decisions without asking.
    #[arg(long)]
    pub auto: bool,

    /// Similarity below which a candidate match needs review.
    #[arg(long, value_name = "FLOAT", value_parser = parse_unit_interval)]
    pub similarity: Option<f64>,

    /// Leading turn pairs used for fingerprinting.
    #[arg(long, value_name = "N")]
    pub fingerprint_messages: Option<usize>,

    /// Similarity below which the best candidate is ignored (file is NEW).
    #[arg(long, value_name = "FLOAT", value_parser = parse_unit_interval)]
    pub min_candidate: Option<f64>,

    /// Keep a timestamped copy of every file an UPDATE overwrites.
    #[arg(long, overrides_with = "no_backup")]
    pub backup: bool,

    #[arg(long, overrides_with = "backup")]
    pub no_backup: bool,

    /// Write a JSON report of every decision to this path.
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Conversation file extension.
    #[arg(long, value_name = "EXT")]
    pub extension: Option<String>,

    /// Fingerprinting worker threads (0 = one per core).
    #[arg(long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Print the full report as JSON instead of the summary.
    #[arg(long)]
    pub json: bool,

    /// Per-decision diagnostics.
    #[arg(long, short)]
    pub verbose: bool,
}

fn parse_unit_interval(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("`{raw}` must be between 0 and 1"))
    }
}

impl Cli {
    fn mode(&self) -> RunMode {
        if self.preview {
            RunMode::Preview
        } else if self.interactive {
            RunMode::Interactive
        } else {
            RunMode::Automatic
        }
    }

    fn backup_override(&self) -> Option<bool> {
        match (self.backup, self.no_backup) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    fn merge_options(&self) -> MergeOptions {
        MergeOptions {
            source: self.source.clone(),
            target: self.target.clone(),
            mode: self.mode(),
            overrides: ConfigOverrides {
                similarity_threshold: self.similarity,
                fingerprint_messages: self.fingerprint_messages,
                min_candidate_similarity: self.min_candidate,
                backup: self.backup_override(),
                extension: self.extension.clone(),
                jobs: self.jobs,
            },
            report_path: self.report.clone(),
        }
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::logging::init(cli.verbose);
    warn_unknown_env_keys();

    let outcome = merge::run(&cli.merge_options())?;

    if cli.json {
        println!("{}", outcome.report.to_json()?);
    } else {
        let detailed = cli.verbose || outcome.report.settings.mode == RunMode::Preview;
        print!("{}", outcome.report.render(detailed));
        if cli.verbose {
            for line in &outcome.command.details {
                println!("{line}");
            }
        }
    }
    for issue in &outcome.command.issues {
        eprintln!("warning: {issue}");
    }
    Ok(())
}
