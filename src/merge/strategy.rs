use crate::merge::decision::{Decision, DecisionKind};
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Preview,
    Interactive,
    Automatic,
}

/// What to do with one actionable decision (NEW, UPDATE or REVIEW).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Apply,
    Decline,
    SkipRemaining,
    Quit,
    /// Preview: report what would happen.
    Plan,
    /// Leave for a human; never applied.
    Hold,
}

/// Decides, one decision at a time, whether the executor mutates the archive.
pub trait ApplyStrategy {
    fn mode(&self) -> RunMode;

    fn choose(&mut self, item: &Decision, position: usize, total: usize) -> Result<Choice>;

    fn mutates(&self) -> bool {
        self.mode() != RunMode::Preview
    }
}

#[derive(Debug, Default)]
pub struct PreviewStrategy;

impl ApplyStrategy for PreviewStrategy {
    fn mode(&self) -> RunMode {
        RunMode::Preview
    }

    fn choose(&mut self, _item: &Decision, _position: usize, _total: usize) -> Result<Choice> {
        Ok(Choice::Plan)
    }
}

#[derive(Debug, Default)]
pub struct AutomaticStrategy;

impl ApplyStrategy for AutomaticStrategy {
    fn mode(&self) -> RunMode {
        RunMode::Automatic
    }

    fn choose(&mut self, item: &Decision, _position: usize, _total: usize) -> Result<Choice> {
        Ok(match item.kind {
            DecisionKind::New | DecisionKind::Update => Choice::Apply,
            DecisionKind::Review => Choice::Hold,
            DecisionKind::Skip => Choice::Decline,
        })
    }
}

/// Prompts an operator on `output` and reads answers from `input`.
pub struct InteractiveStrategy<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> InteractiveStrategy<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn describe(&mut self, item: &Decision, position: usize, total: usize) -> Result<()> {
        let out = &mut self.output;
        writeln!(out)?;
        writeln!(
            out,
            "[{position}/{total}] {} {}",
            item.kind,
            item.source.source_path.display()
        )?;
        writeln!(out, "  reason: {}", item.reason)?;
        if let Some(target) = &item.target {
            writeln!(out, "  target: {}", target.source_path.display())?;
            writeln!(
                out,
                "  similarity: {:.1}%{}  turns: source {}, target {}",
                item.similarity * 100.0,
                if item.exact { " (exact)" } else { "" },
                item.source.turn_count,
                target.turn_count
            )?;
        } else {
            writeln!(out, "  turns: {}", item.source.turn_count)?;
        }
        if !item.source.first_user_turn.is_empty() {
            writeln!(out, "  first message: {}", item.source.first_user_turn)?;
        }
        Ok(())
    }

    fn question(item: &Decision) -> &'static str {
        match item.kind {
            DecisionKind::Review if item.target.is_none() => {
                "Copy into target as a new conversation?"
            }
            DecisionKind::Review => "Overwrite target with this source anyway?",
            DecisionKind::Update => "Replace target with this more complete version?",
            _ => "Copy into target?",
        }
    }
}

fn parse_answer(raw: &str) -> Option<Choice> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(Choice::Apply),
        "" | "n" | "no" => Some(Choice::Decline),
        "s" | "skip" | "skip-all" => Some(Choice::SkipRemaining),
        "q" | "quit" => Some(Choice::Quit),
        _ => None,
    }
}

impl<R: BufRead, W: Write> ApplyStrategy for InteractiveStrategy<R, W> {
    fn mode(&self) -> RunMode {
        RunMode::Interactive
    }

    fn choose(&mut self, item: &Decision, position: usize, total: usize) -> Result<Choice> {
        if item.kind == DecisionKind::Skip {
            return Ok(Choice::Decline);
        }
        self.describe(item, position, total)?;
        loop {
            write!(
                self.output,
                "{} [y]es / [N]o / [s]kip remaining / [q]uit: ",
                Self::question(item)
            )?;
            self.output.flush()?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("failed to read operator answer")?;
            if read == 0 {
                // Input closed: stop asking, keep what was applied.
                writeln!(self.output)?;
                return Ok(Choice::Quit);
            }
            match parse_answer(&line) {
                Some(choice) => return Ok(choice),
                None => writeln!(self.output, "  please answer y, n, s or q")?,
            }
        }
    }
}
