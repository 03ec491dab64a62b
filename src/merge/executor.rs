use crate::merge::decision::{Decision, DecisionKind};
use crate::merge::fsops;
use crate::merge::report::{Outcome, ReportEntry};
use crate::merge::strategy::{ApplyStrategy, Choice, RunMode};
use crate::merge::warn::{self, WarnEvent};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ApplyTarget {
    pub target_dir: PathBuf,
    pub backup: bool,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub entries: Vec<ReportEntry>,
    pub aborted: bool,
}

fn apply_one(item: &Decision, apply: &ApplyTarget) -> Outcome {
    let source = &item.source.source_path;
    let result = match (item.kind, item.target.as_ref()) {
        // A REVIEW without a candidate has nothing to overwrite; an
        // operator's yes brings it in as a new file.
        (DecisionKind::New, _) | (DecisionKind::Review, None) => {
            fsops::copy_new(source, &apply.target_dir).map(|destination| Outcome::Applied {
                destination,
                backup: None,
            })
        }
        (DecisionKind::Update | DecisionKind::Review, Some(target)) => {
            let dest = &target.source_path;
            fsops::replace_with_backup(source, dest, apply.backup).map(|backup| {
                Outcome::Applied {
                    destination: dest.clone(),
                    backup,
                }
            })
        }
        _ => {
            return Outcome::Failed {
                error: format!("{} decision has no target to apply to", item.kind),
            };
        }
    };

    match result {
        Ok(outcome) => {
            if let Outcome::Applied {
                destination,
                backup,
            } = &outcome
            {
                tracing::info!(
                    kind = %item.kind,
                    source = %source.display(),
                    destination = %destination.display(),
                    backup = ?backup,
                    "applied"
                );
            }
            outcome
        }
        Err(err) => {
            warn::emit(WarnEvent {
                code: err.code(),
                stage: "apply",
                action: item.kind.as_str(),
                source: &source.display().to_string(),
                target: &item
                    .target
                    .as_ref()
                    .map(|t| t.source_path.display().to_string())
                    .unwrap_or_default(),
                reason: "write-failed",
                err: &err.to_string(),
            });
            Outcome::Failed {
                error: err.to_string(),
            }
        }
    }
}

fn may_apply(kind: DecisionKind, mode: RunMode) -> bool {
    match kind {
        DecisionKind::New | DecisionKind::Update => mode != RunMode::Preview,
        // Only an operator may push a REVIEW item through.
        DecisionKind::Review => mode == RunMode::Interactive,
        DecisionKind::Skip => false,
    }
}

/// Walk the decisions in order, asking `strategy` about each actionable
/// one. Every decision yields exactly one report entry. Stopping early
/// keeps whatever was already applied.
pub fn execute(
    decisions: &[Decision],
    strategy: &mut dyn ApplyStrategy,
    apply: &ApplyTarget,
) -> Execution {
    let mode = strategy.mode();
    let total = decisions
        .iter()
        .filter(|d| d.kind != DecisionKind::Skip)
        .count();
    let mut entries = Vec::with_capacity(decisions.len());
    let mut position = 0usize;
    let mut halted = false;
    let mut aborted = false;

    for item in decisions {
        if item.kind == DecisionKind::Skip {
            entries.push(ReportEntry::new(item, Outcome::NoOp));
            continue;
        }
        position += 1;
        if halted {
            entries.push(ReportEntry::new(item, Outcome::Deferred));
            continue;
        }

        let choice = match strategy.choose(item, position, total) {
            Ok(choice) => choice,
            Err(err) => {
                tracing::warn!("stopping: {err:#}");
                Choice::Quit
            }
        };

        let outcome = match choice {
            Choice::Plan => Outcome::Planned,
            Choice::Hold => Outcome::Held,
            Choice::Decline if item.kind == DecisionKind::Review => Outcome::Held,
            Choice::Decline => Outcome::Declined,
            Choice::SkipRemaining => {
                halted = true;
                Outcome::Deferred
            }
            Choice::Quit => {
                halted = true;
                aborted = true;
                Outcome::Deferred
            }
            Choice::Apply if may_apply(item.kind, mode) => apply_one(item, apply),
            Choice::Apply => Outcome::Held,
        };
        entries.push(ReportEntry::new(item, outcome));
    }

    Execution { entries, aborted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::fingerprint::{Fingerprint, content_hash};
    use crate::merge::strategy::{AutomaticStrategy, InteractiveStrategy, PreviewStrategy};
    use std::fs;
    use std::io::Cursor;
    use std::path::Path;
    use tempfile::tempdir;

    fn fp(path: &Path, turns: usize) -> Fingerprint {
        Fingerprint {
            source_path: path.to_path_buf(),
            turn_count: turns,
            fingerprint_text: "user: hi".to_string(),
            content_hash: content_hash("user: hi"),
            first_user_turn: "hi".to_string(),
            parse_error: None,
        }
    }

    fn apply_target(target_dir: &Path, backup: bool) -> ApplyTarget {
        ApplyTarget {
            target_dir: target_dir.to_path_buf(),
            backup,
        }
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        src: PathBuf,
        dst: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempdir().expect("tempdir");
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        fs::create_dir_all(&src).expect("mkdir");
        fs::create_dir_all(&dst).expect("mkdir");
        Fixture { _tmp: tmp, src, dst }
    }

    fn decisions(fx: &Fixture) -> Vec<Decision> {
        let new_src = fx.src.join("new.md");
        let upd_src = fx.src.join("upd.md");
        let rev_src = fx.src.join("rev.md");
        let upd_dst = fx.dst.join("old.md");
        let rev_dst = fx.dst.join("other.md");
        fs::write(&new_src, "new").expect("write");
        fs::write(&upd_src, "longer").expect("write");
        fs::write(&rev_src, "different").expect("write");
        fs::write(&upd_dst, "short").expect("write");
        fs::write(&rev_dst, "unrelated").expect("write");

        let mk = |kind, src: &Path, dst: Option<&Path>| Decision {
            kind,
            source: fp(src, 6),
            target: dst.map(|d| fp(d, 4)),
            similarity: 0.5,
            exact: false,
            reason: String::new(),
        };
        vec![
            mk(DecisionKind::New, &new_src, None),
            mk(DecisionKind::Skip, &new_src, Some(&upd_dst)),
            mk(DecisionKind::Update, &upd_src, Some(&upd_dst)),
            mk(DecisionKind::Review, &rev_src, Some(&rev_dst)),
        ]
    }

    #[test]
    fn preview_touches_nothing() {
        let fx = fixture();
        let ds = decisions(&fx);
        let run = execute(&ds, &mut PreviewStrategy, &apply_target(&fx.dst, true));
        assert_eq!(run.entries[0].outcome, Outcome::Planned);
        assert_eq!(run.entries[1].outcome, Outcome::NoOp);
        assert_eq!(fs::read_dir(&fx.dst).expect("read").count(), 2);
        assert_eq!(fs::read_to_string(fx.dst.join("old.md")).expect("read"), "short");
    }

    #[test]
    fn automatic_applies_new_and_update_but_holds_review() {
        let fx = fixture();
        let ds = decisions(&fx);
        let run = execute(&ds, &mut AutomaticStrategy, &apply_target(&fx.dst, true));

        assert!(matches!(run.entries[0].outcome, Outcome::Applied { .. }));
        assert_eq!(fs::read_to_string(fx.dst.join("new.md")).expect("read"), "new");
        match &run.entries[2].outcome {
            Outcome::Applied { backup: Some(b), .. } => {
                assert_eq!(fs::read_to_string(b).expect("read"), "short");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(fs::read_to_string(fx.dst.join("old.md")).expect("read"), "longer");
        assert_eq!(run.entries[3].outcome, Outcome::Held);
        assert_eq!(fs::read_to_string(fx.dst.join("other.md")).expect("read"), "unrelated");
        assert!(!run.aborted);
    }

    #[test]
    fn declined_update_is_recorded_and_target_unchanged() {
        let fx = fixture();
        let ds = decisions(&fx);
        let mut sink = Vec::new();
        let mut s = InteractiveStrategy::new(Cursor::new("y\nn\nn\n"), &mut sink);
        let run = execute(&ds, &mut s, &apply_target(&fx.dst, true));
        assert_eq!(run.entries[2].outcome, Outcome::Declined);
        assert_eq!(run.entries[3].outcome, Outcome::Held);
        assert_eq!(fs::read_to_string(fx.dst.join("old.md")).expect("read"), "short");
    }

    #[test]
    fn operator_can_push_review_through() {
        let fx = fixture();
        let ds = decisions(&fx);
        let mut sink = Vec::new();
        let mut s = InteractiveStrategy::new(Cursor::new("n\nn\ny\n"), &mut sink);
        let run = execute(&ds, &mut s, &apply_target(&fx.dst, false));
        assert!(matches!(
            run.entries[3].outcome,
            Outcome::Applied { backup: None, .. }
        ));
        assert_eq!(fs::read_to_string(fx.dst.join("other.md")).expect("read"), "different");
    }

    #[test]
    fn accepted_review_without_candidate_is_copied_in() {
        let fx = fixture();
        let src = fx.src.join("title-only.md");
        fs::write(&src, "# Untitled\n").expect("write");
        let mut source = fp(&src, 0);
        source.parse_error = Some("no conversation turns found".to_string());
        let ds = vec![Decision {
            kind: DecisionKind::Review,
            source,
            target: None,
            similarity: 0.0,
            exact: false,
            reason: "cannot fingerprint source".to_string(),
        }];

        let mut sink = Vec::new();
        let mut s = InteractiveStrategy::new(Cursor::new("y\n"), &mut sink);
        let run = execute(&ds, &mut s, &apply_target(&fx.dst, true));
        match &run.entries[0].outcome {
            Outcome::Applied {
                destination,
                backup: None,
            } => assert_eq!(destination, &fx.dst.join("title-only.md")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            fs::read_to_string(fx.dst.join("title-only.md")).expect("read"),
            "# Untitled\n"
        );
        let prompt = String::from_utf8(sink).expect("utf8");
        assert!(prompt.contains("Copy into target as a new conversation?"));

        let run = execute(&ds, &mut AutomaticStrategy, &apply_target(&fx.dst, true));
        assert_eq!(run.entries[0].outcome, Outcome::Held);
    }

    #[test]
    fn quit_keeps_earlier_changes_and_defers_the_rest() {
        let fx = fixture();
        let ds = decisions(&fx);
        let mut sink = Vec::new();
        let mut s = InteractiveStrategy::new(Cursor::new("y\nq\n"), &mut sink);
        let run = execute(&ds, &mut s, &apply_target(&fx.dst, true));
        assert!(run.aborted);
        assert!(matches!(run.entries[0].outcome, Outcome::Applied { .. }));
        assert_eq!(run.entries[2].outcome, Outcome::Deferred);
        assert_eq!(run.entries[3].outcome, Outcome::Deferred);
        assert!(fx.dst.join("new.md").exists());
    }

    #[test]
    fn skip_remaining_is_not_an_abort() {
        let fx = fixture();
        let ds = decisions(&fx);
        let mut sink = Vec::new();
        let mut s = InteractiveStrategy::new(Cursor::new("s\n"), &mut sink);
        let run = execute(&ds, &mut s, &apply_target(&fx.dst, true));
        assert!(!run.aborted);
        assert!(
            run.entries
                .iter()
                .filter(|e| e.decision != DecisionKind::Skip)
                .all(|e| e.outcome == Outcome::Deferred)
        );
    }

    #[test]
    fn write_failure_is_isolated_to_one_file() {
        let fx = fixture();
        let ds = decisions(&fx);
        fs::remove_file(&ds[0].source.source_path).expect("remove source");
        let run = execute(&ds[..3], &mut AutomaticStrategy, &apply_target(&fx.dst, true));
        assert!(matches!(run.entries[0].outcome, Outcome::Failed { .. }));
        assert!(matches!(run.entries[2].outcome, Outcome::Applied { .. }));
    }
}
