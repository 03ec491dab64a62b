use crate::merge::decision::{Decision, DecisionKind};
use std::collections::BTreeMap;
use std::path::PathBuf;

fn winner_of(decisions: &[Decision], members: &[usize]) -> usize {
    let mut best = members[0];
    for &i in &members[1..] {
        let (a, b) = (&decisions[i].source, &decisions[best].source);
        if a.turn_count > b.turn_count
            || (a.turn_count == b.turn_count && a.source_path < b.source_path)
        {
            best = i;
        }
    }
    best
}

fn demote(decision: &mut Decision, reason: String) {
    decision.kind = DecisionKind::Skip;
    decision.reason = reason;
}

/// Settle conflicts between source files so the batch can be applied in
/// any order: one UPDATE per target, one NEW per distinct content.
pub fn resolve(mut decisions: Vec<Decision>) -> Vec<Decision> {
    let mut updates: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
    let mut news: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (i, d) in decisions.iter().enumerate() {
        match (d.kind, d.target.as_ref()) {
            (DecisionKind::Update, Some(target)) => {
                updates.entry(target.source_path.clone()).or_default().push(i);
            }
            (DecisionKind::New, _) => {
                news.entry(d.source.content_hash.clone()).or_default().push(i);
            }
            _ => {}
        }
    }

    for members in updates.values().filter(|m| m.len() > 1) {
        let winner = winner_of(&decisions, members);
        let name = decisions[winner].source.file_name();
        for &i in members.iter().filter(|&&i| i != winner) {
            let reason = format!("superseded by more complete source {name}");
            demote(&mut decisions[i], reason);
        }
    }

    for members in news.values().filter(|m| m.len() > 1) {
        let winner = winner_of(&decisions, members);
        let name = decisions[winner].source.file_name();
        for &i in members.iter().filter(|&&i| i != winner) {
            let reason = format!("duplicate of {name} within source");
            demote(&mut decisions[i], reason);
        }
    }

    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::fingerprint::{Fingerprint, content_hash};

    fn fp(path: &str, text: &str, turns: usize) -> Fingerprint {
        Fingerprint {
            source_path: PathBuf::from(path),
            turn_count: turns,
            fingerprint_text: text.to_string(),
            content_hash: content_hash(text),
            first_user_turn: String::new(),
            parse_error: None,
        }
    }

    fn decision(kind: DecisionKind, source: Fingerprint, target: Option<Fingerprint>) -> Decision {
        Decision {
            kind,
            source,
            target,
            similarity: 1.0,
            exact: true,
            reason: String::new(),
        }
    }

    #[test]
    fn only_most_complete_update_survives_per_target() {
        let target = fp("t/a.md", "user: x", 4);
        let out = resolve(vec![
            decision(DecisionKind::Update, fp("s/b.md", "user: x", 8), Some(target.clone())),
            decision(DecisionKind::Update, fp("s/a.md", "user: x", 10), Some(target)),
        ]);
        assert_eq!(out[0].kind, DecisionKind::Skip);
        assert!(out[0].reason.contains("a.md"));
        assert_eq!(out[1].kind, DecisionKind::Update);
    }

    #[test]
    fn duplicate_new_sources_collapse_to_one() {
        let out = resolve(vec![
            decision(DecisionKind::New, fp("s/z.md", "user: q", 2), None),
            decision(DecisionKind::New, fp("s/y.md", "user: q", 2), None),
            decision(DecisionKind::New, fp("s/other.md", "user: r", 2), None),
        ]);
        let kinds: Vec<_> = out.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DecisionKind::Skip, DecisionKind::New, DecisionKind::New]
        );
        assert_eq!(out[0].reason, "duplicate of y.md within source");
    }

    #[test]
    fn resolution_ignores_input_order() {
        let target = fp("t/a.md", "user: x", 4);
        let first = decision(DecisionKind::Update, fp("s/1.md", "user: x", 9), Some(target.clone()));
        let second = decision(DecisionKind::Update, fp("s/2.md", "user: x", 9), Some(target));
        let forward = resolve(vec![first.clone(), second.clone()]);
        let backward = resolve(vec![second, first]);
        assert_eq!(forward[0].kind, DecisionKind::Update);
        assert_eq!(backward[1].kind, DecisionKind::Update);
    }
}
