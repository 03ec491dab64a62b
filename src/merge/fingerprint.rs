//! Turn parsing and content fingerprints.
//!
//! Exports mark a user turn with quoted (`>`) lines; everything after the
//! quote block, up to the next quoted line, is the assistant reply. Identity
//! is derived from the first few turn pairs only, so a conversation that was
//! continued elsewhere still fingerprints the same as its shorter copy.

use crate::error::MergeError;
use crate::merge::scan::{ConversationFile, read_conversation};
use crate::merge::util::{collapse_whitespace, truncate_with_ellipsis};
use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Fingerprint {
    pub source_path: PathBuf,
    pub turn_count: usize,
    pub fingerprint_text: String,
    pub content_hash: String,
    pub first_user_turn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

impl Fingerprint {
    /// No turns were recovered, so the fingerprint says nothing about identity.
    pub fn is_degenerate(&self) -> bool {
        self.turn_count == 0
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

fn quoted_body(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('>')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

fn flush(turns: &mut Vec<Turn>, speaker: Speaker, lines: &mut Vec<&str>) {
    let text = lines.join("\n").trim().to_string();
    lines.clear();
    if speaker == Speaker::Assistant && text.is_empty() {
        return;
    }
    turns.push(Turn { speaker, text });
}

/// Split an export into ordered turns. Preamble before the first quoted
/// line is ignored, as are quoted lines inside assistant code fences.
pub fn parse_turns(content: &str) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut user: Vec<&str> = Vec::new();
    let mut assistant: Vec<&str> = Vec::new();
    let mut in_user = false;
    let mut seen_user = false;
    let mut in_fence = false;

    for line in content.lines() {
        if in_fence {
            assistant.push(line);
            if is_fence(line) {
                in_fence = false;
            }
            continue;
        }

        if let Some(body) = quoted_body(line) {
            if !in_user {
                // A blank gap between two quote blocks keeps the same user turn.
                let gap_only = assistant.iter().all(|l| l.trim().is_empty());
                if seen_user && gap_only {
                    assistant.clear();
                } else {
                    if seen_user {
                        flush(&mut turns, Speaker::User, &mut user);
                        flush(&mut turns, Speaker::Assistant, &mut assistant);
                    }
                    assistant.clear();
                }
            }
            user.push(body);
            in_user = true;
            seen_user = true;
            continue;
        }

        if !seen_user {
            continue;
        }
        in_user = false;
        if is_fence(line) {
            in_fence = true;
        }
        assistant.push(line);
    }

    if seen_user {
        flush(&mut turns, Speaker::User, &mut user);
        flush(&mut turns, Speaker::Assistant, &mut assistant);
    }
    turns
}

fn strip_heading(line: &str) -> &str {
    let hashes = line.len() - line.trim_start_matches('#').len();
    if hashes > 0 && hashes <= 6 && line[hashes..].starts_with(' ') {
        &line[hashes..]
    } else {
        line
    }
}

fn strip_inline_markers(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    for (i, &ch) in chars.iter().enumerate() {
        match ch {
            '*' | '`' => continue,
            '~' if chars.get(i + 1) == Some(&'~') || (i > 0 && chars[i - 1] == '~') => continue,
            '_' => {
                let before = i > 0 && chars[i - 1].is_alphanumeric();
                let after = chars.get(i + 1).is_some_and(|c| c.is_alphanumeric());
                // Keep intra-word underscores such as snake_case.
                if before && after {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Remove markdown decoration and collapse whitespace.
pub fn canonicalize(text: &str) -> String {
    let mut parts = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if is_fence(trimmed) {
            continue;
        }
        let unquoted = trimmed.trim_start_matches('>').trim_start();
        let body = strip_heading(unquoted);
        parts.push(strip_inline_markers(body));
    }
    collapse_whitespace(&parts.join(" "))
}

pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy)]
pub struct FingerprintExtractor {
    depth: usize,
    preview_chars: usize,
}

impl FingerprintExtractor {
    pub fn new(depth: usize, preview_chars: usize) -> Self {
        Self {
            depth: depth.max(1),
            preview_chars,
        }
    }

    pub fn extract(&self, file: &ConversationFile) -> Fingerprint {
        let turns = parse_turns(&file.content);
        let turn_count = turns.len();

        // Each pair opens with a user turn, so the prefix ends right before
        // user turn number `depth + 1`.
        let mut users_seen = 0usize;
        let mut lines = Vec::new();
        for turn in &turns {
            if turn.speaker == Speaker::User {
                users_seen += 1;
                if users_seen > self.depth {
                    break;
                }
            }
            lines.push(format!("{}: {}", turn.speaker.label(), canonicalize(&turn.text)));
        }
        let fingerprint_text = lines.join("\n");

        let first_user_turn = turns
            .iter()
            .find(|t| t.speaker == Speaker::User)
            .map(|t| truncate_with_ellipsis(&canonicalize(&t.text), self.preview_chars))
            .unwrap_or_default();

        Fingerprint {
            source_path: file.path.clone(),
            turn_count,
            content_hash: content_hash(&fingerprint_text),
            fingerprint_text,
            first_user_turn,
            parse_error: None,
        }
    }

    /// Fingerprint for a file whose turns could not be read at all.
    pub fn degenerate(&self, path: &Path, reason: impl Into<String>) -> Fingerprint {
        Fingerprint {
            source_path: path.to_path_buf(),
            turn_count: 0,
            fingerprint_text: String::new(),
            content_hash: content_hash(""),
            first_user_turn: String::new(),
            parse_error: Some(reason.into()),
        }
    }

    pub fn extract_path(&self, path: &Path) -> Fingerprint {
        match read_conversation(path) {
            Ok(file) => {
                let fp = self.extract(&file);
                tracing::debug!(
                    path = %path.display(),
                    turns = fp.turn_count,
                    hash = %fp.content_hash,
                    "fingerprinted"
                );
                fp
            }
            Err(MergeError::Parse { reason, .. }) => {
                tracing::warn!(path = %path.display(), %reason, "unreadable conversation, using empty fingerprint");
                self.degenerate(path, reason)
            }
            Err(other) => self.degenerate(path, other.to_string()),
        }
    }

    /// Fingerprint `paths` on a bounded rayon pool; output order matches input.
    pub fn extract_all(&self, paths: &[PathBuf], jobs: usize) -> Result<Vec<Fingerprint>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .context("failed to build fingerprint worker pool")?;
        Ok(pool.install(|| paths.par_iter().map(|p| self.extract_path(p)).collect()))
    }
}
