use crate::error::MergeError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

include!(concat!(env!("OUT_DIR"), "/env_allowlist.rs"));

const ENV_PREFIX: &str = "CHAT_MERGE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub similarity_threshold: f64,
    pub fingerprint_messages: usize,
    /// Best scores below this are "no candidate" (NEW) rather than REVIEW.
    pub min_candidate_similarity: f64,
    pub preview_chars: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            fingerprint_messages: 3,
            min_candidate_similarity: 0.3,
            preview_chars: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig {
    pub backup: bool,
    pub extension: String,
    /// Extraction worker count; 0 lets rayon pick.
    pub jobs: usize,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            backup: true,
            extension: "md".to_string(),
            jobs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MergeConfig {
    pub matching: MatchingConfig,
    pub apply: ApplyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialMergeConfig {
    matching: Option<MatchingConfig>,
    apply: Option<ApplyConfig>,
}

/// Values given on the command line; `None` keeps the layered value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub similarity_threshold: Option<f64>,
    pub fingerprint_messages: Option<usize>,
    pub min_candidate_similarity: Option<f64>,
    pub backup: Option<bool>,
    pub extension: Option<String>,
    pub jobs: Option<usize>,
}

fn parse_f64(raw: Option<String>, fallback: f64) -> f64 {
    match raw {
        Some(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        None => fallback,
    }
}

fn parse_usize(raw: Option<String>, fallback: usize) -> usize {
    match raw {
        Some(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        None => fallback,
    }
}

fn parse_bool(raw: Option<String>, fallback: bool) -> bool {
    match raw {
        Some(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        None => fallback,
    }
}

fn parse_string(raw: Option<String>, fallback: &str) -> String {
    match raw {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn normalize_extension(raw: &str) -> String {
    raw.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn validate(cfg: &MergeConfig) -> Result<(), MergeError> {
    let t = cfg.matching.similarity_threshold;
    let floor = cfg.matching.min_candidate_similarity;
    if !(t > 0.0 && t <= 1.0) {
        return Err(MergeError::InvalidConfig(
            "similarity threshold must satisfy 0 < threshold <= 1.0".to_string(),
        ));
    }
    if !(0.0..t).contains(&floor) {
        return Err(MergeError::InvalidConfig(
            "min candidate similarity must satisfy 0 <= floor < threshold".to_string(),
        ));
    }
    if cfg.matching.fingerprint_messages == 0 {
        return Err(MergeError::InvalidConfig(
            "fingerprint messages must be >= 1".to_string(),
        ));
    }
    if cfg.apply.extension.is_empty() {
        return Err(MergeError::InvalidConfig(
            "file extension cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("CHAT_MERGE_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let base = dirs::config_dir()?;
    Some(base.join("chat-merge").join("config.toml"))
}

fn merge_file_config(base: &mut MergeConfig, path: &Path) -> Result<(), MergeError> {
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(path)
        .map_err(|err| MergeError::InvalidConfig(format!("{}: {err}", path.display())))?;
    let parsed: PartialMergeConfig = toml::from_str(&raw)
        .map_err(|err| MergeError::InvalidConfig(format!("{}: {err}", path.display())))?;
    if let Some(matching) = parsed.matching {
        base.matching = matching;
    }
    if let Some(apply) = parsed.apply {
        base.apply = apply;
    }
    Ok(())
}

fn merge_env(cfg: &mut MergeConfig, lookup: impl Fn(&str) -> Option<String>) {
    cfg.matching.similarity_threshold = parse_f64(
        lookup("CHAT_MERGE_SIMILARITY"),
        cfg.matching.similarity_threshold,
    );
    cfg.matching.fingerprint_messages = parse_usize(
        lookup("CHAT_MERGE_FINGERPRINT_MESSAGES"),
        cfg.matching.fingerprint_messages,
    );
    cfg.matching.min_candidate_similarity = parse_f64(
        lookup("CHAT_MERGE_MIN_CANDIDATE"),
        cfg.matching.min_candidate_similarity,
    );
    cfg.matching.preview_chars = parse_usize(
        lookup("CHAT_MERGE_PREVIEW_CHARS"),
        cfg.matching.preview_chars,
    );
    cfg.apply.backup = parse_bool(lookup("CHAT_MERGE_BACKUP"), cfg.apply.backup);
    cfg.apply.extension = parse_string(lookup("CHAT_MERGE_EXTENSION"), &cfg.apply.extension);
    cfg.apply.jobs = parse_usize(lookup("CHAT_MERGE_JOBS"), cfg.apply.jobs);
}

fn merge_overrides(cfg: &mut MergeConfig, overrides: &ConfigOverrides) {
    if let Some(v) = overrides.similarity_threshold {
        cfg.matching.similarity_threshold = v;
    }
    if let Some(v) = overrides.fingerprint_messages {
        cfg.matching.fingerprint_messages = v;
    }
    if let Some(v) = overrides.min_candidate_similarity {
        cfg.matching.min_candidate_similarity = v;
    }
    if let Some(v) = overrides.backup {
        cfg.apply.backup = v;
    }
    if let Some(v) = overrides.extension.as_deref() {
        cfg.apply.extension = v.to_string();
    }
    if let Some(v) = overrides.jobs {
        cfg.apply.jobs = v;
    }
}

fn build_config(
    file: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
    overrides: &ConfigOverrides,
) -> Result<MergeConfig, MergeError> {
    let mut cfg = MergeConfig::default();
    if let Some(path) = file {
        merge_file_config(&mut cfg, path)?;
    }
    merge_env(&mut cfg, lookup);
    merge_overrides(&mut cfg, overrides);
    cfg.apply.extension = normalize_extension(&cfg.apply.extension);
    validate(&cfg)?;
    Ok(cfg)
}

/// Defaults, then the TOML file, then `CHAT_MERGE_*` variables, then CLI flags.
pub fn load_config(overrides: &ConfigOverrides) -> Result<MergeConfig> {
    let path = resolve_config_path();
    let cfg = build_config(path.as_deref(), |key| env::var(key).ok(), overrides)?;
    Ok(cfg)
}

/// `CHAT_MERGE_*` keys present in `keys` that this binary never reads.
pub fn unknown_env_keys<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter()
        .filter_map(|key| {
            let key = key.as_ref();
            if key.starts_with(ENV_PREFIX) && !GENERATED_ENV_ALLOWLIST.contains(&key) {
                Some(key.to_string())
            } else {
                None
            }
        })
        .collect()
}

pub fn warn_unknown_env_keys() {
    let keys = env::vars_os().filter_map(|(key, _)| key.into_string().ok());
    for key in unknown_env_keys(keys) {
        tracing::warn!("ignoring unrecognised environment variable {key}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = build_config(None, lookup_from(&[]), &ConfigOverrides::default())
            .expect("defaults");
        assert_eq!(cfg.matching.similarity_threshold, 0.8);
        assert_eq!(cfg.matching.fingerprint_messages, 3);
        assert!(cfg.apply.backup);
        assert_eq!(cfg.apply.extension, "md");
    }

    #[test]
    fn layers_apply_in_precedence_order() {
        let tmp = tempdir().expect("tempdir");
        let file = tmp.path().join("config.toml");
        fs::write(
            &file,
            "[matching]\nsimilarity_threshold = 0.7\nfingerprint_messages = 5\n\n[apply]\nbackup = false\n",
        )
        .expect("write config");

        let lookup = lookup_from(&[
            ("CHAT_MERGE_FINGERPRINT_MESSAGES", "4"),
            ("CHAT_MERGE_EXTENSION", ".TXT"),
        ]);
        let overrides = ConfigOverrides {
            fingerprint_messages: Some(2),
            ..ConfigOverrides::default()
        };
        let cfg = build_config(Some(&file), lookup, &overrides).expect("config");

        assert_eq!(cfg.matching.similarity_threshold, 0.7);
        assert_eq!(cfg.matching.fingerprint_messages, 2);
        assert_eq!(cfg.matching.min_candidate_similarity, 0.3);
        assert!(!cfg.apply.backup);
        assert_eq!(cfg.apply.extension, "txt");
    }

    #[test]
    fn unparsable_env_value_keeps_previous_layer() {
        let cfg = build_config(
            None,
            lookup_from(&[("CHAT_MERGE_SIMILARITY", "very")]),
            &ConfigOverrides::default(),
        )
        .expect("config");
        assert_eq!(cfg.matching.similarity_threshold, 0.8);
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let overrides = ConfigOverrides {
            similarity_threshold: Some(1.5),
            ..ConfigOverrides::default()
        };
        let err = build_config(None, lookup_from(&[]), &overrides).expect_err("invalid");
        assert!(matches!(err, MergeError::InvalidConfig(_)));
    }

    #[test]
    fn floor_must_sit_below_threshold() {
        let overrides = ConfigOverrides {
            similarity_threshold: Some(0.5),
            min_candidate_similarity: Some(0.5),
            ..ConfigOverrides::default()
        };
        assert!(build_config(None, lookup_from(&[]), &overrides).is_err());
    }

    #[test]
    fn broken_toml_is_fatal() {
        let tmp = tempdir().expect("tempdir");
        let file = tmp.path().join("config.toml");
        fs::write(&file, "[matching\n").expect("write config");
        let err = build_config(Some(&file), lookup_from(&[]), &ConfigOverrides::default())
            .expect_err("broken");
        assert!(matches!(err, MergeError::InvalidConfig(_)));
    }

    #[test]
    fn unknown_keys_are_reported() {
        let typo = format!("{ENV_PREFIX}SIMILARTY");
        let found = unknown_env_keys(["CHAT_MERGE_SIMILARITY", typo.as_str(), "HOME"]);
        assert_eq!(found, vec![typo]);
    }
}
