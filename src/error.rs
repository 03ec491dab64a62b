use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("cannot scan {path}: {reason}")]
    Scan { path: PathBuf, reason: String },
    #[error("cannot parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("write failed for {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("target archive is locked by another run: {0}")]
    Locked(PathBuf),
}

impl MergeError {
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// Stable short code used in structured warning lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Scan { .. } => "SCAN_FAILED",
            Self::Parse { .. } => "PARSE_FAILED",
            Self::Write { .. } => "WRITE_FAILED",
            Self::InvalidConfig(_) => "CONFIG_INVALID",
            Self::Locked(_) => "TARGET_LOCKED",
        }
    }
}
