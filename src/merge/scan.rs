use crate::error::MergeError;
use std::fs;
use std::path::{Path, PathBuf};

/// A conversation export read into memory.
#[derive(Debug, Clone)]
pub struct ConversationFile {
    pub path: PathBuf,
    pub content: String,
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}

/// List candidate files directly inside `dir`, sorted by path.
///
/// Only directory-level failures are errors; entries that vanish or cannot
/// be stat'ed mid-scan are skipped.
pub fn scan_dir(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, MergeError> {
    let scan_err = |reason: String| MergeError::Scan {
        path: dir.to_path_buf(),
        reason,
    };

    let meta = fs::metadata(dir).map_err(|err| scan_err(err.to_string()))?;
    if !meta.is_dir() {
        return Err(scan_err("not a directory".to_string()));
    }

    let read_dir = fs::read_dir(dir).map_err(|err| scan_err(err.to_string()))?;
    let mut out = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|err| scan_err(err.to_string()))?;
        let path = entry.path();
        if is_hidden(&path) || !has_extension(&path, extension) {
            continue;
        }
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

pub fn read_conversation(path: &Path) -> Result<ConversationFile, MergeError> {
    let bytes = fs::read(path).map_err(|err| MergeError::Parse {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let content = String::from_utf8(bytes).map_err(|_| MergeError::Parse {
        path: path.to_path_buf(),
        reason: "file is not valid UTF-8 text".to_string(),
    })?;
    Ok(ConversationFile {
        path: path.to_path_buf(),
        content,
    })
}
