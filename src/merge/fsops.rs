//! Filesystem mutation for the apply phase: backups, atomic writes and the
//! per-archive lock.

use crate::error::MergeError;
use chrono::Local;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const LOCK_FILE: &str = ".chat-merge.lock";
const TEMP_PREFIX: &str = ".chat-merge-";

/// Exclusive advisory lock on a target archive, released on drop.
#[derive(Debug)]
pub struct TargetLock {
    file: File,
    path: PathBuf,
}

impl TargetLock {
    pub fn acquire(target_dir: &Path) -> Result<Self, MergeError> {
        let path = target_dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|err| MergeError::write(&path, err))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(err) if is_contended(&err) => Err(MergeError::Locked(path)),
            Err(err) => Err(MergeError::write(&path, err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || (err.raw_os_error().is_some()
            && err.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        // Removed while still held so no other run can lock the old inode.
        let _ = fs::remove_file(&self.path);
        let _ = FileExt::unlock(&self.file);
    }
}

/// Write `bytes` to `dest` through a temp file in the same directory, so
/// `dest` is either fully replaced or untouched.
pub fn atomic_write(
    dest: &Path,
    bytes: &[u8],
    permissions: Option<Permissions>,
    clobber: bool,
) -> io::Result<()> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new().prefix(TEMP_PREFIX).tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    if let Some(perms) = permissions {
        fs::set_permissions(tmp.path(), perms)?;
    }
    persist(tmp, dest, clobber)
}

fn persist(tmp: NamedTempFile, dest: &Path, clobber: bool) -> io::Result<()> {
    let result = if clobber {
        tmp.persist(dest)
    } else {
        tmp.persist_noclobber(dest)
    };
    result.map(|_| ()).map_err(|err| err.error)
}

pub fn backup_stamp() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// `<name>.<stamp>.bak`, with a counter when that name is already taken.
pub fn backup_path_for(dest: &Path, stamp: &str) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "conversation".to_string());
    let mut candidate = dest.with_file_name(format!("{name}.{stamp}.bak"));
    let mut n = 2u32;
    while candidate.exists() {
        candidate = dest.with_file_name(format!("{name}.{stamp}-{n}.bak"));
        n += 1;
    }
    candidate
}

/// First free name in `dir`: `name`, then `stem (2).ext`, `stem (3).ext`, ...
pub fn free_destination(dir: &Path, file_name: &str) -> PathBuf {
    let first = dir.join(file_name);
    if !first.exists() {
        return first;
    }
    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut n = 2u32;
    loop {
        let candidate = dir.join(format!("{stem} ({n}){ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn read_source(source: &Path) -> Result<(Vec<u8>, Option<Permissions>), MergeError> {
    let bytes = fs::read(source).map_err(|err| MergeError::write(source, err))?;
    let perms = fs::metadata(source).ok().map(|m| m.permissions());
    Ok((bytes, perms))
}

/// Copy a brand-new conversation into `target_dir` without clobbering
/// anything already there.
pub fn copy_new(source: &Path, target_dir: &Path) -> Result<PathBuf, MergeError> {
    let (bytes, perms) = read_source(source)?;
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "conversation.md".to_string());

    loop {
        let dest = free_destination(target_dir, &file_name);
        match atomic_write(&dest, &bytes, perms.clone(), false) {
            Ok(()) => return Ok(dest),
            // Lost a race for that name; pick the next one.
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(MergeError::write(&dest, err)),
        }
    }
}

/// Preserve the current `dest` under `backup` in one step: a hard link where
/// the filesystem allows it, otherwise a full copy through a temp file.
/// Either way `backup` never exists half-written.
fn snapshot(dest: &Path, backup: &Path, permissions: Option<Permissions>) -> io::Result<()> {
    match fs::hard_link(dest, backup) {
        Ok(()) => Ok(()),
        Err(err) if matches!(err.kind(), ErrorKind::AlreadyExists | ErrorKind::NotFound) => {
            Err(err)
        }
        Err(_) => atomic_write(backup, &fs::read(dest)?, permissions, false),
    }
}

/// Replace `dest` with the content of `source`. With `backup`, the current
/// `dest` is copied aside first and nothing is overwritten unless that copy
/// succeeded.
pub fn replace_with_backup(
    source: &Path,
    dest: &Path,
    backup: bool,
) -> Result<Option<PathBuf>, MergeError> {
    let (bytes, _) = read_source(source)?;
    let dest_perms = fs::metadata(dest).ok().map(|m| m.permissions());

    let backup_path = if backup {
        let path = backup_path_for(dest, &backup_stamp());
        snapshot(dest, &path, dest_perms.clone()).map_err(|err| MergeError::write(&path, err))?;
        Some(path)
    } else {
        None
    };

    atomic_write(dest, &bytes, dest_perms, true).map_err(|err| MergeError::write(dest, err))?;
    Ok(backup_path)
}
