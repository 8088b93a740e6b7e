//! Pre-mutation snapshots of the chunk store file.
//!
//! Layout, for a store at `data/out/chunks.jsonl`:
//!
//! ```text
//! data/backups/chunks-20260301-120000-123456.jsonl
//! data/backups/chunks-20260301-120512-000042.jsonl
//! data/backups/latest.jsonl
//! ```
//!
//! Timestamps are UTC with microsecond precision, so lexicographic order of
//! the file names is chronological order.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use hybrid_rag_core::error::{Result, RetrievalError};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%6f";

/// Where backups of `store` live.
///
/// A store inside a directory literally named `out` keeps its backups in the
/// grandparent's `backups/`; any other store keeps them beside itself.
pub fn backup_dir_for(store: &Path) -> PathBuf {
    let parent = store.parent().unwrap_or_else(|| Path::new(""));
    let base = match parent.file_name() {
        Some(name) if name == "out" => parent.parent().unwrap_or_else(|| Path::new("")),
        _ => parent,
    };
    base.join("backups")
}

/// `(stem, ext)` of the store file name, `ext` including its leading dot.
fn name_parts(store: &Path) -> (String, String) {
    let stem = store
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let ext = store
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

pub fn latest_path(store: &Path, backup_dir: &Path) -> PathBuf {
    let (_, ext) = name_parts(store);
    backup_dir.join(format!("latest{}", ext))
}

fn timestamped_path(store: &Path, backup_dir: &Path, at: DateTime<Utc>) -> PathBuf {
    let (stem, ext) = name_parts(store);
    backup_dir.join(format!("{}-{}{}", stem, at.format(TIMESTAMP_FORMAT), ext))
}

/// `YYYYMMDD-HHMMSS-ffffff`
fn is_timestamp(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() == 22
        && b[8] == b'-'
        && b[15] == b'-'
        && b
            .iter()
            .enumerate()
            .all(|(i, c)| i == 8 || i == 15 || c.is_ascii_digit())
}

/// Timestamped snapshots of `store`, oldest first.
pub fn list(store: &Path, backup_dir: &Path) -> io::Result<Vec<PathBuf>> {
    let (stem, ext) = name_parts(store);
    let prefix = format!("{}-", stem);

    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_snapshot = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(ext.as_str()))
            .is_some_and(is_timestamp);
        if is_snapshot {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Copy the current store file into a new timestamped backup and point
/// `latest` at it. Returns the new backup's path.
///
/// The caller must hold the store's write lock and must abort its mutation
/// if this fails.
pub fn snapshot(store: &Path, backup_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(backup_dir).map_err(|e| RetrievalError::backup(backup_dir, e))?;

    let mut at = Utc::now();
    let mut target = timestamped_path(store, backup_dir, at);
    while target.exists() {
        at += Duration::microseconds(1);
        target = timestamped_path(store, backup_dir, at);
    }

    copy_synced(store, &target).map_err(|e| {
        let _ = fs::remove_file(&target);
        RetrievalError::backup(&target, e)
    })?;
    refresh_latest(&target, &latest_path(store, backup_dir))?;
    Ok(target)
}

/// Atomically replace `latest` with a copy of `from`.
pub fn refresh_latest(from: &Path, latest: &Path) -> Result<()> {
    let dir = latest.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(".latest.tmp-{}", Uuid::new_v4()));
    let result = copy_synced(from, &tmp).and_then(|_| fs::rename(&tmp, latest));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(RetrievalError::backup(latest, e));
    }
    Ok(())
}

fn copy_synced(from: &Path, to: &Path) -> io::Result<()> {
    let bytes = fs::read(from)?;
    let mut out = File::create(to)?;
    out.write_all(&bytes)?;
    out.sync_all()
}
