//! JSONL chunk store: the system of record.
//!
//! One [`Chunk`] per line. Every mutation follows the same protocol:
//!
//! 1. If the store file exists, snapshot it into the backup directory and
//!    refresh `latest` (see [`backup`]). A failed snapshot aborts the
//!    mutation before the store file is touched.
//! 2. Stage the complete new content in a sibling temp file.
//! 3. Flush and fsync the temp file.
//! 4. Rename it over the store file, then fsync the directory.
//!
//! A failure anywhere in 2-4 removes the temp file and leaves the store
//! byte-for-byte unchanged. Once the rename has happened the mutation is
//! committed: a later failure to fsync the directory or refresh `latest` is
//! logged, not returned.
//!
//! Mutations are serialized twice: an async mutex orders writers sharing a
//! handle, and an exclusive advisory lock on `<store>.lock` orders every
//! handle and process writing the same file. Reads take no lock and always
//! observe some completed mutation. All file I/O runs on the blocking pool.

pub mod backup;

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use hybrid_rag_core::error::{Result, RetrievalError};
use hybrid_rag_core::models::Chunk;

/// Where to simulate a crash while staging a mutation.
#[doc(hidden)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    /// After the new content is written, before it is fsynced.
    DuringStaging,
    /// After the temp file is fsynced, before the rename.
    BeforeRename,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResult {
    pub appended: usize,
    /// Snapshot taken before the write; `None` when the store did not exist yet.
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteResult {
    pub kept: usize,
    pub deleted: usize,
    /// Unparseable lines, carried over verbatim.
    pub malformed_preserved: usize,
    pub backup: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreResult {
    pub restored_from: PathBuf,
    pub pre_restore_backup: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Snapshot the current state first so the restore can itself be undone.
    pub pre_snapshot: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self { pre_snapshot: true }
    }
}

pub struct ChunkStore {
    path: PathBuf,
    backup_dir: PathBuf,
    write_lock: Mutex<()>,
    fault: Option<FaultPoint>,
}

impl ChunkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backup_dir = backup::backup_dir_for(&path);
        Self {
            path,
            backup_dir,
            write_lock: Mutex::new(()),
            fault: None,
        }
    }

    /// Fail every mutation of this handle at `point`.
    #[doc(hidden)]
    pub fn with_fault(mut self, point: FaultPoint) -> Self {
        self.fault = Some(point);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn latest_backup_path(&self) -> PathBuf {
        backup::latest_path(&self.path, &self.backup_dir)
    }

    /// Durably add `records` after the existing content.
    ///
    /// An empty batch is a no-op and takes no snapshot.
    pub async fn append(&self, records: Vec<Chunk>) -> Result<WriteResult> {
        if records.is_empty() {
            return Ok(WriteResult::default());
        }
        let mut lines = Vec::with_capacity(records.len());
        for record in &records {
            if record.id.trim().is_empty() {
                return Err(RetrievalError::InvalidRecord("chunk id is empty".to_string()));
            }
            if record.text.trim().is_empty() {
                return Err(RetrievalError::InvalidRecord(format!(
                    "chunk {} has empty content",
                    record.id
                )));
            }
            let line = serde_json::to_string(record)
                .map_err(|e| RetrievalError::InvalidRecord(e.to_string()))?;
            lines.push(line);
        }

        let _guard = self.write_lock.lock().await;
        let (path, backup_dir, fault) = self.parts();
        let appended = lines.len();

        let backup = run_blocking(&self.path, move || {
            let _lock = StoreLock::acquire(&path)?;
            let backup = snapshot_if_present(&path, &backup_dir)?;
            let existing = read_existing(&path)?;
            stage_and_replace(&path, fault, |out| {
                out.write_all(&existing)?;
                if !existing.is_empty() && !existing.ends_with(b"\n") {
                    out.write_all(b"\n")?;
                }
                for line in &lines {
                    out.write_all(line.as_bytes())?;
                    out.write_all(b"\n")?;
                }
                Ok(())
            })?;
            Ok(backup)
        })
        .await?;

        tracing::info!(
            store = %self.path.display(),
            appended,
            backup = ?backup,
            "appended chunks"
        );
        Ok(WriteResult { appended, backup })
    }

    /// Keep only the records for which `keep` returns true.
    ///
    /// Lines that do not parse as a chunk are preserved as they are; blank
    /// lines are dropped. A missing store is left missing.
    pub async fn rewrite<F>(&self, keep: F) -> Result<RewriteResult>
    where
        F: FnMut(&Chunk) -> bool + Send + 'static,
    {
        let _guard = self.write_lock.lock().await;
        let (path, backup_dir, fault) = self.parts();

        let result = run_blocking(&self.path, move || {
            let _lock = StoreLock::acquire(&path)?;
            if !path.exists() {
                return Ok(RewriteResult::default());
            }
            let backup = snapshot_if_present(&path, &backup_dir)?;
            let existing = read_existing(&path)?;

            let mut keep = keep;
            let mut counts = RewriteResult {
                backup,
                ..RewriteResult::default()
            };
            stage_and_replace(&path, fault, |out| {
                for line in existing.split(|b| *b == b'\n') {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    match serde_json::from_slice::<Chunk>(line) {
                        Ok(chunk) if !keep(&chunk) => {
                            counts.deleted += 1;
                            continue;
                        }
                        Ok(_) => counts.kept += 1,
                        Err(_) => counts.malformed_preserved += 1,
                    }
                    out.write_all(line)?;
                    out.write_all(b"\n")?;
                }
                Ok(())
            })?;
            Ok(counts)
        })
        .await?;

        tracing::info!(
            store = %self.path.display(),
            kept = result.kept,
            deleted = result.deleted,
            malformed_preserved = result.malformed_preserved,
            "rewrote chunk store"
        );
        Ok(result)
    }

    /// Remove every record matching `pred`.
    pub async fn delete_where<F>(&self, mut pred: F) -> Result<RewriteResult>
    where
        F: FnMut(&Chunk) -> bool + Send + 'static,
    {
        self.rewrite(move |c| !pred(c)).await
    }

    /// Drop repeated ids, keeping the first occurrence of each.
    pub async fn dedup(&self) -> Result<RewriteResult> {
        let mut seen = HashSet::new();
        self.rewrite(move |c| seen.insert(c.id.clone())).await
    }

    /// Restore the most recent timestamped backup, snapshotting first.
    pub async fn restore(&self, backup_path: Option<PathBuf>) -> Result<RestoreResult> {
        self.restore_with(backup_path, RestoreOptions::default())
            .await
    }

    /// Copy `backup_path` (or the newest timestamped backup) over the store.
    ///
    /// The source is chosen before the pre-restore snapshot is taken, so a
    /// plain `restore(None)` never selects the snapshot it just made.
    /// Afterwards `latest` mirrors the restored content.
    pub async fn restore_with(
        &self,
        backup_path: Option<PathBuf>,
        opts: RestoreOptions,
    ) -> Result<RestoreResult> {
        let _guard = self.write_lock.lock().await;
        let (path, backup_dir, fault) = self.parts();

        let result = run_blocking(&self.path, move || {
            let _lock = StoreLock::acquire(&path)?;
            let source = match backup_path {
                Some(p) if p.is_file() => p,
                Some(p) => return Err(RetrievalError::BackupNotFound { location: p }),
                None => backup::list(&path, &backup_dir)
                    .map_err(|e| RetrievalError::storage(&backup_dir, e))?
                    .pop()
                    .ok_or_else(|| RetrievalError::BackupNotFound {
                        location: backup_dir.clone(),
                    })?,
            };

            let pre_restore_backup = if opts.pre_snapshot {
                snapshot_if_present(&path, &backup_dir)?
            } else {
                None
            };

            let content = fs::read(&source).map_err(|e| RetrievalError::storage(&source, e))?;
            stage_and_replace(&path, fault, |out| out.write_all(&content))?;
            if let Err(e) =
                backup::refresh_latest(&source, &backup::latest_path(&path, &backup_dir))
            {
                tracing::warn!(
                    store = %path.display(),
                    error = %e,
                    "store restored but latest backup was not refreshed"
                );
            }

            Ok(RestoreResult {
                restored_from: source,
                pre_restore_backup,
            })
        })
        .await?;

        tracing::info!(
            store = %self.path.display(),
            from = %result.restored_from.display(),
            pre_restore_backup = ?result.pre_restore_backup,
            "restored chunk store"
        );
        Ok(result)
    }

    /// Every parseable record, in file order. A missing store is empty.
    pub async fn load_all(&self) -> Result<Vec<Chunk>> {
        let path = self.path.clone();
        run_blocking(&self.path, move || load_records(&path)).await
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.load_all().await?.len())
    }

    /// Timestamped backups, oldest first.
    pub async fn list_backups(&self) -> Result<Vec<PathBuf>> {
        let (path, backup_dir, _) = self.parts();
        run_blocking(&self.path, move || {
            backup::list(&path, &backup_dir).map_err(|e| RetrievalError::storage(&backup_dir, e))
        })
        .await
    }

    fn parts(&self) -> (PathBuf, PathBuf, Option<FaultPoint>) {
        (self.path.clone(), self.backup_dir.clone(), self.fault)
    }
}

async fn run_blocking<T, F>(path: &Path, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RetrievalError::storage(path, io::Error::other(e)))?
}

fn snapshot_if_present(path: &Path, backup_dir: &Path) -> Result<Option<PathBuf>> {
    if path.exists() {
        backup::snapshot(path, backup_dir).map(Some)
    } else {
        Ok(None)
    }
}

fn read_existing(path: &Path) -> Result<Vec<u8>> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(RetrievalError::storage(path, e)),
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!(".{}.tmp-{}", name, Uuid::new_v4()))
}

/// Exclusive advisory lock on the store's `.lock` sibling, released on drop.
struct StoreLock {
    file: File,
}

impl StoreLock {
    fn acquire(path: &Path) -> Result<Self> {
        let dir = parent_dir(path);
        fs::create_dir_all(dir).map_err(|e| RetrievalError::storage(dir, e))?;

        let lock_path = lock_path(path);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| RetrievalError::storage(&lock_path, e))?;
        FileExt::lock_exclusive(&file).map_err(|e| RetrievalError::storage(&lock_path, e))?;
        Ok(Self { file })
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    path.with_file_name(format!("{}.lock", name))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Write the full new content to a temp sibling, fsync, and rename it over
/// `path`. On error the temp file is removed and `path` is untouched.
fn stage_and_replace<W>(path: &Path, fault: Option<FaultPoint>, write_body: W) -> Result<()>
where
    W: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let dir = parent_dir(path);
    fs::create_dir_all(dir).map_err(|e| RetrievalError::storage(dir, e))?;

    let tmp = temp_sibling(path);
    let staged = (|| -> io::Result<()> {
        let file = File::options().write(true).create_new(true).open(&tmp)?;
        let mut out = BufWriter::new(file);
        write_body(&mut out)?;
        if fault == Some(FaultPoint::DuringStaging) {
            return Err(io::Error::other("injected fault during staging"));
        }
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        if fault == Some(FaultPoint::BeforeRename) {
            return Err(io::Error::other("injected fault before rename"));
        }
        fs::rename(&tmp, path)
    })();

    if let Err(e) = staged {
        let _ = fs::remove_file(&tmp);
        tracing::warn!(store = %path.display(), error = %e, "staging failed, store left unchanged");
        return Err(RetrievalError::storage(path, e));
    }

    if let Err(e) = sync_dir(dir) {
        tracing::warn!(dir = %dir.display(), error = %e, "directory fsync failed after rename");
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn load_records(path: &Path) -> Result<Vec<Chunk>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RetrievalError::storage(path, e)),
    };

    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    let mut skipped = 0usize;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| RetrievalError::storage(path, e))?;
        if n == 0 {
            break;
        }
        line_no += 1;
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<Chunk>(&buf) {
            Ok(chunk) => records.push(chunk),
            Err(e) => {
                skipped += 1;
                tracing::warn!(line = line_no, error = %e, "skipping malformed chunk record");
            }
        }
    }
    if skipped > 0 {
        tracing::warn!(store = %path.display(), skipped, "malformed lines skipped while loading");
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_rag_core::chunk::{chunk_source, ChunkOptions};
    use hybrid_rag_core::models::Source;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn records(path: &str, text: &str) -> Vec<Chunk> {
        chunk_source(
            &Source::Document {
                path: path.to_string(),
            },
            text,
            &ChunkOptions::default(),
        )
    }

    fn store_in(tmp: &TempDir) -> ChunkStore {
        ChunkStore::new(tmp.path().join("out").join("chunks.jsonl"))
    }

    #[tokio::test]
    async fn test_first_append_creates_store_without_backup() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let result = store.append(records("a.md", "alpha")).await.unwrap();
        assert_eq!(result.appended, 1);
        assert!(result.backup.is_none());
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.backup_dir(), tmp.path().join("backups"));
    }

    #[tokio::test]
    async fn test_append_snapshots_previous_state() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        store.append(records("a.md", "alpha")).await.unwrap();
        let before = fs::read(store.path()).unwrap();

        let result = store.append(records("b.md", "beta")).await.unwrap();
        let backup = result.backup.unwrap();
        assert_eq!(fs::read(&backup).unwrap(), before);
        assert_eq!(fs::read(store.latest_backup_path()).unwrap(), before);
        assert_eq!(store.list_backups().await.unwrap(), vec![backup]);
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_append_rejects_empty_text() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let mut bad = records("a.md", "alpha");
        bad[0].text = "   ".to_string();
        let err = store.append(bad).await.unwrap_err();
        assert!(matches!(err, RetrievalError::InvalidRecord(_)));
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_append_repairs_missing_trailing_newline() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::new(tmp.path().join("chunks.jsonl"));
        let first = serde_json::to_string(&records("a.md", "alpha")[0]).unwrap();
        fs::write(store.path(), first).unwrap();

        store.append(records("b.md", "beta")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_faults_leave_store_untouched() {
        for point in [FaultPoint::DuringStaging, FaultPoint::BeforeRename] {
            let tmp = TempDir::new().unwrap();
            let path = tmp.path().join("chunks.jsonl");
            ChunkStore::new(&path)
                .append(records("a.md", "alpha"))
                .await
                .unwrap();
            let before = fs::read(&path).unwrap();

            let faulty = ChunkStore::new(&path).with_fault(point);
            let err = faulty.append(records("b.md", "beta")).await.unwrap_err();
            assert!(matches!(err, RetrievalError::StorageIo { .. }));
            assert_eq!(fs::read(&path).unwrap(), before);

            let leftovers: Vec<_> = fs::read_dir(tmp.path())
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
                .collect();
            assert!(leftovers.is_empty(), "temp file left behind for {:?}", point);
        }
    }

    #[tokio::test]
    async fn test_backup_failure_aborts_mutation() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chunks.jsonl");
        let store = ChunkStore::new(&path);
        store.append(records("a.md", "alpha")).await.unwrap();
        let before = fs::read(&path).unwrap();

        // A plain file where the backup directory should be.
        fs::write(tmp.path().join("backups"), "not a dir").unwrap();

        let err = store.append(records("b.md", "beta")).await.unwrap_err();
        assert!(matches!(err, RetrievalError::BackupCreation { .. }));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_load_skips_malformed_lines() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::new(tmp.path().join("chunks.jsonl"));
        let good = serde_json::to_string(&records("a.md", "alpha")[0]).unwrap();
        fs::write(store.path(), format!("{}\nnot json\n\n{{\"id\":1}}\n", good)).unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].text, "alpha");
    }

    #[tokio::test]
    async fn test_missing_store_loads_empty() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::new(tmp.path().join("nothing.jsonl"));
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rewrite_preserves_malformed_lines() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::new(tmp.path().join("chunks.jsonl"));
        let a = serde_json::to_string(&records("a.md", "alpha")[0]).unwrap();
        let b = serde_json::to_string(&records("b.md", "beta")[0]).unwrap();
        fs::write(store.path(), format!("{}\ngarbage\n{}\n", a, b)).unwrap();

        let result = store
            .delete_where(|c| c.source.locator() == "a.md")
            .await
            .unwrap();
        assert_eq!(result.kept, 1);
        assert_eq!(result.deleted, 1);
        assert_eq!(result.malformed_preserved, 1);
        assert!(result.backup.is_some());
        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            format!("garbage\n{}\n", b)
        );
    }

    #[tokio::test]
    async fn test_dedup_keeps_first() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::new(tmp.path().join("chunks.jsonl"));
        let batch = records("a.md", "alpha");
        store.append(batch.clone()).await.unwrap();
        store.append(batch).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let result = store.dedup().await.unwrap();
        assert_eq!(result.kept, 1);
        assert_eq!(result.deleted, 1);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_restore_without_backups() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::new(tmp.path().join("chunks.jsonl"));
        let err = store.restore(None).await.unwrap_err();
        assert!(matches!(err, RetrievalError::BackupNotFound { .. }));

        let err = store
            .restore(Some(tmp.path().join("missing.jsonl")))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::BackupNotFound { .. }));
    }

    #[tokio::test]
    async fn test_restore_is_reversible() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::new(tmp.path().join("chunks.jsonl"));
        store.append(records("a.md", "alpha")).await.unwrap();
        let one = fs::read(store.path()).unwrap();
        store.append(records("b.md", "beta")).await.unwrap();
        let two = fs::read(store.path()).unwrap();

        let restored = store.restore(None).await.unwrap();
        assert_eq!(fs::read(store.path()).unwrap(), one);
        assert_eq!(fs::read(store.latest_backup_path()).unwrap(), one);

        let pre = restored.pre_restore_backup.unwrap();
        assert_eq!(fs::read(&pre).unwrap(), two);

        store.restore(Some(pre)).await.unwrap();
        assert_eq!(fs::read(store.path()).unwrap(), two);
    }

    #[tokio::test]
    async fn test_restore_without_pre_snapshot() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::new(tmp.path().join("chunks.jsonl"));
        store.append(records("a.md", "alpha")).await.unwrap();
        store.append(records("b.md", "beta")).await.unwrap();
        let backups_before = store.list_backups().await.unwrap().len();

        let result = store
            .restore_with(None, RestoreOptions { pre_snapshot: false })
            .await
            .unwrap();
        assert!(result.pre_restore_backup.is_none());
        assert_eq!(store.list_backups().await.unwrap().len(), backups_before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mutations_on_shared_handle() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::new(tmp.path().join("chunks.jsonl")));

        let mut tasks = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store
                    .append(records(&format!("doc-{}.md", i), "alpha"))
                    .await
                    .unwrap();
                if i % 5 == 0 {
                    store.dedup().await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 20);
        assert!(tmp.path().join("chunks.jsonl.lock").exists());
    }

    #[tokio::test]
    async fn test_restore_commits_when_latest_refresh_fails() {
        let tmp = TempDir::new().unwrap();
        let store = ChunkStore::new(tmp.path().join("chunks.jsonl"));
        store.append(records("a.md", "alpha")).await.unwrap();
        let one = fs::read(store.path()).unwrap();
        store.append(records("b.md", "beta")).await.unwrap();

        // A directory where `latest` should be written.
        let latest = store.latest_backup_path();
        fs::remove_file(&latest).unwrap();
        fs::create_dir(&latest).unwrap();

        let result = store
            .restore_with(None, RestoreOptions { pre_snapshot: false })
            .await
            .unwrap();
        assert_eq!(fs::read(store.path()).unwrap(), one);
        assert_eq!(fs::read(&result.restored_from).unwrap(), one);
    }
}
