//! Chunk store durability: crash safety, backups before every mutation,
//! restore round-trips, and writers racing on one file.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use hybrid_rag::chunk_store::{ChunkStore, FaultPoint, RestoreOptions};
use hybrid_rag_core::chunk::{chunk_source, ChunkOptions};
use hybrid_rag_core::models::{Chunk, Source};
use tempfile::TempDir;

fn chunks(path: &str, text: &str) -> Vec<Chunk> {
    let opts = ChunkOptions {
        max_tokens: 8,
        ..ChunkOptions::default()
    };
    chunk_source(
        &Source::Document {
            path: path.to_string(),
        },
        text,
        &opts,
    )
}

fn seed() -> Vec<Chunk> {
    chunks(
        "notes/seed.md",
        "First paragraph of notes.\n\nSecond paragraph of notes.\n\nThird paragraph of notes.",
    )
}

fn store_path(tmp: &TempDir) -> PathBuf {
    tmp.path().join("out").join("chunks.jsonl")
}

async fn seeded_store(tmp: &TempDir) -> ChunkStore {
    fs::create_dir_all(tmp.path().join("out")).unwrap();
    let store = ChunkStore::new(store_path(tmp));
    store.append(seed()).await.unwrap();
    store
}

fn leftover_temp_files(tmp: &TempDir) -> Vec<String> {
    fs::read_dir(tmp.path().join("out"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.contains(".tmp-"))
        .collect()
}

#[tokio::test]
async fn crash_during_append_leaves_store_untouched() {
    for point in [FaultPoint::DuringStaging, FaultPoint::BeforeRename] {
        let tmp = TempDir::new().unwrap();
        seeded_store(&tmp).await;
        let before = fs::read(store_path(&tmp)).unwrap();

        let faulty = ChunkStore::new(store_path(&tmp)).with_fault(point);
        let extra = chunks("notes/extra.md", "An extra paragraph.");
        assert!(faulty.append(extra).await.is_err(), "{:?}", point);

        assert_eq!(fs::read(store_path(&tmp)).unwrap(), before, "{:?}", point);
        assert!(leftover_temp_files(&tmp).is_empty(), "{:?}", point);
    }
}

#[tokio::test]
async fn crash_during_rewrite_and_restore_leaves_store_untouched() {
    let tmp = TempDir::new().unwrap();
    seeded_store(&tmp).await;
    let before = fs::read(store_path(&tmp)).unwrap();

    let faulty = ChunkStore::new(store_path(&tmp)).with_fault(FaultPoint::BeforeRename);
    assert!(faulty.delete_where(|_| true).await.is_err());
    assert_eq!(fs::read(store_path(&tmp)).unwrap(), before);

    assert!(faulty.restore(None).await.is_err());
    assert_eq!(fs::read(store_path(&tmp)).unwrap(), before);
    assert!(leftover_temp_files(&tmp).is_empty());
}

#[tokio::test]
async fn every_mutation_snapshots_the_previous_state() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    assert_eq!(store.backup_dir(), tmp.path().join("backups"));

    let before = fs::read(store.path()).unwrap();
    let backups_before = store.list_backups().await.unwrap();

    let result = store
        .append(chunks("notes/more.md", "Yet another paragraph."))
        .await
        .unwrap();

    let backups_after = store.list_backups().await.unwrap();
    assert_eq!(backups_after.len(), backups_before.len() + 1);
    let newest = backups_after.last().unwrap();
    assert_eq!(result.backup.as_ref(), Some(newest));
    assert_eq!(fs::read(newest).unwrap(), before);
    assert_eq!(fs::read(store.latest_backup_path()).unwrap(), before);

    let before_delete = fs::read(store.path()).unwrap();
    let deleted = store
        .delete_where(|c| c.source.locator() == "notes/more.md")
        .await
        .unwrap();
    assert_eq!(deleted.deleted, 1);
    assert_eq!(
        fs::read(deleted.backup.as_ref().unwrap()).unwrap(),
        before_delete
    );
    assert_eq!(store.list_backups().await.unwrap().len(), backups_before.len() + 2);
}

#[tokio::test]
async fn restore_round_trip_is_reversible() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let original = fs::read(store.path()).unwrap();

    store
        .append(chunks("notes/bad.md", "A change we regret."))
        .await
        .unwrap();
    let changed = fs::read(store.path()).unwrap();
    assert_ne!(changed, original);

    let restored = store.restore(None).await.unwrap();
    assert_eq!(fs::read(store.path()).unwrap(), original);
    let pre = restored.pre_restore_backup.unwrap();
    assert_eq!(fs::read(&pre).unwrap(), changed);
    assert_eq!(fs::read(store.latest_backup_path()).unwrap(), original);

    // Undo the restore from its own pre-restore snapshot.
    store
        .restore_with(
            Some(pre),
            RestoreOptions {
                pre_snapshot: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(fs::read(store.path()).unwrap(), changed);
}

#[tokio::test]
async fn restore_without_backups_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let store = ChunkStore::new(tmp.path().join("chunks.jsonl"));
    assert!(store.restore(None).await.is_err());
    assert!(store
        .restore(Some(tmp.path().join("missing.jsonl")))
        .await
        .is_err());
}

#[tokio::test]
async fn dedup_keeps_first_occurrence() {
    let tmp = TempDir::new().unwrap();
    let store = seeded_store(&tmp).await;
    let seeded = seed();

    let mut again = seeded.clone();
    again[0].metadata.project = Some("later".to_string());
    store.append(again).await.unwrap();
    assert_eq!(store.count().await.unwrap(), seeded.len() * 2);

    let result = store.dedup().await.unwrap();
    assert_eq!(result.kept, seeded.len());
    assert_eq!(result.deleted, seeded.len());

    let remaining = store.load_all().await.unwrap();
    assert_eq!(remaining[0].metadata.project, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn writers_on_separate_handles_do_not_lose_appends() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("out")).unwrap();
    let handles = [
        Arc::new(ChunkStore::new(store_path(&tmp))),
        Arc::new(ChunkStore::new(store_path(&tmp))),
    ];

    let mut tasks = Vec::new();
    let mut expected = HashSet::new();
    for i in 0..40 {
        let batch = chunks(&format!("notes/{}.md", i), "One paragraph each.");
        expected.insert(batch[0].id.clone());
        let store = Arc::clone(&handles[i % 2]);
        tasks.push(tokio::spawn(async move { store.append(batch).await }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().appended, 1);
    }

    let reader = ChunkStore::new(store_path(&tmp));
    let ids: HashSet<String> = reader
        .load_all()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, expected);
    assert_eq!(reader.count().await.unwrap(), 40);
    // Every append but the first snapshotted a distinct prior state.
    assert_eq!(reader.list_backups().await.unwrap().len(), 39);
    assert!(leftover_temp_files(&tmp).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deletes_racing_appends_keep_unrelated_records() {
    let tmp = TempDir::new().unwrap();
    let first = Arc::new(seeded_store(&tmp).await);
    let second = Arc::new(ChunkStore::new(store_path(&tmp)));

    let mut tasks = Vec::new();
    for i in 0..10 {
        let store = Arc::clone(&second);
        tasks.push(tokio::spawn(async move {
            store
                .append(chunks(&format!("notes/{}.md", i), "Racing paragraph."))
                .await
                .map(|_| ())
        }));
        let store = Arc::clone(&first);
        tasks.push(tokio::spawn(async move {
            store
                .delete_where(|c| c.source.locator() == "notes/seed.md")
                .await
                .map(|_| ())
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let remaining = first.load_all().await.unwrap();
    assert_eq!(remaining.len(), 10);
    assert!(remaining
        .iter()
        .all(|c| c.source.locator() != "notes/seed.md"));
}
