//! Store statistics: chunk counts, per-source-type breakdown, backups and
//! embedding coverage. Used by `hrag stats`.

use std::collections::{BTreeMap, HashSet};

use anyhow::Result;

use crate::service::RetrievalService;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStats {
    pub chunks: usize,
    pub sources: usize,
    pub by_source_type: BTreeMap<String, usize>,
    pub store_bytes: u64,
    pub backups: usize,
    /// `None` when no vector backend is configured.
    pub embedded: Option<usize>,
}

pub async fn collect_stats(service: &RetrievalService) -> Result<StoreStats> {
    let store = service.store();
    let corpus = store.load_all().await?;

    let mut by_source_type = BTreeMap::new();
    let mut sources = HashSet::new();
    for chunk in &corpus {
        *by_source_type
            .entry(chunk.source.source_type().to_string())
            .or_insert(0) += 1;
        sources.insert(chunk.source.locator().to_string());
    }

    let store_bytes = tokio::fs::metadata(store.path())
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    let embedded = match service.vector() {
        Some(v) => Some(v.count().await?),
        None => None,
    };

    Ok(StoreStats {
        chunks: corpus.len(),
        sources: sources.len(),
        by_source_type,
        store_bytes,
        backups: store.list_backups().await?.len(),
        embedded,
    })
}

pub async fn run_stats(service: &RetrievalService) -> Result<()> {
    let stats = collect_stats(service).await?;

    println!("Hybrid RAG Store Stats");
    println!("======================");
    println!();
    println!("  Store:       {}", service.store().path().display());
    println!("  Size:        {}", format_bytes(stats.store_bytes));
    println!("  Backups:     {} in {}", stats.backups, service.store().backup_dir().display());
    println!();
    println!("  Chunks:      {}", stats.chunks);
    println!("  Sources:     {}", stats.sources);
    match stats.embedded {
        Some(embedded) => println!(
            "  Embedded:    {} / {} ({}%)",
            embedded,
            stats.chunks,
            if stats.chunks > 0 {
                (embedded * 100) / stats.chunks
            } else {
                0
            }
        ),
        None => println!("  Embedded:    vector backend disabled"),
    }

    if !stats.by_source_type.is_empty() {
        println!();
        println!("  By source type:");
        println!("  {:<16} {:>8}", "TYPE", "CHUNKS");
        println!("  {}", "-".repeat(25));
        for (kind, count) in &stats.by_source_type {
            println!("  {:<16} {:>8}", kind, count);
        }
    }
    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_store::ChunkStore;
    use hybrid_rag_core::chunk::{chunk_source, ChunkOptions};
    use hybrid_rag_core::models::Source;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[tokio::test]
    async fn test_collect_stats() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(ChunkStore::new(tmp.path().join("chunks.jsonl")));
        let opts = ChunkOptions::default();
        let doc = Source::Document {
            path: "a.md".to_string(),
        };
        let video = Source::Youtube {
            url: "https://youtu.be/x".to_string(),
        };
        store.append(chunk_source(&doc, "alpha", &opts)).await.unwrap();
        store.append(chunk_source(&video, "beta", &opts)).await.unwrap();

        let stats = collect_stats(&RetrievalService::new(store)).await.unwrap();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.sources, 2);
        assert_eq!(stats.by_source_type.get("youtube"), Some(&1));
        assert_eq!(stats.backups, 1);
        assert!(stats.embedded.is_none());
        assert!(stats.store_bytes > 0);
    }
}
