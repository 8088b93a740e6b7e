//! Ingestion: chunk a source, append new chunks, refresh the indexes.
//!
//! Chunk ids are derived from content, source and position, so ingesting
//! the same input again finds every id already stored and appends nothing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use hybrid_rag_core::chunk::{chunk_text, ChunkOptions};
use hybrid_rag_core::models::{Chunk, Source};

use crate::embed_cmd::{embed_chunks, EmbedReport};
use crate::service::RetrievalService;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub produced: usize,
    pub appended: usize,
    pub already_stored: usize,
    pub backup: Option<PathBuf>,
    pub corpus_size: usize,
    /// `None` when no vector backend and embedder are configured.
    pub embedding: Option<EmbedReport>,
}

/// Chunk `text` from `source` and ingest the chunks not yet stored.
///
/// Timestamped transcripts keep their cue times on each chunk.
pub async fn ingest_text(
    service: &RetrievalService,
    source: Source,
    text: &str,
    opts: &ChunkOptions,
    embed_batch_size: usize,
) -> Result<IngestReport> {
    let chunks = chunk_text(&source, text, opts);
    ingest_chunks(service, chunks, embed_batch_size).await
}

/// Read `path` as UTF-8 text and ingest it under `source`.
pub async fn ingest_file(
    service: &RetrievalService,
    path: &Path,
    source: Source,
    opts: &ChunkOptions,
    embed_batch_size: usize,
) -> Result<IngestReport> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    ingest_text(service, source, &text, opts, embed_batch_size).await
}

/// Append the chunks whose ids are not in the store, rebuild the lexical
/// index, and embed the new chunks when vectors are enabled.
pub async fn ingest_chunks(
    service: &RetrievalService,
    chunks: Vec<Chunk>,
    embed_batch_size: usize,
) -> Result<IngestReport> {
    let produced = chunks.len();
    let mut known: HashSet<String> = service
        .store()
        .load_all()
        .await?
        .into_iter()
        .map(|c| c.id)
        .collect();
    let fresh: Vec<Chunk> = chunks
        .into_iter()
        .filter(|c| known.insert(c.id.clone()))
        .collect();

    let mut report = IngestReport {
        produced,
        already_stored: produced - fresh.len(),
        ..IngestReport::default()
    };

    if !fresh.is_empty() {
        let written = service
            .store()
            .append(fresh.clone())
            .await
            .context("Failed to append chunks")?;
        report.appended = written.appended;
        report.backup = written.backup;
    }

    report.corpus_size = service.rebuild().await?;

    if let (Some(vector), Some(embedder)) = (service.vector(), service.embedder()) {
        if !fresh.is_empty() {
            report.embedding = Some(
                embed_chunks(vector.as_ref(), embedder.as_ref(), &fresh, embed_batch_size).await,
            );
        }
    }

    tracing::info!(
        produced = report.produced,
        appended = report.appended,
        already_stored = report.already_stored,
        corpus = report.corpus_size,
        "ingest finished"
    );
    Ok(report)
}
