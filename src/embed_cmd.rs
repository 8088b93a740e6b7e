//! Embedding pipeline: fill the vector index from the chunk store.

use anyhow::{bail, Result};

use hybrid_rag_core::embedding::Embedder;
use hybrid_rag_core::models::Chunk;
use hybrid_rag_core::vector::{IndexedEmbedding, VectorIndex};

use crate::service::RetrievalService;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedReport {
    pub pending: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Embed `chunks` in batches of `batch_size` and upsert the vectors.
///
/// A failed batch, whether in the provider or the backend, is counted and
/// logged; the remaining batches still run.
pub async fn embed_chunks(
    vector: &dyn VectorIndex,
    embedder: &dyn Embedder,
    chunks: &[Chunk],
    batch_size: usize,
) -> EmbedReport {
    let mut report = EmbedReport {
        pending: chunks.len(),
        ..EmbedReport::default()
    };
    let model = embedder.model_name().to_string();

    for batch in chunks.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = match embedder.embed(&texts).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(batch = batch.len(), error = %e, "embedding batch failed");
                report.failed += batch.len();
                continue;
            }
        };

        let items: Vec<IndexedEmbedding> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, v)| IndexedEmbedding::for_chunk(chunk, v, &model))
            .collect();
        match vector.upsert(items).await {
            Ok(n) => report.embedded += n,
            Err(e) => {
                tracing::warn!(backend = vector.backend(), error = %e, "vector upsert failed");
                report.failed += batch.len();
            }
        }
    }

    report
}

/// Embed every stored chunk that has no vector from the configured model.
pub async fn run_embed_pending(
    service: &RetrievalService,
    batch_size: usize,
    limit: Option<usize>,
) -> Result<EmbedReport> {
    let (Some(vector), Some(embedder)) = (service.vector(), service.embedder()) else {
        bail!("Embedding needs both [vector] backend and [embedding] provider configured.");
    };

    let done = vector.embedded_ids(embedder.model_name()).await?;
    let mut seen = std::collections::HashSet::new();
    let mut pending: Vec<Chunk> = service
        .store()
        .load_all()
        .await?
        .into_iter()
        .filter(|c| !done.contains(&c.id) && seen.insert(c.id.clone()))
        .collect();
    if let Some(limit) = limit {
        pending.truncate(limit);
    }

    if pending.is_empty() {
        return Ok(EmbedReport::default());
    }

    let report = embed_chunks(vector.as_ref(), embedder.as_ref(), &pending, batch_size).await;
    tracing::info!(
        model = embedder.model_name(),
        pending = report.pending,
        embedded = report.embedded,
        failed = report.failed,
        "embed pending finished"
    );
    Ok(report)
}
