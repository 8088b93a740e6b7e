//! The hybrid retrieval service.
//!
//! [`RetrievalService`] owns the chunk store handle, the optional vector
//! backend and model capabilities, and an atomically swappable
//! [`IndexSnapshot`] of the lexical index. A rebuild constructs a complete
//! new snapshot off the async runtime and swaps it in; in-flight queries
//! keep the snapshot they started with.
//!
//! # Query flow
//!
//! ```text
//!             ┌─ lexical search (blocking pool) ─────────┐
//! query ──────┤                                          ├─ merge ─ filter ─ rerank? ─ truncate ─ abstain
//!             └─ embed query ─ vector search (deadline) ─┘
//! ```
//!
//! The vector branch is optional and bounded by the configured deadline.
//! Embedding failures, vector backend errors, deadline overruns and
//! reranker failures degrade the result and are reported as
//! [`Warning`]s; only a missing lexical index fails the query.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};

use hybrid_rag_core::embedding::{embed_query, Embedder, Reranker};
use hybrid_rag_core::error::{Result, RetrievalError};
use hybrid_rag_core::lexical::LexicalIndex;
use hybrid_rag_core::retrieve::{
    apply_filters, apply_rerank, check_abstention, mean_score, merge_candidates, truncate, Origin,
    RetrievalCandidate, RetrieveOptions, RetrieveResult, StageCounts, Warning,
};
use hybrid_rag_core::vector::{InMemoryVectorIndex, VectorIndex, VectorQuery};

use crate::chunk_store::ChunkStore;
use crate::config::Config;
use crate::embedding::create_provider;
use crate::rerank::create_reranker;
use crate::sqlite_vector::SqliteVectorIndex;

pub const DEFAULT_DEADLINE: Duration = Duration::from_millis(3000);

/// An immutable lexical index over one consistent view of the store.
pub struct IndexSnapshot {
    pub lexical: LexicalIndex,
    pub built_at: DateTime<Utc>,
}

enum VectorOutcome {
    Disabled,
    Hits(Vec<RetrievalCandidate>),
    Degraded(Warning),
}

pub struct RetrievalService {
    store: Arc<ChunkStore>,
    snapshot: ArcSwapOption<IndexSnapshot>,
    vector: Option<Arc<dyn VectorIndex>>,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    deadline: Duration,
}

impl RetrievalService {
    pub fn new(store: Arc<ChunkStore>) -> Self {
        Self {
            store,
            snapshot: ArcSwapOption::empty(),
            vector: None,
            embedder: None,
            reranker: None,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_vector(mut self, vector: Arc<dyn VectorIndex>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn vector(&self) -> Option<&Arc<dyn VectorIndex>> {
        self.vector.as_ref()
    }

    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    pub fn vector_enabled(&self) -> bool {
        self.vector.is_some() && self.embedder.is_some()
    }

    /// The snapshot queries currently run against.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.snapshot.load_full()
    }

    /// Reload the store and swap in a freshly built lexical index.
    ///
    /// An empty store clears the snapshot, so queries fail with
    /// [`RetrievalError::IndexUnavailable`] until chunks are ingested.
    /// Returns the corpus size.
    pub async fn rebuild(&self) -> Result<usize> {
        let corpus = self.store.load_all().await?;
        if corpus.is_empty() {
            self.snapshot.store(None);
            tracing::info!("chunk store is empty, lexical index cleared");
            return Ok(0);
        }

        let lexical = tokio::task::spawn_blocking(move || LexicalIndex::build(corpus))
            .await
            .map_err(|e| RetrievalError::IndexUnavailable(format!("index build aborted: {}", e)))??;
        let size = lexical.len();

        self.snapshot.store(Some(Arc::new(IndexSnapshot {
            lexical,
            built_at: Utc::now(),
        })));
        tracing::info!(chunks = size, "lexical index rebuilt");
        Ok(size)
    }

    /// Run one hybrid query.
    pub async fn retrieve(&self, query: &str, opts: &RetrieveOptions) -> Result<RetrieveResult> {
        let snapshot = self.snapshot.load_full().ok_or_else(|| {
            RetrievalError::IndexUnavailable("lexical index not built; ingest chunks first".to_string())
        })?;

        let lexical_branch = {
            let snapshot = Arc::clone(&snapshot);
            let query = query.to_string();
            let tenant = opts.tenant.clone();
            let k = opts.top_k_lexical;
            tokio::task::spawn_blocking(move || {
                snapshot
                    .lexical
                    .search(&query, k, tenant.as_ref())
                    .into_iter()
                    .filter_map(|hit| {
                        snapshot.lexical.chunk(hit.index).map(|chunk| RetrievalCandidate {
                            chunk: chunk.clone(),
                            score: hit.score,
                            origin: Origin::Lexical,
                        })
                    })
                    .collect::<Vec<_>>()
            })
        };
        let vector_branch = tokio::time::timeout(
            self.deadline,
            self.vector_candidates(&snapshot, query, opts),
        );

        let (lexical, vector) = tokio::join!(lexical_branch, vector_branch);
        let lexical = lexical
            .map_err(|e| RetrievalError::IndexUnavailable(format!("lexical search aborted: {}", e)))?;

        let mut warnings = Vec::new();
        let vector = match vector {
            Ok(VectorOutcome::Hits(hits)) => hits,
            Ok(VectorOutcome::Disabled) => Vec::new(),
            Ok(VectorOutcome::Degraded(w)) => {
                warnings.push(w);
                Vec::new()
            }
            Err(_) => {
                let deadline_ms = self.deadline.as_millis() as u64;
                tracing::warn!(deadline_ms, "vector search timed out, continuing lexical-only");
                warnings.push(Warning::VectorTimedOut { deadline_ms });
                Vec::new()
            }
        };

        let mut counts = StageCounts {
            lexical: lexical.len(),
            vector: vector.len(),
            vector_enabled: self.vector_enabled(),
            ..StageCounts::default()
        };

        let merged = merge_candidates(lexical, vector);
        let total_candidates = merged.len();
        counts.merged = total_candidates;

        let filtered = apply_filters(merged, &opts.filters);
        counts.filtered = filtered.len();

        let ranked = if opts.use_reranker {
            match &self.reranker {
                Some(reranker) => {
                    let had_candidates = !filtered.is_empty();
                    let (out, warning) = apply_rerank(reranker.as_ref(), query, filtered).await;
                    counts.reranked = had_candidates && warning.is_none();
                    warnings.extend(warning);
                    out
                }
                None => {
                    tracing::warn!("rerank requested but no reranker configured");
                    warnings.push(Warning::RerankUnavailable);
                    filtered
                }
            }
        } else {
            filtered
        };

        let chunks = truncate(ranked, opts.max_chunks_for_context);
        counts.returned = chunks.len();
        counts.mean_score = mean_score(&chunks);
        let abstention_reason = check_abstention(&chunks, opts.abstain_threshold);

        tracing::debug!(
            lexical = counts.lexical,
            vector = counts.vector,
            merged = counts.merged,
            filtered = counts.filtered,
            reranked = counts.reranked,
            returned = counts.returned,
            abstained = abstention_reason.is_some(),
            "retrieval complete"
        );

        Ok(RetrieveResult {
            chunks,
            total_candidates,
            abstained: abstention_reason.is_some(),
            abstention_reason,
            metadata: counts,
            warnings,
        })
    }

    async fn vector_candidates(
        &self,
        snapshot: &IndexSnapshot,
        query: &str,
        opts: &RetrieveOptions,
    ) -> VectorOutcome {
        let (Some(vector), Some(embedder)) = (&self.vector, &self.embedder) else {
            return VectorOutcome::Disabled;
        };

        let query_vec = match embed_query(embedder.as_ref(), query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, continuing lexical-only");
                return VectorOutcome::Degraded(Warning::EmbeddingFailed(e.to_string()));
            }
        };

        let search = VectorQuery {
            vector: &query_vec,
            k: opts.top_k_vector,
            tenant: opts.tenant.as_ref(),
            filters: &opts.filters,
        };
        let hits = match vector.search(&search).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(backend = vector.backend(), error = %e, "vector search failed, continuing lexical-only");
                return VectorOutcome::Degraded(Warning::VectorFailed(e.to_string()));
            }
        };

        // Hits for chunks missing from this snapshot are stale embeddings.
        let candidates = hits
            .into_iter()
            .filter_map(|hit| {
                let chunk = snapshot.lexical.get(&hit.chunk_id)?;
                let visible = opts.tenant.as_ref().map_or(true, |t| t.allows(chunk));
                visible.then(|| RetrievalCandidate {
                    chunk: chunk.clone(),
                    score: hit.similarity,
                    origin: Origin::Vector,
                })
            })
            .collect();
        VectorOutcome::Hits(candidates)
    }
}

/// Wire up the service described by `config` and build its first snapshot.
pub async fn build_service(config: &Config) -> anyhow::Result<RetrievalService> {
    let store = Arc::new(ChunkStore::new(&config.store.path));
    let mut service = RetrievalService::new(store)
        .with_deadline(Duration::from_millis(config.retrieval.deadline_ms));

    match config.vector.backend.as_str() {
        "memory" => {
            tracing::info!("using in-memory vector index; it starts empty on every run");
            service = service.with_vector(Arc::new(InMemoryVectorIndex::new()));
        }
        "sqlite" => {
            let db_path = config
                .vector
                .db_path
                .as_ref()
                .context("vector.db_path must be set for the sqlite backend")?;
            let index = SqliteVectorIndex::open(db_path, config.vector.min_similarity).await?;
            service = service.with_vector(Arc::new(index));
        }
        _ => {}
    }

    if config.embedding.is_enabled() {
        service = service.with_embedder(create_provider(&config.embedding)?);
    }
    if let Some(reranker) = create_reranker(&config.rerank)? {
        service = service.with_reranker(reranker);
    }

    service
        .rebuild()
        .await
        .context("Failed to build lexical index from chunk store")?;
    Ok(service)
}
