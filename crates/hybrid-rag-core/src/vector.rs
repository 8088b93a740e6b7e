//! Vector similarity index abstraction and the in-memory backend.
//!
//! The [`VectorIndex`] trait is the single contract both backends honor:
//! the in-memory [`InMemoryVectorIndex`] here and the SQLite-backed index in
//! the app crate. Vector indexes are derived caches. They hold no authority
//! over chunk identity and can be dropped and re-embedded from the store.
//!
//! Insertion is idempotent per chunk: upserting an embedding for a chunk
//! that already has one replaces its vector, model and tenant markers.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{Result, RetrievalError};
use crate::models::{Chunk, Embedding, TagFilters, TenantScope};

/// An embedding together with the chunk attributes needed for filtering.
#[derive(Debug, Clone)]
pub struct IndexedEmbedding {
    pub embedding: Embedding,
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub tags: Vec<String>,
}

impl IndexedEmbedding {
    pub fn for_chunk(chunk: &Chunk, vector: Vec<f32>, model_id: &str) -> Self {
        Self {
            embedding: Embedding {
                chunk_id: chunk.id.clone(),
                vector,
                model_id: model_id.to_string(),
                created_at: chrono::Utc::now(),
            },
            user_id: chunk.user_id.clone(),
            workspace_id: chunk.workspace_id.clone(),
            tags: chunk.tags(),
        }
    }
}

/// Inputs of one similarity search.
#[derive(Debug, Clone)]
pub struct VectorQuery<'a> {
    pub vector: &'a [f32],
    pub k: usize,
    pub tenant: Option<&'a TenantScope>,
    pub filters: &'a TagFilters,
}

/// A vector match.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub similarity: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend name for logs (`"memory"`, `"sqlite"`).
    fn backend(&self) -> &'static str;

    /// Insert or replace embeddings. Returns the number written.
    async fn upsert(&self, items: Vec<IndexedEmbedding>) -> Result<usize>;

    /// Top-`k` chunks by descending cosine similarity.
    async fn search(&self, query: &VectorQuery<'_>) -> Result<Vec<VectorHit>>;

    /// Drop the embeddings of the given chunks. Returns the number removed.
    async fn remove(&self, chunk_ids: &[String]) -> Result<usize>;

    /// Ids of chunks that already have an embedding from `model_id`.
    async fn embedded_ids(&self, model_id: &str) -> Result<HashSet<String>>;

    async fn count(&self) -> Result<usize>;
}

/// Sort by similarity (desc), then chunk id (asc), and keep `k`.
pub fn rank_hits(mut hits: Vec<VectorHit>, k: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(k);
    hits
}

/// Brute-force in-memory backend: a map from chunk id to vector.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, IndexedEmbedding>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> RetrievalError {
    RetrievalError::VectorBackend("in-memory vector index lock poisoned".to_string())
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, items: Vec<IndexedEmbedding>) -> Result<usize> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let n = items.len();
        for item in items {
            entries.insert(item.embedding.chunk_id.clone(), item);
        }
        Ok(n)
    }

    async fn search(&self, query: &VectorQuery<'_>) -> Result<Vec<VectorHit>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let hits = entries
            .values()
            .filter(|e| {
                query.tenant.map_or(true, |t| {
                    t.allows_markers(e.user_id.as_deref(), e.workspace_id.as_deref())
                })
            })
            .filter(|e| query.filters.matches_tags(&e.tags))
            .map(|e| VectorHit {
                chunk_id: e.embedding.chunk_id.clone(),
                similarity: cosine_similarity(query.vector, &e.embedding.vector) as f64,
            })
            .collect();
        Ok(rank_hits(hits, query.k))
    }

    async fn remove(&self, chunk_ids: &[String]) -> Result<usize> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(chunk_ids
            .iter()
            .filter(|id| entries.remove(id.as_str()).is_some())
            .count())
    }

    async fn embedded_ids(&self, model_id: &str) -> Result<HashSet<String>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .values()
            .filter(|e| e.embedding.model_id == model_id)
            .map(|e| e.embedding.chunk_id.clone())
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().map_err(|_| poisoned())?.len())
    }
}
