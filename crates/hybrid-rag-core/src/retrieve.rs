//! Per-query retrieval stages.
//!
//! The hybrid pipeline runs these stages in a fixed order:
//!
//! 1. **Fan-out** (app crate): lexical and vector search run concurrently.
//! 2. **Merge** ([`merge_candidates`]): union both lists; for duplicate
//!    chunk ids keep the higher-scoring entry; order by descending score.
//! 3. **Filter** ([`apply_filters`]): drop candidates failing any tag filter.
//! 4. **Rerank** ([`apply_rerank`], optional): replace scores with the
//!    reranker's and re-sort. On failure the pre-rerank order is kept.
//! 5. **Truncate** ([`truncate`]): keep `max_chunks_for_context`.
//! 6. **Abstain** ([`check_abstention`]): judged on the truncated set.
//!
//! Stages are pure apart from the reranker call, so the ordering contract
//! can be tested without a runtime.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::embedding::{RerankItem, Reranker};
use crate::models::{Chunk, TagFilters, TenantScope};

pub const DEFAULT_TOP_K_LEXICAL: usize = 20;
pub const DEFAULT_TOP_K_VECTOR: usize = 40;
pub const DEFAULT_MAX_CHUNKS_FOR_CONTEXT: usize = 15;
pub const DEFAULT_ABSTAIN_THRESHOLD: f64 = 0.3;

/// Which stage produced a candidate's current score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Lexical,
    Vector,
    Reranked,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Origin::Lexical => "lexical",
            Origin::Vector => "vector",
            Origin::Reranked => "reranked",
        })
    }
}

/// A scored chunk flowing through one query. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalCandidate {
    pub chunk: Chunk,
    pub score: f64,
    pub origin: Origin,
}

/// Recovered failures on the retrieval path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Warning {
    /// Query embedding failed; vector search skipped.
    EmbeddingFailed(String),
    /// Vector backend returned an error.
    VectorFailed(String),
    /// Vector branch exceeded the query deadline.
    VectorTimedOut { deadline_ms: u64 },
    /// Rerank requested but no reranker is configured.
    RerankUnavailable,
    /// Reranker failed or returned an unusable response.
    RerankFailed(String),
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::EmbeddingFailed(e) => write!(f, "query embedding failed: {}", e),
            Warning::VectorFailed(e) => write!(f, "vector search failed: {}", e),
            Warning::VectorTimedOut { deadline_ms } => {
                write!(f, "vector search exceeded {}ms deadline", deadline_ms)
            }
            Warning::RerankUnavailable => write!(f, "rerank requested but no reranker configured"),
            Warning::RerankFailed(e) => write!(f, "rerank failed: {}", e),
        }
    }
}

/// Options of a single retrieval request.
#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub filters: TagFilters,
    pub tenant: Option<TenantScope>,
    pub top_k_lexical: usize,
    pub top_k_vector: usize,
    pub max_chunks_for_context: usize,
    pub use_reranker: bool,
    pub abstain_threshold: f64,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            filters: TagFilters::default(),
            tenant: None,
            top_k_lexical: DEFAULT_TOP_K_LEXICAL,
            top_k_vector: DEFAULT_TOP_K_VECTOR,
            max_chunks_for_context: DEFAULT_MAX_CHUNKS_FOR_CONTEXT,
            use_reranker: false,
            abstain_threshold: DEFAULT_ABSTAIN_THRESHOLD,
        }
    }
}

/// Per-stage counts reported with every result.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageCounts {
    pub lexical: usize,
    pub vector: usize,
    pub vector_enabled: bool,
    pub merged: usize,
    pub filtered: usize,
    pub reranked: bool,
    pub returned: usize,
    pub mean_score: Option<f64>,
}

/// Outcome of one query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrieveResult {
    pub chunks: Vec<RetrievalCandidate>,
    /// Merged candidate count before tag filtering.
    pub total_candidates: usize,
    pub abstained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abstention_reason: Option<String>,
    pub metadata: StageCounts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// Union lexical and vector candidates, keeping the higher score per id.
///
/// An equal score keeps the entry seen first (lexical before vector).
/// The result is ordered by descending score; ties keep first-seen order.
pub fn merge_candidates(
    lexical: Vec<RetrievalCandidate>,
    vector: Vec<RetrievalCandidate>,
) -> Vec<RetrievalCandidate> {
    let mut merged: Vec<RetrievalCandidate> = Vec::with_capacity(lexical.len() + vector.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for cand in lexical.into_iter().chain(vector) {
        match seen.get(&cand.chunk.id) {
            Some(&pos) => {
                if cand.score > merged[pos].score {
                    merged[pos] = cand;
                }
            }
            None => {
                seen.insert(cand.chunk.id.clone(), merged.len());
                merged.push(cand);
            }
        }
    }

    sort_desc(&mut merged);
    merged
}

/// Keep candidates whose tags satisfy every requested filter.
pub fn apply_filters(
    candidates: Vec<RetrievalCandidate>,
    filters: &TagFilters,
) -> Vec<RetrievalCandidate> {
    if filters.is_empty() {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| filters.matches(&c.chunk))
        .collect()
}

/// Rescore `candidates` with `reranker`.
///
/// On success every candidate carries the reranker's score with origin
/// [`Origin::Reranked`], sorted descending. If the call fails, or the
/// response omits a candidate, the input is returned unchanged together
/// with a [`Warning::RerankFailed`].
pub async fn apply_rerank(
    reranker: &dyn Reranker,
    query: &str,
    candidates: Vec<RetrievalCandidate>,
) -> (Vec<RetrievalCandidate>, Option<Warning>) {
    if candidates.is_empty() {
        return (candidates, None);
    }

    let items: Vec<RerankItem> = candidates
        .iter()
        .map(|c| RerankItem {
            id: c.chunk.id.clone(),
            text: c.chunk.text.clone(),
        })
        .collect();

    let scores = match reranker.rerank(query, &items).await {
        Ok(scores) => scores,
        Err(e) => {
            tracing::warn!(reranker = reranker.name(), error = %e, "rerank failed, keeping pre-rerank order");
            return (candidates, Some(Warning::RerankFailed(e.to_string())));
        }
    };

    let by_id: HashMap<&str, f64> = scores.iter().map(|s| (s.id.as_str(), s.score)).collect();
    if let Some(missing) = candidates
        .iter()
        .find(|c| !by_id.contains_key(c.chunk.id.as_str()))
    {
        let detail = format!("response has no score for chunk {}", missing.chunk.id);
        tracing::warn!(reranker = reranker.name(), "{}, keeping pre-rerank order", detail);
        return (candidates, Some(Warning::RerankFailed(detail)));
    }

    let mut reranked: Vec<RetrievalCandidate> = candidates
        .into_iter()
        .map(|mut c| {
            c.score = by_id[c.chunk.id.as_str()];
            c.origin = Origin::Reranked;
            c
        })
        .collect();
    sort_desc(&mut reranked);
    (reranked, None)
}

pub fn truncate(mut candidates: Vec<RetrievalCandidate>, max: usize) -> Vec<RetrievalCandidate> {
    candidates.truncate(max);
    candidates
}

/// Arithmetic mean of candidate scores, `None` for an empty set.
pub fn mean_score(candidates: &[RetrievalCandidate]) -> Option<f64> {
    if candidates.is_empty() {
        return None;
    }
    let sum: f64 = candidates.iter().map(|c| c.score).sum();
    Some(sum / candidates.len() as f64)
}

/// Abstention reason for the final set, or `None` to answer.
///
/// A mean exactly at `threshold` does not abstain. A non-finite mean always
/// abstains.
pub fn check_abstention(candidates: &[RetrievalCandidate], threshold: f64) -> Option<String> {
    match mean_score(candidates) {
        None => Some("no chunks retrieved".to_string()),
        Some(mean) if !mean.is_finite() => {
            Some(format!("mean relevance score {} is not finite", mean))
        }
        Some(mean) if mean < threshold => Some(format!(
            "mean relevance score {} is below threshold {}",
            mean, threshold
        )),
        Some(_) => None,
    }
}

fn sort_desc(candidates: &mut [RetrievalCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
