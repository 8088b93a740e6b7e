//! Model capability traits and vector utilities.
//!
//! Defines the [`Embedder`] and [`Reranker`] capabilities the retrieval
//! pipeline consumes, plus pure helpers for vector serialization and
//! similarity computation.
//!
//! Concrete HTTP-backed implementations (OpenAI, Ollama, `/rerank`
//! endpoints) live in the `hybrid-rag` app crate. Both capabilities are
//! network operations that can fail independently of retrieval logic.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Produces embedding vectors for texts.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// One candidate sent to a reranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankItem {
    pub id: String,
    pub text: String,
}

/// Reranker output for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankScore {
    pub id: String,
    pub score: f64,
}

/// Secondary scoring pass over an already-retrieved candidate set.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;
    async fn rerank(&self, query: &str, items: &[RerankItem]) -> Result<Vec<RerankScore>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use hybrid_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity `dot(a, b) / (|a| * |b|)`, clamped to `[-1.0, 1.0]`.
///
/// Defined as `0.0` when either vector has zero magnitude, when the
/// vectors are empty, or when their dimensionality differs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    // f64 sums: squared f32 components overflow long before the inputs do.
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if !sim.is_finite() {
        return 0.0;
    }
    sim.clamp(-1.0, 1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let sim = cosine_similarity(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[3.0, 4.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_large_and_tiny_magnitudes() {
        let big = [3e19f32, 4e19];
        assert!((cosine_similarity(&big, &big) - 1.0).abs() < 1e-6);
        let tiny = [1e-4f32, 0.0];
        assert!((cosine_similarity(&tiny, &tiny) - 1.0).abs() < 1e-6);
        let sim = cosine_similarity(&[f32::MAX, f32::MAX], &[-f32::MAX, f32::MAX]);
        assert!(sim.is_finite() && (-1.0..=1.0).contains(&sim));
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_bounds() {
        let vectors: Vec<Vec<f32>> = vec![
            vec![1e-3, 7.0, -2.0],
            vec![-5.5, 0.25, 9.0],
            vec![1e6, -1e6, 3.0],
            vec![0.1, 0.1, 0.1],
        ];
        for a in &vectors {
            for b in &vectors {
                let sim = cosine_similarity(a, b);
                assert!((-1.0..=1.0).contains(&sim), "out of range: {}", sim);
            }
        }
    }
}
