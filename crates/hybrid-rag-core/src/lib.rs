//! # Hybrid RAG Core
//!
//! Runtime-agnostic logic for the hybrid retrieval engine: chunk models,
//! deterministic chunking, the BM25 lexical index, the vector index
//! abstraction with its in-memory backend, and the per-query retrieval
//! stages (merge, filter, rerank, truncate, abstain).
//!
//! This crate contains no tokio, sqlx, or filesystem I/O. Durable chunk
//! storage, the SQLite vector backend, HTTP model providers and the
//! concurrent query fan-out live in the `hybrid-rag` application crate.

pub mod chunk;
pub mod citation;
pub mod embedding;
pub mod error;
pub mod lexical;
pub mod models;
pub mod retrieve;
pub mod transcript;
pub mod vector;
