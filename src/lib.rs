//! # Hybrid RAG
//!
//! Crash-safe chunk storage and hybrid retrieval for retrieval-augmented
//! generation backends.
//!
//! Chunks live in an append-only JSONL file. Every mutation first copies the
//! file into a timestamped snapshot, then stages the new content in a temp
//! file that replaces the original with an atomic rename. Queries run a BM25
//! lexical search and a vector search concurrently, merge the candidates,
//! filter by tags, optionally rerank, and abstain when the evidence is weak.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌────────────────────┐
//! │  ingest  │──▶│ ChunkStore │──▶│ RetrievalService   │
//! │ (chunk)  │   │   JSONL    │   │ BM25 snapshot      │
//! └────┬─────┘   └────────────┘   │ + VectorIndex      │
//!      │ embed                    └─────────┬──────────┘
//!      ▼                                    ▼
//! ┌──────────────┐                 merge → filter → rerank
//! │ memory/sqlite│                 → truncate → abstain
//! │ VectorIndex  │
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | tracing subscriber setup |
//! | [`chunk_store`] | JSONL store, snapshots and restore |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Vector schema |
//! | [`sqlite_vector`] | SQLite vector backend |
//! | [`embedding`] | HTTP embedding providers |
//! | [`rerank`] | HTTP reranker |
//! | [`service`] | Query pipeline with deadline |
//! | [`ingest`] | File ingestion |
//! | [`embed_cmd`] | Batched embedding of pending chunks |
//! | [`stats`] | Store statistics |
//! | [`commands`] | CLI command bodies |

pub mod chunk_store;
pub mod commands;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod rerank;
pub mod service;
pub mod sqlite_vector;
pub mod stats;
