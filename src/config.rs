//! TOML configuration.
//!
//! Only `[store]` is required; every other section falls back to the
//! defaults below. [`load_config`] validates the combination before any
//! command touches the store.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use hybrid_rag_core::retrieve::{
    RetrieveOptions, DEFAULT_ABSTAIN_THRESHOLD, DEFAULT_MAX_CHUNKS_FOR_CONTEXT,
    DEFAULT_TOP_K_LEXICAL, DEFAULT_TOP_K_VECTOR,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// JSONL chunk store file.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            language: default_language(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}
fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k_lexical")]
    pub top_k_lexical: usize,
    #[serde(default = "default_top_k_vector")]
    pub top_k_vector: usize,
    #[serde(default = "default_max_chunks")]
    pub max_chunks_for_context: usize,
    #[serde(default = "default_abstain_threshold")]
    pub abstain_threshold: f64,
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default)]
    pub use_reranker: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_lexical: default_top_k_lexical(),
            top_k_vector: default_top_k_vector(),
            max_chunks_for_context: default_max_chunks(),
            abstain_threshold: default_abstain_threshold(),
            deadline_ms: default_deadline_ms(),
            use_reranker: false,
        }
    }
}

impl RetrievalConfig {
    /// Request options seeded from config; callers layer filters on top.
    pub fn options(&self) -> RetrieveOptions {
        RetrieveOptions {
            top_k_lexical: self.top_k_lexical,
            top_k_vector: self.top_k_vector,
            max_chunks_for_context: self.max_chunks_for_context,
            use_reranker: self.use_reranker,
            abstain_threshold: self.abstain_threshold,
            ..RetrieveOptions::default()
        }
    }
}

fn default_top_k_lexical() -> usize {
    DEFAULT_TOP_K_LEXICAL
}
fn default_top_k_vector() -> usize {
    DEFAULT_TOP_K_VECTOR
}
fn default_max_chunks() -> usize {
    DEFAULT_MAX_CHUNKS_FOR_CONTEXT
}
fn default_abstain_threshold() -> f64 {
    DEFAULT_ABSTAIN_THRESHOLD
}
fn default_deadline_ms() -> u64 {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    /// `"disabled"`, `"memory"` or `"sqlite"`.
    #[serde(default = "default_vector_backend")]
    pub backend: String,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Relational backend only: hits below this cosine similarity are dropped.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            db_path: None,
            min_similarity: default_min_similarity(),
        }
    }
}

impl VectorConfig {
    pub fn is_enabled(&self) -> bool {
        self.backend != "disabled"
    }
}

fn default_vector_backend() -> String {
    "disabled".to_string()
}
fn default_min_similarity() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// `"disabled"` or `"http"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding a bearer token, if the endpoint needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_rerank_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            model: None,
            api_key_env: None,
            timeout_secs: default_rerank_timeout_secs(),
        }
    }
}

impl RerankConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_rerank_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Config with only a store path; everything else defaulted.
    pub fn with_store(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig { path: path.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            vector: VectorConfig::default(),
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    let r = &config.retrieval;
    if r.top_k_lexical == 0 || r.top_k_vector == 0 {
        bail!("retrieval.top_k_lexical and retrieval.top_k_vector must be >= 1");
    }
    if r.max_chunks_for_context == 0 {
        bail!("retrieval.max_chunks_for_context must be >= 1");
    }
    if !r.abstain_threshold.is_finite() {
        bail!("retrieval.abstain_threshold must be a finite number");
    }
    if r.deadline_ms == 0 {
        bail!("retrieval.deadline_ms must be > 0");
    }

    match config.vector.backend.as_str() {
        "disabled" | "memory" => {}
        "sqlite" => {
            if config.vector.db_path.is_none() {
                bail!("vector.db_path must be set when vector.backend = 'sqlite'");
            }
        }
        other => bail!(
            "Unknown vector backend: '{}'. Must be disabled, memory, or sqlite.",
            other
        ),
    }
    if !(-1.0..=1.0).contains(&config.vector.min_similarity) {
        bail!("vector.min_similarity must be in [-1.0, 1.0]");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.rerank.provider.as_str() {
        "disabled" => {}
        "http" => {
            if config.rerank.url.is_none() {
                bail!("rerank.url must be set when rerank.provider = 'http'");
            }
        }
        other => bail!(
            "Unknown rerank provider: '{}'. Must be disabled or http.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse("[store]\npath = \"data/out/chunks.jsonl\"\n").unwrap();
        assert_eq!(config.retrieval.top_k_lexical, 20);
        assert_eq!(config.retrieval.top_k_vector, 40);
        assert_eq!(config.retrieval.max_chunks_for_context, 15);
        assert!((config.retrieval.abstain_threshold - 0.3).abs() < 1e-12);
        assert!(!config.vector.is_enabled());
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sqlite_backend_requires_db_path() {
        let err = parse("[store]\npath = \"c.jsonl\"\n[vector]\nbackend = \"sqlite\"\n")
            .unwrap_err()
            .to_string();
        assert!(err.contains("db_path"));
    }

    #[test]
    fn test_embedding_requires_model_and_dims() {
        let err = parse("[store]\npath = \"c.jsonl\"\n[embedding]\nprovider = \"openai\"\n")
            .unwrap_err()
            .to_string();
        assert!(err.contains("dims"));
    }

    #[test]
    fn test_unknown_rerank_provider() {
        assert!(parse("[store]\npath = \"c.jsonl\"\n[rerank]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_options_from_config() {
        let config = parse(
            "[store]\npath = \"c.jsonl\"\n[retrieval]\ntop_k_lexical = 5\nuse_reranker = true\n",
        )
        .unwrap();
        let opts = config.retrieval.options();
        assert_eq!(opts.top_k_lexical, 5);
        assert!(opts.use_reranker);
        assert!(opts.filters.is_empty());
    }
}
