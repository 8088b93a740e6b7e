//! HTTP reranker for Cohere/Jina-compatible `/rerank` endpoints.
//!
//! Request:
//!
//! ```json
//! {"model": "rerank-v1", "query": "…", "documents": ["…", "…"], "top_n": 2}
//! ```
//!
//! Response: `{"results": [{"index": 1, "relevance_score": 0.93}, …]}` where
//! `index` points into `documents`. A failed call is returned as an error;
//! the retrieval pipeline turns it into a warning and keeps its order.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use hybrid_rag_core::embedding::{RerankItem, RerankScore, Reranker};

use crate::config::RerankConfig;
use crate::embedding::http_client;

pub struct HttpReranker {
    url: String,
    model: Option<String>,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("rerank.url required for http reranker"))?;
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow::anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        Ok(Self {
            url,
            model: config.model.clone(),
            api_key,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn name(&self) -> &str {
        "http"
    }

    async fn rerank(&self, query: &str, items: &[RerankItem]) -> Result<Vec<RerankScore>> {
        let documents: Vec<&str> = items.iter().map(|i| i.text.as_str()).collect();
        let mut body = serde_json::json!({
            "query": query,
            "documents": documents,
            "top_n": items.len(),
        });
        if let Some(model) = &self.model {
            body["model"] = serde_json::Value::String(model.clone());
        }

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("rerank API error {}: {}", status, body_text);
        }
        let json: serde_json::Value = response.json().await?;
        parse_rerank_response(&json, items)
    }
}

/// `None` when reranking is disabled.
pub fn create_reranker(config: &RerankConfig) -> Result<Option<Arc<dyn Reranker>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "http" => Ok(Some(Arc::new(HttpReranker::new(config)?))),
        other => bail!("Unknown rerank provider: {}", other),
    }
}

fn parse_rerank_response(json: &serde_json::Value, items: &[RerankItem]) -> Result<Vec<RerankScore>> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing results array"))?;

    let mut scores = Vec::with_capacity(results.len());
    for r in results {
        let index = r
            .get("index")
            .and_then(|i| i.as_u64())
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing index"))?
            as usize;
        let score = r
            .get("relevance_score")
            .or_else(|| r.get("score"))
            .and_then(|s| s.as_f64())
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: missing relevance_score"))?;
        let item = items
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid rerank response: index {} out of range", index))?;
        scores.push(RerankScore {
            id: item.id.clone(),
            score,
        });
    }
    Ok(scores)
}
