//! Core data models for the chunk store and the retrieval pipeline.
//!
//! A [`Chunk`] serializes to exactly one line of the JSONL chunk store:
//!
//! ```json
//! {"id":"…","source":{"type":"document","path":"docs/a.md"},"content":"…",
//!  "metadata":{"language":"en","chunk_index":0,"chunk_count":3,"created_at":"…"},
//!  "workspace_id":"w1"}
//! ```
//!
//! Tenant markers (`user_id`, `workspace_id`) are optional; a chunk without
//! them is shared and visible to every tenant scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Provenance of a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Source {
    Document { path: String },
    Transcript { path: String },
    Youtube { url: String },
}

impl Source {
    /// The `source_type` tag value.
    pub fn source_type(&self) -> &'static str {
        match self {
            Source::Document { .. } => "document",
            Source::Transcript { .. } => "transcript",
            Source::Youtube { .. } => "youtube",
        }
    }

    /// Path or URL identifying the source.
    pub fn locator(&self) -> &str {
        match self {
            Source::Document { path } | Source::Transcript { path } => path,
            Source::Youtube { url } => url,
        }
    }
}

/// Per-chunk metadata as persisted in the `metadata` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub language: String,
    pub chunk_index: u32,
    pub chunk_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<u64>,
    pub created_at: String,
    /// Heading or anchor within a path-based source, used for citations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidentiality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_hint: Option<String>,
}

/// The atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: Source,
    #[serde(rename = "content")]
    pub text: String,
    pub metadata: ChunkMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
}

impl Chunk {
    /// Derived filter tags, sorted.
    ///
    /// Always contains `source_type:<type>` and `language:<lang>`; the
    /// `project:`, `confidentiality:` and `agent_hint:` tags appear only when
    /// the corresponding metadata field is set.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = vec![
            format!("source_type:{}", self.source.source_type()),
            format!("language:{}", self.metadata.language),
        ];
        let optional = [
            ("project", &self.metadata.project),
            ("confidentiality", &self.metadata.confidentiality),
            ("agent_hint", &self.metadata.agent_hint),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                tags.push(format!("{}:{}", key, v));
            }
        }
        tags.sort();
        tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().iter().any(|t| t == tag)
    }
}

/// Derive the stable chunk id for a `(text, source, ordinal)` triple.
///
/// Re-ingesting identical input yields the same id; any change to the text,
/// the source variant, its locator, or the ordinal yields a different one.
/// The result is the first 32 hex digits of a SHA-256 digest.
pub fn chunk_id(text: &str, source: &Source, ordinal: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.source_type().as_bytes());
    hasher.update([0u8]);
    hasher.update(source.locator().as_bytes());
    hasher.update([0u8]);
    hasher.update(ordinal.to_le_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// A stored embedding, one per chunk per model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

/// Tenant restriction applied to a query.
///
/// Each requested dimension admits chunks that either match it or carry no
/// marker for it. An unrequested dimension admits everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantScope {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
}

impl TenantScope {
    pub fn workspace(workspace_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            workspace_id: Some(workspace_id.into()),
        }
    }

    pub fn allows(&self, chunk: &Chunk) -> bool {
        self.allows_markers(chunk.user_id.as_deref(), chunk.workspace_id.as_deref())
    }

    /// Same check as [`allows`](Self::allows) for backends that only keep
    /// the markers, not the whole chunk.
    pub fn allows_markers(&self, user_id: Option<&str>, workspace_id: Option<&str>) -> bool {
        fn admits(requested: Option<&str>, marker: Option<&str>) -> bool {
            match (requested, marker) {
                (Some(want), Some(have)) => want == have,
                _ => true,
            }
        }
        admits(self.workspace_id.as_deref(), workspace_id)
            && admits(self.user_id.as_deref(), user_id)
    }
}

/// Tag filters for a query. All present filters are AND-ed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilters {
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub confidentiality: Option<String>,
    #[serde(default)]
    pub agent_hint: Option<String>,
}

impl TagFilters {
    /// The `<key>:<value>` tags a chunk must carry to pass.
    pub fn required_tags(&self) -> Vec<String> {
        [
            ("project", &self.project),
            ("source_type", &self.source_type),
            ("confidentiality", &self.confidentiality),
            ("agent_hint", &self.agent_hint),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{}:{}", key, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.required_tags().is_empty()
    }

    pub fn matches_tags(&self, tags: &[String]) -> bool {
        self.required_tags().iter().all(|req| tags.contains(req))
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.is_empty() || self.matches_tags(&chunk.tags())
    }
}
