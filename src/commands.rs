//! CLI command bodies. Each prints a short human-readable report on stdout;
//! logs go to stderr.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use hybrid_rag_core::chunk::ChunkOptions;
use hybrid_rag_core::citation::format_citation;
use hybrid_rag_core::models::{Chunk, Source, TagFilters, TenantScope};
use hybrid_rag_core::retrieve::{Origin, RetrieveResult, StageCounts, Warning};

use crate::chunk_store::{ChunkStore, RestoreOptions};
use crate::config::Config;
use crate::embed_cmd::run_embed_pending;
use crate::ingest::ingest_file;
use crate::service::build_service;
use crate::sqlite_vector::SqliteVectorIndex;
use crate::stats::run_stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    Document,
    Transcript,
    Youtube,
}

#[derive(Debug, Clone, Default)]
pub struct IngestArgs {
    pub path: PathBuf,
    pub kind: Option<SourceKind>,
    pub url: Option<String>,
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub project: Option<String>,
    pub confidentiality: Option<String>,
    pub agent_hint: Option<String>,
    pub section: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub query: String,
    pub filters: TagFilters,
    pub user_id: Option<String>,
    pub workspace_id: Option<String>,
    pub rerank: bool,
    pub limit: Option<usize>,
    pub json: bool,
}

pub async fn cmd_init(config: &Config) -> Result<()> {
    let store = ChunkStore::new(&config.store.path);
    if let Some(parent) = store.path().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    println!("init");
    println!("  store: {}", store.path().display());
    println!("  backups: {}", store.backup_dir().display());

    if config.vector.backend == "sqlite" {
        let db_path = config
            .vector
            .db_path
            .as_ref()
            .context("vector.db_path must be set for the sqlite backend")?;
        let index = SqliteVectorIndex::open(db_path, config.vector.min_similarity).await?;
        index.pool().close().await;
        println!("  vector db: {}", db_path.display());
    }
    println!("ok");
    Ok(())
}

fn source_for(args: &IngestArgs) -> Result<Source> {
    let path = args.path.display().to_string();
    Ok(match args.kind.unwrap_or(SourceKind::Document) {
        SourceKind::Document => Source::Document { path },
        SourceKind::Transcript => Source::Transcript { path },
        SourceKind::Youtube => match &args.url {
            Some(url) => Source::Youtube { url: url.clone() },
            None => bail!("--url is required for youtube sources"),
        },
    })
}

pub async fn cmd_ingest(config: &Config, args: &IngestArgs) -> Result<()> {
    let source = source_for(args)?;
    let opts = ChunkOptions {
        max_tokens: config.chunking.max_tokens,
        language: config.chunking.language.clone(),
        user_id: args.user_id.clone(),
        workspace_id: args.workspace_id.clone(),
        section: args.section.clone(),
        project: args.project.clone(),
        confidentiality: args.confidentiality.clone(),
        agent_hint: args.agent_hint.clone(),
    };

    let service = build_service(config).await?;
    let report = ingest_file(
        &service,
        &args.path,
        source.clone(),
        &opts,
        config.embedding.batch_size,
    )
    .await?;

    println!("ingest {}", source.locator());
    println!("  chunks produced: {}", report.produced);
    println!("  appended: {}", report.appended);
    println!("  already stored: {}", report.already_stored);
    if let Some(backup) = &report.backup {
        println!("  backup: {}", backup.display());
    }
    if let Some(embed) = &report.embedding {
        println!("  embedded: {}", embed.embedded);
        if embed.failed > 0 {
            println!("  embedding failed: {}", embed.failed);
        }
    }
    println!("  corpus size: {}", report.corpus_size);
    println!("ok");
    Ok(())
}

#[derive(Serialize)]
struct JsonHit<'a> {
    citation: String,
    score: f64,
    origin: Origin,
    chunk: &'a Chunk,
}

#[derive(Serialize)]
struct JsonResponse<'a> {
    query: &'a str,
    total_candidates: usize,
    abstained: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    abstention_reason: Option<&'a str>,
    metadata: &'a StageCounts,
    warnings: &'a [Warning],
    chunks: Vec<JsonHit<'a>>,
}

fn to_json(query: &str, result: &RetrieveResult) -> Result<String> {
    let response = JsonResponse {
        query,
        total_candidates: result.total_candidates,
        abstained: result.abstained,
        abstention_reason: result.abstention_reason.as_deref(),
        metadata: &result.metadata,
        warnings: &result.warnings,
        chunks: result
            .chunks
            .iter()
            .map(|c| JsonHit {
                citation: format_citation(&c.chunk),
                score: c.score,
                origin: c.origin,
                chunk: &c.chunk,
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&response)?)
}

pub async fn cmd_query(config: &Config, args: &QueryArgs) -> Result<()> {
    let service = build_service(config).await?;

    let mut opts = config.retrieval.options();
    opts.filters = args.filters.clone();
    if args.user_id.is_some() || args.workspace_id.is_some() {
        opts.tenant = Some(TenantScope {
            user_id: args.user_id.clone(),
            workspace_id: args.workspace_id.clone(),
        });
    }
    opts.use_reranker |= args.rerank;
    if let Some(limit) = args.limit {
        opts.max_chunks_for_context = limit.max(1);
    }

    let result = service.retrieve(&args.query, &opts).await?;

    if args.json {
        println!("{}", to_json(&args.query, &result)?);
        return Ok(());
    }

    println!("query \"{}\"", args.query);
    println!(
        "  candidates: {}  returned: {}",
        result.total_candidates,
        result.chunks.len()
    );
    for warning in &result.warnings {
        println!("  warning: {}", warning);
    }
    if let Some(reason) = &result.abstention_reason {
        println!("  abstained: {}", reason);
    }
    println!();

    if result.chunks.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, c) in result.chunks.iter().enumerate() {
        println!(
            "{}. [{:.3} {}] {}",
            i + 1,
            c.score,
            c.origin,
            format_citation(&c.chunk)
        );
        let excerpt: String = c.chunk.text.chars().take(240).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", c.chunk.id);
        println!();
    }
    Ok(())
}

pub async fn cmd_backups(config: &Config) -> Result<()> {
    let store = ChunkStore::new(&config.store.path);
    let backups = store.list_backups().await?;

    println!("backups in {}", store.backup_dir().display());
    if backups.is_empty() {
        println!("  none");
        return Ok(());
    }
    for path in &backups {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        println!("  {}  ({} bytes)", file_name(path), size);
    }
    println!("  latest: {}", store.latest_backup_path().display());
    Ok(())
}

pub async fn cmd_restore(config: &Config, path: Option<PathBuf>, no_pre_snapshot: bool) -> Result<()> {
    let store = ChunkStore::new(&config.store.path);
    let result = store
        .restore_with(
            path,
            RestoreOptions {
                pre_snapshot: !no_pre_snapshot,
            },
        )
        .await?;

    println!("restore");
    println!("  from: {}", result.restored_from.display());
    match &result.pre_restore_backup {
        Some(p) => println!("  pre-restore backup: {}", p.display()),
        None => println!("  pre-restore backup: skipped"),
    }
    println!("ok");
    Ok(())
}

pub async fn cmd_dedup(config: &Config) -> Result<()> {
    let store = ChunkStore::new(&config.store.path);
    let result = store.dedup().await?;

    println!("dedup");
    println!("  kept: {}", result.kept);
    println!("  removed duplicates: {}", result.deleted);
    if result.malformed_preserved > 0 {
        println!("  malformed lines preserved: {}", result.malformed_preserved);
    }
    if let Some(b) = &result.backup {
        println!("  backup: {}", b.display());
    }
    println!("ok");
    Ok(())
}

/// Delete every chunk whose source path or URL equals `source`, and drop
/// their embeddings.
pub async fn cmd_delete(config: &Config, source: &str) -> Result<()> {
    let service = build_service(config).await?;
    let store = service.store();

    let ids: Vec<String> = store
        .load_all()
        .await?
        .into_iter()
        .filter(|c| c.source.locator() == source)
        .map(|c| c.id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if ids.is_empty() {
        println!("delete {}", source);
        println!("  no matching chunks");
        return Ok(());
    }

    let target = source.to_string();
    let result = store
        .delete_where(move |c| c.source.locator() == target)
        .await?;
    let unembedded = match service.vector() {
        Some(v) => Some(v.remove(&ids).await?),
        None => None,
    };

    println!("delete {}", source);
    println!("  deleted: {}", result.deleted);
    println!("  kept: {}", result.kept);
    if let Some(n) = unembedded {
        println!("  embeddings removed: {}", n);
    }
    if let Some(b) = &result.backup {
        println!("  backup: {}", b.display());
    }
    println!("ok");
    Ok(())
}

pub async fn cmd_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size: Option<usize>,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    if config.vector.backend == "memory" {
        eprintln!("Warning: the memory vector backend is discarded when this command exits");
    }

    let service = build_service(config).await?;
    let report = run_embed_pending(
        &service,
        batch_size.unwrap_or(config.embedding.batch_size),
        limit,
    )
    .await?;

    println!("embed pending");
    if report.pending == 0 {
        println!("  all chunks up to date");
        return Ok(());
    }
    println!("  total pending: {}", report.pending);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    Ok(())
}

pub async fn cmd_stats(config: &Config) -> Result<()> {
    let service = build_service(config).await?;
    run_stats(&service).await
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_rag_core::models::ChunkMetadata;
    use hybrid_rag_core::retrieve::RetrievalCandidate;

    #[test]
    fn test_youtube_requires_url() {
        let args = IngestArgs {
            path: PathBuf::from("talk.txt"),
            kind: Some(SourceKind::Youtube),
            ..IngestArgs::default()
        };
        assert!(source_for(&args).is_err());

        let args = IngestArgs {
            url: Some("https://youtu.be/abc".to_string()),
            ..args
        };
        assert_eq!(
            source_for(&args).unwrap(),
            Source::Youtube {
                url: "https://youtu.be/abc".to_string()
            }
        );
    }

    #[test]
    fn test_default_kind_is_document() {
        let args = IngestArgs {
            path: PathBuf::from("docs/a.md"),
            ..IngestArgs::default()
        };
        assert_eq!(
            source_for(&args).unwrap(),
            Source::Document {
                path: "docs/a.md".to_string()
            }
        );
    }

    #[test]
    fn test_json_output_carries_citations() {
        let chunk = Chunk {
            id: "c1".to_string(),
            source: Source::Youtube {
                url: "https://youtu.be/abc".to_string(),
            },
            text: "hello".to_string(),
            metadata: ChunkMetadata {
                language: "en".to_string(),
                chunk_index: 0,
                chunk_count: 1,
                start_sec: Some(42.7),
                end_sec: None,
                start_offset: None,
                end_offset: None,
                created_at: "2026-01-01T00:00:00Z".to_string(),
                section: None,
                project: None,
                confidentiality: None,
                agent_hint: None,
            },
            user_id: None,
            workspace_id: None,
        };
        let result = RetrieveResult {
            chunks: vec![RetrievalCandidate {
                chunk,
                score: 0.9,
                origin: Origin::Vector,
            }],
            total_candidates: 1,
            abstained: false,
            abstention_reason: None,
            metadata: StageCounts::default(),
            warnings: vec![Warning::RerankUnavailable],
        };

        let json: serde_json::Value = serde_json::from_str(&to_json("hi", &result).unwrap()).unwrap();
        assert_eq!(json["chunks"][0]["citation"], "https://youtu.be/abc?t=42");
        assert_eq!(json["chunks"][0]["origin"], "vector");
        assert_eq!(json["warnings"][0]["kind"], "rerank_unavailable");
        assert!(json.get("abstention_reason").is_none());
    }
}
