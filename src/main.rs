//! # Hybrid RAG CLI (`hrag`)
//!
//! The `hrag` binary drives the chunk store and the hybrid retrieval
//! pipeline from the command line.
//!
//! ## Usage
//!
//! ```bash
//! hrag --config ./config/hrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hrag init` | Create the store directory and, for the sqlite backend, the vector schema |
//! | `hrag ingest <path>` | Chunk a file and append new chunks to the store |
//! | `hrag query "<q>"` | Run hybrid retrieval (lexical + vector, optional rerank) |
//! | `hrag backups` | List timestamped store snapshots |
//! | `hrag restore` | Restore the store from `latest` or a given snapshot |
//! | `hrag dedup` | Drop repeated chunk ids, keeping the first |
//! | `hrag delete --source <s>` | Delete every chunk of one source |
//! | `hrag embed pending` | Embed chunks that have no vector for the configured model |
//! | `hrag stats` | Store and vector index counts |
//!
//! ## Examples
//!
//! ```bash
//! hrag ingest notes/meeting.md --project apollo --workspace w1
//! hrag ingest talk.txt --type youtube --url https://youtu.be/abc
//! hrag query "release checklist" --workspace w1 --project apollo
//! hrag restore --path ./data/backups/chunks-20260101-120000-000000.jsonl
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use hybrid_rag::commands::{self, IngestArgs, QueryArgs, SourceKind};
use hybrid_rag::{config, logging};
use hybrid_rag_core::models::TagFilters;

/// Hybrid RAG: crash-safe chunk storage with BM25 + vector retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/hrag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "hrag",
    about = "Crash-safe chunk storage and hybrid BM25 + vector retrieval",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prepare the store directory and vector schema. Safe to re-run.
    Init,

    /// Chunk a file and append its new chunks to the store.
    ///
    /// Chunks already stored (same id) are skipped, so re-ingesting an
    /// unchanged file writes nothing.
    Ingest {
        /// File to read.
        path: PathBuf,

        #[arg(long = "type", value_enum, default_value = "document")]
        kind: SourceKind,

        /// Video URL; required with `--type youtube`.
        #[arg(long)]
        url: Option<String>,

        #[arg(long = "user")]
        user_id: Option<String>,

        #[arg(long = "workspace")]
        workspace_id: Option<String>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        confidentiality: Option<String>,

        #[arg(long)]
        agent_hint: Option<String>,

        /// Heading or anchor used in citations.
        #[arg(long)]
        section: Option<String>,
    },

    /// Retrieve chunks for a query.
    Query {
        query: String,

        /// Only return chunks tagged `source_type:<v>`.
        #[arg(long)]
        source_type: Option<String>,

        #[arg(long)]
        confidentiality: Option<String>,

        #[arg(long)]
        agent_hint: Option<String>,

        #[arg(long)]
        project: Option<String>,

        /// Restrict to this user's chunks plus unowned ones.
        #[arg(long = "user")]
        user_id: Option<String>,

        /// Restrict to this workspace's chunks plus shared ones.
        #[arg(long = "workspace")]
        workspace_id: Option<String>,

        /// Rescore with the configured reranker.
        #[arg(long)]
        rerank: bool,

        /// Override `retrieval.max_chunks_for_context`.
        #[arg(long)]
        limit: Option<usize>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List store snapshots, oldest first.
    Backups,

    /// Replace the store with a snapshot (default: `latest`).
    Restore {
        #[arg(long)]
        path: Option<PathBuf>,

        /// Skip snapshotting the current store before restoring.
        #[arg(long)]
        no_pre_snapshot: bool,
    },

    /// Remove repeated chunk ids, keeping the first occurrence.
    Dedup,

    /// Delete every chunk whose source path or URL matches.
    Delete {
        #[arg(long)]
        source: String,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show store statistics.
    Stats,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed chunks that have no vector for the configured model.
    Pending {
        /// Maximum number of chunks to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Init => commands::cmd_init(&cfg).await?,
        Commands::Ingest {
            path,
            kind,
            url,
            user_id,
            workspace_id,
            project,
            confidentiality,
            agent_hint,
            section,
        } => {
            let args = IngestArgs {
                path,
                kind: Some(kind),
                url,
                user_id,
                workspace_id,
                project,
                confidentiality,
                agent_hint,
                section,
            };
            commands::cmd_ingest(&cfg, &args).await?;
        }
        Commands::Query {
            query,
            source_type,
            confidentiality,
            agent_hint,
            project,
            user_id,
            workspace_id,
            rerank,
            limit,
            json,
        } => {
            let args = QueryArgs {
                query,
                filters: TagFilters {
                    project,
                    source_type,
                    confidentiality,
                    agent_hint,
                },
                user_id,
                workspace_id,
                rerank,
                limit,
                json,
            };
            commands::cmd_query(&cfg, &args).await?;
        }
        Commands::Backups => commands::cmd_backups(&cfg).await?,
        Commands::Restore {
            path,
            no_pre_snapshot,
        } => commands::cmd_restore(&cfg, path, no_pre_snapshot).await?,
        Commands::Dedup => commands::cmd_dedup(&cfg).await?,
        Commands::Delete { source } => commands::cmd_delete(&cfg, &source).await?,
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, batch_size } => {
                commands::cmd_embed_pending(&cfg, limit, batch_size).await?;
            }
        },
        Commands::Stats => commands::cmd_stats(&cfg).await?,
    }

    Ok(())
}
