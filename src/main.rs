//! # memex CLI
//!
//! ```bash
//! memex --config ./config/memex.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `memex init` | Create the SQLite database and schema |
//! | `memex sync` | Scan note documents and logs into the ledger |
//! | `memex search "<query>"` | Rank active chunks and render matches |
//! | `memex get <id>` | Show a chunk and its revision history |
//! | `memex embed pending` | Embed active heads that have no vector |
//! | `memex embed rebuild` | Drop and regenerate every vector |
//! | `memex stats` | Counts and vector/head consistency |

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use memex::config;
use memex::embed_cmd;
use memex::get;
use memex::ingest::{self, SyncScope};
use memex::migrate;
use memex::search::{self, SearchOverrides, SearchStyle};
use memex::stats;

/// memex: local knowledge ingestion with hybrid similarity/recency retrieval.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/memex.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "memex", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/memex.toml")]
    config: PathBuf,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest configured note documents and conversation logs.
    ///
    /// Takes the single-writer lock; if another sync holds it, prints
    /// `skipped` and exits successfully without touching the database.
    Sync {
        /// Run only one scanner: `documents` or `logs`.
        #[arg(long)]
        only: Option<String>,
    },

    /// Rank active chunks against a query.
    Search {
        /// Query text (multiple words are joined with spaces).
        #[arg(required = true)]
        query: Vec<String>,

        /// Number of results to keep.
        #[arg(long)]
        k: Option<usize>,

        /// Nearest-neighbour pool size before re-ranking.
        #[arg(long)]
        pool: Option<usize>,

        /// Weight of recency in the blended score, in [0, 1].
        #[arg(long = "w-time")]
        w_time: Option<f64>,

        /// Maximum sentences in the extractive summary.
        #[arg(long)]
        sentences: Option<usize>,

        /// Output style: `extractive` (salient sentences) or `basic`.
        #[arg(long, default_value = "extractive")]
        style: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Show a chunk and its revision history.
    Get {
        /// Revisioned id (`c_<digest>.r<n>`) or base id.
        id: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed active heads that have no vector yet.
    Pending {
        /// Maximum number of heads to embed.
        #[arg(long)]
        limit: Option<usize>,

        /// Only count the pending heads.
        #[arg(long)]
        dry_run: bool,
    },
    /// Drop all vectors and embed every active head again.
    Rebuild,
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { only } => {
            let scope = match only.as_deref() {
                None => SyncScope::All,
                Some("documents") => SyncScope::Documents,
                Some("logs") => SyncScope::Logs,
                Some(other) => bail!("Unknown scope: '{}'. Must be documents or logs.", other),
            };
            ingest::sync_cmd(&cfg, scope).await?;
        }
        Commands::Search {
            query,
            k,
            pool,
            w_time,
            sentences,
            style,
            json,
        } => {
            let style = SearchStyle::parse(&style)?;
            let overrides = SearchOverrides {
                top_k: k,
                pool_size: pool,
                time_weight: w_time,
                max_sentences: sentences,
            };
            search::search_cmd(&cfg, &query.join(" "), style, json, &overrides).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit, dry_run } => {
                embed_cmd::run_embed_pending(&cfg, limit, dry_run).await?;
            }
            EmbedAction::Rebuild => {
                embed_cmd::run_embed_rebuild(&cfg).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
