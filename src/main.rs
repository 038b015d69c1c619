//! # mealbot CLI
//!
//! The `mealbot` binary runs both halves of the application: the offline
//! indexing pipeline and the online chat server.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mealbot init` | Create the SQLite index schema |
//! | `mealbot ingest` | Load, chunk, embed, and index the configured documents |
//! | `mealbot search "<query>"` | Debug retrieval against the index |
//! | `mealbot serve` | Start the browser chat server |
//!
//! ## Examples
//!
//! ```bash
//! # Build the index from data/documents plus the configured URLs
//! mealbot ingest --config ./config/mealbot.toml
//!
//! # Check what a query retrieves
//! mealbot search "protein content of chicken"
//!
//! # Start chatting
//! mealbot serve
//! ```

mod chunk;
mod config;
mod db;
mod embedding;
mod error;
mod index;
mod ingest;
mod llm;
mod loader;
mod models;
mod rag;
mod search;
mod server;
mod session;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// mealbot — a retrieval-augmented chatbot for muscle-building nutrition.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/mealbot.example.toml` for a full example. The OpenAI
/// API key is read from the `OPENAI_API_KEY` environment variable (a local
/// `.env` file is honored).
#[derive(Parser)]
#[command(
    name = "mealbot",
    about = "A retrieval-augmented chatbot for muscle-building nutrition and meal advice",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mealbot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the index schema.
    ///
    /// Creates the SQLite file and all required tables (documents, chunks,
    /// chunk_vectors). Idempotent — running it multiple times is safe.
    Init,

    /// Load, chunk, embed, and index the configured documents.
    ///
    /// Reads the documents directory and URL list from config, splits each
    /// document into overlapping chunks, embeds them via the OpenAI
    /// embeddings API, and writes the index. Re-running refreshes changed
    /// documents in place. With nothing to ingest the index is left
    /// untouched.
    Ingest {
        /// Show document and chunk counts without embedding or writing.
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of documents to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Debug retrieval: embed a query and print the top index matches.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the browser chat server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// chat page plus the streaming chat API.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            index::ensure_schema(&pool).await?;
            pool.close().await;
            println!("Index initialized successfully.");
        }
        Commands::Ingest { dry_run, limit } => {
            ingest::run_ingest(&cfg, dry_run, limit).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
