//! # talkdb CLI (`tdb`)
//!
//! The `tdb` binary is the primary interface for talkdb. It provides
//! commands for configuration scaffolding, schema refresh, retrieval
//! inspection, asking questions, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! tdb --config ./talkdb.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tdb init` | Write a default configuration file |
//! | `tdb refresh` | Introspect the target schema and rebuild the embedding index |
//! | `tdb search "<question>"` | Show the schema context a question would retrieve |
//! | `tdb ask "<question>"` | Answer a question: retrieve, generate SQL, execute, summarize |
//! | `tdb status` | Show the schema document and active index generation |
//! | `tdb serve` | Start the HTTP API server |
//!
//! ## Examples
//!
//! ```bash
//! # Scaffold a config, then point [target].url at your database
//! tdb init --config ./talkdb.toml
//!
//! # Build the schema index (requires the embedding API key)
//! tdb refresh --config ./talkdb.toml
//!
//! # Peek at retrieval without spending generation tokens
//! tdb search "monthly revenue by region" --config ./talkdb.toml
//!
//! # Ask for real
//! tdb ask "which products sold best last quarter?" --config ./talkdb.toml
//!
//! # Machine-readable output for scripting
//! tdb ask "how many customers signed up this week?" --json
//!
//! # Serve the API for the web frontend
//! tdb serve --config ./talkdb.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use talkdb::progress::ProgressMode;
use talkdb::{config, pipeline, retrieve, schema_store, server, status};

/// talkdb CLI — ask questions of a relational database in plain language.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Run `tdb init` to scaffold one.
#[derive(Parser)]
#[command(
    name = "tdb",
    about = "talkdb — a natural-language SQL assistant for your database",
    version,
    long_about = "talkdb introspects a relational database, indexes its tables and columns as \
    embeddings, and answers natural-language questions by retrieving the nearest schema context, \
    generating SQL with a language model, executing it, and repairing failed queries automatically."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `~/.talkdb/config.toml`. Target, embedding, generation,
    /// retrieval, and server settings are read from this file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file.
    ///
    /// Creates the config at the `--config` path (or the default location)
    /// with commented defaults. Refuses to overwrite an existing file.
    /// Edit `[target].url` afterwards, then run `tdb refresh`.
    Init,

    /// Introspect the target schema and rebuild the embedding index.
    ///
    /// Reads table and column names from the target database, embeds them,
    /// and atomically replaces the previous index generation and schema
    /// document. The old index stays live until the new one is complete, so
    /// a failed refresh never leaves questions without grounding.
    Refresh {
        /// Progress reporting: `human`, `json` (one event per line on
        /// stderr), or `off`. Defaults to `human` on a TTY, `off` otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show the schema context a question would retrieve.
    ///
    /// Embeds the question and prints the nearest table and column entries
    /// with their distances. No generation tokens are spent.
    Search {
        /// The question to retrieve context for.
        question: String,

        /// Only show table matches.
        #[arg(long)]
        tables_only: bool,

        /// Only show column matches.
        #[arg(long)]
        columns_only: bool,
    },

    /// Answer a question end to end.
    ///
    /// Retrieves schema context, generates SQL, executes it against the
    /// target (repairing failed queries up to the attempt cap), and prints
    /// the SQL, result table, and an insight summary.
    Ask {
        /// The question, in plain language.
        question: String,

        /// Skip the insight summary stage.
        #[arg(long)]
        no_insights: bool,

        /// Print the full response as JSON instead of formatted text.
        #[arg(long)]
        json: bool,
    },

    /// Show the schema document and active index generation.
    ///
    /// Prints table/column counts, index entry counts, the embedding model
    /// and dimensions, and when the index was last rebuilt.
    Status,

    /// Start the HTTP API server.
    ///
    /// Binds to `[server].bind` and exposes /health, /schema, /refresh, and
    /// the SSE /query endpoint for browser frontends.
    Serve,
}

/// `~/.talkdb/config.toml`, or a file in the working directory when no home
/// directory is available.
fn default_config_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".talkdb").join("config.toml"),
        None => PathBuf::from("talkdb.toml"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    // init runs before config loading: it writes the config.
    if let Commands::Init = cli.command {
        config::write_default_config(&config_path)?;
        println!("Wrote {}", config_path.display());
        println!("Edit [target].url, then run `tdb refresh`.");
        return Ok(());
    }

    let cfg = config::load_config(&config_path)?;

    match cli.command {
        Commands::Init => unreachable!(),
        Commands::Refresh { progress } => {
            let mode = match progress.as_deref() {
                None => ProgressMode::default_for_tty(),
                Some("off") => ProgressMode::Off,
                Some("human") => ProgressMode::Human,
                Some("json") => ProgressMode::Json,
                Some(other) => anyhow::bail!(
                    "invalid progress mode '{}' (expected human, json, or off)",
                    other
                ),
            };
            schema_store::run_refresh(&cfg, mode).await?;
        }
        Commands::Search {
            question,
            tables_only,
            columns_only,
        } => {
            retrieve::run_search(&cfg, &question, tables_only, columns_only).await?;
        }
        Commands::Ask {
            question,
            no_insights,
            json,
        } => {
            pipeline::run_ask(&cfg, &question, !no_insights, json).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
