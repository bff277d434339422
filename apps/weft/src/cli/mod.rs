//! # Weft CLI Module
//!
//! This module implements the CLI interface for Weft.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server (with federation, if configured)
//! - `status` - Show graph status
//! - `submit` - Submit items from a file
//! - `search` - Local concept search
//! - `query` - Triple pattern query
//! - `privacy` - Change an item's privacy level
//! - `tombstone` - Tombstone an item
//! - `export` - Export graph to file
//! - `import` - Import graph from file
//! - `init` - Initialize new database
//! - `digest` - Compute BLAKE3 digest of the canonical graph form

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use weft_core::WeftError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Weft - privacy-tiered federated knowledge graph node.
///
/// Items stay local by default; sharing is an explicit, per-item,
/// widening-only decision.
#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the graph database
    #[arg(short = 'D', long, global = true, default_value = "weft.db")]
    pub database: PathBuf,

    /// Storage backend: "file" (canonical file) or "redb" (ACID database)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// Path to the node configuration file (node identity + peers)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Show graph status
    Status,

    /// Submit items from a JSON file
    Submit {
        /// Path to the input file (JSON array of items)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Local concept search
    Search {
        /// Search query (matched against normalized concept labels)
        query: String,

        /// Maximum result count
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Triple pattern query (unset parts are wildcards)
    Query {
        /// Subject IRI
        #[arg(short, long)]
        subject: Option<String>,

        /// Predicate IRI
        #[arg(short, long)]
        predicate: Option<String>,

        /// Object, matched as a plain literal
        #[arg(short, long)]
        object: Option<String>,

        /// Object, matched as an IRI
        #[arg(long)]
        object_iri: Option<String>,
    },

    /// Change an item's privacy level
    Privacy {
        /// Item id (32 hex digits)
        id: String,

        /// Target level: local, friends or public
        level: String,
    },

    /// Tombstone an item
    Tombstone {
        /// Item id (32 hex digits)
        id: String,
    },

    /// Export graph in canonical or N-Triples format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (canonical, ntriples)
        #[arg(short = 't', long, default_value = "canonical")]
        format: String,
    },

    /// Import graph from an export file (file backend only)
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Import format (canonical, ntriples)
        #[arg(short = 't', long, default_value = "canonical")]
        format: String,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },

    /// Compute BLAKE3 digest of the canonical graph form
    Digest,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), WeftError> {
    let backend = cli.backend.as_str();
    let json_mode = cli.json_mode;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            cmd_server(&cli.database, backend, &config, &host, port).await
        }
        Some(Commands::Status) => cmd_status(&cli.database, backend, &config, json_mode),
        Some(Commands::Submit { file }) => cmd_submit(&cli.database, backend, &config, &file),
        Some(Commands::Search { query, limit }) => {
            cmd_search(&cli.database, backend, &config, json_mode, &query, limit)
        }
        Some(Commands::Query {
            subject,
            predicate,
            object,
            object_iri,
        }) => cmd_query(
            &cli.database,
            backend,
            &config,
            subject.as_deref(),
            predicate.as_deref(),
            object.as_deref(),
            object_iri.as_deref(),
        ),
        Some(Commands::Privacy { id, level }) => {
            cmd_privacy(&cli.database, backend, &config, &id, &level)
        }
        Some(Commands::Tombstone { id }) => cmd_tombstone(&cli.database, backend, &config, &id),
        Some(Commands::Export { output, format }) => {
            cmd_export(&cli.database, backend, &config, &output, &format)
        }
        Some(Commands::Import { input, format }) => {
            cmd_import(&cli.database, backend, &config, &input, &format)
        }
        Some(Commands::Init { force }) => cmd_init(&cli.database, backend, &config, force),
        Some(Commands::Digest) => cmd_digest(&cli.database, backend, &config, json_mode),
        None => {
            // No subcommand - show status by default
            cmd_status(&cli.database, backend, &config, json_mode)
        }
    }
}
