//! # Weft - Federated Knowledge Graph Node
//!
//! The main binary for the Weft privacy-tiered knowledge graph.
//!
//! This application provides:
//! - HTTP REST API server (axum-based, local surface + federation)
//! - CLI interface for graph operations
//! - Sync agent and federated query router
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                    apps/weft (THE BINARY)                      │
//! │                                                                │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐    │
//! │  │   CLI       │    │   HTTP API  │    │   Federation     │    │
//! │  │  (clap)     │    │   (axum)    │    │ (sync + router)  │    │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘    │
//! │         │                  │                    │              │
//! │         └──────────────────┼────────────────────┘              │
//! │                            ▼                                   │
//! │                    ┌───────────────┐                           │
//! │                    │   weft-core   │                           │
//! │                    │  (THE LOGIC)  │                           │
//! │                    └───────────────┘                           │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server with a peer config
//! weft server --host 0.0.0.0 --port 8080 -C node.toml
//!
//! # CLI operations
//! weft status
//! weft submit -f items.json
//! weft search "raft"
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use weft::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing. WEFT_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("WEFT_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "weft=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Display startup banner
    if !cli.quiet {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Weft startup banner.
fn print_banner() {
    println!(
        r#"
  ██╗    ██╗███████╗███████╗████████╗
  ██║    ██║██╔════╝██╔════╝╚══██╔══╝
  ██║ █╗ ██║█████╗  █████╗     ██║
  ██║███╗██║██╔══╝  ██╔══╝     ██║
  ╚███╔███╔╝███████╗██║        ██║
   ╚══╝╚══╝ ╚══════╝╚═╝        ╚═╝

  Federated Knowledge Graph v{}

  Local by default • Shared by choice
"#,
        env!("CARGO_PKG_VERSION")
    );
}
