//! # Weft - THE BINARY
//!
//! Library surface of the Weft node application. The binary in
//! `main.rs` and the integration tests both build on these modules:
//!
//! - [`api`] - axum HTTP server (local REST surface + federation endpoints)
//! - [`cli`] - clap command-line interface
//! - [`config`] - TOML node/peer configuration
//! - [`federation`] - sync agent, peer transport, federated query router
//!
//! All graph semantics live in `weft-core`; this crate only adds the
//! async/network shell around the deterministic engine.

pub mod api;
pub mod cli;
pub mod config;
pub mod federation;
