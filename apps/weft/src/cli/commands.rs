//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::api::{self, AppState};
use crate::config::NodeConfig;
use crate::federation::{Federation, HttpTransport, PassthroughCipher, unix_now};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use weft_core::{
    ItemId, PrivacyLevel, RawConcept, Session, Term, TriplePattern,
    triple::to_ntriples_line,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for item submission (100 MB).
const MAX_SUBMIT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum file size for import (500 MB).
///
/// Import files can be larger since they contain binary graph data.
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), weft_core::WeftError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| weft_core::WeftError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(weft_core::WeftError::Validation(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate an input file path: canonicalize (resolving symlinks and
/// "..") and require a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, weft_core::WeftError> {
    let canonical = path.canonicalize().map_err(|e| {
        weft_core::WeftError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(weft_core::WeftError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Validate an output file path: the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, weft_core::WeftError> {
    let parent = path.parent().unwrap_or(Path::new("."));

    let canonical_parent = parent.canonicalize().map_err(|e| {
        weft_core::WeftError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(weft_core::WeftError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| weft_core::WeftError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

// =============================================================================
// CONFIG LOADING
// =============================================================================

/// Load the node config, or fall back to defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> Result<NodeConfig, weft_core::WeftError> {
    match path {
        Some(path) => NodeConfig::load(path),
        None => Ok(NodeConfig::default()),
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server with the federation layer wired up.
pub async fn cmd_server(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    host: &str,
    port: u16,
) -> Result<(), weft_core::WeftError> {
    let session = load_or_create_session(db_path, backend, config)?;
    let session = Arc::new(RwLock::new(session));
    let federation = Federation::new(
        Arc::clone(&session),
        config,
        Arc::new(HttpTransport::new()),
        Arc::new(PassthroughCipher),
    )?;

    println!("Weft Node Starting...");
    println!();
    println!("Configuration:");
    println!("  Node:     {}", config.node.id);
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Backend:  {}", backend);
    println!("  Database: {:?}", db_path);
    println!("  Peers:    {}", config.peers.len());
    println!();
    println!("Endpoints:");
    println!("  POST /submit             - Submit an item");
    println!("  POST /search             - Federated search");
    println!("  GET  /item/{{id}}          - Fetch an item");
    println!("  GET  /stats              - Graph statistics");
    println!("  POST /federation/deliver - Peer delivery");
    println!("  GET  /health             - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, AppState::new(session, federation)).await
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show graph status.
pub fn cmd_status(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    json_mode: bool,
) -> Result<(), weft_core::WeftError> {
    let session = load_or_create_session(db_path, backend, config)?;
    let stats = session.stats()?;

    if json_mode {
        let output = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "backend": backend,
            "node": session.origin(),
            "items": stats.items,
            "concepts": stats.concepts,
            "edges": stats.edges,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Weft Graph Status");
    println!("=================");
    println!("Database: {:?}", db_path);
    println!("Backend:  {}", backend);
    println!("Node:     {}", session.origin());
    println!();
    println!("Items:    {}", stats.items);
    println!("Concepts: {}", stats.concepts);
    println!("Edges:    {}", stats.edges);

    Ok(())
}

// =============================================================================
// SUBMIT COMMAND
// =============================================================================

/// One item in a submit file.
#[derive(Debug, Deserialize)]
struct SubmitEntry {
    content: String,
    author: String,
    #[serde(default)]
    privacy: Option<String>,
    #[serde(default)]
    concepts: Vec<SubmitConcept>,
}

#[derive(Debug, Deserialize)]
struct SubmitConcept {
    label: String,
    domain: String,
    #[serde(default)]
    confidence_bp: u16,
}

/// Submit items from a JSON file.
pub fn cmd_submit(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    file: &PathBuf,
) -> Result<(), weft_core::WeftError> {
    tracing::info!("Submitting from {:?}", file);

    let mut session = load_or_create_session(db_path, backend, config)?;

    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_SUBMIT_FILE_SIZE)?;

    let contents = std::fs::read(&validated_path)
        .map_err(|e| weft_core::WeftError::Io(format!("Read file: {}", e)))?;
    let entries: Vec<SubmitEntry> = serde_json::from_slice(&contents)
        .map_err(|e| weft_core::WeftError::Deserialization(format!("submit file: {e}")))?;

    let mut submitted = 0;
    for entry in &entries {
        let privacy = match entry.privacy.as_deref() {
            None | Some("") => PrivacyLevel::Local,
            Some(raw) => PrivacyLevel::parse(raw).ok_or_else(|| {
                weft_core::WeftError::Validation(format!("unknown privacy level '{raw}'"))
            })?,
        };
        let spans: Vec<RawConcept> = entry
            .concepts
            .iter()
            .map(|c| RawConcept {
                label: c.label.clone(),
                domain: c.domain.clone(),
                confidence_bp: c.confidence_bp,
            })
            .collect();
        let receipt = session.submit(&entry.content, &entry.author, &spans, privacy, unix_now())?;
        println!("{}  {:?}", receipt.id, receipt.outcome);
        submitted += 1;
    }

    save_session(&session, db_path)?;

    let stats = session.stats()?;
    println!("Submitted {} items", submitted);
    println!(
        "Graph now has {} items, {} concepts, {} edges",
        stats.items, stats.concepts, stats.edges
    );

    Ok(())
}

// =============================================================================
// SEARCH COMMAND
// =============================================================================

/// Local concept search.
pub fn cmd_search(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    json_mode: bool,
    query: &str,
    limit: usize,
) -> Result<(), weft_core::WeftError> {
    let session = load_or_create_session(db_path, backend, config)?;
    let hits = session.search(query, PrivacyLevel::Local, limit)?;

    if json_mode {
        let output: Vec<serde_json::Value> = hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "id": hit.item.id.to_string(),
                    "author": hit.item.author,
                    "content": hit.item.content,
                    "matched_terms": hit.matched_terms,
                    "weight": hit.weight,
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results for '{}'", query);
        return Ok(());
    }
    println!("Results for '{}':", query);
    for hit in &hits {
        println!(
            "  {}  terms={} weight={}  {}",
            hit.item.id,
            hit.matched_terms,
            hit.weight,
            preview(&hit.item.content)
        );
    }

    Ok(())
}

/// First line of content, truncated for terminal display.
fn preview(content: &str) -> String {
    let line = content.lines().next().unwrap_or("");
    if line.len() > 60 {
        let cut = line
            .char_indices()
            .take_while(|(i, _)| *i < 60)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}...", &line[..cut])
    } else {
        line.to_string()
    }
}

// =============================================================================
// QUERY COMMAND
// =============================================================================

/// Triple pattern query.
pub fn cmd_query(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    subject: Option<&str>,
    predicate: Option<&str>,
    object: Option<&str>,
    object_iri: Option<&str>,
) -> Result<(), weft_core::WeftError> {
    let session = load_or_create_session(db_path, backend, config)?;

    let mut pattern = TriplePattern::any();
    if let Some(s) = subject {
        pattern = pattern.with_subject(s);
    }
    if let Some(p) = predicate {
        pattern = pattern.with_predicate(p);
    }
    if let Some(iri) = object_iri {
        pattern = pattern.with_object(Term::iri(iri));
    } else if let Some(literal) = object {
        pattern = pattern.with_object(Term::literal(literal));
    }

    let triples = session.query(&pattern)?;
    for triple in &triples {
        println!("{}", to_ntriples_line(triple));
    }
    println!("{} triples", triples.len());

    Ok(())
}

// =============================================================================
// PRIVACY / TOMBSTONE COMMANDS
// =============================================================================

/// Change an item's privacy level.
pub fn cmd_privacy(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    id: &str,
    level: &str,
) -> Result<(), weft_core::WeftError> {
    let id = ItemId::parse(id)
        .ok_or_else(|| weft_core::WeftError::Validation("malformed item id".to_string()))?;
    let level = PrivacyLevel::parse(level).ok_or_else(|| {
        weft_core::WeftError::Validation(format!("unknown privacy level '{level}'"))
    })?;

    let mut session = load_or_create_session(db_path, backend, config)?;
    let change = session.set_privacy(id, level)?;
    save_session(&session, db_path)?;

    println!(
        "{}: {} -> {} (revision {})",
        id,
        change.previous.as_str(),
        change.current.as_str(),
        change.revision
    );
    if change.widened {
        println!("Widened; deliveries are queued when the server runs.");
    }

    Ok(())
}

/// Tombstone an item.
pub fn cmd_tombstone(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    id: &str,
) -> Result<(), weft_core::WeftError> {
    let id = ItemId::parse(id)
        .ok_or_else(|| weft_core::WeftError::Validation("malformed item id".to_string()))?;

    let mut session = load_or_create_session(db_path, backend, config)?;
    session.tombstone(id)?;
    save_session(&session, db_path)?;

    println!("Tombstoned {}", id);
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export graph.
pub fn cmd_export(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    output: &Path,
    format: &str,
) -> Result<(), weft_core::WeftError> {
    let validated_output = validate_output_path(output)?;
    let session = load_or_create_session(db_path, backend, config)?;

    let data = match format {
        "canonical" => {
            let data = session.export_canonical()?;
            println!("Digest: {}", session.canonical_digest()?);
            data
        }
        "ntriples" => session.export_ntriples()?.into_bytes(),
        _ => {
            return Err(weft_core::WeftError::Validation(format!(
                "Unknown format: {}. Use: canonical, ntriples",
                format
            )));
        }
    };

    std::fs::write(&validated_output, &data)
        .map_err(|e| weft_core::WeftError::Io(format!("Write file: {}", e)))?;

    println!("Exported {} bytes to {:?}", data.len(), validated_output);

    Ok(())
}

// =============================================================================
// IMPORT COMMAND
// =============================================================================

/// Import graph.
pub fn cmd_import(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    input: &Path,
    format: &str,
) -> Result<(), weft_core::WeftError> {
    if backend == "redb" {
        return Err(weft_core::WeftError::Validation(
            "Import to redb not supported. Use file backend.".to_string(),
        ));
    }

    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_IMPORT_FILE_SIZE)?;

    let data = std::fs::read(&validated_path)
        .map_err(|e| weft_core::WeftError::Io(format!("Read file: {}", e)))?;

    let mut session = Session::new(config.node.id.clone());
    match format {
        "canonical" => session.import_canonical(&data)?,
        "ntriples" => {
            let text = String::from_utf8(data).map_err(|e| {
                weft_core::WeftError::Deserialization(format!("ntriples utf8: {e}"))
            })?;
            session.import_ntriples(&text)?;
        }
        _ => {
            return Err(weft_core::WeftError::Validation(format!(
                "Unknown format: {}. Use: canonical, ntriples",
                format
            )));
        }
    }

    save_session(&session, db_path)?;

    let stats = session.stats()?;
    println!(
        "Imported graph: {} items, {} concepts, {} edges",
        stats.items, stats.concepts, stats.edges
    );

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    force: bool,
) -> Result<(), weft_core::WeftError> {
    if db_path.exists() && !force {
        return Err(weft_core::WeftError::Validation(
            "Database already exists. Use --force to overwrite.".to_string(),
        ));
    }

    match backend {
        "redb" => {
            let _session = Session::with_redb(config.node.id.clone(), db_path)?;
            println!("Initialized new redb database at {:?}", db_path);
        }
        _ => {
            let session = Session::new(config.node.id.clone());
            save_session(&session, db_path)?;
            println!("Initialized new file database at {:?}", db_path);
        }
    }

    Ok(())
}

// =============================================================================
// DIGEST COMMAND
// =============================================================================

/// Compute the BLAKE3 digest of the canonical graph form.
pub fn cmd_digest(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
    json_mode: bool,
) -> Result<(), weft_core::WeftError> {
    let session = load_or_create_session(db_path, backend, config)?;
    let digest = session.canonical_digest()?;

    if json_mode {
        println!("{}", serde_json::json!({ "digest": digest }));
    } else {
        println!("Digest: {}", digest);
    }

    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Load or create a session from a database path with specified backend.
pub fn load_or_create_session(
    db_path: &PathBuf,
    backend: &str,
    config: &NodeConfig,
) -> Result<Session, weft_core::WeftError> {
    let origin = config.node.id.clone();
    match backend {
        "redb" => Session::with_redb(origin, db_path),
        _ => {
            if db_path.exists() {
                let data = std::fs::read(db_path)
                    .map_err(|e| weft_core::WeftError::Io(format!("Read db: {}", e)))?;
                let mut session = Session::new(origin);
                session.import_canonical(&data)?;
                Ok(session)
            } else {
                Ok(Session::new(origin))
            }
        }
    }
}

/// Save a session to a database path.
pub fn save_session(session: &Session, db_path: &PathBuf) -> Result<(), weft_core::WeftError> {
    if session.is_persistent() {
        // Redb backend - already persisted, nothing to do
        Ok(())
    } else {
        // File backend - export to canonical format
        let data = session.export_canonical()?;
        std::fs::write(db_path, &data)
            .map_err(|e| weft_core::WeftError::Io(format!("Write db: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_file_backend_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("weft.db");
        let config = NodeConfig::default();

        let mut session = load_or_create_session(&db, "file", &config).unwrap();
        session
            .submit("persists across loads", "alice", &[], PrivacyLevel::Local, 1)
            .unwrap();
        let digest = session.canonical_digest().unwrap();
        save_session(&session, &db).unwrap();

        let reloaded = load_or_create_session(&db, "file", &config).unwrap();
        assert_eq!(reloaded.stats().unwrap().items, 1);
        assert_eq!(reloaded.canonical_digest().unwrap(), digest);
    }

    #[test]
    fn test_missing_file_yields_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("missing.db");
        let session = load_or_create_session(&db, "file", &NodeConfig::default()).unwrap();
        assert_eq!(session.stats().unwrap().items, 0);
        assert!(!db.exists());
    }

    #[test]
    fn test_file_size_limit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.json");
        std::fs::write(&path, b"0123456789").unwrap();
        assert!(validate_file_size(&path, 5).is_err());
        assert!(validate_file_size(&path, 10).is_ok());
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview("line one\nline two"), "line one");
        let long = "ü".repeat(64);
        let cut = preview(&long);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 64);
    }
}
