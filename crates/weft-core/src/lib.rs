//! # weft-core
//!
//! The deterministic graph engine for Weft - a privacy-tiered federated
//! knowledge graph.
//!
//! This crate is the local substrate: items, concepts, co-occurrence
//! edges, attribution, and the privacy state machine. Identity is
//! content-derived (BLAKE3), so independent nodes converge on the same
//! identifiers with zero coordination.
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network dependencies
//! - Deterministic: `BTreeMap` only, no `HashMap`, no floats, no clocks
//!   (all timestamps are caller-supplied)
//! - The federation layer lives in the app crate; this crate never
//!   retries, never degrades, and fails fast on local errors

// =============================================================================
// MODULES
// =============================================================================

pub mod export;
pub mod normalize;
pub mod primitives;
pub mod session;
pub mod storage;
pub mod store;
pub mod triple;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AttributionLink, Concept, ConceptId, ContributionKind, Domain, EdgeWeight, Item, ItemId,
    ItemStatus, PrivacyLevel, WeftError,
};

// =============================================================================
// RE-EXPORTS: Graph Engine
// =============================================================================

pub use export::{
    CanonicalHeader, CanonicalStore, canonical_checksum, canonical_digest, export_canonical,
    export_ntriples, import_canonical, import_ntriples, verify_canonical,
};
pub use normalize::{NormalizedConcept, RawConcept, bucket_domain, normalize, normalize_label};
pub use session::{GraphStats, SearchHit, Session, StorageBackend, SubmitReceipt};
pub use storage::RedbStore;
pub use store::{GraphStore, MemoryStore, PrivacyChange, PutOutcome};
pub use triple::{Term, Triple, TriplePattern};
