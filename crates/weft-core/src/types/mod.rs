//! # Core Type Definitions
//!
//! This module contains all core types for the Weft knowledge graph:
//! - Content-derived identifiers (`ItemId`, `ConceptId`, `EdgeWeight`)
//! - Graph entities (`Item`, `Concept`, `AttributionLink`)
//! - The privacy lifecycle (`PrivacyLevel`, `ItemStatus`)
//! - Error types (`WeftError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Use saturating arithmetic for counters to prevent overflow
//! - Derive identifiers from content via BLAKE3, so two nodes reach the
//!   same identifier for the same input with zero coordination

use crate::primitives::{CONFIDENCE_SCALE, MAX_LABEL_LENGTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// CONTENT-DERIVED IDENTIFIERS
// =============================================================================

/// Truncate a BLAKE3 digest to a `u128` identifier.
fn fold_digest(hash: &blake3::Hash) -> u128 {
    let bytes = hash.as_bytes();
    let mut head = [0u8; 16];
    head.copy_from_slice(&bytes[..16]);
    u128::from_be_bytes(head)
}

/// Parse a 32-hex-digit identifier string.
fn parse_hex_id(s: &str) -> Option<u128> {
    if s.len() != 32 {
        return None;
    }
    u128::from_str_radix(s, 16).ok()
}

/// Identifier of an item: the BLAKE3 hash of its normalized content.
///
/// Content-addressed, so the same document submitted on any node yields
/// the same identifier. Rendered as 32 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u128);

impl ItemId {
    /// Derive the identifier from normalized item content.
    #[must_use]
    pub fn derive(normalized_content: &str) -> Self {
        Self(fold_digest(&blake3::hash(normalized_content.as_bytes())))
    }

    /// Parse from the 32-hex-digit string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        parse_hex_id(s).map(Self)
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Identifier of a concept: the BLAKE3 hash of (normalized label, domain).
///
/// Two nodes independently extracting "Raft"/computer-science arrive at
/// the identical identifier without any registry or handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConceptId(pub u128);

impl ConceptId {
    /// Derive the identifier from a normalized label and a domain bucket.
    ///
    /// The label must already be normalized (lower-case, collapsed
    /// whitespace); the normalizer is the only call site that matters.
    #[must_use]
    pub fn derive(normalized_label: &str, domain: Domain) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(normalized_label.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(domain.as_str().as_bytes());
        Self(fold_digest(&hasher.finalize()))
    }

    /// Parse from the 32-hex-digit string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        parse_hex_id(s).map(Self)
    }
}

impl std::fmt::Display for ConceptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Weight of a co-occurrence edge.
///
/// Uses i64 with saturating arithmetic to prevent overflow. The weight of
/// a concept pair is the count of items that discuss both concepts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EdgeWeight(pub i64);

impl EdgeWeight {
    /// Create a new edge weight with the given value.
    #[must_use]
    pub const fn new(weight: i64) -> Self {
        Self(weight)
    }

    /// Increment the edge weight by 1 using saturating arithmetic.
    #[must_use]
    pub const fn increment(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Decrement the edge weight by 1, clamped at zero.
    ///
    /// Used when a revised item no longer discusses a concept pair.
    #[must_use]
    pub const fn decrement(self) -> Self {
        if self.0 > 0 { Self(self.0 - 1) } else { Self(0) }
    }

    /// Get the raw weight value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

// =============================================================================
// DOMAIN BUCKETS
// =============================================================================

/// The closed set of concept domains.
///
/// Extractor labels map deterministically into these buckets; anything
/// ambiguous or unknown falls back to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Domain {
    ComputerScience,
    Mathematics,
    Philosophy,
    SocialScience,
    Person,
    Organization,
    Other,
}

impl Domain {
    /// Canonical kebab-case string form, used in identifier derivation
    /// and in the triple view.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ComputerScience => "computer-science",
            Self::Mathematics => "mathematics",
            Self::Philosophy => "philosophy",
            Self::SocialScience => "social-science",
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Other => "other",
        }
    }

    /// All domains in deterministic order.
    #[must_use]
    pub const fn all() -> [Self; 7] {
        [
            Self::ComputerScience,
            Self::Mathematics,
            Self::Philosophy,
            Self::SocialScience,
            Self::Person,
            Self::Organization,
            Self::Other,
        ]
    }

    /// Parse the canonical kebab-case form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().into_iter().find(|d| d.as_str() == s)
    }
}

// =============================================================================
// PRIVACY LIFECYCLE
// =============================================================================

/// Ordered visibility tiers controlling delivery scope.
///
/// `Local < Friends < Public`. Widening is always allowed; narrowing after
/// delivery is restricted because delivered copies cannot be recalled.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    #[default]
    Local,
    Friends,
    Public,
}

impl PrivacyLevel {
    /// Canonical lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Friends => "friends",
            Self::Public => "public",
        }
    }

    /// Parse the canonical lowercase form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "friends" => Some(Self::Friends),
            "public" => Some(Self::Public),
            _ => None,
        }
    }
}

/// Lifecycle status of an item.
///
/// Items are never physically deleted; a tombstone is an item state, so
/// attribution chains stay resolvable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Active,
    Tombstoned,
}

impl ItemStatus {
    /// Canonical lowercase string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Tombstoned => "tombstoned",
        }
    }

    /// Parse the canonical lowercase form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "tombstoned" => Some(Self::Tombstoned),
            _ => None,
        }
    }
}

// =============================================================================
// ITEM
// =============================================================================

/// A published document tracked by the graph.
///
/// Identity is the hash of the normalized content; the privacy level and
/// revision counter are mutated only by the owning node, remote-URI
/// mappings only by the sync agent after confirmed delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Content-addressed identifier.
    pub id: ItemId,
    /// Identifier of the node the item originated on.
    pub origin: String,
    /// Author string as submitted.
    pub author: String,
    /// Normalized content.
    pub content: String,
    /// Creation time, unix seconds. Supplied by the caller so the core
    /// stays clock-free and deterministic.
    pub created_at: u64,
    /// Current visibility tier.
    pub privacy: PrivacyLevel,
    /// Active or tombstoned.
    pub status: ItemStatus,
    /// Monotonically increasing revision counter.
    pub revision: u64,
    /// Remote node id -> URI of the delivered copy.
    pub remote_uris: BTreeMap<String, String>,
}

impl Item {
    /// Normalize raw content: unify line endings and trim trailing
    /// whitespace. The identifier is derived from this form.
    #[must_use]
    pub fn normalize_content(raw: &str) -> String {
        raw.replace("\r\n", "\n").trim_end().to_string()
    }

    /// Build a new item at revision 1 from raw content.
    #[must_use]
    pub fn new(
        raw_content: &str,
        origin: impl Into<String>,
        author: impl Into<String>,
        created_at: u64,
        privacy: PrivacyLevel,
    ) -> Self {
        let content = Self::normalize_content(raw_content);
        let id = ItemId::derive(&content);
        Self {
            id,
            origin: origin.into(),
            author: author.into(),
            content,
            created_at,
            privacy,
            status: ItemStatus::Active,
            revision: 1,
            remote_uris: BTreeMap::new(),
        }
    }
}

// =============================================================================
// CONCEPT
// =============================================================================

/// A canonical semantic entity extracted from item content.
///
/// The confidence accumulator is a running mean in basis points. It is
/// advisory only, never a rejection criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    /// Deterministic identifier derived from (label, domain).
    pub id: ConceptId,
    /// Normalized display label.
    pub label: String,
    /// Domain bucket.
    pub domain: Domain,
    /// Running mean of observed extraction confidence, basis points.
    pub mean_confidence_bp: u16,
    /// Number of observations folded into the mean.
    pub observations: u64,
}

impl Concept {
    /// Create a concept from its first observation.
    #[must_use]
    pub fn new(id: ConceptId, label: impl Into<String>, domain: Domain, confidence_bp: u16) -> Self {
        Self {
            id,
            label: label.into(),
            domain,
            mean_confidence_bp: confidence_bp.min(CONFIDENCE_SCALE),
            observations: 1,
        }
    }

    /// Fold one more confidence observation into the running mean.
    ///
    /// Integer arithmetic only: `mean' = (mean * n + x) / (n + 1)`.
    pub fn observe(&mut self, confidence_bp: u16) {
        let x = u128::from(confidence_bp.min(CONFIDENCE_SCALE));
        let n = u128::from(self.observations);
        let mean = u128::from(self.mean_confidence_bp);
        let next = (mean * n + x) / (n + 1);
        self.mean_confidence_bp = next.min(u128::from(CONFIDENCE_SCALE)) as u16;
        self.observations = self.observations.saturating_add(1);
    }
}

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Kind of contribution recorded by an attribution link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContributionKind {
    DerivedFrom,
    References,
    Quotes,
    ReplyTo,
}

impl ContributionKind {
    /// Canonical kebab-case string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DerivedFrom => "derived-from",
            Self::References => "references",
            Self::Quotes => "quotes",
            Self::ReplyTo => "reply-to",
        }
    }

    /// Parse the canonical kebab-case form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "derived-from" => Some(Self::DerivedFrom),
            "references" => Some(Self::References),
            "quotes" => Some(Self::Quotes),
            "reply-to" => Some(Self::ReplyTo),
            _ => None,
        }
    }
}

/// Append-only provenance record: item X derives from / references item Y,
/// possibly held on another node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AttributionLink {
    /// The item whose content builds on the source.
    pub derived: ItemId,
    /// The prior item being built upon.
    pub source: ItemId,
    /// Node holding the source item (may be this node).
    pub source_node: String,
    /// Contribution kind.
    pub kind: ContributionKind,
    /// Unix seconds when the link was recorded.
    pub recorded_at: u64,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors surfaced by the Weft core.
///
/// Local operations fail fast with one of these; network-layer soft
/// failures (delivery retries, degraded peers) live in the app layer and
/// never appear here.
#[derive(Debug, Error)]
pub enum WeftError {
    /// Malformed input, rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Disallowed privacy-level change. Delivered copies cannot be
    /// recalled, so narrowing requires tombstoning first.
    #[error("invalid privacy transition: {from:?} -> {to:?} (tombstone required)")]
    InvalidTransition {
        from: PrivacyLevel,
        to: PrivacyLevel,
    },

    /// The requested item is not in the store.
    #[error("item not found: {0}")]
    ItemNotFound(ItemId),

    /// A serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A deserialization error occurred.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Underlying storage I/O failure. Not retried, surfaced immediately.
    #[error("storage error: {0}")]
    Io(String),
}

impl WeftError {
    /// Validate a raw concept label before normalization.
    pub fn check_label(raw: &str) -> Result<(), WeftError> {
        if raw.trim().is_empty() {
            return Err(WeftError::Validation("empty concept label".to_string()));
        }
        if raw.len() > MAX_LABEL_LENGTH {
            return Err(WeftError::Validation(format!(
                "label length {} exceeds maximum {} bytes",
                raw.len(),
                MAX_LABEL_LENGTH
            )));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
