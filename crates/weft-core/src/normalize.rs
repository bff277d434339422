//! # Concept Normalizer
//!
//! Maps raw extracted spans `(label, domain, confidence)` to canonical
//! concepts. Normalization is pure and idempotent: the same input always
//! yields the same `ConceptId`, on every node, with no coordination.
//!
//! Confidence is advisory. Low confidence is never a rejection criterion;
//! the only rejections here are structural (empty or oversized labels).

use crate::primitives::CONFIDENCE_SCALE;
use crate::types::{ConceptId, Domain, WeftError};
use serde::{Deserialize, Serialize};

/// A raw concept span as produced by the extraction model.
///
/// The extractor is an external collaborator; the core only consumes its
/// output in this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConcept {
    /// Surface text of the span.
    pub label: String,
    /// Extractor label or domain hint (free-form).
    pub domain: String,
    /// Extraction confidence, basis points `0..=10000`.
    pub confidence_bp: u16,
}

/// A normalized concept ready for storage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormalizedConcept {
    /// Canonical identifier, derived from (label, domain).
    pub id: ConceptId,
    /// Lower-cased, whitespace-collapsed label.
    pub label: String,
    /// Domain bucket.
    pub domain: Domain,
    /// Clamped confidence, basis points.
    pub confidence_bp: u16,
}

/// Lower-case a label and collapse internal whitespace runs to single
/// spaces. `"Raft "` and `"raft"` normalize identically.
#[must_use]
pub fn normalize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        }
    }
    out
}

/// Bucket a free-form domain hint into the closed `Domain` set.
///
/// Accepts the canonical kebab-case names (case-insensitively) plus the
/// extractor's label inventory. Anything unrecognized falls back to
/// `Other`, the deterministic bucket for ambiguity.
#[must_use]
pub fn bucket_domain(raw: &str) -> Domain {
    let normalized = normalize_label(raw).replace(' ', "-").replace('_', "-");
    if let Some(domain) = Domain::parse(&normalized) {
        return domain;
    }
    match normalized.as_str() {
        // Computer science extractor labels
        "cs" | "computer-science-concept" | "algorithm" | "data-structure"
        | "programming-language" | "software-system" | "distributed-system"
        | "machine-learning-concept" => Domain::ComputerScience,
        // Mathematics
        "math" | "mathematics-concept" | "mathematical-theorem" | "statistical-method"
        | "mathematical-proof" | "equation" => Domain::Mathematics,
        // Philosophy
        "philosophical-concept" | "ethical-principle" | "logical-argument"
        | "epistemological-concept" => Domain::Philosophy,
        // Social science
        "social" | "social-science-concept" | "research-method" | "psychological-concept"
        | "economic-concept" | "organizational-behavior" => Domain::SocialScience,
        // People and organizations
        "person-mention" | "people" => Domain::Person,
        "organisation" | "org" => Domain::Organization,
        _ => Domain::Other,
    }
}

/// Normalize one raw span into a canonical concept.
///
/// Idempotent: repeated calls with equivalent `(label, domain)` inputs
/// return the identical `ConceptId`. Fails only on structurally invalid
/// labels, before any state is touched.
pub fn normalize(raw: &RawConcept) -> Result<NormalizedConcept, WeftError> {
    WeftError::check_label(&raw.label)?;
    let label = normalize_label(&raw.label);
    if label.is_empty() {
        return Err(WeftError::Validation("empty concept label".to_string()));
    }
    let domain = bucket_domain(&raw.domain);
    Ok(NormalizedConcept {
        id: ConceptId::derive(&label, domain),
        label,
        domain,
        confidence_bp: raw.confidence_bp.min(CONFIDENCE_SCALE),
    })
}

// =============================================================================
// TESTS
// =============================================================================
