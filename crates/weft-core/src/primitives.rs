//! # Runtime Constants
//!
//! Hardcoded limits and format constants for the Weft core.
//!
//! These are compiled into the binary and immutable at runtime. Every
//! query and mutation must be computationally bounded; the limits below
//! are the bounds.

/// Scale of confidence values: basis points, `0..=CONFIDENCE_SCALE`.
///
/// Confidence is advisory metadata from the extraction model. The core
/// stores it as integer basis points so that accumulator arithmetic stays
/// deterministic (no floating point anywhere in the engine).
pub const CONFIDENCE_SCALE: u16 = 10_000;

/// Magic bytes for the Weft canonical export header.
pub const MAGIC_BYTES: [u8; 4] = *b"WEFT";

/// Current canonical export format version.
///
/// Increment this when making breaking changes to the export format.
pub const FORMAT_VERSION: u8 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length for a raw concept label.
///
/// Labels longer than this are rejected by the normalizer before any
/// mutation. Prevents memory exhaustion from malformed extractor output.
pub const MAX_LABEL_LENGTH: usize = 256;

/// Maximum length for item content (64KB).
pub const MAX_CONTENT_LENGTH: usize = 65536;

/// Maximum length for an author string.
pub const MAX_AUTHOR_LENGTH: usize = 256;

/// Maximum length for a node identifier string.
pub const MAX_NODE_ID_LENGTH: usize = 128;

/// Maximum number of concepts attached to a single item.
///
/// Co-occurrence updates are quadratic in the concept count of one item;
/// this bound keeps a single `put` computationally bounded.
pub const MAX_CONCEPTS_PER_ITEM: usize = 128;

/// Maximum number of items in a canonical import.
///
/// Prevents memory exhaustion from malicious or corrupted export files.
pub const MAX_IMPORT_ITEM_COUNT: u64 = 1_000_000;

/// Maximum number of co-occurrence edges in a canonical import.
pub const MAX_IMPORT_EDGE_COUNT: u64 = 10_000_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(&MAGIC_BYTES, b"WEFT");
    }

    #[test]
    fn confidence_scale_is_basis_points() {
        assert_eq!(CONFIDENCE_SCALE, 10_000);
    }
}
