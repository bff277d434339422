//! # Session Module
//!
//! The high-level interface over a storage backend: the submit pipeline
//! (normalize, register, link), the privacy lifecycle, attribution, and
//! deterministic local search.
//!
//! ## Storage Backends
//!
//! - `InMemory`: fast, volatile unless explicitly exported
//! - `Persistent`: disk-backed ACID storage via redb

use crate::export::{self, CanonicalStore};
use crate::normalize::{NormalizedConcept, RawConcept, normalize, normalize_label};
use crate::store::{GraphStore, MemoryStore, PrivacyChange, PutOutcome};
use crate::storage::RedbStore;
use crate::triple::{Triple, TriplePattern};
use crate::types::{
    AttributionLink, Concept, ConceptId, EdgeWeight, Item, ItemId, ItemStatus, PrivacyLevel,
    WeftError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Storage backend for a Session.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory store (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed store using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

// NOTE: StorageBackend does NOT implement Clone.
// RedbStore (database handle) cannot be safely cloned.

/// Receipt returned by the submit pipeline.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    /// Content-derived identifier of the submitted item.
    pub id: ItemId,
    /// Whether the item was new, revised, or an idempotent repeat.
    pub outcome: PutOutcome,
    /// The normalized concepts linked to the item.
    pub concepts: Vec<NormalizedConcept>,
}

/// One ranked local search result.
///
/// Ranking inputs are all integers, so given the same store state the
/// same query always produces the same ordering.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub item: Item,
    /// Number of query terms whose concept matched this item exactly.
    pub matched_terms: u64,
    /// Summed co-occurrence weight between matched and carried concepts.
    pub weight: i64,
}

/// Graph statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphStats {
    pub items: usize,
    pub concepts: usize,
    pub edges: usize,
}

/// A Session combines a storage backend with the node identity that
/// stamps locally submitted items.
#[derive(Debug, Default)]
pub struct Session {
    /// The storage backend (in-memory or persistent).
    backend: StorageBackend,
    /// Origin node id written into locally submitted items.
    origin: String,
}

macro_rules! with_store {
    ($self:expr, $store:ident => $body:expr) => {
        match &$self.backend {
            StorageBackend::InMemory($store) => $body,
            StorageBackend::Persistent($store) => $body,
        }
    };
}

macro_rules! with_store_mut {
    ($self:expr, $store:ident => $body:expr) => {
        match &mut $self.backend {
            StorageBackend::InMemory($store) => $body,
            StorageBackend::Persistent($store) => $body,
        }
    };
}

impl Session {
    /// Create an in-memory session for the given origin node.
    #[must_use]
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::default(),
            origin: origin.into(),
        }
    }

    /// Create a session over an existing in-memory store.
    #[must_use]
    pub fn with_store(origin: impl Into<String>, store: MemoryStore) -> Self {
        Self {
            backend: StorageBackend::InMemory(store),
            origin: origin.into(),
        }
    }

    /// Create a session with persistent redb storage.
    ///
    /// Opens or creates a database at the given path. All changes are
    /// persisted as they happen.
    pub fn with_redb(origin: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, WeftError> {
        let store = RedbStore::open(path)?;
        Ok(Self {
            backend: StorageBackend::Persistent(store),
            origin: origin.into(),
        })
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    /// The origin node id stamped on local submissions.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Get a reference to the storage backend.
    #[must_use]
    pub fn backend(&self) -> &StorageBackend {
        &self.backend
    }

    // =========================================================================
    // SUBMIT PIPELINE
    // =========================================================================

    /// Submit a local document: normalize its extracted concept spans,
    /// register them, and link the item atomically.
    ///
    /// Resubmitting the same content is a no-op (content addressing makes
    /// the identifier collide on purpose).
    pub fn submit(
        &mut self,
        content: &str,
        author: &str,
        spans: &[RawConcept],
        privacy: PrivacyLevel,
        created_at: u64,
    ) -> Result<SubmitReceipt, WeftError> {
        let concepts = spans.iter().map(normalize).collect::<Result<Vec<_>, _>>()?;
        let item = Item::new(content, self.origin.clone(), author, created_at, privacy);
        let id = item.id;
        let outcome = with_store_mut!(self, store => store.put_item(item, &concepts))?;
        Ok(SubmitReceipt {
            id,
            outcome,
            concepts,
        })
    }

    /// Accept an item delivered from a peer, keeping its original origin
    /// and revision. Redelivery of a known revision is acknowledged as
    /// unchanged.
    pub fn receive(
        &mut self,
        item: Item,
        concepts: &[NormalizedConcept],
    ) -> Result<PutOutcome, WeftError> {
        with_store_mut!(self, store => store.put_item(item, concepts))
    }

    // =========================================================================
    // ITEM LIFECYCLE
    // =========================================================================

    /// Look up an item by id.
    pub fn get_item(&self, id: ItemId) -> Result<Option<Item>, WeftError> {
        with_store!(self, store => store.get_item(id))
    }

    /// Concepts linked to an item, with edge confidence.
    pub fn item_concepts(&self, id: ItemId) -> Result<Vec<(ConceptId, u16)>, WeftError> {
        with_store!(self, store => store.item_concepts(id))
    }

    /// Change an item's privacy level, enforcing the state machine.
    pub fn set_privacy(
        &mut self,
        id: ItemId,
        level: PrivacyLevel,
    ) -> Result<PrivacyChange, WeftError> {
        with_store_mut!(self, store => store.set_privacy(id, level))
    }

    /// Tombstone an item.
    pub fn tombstone(&mut self, id: ItemId) -> Result<(), WeftError> {
        with_store_mut!(self, store => store.tombstone(id))
    }

    /// Record a confirmed remote delivery URI.
    pub fn record_remote_uri(
        &mut self,
        id: ItemId,
        node: &str,
        uri: &str,
    ) -> Result<(), WeftError> {
        with_store_mut!(self, store => store.record_remote_uri(id, node, uri))
    }

    // =========================================================================
    // ATTRIBUTION
    // =========================================================================

    /// Record an attribution link.
    pub fn add_attribution(&mut self, link: AttributionLink) -> Result<(), WeftError> {
        with_store_mut!(self, store => store.add_attribution(link))
    }

    /// Attribution links whose derived side is the given item.
    pub fn attributions_for(&self, id: ItemId) -> Result<Vec<AttributionLink>, WeftError> {
        with_store!(self, store => store.attributions_for(id))
    }

    // =========================================================================
    // LOOKUP & QUERY
    // =========================================================================

    /// Look up a concept by id.
    pub fn get_concept(&self, id: ConceptId) -> Result<Option<Concept>, WeftError> {
        with_store!(self, store => store.get_concept(id))
    }

    /// Concepts whose normalized label matches the given raw label.
    pub fn concepts_by_label(&self, raw_label: &str) -> Result<Vec<Concept>, WeftError> {
        let normalized = normalize_label(raw_label);
        let ids = with_store!(self, store => store.concepts_by_label(&normalized))?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(concept) = self.get_concept(id)? {
                out.push(concept);
            }
        }
        Ok(out)
    }

    /// Strongest co-occurring partners of a labeled concept, across all
    /// of its domain buckets, weight-descending.
    pub fn related(
        &self,
        raw_label: &str,
        limit: usize,
    ) -> Result<Vec<(Concept, EdgeWeight)>, WeftError> {
        let mut merged: BTreeMap<ConceptId, EdgeWeight> = BTreeMap::new();
        for concept in self.concepts_by_label(raw_label)? {
            let partners = with_store!(self, store => store.co_occurring(concept.id, limit))?;
            for (partner, weight) in partners {
                let entry = merged.entry(partner).or_default();
                if weight > *entry {
                    *entry = weight;
                }
            }
        }
        let mut ranked: Vec<(ConceptId, EdgeWeight)> = merged.into_iter().collect();
        ranked.sort_by(|(ca, wa), (cb, wb)| wb.cmp(wa).then(ca.cmp(cb)));
        ranked.truncate(limit);

        let mut out = Vec::with_capacity(ranked.len());
        for (id, weight) in ranked {
            if let Some(concept) = self.get_concept(id)? {
                out.push((concept, weight));
            }
        }
        Ok(out)
    }

    /// All items, ordered by id.
    pub fn items(&self) -> Result<Vec<Item>, WeftError> {
        with_store!(self, store => store.items_all())
    }

    /// All registered concepts, ordered by id.
    pub fn concepts(&self) -> Result<Vec<Concept>, WeftError> {
        with_store!(self, store => store.concepts_all())
    }

    /// Graph statistics.
    pub fn stats(&self) -> Result<GraphStats, WeftError> {
        Ok(GraphStats {
            items: with_store!(self, store => store.item_count())?,
            concepts: with_store!(self, store => store.concept_count())?,
            edges: with_store!(self, store => store.edge_count())?,
        })
    }

    /// Pattern-match over the triple view.
    pub fn query(&self, pattern: &TriplePattern) -> Result<Vec<Triple>, WeftError> {
        with_store!(self, store => store.query(pattern))
    }

    // =========================================================================
    // SEARCH
    // =========================================================================

    /// Deterministic local concept search.
    ///
    /// Query terms are normalized exactly like concept labels, so the
    /// match is exact-label, not fuzzy. Only `Active` items at or above
    /// the `floor` visibility are returned. Ranking: exact term matches,
    /// then summed co-occurrence weight, then recency, with the content
    /// hash as the final tie-break.
    pub fn search(
        &self,
        query: &str,
        floor: PrivacyLevel,
        limit: usize,
    ) -> Result<Vec<SearchHit>, WeftError> {
        let mut terms: Vec<String> = query
            .split_whitespace()
            .map(normalize_label)
            .filter(|t| !t.is_empty())
            .collect();
        terms.sort();
        terms.dedup();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        // Concept ids per term (one label can span domains).
        let mut term_concepts: Vec<BTreeSet<ConceptId>> = Vec::with_capacity(terms.len());
        let mut all_matched: BTreeSet<ConceptId> = BTreeSet::new();
        for term in &terms {
            let ids: BTreeSet<ConceptId> =
                with_store!(self, store => store.concepts_by_label(term))?
                    .into_iter()
                    .collect();
            all_matched.extend(ids.iter().copied());
            term_concepts.push(ids);
        }

        let mut candidates: BTreeSet<ItemId> = BTreeSet::new();
        for concept in &all_matched {
            candidates.extend(with_store!(self, store => store.items_discussing(*concept))?);
        }

        let mut hits: Vec<SearchHit> = Vec::new();
        for id in candidates {
            let Some(item) = self.get_item(id)? else {
                continue;
            };
            if item.status != ItemStatus::Active || item.privacy < floor {
                continue;
            }
            let carried: BTreeSet<ConceptId> = self
                .item_concepts(id)?
                .into_iter()
                .map(|(c, _)| c)
                .collect();

            let matched_terms = term_concepts
                .iter()
                .filter(|ids| !ids.is_disjoint(&carried))
                .count() as u64;
            if matched_terms == 0 {
                continue;
            }

            let mut weight: i64 = 0;
            for matched in all_matched.intersection(&carried) {
                for other in &carried {
                    if other != matched {
                        let w = with_store!(self, store => store.cooccurrence(*matched, *other))?;
                        weight = weight.saturating_add(w.value());
                    }
                }
            }

            hits.push(SearchHit {
                item,
                matched_terms,
                weight,
            });
        }

        hits.sort_by(|a, b| {
            b.matched_terms
                .cmp(&a.matched_terms)
                .then(b.weight.cmp(&a.weight))
                .then(b.item.created_at.cmp(&a.item.created_at))
                .then(a.item.id.cmp(&b.item.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    // =========================================================================
    // EXPORT / IMPORT
    // =========================================================================

    /// Export the graph to canonical postcard bytes.
    pub fn export_canonical(&self) -> Result<Vec<u8>, WeftError> {
        with_store!(self, store => export::export_canonical(store))
    }

    /// Export the triple model as N-Triples text.
    pub fn export_ntriples(&self) -> Result<String, WeftError> {
        with_store!(self, store => export::export_ntriples(store))
    }

    /// BLAKE3 digest of the canonical export.
    pub fn canonical_digest(&self) -> Result<String, WeftError> {
        with_store!(self, store => export::canonical_digest(store))
    }

    /// Replace the in-memory store with imported canonical bytes.
    ///
    /// Only supported for the in-memory backend; a persistent database
    /// is its own source of truth.
    pub fn import_canonical(&mut self, data: &[u8]) -> Result<(), WeftError> {
        match &mut self.backend {
            StorageBackend::InMemory(store) => {
                *store = export::import_canonical(data)?;
                Ok(())
            }
            StorageBackend::Persistent(_) => Err(WeftError::Validation(
                "import requires the in-memory backend".to_string(),
            )),
        }
    }

    /// Replace the in-memory store with an imported N-Triples document.
    pub fn import_ntriples(&mut self, text: &str) -> Result<(), WeftError> {
        match &mut self.backend {
            StorageBackend::InMemory(store) => {
                *store = export::import_ntriples(text)?;
                Ok(())
            }
            StorageBackend::Persistent(_) => Err(WeftError::Validation(
                "import requires the in-memory backend".to_string(),
            )),
        }
    }

    /// Canonical snapshot of the current state, for verification.
    pub fn canonical_snapshot(&self) -> Result<CanonicalStore, WeftError> {
        with_store!(self, store => CanonicalStore::from_store(store))
    }
}

// =============================================================================
// TESTS
// =============================================================================
