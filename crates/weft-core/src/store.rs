//! # Local Graph Store
//!
//! The transactional store for items, concepts, and edges, and the
//! privacy state machine. This module implements the `GraphStore` trait
//! and the in-memory backend; the redb backend lives in `storage`.
//!
//! All data structures use `BTreeMap` for deterministic ordering.
//!
//! ## Invariants
//!
//! - `put_item` is atomic: the item, its `discusses` edges, and every
//!   co-occurrence increment land together or not at all.
//! - Co-occurrence weights are keyed by the ordered `(min, max)` concept
//!   pair, so `weight(A, B) == weight(B, A)` holds by construction.
//! - Narrowing privacy while delivered remote copies exist fails with
//!   `InvalidTransition` unless the item is tombstoned first.

use crate::normalize::NormalizedConcept;
use crate::primitives::{
    MAX_AUTHOR_LENGTH, MAX_CONCEPTS_PER_ITEM, MAX_CONTENT_LENGTH, MAX_NODE_ID_LENGTH,
};
use crate::triple::{
    NS_CONCEPT, NS_COOCCUR, NS_EDGE, NS_GRAPH, NS_ITEM, RDF_TYPE, RDFS_LABEL, Term, Triple,
    TriplePattern,
};
use crate::types::{
    AttributionLink, Concept, ConceptId, EdgeWeight, Item, ItemId, ItemStatus, PrivacyLevel,
    WeftError,
};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// OUTCOMES
// =============================================================================

/// Result of a `put_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The item was new.
    Inserted,
    /// An existing item was replaced by a higher revision.
    Revised { previous_revision: u64 },
    /// Same or stale revision: nothing changed (idempotent redelivery).
    Unchanged,
}

/// Result of a privacy-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivacyChange {
    pub previous: PrivacyLevel,
    pub current: PrivacyLevel,
    /// Revision after the change.
    pub revision: u64,
    /// True when the change broadened visibility (triggers sync).
    pub widened: bool,
}

/// Normalize an unordered concept pair to its ordered key.
#[must_use]
pub fn pair_key(a: ConceptId, b: ConceptId) -> (ConceptId, ConceptId) {
    if a <= b { (a, b) } else { (b, a) }
}

// =============================================================================
// GRAPHSTORE TRAIT
// =============================================================================

/// The store contract shared by the in-memory and redb backends.
///
/// All fallible operations return `Result<T, WeftError>` so both backends
/// present uniformly; the in-memory backend cannot actually hit I/O
/// errors but keeps the same signatures.
pub trait GraphStore {
    /// Insert an item with its normalized concepts, atomically.
    ///
    /// Re-putting the same revision is a no-op; a higher revision
    /// replaces content and re-derives all edges (last-writer-wins by
    /// revision, origin authoritative).
    fn put_item(
        &mut self,
        item: Item,
        concepts: &[NormalizedConcept],
    ) -> Result<PutOutcome, WeftError>;

    /// Look up an item by id.
    fn get_item(&self, id: ItemId) -> Result<Option<Item>, WeftError>;

    /// Change an item's privacy level, enforcing the state machine.
    fn set_privacy(&mut self, id: ItemId, level: PrivacyLevel)
    -> Result<PrivacyChange, WeftError>;

    /// Tombstone an item. Idempotent; never physically removes anything.
    fn tombstone(&mut self, id: ItemId) -> Result<(), WeftError>;

    /// Record a confirmed remote delivery URI. Fails on tombstoned items
    /// so late deliveries are surfaced instead of silently mapped.
    fn record_remote_uri(&mut self, id: ItemId, node: &str, uri: &str) -> Result<(), WeftError>;

    /// Look up a concept by id.
    fn get_concept(&self, id: ConceptId) -> Result<Option<Concept>, WeftError>;

    /// All concepts whose normalized label equals the given one, across
    /// domains, in deterministic order.
    fn concepts_by_label(&self, normalized_label: &str) -> Result<Vec<ConceptId>, WeftError>;

    /// Concepts discussed by an item, with edge confidence (basis points).
    fn item_concepts(&self, id: ItemId) -> Result<Vec<(ConceptId, u16)>, WeftError>;

    /// Items discussing a concept, in deterministic order.
    fn items_discussing(&self, concept: ConceptId) -> Result<Vec<ItemId>, WeftError>;

    /// Co-occurrence weight of a concept pair (symmetric).
    fn cooccurrence(&self, a: ConceptId, b: ConceptId) -> Result<EdgeWeight, WeftError>;

    /// Strongest co-occurring partners of a concept, weight-descending,
    /// ties broken by concept id.
    fn co_occurring(
        &self,
        concept: ConceptId,
        limit: usize,
    ) -> Result<Vec<(ConceptId, EdgeWeight)>, WeftError>;

    /// Append an attribution link. Append-only; duplicates are ignored.
    fn add_attribution(&mut self, link: AttributionLink) -> Result<(), WeftError>;

    /// Attribution links whose derived side is the given item.
    fn attributions_for(&self, id: ItemId) -> Result<Vec<AttributionLink>, WeftError>;

    /// Total item count.
    fn item_count(&self) -> Result<usize, WeftError>;

    /// Total concept count.
    fn concept_count(&self) -> Result<usize, WeftError>;

    /// Total co-occurrence edge count (unordered pairs).
    fn edge_count(&self) -> Result<usize, WeftError>;

    /// All items, ordered by id.
    fn items_all(&self) -> Result<Vec<Item>, WeftError>;

    /// All concepts, ordered by id.
    fn concepts_all(&self) -> Result<Vec<Concept>, WeftError>;

    /// All `discusses` edges, ordered.
    fn discusses_all(&self) -> Result<Vec<(ItemId, ConceptId, u16)>, WeftError>;

    /// All co-occurrence edges as ordered pairs.
    fn cooccur_all(&self) -> Result<Vec<(ConceptId, ConceptId, EdgeWeight)>, WeftError>;

    /// All attribution links.
    fn attributions_all(&self) -> Result<Vec<AttributionLink>, WeftError>;

    /// Pattern-match over the RDF-compatible triple view. Each execution
    /// is independent and never mutates store state.
    fn query(&self, pattern: &TriplePattern) -> Result<Vec<Triple>, WeftError>;
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Validate an item and its concept list before any mutation.
pub(crate) fn validate_put(item: &Item, concepts: &[NormalizedConcept]) -> Result<(), WeftError> {
    if item.content.is_empty() {
        return Err(WeftError::Validation("empty item content".to_string()));
    }
    if item.content.len() > MAX_CONTENT_LENGTH {
        return Err(WeftError::Validation(format!(
            "content length {} exceeds maximum {} bytes",
            item.content.len(),
            MAX_CONTENT_LENGTH
        )));
    }
    if item.author.len() > MAX_AUTHOR_LENGTH {
        return Err(WeftError::Validation("author too long".to_string()));
    }
    if item.origin.is_empty() || item.origin.len() > MAX_NODE_ID_LENGTH {
        return Err(WeftError::Validation("invalid origin node id".to_string()));
    }
    if item.revision == 0 {
        return Err(WeftError::Validation("revision must start at 1".to_string()));
    }
    if concepts.len() > MAX_CONCEPTS_PER_ITEM {
        return Err(WeftError::Validation(format!(
            "{} concepts exceeds maximum {} per item",
            concepts.len(),
            MAX_CONCEPTS_PER_ITEM
        )));
    }
    if item.id != ItemId::derive(&item.content) {
        return Err(WeftError::Validation(
            "item id does not match content hash".to_string(),
        ));
    }
    Ok(())
}

/// Deduplicate concepts by id, keeping the highest confidence per id.
pub(crate) fn dedupe_concepts(concepts: &[NormalizedConcept]) -> Vec<NormalizedConcept> {
    let mut by_id: BTreeMap<ConceptId, NormalizedConcept> = BTreeMap::new();
    for concept in concepts {
        by_id
            .entry(concept.id)
            .and_modify(|existing| {
                if concept.confidence_bp > existing.confidence_bp {
                    existing.confidence_bp = concept.confidence_bp;
                }
            })
            .or_insert_with(|| concept.clone());
    }
    by_id.into_values().collect()
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// The in-memory backend. `BTreeMap` exclusively, no `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// Item storage, keyed by content hash.
    items: BTreeMap<ItemId, Item>,
    /// Concept storage.
    concepts: BTreeMap<ConceptId, Concept>,
    /// Normalized label -> concept ids (one label can span domains).
    label_index: BTreeMap<String, BTreeSet<ConceptId>>,
    /// `discusses` edges: item -> concept -> confidence (bp).
    discusses: BTreeMap<ItemId, BTreeMap<ConceptId, u16>>,
    /// Reverse `discusses` index.
    discussed_by: BTreeMap<ConceptId, BTreeSet<ItemId>>,
    /// Co-occurrence weights keyed by ordered pair.
    cooccur: BTreeMap<(ConceptId, ConceptId), EdgeWeight>,
    /// Append-only attribution log, deduplicated.
    attributions: BTreeSet<AttributionLink>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or observe a concept.
    fn upsert_concept(&mut self, normalized: &NormalizedConcept) {
        if let Some(existing) = self.concepts.get_mut(&normalized.id) {
            existing.observe(normalized.confidence_bp);
        } else {
            self.concepts.insert(
                normalized.id,
                Concept::new(
                    normalized.id,
                    normalized.label.clone(),
                    normalized.domain,
                    normalized.confidence_bp,
                ),
            );
            self.label_index
                .entry(normalized.label.clone())
                .or_default()
                .insert(normalized.id);
        }
    }

    /// Detach an item's `discusses` edges and roll back the pairwise
    /// co-occurrence increments they contributed. Used when a higher
    /// revision replaces the item's concept set.
    fn detach_item_edges(&mut self, id: ItemId) {
        let Some(old) = self.discusses.remove(&id) else {
            return;
        };
        let old_ids: Vec<ConceptId> = old.keys().copied().collect();
        for concept in &old_ids {
            if let Some(set) = self.discussed_by.get_mut(concept) {
                set.remove(&id);
                if set.is_empty() {
                    self.discussed_by.remove(concept);
                }
            }
        }
        for (i, a) in old_ids.iter().enumerate() {
            for b in &old_ids[i + 1..] {
                let key = pair_key(*a, *b);
                if let Some(weight) = self.cooccur.get_mut(&key) {
                    *weight = weight.decrement();
                    if weight.value() == 0 {
                        self.cooccur.remove(&key);
                    }
                }
            }
        }
    }

    /// Attach `discusses` edges and increment pairwise co-occurrence.
    fn attach_item_edges(&mut self, id: ItemId, concepts: &[NormalizedConcept]) {
        let mut edge_map = BTreeMap::new();
        for concept in concepts {
            edge_map.insert(concept.id, concept.confidence_bp);
            self.discussed_by.entry(concept.id).or_default().insert(id);
        }
        let ids: Vec<ConceptId> = edge_map.keys().copied().collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                let key = pair_key(*a, *b);
                let current = self.cooccur.get(&key).copied().unwrap_or_default();
                self.cooccur.insert(key, current.increment());
            }
        }
        self.discusses.insert(id, edge_map);
    }

    /// Rebuild a store from its canonical form. Stored weights and
    /// confidence accumulators are taken as-is, never re-derived, so an
    /// exported store reimports to an identical state.
    pub(crate) fn from_canonical(
        canonical: &crate::export::CanonicalStore,
    ) -> Result<Self, WeftError> {
        let mut store = Self::new();
        for cc in &canonical.concepts {
            let concept = Concept {
                id: ConceptId(cc.id),
                label: cc.label.clone(),
                domain: cc.domain,
                mean_confidence_bp: cc.mean_confidence_bp,
                observations: cc.observations,
            };
            store
                .label_index
                .entry(concept.label.clone())
                .or_default()
                .insert(concept.id);
            store.concepts.insert(concept.id, concept);
        }
        for ci in &canonical.items {
            let item = Item::from(ci);
            store.items.insert(item.id, item);
        }
        for edge in &canonical.discusses {
            let item = ItemId(edge.item);
            let concept = ConceptId(edge.concept);
            if !store.items.contains_key(&item) || !store.concepts.contains_key(&concept) {
                return Err(WeftError::Deserialization(
                    "dangling discusses edge".to_string(),
                ));
            }
            store
                .discusses
                .entry(item)
                .or_default()
                .insert(concept, edge.confidence_bp);
            store.discussed_by.entry(concept).or_default().insert(item);
        }
        for pair in &canonical.cooccur {
            if pair.weight < 0 {
                return Err(WeftError::Deserialization(
                    "negative co-occurrence weight".to_string(),
                ));
            }
            if pair.weight == 0 {
                continue;
            }
            let key = pair_key(ConceptId(pair.first), ConceptId(pair.second));
            store.cooccur.insert(key, EdgeWeight::new(pair.weight));
        }
        for link in &canonical.attributions {
            store.attributions.insert(AttributionLink::from(link));
        }
        Ok(store)
    }

    /// Lazy, restartable iterator over the triple view.
    ///
    /// Generated in deterministic order: item triples, edge confidences,
    /// concept triples, co-occurrence pairs (canonical form plus the
    /// derived symmetric `coOccursWith` links), attributions. The
    /// `discusses` links come from [`discusses_triples`] and are chained
    /// in by `query()`; the N-Triples exporter renders them from the
    /// canonical records instead.
    pub fn triples(&self) -> impl Iterator<Item = Triple> + '_ {
        let items = self.items.values().flat_map(item_triples);
        let edges = self.discusses.iter().flat_map(|(item, targets)| {
            targets.iter().map(move |(concept, confidence_bp)| {
                Triple::new(
                    format!("{}{}-{}", NS_EDGE, item, concept),
                    format!("{}confidence", NS_GRAPH),
                    Term::integer(confidence_bp),
                )
            })
        });
        let concepts = self.concepts.values().flat_map(concept_triples);
        let cooccur = self
            .cooccur
            .iter()
            .flat_map(|(&(a, b), &weight)| cooccur_triples(a, b, weight, true));
        let attributions = self.attributions.iter().flat_map(attribution_triples);
        items
            .chain(edges)
            .chain(concepts)
            .chain(cooccur)
            .chain(attributions)
    }
}

// =============================================================================
// TRIPLE VIEW GENERATION
// =============================================================================

/// IRI of an item subject.
#[must_use]
pub fn item_iri(id: ItemId) -> String {
    format!("{}{}", NS_ITEM, id)
}

/// IRI of a concept subject.
#[must_use]
pub fn concept_iri(id: ConceptId) -> String {
    format!("{}{}", NS_CONCEPT, id)
}

/// Vocabulary predicate IRI.
#[must_use]
pub fn predicate(name: &str) -> String {
    format!("{}{}", NS_GRAPH, name)
}

/// Triples describing one item's own fields. The `discusses` links are
/// produced separately by [`discusses_triples`].
pub(crate) fn item_triples(item: &Item) -> Vec<Triple> {
    let s = item_iri(item.id);
    let mut out = vec![
        Triple::new(&s, RDF_TYPE, Term::iri(predicate("Item"))),
        Triple::new(&s, predicate("origin"), Term::literal(&item.origin)),
        Triple::new(&s, predicate("author"), Term::literal(&item.author)),
        Triple::new(&s, predicate("content"), Term::literal(&item.content)),
        Triple::new(&s, predicate("createdAt"), Term::integer(item.created_at)),
        Triple::new(&s, predicate("privacy"), Term::literal(item.privacy.as_str())),
        Triple::new(&s, predicate("status"), Term::literal(item.status.as_str())),
        Triple::new(&s, predicate("revision"), Term::integer(item.revision)),
    ];
    for (node, uri) in &item.remote_uris {
        out.push(Triple::new(
            &s,
            predicate("remote"),
            Term::literal(format!("{}|{}", node, uri)),
        ));
    }
    out
}

/// `discusses` link triples for one item.
fn discusses_triples(item: ItemId, concepts: &BTreeMap<ConceptId, u16>) -> Vec<Triple> {
    concepts
        .keys()
        .map(|concept| {
            Triple::new(
                item_iri(item),
                predicate("discusses"),
                Term::iri(concept_iri(*concept)),
            )
        })
        .collect()
}

/// Triples describing one concept.
pub(crate) fn concept_triples(concept: &Concept) -> Vec<Triple> {
    let s = concept_iri(concept.id);
    vec![
        Triple::new(&s, RDF_TYPE, Term::iri(predicate("Concept"))),
        Triple::new(&s, RDFS_LABEL, Term::literal(&concept.label)),
        Triple::new(&s, predicate("domain"), Term::literal(concept.domain.as_str())),
        Triple::new(
            &s,
            predicate("meanConfidence"),
            Term::integer(concept.mean_confidence_bp),
        ),
        Triple::new(
            &s,
            predicate("observations"),
            Term::integer(concept.observations),
        ),
    ]
}

/// Triples for one co-occurrence pair. The canonical pair node carries
/// the weight; when `derived` is set the symmetric `coOccursWith` links
/// are included for pattern matching (they are regenerated on import,
/// never exported).
pub(crate) fn cooccur_triples(
    a: ConceptId,
    b: ConceptId,
    weight: EdgeWeight,
    derived: bool,
) -> Vec<Triple> {
    let s = format!("{}{}-{}", NS_COOCCUR, a, b);
    let mut out = vec![
        Triple::new(&s, predicate("first"), Term::iri(concept_iri(a))),
        Triple::new(&s, predicate("second"), Term::iri(concept_iri(b))),
        Triple::new(&s, predicate("weight"), Term::integer(weight.value())),
    ];
    if derived {
        out.push(Triple::new(
            concept_iri(a),
            predicate("coOccursWith"),
            Term::iri(concept_iri(b)),
        ));
        out.push(Triple::new(
            concept_iri(b),
            predicate("coOccursWith"),
            Term::iri(concept_iri(a)),
        ));
    }
    out
}

/// Triples for one attribution link. The subject is content-derived so
/// re-importing the same link is a no-op.
pub(crate) fn attribution_triples(link: &AttributionLink) -> Vec<Triple> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&link.derived.0.to_be_bytes());
    hasher.update(&link.source.0.to_be_bytes());
    hasher.update(link.source_node.as_bytes());
    hasher.update(link.kind.as_str().as_bytes());
    hasher.update(&link.recorded_at.to_be_bytes());
    let digest = hasher.finalize();
    let s = format!("{}{}", crate::triple::NS_ATTRIBUTION, digest.to_hex());
    vec![
        Triple::new(&s, predicate("derived"), Term::iri(item_iri(link.derived))),
        Triple::new(&s, predicate("source"), Term::iri(item_iri(link.source))),
        Triple::new(&s, predicate("sourceNode"), Term::literal(&link.source_node)),
        Triple::new(&s, predicate("kind"), Term::literal(link.kind.as_str())),
        Triple::new(&s, predicate("recordedAt"), Term::integer(link.recorded_at)),
    ]
}

// =============================================================================
// GRAPHSTORE IMPLEMENTATION (IN-MEMORY)
// =============================================================================

impl GraphStore for MemoryStore {
    fn put_item(
        &mut self,
        item: Item,
        concepts: &[NormalizedConcept],
    ) -> Result<PutOutcome, WeftError> {
        validate_put(&item, concepts)?;
        let deduped = dedupe_concepts(concepts);

        let outcome = match self.items.get(&item.id) {
            None => PutOutcome::Inserted,
            Some(existing) => {
                if existing.status == ItemStatus::Tombstoned {
                    return Err(WeftError::Validation(
                        "cannot revise a tombstoned item".to_string(),
                    ));
                }
                if item.revision <= existing.revision {
                    return Ok(PutOutcome::Unchanged);
                }
                PutOutcome::Revised {
                    previous_revision: existing.revision,
                }
            }
        };

        // All validation done; mutations below cannot fail.
        let mut stored = item;
        if let Some(existing) = self.items.get(&stored.id) {
            // Delivery mappings are owned by the sync agent; a content
            // revision must not drop them.
            for (node, uri) in &existing.remote_uris {
                stored
                    .remote_uris
                    .entry(node.clone())
                    .or_insert_with(|| uri.clone());
            }
            self.detach_item_edges(stored.id);
        }
        for concept in &deduped {
            self.upsert_concept(concept);
        }
        self.attach_item_edges(stored.id, &deduped);
        self.items.insert(stored.id, stored);
        Ok(outcome)
    }

    fn get_item(&self, id: ItemId) -> Result<Option<Item>, WeftError> {
        Ok(self.items.get(&id).cloned())
    }

    fn set_privacy(
        &mut self,
        id: ItemId,
        level: PrivacyLevel,
    ) -> Result<PrivacyChange, WeftError> {
        let item = self.items.get_mut(&id).ok_or(WeftError::ItemNotFound(id))?;
        let previous = item.privacy;
        if level == previous {
            return Ok(PrivacyChange {
                previous,
                current: level,
                revision: item.revision,
                widened: false,
            });
        }
        if level > previous {
            // Widening a tombstoned item would re-announce dead content.
            if item.status == ItemStatus::Tombstoned {
                return Err(WeftError::Validation(
                    "cannot widen a tombstoned item".to_string(),
                ));
            }
        } else {
            // Narrowing: delivered copies cannot be recalled. The caller
            // must tombstone first to acknowledge that.
            if !item.remote_uris.is_empty() && item.status == ItemStatus::Active {
                return Err(WeftError::InvalidTransition {
                    from: previous,
                    to: level,
                });
            }
        }
        item.privacy = level;
        item.revision = item.revision.saturating_add(1);
        Ok(PrivacyChange {
            previous,
            current: level,
            revision: item.revision,
            widened: level > previous,
        })
    }

    fn tombstone(&mut self, id: ItemId) -> Result<(), WeftError> {
        let item = self.items.get_mut(&id).ok_or(WeftError::ItemNotFound(id))?;
        if item.status == ItemStatus::Tombstoned {
            return Ok(());
        }
        item.status = ItemStatus::Tombstoned;
        item.revision = item.revision.saturating_add(1);
        Ok(())
    }

    fn record_remote_uri(&mut self, id: ItemId, node: &str, uri: &str) -> Result<(), WeftError> {
        let item = self.items.get_mut(&id).ok_or(WeftError::ItemNotFound(id))?;
        if item.status == ItemStatus::Tombstoned {
            return Err(WeftError::Validation(format!(
                "item {} tombstoned before delivery to {} completed",
                id, node
            )));
        }
        item.remote_uris.insert(node.to_string(), uri.to_string());
        Ok(())
    }

    fn get_concept(&self, id: ConceptId) -> Result<Option<Concept>, WeftError> {
        Ok(self.concepts.get(&id).cloned())
    }

    fn concepts_by_label(&self, normalized_label: &str) -> Result<Vec<ConceptId>, WeftError> {
        Ok(self
            .label_index
            .get(normalized_label)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn item_concepts(&self, id: ItemId) -> Result<Vec<(ConceptId, u16)>, WeftError> {
        Ok(self
            .discusses
            .get(&id)
            .map(|m| m.iter().map(|(c, w)| (*c, *w)).collect())
            .unwrap_or_default())
    }

    fn items_discussing(&self, concept: ConceptId) -> Result<Vec<ItemId>, WeftError> {
        Ok(self
            .discussed_by
            .get(&concept)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn cooccurrence(&self, a: ConceptId, b: ConceptId) -> Result<EdgeWeight, WeftError> {
        Ok(self
            .cooccur
            .get(&pair_key(a, b))
            .copied()
            .unwrap_or_default())
    }

    fn co_occurring(
        &self,
        concept: ConceptId,
        limit: usize,
    ) -> Result<Vec<(ConceptId, EdgeWeight)>, WeftError> {
        let mut partners: Vec<(ConceptId, EdgeWeight)> = self
            .cooccur
            .iter()
            .filter_map(|(&(a, b), &weight)| {
                if a == concept {
                    Some((b, weight))
                } else if b == concept {
                    Some((a, weight))
                } else {
                    None
                }
            })
            .collect();
        partners.sort_by(|(ca, wa), (cb, wb)| wb.cmp(wa).then(ca.cmp(cb)));
        partners.truncate(limit);
        Ok(partners)
    }

    fn add_attribution(&mut self, link: AttributionLink) -> Result<(), WeftError> {
        self.attributions.insert(link);
        Ok(())
    }

    fn attributions_for(&self, id: ItemId) -> Result<Vec<AttributionLink>, WeftError> {
        Ok(self
            .attributions
            .iter()
            .filter(|link| link.derived == id)
            .cloned()
            .collect())
    }

    fn item_count(&self) -> Result<usize, WeftError> {
        Ok(self.items.len())
    }

    fn concept_count(&self) -> Result<usize, WeftError> {
        Ok(self.concepts.len())
    }

    fn edge_count(&self) -> Result<usize, WeftError> {
        Ok(self.cooccur.len())
    }

    fn items_all(&self) -> Result<Vec<Item>, WeftError> {
        Ok(self.items.values().cloned().collect())
    }

    fn concepts_all(&self) -> Result<Vec<Concept>, WeftError> {
        Ok(self.concepts.values().cloned().collect())
    }

    fn discusses_all(&self) -> Result<Vec<(ItemId, ConceptId, u16)>, WeftError> {
        Ok(self
            .discusses
            .iter()
            .flat_map(|(item, targets)| {
                targets.iter().map(move |(concept, w)| (*item, *concept, *w))
            })
            .collect())
    }

    fn cooccur_all(&self) -> Result<Vec<(ConceptId, ConceptId, EdgeWeight)>, WeftError> {
        Ok(self
            .cooccur
            .iter()
            .map(|(&(a, b), &weight)| (a, b, weight))
            .collect())
    }

    fn attributions_all(&self) -> Result<Vec<AttributionLink>, WeftError> {
        Ok(self.attributions.iter().cloned().collect())
    }

    fn query(&self, pattern: &TriplePattern) -> Result<Vec<Triple>, WeftError> {
        let mut out: Vec<Triple> = self
            .triples()
            .chain(
                self.discusses
                    .iter()
                    .flat_map(|(item, targets)| discusses_triples(*item, targets)),
            )
            .filter(|t| pattern.matches(t))
            .collect();
        out.sort();
        out.dedup();
        Ok(out)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{RawConcept, normalize};

    fn concept(label: &str, domain: &str, confidence_bp: u16) -> NormalizedConcept {
        normalize(&RawConcept {
            label: label.to_string(),
            domain: domain.to_string(),
            confidence_bp,
        })
        .expect("normalize")
    }

    fn put(store: &mut MemoryStore, content: &str, privacy: PrivacyLevel, labels: &[&str]) -> ItemId {
        let item = Item::new(content, "node-a", "alice", 100, privacy);
        let id = item.id;
        let concepts: Vec<NormalizedConcept> =
            labels.iter().map(|l| concept(l, "cs", 9000)).collect();
        store.put_item(item, &concepts).expect("put");
        id
    }

    #[test]
    fn put_creates_item_edges_and_cooccurrence() {
        let mut store = MemoryStore::new();
        let id = put(
            &mut store,
            "Alice discusses Raft consensus",
            PrivacyLevel::Public,
            &["Raft", "consensus"],
        );

        assert_eq!(store.item_count().expect("count"), 1);
        assert_eq!(store.concept_count().expect("count"), 2);
        assert_eq!(store.edge_count().expect("count"), 1);

        let raft = ConceptId::derive("raft", crate::types::Domain::ComputerScience);
        let consensus = ConceptId::derive("consensus", crate::types::Domain::ComputerScience);
        assert_eq!(
            store.cooccurrence(raft, consensus).expect("weight").value(),
            1
        );
        assert_eq!(store.items_discussing(raft).expect("items"), vec![id]);
    }

    #[test]
    fn cooccurrence_is_symmetric_regardless_of_order() {
        let mut store = MemoryStore::new();
        put(&mut store, "doc one", PrivacyLevel::Local, &["raft", "paxos"]);
        put(&mut store, "doc two", PrivacyLevel::Local, &["paxos", "raft"]);

        let raft = ConceptId::derive("raft", crate::types::Domain::ComputerScience);
        let paxos = ConceptId::derive("paxos", crate::types::Domain::ComputerScience);
        let ab = store.cooccurrence(raft, paxos).expect("weight");
        let ba = store.cooccurrence(paxos, raft).expect("weight");
        assert_eq!(ab, ba);
        assert_eq!(ab.value(), 2);
    }

    #[test]
    fn same_revision_put_is_a_noop() {
        let mut store = MemoryStore::new();
        let item = Item::new("a doc", "node-a", "alice", 10, PrivacyLevel::Local);
        let concepts = vec![concept("raft", "cs", 9000)];
        assert_eq!(
            store.put_item(item.clone(), &concepts).expect("put"),
            PutOutcome::Inserted
        );
        assert_eq!(
            store.put_item(item, &concepts).expect("put"),
            PutOutcome::Unchanged
        );
        assert_eq!(store.item_count().expect("count"), 1);
    }

    #[test]
    fn higher_revision_replaces_edges_and_rolls_back_cooccurrence() {
        let mut store = MemoryStore::new();
        let item = Item::new("evolving doc", "node-a", "alice", 10, PrivacyLevel::Local);
        let id = item.id;
        store
            .put_item(item.clone(), &[concept("raft", "cs", 9000), concept("paxos", "cs", 8000)])
            .expect("put");

        let mut revised = item;
        revised.revision = 2;
        let outcome = store
            .put_item(revised, &[concept("raft", "cs", 9000), concept("zab", "cs", 7000)])
            .expect("put");
        assert_eq!(outcome, PutOutcome::Revised { previous_revision: 1 });

        let raft = ConceptId::derive("raft", crate::types::Domain::ComputerScience);
        let paxos = ConceptId::derive("paxos", crate::types::Domain::ComputerScience);
        let zab = ConceptId::derive("zab", crate::types::Domain::ComputerScience);
        assert_eq!(store.cooccurrence(raft, paxos).expect("w").value(), 0);
        assert_eq!(store.cooccurrence(raft, zab).expect("w").value(), 1);
        assert_eq!(
            store.item_concepts(id).expect("concepts").len(),
            2
        );
    }

    #[test]
    fn widening_bumps_revision() {
        let mut store = MemoryStore::new();
        let id = put(&mut store, "a doc", PrivacyLevel::Local, &["raft"]);
        let change = store.set_privacy(id, PrivacyLevel::Friends).expect("set");
        assert!(change.widened);
        assert_eq!(change.revision, 2);
        assert_eq!(
            store.get_item(id).expect("get").expect("some").privacy,
            PrivacyLevel::Friends
        );
    }

    #[test]
    fn narrowing_without_remote_copies_is_allowed() {
        let mut store = MemoryStore::new();
        let id = put(&mut store, "a doc", PrivacyLevel::Public, &["raft"]);
        let change = store.set_privacy(id, PrivacyLevel::Local).expect("set");
        assert!(!change.widened);
        assert_eq!(change.current, PrivacyLevel::Local);
    }

    #[test]
    fn narrowing_with_remote_copies_requires_tombstone() {
        let mut store = MemoryStore::new();
        let id = put(&mut store, "a doc", PrivacyLevel::Public, &["raft"]);
        store
            .record_remote_uri(id, "node-b", "https://b.example/item/1")
            .expect("record");

        let err = store.set_privacy(id, PrivacyLevel::Local);
        assert!(matches!(err, Err(WeftError::InvalidTransition { .. })));
        // Privacy level unchanged by the failed transition.
        assert_eq!(
            store.get_item(id).expect("get").expect("some").privacy,
            PrivacyLevel::Public
        );

        // After tombstoning, narrowing is acknowledged and allowed.
        store.tombstone(id).expect("tombstone");
        assert!(store.set_privacy(id, PrivacyLevel::Local).is_ok());
    }

    #[test]
    fn same_level_set_privacy_is_a_noop() {
        let mut store = MemoryStore::new();
        let id = put(&mut store, "a doc", PrivacyLevel::Friends, &["raft"]);
        let change = store.set_privacy(id, PrivacyLevel::Friends).expect("set");
        assert!(!change.widened);
        assert_eq!(change.revision, 1);
    }

    #[test]
    fn tombstone_is_idempotent_and_blocks_remote_uri() {
        let mut store = MemoryStore::new();
        let id = put(&mut store, "a doc", PrivacyLevel::Public, &["raft"]);
        store.tombstone(id).expect("tombstone");
        store.tombstone(id).expect("tombstone again");

        let err = store.record_remote_uri(id, "node-b", "https://b.example/x");
        assert!(matches!(err, Err(WeftError::Validation(_))));
    }

    #[test]
    fn attribution_is_append_only_and_deduplicated() {
        let mut store = MemoryStore::new();
        let derived = put(&mut store, "derived doc", PrivacyLevel::Local, &["raft"]);
        let source = put(&mut store, "source doc", PrivacyLevel::Local, &["raft"]);
        let link = AttributionLink {
            derived,
            source,
            source_node: "node-b".to_string(),
            kind: crate::types::ContributionKind::References,
            recorded_at: 50,
        };
        store.add_attribution(link.clone()).expect("add");
        store.add_attribution(link).expect("add twice");
        assert_eq!(store.attributions_for(derived).expect("links").len(), 1);
        assert!(store.attributions_for(source).expect("links").is_empty());
    }

    #[test]
    fn query_matches_discusses_pattern() {
        let mut store = MemoryStore::new();
        let id = put(
            &mut store,
            "Alice discusses Raft consensus",
            PrivacyLevel::Public,
            &["Raft", "consensus"],
        );
        let pattern = TriplePattern::any()
            .with_subject(item_iri(id))
            .with_predicate(predicate("discusses"));
        let matches = store.query(&pattern).expect("query");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn query_does_not_mutate_and_is_restartable() {
        let mut store = MemoryStore::new();
        put(&mut store, "a doc", PrivacyLevel::Local, &["raft"]);
        let pattern = TriplePattern::any();
        let first = store.query(&pattern).expect("query");
        let second = store.query(&pattern).expect("query");
        assert_eq!(first, second);
    }

    #[test]
    fn mismatched_content_hash_is_rejected() {
        let mut store = MemoryStore::new();
        let mut item = Item::new("a doc", "node-a", "alice", 10, PrivacyLevel::Local);
        item.id = ItemId(42);
        assert!(matches!(
            store.put_item(item, &[]),
            Err(WeftError::Validation(_))
        ));
        assert_eq!(store.item_count().expect("count"), 0);
    }

    #[test]
    fn revision_replacement_preserves_remote_mappings() {
        let mut store = MemoryStore::new();
        let item = Item::new("a doc", "node-a", "alice", 10, PrivacyLevel::Public);
        let id = item.id;
        store.put_item(item.clone(), &[]).expect("put");
        store
            .record_remote_uri(id, "hub", "https://hub.example/item/9")
            .expect("record");

        let mut revised = item;
        revised.revision = 3;
        store.put_item(revised, &[]).expect("put");
        let stored = store.get_item(id).expect("get").expect("some");
        assert_eq!(
            stored.remote_uris.get("hub").map(String::as_str),
            Some("https://hub.example/item/9")
        );
    }
}
