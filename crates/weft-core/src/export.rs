//! # Canonical Export Module
//!
//! Deterministic, bit-exact serialization of the whole graph, in two
//! forms:
//!
//! - **Binary**: a sorted `postcard` stream with a magic/version header
//!   and checksum. This is the source of truth for verification; redb
//!   files are not guaranteed bit-identical across runs.
//! - **Text**: the RDF-compatible model as sorted N-Triples, for
//!   exchange with external tooling. Importing an export yields a store
//!   whose triple view is identical to the original, and importing the
//!   same document twice changes nothing.

use crate::primitives::{
    FORMAT_VERSION, MAGIC_BYTES, MAX_IMPORT_EDGE_COUNT, MAX_IMPORT_ITEM_COUNT,
};
use crate::store::{
    GraphStore, MemoryStore, attribution_triples, concept_triples, cooccur_triples, item_triples,
    pair_key, predicate,
};
use crate::triple::{NS_CONCEPT, NS_COOCCUR, NS_EDGE, NS_GRAPH, NS_ITEM, Term, Triple, parse_ntriples, to_ntriples};
use crate::types::{
    AttributionLink, Concept, ConceptId, ContributionKind, Domain, EdgeWeight, Item, ItemId,
    ItemStatus, PrivacyLevel, WeftError,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// CANONICAL FORMAT
// =============================================================================

/// Header for canonical export files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    /// Magic bytes to identify the format.
    pub magic: [u8; 4],

    /// Format version for compatibility.
    pub version: u8,

    /// Number of items in the export.
    pub item_count: u64,

    /// Number of co-occurrence edges in the export.
    pub edge_count: u64,

    /// Checksum of the data section (XOR-based, deterministic).
    pub checksum: u64,
}

impl CanonicalHeader {
    /// Create a new header with the given counts.
    #[must_use]
    pub fn new(item_count: u64, edge_count: u64, checksum: u64) -> Self {
        Self {
            magic: MAGIC_BYTES,
            version: FORMAT_VERSION,
            item_count,
            edge_count,
            checksum,
        }
    }

    /// Validate the header. Error messages stay generic so the format
    /// details do not leak to whoever supplied a bad file.
    pub fn validate(&self) -> Result<(), WeftError> {
        if self.magic != MAGIC_BYTES {
            return Err(WeftError::Deserialization(
                "invalid file format".to_string(),
            ));
        }
        if self.version != FORMAT_VERSION {
            return Err(WeftError::Deserialization(
                "unsupported file version".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CANONICAL RECORDS (Sorted, Deterministic)
// =============================================================================

/// An item in canonical form. Sorted by id; the remote-URI map is
/// flattened to a sorted vec so the byte stream is order-free.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalItem {
    pub id: u128,
    pub origin: String,
    pub author: String,
    pub content: String,
    pub created_at: u64,
    pub privacy: PrivacyLevel,
    pub status: ItemStatus,
    pub revision: u64,
    pub remote_uris: Vec<(String, String)>,
}

impl From<&Item> for CanonicalItem {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.0,
            origin: item.origin.clone(),
            author: item.author.clone(),
            content: item.content.clone(),
            created_at: item.created_at,
            privacy: item.privacy,
            status: item.status,
            revision: item.revision,
            remote_uris: item
                .remote_uris
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl From<&CanonicalItem> for Item {
    fn from(ci: &CanonicalItem) -> Self {
        Item {
            id: ItemId(ci.id),
            origin: ci.origin.clone(),
            author: ci.author.clone(),
            content: ci.content.clone(),
            created_at: ci.created_at,
            privacy: ci.privacy,
            status: ci.status,
            revision: ci.revision,
            remote_uris: ci.remote_uris.iter().cloned().collect(),
        }
    }
}

/// A concept in canonical form, sorted by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalConcept {
    pub id: u128,
    pub label: String,
    pub domain: Domain,
    pub mean_confidence_bp: u16,
    pub observations: u64,
}

impl From<&Concept> for CanonicalConcept {
    fn from(concept: &Concept) -> Self {
        Self {
            id: concept.id.0,
            label: concept.label.clone(),
            domain: concept.domain,
            mean_confidence_bp: concept.mean_confidence_bp,
            observations: concept.observations,
        }
    }
}

/// A `discusses` edge in canonical form, sorted by (item, concept).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalDiscusses {
    pub item: u128,
    pub concept: u128,
    pub confidence_bp: u16,
}

/// A co-occurrence edge in canonical form. `first <= second` always
/// holds; sorted by (first, second).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalCooccur {
    pub first: u128,
    pub second: u128,
    pub weight: i64,
}

/// An attribution link in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalAttribution {
    pub derived: u128,
    pub source: u128,
    pub source_node: String,
    pub kind: ContributionKind,
    pub recorded_at: u64,
}

impl From<&AttributionLink> for CanonicalAttribution {
    fn from(link: &AttributionLink) -> Self {
        Self {
            derived: link.derived.0,
            source: link.source.0,
            source_node: link.source_node.clone(),
            kind: link.kind,
            recorded_at: link.recorded_at,
        }
    }
}

impl From<&CanonicalAttribution> for AttributionLink {
    fn from(ca: &CanonicalAttribution) -> Self {
        AttributionLink {
            derived: ItemId(ca.derived),
            source: ItemId(ca.source),
            source_node: ca.source_node.clone(),
            kind: ca.kind,
            recorded_at: ca.recorded_at,
        }
    }
}

// =============================================================================
// CANONICAL STORE (Sorted, Deterministic)
// =============================================================================

/// The whole graph in canonical form for bit-exact serialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CanonicalStore {
    /// Items sorted by id.
    pub items: Vec<CanonicalItem>,

    /// Concepts sorted by id.
    pub concepts: Vec<CanonicalConcept>,

    /// Discusses edges sorted by (item, concept).
    pub discusses: Vec<CanonicalDiscusses>,

    /// Co-occurrence edges sorted by (first, second).
    pub cooccur: Vec<CanonicalCooccur>,

    /// Attribution links, sorted.
    pub attributions: Vec<CanonicalAttribution>,
}

/// Fold a u128 identifier into the 64-bit checksum space.
const fn fold_id(id: u128) -> u64 {
    (id as u64) ^ ((id >> 64) as u64)
}

/// XOR a string's bytes into the hash at a given rotation.
fn mix_str(hash: &mut u64, s: &str, rot: u32) {
    for byte in s.as_bytes() {
        *hash ^= (*byte as u64).rotate_left(rot);
    }
}

impl CanonicalStore {
    /// Snapshot a store into canonical form, sorting every section.
    pub fn from_store<G: GraphStore>(store: &G) -> Result<Self, WeftError> {
        let mut items: Vec<CanonicalItem> = store
            .items_all()?
            .iter()
            .map(CanonicalItem::from)
            .collect();
        items.sort();

        let mut concepts: Vec<CanonicalConcept> = store
            .concepts_all()?
            .iter()
            .map(CanonicalConcept::from)
            .collect();
        concepts.sort();

        let mut discusses: Vec<CanonicalDiscusses> = store
            .discusses_all()?
            .into_iter()
            .map(|(item, concept, confidence_bp)| CanonicalDiscusses {
                item: item.0,
                concept: concept.0,
                confidence_bp,
            })
            .collect();
        discusses.sort();

        let mut cooccur: Vec<CanonicalCooccur> = store
            .cooccur_all()?
            .into_iter()
            .map(|(a, b, weight)| CanonicalCooccur {
                first: a.0,
                second: b.0,
                weight: weight.value(),
            })
            .collect();
        cooccur.sort();

        let mut attributions: Vec<CanonicalAttribution> = store
            .attributions_all()?
            .iter()
            .map(CanonicalAttribution::from)
            .collect();
        attributions.sort();

        Ok(Self {
            items,
            concepts,
            discusses,
            cooccur,
            attributions,
        })
    }

    /// Compute a deterministic checksum of the data.
    ///
    /// XOR-based, integer-only. This detects accidental corruption and
    /// verifies export/import integrity; it is NOT collision-resistant.
    /// Use [`canonical_digest`] for a cryptographic hash.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hash: u64 = 0;

        for item in &self.items {
            hash ^= fold_id(item.id).rotate_left(13);
            hash ^= item.created_at.rotate_left(7);
            hash ^= item.revision.rotate_left(3);
            mix_str(&mut hash, &item.content, 23);
            mix_str(&mut hash, &item.origin, 29);
        }
        for concept in &self.concepts {
            hash ^= fold_id(concept.id).rotate_left(17);
            hash ^= concept.observations.rotate_left(11);
            mix_str(&mut hash, &concept.label, 31);
        }
        for edge in &self.discusses {
            hash ^= fold_id(edge.item).rotate_left(19);
            hash ^= fold_id(edge.concept).rotate_left(5);
            hash ^= u64::from(edge.confidence_bp).rotate_left(37);
        }
        for pair in &self.cooccur {
            hash ^= fold_id(pair.first).rotate_left(41);
            hash ^= fold_id(pair.second).rotate_left(43);
            hash ^= (pair.weight as u64).rotate_left(47);
        }
        for link in &self.attributions {
            hash ^= fold_id(link.derived).rotate_left(53);
            hash ^= fold_id(link.source).rotate_left(59);
            mix_str(&mut hash, &link.source_node, 61);
        }

        hash
    }
}

// =============================================================================
// BINARY EXPORT / IMPORT
// =============================================================================

/// Export a store to canonical postcard format.
///
/// Format:
/// ```text
/// [header_len: u32 LE] [CanonicalHeader (postcard)] [CanonicalStore (postcard)]
/// ```
pub fn export_canonical<G: GraphStore>(store: &G) -> Result<Vec<u8>, WeftError> {
    let canonical = CanonicalStore::from_store(store)?;
    let checksum = canonical.checksum();

    let header = CanonicalHeader::new(
        canonical.items.len() as u64,
        canonical.cooccur.len() as u64,
        checksum,
    );

    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| WeftError::Serialization(format!("header: {}", e)))?;
    let data_bytes = postcard::to_allocvec(&canonical)
        .map_err(|e| WeftError::Serialization(format!("data: {}", e)))?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);

    Ok(result)
}

/// Import a store from canonical postcard format.
pub fn import_canonical(data: &[u8]) -> Result<MemoryStore, WeftError> {
    if data.len() < 4 {
        return Err(WeftError::Deserialization("data too short".to_string()));
    }

    let header_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() < 4 + header_len {
        return Err(WeftError::Deserialization(
            "data too short for header".to_string(),
        ));
    }

    let header: CanonicalHeader = postcard::from_bytes(&data[4..4 + header_len])
        .map_err(|e| WeftError::Deserialization(format!("header: {}", e)))?;
    header.validate()?;

    // Size limits are checked before deserializing the data section so a
    // hostile header cannot drive memory exhaustion.
    if header.item_count > MAX_IMPORT_ITEM_COUNT {
        return Err(WeftError::Deserialization(format!(
            "item count {} exceeds maximum allowed {}",
            header.item_count, MAX_IMPORT_ITEM_COUNT
        )));
    }
    if header.edge_count > MAX_IMPORT_EDGE_COUNT {
        return Err(WeftError::Deserialization(format!(
            "edge count {} exceeds maximum allowed {}",
            header.edge_count, MAX_IMPORT_EDGE_COUNT
        )));
    }

    let canonical: CanonicalStore = postcard::from_bytes(&data[4 + header_len..])
        .map_err(|e| WeftError::Deserialization(format!("data: {}", e)))?;

    if canonical.checksum() != header.checksum {
        return Err(WeftError::Deserialization(format!(
            "checksum mismatch: expected {}, got {}",
            header.checksum,
            canonical.checksum()
        )));
    }
    if canonical.items.len() as u64 != header.item_count {
        return Err(WeftError::Deserialization(
            "item count mismatch".to_string(),
        ));
    }
    if canonical.cooccur.len() as u64 != header.edge_count {
        return Err(WeftError::Deserialization(
            "edge count mismatch".to_string(),
        ));
    }

    MemoryStore::from_canonical(&canonical)
}

/// Verify a store against its canonical export.
pub fn verify_canonical<G: GraphStore>(store: &G, canonical_data: &[u8]) -> Result<bool, WeftError> {
    let imported = import_canonical(canonical_data)?;
    if store.item_count()? != imported.item_count()? {
        return Ok(false);
    }
    if store.edge_count()? != imported.edge_count()? {
        return Ok(false);
    }
    let original = CanonicalStore::from_store(store)?;
    let reimported = CanonicalStore::from_store(&imported)?;
    Ok(original == reimported)
}

/// Compute the canonical checksum of a store.
pub fn canonical_checksum<G: GraphStore>(store: &G) -> Result<u64, WeftError> {
    Ok(CanonicalStore::from_store(store)?.checksum())
}

/// BLAKE3 hash of the canonical export bytes, hex-encoded.
///
/// Collision-resistant counterpart to the XOR checksum, for comparing
/// node state across the network.
pub fn canonical_digest<G: GraphStore>(store: &G) -> Result<String, WeftError> {
    let data = export_canonical(store)?;
    Ok(blake3::hash(&data).to_hex().to_string())
}

// =============================================================================
// N-TRIPLES EXPORT / IMPORT
// =============================================================================

/// Export the canonical triple model as sorted N-Triples text.
///
/// The derived `coOccursWith` convenience links are view-only and do not
/// appear here; they are regenerated from the pair records on import.
pub fn export_ntriples<G: GraphStore>(store: &G) -> Result<String, WeftError> {
    let canonical = CanonicalStore::from_store(store)?;
    let mut triples: Vec<Triple> = Vec::new();

    for ci in &canonical.items {
        triples.extend(item_triples(&Item::from(ci)));
    }
    for edge in &canonical.discusses {
        triples.push(Triple::new(
            format!("{}{}-{}", NS_EDGE, ItemId(edge.item), ConceptId(edge.concept)),
            predicate("confidence"),
            Term::integer(edge.confidence_bp),
        ));
        triples.push(Triple::new(
            format!("{}{}", NS_ITEM, ItemId(edge.item)),
            predicate("discusses"),
            Term::iri(format!("{}{}", NS_CONCEPT, ConceptId(edge.concept))),
        ));
    }
    for cc in &canonical.concepts {
        triples.extend(concept_triples(&Concept {
            id: ConceptId(cc.id),
            label: cc.label.clone(),
            domain: cc.domain,
            mean_confidence_bp: cc.mean_confidence_bp,
            observations: cc.observations,
        }));
    }
    for pair in &canonical.cooccur {
        triples.extend(cooccur_triples(
            ConceptId(pair.first),
            ConceptId(pair.second),
            EdgeWeight::new(pair.weight),
            false,
        ));
    }
    for link in &canonical.attributions {
        triples.extend(attribution_triples(&AttributionLink::from(link)));
    }

    Ok(to_ntriples(&triples))
}

/// Partially assembled item during N-Triples import.
#[derive(Debug, Default)]
struct ItemFields {
    origin: Option<String>,
    author: Option<String>,
    content: Option<String>,
    created_at: Option<u64>,
    privacy: Option<PrivacyLevel>,
    status: Option<ItemStatus>,
    revision: Option<u64>,
    remote_uris: BTreeMap<String, String>,
}

/// Partially assembled concept during N-Triples import.
#[derive(Debug, Default)]
struct ConceptFields {
    label: Option<String>,
    domain: Option<Domain>,
    mean_confidence_bp: Option<u16>,
    observations: Option<u64>,
}

/// Partially assembled attribution during N-Triples import.
#[derive(Debug, Default)]
struct AttributionFields {
    derived: Option<ItemId>,
    source: Option<ItemId>,
    source_node: Option<String>,
    kind: Option<ContributionKind>,
    recorded_at: Option<u64>,
}

fn literal_value(term: &Term) -> Result<&str, WeftError> {
    match term {
        Term::Literal { value, .. } => Ok(value),
        Term::Iri(_) => Err(WeftError::Deserialization(
            "expected literal object".to_string(),
        )),
    }
}

fn integer_value<T: std::str::FromStr>(term: &Term) -> Result<T, WeftError> {
    literal_value(term)?
        .parse()
        .map_err(|_| WeftError::Deserialization("malformed integer literal".to_string()))
}

fn iri_value(term: &Term) -> Result<&str, WeftError> {
    match term {
        Term::Iri(iri) => Ok(iri),
        Term::Literal { .. } => Err(WeftError::Deserialization(
            "expected IRI object".to_string(),
        )),
    }
}

fn parse_item_subject(iri: &str) -> Result<ItemId, WeftError> {
    iri.strip_prefix(NS_ITEM)
        .and_then(ItemId::parse)
        .ok_or_else(|| WeftError::Deserialization(format!("malformed item IRI: {}", iri)))
}

fn parse_concept_subject(iri: &str) -> Result<ConceptId, WeftError> {
    iri.strip_prefix(NS_CONCEPT)
        .and_then(ConceptId::parse)
        .ok_or_else(|| WeftError::Deserialization(format!("malformed concept IRI: {}", iri)))
}

/// Reconstruct a store from N-Triples text produced by
/// [`export_ntriples`].
///
/// Re-importing the same document into the same model yields an
/// identical store, so import is idempotent.
pub fn import_ntriples(text: &str) -> Result<MemoryStore, WeftError> {
    let triples = parse_ntriples(text)?;

    let mut items: BTreeMap<ItemId, ItemFields> = BTreeMap::new();
    let mut concepts: BTreeMap<ConceptId, ConceptFields> = BTreeMap::new();
    let mut discusses: BTreeMap<(ItemId, ConceptId), u16> = BTreeMap::new();
    let mut cooccur: BTreeMap<String, (Option<ConceptId>, Option<ConceptId>, Option<i64>)> =
        BTreeMap::new();
    let mut attributions: BTreeMap<String, AttributionFields> = BTreeMap::new();

    for triple in &triples {
        let pred = triple
            .predicate
            .strip_prefix(NS_GRAPH)
            .unwrap_or(&triple.predicate);

        if let Some(rest) = triple.subject.strip_prefix(NS_ITEM) {
            let id = ItemId::parse(rest).ok_or_else(|| {
                WeftError::Deserialization(format!("malformed item IRI: {}", triple.subject))
            })?;
            let fields = items.entry(id).or_default();
            match pred {
                "origin" => fields.origin = Some(literal_value(&triple.object)?.to_string()),
                "author" => fields.author = Some(literal_value(&triple.object)?.to_string()),
                "content" => fields.content = Some(literal_value(&triple.object)?.to_string()),
                "createdAt" => fields.created_at = Some(integer_value(&triple.object)?),
                "revision" => fields.revision = Some(integer_value(&triple.object)?),
                "privacy" => {
                    fields.privacy = Some(
                        PrivacyLevel::parse(literal_value(&triple.object)?).ok_or_else(|| {
                            WeftError::Deserialization("unknown privacy level".to_string())
                        })?,
                    );
                }
                "status" => {
                    fields.status = Some(
                        ItemStatus::parse(literal_value(&triple.object)?).ok_or_else(|| {
                            WeftError::Deserialization("unknown item status".to_string())
                        })?,
                    );
                }
                "remote" => {
                    let raw = literal_value(&triple.object)?;
                    let (node, uri) = raw.split_once('|').ok_or_else(|| {
                        WeftError::Deserialization("malformed remote mapping".to_string())
                    })?;
                    fields.remote_uris.insert(node.to_string(), uri.to_string());
                }
                // rdf:type and discusses carry no item state.
                _ => {}
            }
        } else if let Some(rest) = triple.subject.strip_prefix(NS_CONCEPT) {
            let id = ConceptId::parse(rest).ok_or_else(|| {
                WeftError::Deserialization(format!("malformed concept IRI: {}", triple.subject))
            })?;
            let fields = concepts.entry(id).or_default();
            match pred {
                "domain" => {
                    fields.domain = Some(
                        Domain::parse(literal_value(&triple.object)?).ok_or_else(|| {
                            WeftError::Deserialization("unknown domain".to_string())
                        })?,
                    );
                }
                "meanConfidence" => fields.mean_confidence_bp = Some(integer_value(&triple.object)?),
                "observations" => fields.observations = Some(integer_value(&triple.object)?),
                _ => {
                    if triple.predicate == crate::triple::RDFS_LABEL {
                        fields.label = Some(literal_value(&triple.object)?.to_string());
                    }
                }
            }
        } else if let Some(rest) = triple.subject.strip_prefix(NS_EDGE) {
            if pred == "confidence" {
                let (item_hex, concept_hex) = rest.split_at_checked(32).ok_or_else(|| {
                    WeftError::Deserialization("malformed edge IRI".to_string())
                })?;
                let concept_hex = concept_hex.strip_prefix('-').ok_or_else(|| {
                    WeftError::Deserialization("malformed edge IRI".to_string())
                })?;
                let item = ItemId::parse(item_hex).ok_or_else(|| {
                    WeftError::Deserialization("malformed edge IRI".to_string())
                })?;
                let concept = ConceptId::parse(concept_hex).ok_or_else(|| {
                    WeftError::Deserialization("malformed edge IRI".to_string())
                })?;
                discusses.insert((item, concept), integer_value(&triple.object)?);
            }
        } else if triple.subject.strip_prefix(NS_COOCCUR).is_some() {
            let entry = cooccur.entry(triple.subject.clone()).or_default();
            match pred {
                "first" => entry.0 = Some(parse_concept_subject(iri_value(&triple.object)?)?),
                "second" => entry.1 = Some(parse_concept_subject(iri_value(&triple.object)?)?),
                "weight" => entry.2 = Some(integer_value(&triple.object)?),
                _ => {}
            }
        } else if triple.subject.strip_prefix(crate::triple::NS_ATTRIBUTION).is_some() {
            let fields = attributions.entry(triple.subject.clone()).or_default();
            match pred {
                "derived" => fields.derived = Some(parse_item_subject(iri_value(&triple.object)?)?),
                "source" => fields.source = Some(parse_item_subject(iri_value(&triple.object)?)?),
                "sourceNode" => {
                    fields.source_node = Some(literal_value(&triple.object)?.to_string());
                }
                "kind" => {
                    fields.kind = Some(
                        ContributionKind::parse(literal_value(&triple.object)?).ok_or_else(
                            || WeftError::Deserialization("unknown contribution kind".to_string()),
                        )?,
                    );
                }
                "recordedAt" => fields.recorded_at = Some(integer_value(&triple.object)?),
                _ => {}
            }
        }
        // Subjects outside the vocabulary namespaces are ignored.
    }

    let mut canonical = CanonicalStore::default();

    for (id, fields) in items {
        let missing = || WeftError::Deserialization(format!("incomplete item record: {}", id));
        canonical.items.push(CanonicalItem {
            id: id.0,
            origin: fields.origin.ok_or_else(missing)?,
            author: fields.author.ok_or_else(missing)?,
            content: fields.content.ok_or_else(missing)?,
            created_at: fields.created_at.ok_or_else(missing)?,
            privacy: fields.privacy.ok_or_else(missing)?,
            status: fields.status.ok_or_else(missing)?,
            revision: fields.revision.ok_or_else(missing)?,
            remote_uris: fields.remote_uris.into_iter().collect(),
        });
    }
    for (id, fields) in concepts {
        let missing = || WeftError::Deserialization(format!("incomplete concept record: {}", id));
        canonical.concepts.push(CanonicalConcept {
            id: id.0,
            label: fields.label.ok_or_else(missing)?,
            domain: fields.domain.ok_or_else(missing)?,
            mean_confidence_bp: fields.mean_confidence_bp.ok_or_else(missing)?,
            observations: fields.observations.ok_or_else(missing)?,
        });
    }
    for ((item, concept), confidence_bp) in discusses {
        canonical.discusses.push(CanonicalDiscusses {
            item: item.0,
            concept: concept.0,
            confidence_bp,
        });
    }
    for (subject, (first, second, weight)) in cooccur {
        let missing =
            || WeftError::Deserialization(format!("incomplete co-occurrence record: {}", subject));
        let (a, b) = pair_key(first.ok_or_else(missing)?, second.ok_or_else(missing)?);
        canonical.cooccur.push(CanonicalCooccur {
            first: a.0,
            second: b.0,
            weight: weight.ok_or_else(missing)?,
        });
    }
    for (subject, fields) in attributions {
        let missing =
            || WeftError::Deserialization(format!("incomplete attribution record: {}", subject));
        canonical.attributions.push(CanonicalAttribution {
            derived: fields.derived.ok_or_else(missing)?.0,
            source: fields.source.ok_or_else(missing)?.0,
            source_node: fields.source_node.ok_or_else(missing)?,
            kind: fields.kind.ok_or_else(missing)?,
            recorded_at: fields.recorded_at.ok_or_else(missing)?,
        });
    }
    canonical.attributions.sort();
    canonical.cooccur.sort();

    MemoryStore::from_canonical(&canonical)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{NormalizedConcept, RawConcept, normalize};

    fn norm(label: &str, domain: &str, confidence_bp: u16) -> NormalizedConcept {
        normalize(&RawConcept {
            label: label.to_string(),
            domain: domain.to_string(),
            confidence_bp,
        })
        .expect("normalize")
    }

    fn create_test_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        let a = Item::new(
            "Raft is a consensus protocol",
            "node-a",
            "alice",
            100,
            PrivacyLevel::Public,
        );
        let a_id = a.id;
        store
            .put_item(a, &[norm("Raft", "algorithm", 9500), norm("consensus", "cs", 8000)])
            .expect("put");

        let b = Item::new(
            "Paxos predates Raft",
            "node-a",
            "bob",
            200,
            PrivacyLevel::Friends,
        );
        let b_id = b.id;
        store
            .put_item(b, &[norm("Paxos", "algorithm", 9000), norm("Raft", "algorithm", 9100)])
            .expect("put");

        store
            .record_remote_uri(a_id, "node-b", "https://b.example/item/1")
            .expect("record");
        store
            .add_attribution(AttributionLink {
                derived: b_id,
                source: a_id,
                source_node: "node-a".to_string(),
                kind: ContributionKind::References,
                recorded_at: 250,
            })
            .expect("add");
        store
    }

    #[test]
    fn canonical_roundtrip_preserves_everything() {
        let store = create_test_store();

        let exported = export_canonical(&store).expect("export");
        let imported = import_canonical(&exported).expect("import");

        assert_eq!(
            CanonicalStore::from_store(&store).expect("canon"),
            CanonicalStore::from_store(&imported).expect("canon")
        );
    }

    #[test]
    fn canonical_export_is_bit_identical() {
        let store = create_test_store();
        let export1 = export_canonical(&store).expect("export 1");
        let export2 = export_canonical(&store).expect("export 2");
        assert_eq!(export1, export2);
    }

    #[test]
    fn import_is_idempotent() {
        let store = create_test_store();
        let exported = export_canonical(&store).expect("export");

        let once = import_canonical(&exported).expect("import");
        let reexported = export_canonical(&once).expect("re-export");
        let twice = import_canonical(&reexported).expect("re-import");

        assert_eq!(exported, reexported);
        assert_eq!(
            once.item_count().expect("count"),
            twice.item_count().expect("count")
        );
    }

    #[test]
    fn verify_canonical_detects_corruption() {
        let store = create_test_store();
        let mut exported = export_canonical(&store).expect("export");
        if let Some(last) = exported.last_mut() {
            *last ^= 0xFF;
        }
        assert!(import_canonical(&exported).is_err());
    }

    #[test]
    fn verify_canonical_success() {
        let store = create_test_store();
        let exported = export_canonical(&store).expect("export");
        assert!(verify_canonical(&store, &exported).expect("verify"));
    }

    #[test]
    fn corrupted_import_empty_and_short_data() {
        assert!(import_canonical(&[]).is_err());
        assert!(import_canonical(&[0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn corrupted_import_invalid_magic() {
        let store = create_test_store();
        let mut exported = export_canonical(&store).expect("export");
        exported[4] = 0xFF;
        exported[5] = 0xFF;
        assert!(import_canonical(&exported).is_err());
    }

    #[test]
    fn corrupted_import_excessive_item_count() {
        let header = CanonicalHeader {
            magic: MAGIC_BYTES,
            version: FORMAT_VERSION,
            item_count: MAX_IMPORT_ITEM_COUNT + 1,
            edge_count: 0,
            checksum: 0,
        };
        let header_bytes = postcard::to_allocvec(&header).expect("serialize");
        let mut data = Vec::new();
        data.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        data.extend_from_slice(&header_bytes);
        data.extend_from_slice(&[0u8; 10]);

        let err = import_canonical(&data).expect_err("limit");
        assert!(format!("{}", err).contains("exceeds maximum"));
    }

    #[test]
    fn header_validation_rejects_bad_version() {
        let header = CanonicalHeader {
            magic: MAGIC_BYTES,
            version: 99,
            item_count: 0,
            edge_count: 0,
            checksum: 0,
        };
        assert!(header.validate().is_err());
    }

    #[test]
    fn checksum_changes_with_data() {
        let store1 = create_test_store();
        let mut store2 = create_test_store();
        let extra = Item::new("A third item", "node-a", "carol", 300, PrivacyLevel::Local);
        store2.put_item(extra, &[]).expect("put");

        assert_ne!(
            canonical_checksum(&store1).expect("sum"),
            canonical_checksum(&store2).expect("sum")
        );
    }

    #[test]
    fn canonical_digest_is_stable() {
        let store = create_test_store();
        let d1 = canonical_digest(&store).expect("digest");
        let d2 = canonical_digest(&store).expect("digest");
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
    }

    #[test]
    fn ntriples_roundtrip_preserves_triple_view() {
        let store = create_test_store();
        let text = export_ntriples(&store).expect("export");
        let imported = import_ntriples(&text).expect("import");

        let original_view = store
            .query(&crate::triple::TriplePattern::any())
            .expect("query");
        let imported_view = imported
            .query(&crate::triple::TriplePattern::any())
            .expect("query");
        assert_eq!(original_view, imported_view);
    }

    #[test]
    fn ntriples_import_is_idempotent() {
        let store = create_test_store();
        let text = export_ntriples(&store).expect("export");
        let once = import_ntriples(&text).expect("import");
        let text_again = export_ntriples(&once).expect("re-export");
        assert_eq!(text, text_again);
    }

    #[test]
    fn ntriples_import_rejects_incomplete_item() {
        let text = format!(
            "<{}{}> <{}origin> \"node-a\" .\n",
            NS_ITEM,
            ItemId::derive("orphan"),
            NS_GRAPH
        );
        assert!(import_ntriples(&text).is_err());
    }

    #[test]
    fn empty_store_roundtrips() {
        let store = MemoryStore::new();
        let exported = export_canonical(&store).expect("export");
        let imported = import_canonical(&exported).expect("import");
        assert_eq!(imported.item_count().expect("count"), 0);

        let text = export_ntriples(&store).expect("export");
        let imported = import_ntriples(&text).expect("import");
        assert_eq!(imported.item_count().expect("count"), 0);
    }
}
