//! # redb-backed Graph Storage
//!
//! A disk-backed store using the redb embedded database, providing:
//! - ACID transactions (each `put_item` is a single write transaction)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//! - Zero configuration
//!
//! The label index is kept in memory and rebuilt from the concepts
//! table at open; everything else lives in redb tables keyed by the
//! 128-bit content-derived identifiers.

use crate::normalize::NormalizedConcept;
use crate::store::{GraphStore, MemoryStore, PrivacyChange, PutOutcome, dedupe_concepts, pair_key, validate_put};
use crate::triple::{Triple, TriplePattern};
use crate::types::{
    AttributionLink, Concept, ConceptId, EdgeWeight, Item, ItemId, ItemStatus, PrivacyLevel,
    WeftError,
};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Table for items: ItemId(u128) -> serialized Item bytes
const ITEMS: TableDefinition<u128, &[u8]> = TableDefinition::new("items");

/// Table for concepts: ConceptId(u128) -> serialized Concept bytes
const CONCEPTS: TableDefinition<u128, &[u8]> = TableDefinition::new("concepts");

/// Table for discusses edges: (item, concept) -> confidence (bp)
const DISCUSSES: TableDefinition<(u128, u128), u16> = TableDefinition::new("discusses");

/// Reverse index for discusses edges: (concept, item) -> ()
const DISCUSSED_BY: TableDefinition<(u128, u128), ()> = TableDefinition::new("discussed_by");

/// Table for co-occurrence edges: ordered (first, second) pair -> weight
const COOCCUR: TableDefinition<(u128, u128), i64> = TableDefinition::new("cooccur");

/// Table for attribution links: serialized AttributionLink bytes -> ()
///
/// The link itself is the key, so the append-only log deduplicates for
/// free, matching the in-memory backend.
const ATTRIBUTIONS: TableDefinition<&[u8], ()> = TableDefinition::new("attributions");

fn io_err(e: impl std::fmt::Display) -> WeftError {
    WeftError::Io(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> WeftError {
    WeftError::Serialization(e.to_string())
}

fn de_err(e: impl std::fmt::Display) -> WeftError {
    WeftError::Deserialization(e.to_string())
}

/// A disk-backed graph store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
    /// In-memory label -> concept ids cache, rebuilt at open.
    label_cache: BTreeMap<String, BTreeSet<ConceptId>>,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore")
            .field("label_cache_size", &self.label_cache.len())
            .finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a store database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WeftError> {
        let db = Database::create(path.as_ref()).map_err(io_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(io_err)?;
            let _ = write_txn.open_table(ITEMS).map_err(io_err)?;
            let _ = write_txn.open_table(CONCEPTS).map_err(io_err)?;
            let _ = write_txn.open_table(DISCUSSES).map_err(io_err)?;
            let _ = write_txn.open_table(DISCUSSED_BY).map_err(io_err)?;
            let _ = write_txn.open_table(COOCCUR).map_err(io_err)?;
            let _ = write_txn.open_table(ATTRIBUTIONS).map_err(io_err)?;
            write_txn.commit().map_err(io_err)?;
        }

        // Rebuild the label cache from the concepts table.
        let label_cache = {
            let read_txn = db.begin_read().map_err(io_err)?;
            let table = read_txn.open_table(CONCEPTS).map_err(io_err)?;
            let mut cache: BTreeMap<String, BTreeSet<ConceptId>> = BTreeMap::new();
            for entry in table.iter().map_err(io_err)? {
                let (_, value) = entry.map_err(io_err)?;
                let concept: Concept = postcard::from_bytes(value.value()).map_err(de_err)?;
                cache.entry(concept.label).or_default().insert(concept.id);
            }
            cache
        };

        Ok(Self { db, label_cache })
    }

    /// Compact the database (optional optimization).
    pub fn compact(&mut self) -> Result<(), WeftError> {
        self.db.compact().map_err(io_err)?;
        Ok(())
    }

    fn read_item(&self, id: ItemId) -> Result<Option<Item>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(ITEMS).map_err(io_err)?;
        table
            .get(id.0)
            .map_err(io_err)?
            .map(|data| postcard::from_bytes(data.value()).map_err(de_err))
            .transpose()
    }

    /// Persist a mutated item in its own write transaction.
    fn write_item(&self, item: &Item) -> Result<(), WeftError> {
        let bytes = postcard::to_allocvec(item).map_err(ser_err)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(ITEMS).map_err(io_err)?;
            table.insert(item.id.0, bytes.as_slice()).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    /// Build an in-memory snapshot. Used for the triple view, which the
    /// in-memory backend already knows how to generate.
    pub fn snapshot(&self) -> Result<MemoryStore, WeftError> {
        let canonical = crate::export::CanonicalStore::from_store(self)?;
        MemoryStore::from_canonical(&canonical)
    }
}

impl GraphStore for RedbStore {
    fn put_item(
        &mut self,
        item: Item,
        concepts: &[NormalizedConcept],
    ) -> Result<PutOutcome, WeftError> {
        validate_put(&item, concepts)?;
        let deduped = dedupe_concepts(concepts);

        let mut stored = item;
        let outcome;

        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut items_table = write_txn.open_table(ITEMS).map_err(io_err)?;
            let mut concepts_table = write_txn.open_table(CONCEPTS).map_err(io_err)?;
            let mut discusses_table = write_txn.open_table(DISCUSSES).map_err(io_err)?;
            let mut reverse_table = write_txn.open_table(DISCUSSED_BY).map_err(io_err)?;
            let mut cooccur_table = write_txn.open_table(COOCCUR).map_err(io_err)?;

            let existing: Option<Item> = items_table
                .get(stored.id.0)
                .map_err(io_err)?
                .map(|data| postcard::from_bytes(data.value()).map_err(de_err))
                .transpose()?;

            outcome = match &existing {
                None => PutOutcome::Inserted,
                Some(prior) => {
                    if prior.status == ItemStatus::Tombstoned {
                        return Err(WeftError::Validation(
                            "cannot revise a tombstoned item".to_string(),
                        ));
                    }
                    if stored.revision <= prior.revision {
                        return Ok(PutOutcome::Unchanged);
                    }
                    PutOutcome::Revised {
                        previous_revision: prior.revision,
                    }
                }
            };

            if let Some(prior) = &existing {
                for (node, uri) in &prior.remote_uris {
                    stored
                        .remote_uris
                        .entry(node.clone())
                        .or_insert_with(|| uri.clone());
                }

                // Detach the prior revision's edges and roll back its
                // pairwise co-occurrence increments.
                let mut old_ids: Vec<ConceptId> = Vec::new();
                for entry in discusses_table
                    .range((stored.id.0, u128::MIN)..=(stored.id.0, u128::MAX))
                    .map_err(io_err)?
                {
                    let (key, _) = entry.map_err(io_err)?;
                    old_ids.push(ConceptId(key.value().1));
                }
                for concept in &old_ids {
                    discusses_table
                        .remove((stored.id.0, concept.0))
                        .map_err(io_err)?;
                    reverse_table
                        .remove((concept.0, stored.id.0))
                        .map_err(io_err)?;
                }
                for (i, a) in old_ids.iter().enumerate() {
                    for b in &old_ids[i + 1..] {
                        let key = pair_key(*a, *b);
                        let current = cooccur_table
                            .get((key.0.0, key.1.0))
                            .map_err(io_err)?
                            .map(|v| v.value())
                            .unwrap_or(0);
                        let next = EdgeWeight::new(current).decrement();
                        if next.value() == 0 {
                            cooccur_table.remove((key.0.0, key.1.0)).map_err(io_err)?;
                        } else {
                            cooccur_table
                                .insert((key.0.0, key.1.0), next.value())
                                .map_err(io_err)?;
                        }
                    }
                }
            }

            // Register or observe each concept.
            for normalized in &deduped {
                let updated = match concepts_table.get(normalized.id.0).map_err(io_err)? {
                    Some(data) => {
                        let mut concept: Concept =
                            postcard::from_bytes(data.value()).map_err(de_err)?;
                        concept.observe(normalized.confidence_bp);
                        concept
                    }
                    None => {
                        self.label_cache
                            .entry(normalized.label.clone())
                            .or_default()
                            .insert(normalized.id);
                        Concept::new(
                            normalized.id,
                            normalized.label.clone(),
                            normalized.domain,
                            normalized.confidence_bp,
                        )
                    }
                };
                let bytes = postcard::to_allocvec(&updated).map_err(ser_err)?;
                concepts_table
                    .insert(normalized.id.0, bytes.as_slice())
                    .map_err(io_err)?;
            }

            // Attach discusses edges and pairwise increments.
            for normalized in &deduped {
                discusses_table
                    .insert((stored.id.0, normalized.id.0), normalized.confidence_bp)
                    .map_err(io_err)?;
                reverse_table
                    .insert((normalized.id.0, stored.id.0), ())
                    .map_err(io_err)?;
            }
            for (i, a) in deduped.iter().enumerate() {
                for b in &deduped[i + 1..] {
                    let key = pair_key(a.id, b.id);
                    let current = cooccur_table
                        .get((key.0.0, key.1.0))
                        .map_err(io_err)?
                        .map(|v| v.value())
                        .unwrap_or(0);
                    cooccur_table
                        .insert((key.0.0, key.1.0), EdgeWeight::new(current).increment().value())
                        .map_err(io_err)?;
                }
            }

            let item_bytes = postcard::to_allocvec(&stored).map_err(ser_err)?;
            items_table
                .insert(stored.id.0, item_bytes.as_slice())
                .map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;

        Ok(outcome)
    }

    fn get_item(&self, id: ItemId) -> Result<Option<Item>, WeftError> {
        self.read_item(id)
    }

    fn set_privacy(
        &mut self,
        id: ItemId,
        level: PrivacyLevel,
    ) -> Result<PrivacyChange, WeftError> {
        let mut item = self.read_item(id)?.ok_or(WeftError::ItemNotFound(id))?;
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
            if item.status == ItemStatus::Tombstoned {
                return Err(WeftError::Validation(
                    "cannot widen a tombstoned item".to_string(),
                ));
            }
        } else if !item.remote_uris.is_empty() && item.status == ItemStatus::Active {
            return Err(WeftError::InvalidTransition {
                from: previous,
                to: level,
            });
        }
        item.privacy = level;
        item.revision = item.revision.saturating_add(1);
        self.write_item(&item)?;
        Ok(PrivacyChange {
            previous,
            current: level,
            revision: item.revision,
            widened: level > previous,
        })
    }

    fn tombstone(&mut self, id: ItemId) -> Result<(), WeftError> {
        let mut item = self.read_item(id)?.ok_or(WeftError::ItemNotFound(id))?;
        if item.status == ItemStatus::Tombstoned {
            return Ok(());
        }
        item.status = ItemStatus::Tombstoned;
        item.revision = item.revision.saturating_add(1);
        self.write_item(&item)
    }

    fn record_remote_uri(&mut self, id: ItemId, node: &str, uri: &str) -> Result<(), WeftError> {
        let mut item = self.read_item(id)?.ok_or(WeftError::ItemNotFound(id))?;
        if item.status == ItemStatus::Tombstoned {
            return Err(WeftError::Validation(format!(
                "item {} tombstoned before delivery to {} completed",
                id, node
            )));
        }
        item.remote_uris.insert(node.to_string(), uri.to_string());
        self.write_item(&item)
    }

    fn get_concept(&self, id: ConceptId) -> Result<Option<Concept>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(CONCEPTS).map_err(io_err)?;
        table
            .get(id.0)
            .map_err(io_err)?
            .map(|data| postcard::from_bytes(data.value()).map_err(de_err))
            .transpose()
    }

    fn concepts_by_label(&self, normalized_label: &str) -> Result<Vec<ConceptId>, WeftError> {
        Ok(self
            .label_cache
            .get(normalized_label)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn item_concepts(&self, id: ItemId) -> Result<Vec<(ConceptId, u16)>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DISCUSSES).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table
            .range((id.0, u128::MIN)..=(id.0, u128::MAX))
            .map_err(io_err)?
        {
            let (key, value) = entry.map_err(io_err)?;
            out.push((ConceptId(key.value().1), value.value()));
        }
        Ok(out)
    }

    fn items_discussing(&self, concept: ConceptId) -> Result<Vec<ItemId>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DISCUSSED_BY).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table
            .range((concept.0, u128::MIN)..=(concept.0, u128::MAX))
            .map_err(io_err)?
        {
            let (key, _) = entry.map_err(io_err)?;
            out.push(ItemId(key.value().1));
        }
        Ok(out)
    }

    fn cooccurrence(&self, a: ConceptId, b: ConceptId) -> Result<EdgeWeight, WeftError> {
        let key = pair_key(a, b);
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(COOCCUR).map_err(io_err)?;
        Ok(table
            .get((key.0.0, key.1.0))
            .map_err(io_err)?
            .map(|v| EdgeWeight::new(v.value()))
            .unwrap_or_default())
    }

    fn co_occurring(
        &self,
        concept: ConceptId,
        limit: usize,
    ) -> Result<Vec<(ConceptId, EdgeWeight)>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(COOCCUR).map_err(io_err)?;
        let mut partners: Vec<(ConceptId, EdgeWeight)> = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, value) = entry.map_err(io_err)?;
            let (a, b) = key.value();
            if a == concept.0 {
                partners.push((ConceptId(b), EdgeWeight::new(value.value())));
            } else if b == concept.0 {
                partners.push((ConceptId(a), EdgeWeight::new(value.value())));
            }
        }
        partners.sort_by(|(ca, wa), (cb, wb)| wb.cmp(wa).then(ca.cmp(cb)));
        partners.truncate(limit);
        Ok(partners)
    }

    fn add_attribution(&mut self, link: AttributionLink) -> Result<(), WeftError> {
        let bytes = postcard::to_allocvec(&link).map_err(ser_err)?;
        let write_txn = self.db.begin_write().map_err(io_err)?;
        {
            let mut table = write_txn.open_table(ATTRIBUTIONS).map_err(io_err)?;
            table.insert(bytes.as_slice(), ()).map_err(io_err)?;
        }
        write_txn.commit().map_err(io_err)?;
        Ok(())
    }

    fn attributions_for(&self, id: ItemId) -> Result<Vec<AttributionLink>, WeftError> {
        Ok(self
            .attributions_all()?
            .into_iter()
            .filter(|link| link.derived == id)
            .collect())
    }

    fn item_count(&self) -> Result<usize, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(ITEMS).map_err(io_err)?;
        Ok(table.len().map_err(io_err)? as usize)
    }

    fn concept_count(&self) -> Result<usize, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(CONCEPTS).map_err(io_err)?;
        Ok(table.len().map_err(io_err)? as usize)
    }

    fn edge_count(&self) -> Result<usize, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(COOCCUR).map_err(io_err)?;
        Ok(table.len().map_err(io_err)? as usize)
    }

    fn items_all(&self) -> Result<Vec<Item>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(ITEMS).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            out.push(postcard::from_bytes(value.value()).map_err(de_err)?);
        }
        Ok(out)
    }

    fn concepts_all(&self) -> Result<Vec<Concept>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(CONCEPTS).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (_, value) = entry.map_err(io_err)?;
            out.push(postcard::from_bytes(value.value()).map_err(de_err)?);
        }
        Ok(out)
    }

    fn discusses_all(&self) -> Result<Vec<(ItemId, ConceptId, u16)>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(DISCUSSES).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, value) = entry.map_err(io_err)?;
            let (item, concept) = key.value();
            out.push((ItemId(item), ConceptId(concept), value.value()));
        }
        Ok(out)
    }

    fn cooccur_all(&self) -> Result<Vec<(ConceptId, ConceptId, EdgeWeight)>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(COOCCUR).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, value) = entry.map_err(io_err)?;
            let (a, b) = key.value();
            out.push((ConceptId(a), ConceptId(b), EdgeWeight::new(value.value())));
        }
        Ok(out)
    }

    fn attributions_all(&self) -> Result<Vec<AttributionLink>, WeftError> {
        let read_txn = self.db.begin_read().map_err(io_err)?;
        let table = read_txn.open_table(ATTRIBUTIONS).map_err(io_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(io_err)? {
            let (key, _) = entry.map_err(io_err)?;
            out.push(postcard::from_bytes(key.value()).map_err(de_err)?);
        }
        out.sort();
        Ok(out)
    }

    fn query(&self, pattern: &TriplePattern) -> Result<Vec<Triple>, WeftError> {
        self.snapshot()?.query(pattern)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{RawConcept, normalize};
    use tempfile::tempdir;

    fn concept(label: &str, confidence_bp: u16) -> NormalizedConcept {
        normalize(&RawConcept {
            label: label.to_string(),
            domain: "cs".to_string(),
            confidence_bp,
        })
        .expect("normalize")
    }

    #[test]
    fn put_and_get_roundtrip() {
        let dir = tempdir().expect("tempdir");
        let mut store = RedbStore::open(dir.path().join("graph.redb")).expect("open");

        let item = Item::new("Raft consensus", "node-a", "alice", 10, PrivacyLevel::Public);
        let id = item.id;
        let outcome = store
            .put_item(item, &[concept("raft", 9000), concept("consensus", 8000)])
            .expect("put");
        assert_eq!(outcome, PutOutcome::Inserted);

        let fetched = store.get_item(id).expect("get").expect("some");
        assert_eq!(fetched.content, "Raft consensus");
        assert_eq!(store.item_count().expect("count"), 1);
        assert_eq!(store.concept_count().expect("count"), 2);
        assert_eq!(store.edge_count().expect("count"), 1);
    }

    #[test]
    fn data_persists_across_reopen() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("graph.redb");
        let item = Item::new("durable doc", "node-a", "alice", 10, PrivacyLevel::Local);
        let id = item.id;

        {
            let mut store = RedbStore::open(&path).expect("open");
            store
                .put_item(item, &[concept("raft", 9000)])
                .expect("put");
        }

        let store = RedbStore::open(&path).expect("reopen");
        assert!(store.get_item(id).expect("get").is_some());
        // Label cache is rebuilt from disk.
        let raft = crate::types::ConceptId::derive("raft", crate::types::Domain::ComputerScience);
        assert_eq!(store.concepts_by_label("raft").expect("lookup"), vec![raft]);
    }

    #[test]
    fn privacy_transitions_match_memory_backend() {
        let dir = tempdir().expect("tempdir");
        let mut store = RedbStore::open(dir.path().join("graph.redb")).expect("open");
        let item = Item::new("a doc", "node-a", "alice", 10, PrivacyLevel::Public);
        let id = item.id;
        store.put_item(item, &[]).expect("put");
        store
            .record_remote_uri(id, "node-b", "https://b.example/item/1")
            .expect("record");

        assert!(matches!(
            store.set_privacy(id, PrivacyLevel::Local),
            Err(WeftError::InvalidTransition { .. })
        ));

        store.tombstone(id).expect("tombstone");
        assert!(store.set_privacy(id, PrivacyLevel::Local).is_ok());
    }

    #[test]
    fn revision_replacement_adjusts_cooccurrence() {
        let dir = tempdir().expect("tempdir");
        let mut store = RedbStore::open(dir.path().join("graph.redb")).expect("open");
        let item = Item::new("evolving doc", "node-a", "alice", 10, PrivacyLevel::Local);
        store
            .put_item(item.clone(), &[concept("raft", 9000), concept("paxos", 8000)])
            .expect("put");

        let mut revised = item;
        revised.revision = 2;
        store
            .put_item(revised, &[concept("raft", 9000), concept("zab", 7000)])
            .expect("put");

        let raft = crate::types::ConceptId::derive("raft", crate::types::Domain::ComputerScience);
        let paxos = crate::types::ConceptId::derive("paxos", crate::types::Domain::ComputerScience);
        let zab = crate::types::ConceptId::derive("zab", crate::types::Domain::ComputerScience);
        assert_eq!(store.cooccurrence(raft, paxos).expect("w").value(), 0);
        assert_eq!(store.cooccurrence(raft, zab).expect("w").value(), 1);
    }

    #[test]
    fn snapshot_matches_canonical_export() {
        let dir = tempdir().expect("tempdir");
        let mut store = RedbStore::open(dir.path().join("graph.redb")).expect("open");
        let item = Item::new("a doc", "node-a", "alice", 10, PrivacyLevel::Friends);
        store
            .put_item(item, &[concept("raft", 9000)])
            .expect("put");

        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(
            crate::export::export_canonical(&store).expect("export"),
            crate::export::export_canonical(&snapshot).expect("export")
        );
    }

    #[test]
    fn attributions_deduplicate_on_disk() {
        let dir = tempdir().expect("tempdir");
        let mut store = RedbStore::open(dir.path().join("graph.redb")).expect("open");
        let a = Item::new("doc a", "node-a", "alice", 10, PrivacyLevel::Local);
        let b = Item::new("doc b", "node-a", "bob", 20, PrivacyLevel::Local);
        let (a_id, b_id) = (a.id, b.id);
        store.put_item(a, &[]).expect("put");
        store.put_item(b, &[]).expect("put");

        let link = AttributionLink {
            derived: b_id,
            source: a_id,
            source_node: "node-a".to_string(),
            kind: crate::types::ContributionKind::Quotes,
            recorded_at: 30,
        };
        store.add_attribution(link.clone()).expect("add");
        store.add_attribution(link).expect("add twice");
        assert_eq!(store.attributions_for(b_id).expect("links").len(), 1);
    }
}
