//! # Sync Agent
//!
//! Retryable delivery of shared items to peers. One FIFO worker task
//! per peer, fed by an unbounded channel, so a slow peer never blocks
//! the others and local publishes never wait on the network.
//!
//! Workers snapshot the item under a short read guard, drop the guard,
//! then deliver. Transient failures back off exponentially (doubling
//! from the configured base, capped) until the attempt budget is spent
//! and the job goes terminal `Failed`; failed jobs can be re-queued
//! manually. Tombstoning cancels queued jobs; an in-flight delivery
//! that completes after cancellation keeps the remote ack but its URI
//! mapping is discarded and logged for manual cleanup.

use super::client::PeerTransport;
use super::envelope::{self, PayloadCipher, WireConcept};
use super::peer::FederationPeer;
use crate::config::SyncSection;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, mpsc};
use weft_core::{ItemId, ItemStatus, PrivacyLevel, Session};

// =============================================================================
// JOB STATE
// =============================================================================

/// Lifecycle of one delivery job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Queued,
    InFlight,
    Acked,
    Failed,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::Acked => "acked",
            Self::Failed => "failed",
        }
    }
}

/// One item-to-peer delivery, tracked on the status board.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub item: ItemId,
    pub peer: String,
    pub revision: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub state: SyncState,
}

type Board = Arc<RwLock<BTreeMap<(String, ItemId), SyncJob>>>;

// =============================================================================
// SYNC AGENT
// =============================================================================

/// Per-peer delivery queues plus the shared status board.
pub struct SyncAgent {
    node_id: String,
    policy: SyncSection,
    session: Arc<RwLock<Session>>,
    peers: Arc<RwLock<BTreeMap<String, FederationPeer>>>,
    transport: Arc<dyn PeerTransport>,
    cipher: Arc<dyn PayloadCipher>,
    workers: Mutex<BTreeMap<String, mpsc::UnboundedSender<ItemId>>>,
    board: Board,
    cancelled: Arc<RwLock<BTreeSet<ItemId>>>,
}

impl SyncAgent {
    pub fn new(
        node_id: String,
        policy: SyncSection,
        session: Arc<RwLock<Session>>,
        peers: Arc<RwLock<BTreeMap<String, FederationPeer>>>,
        transport: Arc<dyn PeerTransport>,
        cipher: Arc<dyn PayloadCipher>,
    ) -> Self {
        Self {
            node_id,
            policy,
            session,
            peers,
            transport,
            cipher,
            workers: Mutex::new(BTreeMap::new()),
            board: Arc::new(RwLock::new(BTreeMap::new())),
            cancelled: Arc::new(RwLock::new(BTreeSet::new())),
        }
    }

    /// Enqueue delivery jobs for an item according to its privacy level.
    /// Returns the number of jobs created. `Local` items create none.
    pub async fn enqueue(&self, id: ItemId) -> usize {
        let privacy = {
            let session = self.session.read().await;
            match session.get_item(id) {
                Ok(Some(item)) if item.status == ItemStatus::Active => item.privacy,
                _ => return 0,
            }
        };
        if privacy == PrivacyLevel::Local {
            return 0;
        }

        let targets: Vec<FederationPeer> = {
            let peers = self.peers.read().await;
            peers
                .values()
                .filter(|p| p.accepts(privacy))
                .cloned()
                .collect()
        };

        // A re-shared item may have been tombstone-cancelled before.
        self.cancelled.write().await.remove(&id);

        let mut queued = 0;
        for peer in targets {
            self.board.write().await.insert(
                (peer.id.clone(), id),
                SyncJob {
                    item: id,
                    peer: peer.id.clone(),
                    revision: 0,
                    attempts: 0,
                    last_error: None,
                    state: SyncState::Queued,
                },
            );
            self.dispatch(&peer.id, id).await;
            queued += 1;
        }
        tracing::info!(item = %id, jobs = queued, "sync jobs enqueued");
        queued
    }

    /// Re-queue terminally failed jobs for an item. Returns how many
    /// were re-queued.
    pub async fn retry(&self, id: ItemId) -> usize {
        let failed_peers: Vec<String> = {
            let board = self.board.read().await;
            board
                .values()
                .filter(|j| j.item == id && j.state == SyncState::Failed)
                .map(|j| j.peer.clone())
                .collect()
        };
        for peer_id in &failed_peers {
            if let Some(job) = self.board.write().await.get_mut(&(peer_id.clone(), id)) {
                job.state = SyncState::Queued;
                job.attempts = 0;
                job.last_error = None;
            }
            self.dispatch(peer_id, id).await;
        }
        failed_peers.len()
    }

    /// Cancel pending deliveries for a tombstoned item.
    pub async fn cancel(&self, id: ItemId) {
        self.cancelled.write().await.insert(id);
        let mut board = self.board.write().await;
        board.retain(|_, job| !(job.item == id && job.state == SyncState::Queued));
        tracing::info!(item = %id, "queued sync jobs cancelled");
    }

    /// Snapshot of all tracked jobs, ordered by (peer, item).
    pub async fn jobs(&self) -> Vec<SyncJob> {
        self.board.read().await.values().cloned().collect()
    }

    /// Queued plus in-flight job count for one peer.
    pub async fn backlog(&self, peer_id: &str) -> usize {
        self.board
            .read()
            .await
            .values()
            .filter(|j| {
                j.peer == peer_id && matches!(j.state, SyncState::Queued | SyncState::InFlight)
            })
            .count()
    }

    /// Terminally failed job count for one peer.
    pub async fn failed(&self, peer_id: &str) -> usize {
        self.board
            .read()
            .await
            .values()
            .filter(|j| j.peer == peer_id && j.state == SyncState::Failed)
            .count()
    }

    /// Hand a job to the peer's worker, spawning the worker on first use.
    async fn dispatch(&self, peer_id: &str, id: ItemId) {
        let mut workers = self.workers.lock().await;
        let sender = workers.entry(peer_id.to_string()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = Worker {
                node_id: self.node_id.clone(),
                peer_id: peer_id.to_string(),
                policy: self.policy,
                session: Arc::clone(&self.session),
                peers: Arc::clone(&self.peers),
                transport: Arc::clone(&self.transport),
                cipher: Arc::clone(&self.cipher),
                board: Arc::clone(&self.board),
                cancelled: Arc::clone(&self.cancelled),
            };
            tokio::spawn(worker.run(rx));
            tx
        });
        // The receiver only drops when the agent does.
        let _ = sender.send(id);
    }
}

// =============================================================================
// PER-PEER WORKER
// =============================================================================

struct Worker {
    node_id: String,
    peer_id: String,
    policy: SyncSection,
    session: Arc<RwLock<Session>>,
    peers: Arc<RwLock<BTreeMap<String, FederationPeer>>>,
    transport: Arc<dyn PeerTransport>,
    cipher: Arc<dyn PayloadCipher>,
    board: Board,
    cancelled: Arc<RwLock<BTreeSet<ItemId>>>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<ItemId>) {
        while let Some(id) = rx.recv().await {
            self.deliver_with_retry(id).await;
        }
    }

    /// Backoff before the given (1-based) attempt's retry.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ms = self
            .policy
            .backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.policy.backoff_cap_ms);
        Duration::from_millis(ms)
    }

    async fn set_job(&self, id: ItemId, update: impl FnOnce(&mut SyncJob)) {
        if let Some(job) = self
            .board
            .write()
            .await
            .get_mut(&(self.peer_id.clone(), id))
        {
            update(job);
        }
    }

    async fn drop_job(&self, id: ItemId) {
        self.board.write().await.remove(&(self.peer_id.clone(), id));
    }

    async fn deliver_with_retry(&self, id: ItemId) {
        for attempt in 1..=self.policy.max_attempts.max(1) {
            if self.cancelled.read().await.contains(&id) {
                tracing::info!(item = %id, peer = %self.peer_id, "delivery cancelled");
                self.drop_job(id).await;
                return;
            }

            let Some(peer) = self.peers.read().await.get(&self.peer_id).cloned() else {
                tracing::warn!(peer = %self.peer_id, "peer removed, dropping job");
                self.drop_job(id).await;
                return;
            };

            // Snapshot under a short read guard; never hold it across
            // network I/O.
            let sealed = {
                let session = self.session.read().await;
                let item = match session.get_item(id) {
                    Ok(Some(item)) if item.status == ItemStatus::Active => item,
                    _ => {
                        self.drop_job(id).await;
                        return;
                    }
                };
                let mut concepts = Vec::new();
                if let Ok(edges) = session.item_concepts(id) {
                    for (concept_id, confidence_bp) in edges {
                        if let Ok(Some(concept)) = session.get_concept(concept_id) {
                            concepts.push(WireConcept {
                                label: concept.label,
                                domain: concept.domain.as_str().to_string(),
                                confidence_bp,
                            });
                        }
                    }
                }
                let revision = item.revision;
                let envelope = envelope::seal(
                    self.cipher.as_ref(),
                    &self.node_id,
                    &peer.id,
                    &peer.key,
                    &item,
                    &concepts,
                    unix_now(),
                );
                envelope.map(|e| (e, revision))
            };

            let (envelope, revision) = match sealed {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(item = %id, peer = %self.peer_id, error = %e, "seal failed");
                    self.set_job(id, |job| {
                        job.state = SyncState::Failed;
                        job.last_error = Some(e.to_string());
                    })
                    .await;
                    return;
                }
            };

            self.set_job(id, |job| {
                job.state = SyncState::InFlight;
                job.attempts = attempt;
                job.revision = revision;
            })
            .await;

            match self.transport.deliver(&peer, &envelope).await {
                Ok(ack) => {
                    let cancelled = self.cancelled.read().await.contains(&id);
                    if cancelled {
                        tracing::warn!(
                            item = %id,
                            peer = %self.peer_id,
                            uri = ?ack.uri,
                            "delivery completed after tombstone; remote copy needs manual cleanup"
                        );
                    } else if let Some(uri) = ack.uri.as_deref() {
                        if !ack.is_duplicate() {
                            let mut session = self.session.write().await;
                            if let Err(e) = session.record_remote_uri(id, &self.peer_id, uri) {
                                tracing::error!(item = %id, error = %e, "recording remote uri failed");
                            }
                        }
                    }
                    self.set_job(id, |job| {
                        job.state = SyncState::Acked;
                        job.last_error = None;
                    })
                    .await;
                    if let Some(entry) = self.peers.write().await.get_mut(&self.peer_id) {
                        entry.last_sync = Some(unix_now());
                    }
                    tracing::debug!(item = %id, peer = %self.peer_id, status = %ack.status, "delivery acked");
                    return;
                }
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::debug!(
                        item = %id,
                        peer = %self.peer_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "delivery failed, backing off"
                    );
                    self.set_job(id, |job| {
                        job.state = SyncState::Queued;
                        job.last_error = Some(e.to_string());
                    })
                    .await;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(item = %id, peer = %self.peer_id, attempt, error = %e, "delivery failed terminally");
                    self.set_job(id, |job| {
                        job.state = SyncState::Failed;
                        job.last_error = Some(e.to_string());
                    })
                    .await;
                    return;
                }
            }
        }
    }
}

/// Wall-clock unix seconds; the core stays clock-free, the app supplies
/// timestamps.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
