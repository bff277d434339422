//! # Federation Layer
//!
//! Everything that leaves the node: the sync agent pushing shared items
//! to peers, the query router fanning searches out, the envelope wire
//! format and the HTTP transport. The deterministic graph itself never
//! touches this module; it lives in `weft-core`.

pub mod client;
pub mod envelope;
pub mod peer;
pub mod router;
pub mod sync;

pub use client::{ClientError, HttpTransport, PeerTransport};
pub use envelope::{DeliveryAck, DeliveryEnvelope, PassthroughCipher, PayloadCipher};
pub use peer::FederationPeer;
pub use router::{
    RankedHit, RemoteSearchRequest, RemoteSearchResponse, SearchOutcome, SearchParams,
    SearchScope,
};
pub use sync::{SyncAgent, SyncJob, SyncState, unix_now};

use crate::config::NodeConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use weft_core::{ItemId, PrivacyLevel, Session, WeftError};

// =============================================================================
// FEDERATION FACADE
// =============================================================================

/// Status summary for one peer, served by `GET /peers`.
#[derive(Debug, Clone)]
pub struct PeerStatus {
    pub id: String,
    pub url: String,
    pub trust: PrivacyLevel,
    pub last_sync: Option<u64>,
    pub backlog: usize,
    pub failed: usize,
}

/// The node's federation state: peer registry, sync agent, router entry
/// point. Handlers and the CLI talk to this, never to workers directly.
pub struct Federation {
    node_id: String,
    node_name: String,
    base_url: String,
    per_peer_timeout: Duration,
    session: Arc<RwLock<Session>>,
    peers: Arc<RwLock<BTreeMap<String, FederationPeer>>>,
    transport: Arc<dyn PeerTransport>,
    cipher: Arc<dyn PayloadCipher>,
    sync: SyncAgent,
}

impl Federation {
    /// Wire up the federation layer from a node config.
    pub fn new(
        session: Arc<RwLock<Session>>,
        config: &NodeConfig,
        transport: Arc<dyn PeerTransport>,
        cipher: Arc<dyn PayloadCipher>,
    ) -> Result<Arc<Self>, WeftError> {
        let mut registry = BTreeMap::new();
        for entry in &config.peers {
            let peer = FederationPeer::from_entry(entry)?;
            registry.insert(peer.id.clone(), peer);
        }
        let peers = Arc::new(RwLock::new(registry));
        let sync = SyncAgent::new(
            config.node.id.clone(),
            config.sync,
            Arc::clone(&session),
            Arc::clone(&peers),
            Arc::clone(&transport),
            Arc::clone(&cipher),
        );
        Ok(Arc::new(Self {
            node_id: config.node.id.clone(),
            node_name: config.node.name.clone(),
            base_url: config.node.base_url.trim_end_matches('/').to_string(),
            per_peer_timeout: Duration::from_millis(config.sync.per_peer_timeout_ms),
            session,
            peers,
            transport,
            cipher,
            sync,
        }))
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cipher(&self) -> &dyn PayloadCipher {
        self.cipher.as_ref()
    }

    /// Queue deliveries for a created or widened item. Returns the job
    /// count; `Local` items queue nothing.
    pub async fn publish(&self, id: ItemId) -> usize {
        self.sync.enqueue(id).await
    }

    /// Cancel pending deliveries for a tombstoned item.
    pub async fn cancel(&self, id: ItemId) {
        self.sync.cancel(id).await;
    }

    /// Re-queue failed deliveries for an item.
    pub async fn retry(&self, id: ItemId) -> usize {
        self.sync.retry(id).await
    }

    /// All tracked sync jobs.
    pub async fn jobs(&self) -> Vec<SyncJob> {
        self.sync.jobs().await
    }

    /// Run a federated search across this node and the in-scope peers.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchOutcome, WeftError> {
        router::federated_search(
            &self.session,
            &self.peers,
            &self.transport,
            &self.node_id,
            params,
            self.per_peer_timeout,
        )
        .await
    }

    /// Trust tier of a registered peer, if known.
    pub async fn trust_of(&self, node_id: &str) -> Option<PrivacyLevel> {
        self.peers.read().await.get(node_id).map(|p| p.trust)
    }

    /// Key material for a registered peer.
    pub async fn key_of(&self, node_id: &str) -> Option<String> {
        self.peers.read().await.get(node_id).map(|p| p.key.clone())
    }

    /// Per-peer status including sync backlog.
    pub async fn peer_statuses(&self) -> Vec<PeerStatus> {
        let snapshot: Vec<FederationPeer> =
            self.peers.read().await.values().cloned().collect();
        let mut statuses = Vec::with_capacity(snapshot.len());
        for peer in snapshot {
            statuses.push(PeerStatus {
                backlog: self.sync.backlog(&peer.id).await,
                failed: self.sync.failed(&peer.id).await,
                id: peer.id,
                url: peer.url,
                trust: peer.trust,
                last_sync: peer.last_sync,
            });
        }
        statuses
    }
}
