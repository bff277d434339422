//! Integration tests for the sync agent and the federated query router,
//! using an in-memory transport instead of HTTP.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use weft::config::{NodeConfig, PeerEntry};
use weft::federation::{
    ClientError, Federation, PassthroughCipher, PeerTransport, RemoteSearchRequest,
    RemoteSearchResponse, SearchParams, SearchScope, SyncState,
    envelope::{self, DeliveryAck, DeliveryEnvelope},
    peer::FederationPeer,
    router::RemoteHit,
};
use weft_core::{ItemId, PrivacyLevel, Session};

// =============================================================================
// STUB TRANSPORT
// =============================================================================

/// In-memory peer transport. Records every delivery, fails configured
/// peers with a transient error, and serves canned search responses.
#[derive(Default)]
struct StubTransport {
    deliveries: Mutex<Vec<(String, DeliveryEnvelope)>>,
    /// Peers whose deliveries always fail with a transient error.
    fail_deliver: BTreeSet<String>,
    /// Peers whose searches fail.
    fail_search: BTreeSet<String>,
    search_hits: BTreeMap<String, Vec<RemoteHit>>,
    /// When set, deliveries block until notified once per waiter.
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl PeerTransport for StubTransport {
    async fn deliver(
        &self,
        peer: &FederationPeer,
        envelope: &DeliveryEnvelope,
    ) -> Result<DeliveryAck, ClientError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail_deliver.contains(&peer.id) {
            return Err(ClientError::ConnectionFailed(peer.url.clone()));
        }
        self.deliveries
            .lock()
            .await
            .push((peer.id.clone(), envelope.clone()));
        Ok(DeliveryAck {
            status: "stored".to_string(),
            uri: Some(format!("{}/item/{}", peer.url, envelope.content_hash)),
        })
    }

    async fn search(
        &self,
        peer: &FederationPeer,
        _request: &RemoteSearchRequest,
    ) -> Result<RemoteSearchResponse, ClientError> {
        if self.fail_search.contains(&peer.id) {
            return Err(ClientError::ServerError(500, "boom".to_string()));
        }
        Ok(RemoteSearchResponse {
            hits: self.search_hits.get(&peer.id).cloned().unwrap_or_default(),
        })
    }
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn two_peer_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node.id = "node-a".to_string();
    config.node.base_url = "http://a.example".to_string();
    // Keep retries fast so failure tests finish quickly.
    config.sync.backoff_base_ms = 1;
    config.sync.backoff_cap_ms = 5;
    config.sync.max_attempts = 3;
    config.peers = vec![
        PeerEntry {
            id: "node-b".to_string(),
            url: "http://b.example".to_string(),
            trust: "friends".to_string(),
            key: "key-b".to_string(),
        },
        PeerEntry {
            id: "hub".to_string(),
            url: "http://hub.example".to_string(),
            trust: "public".to_string(),
            key: String::new(),
        },
    ];
    config
}

fn build(
    config: &NodeConfig,
    transport: Arc<StubTransport>,
) -> (Arc<RwLock<Session>>, Arc<Federation>) {
    let session = Arc::new(RwLock::new(Session::new(config.node.id.clone())));
    let federation = Federation::new(
        Arc::clone(&session),
        config,
        transport,
        Arc::new(PassthroughCipher),
    )
    .unwrap();
    (session, federation)
}

async fn submit(
    session: &Arc<RwLock<Session>>,
    content: &str,
    privacy: PrivacyLevel,
) -> ItemId {
    let mut guard = session.write().await;
    guard
        .submit(content, "alice", &[], privacy, 1_700_000_000)
        .unwrap()
        .id
}

/// Poll until the condition holds or a short deadline passes.
async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within deadline");
}

// =============================================================================
// SYNC AGENT
// =============================================================================

#[tokio::test]
async fn test_local_items_queue_nothing() {
    let transport = Arc::new(StubTransport::default());
    let (session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    let id = submit(&session, "private note", PrivacyLevel::Local).await;
    assert_eq!(federation.publish(id).await, 0);
    assert!(federation.jobs().await.is_empty());
    assert!(transport.deliveries.lock().await.is_empty());
}

#[tokio::test]
async fn test_friends_item_goes_to_friend_peers_only() {
    let transport = Arc::new(StubTransport::default());
    let (session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    let id = submit(&session, "for friends", PrivacyLevel::Friends).await;
    // Only node-b (friends tier) accepts friends-level items; the public
    // hub does not.
    assert_eq!(federation.publish(id).await, 1);

    wait_for(|| async {
        federation
            .jobs()
            .await
            .iter()
            .all(|j| j.state == SyncState::Acked)
    })
    .await;

    let deliveries = transport.deliveries.lock().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, "node-b");
    assert_eq!(deliveries[0].1.sender, "node-a");
    assert_eq!(deliveries[0].1.recipient, "node-b");
}

#[tokio::test]
async fn test_public_item_fans_out_and_records_uris() {
    let transport = Arc::new(StubTransport::default());
    let (session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    let id = submit(&session, "for everyone", PrivacyLevel::Public).await;
    assert_eq!(federation.publish(id).await, 2);

    wait_for(|| async {
        let guard = session.read().await;
        guard
            .get_item(id)
            .ok()
            .flatten()
            .is_some_and(|item| item.remote_uris.len() == 2)
    })
    .await;

    let guard = session.read().await;
    let item = guard.get_item(id).unwrap().unwrap();
    assert!(item.remote_uris["node-b"].contains(&id.to_string()));
    assert!(item.remote_uris["hub"].starts_with("http://hub.example/item/"));
}

#[tokio::test]
async fn test_delivered_envelope_opens_on_the_receiving_side() {
    let transport = Arc::new(StubTransport::default());
    let (session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    let id = {
        let mut guard = session.write().await;
        guard
            .submit(
                "raft elects one leader",
                "alice",
                &[weft_core::RawConcept {
                    label: "Raft".to_string(),
                    domain: "cs".to_string(),
                    confidence_bp: 9_000,
                }],
                PrivacyLevel::Friends,
                1_700_000_000,
            )
            .unwrap()
            .id
    };
    federation.publish(id).await;

    wait_for(|| async { !transport.deliveries.lock().await.is_empty() }).await;

    let deliveries = transport.deliveries.lock().await;
    let (item, concepts) =
        envelope::open(&PassthroughCipher, "key-b", &deliveries[0].1).unwrap();
    assert_eq!(item.id, id);
    assert_eq!(item.origin, "node-a");
    assert_eq!(item.privacy, PrivacyLevel::Friends);
    assert_eq!(concepts.len(), 1);
    assert_eq!(concepts[0].label, "raft");
}

#[tokio::test]
async fn test_transient_failure_retries_then_goes_terminal() {
    let mut transport = StubTransport::default();
    transport.fail_deliver.insert("node-b".to_string());
    let transport = Arc::new(transport);
    let (session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    let id = submit(&session, "shared widely", PrivacyLevel::Public).await;
    assert_eq!(federation.publish(id).await, 2);

    wait_for(|| async {
        let jobs = federation.jobs().await;
        jobs.iter()
            .any(|j| j.peer == "node-b" && j.state == SyncState::Failed)
            && jobs
                .iter()
                .any(|j| j.peer == "hub" && j.state == SyncState::Acked)
    })
    .await;

    let jobs = federation.jobs().await;
    let failed = jobs
        .iter()
        .find(|j| j.peer == "node-b")
        .unwrap();
    assert_eq!(failed.attempts, 3);
    assert!(failed.last_error.as_deref().unwrap().contains("cannot connect"));

    // The healthy peer got exactly one copy.
    let deliveries = transport.deliveries.lock().await;
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].0, "hub");
}

#[tokio::test]
async fn test_retry_requeues_only_failed_jobs() {
    let mut transport = StubTransport::default();
    transport.fail_deliver.insert("node-b".to_string());
    let transport = Arc::new(transport);
    let (session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    let id = submit(&session, "retryable", PrivacyLevel::Public).await;
    federation.publish(id).await;

    wait_for(|| async {
        federation
            .jobs()
            .await
            .iter()
            .any(|j| j.peer == "node-b" && j.state == SyncState::Failed)
    })
    .await;

    // One failed job for node-b; the hub job is acked and not re-queued.
    assert_eq!(federation.retry(id).await, 1);

    wait_for(|| async {
        federation
            .jobs()
            .await
            .iter()
            .any(|j| j.peer == "node-b" && j.state == SyncState::Failed && j.attempts == 3)
    })
    .await;
}

#[tokio::test]
async fn test_tombstone_cancels_queued_jobs() {
    let gate = Arc::new(Notify::new());
    let mut transport = StubTransport::default();
    transport.gate = Some(Arc::clone(&gate));
    let transport = Arc::new(transport);
    let (session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    // Two public items for the same peer queue; the first blocks on the
    // gate, leaving the second queued behind it.
    let first = submit(&session, "first out", PrivacyLevel::Public).await;
    let second = submit(&session, "never leaves", PrivacyLevel::Public).await;
    federation.publish(first).await;
    federation.publish(second).await;

    wait_for(|| async {
        federation
            .jobs()
            .await
            .iter()
            .filter(|j| j.state == SyncState::InFlight)
            .count()
            == 2
    })
    .await;

    {
        let mut guard = session.write().await;
        guard.tombstone(second).unwrap();
    }
    federation.cancel(second).await;

    // Release both workers; each serves the first item, then finds the
    // second cancelled.
    for _ in 0..4 {
        gate.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    wait_for(|| async {
        federation
            .jobs()
            .await
            .iter()
            .all(|j| j.item == first && j.state == SyncState::Acked)
    })
    .await;

    let deliveries = transport.deliveries.lock().await;
    assert!(deliveries.iter().all(|(_, e)| e.content_hash == first.to_string()));
}

// =============================================================================
// FEDERATED SEARCH
// =============================================================================

fn remote_hit(id: &str, content: &str, matched: u64, weight: i64) -> RemoteHit {
    RemoteHit {
        id: id.to_string(),
        origin: "node-b".to_string(),
        author: "bob".to_string(),
        content: content.to_string(),
        created_at: 1_600_000_000,
        privacy: "friends".to_string(),
        matched_terms: matched,
        weight,
    }
}

#[tokio::test]
async fn test_federated_search_merges_and_flags_degraded() {
    let mut transport = StubTransport::default();
    transport.fail_search.insert("hub".to_string());
    transport.search_hits.insert(
        "node-b".to_string(),
        vec![
            remote_hit(&"11".repeat(16), "raft from afar", 1, 5),
            remote_hit(&"22".repeat(16), "raft and paxos from afar", 2, 3),
        ],
    );
    let transport = Arc::new(transport);
    let (session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    submit(&session, "raft notes at home", PrivacyLevel::Local).await;

    let outcome = federation
        .search(&SearchParams {
            query: "raft".to_string(),
            scope: SearchScope::Public,
            limit: 10,
            since: None,
            until: None,
            peer_allowlist: None,
        })
        .await
        .unwrap();

    // Erroring peer lands in degraded, not in the hits.
    assert_eq!(outcome.degraded, vec!["hub".to_string()]);
    assert_eq!(outcome.hits.len(), 3);
    // More matched terms rank first regardless of provenance.
    assert_eq!(outcome.hits[0].hit.matched_terms, 2);
    assert_eq!(outcome.hits[0].provenance, "friend:node-b");
    assert!(outcome.hits.iter().any(|h| h.provenance == "local"));
}

#[tokio::test]
async fn test_federated_search_local_copy_wins_dedup() {
    // Peer echoes back an item this node also holds, under the same
    // content-derived id but claiming a different author.
    let id = ItemId::derive("shared raft knowledge");
    let mut echoed = remote_hit(&id.to_string(), "shared raft knowledge", 1, 99);
    echoed.author = "impostor".to_string();

    let mut transport = StubTransport::default();
    transport
        .search_hits
        .insert("node-b".to_string(), vec![echoed]);
    let transport = Arc::new(transport);
    let (session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    let submitted = submit(&session, "shared raft knowledge", PrivacyLevel::Public).await;
    assert_eq!(submitted, id);

    let outcome = federation
        .search(&SearchParams {
            query: "raft".to_string(),
            scope: SearchScope::Public,
            limit: 10,
            since: None,
            until: None,
            peer_allowlist: None,
        })
        .await
        .unwrap();

    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].provenance, "local");
    assert_eq!(outcome.hits[0].hit.author, "alice");
}

#[tokio::test]
async fn test_search_scope_friends_skips_public_peers() {
    let mut transport = StubTransport::default();
    transport
        .search_hits
        .insert("node-b".to_string(), vec![remote_hit(&"33".repeat(16), "raft", 1, 1)]);
    transport
        .search_hits
        .insert("hub".to_string(), vec![remote_hit(&"44".repeat(16), "raft", 1, 1)]);
    let transport = Arc::new(transport);
    let (_session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    let outcome = federation
        .search(&SearchParams {
            query: "raft".to_string(),
            scope: SearchScope::Friends,
            limit: 10,
            since: None,
            until: None,
            peer_allowlist: None,
        })
        .await
        .unwrap();

    // Friends scope asks friend-tier peers only; the hub hit never shows.
    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].provenance, "friend:node-b");
}

#[tokio::test]
async fn test_search_peer_allowlist() {
    let mut transport = StubTransport::default();
    transport
        .search_hits
        .insert("node-b".to_string(), vec![remote_hit(&"55".repeat(16), "raft", 1, 1)]);
    transport
        .search_hits
        .insert("hub".to_string(), vec![remote_hit(&"66".repeat(16), "raft", 1, 1)]);
    let transport = Arc::new(transport);
    let (_session, federation) = build(&two_peer_config(), Arc::clone(&transport));

    let outcome = federation
        .search(&SearchParams {
            query: "raft".to_string(),
            scope: SearchScope::Public,
            limit: 10,
            since: None,
            until: None,
            peer_allowlist: Some(vec!["hub".to_string()]),
        })
        .await
        .unwrap();

    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].provenance, "public:hub");
}
