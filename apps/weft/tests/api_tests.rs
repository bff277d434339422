//! Integration tests for the Weft HTTP API.
//!
//! Uses axum-test to test the API handlers without starting a real server.

// Allow unwrap and panic in tests - these are standard for test code
// Allow holding MutexGuard across await in auth tests - tests are serialized
// intentionally to avoid env var conflicts
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum_test::TestServer;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use weft::api::types::{
    DeliverResponse, DiscoveryResponse, HealthResponse, ItemResponse, ItemsResponse,
    PrivacyResponse, SearchResponse, SubmitResponse, TripleQueryResponse,
};
use weft::api::{AppState, create_router};
use weft::config::{NodeConfig, PeerEntry};
use weft::federation::{
    Federation, HttpTransport, PassthroughCipher,
    envelope::{self, WireConcept},
};
use weft_core::{Item, PrivacyLevel, Session};

/// Mutex to serialize tests since auth reads env vars per request.
static AUTH_TEST_MUTEX: Mutex<()> = Mutex::new(());

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Guard wrapper that holds the mutex and ensures cleanup on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
        unsafe { std::env::remove_var("WEFT_API_KEY") };
    }
}

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.node.id = "node-a".to_string();
    config.node.name = "Test Node".to_string();
    config
}

/// Config with one friend peer and one public server (unreachable URLs;
/// these tests never dial out).
fn federated_config() -> NodeConfig {
    let mut config = test_config();
    config.peers = vec![
        PeerEntry {
            id: "node-b".to_string(),
            url: "http://127.0.0.1:1".to_string(),
            trust: "friends".to_string(),
            key: "secret-b".to_string(),
        },
        PeerEntry {
            id: "hub".to_string(),
            url: "http://127.0.0.1:2".to_string(),
            trust: "public".to_string(),
            key: String::new(),
        },
    ];
    config
}

fn build_state(config: &NodeConfig) -> AppState {
    let session = Arc::new(RwLock::new(Session::new(config.node.id.clone())));
    let federation = Federation::new(
        Arc::clone(&session),
        config,
        Arc::new(HttpTransport::new()),
        Arc::new(PassthroughCipher),
    )
    .unwrap();
    AppState::new(session, federation)
}

/// Create a test server with a fresh in-memory session.
/// Returns a guard that must be kept alive during the test.
fn create_test_server() -> (TestServer, TestGuard) {
    create_test_server_with(&test_config())
}

fn create_test_server_with(config: &NodeConfig) -> (TestServer, TestGuard) {
    let guard = AUTH_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::remove_var("WEFT_API_KEY") };
    let router = create_router(build_state(config));
    (
        TestServer::new(router).unwrap(),
        TestGuard { _guard: guard },
    )
}

fn submit_body(content: &str, privacy: &str, concepts: &[(&str, &str)]) -> serde_json::Value {
    let concepts: Vec<serde_json::Value> = concepts
        .iter()
        .map(|(label, domain)| {
            serde_json::json!({"label": label, "domain": domain, "confidence_bp": 9000})
        })
        .collect();
    serde_json::json!({
        "content": content,
        "author": "alice",
        "privacy": privacy,
        "concepts": concepts,
    })
}

async fn submit(server: &TestServer, content: &str, privacy: &str, concepts: &[(&str, &str)]) -> SubmitResponse {
    let response = server
        .post("/submit")
        .json(&submit_body(content, privacy, concepts))
        .await;
    response.assert_status_ok();
    response.json()
}

// =============================================================================
// HEALTH / DISCOVERY
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _guard) = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.node, "node-a");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_discovery_document() {
    let (server, _guard) = create_test_server();

    let response = server.get("/.well-known/weft.json").await;

    response.assert_status_ok();
    let doc: DiscoveryResponse = response.json();
    assert_eq!(doc.node, "node-a");
    assert_eq!(doc.protocol_version, 1);
    assert_eq!(doc.endpoints.deliver, "/federation/deliver");
    // Local is never a shareable level.
    assert!(!doc.privacy_levels.contains(&"local".to_string()));
}

// =============================================================================
// SUBMIT / ITEM LOOKUP
// =============================================================================

#[tokio::test]
async fn test_submit_and_fetch_item() {
    let (server, _guard) = create_test_server();

    let submitted = submit(
        &server,
        "raft elects one leader per term",
        "local",
        &[("Raft", "cs"), ("leader election", "cs")],
    )
    .await;
    assert!(submitted.success);
    assert_eq!(submitted.outcome.as_deref(), Some("inserted"));
    assert_eq!(submitted.jobs, 0);
    assert_eq!(submitted.concepts.len(), 2);
    let id = submitted.id.unwrap();

    let response = server.get(&format!("/item/{id}")).await;
    response.assert_status_ok();
    let item: ItemResponse = response.json();
    let fetched = item.item.unwrap();
    assert_eq!(fetched.id, id);
    assert_eq!(fetched.origin, "node-a");
    assert_eq!(fetched.privacy, "local");
    assert_eq!(fetched.revision, 1);
    assert_eq!(item.concepts.len(), 2);
    // Labels are normalized on the way in.
    assert!(item.concepts.iter().any(|c| c.label == "raft"));
}

#[tokio::test]
async fn test_resubmit_is_idempotent() {
    let (server, _guard) = create_test_server();

    let first = submit(&server, "same content", "local", &[("x", "cs")]).await;
    let second = submit(&server, "same content", "local", &[("x", "cs")]).await;

    assert_eq!(first.id, second.id);
    assert_eq!(second.outcome.as_deref(), Some("unchanged"));
}

#[tokio::test]
async fn test_submit_rejects_unknown_privacy() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/submit")
        .json(&submit_body("content", "secret", &[]))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_rejects_empty_content() {
    let (server, _guard) = create_test_server();

    let response = server.post("/submit").json(&submit_body("", "local", &[])).await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_item_not_found() {
    let (server, _guard) = create_test_server();

    let response = server.get(&format!("/item/{}", "00".repeat(16))).await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_items_listing() {
    let (server, _guard) = create_test_server();

    submit(&server, "first", "local", &[]).await;
    submit(&server, "second", "friends", &[]).await;

    let response = server.get("/items").await;
    response.assert_status_ok();
    let items: ItemsResponse = response.json();
    assert_eq!(items.items.len(), 2);
}

// =============================================================================
// STATS / RELATED
// =============================================================================

#[tokio::test]
async fn test_stats_counts_domains() {
    let (server, _guard) = create_test_server();

    submit(
        &server,
        "consensus and proofs",
        "local",
        &[("Raft", "cs"), ("Paxos", "cs"), ("induction", "math")],
    )
    .await;

    let response = server.get("/stats").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["stats"]["items"], 1);
    assert_eq!(body["stats"]["concepts"], 3);
    assert_eq!(body["stats"]["concepts_by_domain"]["computer-science"], 2);
    assert_eq!(body["stats"]["concepts_by_domain"]["mathematics"], 1);
}

#[tokio::test]
async fn test_related_concepts() {
    let (server, _guard) = create_test_server();

    submit(
        &server,
        "raft and paxos are consensus protocols",
        "local",
        &[("raft", "cs"), ("paxos", "cs")],
    )
    .await;
    submit(
        &server,
        "raft is easier to understand than paxos",
        "local",
        &[("raft", "cs"), ("paxos", "cs")],
    )
    .await;

    let response = server.get("/related/raft").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["concepts"][0]["label"], "paxos");
    assert_eq!(body["concepts"][0]["weight"], 2);
}

// =============================================================================
// TRIPLE QUERY
// =============================================================================

#[tokio::test]
async fn test_triple_query_by_predicate() {
    let (server, _guard) = create_test_server();

    submit(&server, "about raft", "local", &[("raft", "cs")]).await;

    let response = server
        .post("/query")
        .json(&serde_json::json!({"predicate": "http://weft.dev/graph#discusses"}))
        .await;
    response.assert_status_ok();
    let result: TripleQueryResponse = response.json();
    assert!(result.success);
    assert_eq!(result.triples.len(), 1);
    assert!(result.triples[0].contains("#discusses"));
}

// =============================================================================
// SEARCH
// =============================================================================

#[tokio::test]
async fn test_local_search_ranks_by_matched_terms() {
    let (server, _guard) = create_test_server();

    submit(
        &server,
        "raft consensus deep dive",
        "local",
        &[("raft", "cs"), ("consensus", "cs")],
    )
    .await;
    submit(&server, "raft only", "local", &[("raft", "cs")]).await;

    let response = server
        .post("/search")
        .json(&serde_json::json!({"query": "raft consensus", "scope": "local"}))
        .await;
    response.assert_status_ok();
    let result: SearchResponse = response.json();
    assert!(result.success);
    assert_eq!(result.hits.len(), 2);
    assert_eq!(result.hits[0].matched_terms, 2);
    assert_eq!(result.hits[0].provenance, "local");
    assert!(result.degraded.is_empty());
}

#[tokio::test]
async fn test_search_rejects_unknown_scope() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/search")
        .json(&serde_json::json!({"query": "x", "scope": "galaxy"}))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

// =============================================================================
// PRIVACY / TOMBSTONE
// =============================================================================

#[tokio::test]
async fn test_privacy_widening_bumps_revision() {
    let (server, _guard) = create_test_server();

    let submitted = submit(&server, "to be shared", "local", &[]).await;
    let id = submitted.id.unwrap();

    let response = server
        .post(&format!("/item/{id}/privacy"))
        .json(&serde_json::json!({"level": "friends"}))
        .await;
    response.assert_status_ok();
    let change: PrivacyResponse = response.json();
    assert!(change.success);
    assert!(change.widened);
    assert_eq!(change.previous.as_deref(), Some("local"));
    assert_eq!(change.current.as_deref(), Some("friends"));
    assert_eq!(change.revision, Some(2));
    // No peers configured, so widening queues nothing.
    assert_eq!(change.jobs, 0);
}

#[tokio::test]
async fn test_tombstone_then_privacy_change_conflicts() {
    let (server, _guard) = create_test_server();

    let submitted = submit(&server, "short lived", "local", &[]).await;
    let id = submitted.id.unwrap();

    let response = server.post(&format!("/item/{id}/tombstone")).await;
    response.assert_status_ok();

    // Widening a tombstoned item is refused.
    let response = server
        .post(&format!("/item/{id}/privacy"))
        .json(&serde_json::json!({"level": "public"}))
        .await;
    response.assert_status(axum::http::StatusCode::CONFLICT);
}

// =============================================================================
// ATTRIBUTION
// =============================================================================

#[tokio::test]
async fn test_attribution_round_trip() {
    let (server, _guard) = create_test_server();

    let source = submit(&server, "original insight", "local", &[]).await.id.unwrap();
    let derived = submit(&server, "builds on the insight", "local", &[]).await.id.unwrap();

    let response = server
        .post("/attribution")
        .json(&serde_json::json!({
            "derived": derived,
            "source": source,
            "source_node": "node-b",
            "kind": "derived-from",
        }))
        .await;
    response.assert_status_ok();

    let response = server.get(&format!("/item/{derived}")).await;
    let item: ItemResponse = response.json();
    assert_eq!(item.attributions.len(), 1);
    assert_eq!(item.attributions[0].kind, "derived-from");
    assert_eq!(item.attributions[0].source, source);
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

#[tokio::test]
async fn test_export_import_round_trip() {
    let (server, guard) = create_test_server();

    submit(
        &server,
        "portable knowledge",
        "friends",
        &[("raft", "cs"), ("paxos", "cs")],
    )
    .await;

    let response = server.post("/export").json(&serde_json::json!({})).await;
    response.assert_status_ok();
    let export: serde_json::Value = response.json();
    assert_eq!(export["success"], true);
    assert_eq!(export["format"], "canonical");
    let data = export["data"].as_str().unwrap().to_string();
    let digest = export["digest"].as_str().unwrap().to_string();

    drop(server);
    drop(guard);
    let (fresh, _guard) = create_test_server();
    let response = fresh
        .post("/import")
        .json(&serde_json::json!({"format": "canonical", "data": data}))
        .await;
    response.assert_status_ok();
    let imported: serde_json::Value = response.json();
    assert_eq!(imported["success"], true);
    assert_eq!(imported["items"], 1);
    assert_eq!(imported["concepts"], 2);

    // Same canonical digest after import.
    let response = fresh.post("/export").json(&serde_json::json!({})).await;
    let reexport: serde_json::Value = response.json();
    assert_eq!(reexport["digest"].as_str().unwrap(), digest);
}

#[tokio::test]
async fn test_export_ntriples() {
    let (server, _guard) = create_test_server();

    submit(&server, "triples view", "local", &[("raft", "cs")]).await;

    let response = server
        .post("/export")
        .json(&serde_json::json!({"format": "ntriples"}))
        .await;
    response.assert_status_ok();
    let export: serde_json::Value = response.json();
    let data = export["data"].as_str().unwrap();
    let text = String::from_utf8(
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, data).unwrap(),
    )
    .unwrap();
    assert!(text.contains("http://weft.dev/graph#discusses"));
}

#[tokio::test]
async fn test_import_rejects_bad_format() {
    let (server, _guard) = create_test_server();

    let response = server
        .post("/import")
        .json(&serde_json::json!({"format": "xml", "data": ""}))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

// =============================================================================
// FEDERATION ENDPOINTS
// =============================================================================

fn sealed_envelope(sender: &str, recipient: &str, key: &str) -> weft::federation::DeliveryEnvelope {
    let item = Item::new(
        "delivered from afar",
        sender,
        "bob",
        1_700_000_000,
        PrivacyLevel::Friends,
    );
    let concepts = vec![WireConcept {
        label: "raft".to_string(),
        domain: "cs".to_string(),
        confidence_bp: 9_000,
    }];
    envelope::seal(&PassthroughCipher, sender, recipient, key, &item, &concepts, 1_700_000_001)
        .unwrap()
}

#[tokio::test]
async fn test_deliver_stores_then_acks_duplicate() {
    let (server, _guard) = create_test_server_with(&federated_config());

    let envelope = sealed_envelope("node-b", "node-a", "secret-b");

    let response = server.post("/federation/deliver").json(&envelope).await;
    response.assert_status_ok();
    let ack: DeliverResponse = response.json();
    assert!(ack.success);
    assert_eq!(ack.status.as_deref(), Some("stored"));
    assert!(ack.uri.as_deref().unwrap().contains("/item/"));

    // Redelivery of the same revision is acknowledged as a duplicate.
    let response = server.post("/federation/deliver").json(&envelope).await;
    response.assert_status_ok();
    let ack: DeliverResponse = response.json();
    assert_eq!(ack.status.as_deref(), Some("duplicate"));

    // The item keeps its remote origin.
    let response = server.get(&format!("/item/{}", envelope.content_hash)).await;
    let item: ItemResponse = response.json();
    assert_eq!(item.item.unwrap().origin, "node-b");
}

#[tokio::test]
async fn test_deliver_rejects_unknown_sender() {
    let (server, _guard) = create_test_server_with(&federated_config());

    let envelope = sealed_envelope("stranger", "node-a", "whatever");
    let response = server.post("/federation/deliver").json(&envelope).await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_deliver_rejects_wrong_recipient() {
    let (server, _guard) = create_test_server_with(&federated_config());

    let envelope = sealed_envelope("node-b", "node-z", "secret-b");
    let response = server.post("/federation/deliver").json(&envelope).await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_remote_search_caps_by_trust() {
    let (server, _guard) = create_test_server_with(&federated_config());

    submit(&server, "public post", "public", &[("raft", "cs")]).await;
    submit(&server, "friends post", "friends", &[("raft", "cs")]).await;
    submit(&server, "private note", "local", &[("raft", "cs")]).await;

    // Friend-tier requester presenting its registered key sees friends
    // and public.
    let response = server
        .post("/federation/search")
        .add_header("authorization", "Bearer secret-b")
        .json(&serde_json::json!({"requester": "node-b", "query": "raft", "limit": 10}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["hits"].as_array().unwrap().len(), 2);

    // Unknown requester sees public only.
    let response = server
        .post("/federation/search")
        .json(&serde_json::json!({"requester": "stranger", "query": "raft", "limit": 10}))
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["hits"].as_array().unwrap().len(), 1);
    assert_eq!(body["hits"][0]["privacy"], "public");
}

#[tokio::test]
async fn test_remote_search_rejects_claimed_identity_without_key() {
    let (server, _guard) = create_test_server_with(&federated_config());

    submit(&server, "secret plans for raft meetup", "friends", &[("raft", "cs")]).await;
    submit(&server, "public raft post", "public", &[("raft", "cs")]).await;

    // Claiming a friend peer's id without its key earns the public tier.
    let response = server
        .post("/federation/search")
        .json(&serde_json::json!({"requester": "node-b", "query": "raft", "limit": 10}))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["hits"].as_array().unwrap().len(), 1);
    assert_eq!(body["hits"][0]["privacy"], "public");

    // A wrong key is no better than no key.
    let response = server
        .post("/federation/search")
        .add_header("authorization", "Bearer not-the-key")
        .json(&serde_json::json!({"requester": "node-b", "query": "raft", "limit": 10}))
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["hits"].as_array().unwrap().len(), 1);
    assert_eq!(body["hits"][0]["privacy"], "public");

    // The keyless public hub cannot elevate either, even naming itself.
    let response = server
        .post("/federation/search")
        .json(&serde_json::json!({"requester": "hub", "query": "raft", "limit": 10}))
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["hits"].as_array().unwrap().len(), 1);
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

#[tokio::test]
async fn test_auth_required_when_key_set() {
    let (server, _guard) = create_test_server();

    // SAFETY: Tests run sequentially under AUTH_TEST_MUTEX, so no concurrent env access.
    unsafe { std::env::set_var("WEFT_API_KEY", "test-key") };

    // Health stays open for load balancer checks.
    server.get("/health").await.assert_status_ok();
    // Discovery stays open for peers.
    server.get("/.well-known/weft.json").await.assert_status_ok();
    // Federation endpoints authenticate per peer, not by operator key.
    server
        .post("/federation/search")
        .json(&serde_json::json!({"requester": "nobody", "query": "x", "limit": 1}))
        .await
        .assert_status_ok();

    // Other endpoints require the key.
    let response = server.get("/items").await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    let response = server
        .get("/items")
        .add_header("authorization", "Bearer test-key")
        .await;
    response.assert_status_ok();

    let response = server
        .get("/items")
        .add_header("authorization", "Bearer wrong-key")
        .await;
    response.assert_status(axum::http::StatusCode::UNAUTHORIZED);
}
