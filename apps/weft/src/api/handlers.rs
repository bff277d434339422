//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers. Read-only
//! endpoints take a shared read guard on the session; mutations take
//! the write guard and drop it before any federation work is queued.

use super::{
    AppState, auth,
    types::{
        AckResponse, AttributionJson, AttributionRequest, ConceptJson, DeliverResponse,
        DiscoveryResponse, ExportRequest, ExportResponse, HealthResponse, ImportRequest,
        ImportResponse, ItemConceptJson, ItemJson, ItemResponse, ItemsResponse, PeerJson,
        PeersResponse, PrivacyRequest, PrivacyResponse, RelatedResponse, ResyncResponse,
        SearchHitJson, SearchRequest, SearchResponse, StatsResponse, SubmitRequest,
        SubmitResponse, SyncJobJson, TripleQueryRequest, TripleQueryResponse,
    },
};
use crate::federation::{
    DeliveryEnvelope, RemoteSearchRequest, SearchParams, SearchScope, envelope, router, unix_now,
};
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use weft_core::{
    AttributionLink, ContributionKind, ItemId, PrivacyLevel, PutOutcome, RawConcept, Term,
    TriplePattern, triple,
};

/// Default and maximum search result counts.
const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 200;

// =============================================================================
// HEALTH / DISCOVERY
// =============================================================================

/// Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse::new(state.federation.node_id()))
}

/// Peer discovery document.
pub async fn discovery_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(DiscoveryResponse::new(
        state.federation.node_id(),
        state.federation.node_name(),
    ))
}

// =============================================================================
// SUBMIT
// =============================================================================

/// Submit a local item with its extracted concept spans.
pub async fn submit_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> impl IntoResponse {
    let privacy = match request.privacy.as_deref() {
        None | Some("") => PrivacyLevel::Local,
        Some(raw) => match PrivacyLevel::parse(raw) {
            Some(level) => level,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(SubmitResponse::error(format!(
                        "unknown privacy level '{raw}'"
                    ))),
                );
            }
        },
    };
    let spans: Vec<RawConcept> = request
        .concepts
        .iter()
        .map(|span| RawConcept {
            label: span.label.clone(),
            domain: span.domain.clone(),
            confidence_bp: span.confidence_bp,
        })
        .collect();

    let receipt = {
        let mut session = state.session.write().await;
        match session.submit(&request.content, &request.author, &spans, privacy, unix_now()) {
            Ok(receipt) => receipt,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(SubmitResponse::error(format!("submit failed: {e}"))),
                );
            }
        }
    };

    // Queue deliveries after the write guard is gone; local publish
    // never blocks on the network.
    let jobs = if privacy == PrivacyLevel::Local
        || matches!(receipt.outcome, PutOutcome::Unchanged)
    {
        0
    } else {
        state.federation.publish(receipt.id).await
    };

    let concepts = {
        let session = state.session.read().await;
        let mut out = Vec::with_capacity(receipt.concepts.len());
        for normalized in &receipt.concepts {
            if let Ok(Some(concept)) = session.get_concept(normalized.id) {
                out.push(ConceptJson::from_concept(&concept));
            }
        }
        out
    };

    (
        StatusCode::OK,
        Json(SubmitResponse::success(receipt.id, &receipt.outcome, concepts, jobs)),
    )
}

// =============================================================================
// ITEM LOOKUP / LISTING
// =============================================================================

/// Fetch one item with its concept edges and attributions.
pub async fn item_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(id) = ItemId::parse(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ItemResponse::error("malformed item id")),
        );
    };
    let session = state.session.read().await;
    let item = match session.get_item(id) {
        Ok(Some(item)) => item,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(ItemResponse::error("item not found")),
            );
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ItemResponse::error(format!("lookup failed: {e}"))),
            );
        }
    };

    let mut concepts = Vec::new();
    if let Ok(edges) = session.item_concepts(id) {
        for (concept_id, confidence_bp) in edges {
            if let Ok(Some(concept)) = session.get_concept(concept_id) {
                concepts.push(ItemConceptJson {
                    id: concept.id.to_string(),
                    label: concept.label,
                    domain: concept.domain.as_str().to_string(),
                    confidence_bp,
                });
            }
        }
    }
    let attributions = session
        .attributions_for(id)
        .unwrap_or_default()
        .iter()
        .map(AttributionJson::from_link)
        .collect();

    (
        StatusCode::OK,
        Json(ItemResponse::success(
            ItemJson::from_item(&item),
            concepts,
            attributions,
        )),
    )
}

/// List all items.
pub async fn items_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    match session.items() {
        Ok(items) => (
            StatusCode::OK,
            Json(ItemsResponse {
                success: true,
                items: items.iter().map(ItemJson::from_item).collect(),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ItemsResponse {
                success: false,
                items: vec![],
                error: Some(format!("listing failed: {e}")),
            }),
        ),
    }
}

// =============================================================================
// STATS / RELATED / TRIPLE QUERY
// =============================================================================

/// Graph statistics including per-domain concept counts.
pub async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let session = state.session.read().await;
    let stats = match session.stats() {
        Ok(stats) => stats,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"success": false, "error": e.to_string()})),
            );
        }
    };
    let mut by_domain = std::collections::BTreeMap::new();
    if let Ok(concepts) = session.concepts() {
        for concept in concepts {
            *by_domain
                .entry(concept.domain.as_str().to_string())
                .or_insert(0usize) += 1;
        }
    }
    let response = StatsResponse {
        items: stats.items,
        concepts: stats.concepts,
        edges: stats.edges,
        concepts_by_domain: by_domain,
    };
    (
        StatusCode::OK,
        Json(serde_json::json!({"success": true, "stats": response})),
    )
}

/// Strongest co-occurring concepts for a label.
pub async fn related_handler(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> impl IntoResponse {
    let session = state.session.read().await;
    match session.related(&label, DEFAULT_SEARCH_LIMIT) {
        Ok(related) => (StatusCode::OK, Json(RelatedResponse::success(&related))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(RelatedResponse::error(format!("related failed: {e}"))),
        ),
    }
}

/// Pattern match over the triple view.
pub async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<TripleQueryRequest>,
) -> impl IntoResponse {
    let mut pattern = TriplePattern::any();
    if let Some(subject) = &request.subject {
        pattern = pattern.with_subject(subject);
    }
    if let Some(predicate) = &request.predicate {
        pattern = pattern.with_predicate(predicate);
    }
    if let Some(iri) = &request.object_iri {
        pattern = pattern.with_object(Term::iri(iri));
    } else if let Some(literal) = &request.object {
        pattern = pattern.with_object(Term::literal(literal));
    }

    let session = state.session.read().await;
    match session.query(&pattern) {
        Ok(triples) => {
            let lines = triples.iter().map(triple::to_ntriples_line).collect();
            (StatusCode::OK, Json(TripleQueryResponse::success(lines)))
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(TripleQueryResponse::error(format!("query failed: {e}"))),
        ),
    }
}

// =============================================================================
// SEARCH
// =============================================================================

/// Federated search across this node and in-scope peers.
pub async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> impl IntoResponse {
    let scope = match request.scope.as_deref() {
        None | Some("") => SearchScope::Local,
        Some(raw) => match SearchScope::parse(raw) {
            Some(scope) => scope,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(SearchResponse::error(format!("unknown scope '{raw}'"))),
                );
            }
        },
    };
    let params = SearchParams {
        query: request.query,
        scope,
        limit: request
            .limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .min(MAX_SEARCH_LIMIT),
        since: request.since,
        until: request.until,
        peer_allowlist: request.peers,
    };
    match state.federation.search(&params).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(SearchResponse::success(
                outcome.hits.iter().map(SearchHitJson::from_ranked).collect(),
                outcome.degraded,
            )),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(SearchResponse::error(format!("search failed: {e}"))),
        ),
    }
}

/// Peer-facing search, capped by the requester's trust tier.
///
/// The claimed requester id only elevates visibility when the request
/// carries that peer's registered key; anyone else gets the public
/// tier, whatever identity they claim.
pub async fn remote_search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RemoteSearchRequest>,
) -> impl IntoResponse {
    let trust = match state.federation.key_of(&request.requester).await {
        Some(key) if auth::peer_key_matches(&headers, &key) => {
            state.federation.trust_of(&request.requester).await
        }
        _ => {
            tracing::debug!(
                requester = %request.requester,
                "unauthenticated peer search, serving public tier"
            );
            None
        }
    };
    let capped = RemoteSearchRequest {
        limit: request.limit.min(MAX_SEARCH_LIMIT),
        ..request
    };
    let session = state.session.read().await;
    match router::remote_search(&session, trust, &capped) {
        Ok(response) => (StatusCode::OK, Json(serde_json::json!(response))),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"hits": [], "error": e.to_string()})),
        ),
    }
}

// =============================================================================
// FEDERATION DELIVERY
// =============================================================================

/// Accept an item delivered by a peer.
pub async fn deliver_handler(
    State(state): State<AppState>,
    Json(delivery): Json<DeliveryEnvelope>,
) -> impl IntoResponse {
    if delivery.recipient != state.federation.node_id() {
        return (
            StatusCode::BAD_REQUEST,
            Json(DeliverResponse::error(format!(
                "envelope addressed to '{}'",
                delivery.recipient
            ))),
        );
    }
    let Some(key) = state.federation.key_of(&delivery.sender).await else {
        tracing::warn!(sender = %delivery.sender, "delivery from unknown peer rejected");
        return (
            StatusCode::UNAUTHORIZED,
            Json(DeliverResponse::error("unknown sender")),
        );
    };

    let (item, concepts) = match envelope::open(state.federation.cipher(), &key, &delivery) {
        Ok(opened) => opened,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(DeliverResponse::error(format!("envelope rejected: {e}"))),
            );
        }
    };

    let id = item.id;
    let outcome = {
        let mut session = state.session.write().await;
        session.receive(item, &concepts)
    };
    match outcome {
        Ok(outcome) => {
            let uri = if state.federation.base_url().is_empty() {
                format!("/item/{id}")
            } else {
                format!("{}/item/{id}", state.federation.base_url())
            };
            let status = match outcome {
                PutOutcome::Inserted | PutOutcome::Revised { .. } => "stored",
                PutOutcome::Unchanged => "duplicate",
            };
            tracing::info!(item = %id, sender = %delivery.sender, status, "delivery accepted");
            (StatusCode::OK, Json(DeliverResponse::success(status, uri)))
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(DeliverResponse::error(format!("store rejected: {e}"))),
        ),
    }
}

// =============================================================================
// PRIVACY / TOMBSTONE / RESYNC / ATTRIBUTION
// =============================================================================

/// Change an item's privacy level. Widening queues deliveries.
pub async fn privacy_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PrivacyRequest>,
) -> impl IntoResponse {
    let Some(id) = ItemId::parse(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(PrivacyResponse::error("malformed item id")),
        );
    };
    let Some(level) = PrivacyLevel::parse(&request.level) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(PrivacyResponse::error(format!(
                "unknown privacy level '{}'",
                request.level
            ))),
        );
    };
    let change = {
        let mut session = state.session.write().await;
        session.set_privacy(id, level)
    };
    match change {
        Ok(change) => {
            let jobs = if change.widened {
                state.federation.publish(id).await
            } else {
                0
            };
            (StatusCode::OK, Json(PrivacyResponse::success(&change, jobs)))
        }
        Err(e) => (
            StatusCode::CONFLICT,
            Json(PrivacyResponse::error(format!("privacy change rejected: {e}"))),
        ),
    }
}

/// Tombstone an item and cancel its pending deliveries.
pub async fn tombstone_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(id) = ItemId::parse(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AckResponse::error("malformed item id")),
        );
    };
    let result = {
        let mut session = state.session.write().await;
        session.tombstone(id)
    };
    match result {
        Ok(()) => {
            state.federation.cancel(id).await;
            (StatusCode::OK, Json(AckResponse::success()))
        }
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(AckResponse::error(format!("tombstone failed: {e}"))),
        ),
    }
}

/// Re-queue failed deliveries for an item.
pub async fn resync_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(id) = ItemId::parse(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ResyncResponse {
                success: false,
                retried: 0,
                error: Some("malformed item id".to_string()),
            }),
        );
    };
    let retried = state.federation.retry(id).await;
    (
        StatusCode::OK,
        Json(ResyncResponse {
            success: true,
            retried,
            error: None,
        }),
    )
}

/// Record an attribution link between items.
pub async fn attribution_handler(
    State(state): State<AppState>,
    Json(request): Json<AttributionRequest>,
) -> impl IntoResponse {
    let (Some(derived), Some(source)) = (
        ItemId::parse(&request.derived),
        ItemId::parse(&request.source),
    ) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AckResponse::error("malformed item id")),
        );
    };
    let Some(kind) = ContributionKind::parse(&request.kind) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(AckResponse::error(format!(
                "unknown contribution kind '{}'",
                request.kind
            ))),
        );
    };
    let link = AttributionLink {
        derived,
        source,
        source_node: request.source_node,
        kind,
        recorded_at: unix_now(),
    };
    let mut session = state.session.write().await;
    match session.add_attribution(link) {
        Ok(()) => (StatusCode::OK, Json(AckResponse::success())),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(AckResponse::error(format!("attribution rejected: {e}"))),
        ),
    }
}

// =============================================================================
// PEERS
// =============================================================================

/// Peer roster with sync backlog and tracked jobs.
pub async fn peers_handler(State(state): State<AppState>) -> impl IntoResponse {
    let peers = state
        .federation
        .peer_statuses()
        .await
        .iter()
        .map(PeerJson::from_status)
        .collect();
    let jobs = state
        .federation
        .jobs()
        .await
        .iter()
        .map(SyncJobJson::from_job)
        .collect();
    Json(PeersResponse { peers, jobs })
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Export the graph in canonical binary or N-Triples form.
pub async fn export_handler(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> impl IntoResponse {
    let format = request.format.as_deref().unwrap_or("canonical");
    let session = state.session.read().await;
    let digest = match session.canonical_digest() {
        Ok(digest) => digest,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExportResponse::error(format!("digest failed: {e}"))),
            );
        }
    };
    let data = match format {
        "canonical" => session.export_canonical(),
        "ntriples" => session.export_ntriples().map(String::into_bytes),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ExportResponse::error(format!(
                    "unknown format '{format}'. Use: canonical, ntriples"
                ))),
            );
        }
    };
    match data {
        Ok(bytes) => (
            StatusCode::OK,
            Json(ExportResponse::success(format, &bytes, digest)),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ExportResponse::error(format!("export failed: {e}"))),
        ),
    }
}

/// Import a graph export (in-memory backend only).
pub async fn import_handler(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> impl IntoResponse {
    let format = request.format.as_deref().unwrap_or("canonical");
    let bytes = match BASE64.decode(&request.data) {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ImportResponse::error(format!("data base64: {e}"))),
            );
        }
    };

    let mut session = state.session.write().await;
    let result = match format {
        "canonical" => session.import_canonical(&bytes),
        "ntriples" => match String::from_utf8(bytes) {
            Ok(text) => session.import_ntriples(&text),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ImportResponse::error(format!("ntriples utf8: {e}"))),
                );
            }
        },
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ImportResponse::error(format!(
                    "unknown format '{format}'. Use: canonical, ntriples"
                ))),
            );
        }
    };
    match result.and_then(|()| session.stats()) {
        Ok(stats) => (
            StatusCode::OK,
            Json(ImportResponse {
                success: true,
                items: stats.items,
                concepts: stats.concepts,
                edges: stats.edges,
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ImportResponse::error(format!("import failed: {e}"))),
        ),
    }
}
