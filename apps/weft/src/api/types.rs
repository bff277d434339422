//! # API Request/Response Types
//!
//! JSON structures for the HTTP API, local surface and federation
//! endpoints alike. Responses carry a `success` flag plus an optional
//! error string, mirrored by the `success()`/`error()` constructors.

use crate::federation::{PeerStatus, RankedHit, SyncJob};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use weft_core::{AttributionLink, Concept, EdgeWeight, Item, PrivacyChange, PutOutcome, SearchHit};

// =============================================================================
// HEALTH / DISCOVERY
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub node: String,
}

impl HealthResponse {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            node: node.into(),
        }
    }
}

/// Peer discovery document served at `/.well-known/weft.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub node: String,
    pub name: String,
    pub protocol_version: u32,
    pub privacy_levels: Vec<String>,
    pub endpoints: DiscoveryEndpoints,
}

/// Endpoint paths a peer needs to federate with this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryEndpoints {
    pub deliver: String,
    pub search: String,
}

impl DiscoveryResponse {
    pub fn new(node: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            name: name.into(),
            protocol_version: 1,
            privacy_levels: vec!["friends".to_string(), "public".to_string()],
            endpoints: DiscoveryEndpoints {
                deliver: "/federation/deliver".to_string(),
                search: "/federation/search".to_string(),
            },
        }
    }
}

// =============================================================================
// ITEM / CONCEPT JSON VIEWS
// =============================================================================

/// Item as serialized in responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemJson {
    pub id: String,
    pub origin: String,
    pub author: String,
    pub content: String,
    pub created_at: u64,
    pub privacy: String,
    pub status: String,
    pub revision: u64,
    pub remote_uris: BTreeMap<String, String>,
}

impl ItemJson {
    pub fn from_item(item: &Item) -> Self {
        Self {
            id: item.id.to_string(),
            origin: item.origin.clone(),
            author: item.author.clone(),
            content: item.content.clone(),
            created_at: item.created_at,
            privacy: item.privacy.as_str().to_string(),
            status: item.status.as_str().to_string(),
            revision: item.revision,
            remote_uris: item.remote_uris.clone(),
        }
    }
}

/// Concept as serialized in responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptJson {
    pub id: String,
    pub label: String,
    pub domain: String,
    pub mean_confidence_bp: u16,
    pub observations: u64,
}

impl ConceptJson {
    pub fn from_concept(concept: &Concept) -> Self {
        Self {
            id: concept.id.to_string(),
            label: concept.label.clone(),
            domain: concept.domain.as_str().to_string(),
            mean_confidence_bp: concept.mean_confidence_bp,
            observations: concept.observations,
        }
    }
}

/// Attribution link as serialized in responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionJson {
    pub derived: String,
    pub source: String,
    pub source_node: String,
    pub kind: String,
    pub recorded_at: u64,
}

impl AttributionJson {
    pub fn from_link(link: &AttributionLink) -> Self {
        Self {
            derived: link.derived.to_string(),
            source: link.source.to_string(),
            source_node: link.source_node.clone(),
            kind: link.kind.as_str().to_string(),
            recorded_at: link.recorded_at,
        }
    }
}

// =============================================================================
// SUBMIT
// =============================================================================

/// One extracted concept span in a submit payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptSpanJson {
    pub label: String,
    pub domain: String,
    #[serde(default)]
    pub confidence_bp: u16,
}

/// Item submit request. Concept spans arrive pre-extracted; the
/// extraction model itself is outside this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub content: String,
    pub author: String,
    /// "local", "friends" or "public"; defaults to "local".
    #[serde(default)]
    pub privacy: Option<String>,
    #[serde(default)]
    pub concepts: Vec<ConceptSpanJson>,
}

/// Item submit response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub id: Option<String>,
    /// "inserted", "revised" or "unchanged".
    pub outcome: Option<String>,
    pub concepts: Vec<ConceptJson>,
    /// Sync jobs queued for this submit (0 for local items).
    pub jobs: usize,
    pub error: Option<String>,
}

impl SubmitResponse {
    pub fn success(
        id: impl std::fmt::Display,
        outcome: &PutOutcome,
        concepts: Vec<ConceptJson>,
        jobs: usize,
    ) -> Self {
        let outcome = match outcome {
            PutOutcome::Inserted => "inserted",
            PutOutcome::Revised { .. } => "revised",
            PutOutcome::Unchanged => "unchanged",
        };
        Self {
            success: true,
            id: Some(id.to_string()),
            outcome: Some(outcome.to_string()),
            concepts,
            jobs,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            outcome: None,
            concepts: vec![],
            jobs: 0,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// ITEM LOOKUP / LISTING / STATS
// =============================================================================

/// Single item response, including its concept edges and attributions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResponse {
    pub success: bool,
    pub item: Option<ItemJson>,
    pub concepts: Vec<ItemConceptJson>,
    pub attributions: Vec<AttributionJson>,
    pub error: Option<String>,
}

/// One item-to-concept edge in an item response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemConceptJson {
    pub id: String,
    pub label: String,
    pub domain: String,
    pub confidence_bp: u16,
}

impl ItemResponse {
    pub fn success(
        item: ItemJson,
        concepts: Vec<ItemConceptJson>,
        attributions: Vec<AttributionJson>,
    ) -> Self {
        Self {
            success: true,
            item: Some(item),
            concepts,
            attributions,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            item: None,
            concepts: vec![],
            attributions: vec![],
            error: Some(msg.into()),
        }
    }
}

/// Item listing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsResponse {
    pub success: bool,
    pub items: Vec<ItemJson>,
    pub error: Option<String>,
}

/// Graph statistics response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub items: usize,
    pub concepts: usize,
    pub edges: usize,
    pub concepts_by_domain: BTreeMap<String, usize>,
}

/// Related-concepts response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedResponse {
    pub success: bool,
    pub concepts: Vec<RelatedConceptJson>,
    pub error: Option<String>,
}

/// One co-occurring concept with its edge weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedConceptJson {
    pub label: String,
    pub domain: String,
    pub weight: i64,
}

impl RelatedResponse {
    pub fn success(related: &[(Concept, EdgeWeight)]) -> Self {
        Self {
            success: true,
            concepts: related
                .iter()
                .map(|(concept, weight)| RelatedConceptJson {
                    label: concept.label.clone(),
                    domain: concept.domain.as_str().to_string(),
                    weight: weight.value(),
                })
                .collect(),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            concepts: vec![],
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// TRIPLE QUERY
// =============================================================================

/// Triple pattern query; unset fields are wildcards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripleQueryRequest {
    pub subject: Option<String>,
    pub predicate: Option<String>,
    /// Matched as a plain literal object.
    pub object: Option<String>,
    /// Matched as an IRI object; takes precedence over `object`.
    pub object_iri: Option<String>,
}

/// Triple query response: matching triples as N-Triples lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripleQueryResponse {
    pub success: bool,
    pub triples: Vec<String>,
    pub error: Option<String>,
}

impl TripleQueryResponse {
    pub fn success(triples: Vec<String>) -> Self {
        Self {
            success: true,
            triples,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            triples: vec![],
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// SEARCH
// =============================================================================

/// Federated search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// "local", "friends" or "public"; defaults to "local".
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Optional inclusive created-at range (unix seconds).
    #[serde(default)]
    pub since: Option<u64>,
    #[serde(default)]
    pub until: Option<u64>,
    /// Optional allow-list of peer ids to query.
    #[serde(default)]
    pub peers: Option<Vec<String>>,
}

/// One search hit with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHitJson {
    /// "local", "friend:<peer>" or "public:<peer>".
    pub provenance: String,
    pub id: String,
    pub origin: String,
    pub author: String,
    pub content: String,
    pub created_at: u64,
    pub privacy: String,
    pub matched_terms: u64,
    pub weight: i64,
}

impl SearchHitJson {
    pub fn from_ranked(hit: &RankedHit) -> Self {
        Self {
            provenance: hit.provenance.clone(),
            id: hit.hit.id.clone(),
            origin: hit.hit.origin.clone(),
            author: hit.hit.author.clone(),
            content: hit.hit.content.clone(),
            created_at: hit.hit.created_at,
            privacy: hit.hit.privacy.clone(),
            matched_terms: hit.hit.matched_terms,
            weight: hit.hit.weight,
        }
    }

    pub fn from_local(hit: &SearchHit) -> Self {
        Self {
            provenance: "local".to_string(),
            id: hit.item.id.to_string(),
            origin: hit.item.origin.clone(),
            author: hit.item.author.clone(),
            content: hit.item.content.clone(),
            created_at: hit.item.created_at,
            privacy: hit.item.privacy.as_str().to_string(),
            matched_terms: hit.matched_terms,
            weight: hit.weight,
        }
    }
}

/// Federated search response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    pub hits: Vec<SearchHitJson>,
    /// Peers that contributed nothing due to timeout or error.
    pub degraded: Vec<String>,
    pub error: Option<String>,
}

impl SearchResponse {
    pub fn success(hits: Vec<SearchHitJson>, degraded: Vec<String>) -> Self {
        Self {
            success: true,
            hits,
            degraded,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            hits: vec![],
            degraded: vec![],
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// PRIVACY / TOMBSTONE / RESYNC
// =============================================================================

/// Privacy change request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyRequest {
    pub level: String,
}

/// Privacy change response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyResponse {
    pub success: bool,
    pub previous: Option<String>,
    pub current: Option<String>,
    pub revision: Option<u64>,
    pub widened: bool,
    /// Sync jobs queued by a widening change.
    pub jobs: usize,
    pub error: Option<String>,
}

impl PrivacyResponse {
    pub fn success(change: &PrivacyChange, jobs: usize) -> Self {
        Self {
            success: true,
            previous: Some(change.previous.as_str().to_string()),
            current: Some(change.current.as_str().to_string()),
            revision: Some(change.revision),
            widened: change.widened,
            jobs,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            previous: None,
            current: None,
            revision: None,
            widened: false,
            jobs: 0,
            error: Some(msg.into()),
        }
    }
}

/// Generic mutation response (tombstone, attribution).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub error: Option<String>,
}

impl AckResponse {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(msg.into()),
        }
    }
}

/// Resync response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResyncResponse {
    pub success: bool,
    /// Failed jobs put back in the queue.
    pub retried: usize,
    pub error: Option<String>,
}

// =============================================================================
// ATTRIBUTION
// =============================================================================

/// Attribution recording request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionRequest {
    /// Hex id of the derived (local) item.
    pub derived: String,
    /// Hex id of the source item.
    pub source: String,
    /// Node the source item came from.
    pub source_node: String,
    /// "derived-from", "references", "quotes" or "reply-to".
    pub kind: String,
}

// =============================================================================
// EXPORT / IMPORT
// =============================================================================

/// Export request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportRequest {
    /// "canonical" (default) or "ntriples".
    #[serde(default)]
    pub format: Option<String>,
}

/// Export response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub success: bool,
    pub format: Option<String>,
    /// Base64-encoded export bytes.
    pub data: Option<String>,
    /// Blake3 hex digest of the canonical form.
    pub digest: Option<String>,
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn success(format: &str, data: &[u8], digest: String) -> Self {
        Self {
            success: true,
            format: Some(format.to_string()),
            data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                data,
            )),
            digest: Some(digest),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            format: None,
            data: None,
            digest: None,
            error: Some(msg.into()),
        }
    }
}

/// Import request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    /// "canonical" (default) or "ntriples".
    #[serde(default)]
    pub format: Option<String>,
    /// Base64-encoded import bytes.
    pub data: String,
}

/// Import response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    pub success: bool,
    pub items: usize,
    pub concepts: usize,
    pub edges: usize,
    pub error: Option<String>,
}

impl ImportResponse {
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            items: 0,
            concepts: 0,
            edges: 0,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// PEERS
// =============================================================================

/// One peer with its sync status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerJson {
    pub id: String,
    pub url: String,
    pub trust: String,
    pub last_sync: Option<u64>,
    pub backlog: usize,
    pub failed: usize,
}

impl PeerJson {
    pub fn from_status(status: &PeerStatus) -> Self {
        Self {
            id: status.id.clone(),
            url: status.url.clone(),
            trust: status.trust.as_str().to_string(),
            last_sync: status.last_sync,
            backlog: status.backlog,
            failed: status.failed,
        }
    }
}

/// One tracked sync job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJobJson {
    pub item: String,
    pub peer: String,
    pub revision: u64,
    pub attempts: u32,
    pub state: String,
    pub last_error: Option<String>,
}

impl SyncJobJson {
    pub fn from_job(job: &SyncJob) -> Self {
        Self {
            item: job.item.to_string(),
            peer: job.peer.clone(),
            revision: job.revision,
            attempts: job.attempts,
            state: job.state.as_str().to_string(),
            last_error: job.last_error.clone(),
        }
    }
}

/// Peer roster response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerJson>,
    pub jobs: Vec<SyncJobJson>,
}

/// Federation delivery response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverResponse {
    pub success: bool,
    /// "stored" or "duplicate".
    pub status: Option<String>,
    pub uri: Option<String>,
    pub error: Option<String>,
}

impl DeliverResponse {
    pub fn success(status: &str, uri: String) -> Self {
        Self {
            success: true,
            status: Some(status.to_string()),
            uri: Some(uri),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            status: None,
            uri: None,
            error: Some(msg.into()),
        }
    }
}
