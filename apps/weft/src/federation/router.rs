//! # Federated Query Router
//!
//! Local search first, then concurrent fan-out to peers with per-peer
//! timeouts. A peer that times out or errors contributes zero results
//! and is recorded as degraded; the search itself never fails on
//! network trouble. Merged results are deduplicated by content hash
//! (local provenance wins) and ranked deterministically.

use super::client::PeerTransport;
use super::peer::FederationPeer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use weft_core::{PrivacyLevel, SearchHit, Session, WeftError};

// =============================================================================
// SEARCH SCOPE
// =============================================================================

/// How far a search reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// This node only.
    Local,
    /// This node plus friend-tier peers.
    Friends,
    /// This node plus every configured peer.
    Public,
}

impl SearchScope {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Friends => "friends",
            Self::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "friends" => Some(Self::Friends),
            "public" => Some(Self::Public),
            _ => None,
        }
    }

    /// Whether a peer with the given trust tier is queried at this scope.
    fn includes(self, trust: PrivacyLevel) -> bool {
        match self {
            Self::Local => false,
            Self::Friends => trust == PrivacyLevel::Friends,
            Self::Public => trust >= PrivacyLevel::Friends,
        }
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Search request sent to a peer's `/federation/search` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSearchRequest {
    /// Requesting node id; the peer caps visibility by its trust tier
    /// for this requester.
    pub requester: String,
    pub query: String,
    pub limit: usize,
}

/// One hit as returned by a peer (or produced locally).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteHit {
    /// Hex content hash, the dedup key across nodes.
    pub id: String,
    pub origin: String,
    pub author: String,
    pub content: String,
    pub created_at: u64,
    pub privacy: String,
    pub matched_terms: u64,
    pub weight: i64,
}

impl RemoteHit {
    pub fn from_hit(hit: &SearchHit) -> Self {
        Self {
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

/// Response body of `/federation/search`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteSearchResponse {
    pub hits: Vec<RemoteHit>,
}

// =============================================================================
// MERGED OUTPUT
// =============================================================================

/// One merged hit with its provenance tag: `local`, `friend:<peer>` or
/// `public:<peer>`.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub provenance: String,
    pub hit: RemoteHit,
}

/// Merged, ranked search output plus degraded-peer metadata.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub hits: Vec<RankedHit>,
    /// Peers that timed out or errored, sorted by id.
    pub degraded: Vec<String>,
}

/// Parameters of one federated search.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub scope: SearchScope,
    pub limit: usize,
    /// Optional created-at range filter (inclusive unix seconds).
    pub since: Option<u64>,
    pub until: Option<u64>,
    /// Optional allow-list restricting which peers are queried.
    pub peer_allowlist: Option<Vec<String>>,
}

impl SearchParams {
    fn in_range(&self, created_at: u64) -> bool {
        self.since.is_none_or(|s| created_at >= s)
            && self.until.is_none_or(|u| created_at <= u)
    }
}

// =============================================================================
// ROUTER
// =============================================================================

/// Run a federated search: local results synchronously, remote fan-out
/// bounded by `per_peer_timeout`.
///
/// Dropping the returned future aborts in-flight peer requests (the
/// `JoinSet` aborts its tasks on drop).
pub async fn federated_search(
    session: &Arc<RwLock<Session>>,
    peers: &Arc<RwLock<BTreeMap<String, FederationPeer>>>,
    transport: &Arc<dyn PeerTransport>,
    node_id: &str,
    params: &SearchParams,
    per_peer_timeout: Duration,
) -> Result<SearchOutcome, WeftError> {
    // Local search never depends on the network.
    let local_hits = {
        let session = session.read().await;
        session.search(&params.query, PrivacyLevel::Local, params.limit)?
    };

    let targets: Vec<FederationPeer> = {
        let peers = peers.read().await;
        peers
            .values()
            .filter(|p| params.scope.includes(p.trust))
            .filter(|p| {
                params
                    .peer_allowlist
                    .as_ref()
                    .is_none_or(|allow| allow.iter().any(|id| id == &p.id))
            })
            .cloned()
            .collect()
    };

    let request = RemoteSearchRequest {
        requester: node_id.to_string(),
        query: params.query.clone(),
        limit: params.limit,
    };

    let mut fanout: JoinSet<(FederationPeer, Option<RemoteSearchResponse>)> = JoinSet::new();
    for peer in targets {
        let transport = Arc::clone(transport);
        let request = request.clone();
        fanout.spawn(async move {
            match tokio::time::timeout(per_peer_timeout, transport.search(&peer, &request)).await
            {
                Ok(Ok(response)) => (peer, Some(response)),
                Ok(Err(e)) => {
                    tracing::warn!(peer = %peer.id, error = %e, "peer search failed");
                    (peer, None)
                }
                Err(_) => {
                    tracing::warn!(peer = %peer.id, "peer search timed out");
                    (peer, None)
                }
            }
        });
    }

    let mut remote: Vec<(FederationPeer, RemoteSearchResponse)> = Vec::new();
    let mut degraded = Vec::new();
    while let Some(joined) = fanout.join_next().await {
        match joined {
            Ok((peer, Some(response))) => remote.push((peer, response)),
            Ok((peer, None)) => degraded.push(peer.id),
            Err(e) => tracing::error!(error = %e, "peer search task panicked"),
        }
    }
    // Join completion order is nondeterministic; sort before merging so
    // the merge itself is not.
    remote.sort_by(|(a, _), (b, _)| a.id.cmp(&b.id));
    degraded.sort();

    let mut merged: BTreeMap<String, RankedHit> = BTreeMap::new();
    for hit in &local_hits {
        let hit = RemoteHit::from_hit(hit);
        if params.in_range(hit.created_at) {
            merged.insert(
                hit.id.clone(),
                RankedHit {
                    provenance: "local".to_string(),
                    hit,
                },
            );
        }
    }
    for (peer, response) in &remote {
        for hit in &response.hits {
            if !params.in_range(hit.created_at) {
                continue;
            }
            // Local provenance wins; earlier (id-sorted) peers win ties.
            merged.entry(hit.id.clone()).or_insert_with(|| RankedHit {
                provenance: peer.provenance(),
                hit: hit.clone(),
            });
        }
    }

    let mut hits: Vec<RankedHit> = merged.into_values().collect();
    hits.sort_by(|a, b| {
        b.hit
            .matched_terms
            .cmp(&a.hit.matched_terms)
            .then(b.hit.weight.cmp(&a.hit.weight))
            .then(b.hit.created_at.cmp(&a.hit.created_at))
            .then(a.hit.id.cmp(&b.hit.id))
    });
    hits.truncate(params.limit);

    Ok(SearchOutcome { hits, degraded })
}

/// Serve a peer's search request against the local store, capping
/// visibility by the requester's trust tier: registered friend-tier
/// peers see `Friends` and up, everyone else `Public` only.
pub fn remote_search(
    session: &Session,
    requester_trust: Option<PrivacyLevel>,
    request: &RemoteSearchRequest,
) -> Result<RemoteSearchResponse, WeftError> {
    let floor = match requester_trust {
        Some(PrivacyLevel::Friends) => PrivacyLevel::Friends,
        _ => PrivacyLevel::Public,
    };
    let hits = session.search(&request.query, floor, request.limit)?;
    Ok(RemoteSearchResponse {
        hits: hits.iter().map(RemoteHit::from_hit).collect(),
    })
}
