//! # Peer HTTP Transport
//!
//! Wrapper around the federation endpoints of remote Weft nodes.
//! The [`PeerTransport`] trait is the seam the sync agent and the query
//! router talk through; tests substitute an in-memory stub.

use super::envelope::{DeliveryAck, DeliveryEnvelope};
use super::peer::FederationPeer;
use super::router::{RemoteSearchRequest, RemoteSearchResponse};
use async_trait::async_trait;

// =============================================================================
// CLIENT ERRORS
// =============================================================================

/// Errors from the federation network layer.
///
/// These never surface as `WeftError`: transient ones drive sync-job
/// retries and search degradation, terminal ones end the job.
#[derive(Debug)]
pub enum ClientError {
    /// Cannot reach the peer.
    ConnectionFailed(String),
    /// 401 Unauthorized - peer rejected our key.
    Unauthorized,
    /// 429 Too Many Requests.
    RateLimited,
    /// Peer returned a 5xx error.
    ServerError(u16, String),
    /// Failed to parse the peer's response body.
    ParseError(String),
    /// Payload cipher failure.
    CipherError(String),
}

impl ClientError {
    /// Whether a delivery failing with this error should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::RateLimited | Self::ServerError(_, _)
        )
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed(url) => write!(f, "cannot connect to peer at {url}"),
            Self::Unauthorized => write!(f, "unauthorized: peer rejected key"),
            Self::RateLimited => write!(f, "rate limited: too many requests"),
            Self::ServerError(status, msg) => write!(f, "peer error ({status}): {msg}"),
            Self::ParseError(msg) => write!(f, "parse error: {msg}"),
            Self::CipherError(msg) => write!(f, "cipher error: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

// =============================================================================
// TRANSPORT SEAM
// =============================================================================

/// Network operations the federation layer performs against one peer.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver an item envelope to the peer.
    async fn deliver(
        &self,
        peer: &FederationPeer,
        envelope: &DeliveryEnvelope,
    ) -> Result<DeliveryAck, ClientError>;

    /// Run a scoped search on the peer.
    async fn search(
        &self,
        peer: &FederationPeer,
        request: &RemoteSearchRequest,
    ) -> Result<RemoteSearchResponse, ClientError>;
}

// =============================================================================
// HTTP TRANSPORT
// =============================================================================

/// Production transport speaking HTTP/JSON to peer nodes.
#[derive(Clone, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Build a POST request with the peer's key as bearer auth.
    fn post(&self, peer: &FederationPeer, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", peer.url, path);
        let mut req = self.http.post(&url);
        if !peer.key.is_empty() {
            req = req.bearer_auth(&peer.key);
        }
        req
    }

    /// Map status codes and connection failures onto [`ClientError`].
    async fn check_status(
        peer: &FederationPeer,
        result: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response, ClientError> {
        let resp =
            result.map_err(|e| ClientError::ConnectionFailed(format!("{}: {e}", peer.url)))?;
        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::RateLimited);
        }
        if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::ServerError(status.as_u16(), body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn deliver(
        &self,
        peer: &FederationPeer,
        envelope: &DeliveryEnvelope,
    ) -> Result<DeliveryAck, ClientError> {
        let sent = self.post(peer, "/federation/deliver").json(envelope).send().await;
        let resp = Self::check_status(peer, sent).await?;
        resp.json::<DeliveryAck>()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))
    }

    async fn search(
        &self,
        peer: &FederationPeer,
        request: &RemoteSearchRequest,
    ) -> Result<RemoteSearchResponse, ClientError> {
        let sent = self.post(peer, "/federation/search").json(request).send().await;
        let resp = Self::check_status(peer, sent).await?;
        resp.json::<RemoteSearchResponse>()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))
    }
}
