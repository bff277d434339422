//! # Federation Peers
//!
//! Runtime representation of a configured peer node.

use crate::config::PeerEntry;
use weft_core::{PrivacyLevel, WeftError};

/// A remote node this node federates with.
#[derive(Debug, Clone)]
pub struct FederationPeer {
    /// Peer node identifier.
    pub id: String,
    /// Peer base URL.
    pub url: String,
    /// Broadest privacy level this peer may receive.
    pub trust: PrivacyLevel,
    /// Opaque key material handed to the payload cipher.
    pub key: String,
    /// Unix seconds of the last acknowledged delivery, if any.
    pub last_sync: Option<u64>,
}

impl FederationPeer {
    /// Build a runtime peer from a config entry.
    pub fn from_entry(entry: &PeerEntry) -> Result<Self, WeftError> {
        Ok(Self {
            id: entry.id.clone(),
            url: entry.url.trim_end_matches('/').to_string(),
            trust: entry.trust_tier()?,
            key: entry.key.clone(),
            last_sync: None,
        })
    }

    /// Whether this peer may receive items at the given privacy level.
    pub fn accepts(&self, level: PrivacyLevel) -> bool {
        match level {
            PrivacyLevel::Local => false,
            PrivacyLevel::Friends => self.trust >= PrivacyLevel::Friends,
            // Public items go to public servers only; friend-tier peers
            // can fetch them through search instead of receiving copies.
            PrivacyLevel::Public => self.trust == PrivacyLevel::Public,
        }
    }

    /// Provenance tag for results served by this peer.
    pub fn provenance(&self) -> String {
        match self.trust {
            PrivacyLevel::Public => format!("public:{}", self.id),
            _ => format!("friend:{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(trust: &str) -> PeerEntry {
        PeerEntry {
            id: "node-b".to_string(),
            url: "http://localhost:8081/".to_string(),
            trust: trust.to_string(),
            key: "k".to_string(),
        }
    }

    #[test]
    fn test_trailing_slash_stripped() {
        let peer = FederationPeer::from_entry(&entry("friends")).expect("peer");
        assert_eq!(peer.url, "http://localhost:8081");
    }

    #[test]
    fn test_friend_peer_accepts_friends_not_public() {
        let peer = FederationPeer::from_entry(&entry("friends")).expect("peer");
        assert!(peer.accepts(PrivacyLevel::Friends));
        assert!(!peer.accepts(PrivacyLevel::Public));
        assert!(!peer.accepts(PrivacyLevel::Local));
    }

    #[test]
    fn test_public_server_accepts_both_shared_tiers() {
        let peer = FederationPeer::from_entry(&entry("public")).expect("peer");
        assert!(peer.accepts(PrivacyLevel::Public));
        assert!(peer.accepts(PrivacyLevel::Friends));
        assert_eq!(peer.provenance(), "public:node-b");
    }
}
