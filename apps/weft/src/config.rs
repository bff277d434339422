//! # Node Configuration
//!
//! TOML configuration for a Weft node: the node's own identity, the
//! sync agent's retry policy, and the peer roster.
//!
//! ```toml
//! [node]
//! id = "node-a"
//! name = "Alice's graph"
//! base_url = "http://localhost:8080"
//!
//! [sync]
//! backoff_base_ms = 500
//! backoff_cap_ms = 60000
//! max_attempts = 8
//! per_peer_timeout_ms = 2000
//!
//! [[peers]]
//! id = "node-b"
//! url = "http://localhost:8081"
//! trust = "friends"
//! key = "shared-secret-b"
//! ```
//!
//! Peers with `trust = "public"` are the public servers that receive
//! `Public` items; peers with `trust = "friends"` additionally receive
//! `Friends` items encrypted with their key.

use serde::{Deserialize, Serialize};
use std::path::Path;
use weft_core::{PrivacyLevel, WeftError};

// =============================================================================
// NODE SECTION
// =============================================================================

/// The node's own identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Stable node identifier, stamped as `origin` on local items.
    pub id: String,
    /// Human-readable name, published in the discovery document.
    #[serde(default)]
    pub name: String,
    /// Externally reachable base URL of this node.
    #[serde(default)]
    pub base_url: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            id: "local".to_string(),
            name: String::new(),
            base_url: String::new(),
        }
    }
}

// =============================================================================
// SYNC SECTION
// =============================================================================

/// Retry policy for the sync agent and the federated search timeout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncSection {
    /// First retry delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on the (doubling) retry delay.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Delivery attempts before a job goes terminal `Failed`.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Per-peer timeout for federated search fan-out.
    #[serde(default = "default_per_peer_timeout_ms")]
    pub per_peer_timeout_ms: u64,
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    8
}

fn default_per_peer_timeout_ms() -> u64 {
    2_000
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_attempts: default_max_attempts(),
            per_peer_timeout_ms: default_per_peer_timeout_ms(),
        }
    }
}

// =============================================================================
// PEER ENTRIES
// =============================================================================

/// One configured peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Peer node identifier.
    pub id: String,
    /// Peer base URL.
    pub url: String,
    /// Trust tier: the broadest privacy level this peer may receive
    /// ("friends" or "public").
    pub trust: String,
    /// Opaque key material handed to the payload cipher and used as the
    /// bearer token on deliveries.
    #[serde(default)]
    pub key: String,
}

impl PeerEntry {
    /// Parse the trust tier, rejecting unknown values.
    pub fn trust_tier(&self) -> Result<PrivacyLevel, WeftError> {
        PrivacyLevel::parse(&self.trust).ok_or_else(|| {
            WeftError::Validation(format!("unknown trust tier '{}'", self.trust))
        })
    }
}

// =============================================================================
// TOP-LEVEL CONFIG
// =============================================================================

/// Full node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

impl NodeConfig {
    /// Parse a configuration document.
    pub fn parse(text: &str) -> Result<Self, WeftError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| WeftError::Deserialization(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk.
    pub fn load(path: &Path) -> Result<Self, WeftError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| WeftError::Io(format!("read config {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    /// Check invariants a parsed config must satisfy.
    fn validate(&self) -> Result<(), WeftError> {
        if self.node.id.is_empty() {
            return Err(WeftError::Validation("node.id must not be empty".to_string()));
        }
        for peer in &self.peers {
            if peer.id.is_empty() || peer.url.is_empty() {
                return Err(WeftError::Validation(
                    "peer entries need both id and url".to_string(),
                ));
            }
            if peer.id == self.node.id {
                return Err(WeftError::Validation(format!(
                    "peer '{}' duplicates the node's own id",
                    peer.id
                )));
            }
            let tier = peer.trust_tier()?;
            if tier == PrivacyLevel::Local {
                return Err(WeftError::Validation(format!(
                    "peer '{}': trust tier must be friends or public",
                    peer.id
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config = NodeConfig::parse(
            r#"
            [node]
            id = "node-a"
            name = "Alice"
            base_url = "http://localhost:8080"

            [sync]
            backoff_base_ms = 100
            max_attempts = 3

            [[peers]]
            id = "node-b"
            url = "http://localhost:8081"
            trust = "friends"
            key = "secret"

            [[peers]]
            id = "hub"
            url = "https://hub.example"
            trust = "public"
            "#,
        )
        .expect("parse");

        assert_eq!(config.node.id, "node-a");
        assert_eq!(config.sync.backoff_base_ms, 100);
        assert_eq!(config.sync.max_attempts, 3);
        // Unset sync fields fall back to defaults.
        assert_eq!(config.sync.backoff_cap_ms, 60_000);
        assert_eq!(config.peers.len(), 2);
        assert_eq!(
            config.peers[0].trust_tier().expect("tier"),
            PrivacyLevel::Friends
        );
        assert_eq!(
            config.peers[1].trust_tier().expect("tier"),
            PrivacyLevel::Public
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = NodeConfig::parse("[node]\nid = \"solo\"\n").expect("parse");
        assert_eq!(config.node.id, "solo");
        assert!(config.peers.is_empty());
        assert_eq!(config.sync.max_attempts, 8);
    }

    #[test]
    fn test_local_trust_tier_rejected() {
        let result = NodeConfig::parse(
            r#"
            [node]
            id = "node-a"

            [[peers]]
            id = "node-b"
            url = "http://localhost:8081"
            trust = "local"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_peer_with_own_id_rejected() {
        let result = NodeConfig::parse(
            r#"
            [node]
            id = "node-a"

            [[peers]]
            id = "node-a"
            url = "http://localhost:8081"
            trust = "public"
            "#,
        );
        assert!(result.is_err());
    }
}
