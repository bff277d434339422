//! # Delivery Envelopes
//!
//! Wire format for item delivery between nodes, and the cipher seam the
//! payload passes through. The envelope carries the content hash and
//! revision in the clear so receivers can acknowledge duplicates without
//! decrypting.

use super::client::ClientError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use weft_core::{Item, ItemId, ItemStatus, NormalizedConcept, PrivacyLevel, RawConcept, normalize};

// =============================================================================
// PAYLOAD CIPHER SEAM
// =============================================================================

/// Encryption and signing seam for delivery payloads, keyed by the
/// opaque per-peer key material from the config.
///
/// A concrete wire encryption scheme is deliberately out of scope; real
/// deployments inject an implementation, development and tests use
/// [`PassthroughCipher`].
pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, key: &str, plaintext: &[u8]) -> Result<Vec<u8>, ClientError>;
    fn decrypt(&self, key: &str, ciphertext: &[u8]) -> Result<Vec<u8>, ClientError>;
    fn sign(&self, key: &str, plaintext: &[u8]) -> String;
    fn verify(&self, key: &str, plaintext: &[u8], signature: &str) -> bool;
}

/// Development cipher: no encryption, keyed blake3 tag as signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl PassthroughCipher {
    fn tag(key: &str, plaintext: &[u8]) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(key.as_bytes());
        hasher.update(&[0u8]);
        hasher.update(plaintext);
        hasher.finalize().to_hex().to_string()
    }
}

impl PayloadCipher for PassthroughCipher {
    fn encrypt(&self, _key: &str, plaintext: &[u8]) -> Result<Vec<u8>, ClientError> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, _key: &str, ciphertext: &[u8]) -> Result<Vec<u8>, ClientError> {
        Ok(ciphertext.to_vec())
    }

    fn sign(&self, key: &str, plaintext: &[u8]) -> String {
        Self::tag(key, plaintext)
    }

    fn verify(&self, key: &str, plaintext: &[u8], signature: &str) -> bool {
        let expected = Self::tag(key, plaintext);
        // Constant-time comparison; the tag is hex so lengths match
        // unless the signature is malformed.
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Item fields as carried inside the encrypted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireItem {
    pub origin: String,
    pub author: String,
    pub content: String,
    pub created_at: u64,
    pub privacy: String,
    pub revision: u64,
}

/// Concept span as carried inside the encrypted payload. Receivers
/// re-normalize, so sender and receiver derive the same concept ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireConcept {
    pub label: String,
    pub domain: String,
    pub confidence_bp: u16,
}

/// The plaintext payload an envelope seals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPayload {
    pub item: WireItem,
    pub concepts: Vec<WireConcept>,
}

/// One delivery: metadata in the clear, payload sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEnvelope {
    pub sender: String,
    pub recipient: String,
    /// Hex content hash of the carried item (its id).
    pub content_hash: String,
    pub revision: u64,
    /// Base64 ciphertext of the JSON [`ItemPayload`].
    pub payload: String,
    /// Signature over the plaintext payload.
    pub signature: String,
    /// Unix seconds at seal time.
    pub timestamp: u64,
}

/// Acknowledgement returned by the receiving node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAck {
    /// "stored" for a new copy or revision, "duplicate" for a known one.
    pub status: String,
    /// Remote URI of the stored copy, recorded on the sender's item.
    pub uri: Option<String>,
}

impl DeliveryAck {
    pub fn is_duplicate(&self) -> bool {
        self.status == "duplicate"
    }
}

// =============================================================================
// SEAL / OPEN
// =============================================================================

/// Seal an item and its concept edges into an envelope for one peer.
pub fn seal(
    cipher: &dyn PayloadCipher,
    sender: &str,
    recipient: &str,
    key: &str,
    item: &Item,
    concepts: &[WireConcept],
    timestamp: u64,
) -> Result<DeliveryEnvelope, ClientError> {
    let payload = ItemPayload {
        item: WireItem {
            origin: item.origin.clone(),
            author: item.author.clone(),
            content: item.content.clone(),
            created_at: item.created_at,
            privacy: item.privacy.as_str().to_string(),
            revision: item.revision,
        },
        concepts: concepts.to_vec(),
    };
    let plaintext =
        serde_json::to_vec(&payload).map_err(|e| ClientError::ParseError(e.to_string()))?;
    let signature = cipher.sign(key, &plaintext);
    let ciphertext = cipher.encrypt(key, &plaintext)?;
    Ok(DeliveryEnvelope {
        sender: sender.to_string(),
        recipient: recipient.to_string(),
        content_hash: item.id.to_string(),
        revision: item.revision,
        payload: BASE64.encode(&ciphertext),
        signature,
        timestamp,
    })
}

/// Open a received envelope: decrypt, verify, reconstruct the item and
/// re-normalize its concept spans.
///
/// The reconstructed item keeps its remote origin and revision; the
/// content hash in the clear must match the content-derived id.
pub fn open(
    cipher: &dyn PayloadCipher,
    key: &str,
    envelope: &DeliveryEnvelope,
) -> Result<(Item, Vec<NormalizedConcept>), ClientError> {
    let ciphertext = BASE64
        .decode(&envelope.payload)
        .map_err(|e| ClientError::ParseError(format!("payload base64: {e}")))?;
    let plaintext = cipher.decrypt(key, &ciphertext)?;
    if !cipher.verify(key, &plaintext, &envelope.signature) {
        return Err(ClientError::CipherError("signature mismatch".to_string()));
    }
    let payload: ItemPayload =
        serde_json::from_slice(&plaintext).map_err(|e| ClientError::ParseError(e.to_string()))?;

    let privacy = PrivacyLevel::parse(&payload.item.privacy)
        .ok_or_else(|| ClientError::ParseError(format!("privacy '{}'", payload.item.privacy)))?;
    let mut item = Item::new(
        &payload.item.content,
        payload.item.origin.clone(),
        &payload.item.author,
        payload.item.created_at,
        privacy,
    );
    item.revision = payload.item.revision;
    item.status = ItemStatus::Active;

    let declared = ItemId::parse(&envelope.content_hash)
        .ok_or_else(|| ClientError::ParseError("malformed content hash".to_string()))?;
    if declared != item.id {
        return Err(ClientError::ParseError(
            "content hash does not match payload content".to_string(),
        ));
    }
    if envelope.revision != item.revision {
        return Err(ClientError::ParseError(
            "envelope revision does not match payload revision".to_string(),
        ));
    }

    let mut concepts = Vec::with_capacity(payload.concepts.len());
    for span in &payload.concepts {
        let raw = RawConcept {
            label: span.label.clone(),
            domain: span.domain.clone(),
            confidence_bp: span.confidence_bp,
        };
        let normalized =
            normalize(&raw).map_err(|e| ClientError::ParseError(format!("concept: {e}")))?;
        concepts.push(normalized);
    }
    Ok((item, concepts))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> Item {
        Item::new(
            "raft elects a single leader per term",
            "node-a",
            "alice",
            1_700_000_000,
            PrivacyLevel::Friends,
        )
    }

    fn sample_concepts() -> Vec<WireConcept> {
        vec![
            WireConcept {
                label: "Raft".to_string(),
                domain: "cs".to_string(),
                confidence_bp: 9_000,
            },
            WireConcept {
                label: "leader election".to_string(),
                domain: "cs".to_string(),
                confidence_bp: 8_000,
            },
        ]
    }

    #[test]
    fn test_seal_open_round_trip() {
        let cipher = PassthroughCipher;
        let item = sample_item();
        let envelope = seal(
            &cipher,
            "node-a",
            "node-b",
            "secret",
            &item,
            &sample_concepts(),
            1_700_000_001,
        )
        .expect("seal");

        assert_eq!(envelope.content_hash, item.id.to_string());
        assert_eq!(envelope.revision, 1);

        let (opened, concepts) = open(&cipher, "secret", &envelope).expect("open");
        assert_eq!(opened.id, item.id);
        assert_eq!(opened.origin, "node-a");
        assert_eq!(opened.privacy, PrivacyLevel::Friends);
        assert_eq!(concepts.len(), 2);
        // Receiver-side normalization lower-cases the label.
        assert_eq!(concepts[0].label, "raft");
    }

    #[test]
    fn test_wrong_key_rejected() {
        let cipher = PassthroughCipher;
        let envelope = seal(
            &cipher,
            "node-a",
            "node-b",
            "secret",
            &sample_item(),
            &sample_concepts(),
            0,
        )
        .expect("seal");
        let result = open(&cipher, "other", &envelope);
        assert!(matches!(result, Err(ClientError::CipherError(_))));
    }

    #[test]
    fn test_tampered_hash_rejected() {
        let cipher = PassthroughCipher;
        let other = Item::new("different content", "node-a", "alice", 0, PrivacyLevel::Public);
        let mut envelope = seal(
            &cipher,
            "node-a",
            "node-b",
            "secret",
            &sample_item(),
            &sample_concepts(),
            0,
        )
        .expect("seal");
        envelope.content_hash = other.id.to_string();
        assert!(open(&cipher, "secret", &envelope).is_err());
    }

    #[test]
    fn test_garbage_payload_rejected() {
        let cipher = PassthroughCipher;
        let envelope = DeliveryEnvelope {
            sender: "x".to_string(),
            recipient: "y".to_string(),
            content_hash: "00".repeat(16),
            revision: 1,
            payload: "not base64 %%%".to_string(),
            signature: String::new(),
            timestamp: 0,
        };
        assert!(matches!(
            open(&cipher, "k", &envelope),
            Err(ClientError::ParseError(_))
        ));
    }
}
