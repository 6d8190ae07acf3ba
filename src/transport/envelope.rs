//! Signed envelopes carried by the transports

use crate::crypto::{address_matches_public_key, sha256, sha256_hex, verify_hex};
use crate::transport::TransportError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message on the wire
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub source_transport_address: String,
    pub destination_transport_address: String,
    pub source_wallet_address: String,
    /// Unknown while auto-config runs
    pub destination_wallet_address: Option<String>,
    /// Public key the source wallet address derives from (hex)
    pub source_public_key: String,
    /// Wire tag of the message type
    pub message_type: u32,
    pub round: u32,
    pub wallet_height: u64,
    /// Payload (hex)
    pub content: String,
    /// SHA-256 of the payload (hex)
    pub hash: String,
    /// Signature over `signing_data` (hex)
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    /// Set by the transport that holds the envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
}

impl Envelope {
    /// Build an unsigned envelope around `content`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_transport_address: &str,
        destination_transport_address: &str,
        source_wallet_address: &str,
        destination_wallet_address: Option<&str>,
        message_type: u32,
        round: u32,
        wallet_height: u64,
        content: &[u8],
    ) -> Self {
        Self {
            source_transport_address: source_transport_address.to_string(),
            destination_transport_address: destination_transport_address.to_string(),
            source_wallet_address: source_wallet_address.to_string(),
            destination_wallet_address: destination_wallet_address.map(str::to_string),
            source_public_key: String::new(),
            message_type,
            round,
            wallet_height,
            content: hex::encode(content),
            hash: sha256_hex(content),
            signature: String::new(),
            timestamp: Utc::now(),
            transport_id: None,
        }
    }

    /// Digest the signature covers: payload hash plus routing header
    pub fn signing_data(&self) -> Vec<u8> {
        let header = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.hash,
            self.source_wallet_address,
            self.destination_wallet_address.as_deref().unwrap_or(""),
            self.destination_transport_address,
            self.message_type,
            self.round,
            self.wallet_height,
            self.timestamp.timestamp()
        );
        sha256(header.as_bytes())
    }

    /// Attach the sender's public key and signature
    pub fn seal<F, E>(mut self, public_key: String, sign: F) -> Result<Self, E>
    where
        F: FnOnce(&[u8]) -> Result<String, E>,
    {
        self.source_public_key = public_key;
        self.signature = sign(&self.signing_data())?;
        Ok(self)
    }

    /// Decoded payload
    pub fn payload(&self) -> Result<Vec<u8>, TransportError> {
        hex::decode(&self.content)
            .map_err(|_| TransportError::InvalidEnvelope("content is not hex".to_string()))
    }

    /// Check payload hash, key-to-address binding and signature; returns
    /// the payload
    pub fn verify(&self) -> Result<Vec<u8>, TransportError> {
        let payload = self.payload()?;
        if sha256_hex(&payload) != self.hash {
            return Err(TransportError::InvalidEnvelope(
                "content hash mismatch".to_string(),
            ));
        }
        if !address_matches_public_key(&self.source_wallet_address, &self.source_public_key) {
            return Err(TransportError::InvalidEnvelope(format!(
                "public key does not belong to {}",
                self.source_wallet_address
            )));
        }
        match verify_hex(&self.source_public_key, &self.signing_data(), &self.signature) {
            Ok(true) => Ok(payload),
            _ => Err(TransportError::InvalidEnvelope("bad signature".to_string())),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyError, KeyPair};

    fn sealed(key_pair: &KeyPair, to: &str, content: &[u8]) -> Envelope {
        Envelope::new("alice@r", to, &key_pair.address(), Some("1Bob"), 5, 0, 0, content)
            .seal::<_, KeyError>(key_pair.public_key_hex(), |data| key_pair.sign_hex(data))
            .unwrap()
    }

    #[test]
    fn test_sealed_envelope_verifies() {
        let key_pair = KeyPair::generate();
        let envelope = sealed(&key_pair, "bob@r", b"hello");
        assert_eq!(envelope.verify().unwrap(), b"hello".to_vec());
    }

    #[test]
    fn test_tampered_content_rejected() {
        let key_pair = KeyPair::generate();
        let mut envelope = sealed(&key_pair, "bob@r", b"hello");
        envelope.content = hex::encode(b"hellO");
        assert!(matches!(envelope.verify(), Err(TransportError::InvalidEnvelope(_))));
    }

    #[test]
    fn test_tampered_header_rejected() {
        let key_pair = KeyPair::generate();
        let mut envelope = sealed(&key_pair, "bob@r", b"hello");
        envelope.message_type = 4;
        assert!(envelope.verify().is_err());
    }

    #[test]
    fn test_foreign_key_rejected() {
        let key_pair = KeyPair::generate();
        let mallory = KeyPair::generate();
        let envelope = Envelope::new("m@r", "bob@r", &key_pair.address(), None, 5, 0, 0, b"x")
            .seal::<_, KeyError>(mallory.public_key_hex(), |data| mallory.sign_hex(data))
            .unwrap();
        assert!(envelope.verify().is_err());
    }

    #[test]
    fn test_json_omits_missing_transport_id() {
        let key_pair = KeyPair::generate();
        let envelope = sealed(&key_pair, "bob@r", b"x");
        let json = String::from_utf8(envelope.to_bytes().unwrap()).unwrap();
        assert!(!json.contains("transport_id"));
        assert_eq!(Envelope::from_bytes(json.as_bytes()).unwrap(), envelope);
    }
}
