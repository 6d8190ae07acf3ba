//! ECDSA key management
//!
//! Every wallet owns a secp256k1 key pair. Its address identifies the signer
//! in the signer registry, and its signature authenticates every transport
//! envelope the wallet sends.

use rand::rngs::OsRng;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use super::hash::{base58check, hash160, sha256};

/// Address version byte for single-key wallet addresses
pub const ADDRESS_VERSION: u8 = 0x00;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a hex string
    pub fn private_key_hex(&self) -> String {
        hex::encode(self.secret_key.secret_bytes())
    }

    /// Get the public key as a hex string (compressed format)
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.serialize())
    }

    /// Wallet address: Base58Check(RIPEMD160(SHA256(pubkey)))
    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }

    /// Sign a message hash with the private key
    pub fn sign(&self, message_hash: &[u8]) -> Result<Vec<u8>, KeyError> {
        sign_message(&self.secret_key, message_hash)
    }

    /// Sign and hex-encode, the form carried in envelopes and tx containers
    pub fn sign_hex(&self, message_hash: &[u8]) -> Result<String, KeyError> {
        Ok(hex::encode(self.sign(message_hash)?))
    }

    /// Verify a signature against this key pair's public key
    pub fn verify(&self, message_hash: &[u8], signature: &[u8]) -> Result<bool, KeyError> {
        verify_signature(&self.public_key, message_hash, signature)
    }
}

/// Convert a public key to a wallet address
pub fn public_key_to_address(public_key: &PublicKey) -> String {
    base58check(ADDRESS_VERSION, &hash160(&public_key.serialize()))
}

/// Parse a public key from hex string
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey, KeyError> {
    let bytes = hex::decode(hex_key).map_err(|_| KeyError::InvalidPublicKey)?;
    PublicKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPublicKey)
}

/// True when `public_key_hex` parses and derives exactly `address`
pub fn address_matches_public_key(address: &str, public_key_hex: &str) -> bool {
    match public_key_from_hex(public_key_hex) {
        Ok(pk) => public_key_to_address(&pk) == address,
        Err(_) => false,
    }
}

/// Sign a message hash with a secret key
pub fn sign_message(secret_key: &SecretKey, message_hash: &[u8]) -> Result<Vec<u8>, KeyError> {
    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(&digest32(message_hash))?;
    let signature = secp.sign_ecdsa(&message, secret_key);
    Ok(signature.serialize_compact().to_vec())
}

/// Verify a signature against a public key
pub fn verify_signature(
    public_key: &PublicKey,
    message_hash: &[u8],
    signature: &[u8],
) -> Result<bool, KeyError> {
    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(&digest32(message_hash))?;
    let sig = secp256k1::ecdsa::Signature::from_compact(signature)
        .map_err(|_| KeyError::InvalidSignature)?;

    Ok(secp.verify_ecdsa(&message, &sig, public_key).is_ok())
}

/// Verify a hex signature against a hex public key
pub fn verify_hex(public_key_hex: &str, message_hash: &[u8], signature_hex: &str) -> Result<bool, KeyError> {
    let public_key = public_key_from_hex(public_key_hex)?;
    let signature = hex::decode(signature_hex).map_err(|_| KeyError::InvalidSignature)?;
    verify_signature(&public_key, message_hash, &signature)
}

// secp256k1 signs exactly 32 bytes
fn digest32(message_hash: &[u8]) -> Vec<u8> {
    if message_hash.len() == 32 {
        message_hash.to_vec()
    } else {
        sha256(message_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_generation() {
        let kp = KeyPair::generate();
        assert!(!kp.private_key_hex().is_empty());
        assert!(!kp.public_key_hex().is_empty());
        assert!(kp.address().starts_with('1'));
    }

    #[test]
    fn test_sign_and_verify_hex() {
        let kp = KeyPair::generate();
        let hash = sha256(b"envelope content");

        let signature = kp.sign_hex(&hash).unwrap();
        assert!(verify_hex(&kp.public_key_hex(), &hash, &signature).unwrap());

        let other = sha256(b"tampered content");
        assert!(!verify_hex(&kp.public_key_hex(), &other, &signature).unwrap());
    }

    #[test]
    fn test_key_pair_from_hex() {
        let kp1 = KeyPair::generate();
        let kp2 = KeyPair::from_private_key_hex(&kp1.private_key_hex()).unwrap();
        assert_eq!(kp1.public_key_hex(), kp2.public_key_hex());
        assert_eq!(kp1.address(), kp2.address());
    }

    #[test]
    fn test_address_matches_public_key() {
        let kp = KeyPair::generate();
        let stranger = KeyPair::generate();

        assert!(address_matches_public_key(&kp.address(), &kp.public_key_hex()));
        assert!(!address_matches_public_key(&kp.address(), &stranger.public_key_hex()));
        assert!(!address_matches_public_key(&kp.address(), "not hex"));
    }
}
