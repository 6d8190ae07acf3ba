//! Cryptographic utilities
//!
//! This module provides:
//! - SHA-256 / HASH160 hashing and Base58Check encoding
//! - ECDSA key management (secp256k1) for wallet identity and envelope signing

pub mod hash;
pub mod keys;

pub use hash::{add_digest, base58check, hash160, sha256, sha256_hex};
pub use keys::{
    address_matches_public_key, public_key_from_hex, public_key_to_address, sign_message,
    verify_hex, verify_signature, KeyError, KeyPair,
};
