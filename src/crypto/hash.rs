//! Hashing helpers shared by the message store, the transports and the wallet
//!
//! Content hashes of transport envelopes, auto-config token checksums,
//! token-derived transport addresses and the signer config checksum are all
//! built from the functions in this module.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// Computes SHA-256 hash and returns it as a hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// RIPEMD160(SHA256(data)), the 20 byte digest used for addresses
pub fn hash160(data: &[u8]) -> Vec<u8> {
    let mut ripemd = Ripemd160::new();
    ripemd.update(sha256(data));
    ripemd.finalize().to_vec()
}

/// Base58Check encoding: version || payload || first 4 bytes of double SHA-256
pub fn base58check(version: u8, payload: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(payload.len() + 5);
    bytes.push(version);
    bytes.extend_from_slice(payload);

    let checksum = sha256(&sha256(&bytes));
    bytes.extend_from_slice(&checksum[..4]);

    bs58::encode(bytes).into_string()
}

/// Adds `summand` into `sum` byte by byte, modulo 256.
///
/// Addition is commutative, so the result does not depend on the order in
/// which digests are folded in.
pub fn add_digest(sum: &mut [u8; 32], summand: &[u8]) {
    for (s, x) in sum.iter_mut().zip(summand.iter()) {
        *s = s.wrapping_add(*x);
    }
}
