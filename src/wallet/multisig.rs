//! Multisig key configuration of the local wallet
//!
//! Derives the shared M-of-N address from the threshold and the key sets of
//! all co-signers.

use crate::crypto::{base58check, hash160, public_key_from_hex};
use crate::wallet::wallet::WalletError;
use serde::{Deserialize, Serialize};

/// Version byte of multisig addresses (P2SH style, starts with '3')
pub const MULTISIG_ADDRESS_VERSION: u8 = 0x05;

/// Configuration for a multisig wallet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MultisigConfig {
    /// Minimum signatures required (M in M-of-N)
    pub threshold: u32,
    /// Public keys of all authorized signers (hex), sorted
    pub signers: Vec<String>,
}

impl MultisigConfig {
    /// Create a configuration from the threshold and every signer's public key
    ///
    /// # Errors
    /// Returns error if the threshold is out of range, a key is malformed or
    /// a key appears twice
    pub fn new(threshold: u32, mut signers: Vec<String>) -> Result<Self, WalletError> {
        if signers.len() < 2 {
            return Err(WalletError::InvalidKeySet(
                "need at least 2 signers".to_string(),
            ));
        }
        if threshold == 0 || threshold as usize > signers.len() {
            return Err(WalletError::InvalidKeySet(format!(
                "threshold {} out of range for {} signers",
                threshold,
                signers.len()
            )));
        }
        for key in &signers {
            public_key_from_hex(key)?;
        }

        // Sort public keys for a deterministic address
        signers.sort();
        if signers.windows(2).any(|w| w[0] == w[1]) {
            return Err(WalletError::InvalidKeySet(
                "duplicate signer public key".to_string(),
            ));
        }

        Ok(Self { threshold, signers })
    }

    /// Get the total signer count (N)
    pub fn signer_count(&self) -> usize {
        self.signers.len()
    }

    pub fn is_signer(&self, public_key: &str) -> bool {
        self.signers.iter().any(|s| s == public_key)
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.signers.len())
    }

    /// P2SH-style address
    ///
    /// Address = Base58Check(0x05 || RIPEMD160(SHA256(threshold || sorted_pubkeys)))
    pub fn address(&self) -> String {
        let mut script_data = self.threshold.to_le_bytes().to_vec();
        for pubkey in &self.signers {
            script_data.extend_from_slice(pubkey.as_bytes());
        }
        base58check(MULTISIG_ADDRESS_VERSION, &hash160(&script_data))
    }
}
