//! Multisig transaction container
//!
//! A transaction travels between co-signers as a JSON container that
//! collects signatures until the threshold is reached.

use crate::crypto::{public_key_from_hex, sha256, verify_signature, KeyPair};
use crate::wallet::multisig::MultisigConfig;
use crate::wallet::wallet::WalletError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single signature from a multisig participant
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MultisigSignature {
    /// Public key of the signer (hex)
    pub signer_pubkey: String,
    /// Signature over the signing data (hex)
    pub signature: String,
    pub signed_at: DateTime<Utc>,
}

impl MultisigSignature {
    /// Verify this signature against a message hash
    pub fn verify(&self, message_hash: &[u8]) -> Result<bool, WalletError> {
        let pubkey = public_key_from_hex(&self.signer_pubkey)?;
        let sig_bytes = hex::decode(&self.signature)
            .map_err(|_| WalletError::InvalidTransaction("signature is not hex".to_string()))?;
        Ok(verify_signature(&pubkey, message_hash, &sig_bytes)?)
    }
}

/// A transfer out of the multisig wallet, signed or partially signed
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MultisigTx {
    pub id: String,
    /// Multisig wallet address funds are spent from
    pub from_address: String,
    pub to_address: String,
    pub amount: u64,
    /// Transfer count of the creating wallet
    pub height: u64,
    pub threshold: u32,
    pub signatures: Vec<MultisigSignature>,
    pub created_at: DateTime<Utc>,
}

impl MultisigTx {
    pub fn new(
        from_address: String,
        to_address: String,
        amount: u64,
        height: u64,
        threshold: u32,
    ) -> Self {
        let now = Utc::now();

        // Unique id from the transfer details
        let id_data = format!(
            "{}{}{}{}{}",
            from_address,
            to_address,
            amount,
            height,
            now.timestamp_nanos_opt().unwrap_or(0)
        );
        let id = hex::encode(&sha256(id_data.as_bytes())[..16]);

        Self {
            id,
            from_address,
            to_address,
            amount,
            height,
            threshold,
            signatures: Vec::new(),
            created_at: now,
        }
    }

    /// The data every signer signs
    pub fn signing_data(&self) -> Vec<u8> {
        let data = format!(
            "{}{}{}{}{}",
            self.id, self.from_address, self.to_address, self.amount, self.height
        );
        sha256(data.as_bytes())
    }

    /// Sign with `key_pair` and add the signature
    pub fn sign(&mut self, key_pair: &KeyPair, config: &MultisigConfig) -> Result<(), WalletError> {
        let signature = MultisigSignature {
            signer_pubkey: key_pair.public_key_hex(),
            signature: key_pair.sign_hex(&self.signing_data())?,
            signed_at: Utc::now(),
        };
        self.add_signature(signature, config)
    }

    /// Add a signature from an authorized signer
    pub fn add_signature(
        &mut self,
        signature: MultisigSignature,
        config: &MultisigConfig,
    ) -> Result<(), WalletError> {
        if !config.is_signer(&signature.signer_pubkey) {
            return Err(WalletError::UnauthorizedSigner(signature.signer_pubkey));
        }
        if self.is_signed_by(&signature.signer_pubkey) {
            return Err(WalletError::AlreadySigned);
        }
        if !signature.verify(&self.signing_data())? {
            return Err(WalletError::InvalidTransaction(
                "invalid signature".to_string(),
            ));
        }

        self.signatures.push(signature);
        Ok(())
    }

    pub fn is_signed_by(&self, public_key: &str) -> bool {
        self.signatures.iter().any(|s| s.signer_pubkey == public_key)
    }

    /// Has enough signatures to be submitted
    pub fn is_complete(&self) -> bool {
        self.signatures.len() >= self.threshold as usize
    }

    /// Check every collected signature against `config`
    pub fn verify(&self, config: &MultisigConfig) -> Result<(), WalletError> {
        if self.from_address != config.address() {
            return Err(WalletError::InvalidTransaction(format!(
                "transaction spends from foreign wallet {}",
                self.from_address
            )));
        }
        let signing_data = self.signing_data();
        for signature in &self.signatures {
            if !config.is_signer(&signature.signer_pubkey) {
                return Err(WalletError::UnauthorizedSigner(
                    signature.signer_pubkey.clone(),
                ));
            }
            if !signature.verify(&signing_data)? {
                return Err(WalletError::InvalidTransaction(
                    "invalid signature".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WalletError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        serde_json::from_slice(bytes)
            .map_err(|e| WalletError::InvalidTransaction(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (MultisigConfig, Vec<KeyPair>) {
        let keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let pubkeys = keys.iter().map(|k| k.public_key_hex()).collect();
        (MultisigConfig::new(2, pubkeys).unwrap(), keys)
    }

    fn tx(config: &MultisigConfig) -> MultisigTx {
        MultisigTx::new(config.address(), "1Recipient".to_string(), 50, 0, config.threshold)
    }

    #[test]
    fn test_signature_collection() {
        let (config, keys) = setup();
        let mut tx = tx(&config);

        tx.sign(&keys[0], &config).unwrap();
        assert!(!tx.is_complete());
        assert!(tx.is_signed_by(&keys[0].public_key_hex()));

        tx.sign(&keys[1], &config).unwrap();
        assert!(tx.is_complete());
        tx.verify(&config).unwrap();
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let (config, keys) = setup();
        let mut tx = tx(&config);
        tx.sign(&keys[0], &config).unwrap();
        assert!(matches!(tx.sign(&keys[0], &config), Err(WalletError::AlreadySigned)));
    }

    #[test]
    fn test_unauthorized_signer_rejected() {
        let (config, _) = setup();
        let mut tx = tx(&config);
        let outsider = KeyPair::generate();
        assert!(matches!(
            tx.sign(&outsider, &config),
            Err(WalletError::UnauthorizedSigner(_))
        ));
    }

    #[test]
    fn test_tampered_amount_fails_verification() {
        let (config, keys) = setup();
        let mut tx = tx(&config);
        tx.sign(&keys[0], &config).unwrap();

        let mut tampered = MultisigTx::from_bytes(&tx.to_bytes().unwrap()).unwrap();
        tampered.amount = 5000;
        assert!(tampered.verify(&config).is_err());
    }
}
