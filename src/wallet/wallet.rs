//! Local demo wallet
//!
//! A single-key secp256k1 wallet that can be turned into an M-of-N multisig
//! wallet through the key set exchange. It stands in for a full wallet
//! behind the `MultisigBackend` trait.

use crate::crypto::{sha256_hex, KeyPair};
use crate::wallet::backend::{MultisigBackend, SignedTx, WalletSnapshot};
use crate::wallet::multisig::MultisigConfig;
use crate::wallet::transaction::MultisigTx;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Wallet-related errors
#[derive(Error, Debug)]
pub enum WalletError {
    #[error("Wallet is not in the right state: {0}")]
    WrongState(String),
    #[error("Invalid key set: {0}")]
    InvalidKeySet(String),
    #[error("Invalid sync data: {0}")]
    InvalidSyncData(String),
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Signer not authorized: {0}")]
    UnauthorizedSigner(String),
    #[error("Already signed by this wallet")]
    AlreadySigned,
    #[error("Insufficient signatures: have {have}, need {need}")]
    InsufficientSignatures { have: usize, need: u32 },
    #[error("Multisig info must be synced before creating transactions")]
    NeedsSync,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] crate::crypto::KeyError),
}

/// Additional key set of one exchange round
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RoundKeySet {
    round: u32,
    public_key: String,
    /// Binds the round to the multisig address both sides derived
    commitment: String,
}

/// Sync data tied to a transfer count
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SyncInfo {
    public_key: String,
    height: u64,
    digest: String,
}

/// Serializable wallet data for persistence
#[derive(Debug, Serialize, Deserialize)]
struct WalletData {
    private_key_hex: String,
    label: Option<String>,
    prepared: bool,
    multisig: Option<MultisigConfig>,
    kex_rounds: u32,
    completed_rounds: u32,
    transfers: u64,
    needs_sync: bool,
    submitted: Vec<String>,
}

/// A wallet that becomes multisig through the message exchange
pub struct LocalWallet {
    key_pair: KeyPair,
    pub label: Option<String>,
    prepared: bool,
    multisig: Option<MultisigConfig>,
    kex_rounds: u32,
    completed_rounds: u32,
    transfers: u64,
    needs_sync: bool,
    submitted: Vec<String>,
}

impl LocalWallet {
    /// Create a wallet with a fresh key pair
    pub fn new(label: Option<&str>) -> Self {
        Self::with_key_pair(KeyPair::generate(), label)
    }

    fn with_key_pair(key_pair: KeyPair, label: Option<&str>) -> Self {
        Self {
            key_pair,
            label: label.map(str::to_string),
            prepared: false,
            multisig: None,
            kex_rounds: 0,
            completed_rounds: 0,
            transfers: 0,
            needs_sync: false,
            submitted: Vec::new(),
        }
    }

    /// Import a wallet from a private key
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, WalletError> {
        let key_pair = KeyPair::from_private_key_hex(private_key_hex)?;
        Ok(Self::with_key_pair(key_pair, None))
    }

    /// Shared multisig address once made
    pub fn multisig_address(&self) -> Option<String> {
        self.multisig.as_ref().map(MultisigConfig::address)
    }

    /// All key exchange rounds are done
    pub fn is_ready(&self) -> bool {
        self.multisig.is_some() && self.completed_rounds >= self.kex_rounds
    }

    /// Ids of the transactions this wallet submitted
    pub fn submitted(&self) -> &[String] {
        &self.submitted
    }

    fn config(&self) -> Result<&MultisigConfig, WalletError> {
        self.multisig
            .as_ref()
            .ok_or_else(|| WalletError::WrongState("not multisig".to_string()))
    }

    fn ready_config(&self) -> Result<&MultisigConfig, WalletError> {
        if !self.is_ready() {
            return Err(WalletError::WrongState(
                "multisig key exchange not finished".to_string(),
            ));
        }
        self.config()
    }

    fn commitment(&self, config: &MultisigConfig, round: u32, public_key: &str) -> String {
        sha256_hex(format!("{}:{}:{}", config.address(), round, public_key).as_bytes())
    }

    fn round_key_set(&self, round: u32) -> Result<Vec<u8>, WalletError> {
        let config = self.config()?;
        let public_key = self.public_key();
        let set = RoundKeySet {
            round,
            commitment: self.commitment(config, round, &public_key),
            public_key,
        };
        Ok(serde_json::to_vec(&set)?)
    }

    fn sync_digest(&self, config: &MultisigConfig, height: u64, public_key: &str) -> String {
        sha256_hex(format!("sync:{}:{}:{}", config.address(), height, public_key).as_bytes())
    }

    /// Save wallet to file
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        let data = WalletData {
            private_key_hex: self.key_pair.private_key_hex(),
            label: self.label.clone(),
            prepared: self.prepared,
            multisig: self.multisig.clone(),
            kex_rounds: self.kex_rounds,
            completed_rounds: self.completed_rounds,
            transfers: self.transfers,
            needs_sync: self.needs_sync,
            submitted: self.submitted.clone(),
        };

        let json = serde_json::to_string_pretty(&data)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load wallet from file
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = fs::read_to_string(path)?;
        let data: WalletData = serde_json::from_str(&json)?;

        let mut wallet = Self::from_private_key(&data.private_key_hex)?;
        wallet.label = data.label;
        wallet.prepared = data.prepared;
        wallet.multisig = data.multisig;
        wallet.kex_rounds = data.kex_rounds;
        wallet.completed_rounds = data.completed_rounds;
        wallet.transfers = data.transfers;
        wallet.needs_sync = data.needs_sync;
        wallet.submitted = data.submitted;
        Ok(wallet)
    }
}

impl MultisigBackend for LocalWallet {
    fn address(&self) -> String {
        self.key_pair.address()
    }

    fn public_key(&self) -> String {
        self.key_pair.public_key_hex()
    }

    fn sign(&self, digest: &[u8]) -> Result<String, WalletError> {
        Ok(self.key_pair.sign_hex(digest)?)
    }

    fn kex_rounds(&self, threshold: u32, total: u32) -> u32 {
        total.saturating_sub(threshold)
    }

    fn prepare_multisig(&mut self) -> Result<Vec<u8>, WalletError> {
        if self.multisig.is_some() {
            return Err(WalletError::WrongState("already multisig".to_string()));
        }
        self.prepared = true;
        Ok(self.public_key().into_bytes())
    }

    fn make_multisig(
        &mut self,
        threshold: u32,
        key_sets: &[Vec<u8>],
    ) -> Result<Option<Vec<u8>>, WalletError> {
        if !self.prepared || self.multisig.is_some() {
            return Err(WalletError::WrongState(
                "make_multisig needs a prepared wallet".to_string(),
            ));
        }

        let mut keys = vec![self.public_key()];
        for set in key_sets {
            let key = String::from_utf8(set.clone())
                .map_err(|_| WalletError::InvalidKeySet("not a public key".to_string()))?;
            keys.push(key);
        }
        let total = keys.len() as u32;
        let config = MultisigConfig::new(threshold, keys)?;

        log::info!(
            "Made {} multisig wallet {}",
            config.description(),
            config.address()
        );
        self.multisig = Some(config);
        self.kex_rounds = self.kex_rounds(threshold, total);
        self.completed_rounds = 0;

        if self.is_ready() {
            Ok(None)
        } else {
            self.round_key_set(1).map(Some)
        }
    }

    fn exchange_multisig_keys(
        &mut self,
        key_sets: &[Vec<u8>],
    ) -> Result<Option<Vec<u8>>, WalletError> {
        if self.is_ready() {
            return Err(WalletError::WrongState("key exchange already finished".to_string()));
        }
        let config = self.config()?;
        let round = self.completed_rounds + 1;
        if key_sets.len() + 1 != config.signer_count() {
            return Err(WalletError::InvalidKeySet(format!(
                "expected {} key sets, got {}",
                config.signer_count() - 1,
                key_sets.len()
            )));
        }

        for raw in key_sets {
            let set: RoundKeySet = serde_json::from_slice(raw)
                .map_err(|e| WalletError::InvalidKeySet(e.to_string()))?;
            if set.round != round {
                return Err(WalletError::InvalidKeySet(format!(
                    "key set for round {} while in round {}",
                    set.round, round
                )));
            }
            if !config.is_signer(&set.public_key) {
                return Err(WalletError::UnauthorizedSigner(set.public_key));
            }
            if set.commitment != self.commitment(config, round, &set.public_key) {
                return Err(WalletError::InvalidKeySet(
                    "commitment does not match the multisig wallet".to_string(),
                ));
            }
        }

        self.completed_rounds = round;
        log::info!("Key exchange round {} of {} done", round, self.kex_rounds);

        if self.is_ready() {
            Ok(None)
        } else {
            self.round_key_set(round + 1).map(Some)
        }
    }

    fn export_multisig_info(&self) -> Result<Vec<u8>, WalletError> {
        let config = self.ready_config()?;
        let public_key = self.public_key();
        let info = SyncInfo {
            digest: self.sync_digest(config, self.transfers, &public_key),
            height: self.transfers,
            public_key,
        };
        Ok(serde_json::to_vec(&info)?)
    }

    fn import_multisig_info(&mut self, infos: &[Vec<u8>]) -> Result<usize, WalletError> {
        let config = self.ready_config()?;
        let own_key = self.public_key();

        let mut imported = 0;
        for raw in infos {
            let info: SyncInfo = serde_json::from_slice(raw)
                .map_err(|e| WalletError::InvalidSyncData(e.to_string()))?;
            if info.public_key == own_key || !config.is_signer(&info.public_key) {
                return Err(WalletError::UnauthorizedSigner(info.public_key));
            }
            if info.digest != self.sync_digest(config, info.height, &info.public_key) {
                return Err(WalletError::InvalidSyncData(
                    "digest does not match".to_string(),
                ));
            }
            imported += 1;
        }

        if imported > 0 {
            self.needs_sync = false;
        }
        log::info!("Imported multisig info of {} signer(s)", imported);
        Ok(imported)
    }

    fn refresh(&mut self, height: u64) -> bool {
        if height <= self.transfers || !self.is_ready() {
            return false;
        }
        log::info!(
            "Transfers up to height {} seen (was {}), multisig info has to be exchanged",
            height,
            self.transfers
        );
        self.transfers = height;
        self.needs_sync = true;
        true
    }

    fn transfer(&mut self, destination: &str, amount: u64) -> Result<SignedTx, WalletError> {
        if self.needs_sync {
            return Err(WalletError::NeedsSync);
        }
        let config = self.ready_config()?;
        let mut tx = MultisigTx::new(
            config.address(),
            destination.to_string(),
            amount,
            self.transfers,
            config.threshold,
        );
        tx.sign(&self.key_pair, config)?;

        Ok(SignedTx {
            complete: tx.is_complete(),
            tx: tx.to_bytes()?,
        })
    }

    fn sign_multisig(&mut self, raw: &[u8]) -> Result<SignedTx, WalletError> {
        let config = self.ready_config()?;
        let mut tx = MultisigTx::from_bytes(raw)?;
        tx.verify(config)?;
        if tx.is_signed_by(&self.public_key()) {
            return Err(WalletError::AlreadySigned);
        }
        tx.sign(&self.key_pair, config)?;

        Ok(SignedTx {
            complete: tx.is_complete(),
            tx: tx.to_bytes()?,
        })
    }

    fn submit_multisig(&mut self, raw: &[u8]) -> Result<String, WalletError> {
        let config = self.ready_config()?;
        let tx = MultisigTx::from_bytes(raw)?;
        tx.verify(config)?;
        if !tx.is_complete() {
            return Err(WalletError::InsufficientSignatures {
                have: tx.signatures.len(),
                need: tx.threshold,
            });
        }
        if self.submitted.contains(&tx.id) {
            return Err(WalletError::InvalidTransaction(format!(
                "transaction {} already submitted",
                tx.id
            )));
        }

        self.submitted.push(tx.id.clone());
        self.transfers += 1;
        self.needs_sync = true;
        log::info!("Submitted transaction {} ({} to {})", tx.id, tx.amount, tx.to_address);
        Ok(tx.id)
    }

    fn snapshot(&self) -> WalletSnapshot {
        WalletSnapshot {
            height: self.transfers,
            needs_sync: self.needs_sync,
        }
    }
}
