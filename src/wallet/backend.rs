//! The wallet side of the messaging system
//!
//! The message system never interprets key sets, sync data or transactions
//! itself; it hands them to a `MultisigBackend` and routes whatever the
//! backend produces to the other signers.

use crate::wallet::wallet::WalletError;

/// What the state evaluator needs to know about the wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalletSnapshot {
    /// Transfer count; sync data is tied to it
    pub height: u64,
    /// Multisig info has to be exchanged before the wallet can sign again
    pub needs_sync: bool,
}

/// Outcome of `sign_multisig`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub tx: Vec<u8>,
    /// Enough signatures to submit
    pub complete: bool,
}

/// Multisig operations of a wallet
pub trait MultisigBackend {
    /// Own single-key wallet address
    fn address(&self) -> String;

    /// Public key the address derives from (hex)
    fn public_key(&self) -> String;

    /// Sign a digest with the wallet key; authenticates outgoing envelopes
    fn sign(&self, digest: &[u8]) -> Result<String, WalletError>;

    /// Additional key exchange rounds needed after `make_multisig` for M-of-N
    fn kex_rounds(&self, threshold: u32, total: u32) -> u32;

    /// Produce the own key set
    fn prepare_multisig(&mut self) -> Result<Vec<u8>, WalletError>;

    /// Combine the key sets of all other signers. Returns the own additional
    /// key set for round 1, or `None` if the wallet is already final.
    fn make_multisig(
        &mut self,
        threshold: u32,
        key_sets: &[Vec<u8>],
    ) -> Result<Option<Vec<u8>>, WalletError>;

    /// Combine the additional key sets of the current round. Returns the
    /// own key set for the next round, or `None` once the wallet is final.
    fn exchange_multisig_keys(
        &mut self,
        key_sets: &[Vec<u8>],
    ) -> Result<Option<Vec<u8>>, WalletError>;

    /// Own sync data at the current height
    fn export_multisig_info(&self) -> Result<Vec<u8>, WalletError>;

    /// Import sync data of other signers; returns how many were applied
    fn import_multisig_info(&mut self, infos: &[Vec<u8>]) -> Result<usize, WalletError>;

    /// Catch up with transfers other signers submitted, up to `height`.
    /// Returns true if the wallet moved and now needs a sync.
    fn refresh(&mut self, height: u64) -> bool;

    /// Create a transaction carrying the own signature
    fn transfer(&mut self, destination: &str, amount: u64) -> Result<SignedTx, WalletError>;

    fn sign_multisig(&mut self, tx: &[u8]) -> Result<SignedTx, WalletError>;

    /// Broadcast a fully signed transaction; returns its id
    fn submit_multisig(&mut self, tx: &[u8]) -> Result<String, WalletError>;

    fn snapshot(&self) -> WalletSnapshot;
}
