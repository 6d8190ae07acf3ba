//! Error taxonomy of the messaging system

use crate::mms::message::MessageState;
use crate::transport::TransportError;
use crate::wallet::WalletError;
use thiserror::Error;

/// Errors surfaced by the signer registry, the message store and the
/// auto-config bootstrap.
///
/// Missing data from other signers is never an error: the evaluator reports
/// it as `Action::NothingReady` instead.
#[derive(Error, Debug)]
pub enum MmsError {
    #[error("MMS is not active. Activate using the 'mms init' command")]
    NotActive,
    #[error("MMS is already initialized; re-initializing deletes all signers and messages (confirm with --yes)")]
    AlreadyInitialized,
    #[error("Invalid multisig scheme: {0}")]
    InvalidScheme(String),
    #[error("Invalid signer index {index}, must be below {count}")]
    InvalidIndex { index: u32, count: u32 },
    #[error("Wallet address of signer {0} can no longer be changed")]
    AddressLocked(u32),
    #[error("No signer with label or index '{0}'")]
    UnknownSigner(String),
    #[error("Wallet address {address} is already used by signer {index}")]
    DuplicateAddress { address: String, index: u32 },
    #[error("Wallet address of signer {0} can not be empty")]
    EmptyWalletAddress(u32),
    #[error("Label '{0}' is already used by another signer")]
    DuplicateLabel(String),
    #[error("Signers {0:?} have no label; set labels or pass them to start_auto_config")]
    IncompleteLabels(Vec<u32>),
    #[error("Invalid auto-config token: {0}")]
    InvalidToken(String),
    #[error("No message with id {0}")]
    MessageNotFound(u32),
    #[error("Message {id}: illegal state transition {from} -> {to}")]
    IllegalTransition {
        id: u32,
        from: MessageState,
        to: MessageState,
    },
    #[error("Operation not possible in formation state '{0}'")]
    WrongFormationState(String),
    #[error("Signer config incomplete, missing data for signers {0:?}")]
    IncompleteSigners(Vec<u32>),
    #[error("Invalid signer config: {0}")]
    InvalidSignerConfig(String),
    #[error("Invalid auto-config data: {0}")]
    InvalidAutoConfigData(String),
    #[error("Unknown option '{0}'")]
    InvalidOption(String),
    #[error("Message verification failed: {0}")]
    Verification(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
