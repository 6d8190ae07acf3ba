//! MMS Wallet: a Multisig Messaging System in Rust
//!
//! This crate coordinates M-of-N multisig wallets between co-signers:
//! - Signer registry with labels, transport and wallet addresses
//! - Append-only message store with a strict message lifecycle
//! - "Next step" evaluator driving key exchange, signing and syncing
//! - Auto-config bootstrap with short one-time tokens
//! - Signed envelopes over file, in-memory and TCP relay transports
//! - JSON persistence with rotating backups
//!
//! # Example
//!
//! ```rust
//! use mms_wallet::mms::MmsContext;
//! use mms_wallet::wallet::{LocalWallet, MultisigBackend};
//!
//! let wallet = LocalWallet::new(Some("alice"));
//! let mut ctx = MmsContext::new();
//! ctx.init(2, 2, "Alice", "alice@relay", &wallet.address(), false).unwrap();
//!
//! // Bob is not configured yet, so nothing can happen
//! let action = ctx.next_step(&wallet.snapshot(), false).unwrap();
//! assert!(!action.is_ready());
//! ```

pub mod cli;
pub mod crypto;
pub mod mms;
pub mod storage;
pub mod transport;
pub mod wallet;

// Re-export commonly used types
pub use crypto::KeyPair;
pub use mms::{Action, MmsContext, MmsError, Outcome};
pub use storage::{Storage, StorageConfig};
pub use transport::{Envelope, FileTransport, MemoryTransport, RelayTransport, Transport};
pub use wallet::{LocalWallet, MultisigBackend};
