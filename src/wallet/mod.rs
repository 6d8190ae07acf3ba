//! Wallet module: the multisig backend the messaging system drives

pub mod backend;
pub mod multisig;
pub mod transaction;
pub mod wallet;

pub use backend::{MultisigBackend, SignedTx, WalletSnapshot};
pub use multisig::MultisigConfig;
pub use transaction::{MultisigSignature, MultisigTx};
pub use wallet::{LocalWallet, WalletError};
