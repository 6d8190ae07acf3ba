//! Multisig messaging system
//!
//! Coordinates the setup and use of an M-of-N multisig wallet between
//! co-signers: who the signers are, which messages were exchanged, and what
//! the wallet should do next.

pub mod auto_config;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod formation;
pub mod message;
pub mod processing;
pub mod signer;
pub mod store;

pub use auto_config::{AutoConfigData, AutoConfigState};
pub use context::{MmsContext, MmsOptions, ReceiveReport, SignerConfigEntry, WalletOutput};
pub use error::MmsError;
pub use evaluator::{next_step, Action, WaitReason};
pub use formation::{Formation, FormationState};
pub use message::{Message, MessageDirection, MessageFilter, MessageState, MessageType};
pub use processing::{execute, run_next_step, transfer, ExecuteOptions, Outcome};
pub use signer::{Signer, SignerRegistry, SignerUpdate};
pub use store::{MessageStore, NewMessage};
