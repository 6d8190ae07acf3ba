//! Transport adapters
//!
//! Messages leave the wallet wrapped in signed envelopes addressed to a
//! transport address. A transport only stores and forwards envelopes; it
//! never looks inside them.
//!
//! - `MemoryTransport`: shared in-process mailbox
//! - `FileTransport`: one directory per transport address
//! - `RelayTransport`: client of the TCP relay in `server`

pub mod client;
pub mod envelope;
pub mod file;
pub mod memory;
pub mod message;
pub mod server;

pub use client::RelayTransport;
pub use envelope::Envelope;
pub use file::FileTransport;
pub use memory::{Mailbox, MemoryTransport};
pub use message::RelayMessage;
pub use server::{RelayCodec, RelayServer};

use thiserror::Error;

/// Errors raised while moving envelopes
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Relay error: {0}")]
    Relay(String),
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),
    #[error("No envelope with transport id {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Store-and-forward channel between co-signers
pub trait Transport {
    /// Hand an envelope over for delivery; returns the transport id
    fn send(&self, envelope: &Envelope) -> Result<String, TransportError>;

    /// Envelopes waiting at any of `addresses`, oldest first, with their
    /// transport ids set. Envelopes stay until deleted.
    fn receive(&self, addresses: &[String]) -> Result<Vec<Envelope>, TransportError>;

    /// Drop a delivered envelope
    fn delete(&self, transport_id: &str) -> Result<(), TransportError>;
}
