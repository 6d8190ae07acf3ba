//! Relay protocol messages
//!
//! Requests and responses exchanged between `RelayTransport` and the relay
//! server, one response per request.

use crate::transport::Envelope;
use serde::{Deserialize, Serialize};

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x4D, 0x4D, 0x53, 0x31]; // "MMS1"

/// Relay message types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RelayMessage {
    /// Store an envelope for its destination address
    Send(Envelope),

    /// Response with the transport id of a stored envelope
    Stored(String),

    /// Request the envelopes waiting at these addresses
    Receive(Vec<String>),

    /// Response with waiting envelopes
    Envelopes(Vec<Envelope>),

    /// Drop a delivered envelope
    Delete(String),

    /// Response to a successful delete
    Deleted,

    /// Keep-alive ping
    Ping(u64),

    /// Keep-alive pong response
    Pong(u64),

    /// Request failed
    Error(String),
}

impl RelayMessage {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            RelayMessage::Send(_) => "Send",
            RelayMessage::Stored(_) => "Stored",
            RelayMessage::Receive(_) => "Receive",
            RelayMessage::Envelopes(_) => "Envelopes",
            RelayMessage::Delete(_) => "Delete",
            RelayMessage::Deleted => "Deleted",
            RelayMessage::Ping(_) => "Ping",
            RelayMessage::Pong(_) => "Pong",
            RelayMessage::Error(_) => "Error",
        }
    }
}
