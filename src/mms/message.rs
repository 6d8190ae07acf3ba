//! Messages exchanged between co-signers
//!
//! A message is one entry of the local ledger: a typed, directed payload
//! addressed to or received from one signer, together with its lifecycle
//! state.

use crate::mms::error::MmsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of payload a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    KeySet,
    AdditionalKeySet,
    SyncData,
    PartiallySignedTx,
    FullySignedTx,
    Note,
    SignerConfig,
    AutoConfigData,
}

impl MessageType {
    pub const ALL: [MessageType; 8] = [
        MessageType::KeySet,
        MessageType::AdditionalKeySet,
        MessageType::SyncData,
        MessageType::PartiallySignedTx,
        MessageType::FullySignedTx,
        MessageType::Note,
        MessageType::SignerConfig,
        MessageType::AutoConfigData,
    ];

    /// Human-readable name for listings
    pub fn label(&self) -> &'static str {
        match self {
            MessageType::KeySet => "key set",
            MessageType::AdditionalKeySet => "additional key set",
            MessageType::SyncData => "multisig sync data",
            MessageType::PartiallySignedTx => "partially signed tx",
            MessageType::FullySignedTx => "fully signed tx",
            MessageType::Note => "note",
            MessageType::SignerConfig => "signer config",
            MessageType::AutoConfigData => "auto-config data",
        }
    }

    /// Stable numeric tag used on the wire
    pub fn wire_tag(&self) -> u32 {
        match self {
            MessageType::KeySet => 0,
            MessageType::AdditionalKeySet => 1,
            MessageType::SyncData => 2,
            MessageType::PartiallySignedTx => 3,
            MessageType::FullySignedTx => 4,
            MessageType::Note => 5,
            MessageType::SignerConfig => 6,
            MessageType::AutoConfigData => 7,
        }
    }

    pub fn from_wire_tag(tag: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.wire_tag() == tag)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether the message was received or is to be sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    In,
    Out,
}

impl fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageDirection::In => f.write_str("in"),
            MessageDirection::Out => f.write_str("out"),
        }
    }
}

/// Lifecycle state of a message
///
/// ```text
/// ready_to_send -> sent -> waiting -> processed
///                       \-> processed
/// any state except processed -> cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    ReadyToSend,
    Sent,
    Waiting,
    Processed,
    Cancelled,
}

impl MessageState {
    /// Whether the lifecycle allows moving from `self` to `to`
    pub fn can_transition_to(&self, to: MessageState) -> bool {
        use MessageState::*;
        matches!(
            (self, to),
            (ReadyToSend, Sent)
                | (ReadyToSend, Cancelled)
                | (Sent, Waiting)
                | (Sent, Processed)
                | (Sent, Cancelled)
                | (Waiting, Processed)
                | (Waiting, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageState::Processed | MessageState::Cancelled)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageState::ReadyToSend => "ready to send",
            MessageState::Sent => "sent",
            MessageState::Waiting => "waiting",
            MessageState::Processed => "processed",
            MessageState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A single protocol message in the local store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Sequential id, never reused within a store
    pub id: u32,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub direction: MessageDirection,
    pub state: MessageState,
    /// Signer this message is addressed to (out) or came from (in)
    pub signer_index: u32,
    /// Wallet transfer count at creation; ties sync data to a wallet state
    pub wallet_height: u64,
    /// Key exchange round for additional key sets, 0 otherwise
    pub round: u32,
    /// Opaque payload
    #[serde(with = "hex_content")]
    pub content: Vec<u8>,
    /// Envelope content hash for received messages, used to drop duplicates
    pub hash: Option<String>,
    /// Id under which the transport keeps its copy
    pub transport_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Message {
    pub(crate) fn transition(&mut self, to: MessageState) -> Result<(), MmsError> {
        if !self.state.can_transition_to(to) {
            return Err(MmsError::IllegalTransition {
                id: self.id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        self.modified_at = Utc::now();
        Ok(())
    }

    /// Awaiting local processing
    pub fn is_waiting(&self) -> bool {
        self.state == MessageState::Waiting
    }
}

/// Selects messages by type, direction and/or state; unset fields match all
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFilter {
    pub message_type: Option<MessageType>,
    pub direction: Option<MessageDirection>,
    pub state: Option<MessageState>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn direction(mut self, direction: MessageDirection) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn state(mut self, state: MessageState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        self.message_type.map_or(true, |t| t == message.message_type)
            && self.direction.map_or(true, |d| d == message.direction)
            && self.state.map_or(true, |s| s == message.state)
    }
}

/// Serde adapter storing binary payloads as hex strings
pub(crate) mod hex_content {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use MessageState::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(ReadyToSend.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Waiting));
        assert!(Sent.can_transition_to(Processed));
        assert!(Waiting.can_transition_to(Processed));
    }

    #[test]
    fn test_cancel_from_non_terminal_states() {
        for state in [ReadyToSend, Sent, Waiting] {
            assert!(state.can_transition_to(Cancelled), "{state} -> cancelled");
        }
        assert!(!Processed.can_transition_to(Cancelled));
    }

    #[test]
    fn test_never_back_to_ready_to_send() {
        for state in [ReadyToSend, Sent, Waiting, Processed, Cancelled] {
            assert!(!state.can_transition_to(ReadyToSend));
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for to in [ReadyToSend, Sent, Waiting, Processed, Cancelled] {
            assert!(!Processed.can_transition_to(to));
            assert!(!Cancelled.can_transition_to(to));
        }
    }

    #[test]
    fn test_wire_tags_are_unique() {
        for t in MessageType::ALL {
            assert_eq!(MessageType::from_wire_tag(t.wire_tag()), Some(t));
        }
        assert_eq!(MessageType::from_wire_tag(99), None);
    }

    #[test]
    fn test_message_json_keeps_content_and_type() {
        let now = Utc::now();
        let message = Message {
            id: 7,
            message_type: MessageType::SyncData,
            direction: MessageDirection::In,
            state: Waiting,
            signer_index: 2,
            wallet_height: 11,
            round: 0,
            content: vec![0, 1, 254, 255],
            hash: None,
            transport_id: None,
            created_at: now,
            modified_at: now,
            sent_at: None,
        };

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"sync_data\""));
        assert!(json.contains("\"content\":\"0001feff\""));

        let decoded: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, message);
    }
}
