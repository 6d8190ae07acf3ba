//! Message store
//!
//! Append-only ledger of the messages exchanged with the other signers.
//! Ids grow monotonically and are never reused, not even after deletion.

use crate::mms::error::MmsError;
use crate::mms::message::{Message, MessageDirection, MessageFilter, MessageState, MessageType};
use crate::mms::signer::SignerRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Everything needed to append a message
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_type: MessageType,
    pub direction: MessageDirection,
    pub signer_index: u32,
    pub content: Vec<u8>,
    pub wallet_height: u64,
    pub round: u32,
    pub hash: Option<String>,
    pub transport_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(
        message_type: MessageType,
        direction: MessageDirection,
        signer_index: u32,
        content: Vec<u8>,
    ) -> Self {
        Self {
            message_type,
            direction,
            signer_index,
            content,
            wallet_height: 0,
            round: 0,
            hash: None,
            transport_id: None,
            sent_at: None,
        }
    }

    pub fn at_height(mut self, wallet_height: u64) -> Self {
        self.wallet_height = wallet_height;
        self
    }

    pub fn in_round(mut self, round: u32) -> Self {
        self.round = round;
        self
    }

    /// Attach what the transport told us about a received message
    pub fn received(mut self, hash: String, transport_id: Option<String>, sent_at: DateTime<Utc>) -> Self {
        self.hash = Some(hash);
        self.transport_id = transport_id;
        self.sent_at = Some(sent_at);
        self
    }
}

/// Per-signer view of one kind of message, used for completeness checks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignerSlots {
    /// Signers other than self that must contribute
    others: Vec<u32>,
    /// Oldest waiting message id per signer
    waiting: BTreeMap<u32, u32>,
    /// Signers with a waiting or processed message
    present: BTreeSet<u32>,
}

impl SignerSlots {
    /// Every other signer contributed a waiting or processed message
    pub fn is_complete(&self) -> bool {
        self.others.iter().all(|i| self.present.contains(i))
    }

    /// Every other signer has a message still waiting to be processed
    pub fn all_waiting(&self) -> bool {
        self.others.iter().all(|i| self.waiting.contains_key(i))
    }

    /// Other signers with no contribution at all
    pub fn missing(&self) -> Vec<u32> {
        self.others
            .iter()
            .copied()
            .filter(|i| !self.present.contains(i))
            .collect()
    }

    /// Other signers without a waiting message
    pub fn missing_waiting(&self) -> Vec<u32> {
        self.others
            .iter()
            .copied()
            .filter(|i| !self.waiting.contains_key(i))
            .collect()
    }

    /// Waiting message ids, ordered by signer index
    pub fn waiting_ids(&self) -> Vec<u32> {
        self.waiting.values().copied().collect()
    }

    /// Oldest waiting message id of one signer
    pub fn waiting_id(&self, signer: u32) -> Option<u32> {
        self.waiting.get(&signer).copied()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }
}

/// The local message ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageStore {
    messages: Vec<Message>,
    next_id: u32,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// Create an empty store; the first message gets id 1
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_id: 1,
        }
    }

    /// Append a message. Outbound messages start `ready_to_send`, inbound
    /// ones `waiting`.
    pub fn add(
        &mut self,
        message_type: MessageType,
        direction: MessageDirection,
        signer_index: u32,
        content: Vec<u8>,
    ) -> &Message {
        self.insert(NewMessage::new(message_type, direction, signer_index, content))
    }

    pub fn insert(&mut self, new: NewMessage) -> &Message {
        let now = Utc::now();
        let state = match new.direction {
            MessageDirection::Out => MessageState::ReadyToSend,
            MessageDirection::In => MessageState::Waiting,
        };
        let message = Message {
            id: self.next_id,
            message_type: new.message_type,
            direction: new.direction,
            state,
            signer_index: new.signer_index,
            wallet_height: new.wallet_height,
            round: new.round,
            content: new.content,
            hash: new.hash,
            transport_id: new.transport_id,
            created_at: now,
            modified_at: now,
            sent_at: new.sent_at,
        };
        self.next_id += 1;

        log::info!(
            "Added {} message {} for signer {} of type {}",
            message.direction,
            message.id,
            message.signer_index,
            message.message_type
        );

        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    /// Messages matching `filter`, ordered by id
    pub fn list(&self, filter: MessageFilter) -> impl Iterator<Item = &Message> + '_ {
        self.messages.iter().filter(move |m| filter.matches(m))
    }

    pub fn all(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Id the next added message will get
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    pub fn get(&self, id: u32) -> Result<&Message, MmsError> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .ok_or(MmsError::MessageNotFound(id))
    }

    fn get_mut(&mut self, id: u32) -> Result<&mut Message, MmsError> {
        self.messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(MmsError::MessageNotFound(id))
    }

    /// `ready_to_send -> sent`
    pub fn mark_sent(&mut self, id: u32) -> Result<(), MmsError> {
        let message = self.get_mut(id)?;
        message.transition(MessageState::Sent)?;
        message.sent_at = Some(Utc::now());
        log::info!("Message {} sent", id);
        Ok(())
    }

    /// `waiting | sent -> processed`
    pub fn mark_processed(&mut self, id: u32) -> Result<(), MmsError> {
        self.get_mut(id)?.transition(MessageState::Processed)?;
        log::debug!("Message {} processed", id);
        Ok(())
    }

    /// Any non-terminal state `-> cancelled`
    pub fn cancel(&mut self, id: u32) -> Result<(), MmsError> {
        self.get_mut(id)?.transition(MessageState::Cancelled)?;
        log::info!("Message {} cancelled", id);
        Ok(())
    }

    /// Remove one message; remaining ids are not renumbered
    pub fn delete(&mut self, id: u32) -> Result<Message, MmsError> {
        let position = self
            .messages
            .iter()
            .position(|m| m.id == id)
            .ok_or(MmsError::MessageNotFound(id))?;
        log::info!("Deleted message {}", id);
        Ok(self.messages.remove(position))
    }

    /// Remove every message; the id counter keeps running
    pub fn delete_all(&mut self) -> Vec<Message> {
        log::info!("Deleted all {} messages", self.messages.len());
        std::mem::take(&mut self.messages)
    }

    /// A received message with this envelope hash is already stored
    pub fn contains_hash(&self, hash: &str) -> bool {
        self.messages.iter().any(|m| m.hash.as_deref() == Some(hash))
    }

    pub fn any_of(&self, message_type: MessageType, direction: MessageDirection) -> bool {
        self.list(MessageFilter::new().of_type(message_type).direction(direction))
            .next()
            .is_some()
    }

    /// Per-signer slots of the inbound, non-cancelled messages accepted by
    /// `select`. Duplicates are resolved to the oldest message.
    pub fn slots<F>(&self, registry: &SignerRegistry, select: F) -> SignerSlots
    where
        F: Fn(&Message) -> bool,
    {
        let mut slots = SignerSlots {
            others: registry.others().collect(),
            ..Default::default()
        };
        for m in self
            .messages
            .iter()
            .filter(|m| m.direction == MessageDirection::In)
            .filter(|m| select(m))
        {
            match m.state {
                MessageState::Waiting => {
                    slots.waiting.entry(m.signer_index).or_insert(m.id);
                    slots.present.insert(m.signer_index);
                }
                MessageState::Processed => {
                    slots.present.insert(m.signer_index);
                }
                _ => {}
            }
        }
        slots
    }

    fn typed_slots(
        &self,
        message_type: MessageType,
        round: Option<u32>,
        registry: &SignerRegistry,
    ) -> SignerSlots {
        self.slots(registry, |m| {
            m.message_type == message_type && round.map_or(true, |r| m.round == r)
        })
    }

    /// True iff every signer other than self sent a message of this type
    /// (and round) that is `waiting` or `processed`
    pub fn completeness(
        &self,
        message_type: MessageType,
        round: Option<u32>,
        registry: &SignerRegistry,
    ) -> bool {
        self.typed_slots(message_type, round, registry).is_complete()
    }

    /// Signers whose message of this type (and round) is missing
    pub fn missing_signers(
        &self,
        message_type: MessageType,
        round: Option<u32>,
        registry: &SignerRegistry,
    ) -> Vec<u32> {
        self.typed_slots(message_type, round, registry).missing()
    }
}
