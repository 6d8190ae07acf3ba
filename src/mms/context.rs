//! MMS context
//!
//! Everything one wallet knows about the multisig coordination: the signer
//! roster, the message store, the formation state and the persistent
//! options. The context is passed explicitly to every operation and is
//! saved as a whole by the storage layer.

use crate::mms::auto_config::{self, AutoConfigData, AutoConfigState};
use crate::mms::error::MmsError;
use crate::mms::evaluator::{self, Action};
use crate::mms::formation::{Formation, FormationState};
use crate::mms::message::{MessageDirection, MessageFilter, MessageState, MessageType};
use crate::mms::signer::{sanitize_text, SignerRegistry, SignerUpdate, MAX_LABEL_LEN};
use crate::mms::store::{MessageStore, NewMessage};
use crate::transport::{Envelope, Transport};
use crate::wallet::{MultisigBackend, WalletSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Notes are cut to this many characters for display
pub const MAX_NOTE_LEN: usize = 1000;

/// Options changed with `mms set`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmsOptions {
    /// Send outbound messages as soon as they are created
    pub auto_send: bool,
}

impl MmsOptions {
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), MmsError> {
        match name {
            "auto-send" | "auto_send" => {
                self.auto_send = parse_flag(value)
                    .ok_or_else(|| MmsError::InvalidOption(format!("{} {}", name, value)))?;
                Ok(())
            }
            other => Err(MmsError::InvalidOption(other.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Result<String, MmsError> {
        match name {
            "auto-send" | "auto_send" => Ok(if self.auto_send { "1" } else { "0" }.to_string()),
            other => Err(MmsError::InvalidOption(other.to_string())),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a scheme like "2/3" into (threshold, total)
pub fn parse_scheme(scheme: &str) -> Result<(u32, u32), MmsError> {
    let invalid = || MmsError::InvalidScheme(scheme.to_string());
    let (m, n) = scheme.split_once('/').ok_or_else(invalid)?;
    let threshold = m.trim().parse().map_err(|_| invalid())?;
    let total = n.trim().parse().map_err(|_| invalid())?;
    Ok((threshold, total))
}

/// Data the wallet produced that has to reach the other signers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletOutput {
    KeySet(Vec<u8>),
    AdditionalKeySet { round: u32, key_set: Vec<u8> },
    SyncData(Vec<u8>),
    PartiallySignedTx(Vec<u8>),
    FullySignedTx(Vec<u8>),
}

/// One roster entry as exchanged in a `signer_config` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfigEntry {
    pub label: String,
    pub transport_address: String,
    pub wallet_address: String,
}

/// Result of polling the transport
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Ids of the newly stored messages
    pub received: Vec<u32>,
    /// Envelopes already stored earlier
    pub duplicates: usize,
    /// Envelopes refused, with the reason
    pub rejected: Vec<String>,
}

/// Per-wallet MMS state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MmsContext {
    /// `None` until `init`
    registry: Option<SignerRegistry>,
    store: MessageStore,
    formation: Formation,
    pub options: MmsOptions,
}

impl MmsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.registry.is_some()
    }

    /// Set up the roster for an M-of-N scheme with the local wallet as
    /// signer 0.
    ///
    /// An existing setup is only replaced with `confirm`; that deletes all
    /// signers and messages. The id counter keeps running.
    pub fn init(
        &mut self,
        threshold: u32,
        total: u32,
        own_label: &str,
        own_transport_address: &str,
        own_wallet_address: &str,
        confirm: bool,
    ) -> Result<(), MmsError> {
        if self.is_active() && !confirm {
            return Err(MmsError::AlreadyInitialized);
        }
        if self.formation.state() != FormationState::None {
            return Err(MmsError::WrongFormationState(self.formation.state().to_string()));
        }

        let registry = SignerRegistry::new(
            threshold,
            total,
            own_label,
            own_transport_address,
            own_wallet_address,
        )?;
        self.store.delete_all();
        self.registry = Some(registry);
        log::info!("MMS initialized for {}/{} multisig", threshold, total);
        Ok(())
    }

    /// The roster, or `NotActive` before `init`
    pub fn registry(&self) -> Result<&SignerRegistry, MmsError> {
        self.registry.as_ref().ok_or(MmsError::NotActive)
    }

    fn registry_mut(&mut self) -> Result<&mut SignerRegistry, MmsError> {
        self.registry.as_mut().ok_or(MmsError::NotActive)
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn formation(&self) -> &Formation {
        &self.formation
    }

    pub(crate) fn formation_mut(&mut self) -> &mut Formation {
        &mut self.formation
    }

    pub(crate) fn store_mut(&mut self) -> &mut MessageStore {
        &mut self.store
    }

    pub fn set_signer(&mut self, index: u32, update: SignerUpdate) -> Result<(), MmsError> {
        let formation = self.formation.state();
        self.registry_mut()?.set_signer(index, update, &formation)
    }

    /// Resolve a signer given by label or by index
    pub fn resolve_signer(&self, label_or_index: &str) -> Result<u32, MmsError> {
        let registry = self.registry()?;
        if let Some(index) = registry.index_by_label(label_or_index) {
            return Ok(index);
        }
        label_or_index
            .parse::<u32>()
            .ok()
            .filter(|i| *i < registry.total())
            .ok_or_else(|| MmsError::UnknownSigner(label_or_index.to_string()))
    }

    /// Decide the next step, see `evaluator::next_step`
    pub fn next_step(&self, wallet: &WalletSnapshot, force_sync: bool) -> Result<Action, MmsError> {
        let registry = self.registry()?;
        Ok(evaluator::next_step(
            registry,
            &self.store,
            &self.formation,
            wallet,
            force_sync,
        ))
    }

    /// Store what the wallet produced.
    ///
    /// Key sets and sync data go out to every other signer. Transactions are
    /// kept as an inbound message from self; with a threshold of 1 a
    /// partially signed transaction is already fully signed.
    pub fn process_wallet_created_data(
        &mut self,
        output: WalletOutput,
        wallet_height: u64,
    ) -> Result<Vec<u32>, MmsError> {
        let registry = self.registry.as_ref().ok_or(MmsError::NotActive)?;

        let (message_type, round, content) = match output {
            WalletOutput::KeySet(content) => (MessageType::KeySet, 0, content),
            WalletOutput::AdditionalKeySet { round, key_set } => {
                (MessageType::AdditionalKeySet, round, key_set)
            }
            WalletOutput::SyncData(content) => (MessageType::SyncData, 0, content),
            WalletOutput::PartiallySignedTx(content) if registry.threshold() == 1 => {
                (MessageType::FullySignedTx, 0, content)
            }
            WalletOutput::PartiallySignedTx(content) => {
                (MessageType::PartiallySignedTx, 0, content)
            }
            WalletOutput::FullySignedTx(content) => (MessageType::FullySignedTx, 0, content),
        };

        let mut ids = Vec::new();
        match message_type {
            MessageType::PartiallySignedTx | MessageType::FullySignedTx => {
                let message = self.store.insert(
                    NewMessage::new(message_type, MessageDirection::In, 0, content)
                        .at_height(wallet_height),
                );
                ids.push(message.id);
            }
            _ => {
                for index in registry.others() {
                    let message = self.store.insert(
                        NewMessage::new(
                            message_type,
                            MessageDirection::Out,
                            index,
                            content.clone(),
                        )
                        .at_height(wallet_height)
                        .in_round(round),
                    );
                    ids.push(message.id);
                }
            }
        }
        Ok(ids)
    }

    /// Queue a note to one signer
    pub fn add_note(&mut self, to: &str, text: &str) -> Result<u32, MmsError> {
        let index = self.resolve_signer(to)?;
        if index == 0 {
            return Err(MmsError::UnknownSigner(to.to_string()));
        }
        Ok(self
            .store
            .add(
                MessageType::Note,
                MessageDirection::Out,
                index,
                text.as_bytes().to_vec(),
            )
            .id)
    }

    /// Waiting notes as (sender, sanitized text); they are marked processed
    pub fn read_notes(&mut self, transport: &dyn Transport) -> Result<Vec<(u32, String)>, MmsError> {
        self.registry()?;
        let notes: Vec<(u32, u32, String)> = self
            .store
            .list(
                MessageFilter::new()
                    .of_type(MessageType::Note)
                    .direction(MessageDirection::In)
                    .state(MessageState::Waiting),
            )
            .map(|m| {
                let text = sanitize_text(&String::from_utf8_lossy(&m.content), MAX_NOTE_LEN);
                (m.id, m.signer_index, text)
            })
            .collect();

        let ids: Vec<u32> = notes.iter().map(|(id, _, _)| *id).collect();
        self.complete(&ids, transport)?;
        Ok(notes.into_iter().map(|(_, from, text)| (from, text)).collect())
    }

    /// Mark inbound messages processed and delete their transport copies
    pub fn complete(&mut self, ids: &[u32], transport: &dyn Transport) -> Result<(), MmsError> {
        for id in ids {
            self.store.mark_processed(*id)?;
            if let Some(transport_id) = self.store.get(*id)?.transport_id.clone() {
                if let Err(e) = transport.delete(&transport_id) {
                    log::warn!("Could not delete {} from the transport: {}", transport_id, e);
                }
            }
        }
        Ok(())
    }

    /// Delete one message, and its transport copy if it was received
    pub fn delete_message(&mut self, id: u32, transport: &dyn Transport) -> Result<(), MmsError> {
        let message = self.store.delete(id)?;
        if let Some(transport_id) = message.transport_id {
            if let Err(e) = transport.delete(&transport_id) {
                log::warn!("Could not delete {} from the transport: {}", transport_id, e);
            }
        }
        Ok(())
    }

    /// Delete every message; returns how many were removed
    pub fn delete_all_messages(&mut self, transport: &dyn Transport) -> usize {
        let removed = self.store.delete_all();
        for transport_id in removed.iter().filter_map(|m| m.transport_id.as_deref()) {
            if let Err(e) = transport.delete(transport_id) {
                log::warn!("Could not delete {} from the transport: {}", transport_id, e);
            }
        }
        removed.len()
    }

    /// The whole roster in exchange format; requires a complete config
    pub fn signer_config(&self) -> Result<Vec<u8>, MmsError> {
        let registry = self.registry()?;
        let incomplete = registry.incomplete_signers();
        if !incomplete.is_empty() {
            return Err(MmsError::IncompleteSigners(incomplete));
        }
        let entries: Vec<SignerConfigEntry> = registry
            .list()
            .iter()
            .map(|s| SignerConfigEntry {
                label: s.label.clone().unwrap_or_default(),
                transport_address: s.transport_address.clone().unwrap_or_default(),
                wallet_address: s.wallet_address.clone().unwrap_or_default(),
            })
            .collect();
        Ok(serde_json::to_vec(&entries)?)
    }

    /// Queue the roster to every other signer
    pub fn send_signer_config(&mut self) -> Result<Vec<u32>, MmsError> {
        let config = self.signer_config()?;
        let others: Vec<u32> = self.registry()?.others().collect();
        Ok(others
            .into_iter()
            .map(|index| {
                self.store
                    .add(
                        MessageType::SignerConfig,
                        MessageDirection::Out,
                        index,
                        config.clone(),
                    )
                    .id
            })
            .collect())
    }

    /// Take over a roster received in a `signer_config` message.
    ///
    /// Entries are matched to signers by wallet address; the rest fill the
    /// remaining slots in order. Labels always follow the config, while the
    /// own transport and wallet address are never overwritten.
    pub fn process_signer_config(&mut self, id: u32, transport: &dyn Transport) -> Result<(), MmsError> {
        let message = self.store.get(id)?;
        if message.message_type != MessageType::SignerConfig || !message.is_waiting() {
            return Err(MmsError::InvalidSignerConfig(format!(
                "message {} is not a waiting signer config",
                id
            )));
        }
        let entries: Vec<SignerConfigEntry> = serde_json::from_slice(&message.content)
            .map_err(|e| MmsError::InvalidSignerConfig(e.to_string()))?;

        let formation = self.formation.state();
        let registry = self.registry.as_mut().ok_or(MmsError::NotActive)?;
        if entries.len() != registry.total() as usize {
            return Err(MmsError::InvalidSignerConfig(format!(
                "{} signers in config, expected {}",
                entries.len(),
                registry.total()
            )));
        }
        let labels: BTreeSet<String> = entries
            .iter()
            .map(|e| sanitize_text(&e.label, MAX_LABEL_LEN))
            .collect();
        if labels.len() != entries.len() {
            return Err(MmsError::InvalidSignerConfig("duplicate labels".to_string()));
        }

        // Plan the assignment first so a bad config leaves the roster untouched
        let mut slots: Vec<Option<u32>> = entries
            .iter()
            .map(|e| registry.index_by_wallet_address(&e.wallet_address))
            .collect();
        let mut taken: BTreeSet<u32> = slots.iter().flatten().copied().collect();
        if taken.len() != slots.iter().flatten().count() {
            return Err(MmsError::InvalidSignerConfig(
                "wallet address listed twice".to_string(),
            ));
        }
        for slot in slots.iter_mut().filter(|s| s.is_none()) {
            let free = (1..registry.total())
                .find(|i| !taken.contains(i))
                .ok_or_else(|| MmsError::InvalidSignerConfig("no free signer slot".to_string()))?;
            taken.insert(free);
            *slot = Some(free);
        }

        let assignment: Vec<(u32, SignerConfigEntry)> = slots
            .into_iter()
            .flatten()
            .zip(entries)
            .collect();
        for (index, entry) in &assignment {
            let current = registry.get(*index)?;
            if *index != 0
                && formation.locks_addresses()
                && current.wallet_address.as_deref() != Some(entry.wallet_address.as_str())
            {
                return Err(MmsError::AddressLocked(*index));
            }
        }

        for (index, entry) in assignment {
            let signer = registry.get_mut(index)?;
            signer.label = Some(sanitize_text(&entry.label, MAX_LABEL_LEN));
            if !signer.is_self {
                signer.transport_address = Some(entry.transport_address);
                signer.wallet_address = Some(entry.wallet_address);
            }
        }

        let me = registry.get_mut(0)?;
        if me.auto_config == AutoConfigState::ConfigSent {
            me.auto_config = AutoConfigState::Committed;
            me.auto_config_token = None;
            me.auto_config_transport_address = None;
            log::info!("Auto-config finished");
        }

        log::info!("Signer config from message {} applied", id);
        self.complete(&[id], transport)
    }

    /// Issue auto-config tokens; `labels` name signers 1.. in order
    pub fn start_auto_config(&mut self, labels: &[String]) -> Result<Vec<(u32, String)>, MmsError> {
        let formation = self.formation.state();
        auto_config::start(self.registry_mut()?, labels, &formation)
    }

    pub fn stop_auto_config(&mut self) -> Result<(), MmsError> {
        auto_config::stop(self.registry_mut()?);
        Ok(())
    }

    /// Join a multisig with a token from the manager: queue own label,
    /// transport address and wallet address to the token's channel
    pub fn auto_config(&mut self, token: &str) -> Result<u32, MmsError> {
        let formation = self.formation.state();
        if formation != FormationState::None {
            return Err(MmsError::WrongFormationState(formation.to_string()));
        }
        let token = auto_config::check_token(token)?;
        let registry = self.registry.as_mut().ok_or(MmsError::NotActive)?;

        let me = registry.me();
        let (transport_address, wallet_address) =
            match (me.transport_address.clone(), me.wallet_address.clone()) {
                (Some(t), Some(w)) => (t, w),
                _ => return Err(MmsError::IncompleteSigners(vec![0])),
            };
        let data = AutoConfigData {
            label: me.label.clone().unwrap_or_default(),
            transport_address,
            wallet_address,
        };

        let me = registry.get_mut(0)?;
        me.auto_config_transport_address = Some(auto_config::derive_transport_address(&token));
        me.auto_config_token = Some(token);
        me.auto_config = AutoConfigState::ConfigSent;

        let id = self
            .store
            .add(
                MessageType::AutoConfigData,
                MessageDirection::Out,
                0,
                data.to_bytes()?,
            )
            .id;
        Ok(id)
    }

    /// Take over the addresses the joining signers sent. Labels stay as
    /// the manager chose them. Once no signer is pending the full roster is
    /// queued to everyone; returns the ids of those messages.
    pub fn process_auto_config_data(
        &mut self,
        ids: &[u32],
        transport: &dyn Transport,
    ) -> Result<Vec<u32>, MmsError> {
        let mut updates = Vec::new();
        for id in ids {
            let message = self.store.get(*id)?;
            if message.message_type != MessageType::AutoConfigData || !message.is_waiting() {
                return Err(MmsError::InvalidAutoConfigData(format!(
                    "message {} is not waiting auto-config data",
                    id
                )));
            }
            if message.signer_index == 0 {
                return Err(MmsError::InvalidAutoConfigData(format!(
                    "message {} is not from another signer",
                    id
                )));
            }
            updates.push((message.signer_index, AutoConfigData::from_bytes(&message.content)?));
        }

        let formation = self.formation.state();
        let registry = self.registry.as_mut().ok_or(MmsError::NotActive)?;
        for (index, data) in updates {
            registry.set_signer(
                index,
                SignerUpdate {
                    label: None,
                    transport_address: Some(data.transport_address),
                    wallet_address: Some(data.wallet_address),
                },
                &formation,
            )?;
            let signer = registry.get_mut(index)?;
            signer.auto_config = AutoConfigState::Committed;
            signer.auto_config_token = None;
            signer.auto_config_transport_address = None;
        }
        self.complete(ids, transport)?;

        let registry = self.registry()?;
        if !auto_config::pending_signers(registry).is_empty() {
            return Ok(Vec::new());
        }
        if !registry.config_complete() {
            log::warn!(
                "Auto-config done but signers {:?} are incomplete; not sending signer config",
                registry.incomplete_signers()
            );
            return Ok(Vec::new());
        }
        self.send_signer_config()
    }

    /// Wrap one outbound message in a signed envelope and hand it to the
    /// transport. On failure the message stays `ready_to_send`.
    pub fn send(
        &mut self,
        id: u32,
        transport: &dyn Transport,
        wallet: &dyn MultisigBackend,
    ) -> Result<(), MmsError> {
        let registry = self.registry()?;
        let message = self.store.get(id)?;
        if message.state != MessageState::ReadyToSend {
            return Err(MmsError::IllegalTransition {
                id,
                from: message.state,
                to: MessageState::Sent,
            });
        }

        let me = registry.me();
        let (destination, destination_wallet) = if message.message_type == MessageType::AutoConfigData {
            let channel = me.auto_config_transport_address.clone().ok_or_else(|| {
                MmsError::InvalidAutoConfigData("auto-config is not running".to_string())
            })?;
            (channel, None)
        } else {
            let signer = registry.get(message.signer_index)?;
            let destination = signer
                .transport_address
                .clone()
                .ok_or_else(|| MmsError::IncompleteSigners(vec![signer.index]))?;
            (destination, signer.wallet_address.clone())
        };

        let envelope = Envelope::new(
            me.transport_address.as_deref().unwrap_or(""),
            &destination,
            &wallet.address(),
            destination_wallet.as_deref(),
            message.message_type.wire_tag(),
            message.round,
            message.wallet_height,
            &message.content,
        )
        .seal(wallet.public_key(), |digest| wallet.sign(digest))?;

        let transport_id = transport.send(&envelope)?;
        log::info!(
            "Sent message {} ({}) to {} as {}",
            id,
            message.message_type,
            destination,
            transport_id
        );
        self.store.mark_sent(id)
    }

    /// Send every `ready_to_send` message; stops at the first failure
    pub fn send_all(
        &mut self,
        transport: &dyn Transport,
        wallet: &dyn MultisigBackend,
    ) -> Result<Vec<u32>, MmsError> {
        let ids: Vec<u32> = self
            .store
            .list(MessageFilter::new().state(MessageState::ReadyToSend))
            .map(|m| m.id)
            .collect();
        for id in &ids {
            self.send(*id, transport, wallet)?;
        }
        Ok(ids)
    }

    /// Send pending messages if `auto-send` is on
    pub fn auto_send(
        &mut self,
        transport: &dyn Transport,
        wallet: &dyn MultisigBackend,
    ) -> Result<Vec<u32>, MmsError> {
        if self.options.auto_send {
            self.send_all(transport, wallet)
        } else {
            Ok(Vec::new())
        }
    }

    /// Transport addresses messages for this wallet arrive at
    fn listen_addresses(&self, registry: &SignerRegistry) -> Vec<String> {
        let mut addresses: Vec<String> = registry.me().transport_address.iter().cloned().collect();
        addresses.extend(
            registry
                .list()
                .iter()
                .filter(|s| !s.is_self)
                .filter_map(|s| s.auto_config_transport_address.clone()),
        );
        addresses
    }

    /// Fetch new envelopes, verify them and store them as `waiting`
    pub fn receive(&mut self, transport: &dyn Transport) -> Result<ReceiveReport, MmsError> {
        let registry = self.registry.as_ref().ok_or(MmsError::NotActive)?;
        let envelopes = transport.receive(&self.listen_addresses(registry))?;

        let mut report = ReceiveReport::default();
        for envelope in envelopes {
            if self.store.contains_hash(&envelope.hash) {
                report.duplicates += 1;
                continue;
            }
            match self.accept(&envelope) {
                Ok(id) => report.received.push(id),
                Err(e) => {
                    let reason = format!(
                        "{} from {}: {}",
                        envelope.transport_id.as_deref().unwrap_or("envelope"),
                        envelope.source_transport_address,
                        e
                    );
                    log::warn!("Rejected {}", reason);
                    report.rejected.push(reason);
                }
            }
        }
        Ok(report)
    }

    fn accept(&mut self, envelope: &Envelope) -> Result<u32, MmsError> {
        let content = envelope
            .verify()
            .map_err(|e| MmsError::Verification(e.to_string()))?;
        let message_type = MessageType::from_wire_tag(envelope.message_type).ok_or_else(|| {
            MmsError::Verification(format!("unknown message type {}", envelope.message_type))
        })?;

        let registry = self.registry.as_mut().ok_or(MmsError::NotActive)?;
        let signer_index = match message_type {
            MessageType::SignerConfig => 0,
            MessageType::AutoConfigData => {
                let index = registry
                    .index_by_auto_config_address(&envelope.destination_transport_address)
                    .ok_or_else(|| {
                        MmsError::Verification("auto-config data for an unknown token".to_string())
                    })?;
                registry.get_mut(index)?.auto_config = AutoConfigState::ConfigReceived;
                index
            }
            _ => {
                let index = registry
                    .index_by_wallet_address(&envelope.source_wallet_address)
                    .filter(|i| *i != 0)
                    .ok_or_else(|| {
                        MmsError::Verification(format!(
                            "unknown sender {}",
                            envelope.source_wallet_address
                        ))
                    })?;
                if envelope.destination_wallet_address != registry.me().wallet_address {
                    return Err(MmsError::Verification(
                        "not addressed to this wallet".to_string(),
                    ));
                }
                index
            }
        };

        let message = self.store.insert(
            NewMessage::new(message_type, MessageDirection::In, signer_index, content)
                .at_height(envelope.wallet_height)
                .in_round(envelope.round)
                .received(
                    envelope.hash.clone(),
                    envelope.transport_id.clone(),
                    envelope.timestamp,
                ),
        );
        Ok(message.id)
    }
}
