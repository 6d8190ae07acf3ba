//! Auto-config bootstrap
//!
//! A manager hands out one single-use token per co-signer. A signer starting
//! from such a token sends its own transport and wallet address to a
//! transport address derived from the token, which the manager listens on.
//! Once the manager has the data of every signer it distributes the complete
//! signer config.
//!
//! Per signer the bootstrap goes
//! `idle -> token_issued -> config_sent -> config_received -> committed`.

use crate::crypto::{hash160, sha256};
use crate::mms::error::MmsError;
use crate::mms::formation::FormationState;
use crate::mms::signer::{SignerRegistry, SignerUpdate};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tokens start with this prefix
pub const TOKEN_PREFIX: &str = "mms";
/// Random bytes in a token, followed by one checksum byte
pub const TOKEN_BYTES: usize = 4;
/// Derived auto-config transport addresses start with this prefix
pub const TRANSPORT_PREFIX: &str = "mms-";

/// Bootstrap progress of one signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoConfigState {
    #[default]
    Idle,
    TokenIssued,
    ConfigSent,
    ConfigReceived,
    Committed,
}

impl AutoConfigState {
    /// Token issued or used but not yet consumed
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            AutoConfigState::TokenIssued
                | AutoConfigState::ConfigSent
                | AutoConfigState::ConfigReceived
        )
    }
}

impl fmt::Display for AutoConfigState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AutoConfigState::Idle => "idle",
            AutoConfigState::TokenIssued => "token issued",
            AutoConfigState::ConfigSent => "config sent",
            AutoConfigState::ConfigReceived => "config received",
            AutoConfigState::Committed => "committed",
        };
        f.write_str(s)
    }
}

/// Payload of an `auto_config_data` message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoConfigData {
    /// Label the sender uses for itself; informational only, the manager
    /// decides the labels
    pub label: String,
    pub transport_address: String,
    pub wallet_address: String,
}

impl AutoConfigData {
    pub fn to_bytes(&self) -> Result<Vec<u8>, MmsError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MmsError> {
        serde_json::from_slice(bytes).map_err(|e| MmsError::InvalidAutoConfigData(e.to_string()))
    }
}

fn checksum_byte(random: &[u8]) -> u8 {
    sha256(random)[0]
}

/// Create a fresh token: prefix, 4 random bytes and a checksum byte as hex
pub fn create_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES + 1];
    rand::thread_rng().fill_bytes(&mut bytes[..TOKEN_BYTES]);
    bytes[TOKEN_BYTES] = checksum_byte(&bytes[..TOKEN_BYTES]);
    format!("{}{}", TOKEN_PREFIX, hex::encode(bytes))
}

/// Validate a token as typed by a user and return its canonical form.
///
/// The prefix is optional and case-insensitive; `o` is read as `0`, `i` and
/// `l` as `1`. The checksum byte must match.
pub fn check_token(raw: &str) -> Result<String, MmsError> {
    let raw = raw.trim();
    let digits = (TOKEN_BYTES + 1) * 2;
    let invalid = || MmsError::InvalidToken(raw.to_string());
    if !raw.is_ascii() {
        return Err(invalid());
    }

    let hex_digits = if raw.len() == digits + TOKEN_PREFIX.len() {
        let (prefix, rest) = raw.split_at(TOKEN_PREFIX.len());
        if !prefix.eq_ignore_ascii_case(TOKEN_PREFIX) {
            return Err(invalid());
        }
        rest
    } else if raw.len() == digits {
        raw
    } else {
        return Err(invalid());
    };

    let normalized: String = hex_digits
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'o' => '0',
            'i' | 'l' => '1',
            other => other,
        })
        .collect();

    let bytes = hex::decode(&normalized).map_err(|_| invalid())?;
    if bytes[TOKEN_BYTES] != checksum_byte(&bytes[..TOKEN_BYTES]) {
        return Err(invalid());
    }
    Ok(format!("{}{}", TOKEN_PREFIX, normalized))
}

/// Transport address both sides derive from a canonical token
pub fn derive_transport_address(token: &str) -> String {
    let digest = hash160(token.as_bytes());
    format!("{}{}", TRANSPORT_PREFIX, bs58::encode(digest).into_string())
}

/// Issue tokens to every signer except self.
///
/// `labels` are assigned to signers 1.. in order before issuing; afterwards
/// every signer must have a label. Returns `(index, token)` pairs.
pub fn start(
    registry: &mut SignerRegistry,
    labels: &[String],
    formation: &FormationState,
) -> Result<Vec<(u32, String)>, MmsError> {
    if *formation != FormationState::None {
        return Err(MmsError::WrongFormationState(formation.to_string()));
    }
    if labels.len() > registry.total() as usize - 1 {
        return Err(MmsError::InvalidScheme(format!(
            "{} labels given for {} other signers",
            labels.len(),
            registry.total() - 1
        )));
    }

    // Check before touching anything so a failure leaves the roster as is
    let mut unlabeled: Vec<u32> = registry.unlabeled();
    unlabeled.retain(|i| *i == 0 || *i as usize > labels.len());
    if !unlabeled.is_empty() {
        return Err(MmsError::IncompleteLabels(unlabeled));
    }

    for (offset, label) in labels.iter().enumerate() {
        registry.set_signer(
            offset as u32 + 1,
            SignerUpdate {
                label: Some(label.clone()),
                ..Default::default()
            },
            formation,
        )?;
    }

    let mut issued = Vec::new();
    for signer in registry.signers_mut() {
        if signer.is_self {
            continue;
        }
        let token = create_token();
        signer.auto_config_transport_address = Some(derive_transport_address(&token));
        signer.auto_config_token = Some(token.clone());
        signer.auto_config = AutoConfigState::TokenIssued;
        issued.push((signer.index, token));
    }

    log::info!("Auto-config started, {} token(s) issued", issued.len());
    Ok(issued)
}

/// Discard all unconsumed tokens and return every signer to `idle`
pub fn stop(registry: &mut SignerRegistry) {
    for signer in registry.signers_mut() {
        signer.auto_config_token = None;
        signer.auto_config_transport_address = None;
        signer.auto_config = AutoConfigState::Idle;
    }
    log::info!("Auto-config stopped");
}

/// Signers the manager still expects auto-config data from
pub fn pending_signers(registry: &SignerRegistry) -> Vec<u32> {
    registry
        .list()
        .iter()
        .filter(|s| !s.is_self && s.auto_config_token.is_some())
        .map(|s| s.index)
        .collect()
}
