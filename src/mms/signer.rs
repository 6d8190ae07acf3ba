//! Signer registry
//!
//! Holds the roster of the N authorized co-signers of an M-of-N wallet.
//! Index 0 is always the local wallet itself.

use crate::crypto::{add_digest, sha256};
use crate::mms::auto_config::AutoConfigState;
use crate::mms::error::MmsError;
use crate::mms::formation::FormationState;
use serde::{Deserialize, Serialize};

/// Maximum label length kept after sanitising
pub const MAX_LABEL_LEN: usize = 50;
/// Maximum transport address length kept after sanitising
pub const MAX_TRANSPORT_ADDRESS_LEN: usize = 200;

/// One authorized co-signer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signer {
    /// Position in the roster, stable once assigned
    pub index: u32,
    pub label: Option<String>,
    pub transport_address: Option<String>,
    pub wallet_address: Option<String>,
    /// Marks the local wallet
    pub is_self: bool,
    /// Present only while auto-config runs
    pub auto_config_token: Option<String>,
    /// Transport address derived from the token, listened on by the manager
    pub auto_config_transport_address: Option<String>,
    #[serde(default)]
    pub auto_config: AutoConfigState,
}

impl Signer {
    fn empty(index: u32) -> Self {
        Self {
            index,
            label: None,
            transport_address: None,
            wallet_address: None,
            is_self: index == 0,
            auto_config_token: None,
            auto_config_transport_address: None,
            auto_config: AutoConfigState::Idle,
        }
    }

    /// Label, transport address and wallet address are all known
    pub fn is_complete(&self) -> bool {
        self.label.is_some() && self.transport_address.is_some() && self.wallet_address.is_some()
    }

    /// Label or a placeholder for display
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("<signer {}>", self.index))
    }
}

/// Fields to change with `set_signer`; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct SignerUpdate {
    pub label: Option<String>,
    pub transport_address: Option<String>,
    pub wallet_address: Option<String>,
}

/// The roster for the current M/N scheme
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RegistryData")]
pub struct SignerRegistry {
    threshold: u32,
    signers: Vec<Signer>,
}

/// Registry as stored, checked before it becomes a `SignerRegistry`
#[derive(Deserialize)]
struct RegistryData {
    threshold: u32,
    signers: Vec<Signer>,
}

impl TryFrom<RegistryData> for SignerRegistry {
    type Error = MmsError;

    fn try_from(data: RegistryData) -> Result<Self, Self::Error> {
        let total = data.signers.len();
        if total < 2 || data.threshold == 0 || data.threshold as usize > total {
            return Err(MmsError::InvalidScheme(format!(
                "stored roster has threshold {} and {} signer(s)",
                data.threshold, total
            )));
        }
        for (position, signer) in data.signers.iter().enumerate() {
            if signer.index as usize != position || signer.is_self != (position == 0) {
                return Err(MmsError::InvalidScheme(format!(
                    "stored signer {} is out of place",
                    signer.index
                )));
            }
        }
        if data.signers[0].wallet_address.is_none() {
            return Err(MmsError::IncompleteSigners(vec![0]));
        }

        Ok(Self {
            threshold: data.threshold,
            signers: data.signers,
        })
    }
}

impl SignerRegistry {
    /// Create a roster of `total` signers requiring `threshold` signatures,
    /// with signer 0 describing the local wallet.
    pub fn new(
        threshold: u32,
        total: u32,
        own_label: &str,
        own_transport_address: &str,
        own_wallet_address: &str,
    ) -> Result<Self, MmsError> {
        if total < 2 {
            return Err(MmsError::InvalidScheme(format!(
                "need at least 2 signers, got {}",
                total
            )));
        }
        if threshold == 0 || threshold > total {
            return Err(MmsError::InvalidScheme(format!(
                "threshold {} must be between 1 and {}",
                threshold, total
            )));
        }

        let mut signers: Vec<Signer> = (0..total).map(Signer::empty).collect();
        let me = &mut signers[0];
        me.label = non_empty(sanitize_text(own_label, MAX_LABEL_LEN));
        me.transport_address =
            non_empty(sanitize_text(own_transport_address, MAX_TRANSPORT_ADDRESS_LEN));
        me.wallet_address = Some(own_wallet_address.to_string());

        Ok(Self { threshold, signers })
    }

    /// M in M-of-N
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// N in M-of-N
    pub fn total(&self) -> u32 {
        self.signers.len() as u32
    }

    /// Description like "2/3"
    pub fn scheme(&self) -> String {
        format!("{}/{}", self.threshold, self.total())
    }

    /// All signers ordered by index
    pub fn list(&self) -> &[Signer] {
        &self.signers
    }

    /// Indices of every signer except self
    pub fn others(&self) -> impl Iterator<Item = u32> + '_ {
        self.signers.iter().filter(|s| !s.is_self).map(|s| s.index)
    }

    pub fn me(&self) -> &Signer {
        &self.signers[0]
    }

    pub fn get(&self, index: u32) -> Result<&Signer, MmsError> {
        self.signers
            .get(index as usize)
            .ok_or(MmsError::InvalidIndex {
                index,
                count: self.total(),
            })
    }

    pub(crate) fn get_mut(&mut self, index: u32) -> Result<&mut Signer, MmsError> {
        let count = self.total();
        self.signers
            .get_mut(index as usize)
            .ok_or(MmsError::InvalidIndex { index, count })
    }

    pub(crate) fn signers_mut(&mut self) -> impl Iterator<Item = &mut Signer> {
        self.signers.iter_mut()
    }

    /// Change label, transport address and/or wallet address of one signer.
    ///
    /// Wallet addresses are baked into the multisig keys once the wallet is
    /// made multisig, so changing one from then on fails with `AddressLocked`.
    /// The own address belongs to the local wallet and never changes. A
    /// wallet address can not be cleared or given to two signers.
    pub fn set_signer(
        &mut self,
        index: u32,
        update: SignerUpdate,
        formation: &FormationState,
    ) -> Result<(), MmsError> {
        let current = self.get(index)?;

        let wallet_address = match update.wallet_address {
            Some(address) => {
                let address = address.trim().to_string();
                if address.is_empty() {
                    return Err(MmsError::EmptyWalletAddress(index));
                }
                if current.wallet_address.as_deref() != Some(address.as_str()) {
                    if current.is_self || formation.locks_addresses() {
                        return Err(MmsError::AddressLocked(index));
                    }
                    if let Some(holder) = self.index_by_wallet_address(&address) {
                        return Err(MmsError::DuplicateAddress { address, index: holder });
                    }
                }
                Some(address)
            }
            None => None,
        };

        let label = update
            .label
            .map(|l| sanitize_text(&l, MAX_LABEL_LEN))
            .and_then(non_empty);
        if let Some(label) = &label {
            if self
                .signers
                .iter()
                .any(|s| s.index != index && s.label.as_deref() == Some(label.as_str()))
            {
                return Err(MmsError::DuplicateLabel(label.clone()));
            }
        }

        let signer = self.get_mut(index)?;
        if label.is_some() {
            signer.label = label;
        }
        if let Some(transport) = update.transport_address {
            signer.transport_address =
                non_empty(sanitize_text(&transport, MAX_TRANSPORT_ADDRESS_LEN));
        }
        if wallet_address.is_some() {
            signer.wallet_address = wallet_address;
        }

        log::info!("Updated signer {}: {}", index, signer.display_label());
        Ok(())
    }

    pub fn index_by_wallet_address(&self, address: &str) -> Option<u32> {
        self.signers
            .iter()
            .find(|s| s.wallet_address.as_deref() == Some(address))
            .map(|s| s.index)
    }

    pub fn index_by_label(&self, label: &str) -> Option<u32> {
        self.signers
            .iter()
            .find(|s| s.label.as_deref() == Some(label))
            .map(|s| s.index)
    }

    /// Signer (other than self) whose auto-config channel is `transport_address`
    pub fn index_by_auto_config_address(&self, transport_address: &str) -> Option<u32> {
        self.signers
            .iter()
            .filter(|s| !s.is_self)
            .find(|s| s.auto_config_transport_address.as_deref() == Some(transport_address))
            .map(|s| s.index)
    }

    /// Every signer has label, transport address and wallet address
    pub fn config_complete(&self) -> bool {
        self.signers.iter().all(Signer::is_complete)
    }

    /// Signers still lacking label, transport address or wallet address
    pub fn incomplete_signers(&self) -> Vec<u32> {
        self.signers
            .iter()
            .filter(|s| !s.is_complete())
            .map(|s| s.index)
            .collect()
    }

    /// Signers without a label
    pub fn unlabeled(&self) -> Vec<u32> {
        self.signers
            .iter()
            .filter(|s| s.label.is_none())
            .map(|s| s.index)
            .collect()
    }

    /// Comma-separated labels of the given signers, for diagnostics
    pub fn describe(&self, indices: &[u32]) -> String {
        indices
            .iter()
            .map(|i| match self.get(*i) {
                Ok(s) => s.display_label(),
                Err(_) => format!("<signer {}>", i),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Checksum over the roster that all signers can compare out-of-band.
    ///
    /// Each signer sees the roster in a different order (self is always
    /// index 0), so per-field digests are summed byte-wise.
    pub fn config_checksum(&self) -> String {
        let mut sum = [0u8; 32];
        add_digest(&mut sum, &sha256(&self.total().to_le_bytes()));
        add_digest(&mut sum, &sha256(&self.threshold.to_le_bytes()));
        for signer in &self.signers {
            let transport = signer.transport_address.as_deref().unwrap_or("");
            add_digest(&mut sum, &sha256(transport.as_bytes()));
            if let Some(address) = &signer.wallet_address {
                add_digest(&mut sum, &sha256(address.as_bytes()));
            }
        }
        hex::encode(&sum[..4])
    }
}

/// Make attacker-controlled text safe to display: truncate to `max_len`
/// characters and replace control characters and angle brackets with '?'
pub fn sanitize_text(text: &str, max_len: usize) -> String {
    text.chars()
        .take(max_len)
        .map(|c| {
            let code = c as u32;
            if code < 0x20 || code == 0x7f || (0x80..=0x9f).contains(&code) || c == '<' || c == '>'
            {
                '?'
            } else {
                c
            }
        })
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SignerRegistry {
        SignerRegistry::new(2, 3, "Alice", "alice@relay", "1AliceAddr").unwrap()
    }

    fn update(label: &str, transport: &str, address: &str) -> SignerUpdate {
        SignerUpdate {
            label: Some(label.to_string()),
            transport_address: Some(transport.to_string()),
            wallet_address: Some(address.to_string()),
        }
    }

    #[test]
    fn test_scheme_validation() {
        assert!(SignerRegistry::new(0, 3, "a", "t", "w").is_err());
        assert!(SignerRegistry::new(4, 3, "a", "t", "w").is_err());
        assert!(SignerRegistry::new(1, 1, "a", "t", "w").is_err());
        assert!(SignerRegistry::new(2, 2, "a", "t", "w").is_ok());
    }

    #[test]
    fn test_self_is_index_zero_with_known_address() {
        let reg = registry();
        assert_eq!(reg.total(), 3);
        assert!(reg.me().is_self);
        assert_eq!(reg.me().wallet_address.as_deref(), Some("1AliceAddr"));
        assert_eq!(reg.list().iter().filter(|s| s.is_self).count(), 1);
        assert_eq!(reg.others().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_set_signer_and_lookup() {
        let mut reg = registry();
        reg.set_signer(1, update("Bob", "bob@relay", "1BobAddr"), &FormationState::None)
            .unwrap();

        assert_eq!(reg.index_by_label("Bob"), Some(1));
        assert_eq!(reg.index_by_wallet_address("1BobAddr"), Some(1));
        assert!(!reg.config_complete());
        assert_eq!(reg.incomplete_signers(), vec![2]);
    }

    #[test]
    fn test_invalid_index() {
        let mut reg = registry();
        let result = reg.set_signer(3, SignerUpdate::default(), &FormationState::None);
        assert!(matches!(
            result,
            Err(MmsError::InvalidIndex { index: 3, count: 3 })
        ));
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let mut reg = registry();
        let result = reg.set_signer(
            1,
            SignerUpdate {
                label: Some("Alice".to_string()),
                ..Default::default()
            },
            &FormationState::None,
        );
        assert!(matches!(result, Err(MmsError::DuplicateLabel(_))));
    }

    #[test]
    fn test_address_locked_after_made() {
        let mut reg = registry();
        reg.set_signer(1, update("Bob", "bob@relay", "1BobAddr"), &FormationState::None)
            .unwrap();

        let made = FormationState::Made;
        let result = reg.set_signer(
            1,
            SignerUpdate {
                wallet_address: Some("1Mallory".to_string()),
                ..Default::default()
            },
            &made,
        );
        assert!(matches!(result, Err(MmsError::AddressLocked(1))));

        // Labels and transport stay editable
        reg.set_signer(
            1,
            SignerUpdate {
                label: Some("Bobby".to_string()),
                transport_address: Some("bobby@relay".to_string()),
                wallet_address: Some("1BobAddr".to_string()),
            },
            &made,
        )
        .unwrap();
        assert_eq!(reg.get(1).unwrap().label.as_deref(), Some("Bobby"));
    }

    #[test]
    fn test_own_wallet_address_is_fixed() {
        let mut reg = registry();
        let clear = SignerUpdate {
            wallet_address: Some(" ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            reg.set_signer(0, clear.clone(), &FormationState::None),
            Err(MmsError::EmptyWalletAddress(0))
        ));
        assert!(matches!(
            reg.set_signer(1, clear, &FormationState::None),
            Err(MmsError::EmptyWalletAddress(1))
        ));

        let replace = SignerUpdate {
            wallet_address: Some("1Other".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            reg.set_signer(0, replace, &FormationState::None),
            Err(MmsError::AddressLocked(0))
        ));
        assert_eq!(reg.me().wallet_address.as_deref(), Some("1AliceAddr"));

        // Repeating the own address together with a new label is fine
        reg.set_signer(
            0,
            SignerUpdate {
                label: Some("Alicia".to_string()),
                wallet_address: Some("1AliceAddr".to_string()),
                ..Default::default()
            },
            &FormationState::None,
        )
        .unwrap();
        assert_eq!(reg.me().label.as_deref(), Some("Alicia"));
    }

    #[test]
    fn test_duplicate_wallet_address_rejected() {
        let mut reg = registry();
        reg.set_signer(1, update("Bob", "bob@relay", "1BobAddr"), &FormationState::None)
            .unwrap();

        let result = reg.set_signer(2, update("Carol", "carol@relay", "1BobAddr"), &FormationState::None);
        assert!(matches!(
            result,
            Err(MmsError::DuplicateAddress { index: 1, .. })
        ));
        assert!(reg.get(2).unwrap().label.is_none());

        let result = reg.set_signer(2, update("Carol", "carol@relay", "1AliceAddr"), &FormationState::None);
        assert!(matches!(
            result,
            Err(MmsError::DuplicateAddress { index: 0, .. })
        ));
        assert_eq!(reg.index_by_wallet_address("1BobAddr"), Some(1));
    }

    #[test]
    fn test_stored_roster_is_checked() {
        let reg = registry();
        let json = serde_json::to_string(&reg).unwrap();
        let loaded: SignerRegistry = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, reg);

        assert!(serde_json::from_str::<SignerRegistry>(r#"{"threshold":1,"signers":[]}"#).is_err());

        let mut value = serde_json::to_value(&reg).unwrap();
        value["threshold"] = serde_json::json!(5);
        assert!(serde_json::from_value::<SignerRegistry>(value).is_err());

        let mut value = serde_json::to_value(&reg).unwrap();
        value["signers"][0]["is_self"] = serde_json::json!(false);
        assert!(serde_json::from_value::<SignerRegistry>(value).is_err());
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("a\x1b[31mb<script>", 50), "a?[31mb?script?");
        assert_eq!(sanitize_text("abcdef", 3), "abc");
    }

    #[test]
    fn test_checksum_independent_of_roster_order() {
        let mut alice = SignerRegistry::new(2, 3, "Alice", "a@r", "1A").unwrap();
        alice.set_signer(1, update("Bob", "b@r", "1B"), &FormationState::None).unwrap();
        alice.set_signer(2, update("Carol", "c@r", "1C"), &FormationState::None).unwrap();

        let mut bob = SignerRegistry::new(2, 3, "Bob", "b@r", "1B").unwrap();
        bob.set_signer(1, update("Carol", "c@r", "1C"), &FormationState::None).unwrap();
        bob.set_signer(2, update("Alice", "a@r", "1A"), &FormationState::None).unwrap();

        assert_eq!(alice.config_checksum(), bob.config_checksum());
        assert_eq!(alice.config_checksum().len(), 8);
    }
}
