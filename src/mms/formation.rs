//! Multisig formation state of the local wallet
//!
//! The wallet goes `none -> prepared -> made -> exchanging(k) -> finalized`.
//! The number of additional key exchange rounds `R` comes from the
//! multisig backend and is fixed when the wallet is prepared.

use crate::mms::error::MmsError;
use crate::mms::signer::SignerRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FormationState {
    /// Not multisig, own key set not produced yet
    #[default]
    None,
    /// Own key set produced and queued for the other signers
    Prepared,
    /// Multisig made from all key sets; round 1 of the additional exchange pending
    Made,
    /// Waiting for the additional key sets of `round` (2..=R)
    Exchanging { round: u32 },
    /// All rounds done, wallet ready to transact
    Finalized,
}

impl FormationState {
    /// Wallet addresses are part of the multisig keys from `made` on
    pub fn locks_addresses(&self) -> bool {
        matches!(
            self,
            FormationState::Made | FormationState::Exchanging { .. } | FormationState::Finalized
        )
    }

    /// Round whose additional key sets are awaited, if any
    pub fn current_round(&self) -> Option<u32> {
        match self {
            FormationState::Made => Some(1),
            FormationState::Exchanging { round } => Some(*round),
            _ => None,
        }
    }
}

impl fmt::Display for FormationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormationState::None => f.write_str("none"),
            FormationState::Prepared => f.write_str("prepared"),
            FormationState::Made => f.write_str("made"),
            FormationState::Exchanging { round } => write!(f, "exchanging (round {})", round),
            FormationState::Finalized => f.write_str("finalized"),
        }
    }
}

/// Formation state plus the round count it was prepared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Formation {
    state: FormationState,
    /// Additional key exchange rounds after `make_multisig`
    rounds: Option<u32>,
}

impl Formation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FormationState {
        self.state
    }

    pub fn rounds(&self) -> Option<u32> {
        self.rounds
    }

    /// Own key set produced; fixes `R`
    pub fn prepare(&mut self, rounds: u32) -> Result<(), MmsError> {
        self.expect(FormationState::None)?;
        self.state = FormationState::Prepared;
        self.rounds = Some(rounds);
        log::info!("Multisig prepared, {} additional key exchange round(s)", rounds);
        Ok(())
    }

    /// Multisig made from all key sets
    pub fn make(&mut self, registry: &SignerRegistry) -> Result<(), MmsError> {
        self.expect(FormationState::Prepared)?;
        if self.rounds.unwrap_or(0) == 0 {
            self.finalize(registry)
        } else {
            self.state = FormationState::Made;
            Ok(())
        }
    }

    /// The additional key sets of the current round were exchanged
    pub fn complete_round(&mut self, registry: &SignerRegistry) -> Result<(), MmsError> {
        let round = self
            .state
            .current_round()
            .ok_or_else(|| MmsError::WrongFormationState(self.state.to_string()))?;
        if round >= self.rounds.unwrap_or(0) {
            self.finalize(registry)
        } else {
            self.state = FormationState::Exchanging { round: round + 1 };
            log::info!("Key exchange round {} done", round);
            Ok(())
        }
    }

    fn finalize(&mut self, registry: &SignerRegistry) -> Result<(), MmsError> {
        let unresolved: Vec<u32> = registry
            .list()
            .iter()
            .filter(|s| s.wallet_address.is_none())
            .map(|s| s.index)
            .collect();
        if !unresolved.is_empty() {
            return Err(MmsError::IncompleteSigners(unresolved));
        }
        self.state = FormationState::Finalized;
        log::info!("Multisig wallet finalized");
        Ok(())
    }

    fn expect(&self, expected: FormationState) -> Result<(), MmsError> {
        if self.state != expected {
            return Err(MmsError::WrongFormationState(self.state.to_string()));
        }
        Ok(())
    }
}
