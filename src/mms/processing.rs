//! Carrying out the next step
//!
//! The evaluator only decides; `execute` runs the decided action against
//! the wallet backend, records what the wallet produced and marks the
//! consumed messages processed.

use crate::mms::context::{MmsContext, WalletOutput};
use crate::mms::error::MmsError;
use crate::mms::evaluator::{Action, WaitReason};
use crate::mms::formation::FormationState;
use crate::mms::message::{MessageDirection, MessageFilter, MessageState, MessageType};
use crate::mms::store::NewMessage;
use crate::transport::Transport;
use crate::wallet::MultisigBackend;

/// Choices the user can make up front
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    /// Signer to forward a partially signed transaction to
    pub send_to: Option<u32>,
}

/// What running an action did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done {
        action: &'static str,
        /// Messages the action added
        created: Vec<u32>,
        detail: Option<String>,
    },
    /// A transaction could go to several signers and none was chosen
    ConfirmationRequired { tx: u32, candidates: Vec<u32> },
    NothingReady(WaitReason),
}

fn contents(ctx: &MmsContext, ids: &[u32]) -> Result<Vec<Vec<u8>>, MmsError> {
    ids.iter()
        .map(|id| ctx.store().get(*id).map(|m| m.content.clone()))
        .collect()
}

/// Run `action` against `wallet`
pub fn execute(
    ctx: &mut MmsContext,
    wallet: &mut dyn MultisigBackend,
    transport: &dyn Transport,
    action: Action,
    options: &ExecuteOptions,
) -> Result<Outcome, MmsError> {
    let name = action.name();
    let height = wallet.snapshot().height;
    let done = |created: Vec<u32>, detail: Option<String>| Outcome::Done {
        action: name,
        created,
        detail,
    };

    match action {
        Action::PrepareMultisig => {
            let registry = ctx.registry()?;
            let (threshold, total) = (registry.threshold(), registry.total());
            let state = ctx.formation().state();
            if state != FormationState::None {
                return Err(MmsError::WrongFormationState(state.to_string()));
            }

            let key_set = wallet.prepare_multisig()?;
            ctx.formation_mut().prepare(wallet.kex_rounds(threshold, total))?;
            let created = ctx.process_wallet_created_data(WalletOutput::KeySet(key_set), height)?;
            Ok(done(created, None))
        }

        Action::MakeMultisig { key_sets } => {
            let inputs = contents(ctx, &key_sets)?;
            let threshold = ctx.registry()?.threshold();
            let mut formation = *ctx.formation();
            formation.make(ctx.registry()?)?;

            let next = wallet.make_multisig(threshold, &inputs)?;
            *ctx.formation_mut() = formation;
            ctx.complete(&key_sets, transport)?;

            let created = match next {
                Some(key_set) => ctx.process_wallet_created_data(
                    WalletOutput::AdditionalKeySet { round: 1, key_set },
                    height,
                )?,
                None => Vec::new(),
            };
            Ok(done(created, Some(format!("formation is now {}", formation.state()))))
        }

        Action::ExchangeMultisigKeys { round, key_sets } => {
            let inputs = contents(ctx, &key_sets)?;
            let mut formation = *ctx.formation();
            formation.complete_round(ctx.registry()?)?;

            let next = wallet.exchange_multisig_keys(&inputs)?;
            *ctx.formation_mut() = formation;
            ctx.complete(&key_sets, transport)?;

            let created = match next {
                Some(key_set) => ctx.process_wallet_created_data(
                    WalletOutput::AdditionalKeySet {
                        round: round + 1,
                        key_set,
                    },
                    height,
                )?,
                None => Vec::new(),
            };
            Ok(done(created, Some(format!("formation is now {}", formation.state()))))
        }

        Action::ExportMultisigInfo => {
            let info = wallet.export_multisig_info()?;
            let created = ctx.process_wallet_created_data(WalletOutput::SyncData(info), height)?;
            Ok(done(created, None))
        }

        Action::ImportMultisigInfo { sync_data, forced } => {
            let inputs = contents(ctx, &sync_data)?;
            let imported = wallet.import_multisig_info(&inputs)?;
            ctx.complete(&sync_data, transport)?;
            let detail = format!(
                "imported sync data of {} signer(s){}",
                imported,
                if forced { " (forced)" } else { "" }
            );
            Ok(done(Vec::new(), Some(detail)))
        }

        Action::SignMultisig { tx } => {
            let content = ctx.store().get(tx)?.content.clone();
            let signed = wallet.sign_multisig(&content)?;
            ctx.complete(&[tx], transport)?;

            let output = if signed.complete {
                WalletOutput::FullySignedTx(signed.tx)
            } else {
                WalletOutput::PartiallySignedTx(signed.tx)
            };
            let created = ctx.process_wallet_created_data(output, height)?;
            Ok(done(created, None))
        }

        Action::SubmitMultisig { tx } => {
            let content = ctx.store().get(tx)?.content.clone();
            let txid = wallet.submit_multisig(&content)?;
            ctx.complete(&[tx], transport)?;
            Ok(done(Vec::new(), Some(txid)))
        }

        Action::SendTx { tx, candidates } => {
            let target = match options.send_to {
                Some(index) if candidates.contains(&index) => index,
                Some(index) => return Err(MmsError::UnknownSigner(index.to_string())),
                None if candidates.len() == 1 => candidates[0],
                None => return Ok(Outcome::ConfirmationRequired { tx, candidates }),
            };

            let message = ctx.store().get(tx)?;
            let forward = NewMessage::new(
                MessageType::PartiallySignedTx,
                MessageDirection::Out,
                target,
                message.content.clone(),
            )
            .at_height(message.wallet_height);
            let id = ctx.store_mut().insert(forward).id;
            ctx.complete(&[tx], transport)?;
            Ok(done(vec![id], None))
        }

        Action::ProcessSignerConfig { config } => {
            ctx.process_signer_config(config, transport)?;
            Ok(done(Vec::new(), None))
        }

        Action::ProcessAutoConfigData { data } => {
            let created = ctx.process_auto_config_data(&data, transport)?;
            Ok(done(created, None))
        }

        Action::NothingReady(reason) => Ok(Outcome::NothingReady(reason)),
    }
}

/// Sync data carries the height of its sender, so waiting sync data above
/// the own height means another signer submitted a transfer
fn refresh_wallet(ctx: &MmsContext, wallet: &mut dyn MultisigBackend) {
    if ctx.formation().state() != FormationState::Finalized {
        return;
    }
    let newest = ctx
        .store()
        .list(
            MessageFilter::new()
                .of_type(MessageType::SyncData)
                .direction(MessageDirection::In)
                .state(MessageState::Waiting),
        )
        .map(|m| m.wallet_height)
        .max();
    if let Some(height) = newest {
        wallet.refresh(height);
    }
}

/// Decide the next step, run it and auto-send what it created
pub fn run_next_step(
    ctx: &mut MmsContext,
    wallet: &mut dyn MultisigBackend,
    transport: &dyn Transport,
    force_sync: bool,
    options: &ExecuteOptions,
) -> Result<Outcome, MmsError> {
    refresh_wallet(ctx, wallet);
    let action = ctx.next_step(&wallet.snapshot(), force_sync)?;
    log::debug!("Next step: {}", action);
    let outcome = execute(ctx, wallet, transport, action, options)?;
    ctx.auto_send(transport, &*wallet)?;
    Ok(outcome)
}

/// Start a transfer from the multisig wallet; the transaction is stored as
/// a container message for the next steps
pub fn transfer(
    ctx: &mut MmsContext,
    wallet: &mut dyn MultisigBackend,
    destination: &str,
    amount: u64,
) -> Result<Vec<u32>, MmsError> {
    ctx.registry()?;
    let state = ctx.formation().state();
    if state != FormationState::Finalized {
        return Err(MmsError::WrongFormationState(state.to_string()));
    }

    let signed = wallet.transfer(destination, amount)?;
    let output = if signed.complete {
        WalletOutput::FullySignedTx(signed.tx)
    } else {
        WalletOutput::PartiallySignedTx(signed.tx)
    };
    let height = wallet.snapshot().height;
    ctx.process_wallet_created_data(output, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mms::signer::SignerUpdate;
    use crate::transport::MemoryTransport;
    use crate::wallet::{LocalWallet, WalletSnapshot};

    struct Party {
        ctx: MmsContext,
        wallet: LocalWallet,
    }

    fn parties(threshold: u32, names: &[&str]) -> Vec<Party> {
        let mut parties: Vec<Party> = names
            .iter()
            .map(|name| {
                let wallet = LocalWallet::new(Some(name));
                let mut ctx = MmsContext::new();
                ctx.init(
                    threshold,
                    names.len() as u32,
                    name,
                    &format!("{}@mem", name.to_lowercase()),
                    &wallet.address(),
                    false,
                )
                .unwrap();
                Party { ctx, wallet }
            })
            .collect();

        let roster: Vec<(String, String)> = parties
            .iter()
            .map(|p| (p.wallet.label.clone().unwrap(), p.wallet.address()))
            .collect();
        for (i, party) in parties.iter_mut().enumerate() {
            let others = roster.iter().enumerate().filter(|(j, _)| *j != i);
            for (slot, (_, (label, address))) in others.enumerate() {
                party
                    .ctx
                    .set_signer(
                        slot as u32 + 1,
                        SignerUpdate {
                            label: Some(label.clone()),
                            transport_address: Some(format!("{}@mem", label.to_lowercase())),
                            wallet_address: Some(address.clone()),
                        },
                    )
                    .unwrap();
            }
        }
        parties
    }

    fn step(party: &mut Party, transport: &MemoryTransport, force: bool, send_to: Option<u32>) -> Outcome {
        party.ctx.receive(transport).unwrap();
        let outcome = run_next_step(
            &mut party.ctx,
            &mut party.wallet,
            transport,
            force,
            &ExecuteOptions { send_to },
        )
        .unwrap();
        party.ctx.send_all(transport, &party.wallet).unwrap();
        outcome
    }

    fn action(outcome: &Outcome) -> &'static str {
        match outcome {
            Outcome::Done { action, .. } => action,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn formed(transport: &MemoryTransport) -> Vec<Party> {
        let mut parties = parties(2, &["Alice", "Bob", "Carol"]);
        for expected in ["prepare_multisig", "make_multisig", "exchange_multisig_keys"] {
            for party in parties.iter_mut() {
                assert_eq!(action(&step(party, transport, false, None)), expected);
            }
        }
        parties
    }

    #[test]
    fn test_key_exchange() {
        let transport = MemoryTransport::new();
        let parties = formed(&transport);

        let address = parties[0].wallet.multisig_address().unwrap();
        for party in &parties {
            assert_eq!(party.ctx.formation().state(), FormationState::Finalized);
            assert!(party.wallet.is_ready());
            assert_eq!(party.wallet.multisig_address().unwrap(), address);
        }
        assert_eq!(transport.pending(), 0);
    }

    #[test]
    fn test_prepare_twice_fails_without_touching_wallet() {
        let transport = MemoryTransport::new();
        let mut parties = parties(2, &["Alice", "Bob"]);
        let alice = &mut parties[0];
        step(alice, &transport, false, None);

        let result = execute(
            &mut alice.ctx,
            &mut alice.wallet,
            &transport,
            Action::PrepareMultisig,
            &ExecuteOptions::default(),
        );
        assert!(matches!(result, Err(MmsError::WrongFormationState(_))));
        assert_eq!(alice.ctx.store().len(), 1);
    }

    #[test]
    fn test_transfer_needs_finalized_wallet() {
        let mut parties = parties(2, &["Alice", "Bob"]);
        let alice = &mut parties[0];
        assert!(matches!(
            transfer(&mut alice.ctx, &mut alice.wallet, "1Dest", 5),
            Err(MmsError::WrongFormationState(_))
        ));
    }

    #[test]
    fn test_transfer_sign_submit_and_sync() {
        let transport = MemoryTransport::new();
        let mut parties = formed(&transport);

        let alice = &mut parties[0];
        let created = transfer(&mut alice.ctx, &mut alice.wallet, "1Dest", 10).unwrap();
        assert_eq!(created.len(), 1);

        // Two possible co-signers and no choice made
        let outcome = step(alice, &transport, false, None);
        assert_eq!(
            outcome,
            Outcome::ConfirmationRequired {
                tx: created[0],
                candidates: vec![1, 2]
            }
        );
        let wrong = execute(
            &mut alice.ctx,
            &mut alice.wallet,
            &transport,
            Action::SendTx {
                tx: created[0],
                candidates: vec![1, 2],
            },
            &ExecuteOptions { send_to: Some(0) },
        );
        assert!(matches!(wrong, Err(MmsError::UnknownSigner(_))));
        assert_eq!(action(&step(alice, &transport, false, Some(1))), "send_tx");
        assert_eq!(
            alice.ctx.store().get(created[0]).unwrap().state,
            MessageState::Processed
        );

        let bob = &mut parties[1];
        assert_eq!(action(&step(bob, &transport, false, None)), "sign_multisig");
        let submitted = step(bob, &transport, false, None);
        assert_eq!(action(&submitted), "submit_multisig");
        assert!(matches!(submitted, Outcome::Done { detail: Some(_), .. }));
        assert_eq!(bob.wallet.submitted().len(), 1);
        assert!(bob.wallet.snapshot().needs_sync);
        assert_eq!(action(&step(bob, &transport, false, None)), "export_multisig_info");

        // Bob's sync data tells the others about the transfer
        for i in [0, 2] {
            let party = &mut parties[i];
            assert_eq!(action(&step(party, &transport, false, None)), "export_multisig_info");
            assert_eq!(
                party.wallet.snapshot(),
                WalletSnapshot {
                    height: 1,
                    needs_sync: true
                }
            );
        }

        // Everyone imports without forcing
        for party in parties.iter_mut() {
            let outcome = step(party, &transport, false, None);
            assert_eq!(action(&outcome), "import_multisig_info");
            assert!(matches!(
                outcome,
                Outcome::Done { detail: Some(ref d), .. } if !d.contains("forced")
            ));
            assert!(!party.wallet.snapshot().needs_sync);
        }

        // Sync data arrives exactly as Alice exported it
        let sent = parties[0]
            .ctx
            .store()
            .all()
            .iter()
            .find(|m| {
                m.message_type == MessageType::SyncData
                    && m.direction == MessageDirection::Out
                    && m.signer_index == 1
            })
            .unwrap()
            .content
            .clone();
        let received = parties[1]
            .ctx
            .store()
            .all()
            .iter()
            .find(|m| {
                m.message_type == MessageType::SyncData
                    && m.direction == MessageDirection::In
                    && m.signer_index == 1
            })
            .unwrap()
            .content
            .clone();
        assert_eq!(sent, received);
    }

    #[test]
    fn test_forced_sync_with_silent_signer() {
        let transport = MemoryTransport::new();
        let mut parties = formed(&transport);

        let alice = &mut parties[0];
        transfer(&mut alice.ctx, &mut alice.wallet, "1Dest", 3).unwrap();
        step(alice, &transport, false, Some(1));
        let bob = &mut parties[1];
        step(bob, &transport, false, None);
        assert_eq!(action(&step(bob, &transport, false, None)), "submit_multisig");
        assert_eq!(action(&step(bob, &transport, false, None)), "export_multisig_info");
        assert_eq!(
            action(&step(&mut parties[0], &transport, false, None)),
            "export_multisig_info"
        );

        // Carol never answers; Bob has to force it with Alice's data alone
        let bob = &mut parties[1];
        match step(bob, &transport, false, None) {
            Outcome::NothingReady(reason) => {
                assert_eq!(reason.missing, vec![2]);
                assert!(reason.message.contains("mms next sync"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let forced = step(bob, &transport, true, None);
        assert_eq!(action(&forced), "import_multisig_info");
        assert!(matches!(
            forced,
            Outcome::Done { detail: Some(ref d), .. } if d.contains("forced")
        ));
        assert!(!bob.wallet.snapshot().needs_sync);
    }

    #[test]
    fn test_auto_send() {
        let transport = MemoryTransport::new();
        let mut parties = parties(2, &["Alice", "Bob"]);
        let alice = &mut parties[0];
        alice.ctx.options.auto_send = true;

        run_next_step(
            &mut alice.ctx,
            &mut alice.wallet,
            &transport,
            false,
            &ExecuteOptions::default(),
        )
        .unwrap();
        assert_eq!(transport.pending(), 1);
    }
}
