//! Protocol state evaluator ("next step")
//!
//! Looks at the signer registry, the message store, the formation state and
//! a snapshot of the wallet and decides the single next thing to do. It is a
//! pure function: nothing is mutated and the same inputs always give the
//! same action.

use crate::mms::auto_config;
use crate::mms::formation::{Formation, FormationState};
use crate::mms::message::{Message, MessageDirection, MessageFilter, MessageState, MessageType};
use crate::mms::signer::SignerRegistry;
use crate::mms::store::MessageStore;
use crate::wallet::WalletSnapshot;
use std::fmt;

/// Why nothing can be done right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitReason {
    /// Signers whose messages are missing
    pub missing: Vec<u32>,
    pub message: String,
}

/// The next protocol step; message ids name the inputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    PrepareMultisig,
    MakeMultisig { key_sets: Vec<u32> },
    ExchangeMultisigKeys { round: u32, key_sets: Vec<u32> },
    ExportMultisigInfo,
    ImportMultisigInfo { sync_data: Vec<u32>, forced: bool },
    SignMultisig { tx: u32 },
    SubmitMultisig { tx: u32 },
    /// Own partially signed tx; `candidates` are the signers it may go to
    SendTx { tx: u32, candidates: Vec<u32> },
    ProcessSignerConfig { config: u32 },
    ProcessAutoConfigData { data: Vec<u32> },
    NothingReady(WaitReason),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::PrepareMultisig => "prepare_multisig",
            Action::MakeMultisig { .. } => "make_multisig",
            Action::ExchangeMultisigKeys { .. } => "exchange_multisig_keys",
            Action::ExportMultisigInfo => "export_multisig_info",
            Action::ImportMultisigInfo { .. } => "import_multisig_info",
            Action::SignMultisig { .. } => "sign_multisig",
            Action::SubmitMultisig { .. } => "submit_multisig",
            Action::SendTx { .. } => "send_tx",
            Action::ProcessSignerConfig { .. } => "process_signer_config",
            Action::ProcessAutoConfigData { .. } => "process_auto_config_data",
            Action::NothingReady(_) => "nothing_ready",
        }
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self, Action::NothingReady(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::NothingReady(reason) => write!(f, "nothing ready: {}", reason.message),
            other => f.write_str(other.name()),
        }
    }
}

fn nothing_ready(missing: Vec<u32>, message: String) -> Action {
    Action::NothingReady(WaitReason { missing, message })
}

/// Decide the next step.
///
/// `force_sync` lets sync data be exported or imported although the normal
/// checks would hold it back.
pub fn next_step(
    registry: &SignerRegistry,
    store: &MessageStore,
    formation: &Formation,
    wallet: &WalletSnapshot,
    force_sync: bool,
) -> Action {
    let state = formation.state();

    // A formation step that cannot run yet still lets signer config and
    // auto-config data through; its diagnostic is reported last
    let mut held_back = None;
    match state {
        FormationState::None => {
            if registry.config_complete() {
                return Action::PrepareMultisig;
            }
        }
        FormationState::Prepared => {
            let slots = store.slots(registry, |m| m.message_type == MessageType::KeySet);
            if slots.is_complete() {
                return Action::MakeMultisig {
                    key_sets: slots.waiting_ids(),
                };
            }
            let missing = slots.missing();
            let message = format!("Waiting for key sets from {}", registry.describe(&missing));
            held_back = Some(nothing_ready(missing, message));
        }
        FormationState::Made | FormationState::Exchanging { .. } => {
            let round = state.current_round().unwrap_or(1);
            let slots = store.slots(registry, |m| {
                m.message_type == MessageType::AdditionalKeySet && m.round == round
            });
            if slots.is_complete() {
                return Action::ExchangeMultisigKeys {
                    round,
                    key_sets: slots.waiting_ids(),
                };
            }
            let missing = slots.missing();
            let message = format!(
                "Waiting for round {} key sets from {}",
                round,
                registry.describe(&missing)
            );
            held_back = Some(nothing_ready(missing, message));
        }
        FormationState::Finalized => match finalized_step(registry, store, wallet, force_sync) {
            Some(action) if action.is_ready() => return action,
            other => held_back = other,
        },
    }

    if let Some(m) = waiting_in(store, MessageType::SignerConfig).next() {
        return Action::ProcessSignerConfig { config: m.id };
    }

    let pending = auto_config::pending_signers(registry);
    if !pending.is_empty() {
        let slots = store.slots(registry, |m| m.message_type == MessageType::AutoConfigData);
        let missing: Vec<u32> = pending
            .iter()
            .copied()
            .filter(|i| slots.waiting_id(*i).is_none())
            .collect();
        if missing.is_empty() {
            return Action::ProcessAutoConfigData {
                data: pending.iter().filter_map(|i| slots.waiting_id(*i)).collect(),
            };
        }
        if held_back.is_none() {
            let message = format!(
                "Waiting for auto-config data from {}",
                registry.describe(&missing)
            );
            return nothing_ready(missing, message);
        }
    }

    if let Some(action) = held_back {
        return action;
    }

    if state == FormationState::None {
        let missing = registry.incomplete_signers();
        let message = format!(
            "Signer config not complete, missing data for {}",
            registry.describe(&missing)
        );
        return nothing_ready(missing, message);
    }

    let notes = waiting_in(store, MessageType::Note).count();
    if notes > 0 {
        nothing_ready(
            Vec::new(),
            format!("No protocol messages waiting, but {} note(s); use \"mms note\"", notes),
        )
    } else {
        nothing_ready(Vec::new(), "No messages waiting".to_string())
    }
}

/// Inbound messages of one type still waiting to be processed
fn waiting_in(store: &MessageStore, message_type: MessageType) -> impl Iterator<Item = &Message> {
    store.list(
        MessageFilter::new()
            .of_type(message_type)
            .direction(MessageDirection::In)
            .state(MessageState::Waiting),
    )
}

fn finalized_step(
    registry: &SignerRegistry,
    store: &MessageStore,
    wallet: &WalletSnapshot,
    force_sync: bool,
) -> Option<Action> {
    if wallet.needs_sync || force_sync {
        return Some(sync_step(registry, store, wallet, force_sync));
    }

    if let Some(m) = waiting_in(store, MessageType::PartiallySignedTx).find(|m| m.signer_index != 0) {
        return Some(Action::SignMultisig { tx: m.id });
    }

    if let Some(m) = waiting_in(store, MessageType::FullySignedTx).next() {
        return Some(Action::SubmitMultisig { tx: m.id });
    }

    if let Some(m) = waiting_in(store, MessageType::PartiallySignedTx).find(|m| m.signer_index == 0) {
        return Some(Action::SendTx {
            tx: m.id,
            candidates: registry.others().collect(),
        });
    }

    if waiting_in(store, MessageType::SyncData).next().is_some() {
        return Some(nothing_ready(
            Vec::new(),
            "Sync data is waiting, but nothing is ready under normal circumstances; \
             use \"mms next sync\" to force processing"
                .to_string(),
        ));
    }

    None
}

fn sync_step(
    registry: &SignerRegistry,
    store: &MessageStore,
    wallet: &WalletSnapshot,
    forced: bool,
) -> Action {
    // Stale sync data is only good enough when forced
    let current = |height: u64| forced || height == wallet.height;

    let exported = store
        .list(
            MessageFilter::new()
                .of_type(MessageType::SyncData)
                .direction(MessageDirection::Out),
        )
        .any(|m| m.state != MessageState::Cancelled && current(m.wallet_height));
    if !exported {
        return Action::ExportMultisigInfo;
    }

    let slots = store.slots(registry, |m| {
        m.message_type == MessageType::SyncData && current(m.wallet_height)
    });
    if slots.all_waiting() {
        return Action::ImportMultisigInfo {
            sync_data: slots.waiting_ids(),
            forced,
        };
    }

    let needed = registry.threshold().saturating_sub(1) as usize;
    if forced && slots.waiting_count() > 0 && slots.waiting_count() >= needed {
        log::warn!(
            "Forced sync with {} of {} signers",
            slots.waiting_count(),
            registry.total() - 1
        );
        return Action::ImportMultisigInfo {
            sync_data: slots.waiting_ids(),
            forced,
        };
    }

    let missing = slots.missing_waiting();
    let message = format!(
        "Waiting for sync data from {}. Use \"mms next sync\" to sync with fewer signers",
        registry.describe(&missing)
    );
    nothing_ready(missing, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mms::signer::SignerUpdate;
    use crate::mms::store::NewMessage;

    fn registry() -> SignerRegistry {
        SignerRegistry::new(2, 3, "Alice", "alice@r", "1Alice").unwrap()
    }

    fn complete_registry() -> SignerRegistry {
        let mut reg = registry();
        for (i, name) in [(1, "Bob"), (2, "Carol")] {
            reg.set_signer(
                i,
                SignerUpdate {
                    label: Some(name.to_string()),
                    transport_address: Some(format!("{}@r", name)),
                    wallet_address: Some(format!("1{}", name)),
                },
                &FormationState::None,
            )
            .unwrap();
        }
        reg
    }

    fn finalized(reg: &SignerRegistry) -> Formation {
        let mut formation = Formation::new();
        formation.prepare(1).unwrap();
        formation.make(reg).unwrap();
        formation.complete_round(reg).unwrap();
        formation
    }

    fn inbound(store: &mut MessageStore, message_type: MessageType, from: u32) -> u32 {
        store
            .add(message_type, MessageDirection::In, from, vec![from as u8])
            .id
    }

    fn idle() -> WalletSnapshot {
        WalletSnapshot::default()
    }

    #[test]
    fn test_two_of_three_init_to_make() {
        let reg = complete_registry();
        let store = MessageStore::new();
        let mut formation = Formation::new();

        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), false),
            Action::PrepareMultisig
        );

        formation.prepare(1).unwrap();
        let mut store = store;
        store.add(MessageType::KeySet, MessageDirection::Out, 1, vec![0]);
        store.add(MessageType::KeySet, MessageDirection::Out, 2, vec![0]);
        let bob = inbound(&mut store, MessageType::KeySet, 1);
        let carol = inbound(&mut store, MessageType::KeySet, 2);

        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), false),
            Action::MakeMultisig {
                key_sets: vec![bob, carol]
            }
        );
    }

    #[test]
    fn test_incomplete_key_sets_name_missing_signer() {
        let reg = complete_registry();
        let mut store = MessageStore::new();
        let mut formation = Formation::new();
        formation.prepare(1).unwrap();
        inbound(&mut store, MessageType::KeySet, 1);

        match next_step(&reg, &store, &formation, &idle(), false) {
            Action::NothingReady(reason) => {
                assert_eq!(reason.missing, vec![2]);
                assert!(reason.message.contains("Carol"));
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_signer_config_not_blocked_by_missing_key_sets() {
        let reg = complete_registry();
        let mut store = MessageStore::new();
        let mut formation = Formation::new();
        formation.prepare(1).unwrap();
        let config = inbound(&mut store, MessageType::SignerConfig, 0);

        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), false),
            Action::ProcessSignerConfig { config }
        );

        // Once it is processed the key set diagnostic comes back
        store.mark_processed(config).unwrap();
        match next_step(&reg, &store, &formation, &idle(), false) {
            Action::NothingReady(reason) => {
                assert_eq!(reason.missing, vec![1, 2]);
                assert!(reason.message.contains("key sets"));
            }
            other => panic!("unexpected {}", other),
        }

        // Same while key exchange rounds run
        formation.make(&reg).unwrap();
        let config = inbound(&mut store, MessageType::SignerConfig, 0);
        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), false),
            Action::ProcessSignerConfig { config }
        );
    }

    #[test]
    fn test_incomplete_signer_config() {
        let reg = registry();
        let store = MessageStore::new();
        match next_step(&reg, &store, &Formation::new(), &idle(), false) {
            Action::NothingReady(reason) => assert_eq!(reason.missing, vec![1, 2]),
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_exchange_waits_for_current_round() {
        let reg = complete_registry();
        let mut store = MessageStore::new();
        let mut formation = Formation::new();
        formation.prepare(2).unwrap();
        formation.make(&reg).unwrap();

        store.insert(
            NewMessage::new(MessageType::AdditionalKeySet, MessageDirection::In, 1, vec![])
                .in_round(2),
        );
        let bob = store
            .insert(
                NewMessage::new(MessageType::AdditionalKeySet, MessageDirection::In, 1, vec![])
                    .in_round(1),
            )
            .id;
        assert!(!next_step(&reg, &store, &formation, &idle(), false).is_ready());

        let carol = store
            .insert(
                NewMessage::new(MessageType::AdditionalKeySet, MessageDirection::In, 2, vec![])
                    .in_round(1),
            )
            .id;
        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), false),
            Action::ExchangeMultisigKeys {
                round: 1,
                key_sets: vec![bob, carol]
            }
        );
    }

    #[test]
    fn test_finalized_priorities() {
        let reg = complete_registry();
        let formation = finalized(&reg);
        let mut store = MessageStore::new();

        let own = inbound(&mut store, MessageType::PartiallySignedTx, 0);
        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), false),
            Action::SendTx {
                tx: own,
                candidates: vec![1, 2]
            }
        );

        let full = inbound(&mut store, MessageType::FullySignedTx, 0);
        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), false),
            Action::SubmitMultisig { tx: full }
        );

        let from_bob = inbound(&mut store, MessageType::PartiallySignedTx, 1);
        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), false),
            Action::SignMultisig { tx: from_bob }
        );
    }

    #[test]
    fn test_forced_sync() {
        let reg = complete_registry();
        let formation = finalized(&reg);
        let mut store = MessageStore::new();
        let bob = store
            .insert(
                NewMessage::new(MessageType::SyncData, MessageDirection::In, 1, vec![]).at_height(3),
            )
            .id;

        // Sync data the wallet does not expect is held back
        match next_step(&reg, &store, &formation, &idle(), false) {
            Action::NothingReady(reason) => assert!(reason.message.contains("mms next sync")),
            other => panic!("unexpected {}", other),
        }

        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), true),
            Action::ExportMultisigInfo
        );

        store.add(MessageType::SyncData, MessageDirection::Out, 1, vec![]);
        store.add(MessageType::SyncData, MessageDirection::Out, 2, vec![]);
        // Bob alone is enough for 2-of-3 when forced, at any height
        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), true),
            Action::ImportMultisigInfo {
                sync_data: vec![bob],
                forced: true
            }
        );
    }

    #[test]
    fn test_needed_sync_waits_for_everyone() {
        let reg = complete_registry();
        let formation = finalized(&reg);
        let mut store = MessageStore::new();
        let wallet = WalletSnapshot {
            height: 2,
            needs_sync: true,
        };

        assert_eq!(
            next_step(&reg, &store, &formation, &wallet, false),
            Action::ExportMultisigInfo
        );

        for signer in [1, 2] {
            store.insert(
                NewMessage::new(MessageType::SyncData, MessageDirection::Out, signer, vec![])
                    .at_height(2),
            );
        }
        // Stale data at an old height does not count
        store.insert(
            NewMessage::new(MessageType::SyncData, MessageDirection::In, 2, vec![]).at_height(1),
        );
        let bob = store
            .insert(
                NewMessage::new(MessageType::SyncData, MessageDirection::In, 1, vec![]).at_height(2),
            )
            .id;

        match next_step(&reg, &store, &formation, &wallet, false) {
            Action::NothingReady(reason) => assert_eq!(reason.missing, vec![2]),
            other => panic!("unexpected {}", other),
        }

        let carol = store
            .insert(
                NewMessage::new(MessageType::SyncData, MessageDirection::In, 2, vec![]).at_height(2),
            )
            .id;
        assert_eq!(
            next_step(&reg, &store, &formation, &wallet, false),
            Action::ImportMultisigInfo {
                sync_data: vec![bob, carol],
                forced: false
            }
        );
    }

    #[test]
    fn test_signer_config_processed_before_setup() {
        let reg = registry();
        let mut store = MessageStore::new();
        let config = inbound(&mut store, MessageType::SignerConfig, 0);
        assert_eq!(
            next_step(&reg, &store, &Formation::new(), &idle(), false),
            Action::ProcessSignerConfig { config }
        );
    }

    #[test]
    fn test_auto_config_data_from_all_pending_signers() {
        let mut reg = registry();
        let labels = vec!["Bob".to_string(), "Carol".to_string()];
        auto_config::start(&mut reg, &labels, &FormationState::None).unwrap();
        let mut store = MessageStore::new();

        let bob = inbound(&mut store, MessageType::AutoConfigData, 1);
        match next_step(&reg, &store, &Formation::new(), &idle(), false) {
            Action::NothingReady(reason) => {
                assert_eq!(reason.missing, vec![2]);
                assert!(reason.message.contains("Carol"));
            }
            other => panic!("unexpected {}", other),
        }

        let carol = inbound(&mut store, MessageType::AutoConfigData, 2);
        assert_eq!(
            next_step(&reg, &store, &Formation::new(), &idle(), false),
            Action::ProcessAutoConfigData {
                data: vec![bob, carol]
            }
        );
    }

    #[test]
    fn test_waiting_notes_hint() {
        let reg = complete_registry();
        let formation = finalized(&reg);
        let mut store = MessageStore::new();
        assert_eq!(
            next_step(&reg, &store, &formation, &idle(), false),
            nothing_ready(Vec::new(), "No messages waiting".to_string())
        );

        inbound(&mut store, MessageType::Note, 1);
        match next_step(&reg, &store, &formation, &idle(), false) {
            Action::NothingReady(reason) => assert!(reason.message.contains("mms note")),
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let reg = complete_registry();
        let mut store = MessageStore::new();
        let mut formation = Formation::new();
        formation.prepare(1).unwrap();
        inbound(&mut store, MessageType::KeySet, 2);

        let first = next_step(&reg, &store, &formation, &idle(), false);
        for _ in 0..5 {
            assert_eq!(next_step(&reg, &store, &formation, &idle(), false), first);
        }
    }
}
