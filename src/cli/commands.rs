//! CLI commands for the MMS
//!
//! Implements all command handlers for the `mms` CLI.

use crate::mms::{
    processing, AutoConfigState, ExecuteOptions, Message, MessageFilter, MmsContext, MmsError,
    Outcome, SignerUpdate,
};
use crate::storage::{Storage, StorageConfig};
use crate::transport::{FileTransport, RelayTransport, Transport};
use crate::wallet::{LocalWallet, MultisigBackend};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Where envelopes go
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// Drop-box directory shared by co-signers on one machine
    Mailbox(PathBuf),
    /// Relay server at host:port
    Relay(String),
}

impl TransportConfig {
    pub fn open(&self) -> CliResult<Box<dyn Transport>> {
        Ok(match self {
            TransportConfig::Mailbox(dir) => Box::new(FileTransport::new(dir)?),
            TransportConfig::Relay(address) => Box::new(RelayTransport::new(address)?),
        })
    }
}

/// Application state
pub struct AppState {
    pub context: MmsContext,
    pub wallet: LocalWallet,
    pub storage: Storage,
    pub transport: Box<dyn Transport>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize application state
    pub fn new(data_dir: PathBuf, transport: &TransportConfig) -> CliResult<Self> {
        let storage_config = StorageConfig {
            data_dir: data_dir.clone(),
            ..Default::default()
        };
        let storage = Storage::new(storage_config)?;

        // Load or create wallet
        let wallet = if storage.wallet_exists() {
            storage.load_wallet()?
        } else {
            let wallet = LocalWallet::new(None);
            storage.save_wallet(&wallet)?;
            println!("🔐 New wallet created: {}", wallet.address());
            wallet
        };

        let context = storage.load_or_default()?;

        Ok(Self {
            context,
            wallet,
            storage,
            transport: transport.open()?,
            data_dir,
        })
    }

    /// Save the current state
    pub fn save(&self) -> CliResult<()> {
        self.storage.save(&self.context)?;
        self.storage.save_wallet(&self.wallet)?;
        Ok(())
    }

    /// Save newly queued messages, send them if auto-send is on and save
    /// again, so a transport failure loses neither queued nor sent state
    fn save_and_send(&mut self) -> CliResult<()> {
        self.save()?;
        let result = self
            .context
            .auto_send(self.transport.as_ref(), &self.wallet);
        self.save()?;
        let sent = result?;
        if !sent.is_empty() {
            println!("📤 Auto-sent {} message(s)", sent.len());
        }
        Ok(())
    }
}

/// Rough age of a timestamp, like "5 minutes ago"
pub fn ago(time: DateTime<Utc>) -> String {
    let seconds = (Utc::now() - time).num_seconds().max(0);
    let (amount, unit) = match seconds {
        0..=59 => (seconds, "second"),
        60..=3599 => (seconds / 60, "minute"),
        3600..=86399 => (seconds / 3600, "hour"),
        _ => (seconds / 86400, "day"),
    };
    format!("{} {}{} ago", amount, unit, if amount == 1 { "" } else { "s" })
}

fn signer_name(context: &MmsContext, index: u32) -> String {
    match context.registry() {
        Ok(registry) => registry.describe(&[index]),
        Err(_) => index.to_string(),
    }
}

fn print_message_line(context: &MmsContext, m: &Message) {
    let sent = m.sent_at.map(ago).unwrap_or_else(|| "-".to_string());
    println!(
        "   {:>4}  {:<20} {:<3} {:<14} {:<12} h{:<4} r{:<2} {} / sent {}",
        m.id,
        m.message_type.label(),
        m.direction.to_string(),
        m.state.to_string(),
        signer_name(context, m.signer_index),
        m.wallet_height,
        m.round,
        ago(m.created_at),
        sent
    );
}

/// Set up MMS for an M/N multisig
pub fn cmd_init(
    state: &mut AppState,
    scheme: &str,
    label: &str,
    transport_address: &str,
    confirm: bool,
) -> CliResult<()> {
    let (threshold, total) = crate::mms::context::parse_scheme(scheme)?;
    let wallet_address = state.wallet.address();

    match state.context.init(
        threshold,
        total,
        label,
        transport_address,
        &wallet_address,
        confirm,
    ) {
        Err(MmsError::AlreadyInitialized) => {
            println!("⚠️  MMS is already initialized");
            println!("   Use --yes to reinitialize (this deletes all signers and messages)");
            return Ok(());
        }
        other => other?,
    }
    state.wallet.label = Some(label.to_string());
    state.save()?;

    println!("✅ MMS initialized for {}/{} multisig", threshold, total);
    println!("   🏷️  Label: {}", label);
    println!("   📮 Transport address: {}", transport_address);
    println!("   📍 Wallet address: {}", wallet_address);
    println!("\n   Next: set up the other signers with 'mms signer' or 'mms start_auto_config'");
    Ok(())
}

/// Display MMS status
pub fn cmd_info(state: &AppState) -> CliResult<()> {
    let registry = state.context.registry()?;
    let snapshot = state.wallet.snapshot();
    let stats = state.storage.stats()?;

    println!("📨 MMS Info");
    println!("   ├─ Scheme: {}", registry.scheme());
    println!("   ├─ Formation: {}", state.context.formation().state());
    println!("   ├─ Wallet address: {}", state.wallet.address());
    if let Some(address) = state.wallet.multisig_address() {
        println!("   ├─ Multisig address: {}", address);
    }
    println!("   ├─ Transfers: {}", snapshot.height);
    println!("   ├─ Needs sync: {}", snapshot.needs_sync);
    println!("   ├─ Messages: {}", state.context.store().len());
    println!("   ├─ Auto-send: {}", state.context.options.get("auto-send")?);
    println!("   ├─ Backups: {}", stats.backup_count);
    println!("   └─ Config checksum: {}", registry.config_checksum());
    Ok(())
}

/// List or change signers
pub fn cmd_signer(
    state: &mut AppState,
    index: Option<u32>,
    label: Option<String>,
    transport_address: Option<String>,
    wallet_address: Option<String>,
) -> CliResult<()> {
    if let Some(index) = index {
        state.context.set_signer(
            index,
            SignerUpdate {
                label,
                transport_address,
                wallet_address,
            },
        )?;
        state.save()?;
    }

    let registry = state.context.registry()?;
    println!("👥 Signers ({})", registry.scheme());
    for signer in registry.list() {
        println!(
            "   {} {}{}",
            signer.index,
            signer.display_label(),
            if signer.is_self { " (me)" } else { "" }
        );
        println!(
            "      📮 {}",
            signer.transport_address.as_deref().unwrap_or("<missing>")
        );
        println!(
            "      📍 {}",
            signer.wallet_address.as_deref().unwrap_or("<missing>")
        );
        if signer.auto_config != AutoConfigState::Idle {
            println!("      🔧 auto-config: {}", signer.auto_config);
        }
        if let Some(token) = &signer.auto_config_token {
            if !signer.is_self {
                println!("      🎟️  token: {}", token);
            }
        }
    }
    Ok(())
}

/// List all messages
pub fn cmd_list(state: &AppState) -> CliResult<()> {
    state.context.registry()?;
    let store = state.context.store();

    if store.is_empty() {
        println!("📭 No messages");
        return Ok(());
    }

    println!("📋 Messages:");
    for m in store.list(MessageFilter::new()) {
        print_message_line(&state.context, m);
    }
    Ok(())
}

fn print_outcome(state: &AppState, outcome: &Outcome) {
    match outcome {
        Outcome::Done {
            action,
            created,
            detail,
        } => {
            println!("✅ {}", action);
            if let Some(detail) = detail {
                println!("   {}", detail);
            }
            for id in created {
                if let Ok(m) = state.context.store().get(*id) {
                    print_message_line(&state.context, m);
                }
            }
        }
        Outcome::ConfirmationRequired { tx, candidates } => {
            println!("❓ Transaction {} can go to several signers:", tx);
            for index in candidates {
                println!("   {} {}", index, signer_name(&state.context, *index));
            }
            println!("   Choose one with 'mms next --to <index>'");
        }
        Outcome::NothingReady(reason) => {
            println!("⏳ {}", reason.message);
        }
    }
}

/// Process the next step
pub fn cmd_next(state: &mut AppState, force_sync: bool, send_to: Option<u32>) -> CliResult<()> {
    if force_sync {
        println!("⚠️  Forcing sync processing");
    }
    let outcome = processing::run_next_step(
        &mut state.context,
        &mut state.wallet,
        state.transport.as_ref(),
        force_sync,
        &ExecuteOptions { send_to },
    );
    // Whatever happened before an error is kept
    state.save()?;
    print_outcome(state, &outcome?);
    Ok(())
}

/// Start a transfer from the multisig wallet
pub fn cmd_transfer(state: &mut AppState, destination: &str, amount: u64) -> CliResult<()> {
    let created = processing::transfer(&mut state.context, &mut state.wallet, destination, amount)?;
    state.save()?;

    println!("📤 Transaction created:");
    println!("   To: {}", destination);
    println!("   Amount: {} coins", amount);
    for id in &created {
        println!("   Stored as message {}", id);
    }
    println!("\n   Use 'mms next' to send it to a co-signer");
    Ok(())
}

/// Delete one message or all
pub fn cmd_delete(state: &mut AppState, target: &str) -> CliResult<()> {
    state.context.registry()?;
    if target == "all" {
        let removed = state.context.delete_all_messages(state.transport.as_ref());
        state.save()?;
        println!("🗑️  Deleted {} message(s)", removed);
        return Ok(());
    }

    let id: u32 = target
        .parse()
        .map_err(|_| format!("Invalid message id '{}'", target))?;
    state.context.delete_message(id, state.transport.as_ref())?;
    state.save()?;
    println!("🗑️  Deleted message {}", id);
    Ok(())
}

/// Send one message or every ready one
pub fn cmd_send(state: &mut AppState, id: Option<u32>) -> CliResult<()> {
    let result = match id {
        Some(id) => state
            .context
            .send(id, state.transport.as_ref(), &state.wallet)
            .map(|_| vec![id]),
        None => state.context.send_all(state.transport.as_ref(), &state.wallet),
    };
    state.save()?;

    let sent = result?;
    if sent.is_empty() {
        println!("📭 Nothing to send");
    } else {
        println!("📤 Sent {} message(s)", sent.len());
    }
    Ok(())
}

/// Fetch messages from the transport
pub fn cmd_receive(state: &mut AppState) -> CliResult<()> {
    let report = state.context.receive(state.transport.as_ref())?;
    state.save()?;

    println!("📥 Received {} new message(s)", report.received.len());
    for id in &report.received {
        if let Ok(m) = state.context.store().get(*id) {
            print_message_line(&state.context, m);
        }
    }
    if report.duplicates > 0 {
        println!("   {} already known", report.duplicates);
    }
    for reason in &report.rejected {
        println!("   ❌ Rejected {}", reason);
    }
    Ok(())
}

/// Write message content to a file
pub fn cmd_export(state: &AppState, id: u32) -> CliResult<()> {
    state.context.registry()?;
    let message = state.context.store().get(id)?;
    let name = format!(
        "mms_message_{}_{}",
        id,
        message.message_type.label().replace(' ', "_")
    );
    let path = state.storage.export(&name, &message.content)?;
    println!("📦 Message {} exported to {:?}", id, path);
    Ok(())
}

/// Send a note, or read waiting notes
pub fn cmd_note(state: &mut AppState, to: Option<&str>, text: &[String]) -> CliResult<()> {
    match to {
        Some(to) => {
            if text.is_empty() {
                return Err("Note text missing".into());
            }
            let id = state.context.add_note(to, &text.join(" "))?;
            state.save_and_send()?;
            println!("📝 Note queued as message {}", id);
        }
        None => {
            let notes = state.context.read_notes(state.transport.as_ref())?;
            state.save()?;
            if notes.is_empty() {
                println!("📭 No notes");
            }
            for (from, text) in notes {
                println!("📝 From {}: {}", signer_name(&state.context, from), text);
            }
        }
    }
    Ok(())
}

/// Show one message in detail
pub fn cmd_show(state: &AppState, id: u32) -> CliResult<()> {
    state.context.registry()?;
    let m = state.context.store().get(id)?;

    println!("🔍 Message {}", m.id);
    println!("   ├─ Type: {}", m.message_type.label());
    println!("   ├─ Direction: {}", m.direction);
    println!("   ├─ State: {}", m.state);
    println!("   ├─ Signer: {}", signer_name(&state.context, m.signer_index));
    println!("   ├─ Wallet height: {}", m.wallet_height);
    println!("   ├─ Round: {}", m.round);
    println!("   ├─ Created: {} ({})", m.created_at, ago(m.created_at));
    if let Some(sent) = m.sent_at {
        println!("   ├─ Sent: {} ({})", sent, ago(sent));
    }
    if let Some(hash) = &m.hash {
        println!("   ├─ Hash: {}", hash);
    }
    if let Some(transport_id) = &m.transport_id {
        println!("   ├─ Transport id: {}", transport_id);
    }
    let preview = hex::encode(&m.content[..m.content.len().min(32)]);
    println!(
        "   └─ Content: {} bytes, {}{}",
        m.content.len(),
        preview,
        if m.content.len() > 32 { "..." } else { "" }
    );
    Ok(())
}

/// Show or change an option
pub fn cmd_set(state: &mut AppState, name: &str, value: Option<&str>) -> CliResult<()> {
    state.context.registry()?;
    if let Some(value) = value {
        state.context.options.set(name, value)?;
        state.save()?;
    }
    println!("⚙️  {} = {}", name, state.context.options.get(name)?);
    Ok(())
}

/// Send the full signer config to every other signer
pub fn cmd_send_signer_config(state: &mut AppState) -> CliResult<()> {
    let created = state.context.send_signer_config()?;
    state.save_and_send()?;
    println!("📋 Signer config queued for {} signer(s)", created.len());
    Ok(())
}

/// Issue auto-config tokens
pub fn cmd_start_auto_config(state: &mut AppState, labels: &[String]) -> CliResult<()> {
    let tokens = state.context.start_auto_config(labels)?;
    state.save()?;

    println!("🎟️  Auto-config started. Give each signer their token:");
    for (index, token) in tokens {
        println!("   {} {}", signer_name(&state.context, index), token);
    }
    println!("\n   Then run 'mms receive' and 'mms next' once they answered");
    Ok(())
}

/// Cancel a running auto-config
pub fn cmd_stop_auto_config(state: &mut AppState) -> CliResult<()> {
    state.context.stop_auto_config()?;
    state.save()?;
    println!("🛑 Auto-config stopped, all tokens discarded");
    Ok(())
}

/// Join a multisig with a token
pub fn cmd_auto_config(state: &mut AppState, token: &str) -> CliResult<()> {
    let id = state.context.auto_config(token)?;
    state.save_and_send()?;
    println!("🔧 Auto-config data queued as message {}", id);
    println!("   Send it with 'mms send', then wait for the signer config");
    Ok(())
}
