//! MMS CLI Application
//!
//! Command-line interface for coordinating a multisig wallet with co-signers.

use clap::{Parser, Subcommand};
use mms_wallet::cli::{self, AppState, TransportConfig};
use mms_wallet::transport::file::DEFAULT_MAILBOX_DIR;
use mms_wallet::transport::RelayServer;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mms")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Multisig Messaging System for M-of-N wallet co-signers", long_about = None)]
struct Cli {
    /// Data directory for MMS state and the wallet
    #[arg(short, long, global = true, default_value = ".mms_data")]
    data_dir: PathBuf,

    /// Mailbox directory shared with co-signers
    #[arg(short, long, global = true, default_value = DEFAULT_MAILBOX_DIR)]
    mailbox: PathBuf,

    /// Relay server (host:port) to use instead of the mailbox
    #[arg(short, long, global = true)]
    relay: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a relay server
    Relay {
        /// Port to listen on
        #[arg(short, long, default_value = "18080")]
        port: u16,
    },

    #[command(flatten)]
    Mms(MmsCommand),
}

/// Commands working on the local wallet's MMS state
#[derive(Subcommand)]
enum MmsCommand {
    /// Set up MMS for an M/N multisig
    Init {
        /// Scheme like 2/3
        scheme: String,
        /// Own label
        label: String,
        /// Own transport address
        transport_address: String,
        /// Reinitialize, deleting all signers and messages
        #[arg(long)]
        yes: bool,
    },

    /// Display MMS status and the config checksum
    Info,

    /// List signers, or change one
    Signer {
        index: Option<u32>,
        label: Option<String>,
        transport_address: Option<String>,
        wallet_address: Option<String>,
    },

    /// List all messages
    List,

    /// Process the next step
    Next {
        /// "sync" forces processing of sync data
        #[arg(value_parser = ["sync"])]
        mode: Option<String>,

        /// Signer to send a partially signed transaction to
        #[arg(long)]
        to: Option<u32>,
    },

    /// Same as "next sync"
    Sync,

    /// Start a transfer from the multisig wallet
    Transfer {
        destination: String,
        amount: u64,
    },

    /// Delete a message, or "all"
    Delete { target: String },

    /// Send one message, or every ready one
    Send { id: Option<u32> },

    /// Fetch messages from the transport
    Receive,

    /// Write a message's content to a file in the data directory
    Export { id: u32 },

    /// Send a note to a signer, or read waiting notes
    Note {
        label: Option<String>,
        text: Vec<String>,
    },

    /// Show one message in detail
    Show { id: u32 },

    /// Show or change an option (auto-send)
    Set { name: String, value: Option<String> },

    /// Send the signer config to every other signer
    #[command(name = "send_signer_config", alias = "send-signer-config")]
    SendSignerConfig,

    /// Issue auto-config tokens to the other signers
    #[command(name = "start_auto_config", alias = "start-auto-config")]
    StartAutoConfig { labels: Vec<String> },

    /// Cancel a running auto-config
    #[command(name = "stop_auto_config", alias = "stop-auto-config")]
    StopAutoConfig,

    /// Join a multisig with a token from its manager
    #[command(name = "auto_config", alias = "auto-config")]
    AutoConfig { token: String },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        // The relay needs no wallet state
        Commands::Relay { port } => run_relay(port),
        Commands::Mms(command) => {
            let transport = match &cli.relay {
                Some(address) => TransportConfig::Relay(address.clone()),
                None => TransportConfig::Mailbox(cli.mailbox.clone()),
            };
            let mut state = AppState::new(cli.data_dir.clone(), &transport)?;
            run_command(&mut state, command)
        }
    }
}

fn run_command(state: &mut AppState, command: MmsCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        MmsCommand::Init {
            scheme,
            label,
            transport_address,
            yes,
        } => {
            cli::cmd_init(state, &scheme, &label, &transport_address, yes)?;
        }

        MmsCommand::Info => {
            cli::cmd_info(state)?;
        }

        MmsCommand::Signer {
            index,
            label,
            transport_address,
            wallet_address,
        } => {
            cli::cmd_signer(state, index, label, transport_address, wallet_address)?;
        }

        MmsCommand::List => {
            cli::cmd_list(state)?;
        }

        MmsCommand::Next { mode, to } => {
            cli::cmd_next(state, mode.is_some(), to)?;
        }

        MmsCommand::Sync => {
            cli::cmd_next(state, true, None)?;
        }

        MmsCommand::Transfer {
            destination,
            amount,
        } => {
            cli::cmd_transfer(state, &destination, amount)?;
        }

        MmsCommand::Delete { target } => {
            cli::cmd_delete(state, &target)?;
        }

        MmsCommand::Send { id } => {
            cli::cmd_send(state, id)?;
        }

        MmsCommand::Receive => {
            cli::cmd_receive(state)?;
        }

        MmsCommand::Export { id } => {
            cli::cmd_export(state, id)?;
        }

        MmsCommand::Note { label, text } => {
            cli::cmd_note(state, label.as_deref(), &text)?;
        }

        MmsCommand::Show { id } => {
            cli::cmd_show(state, id)?;
        }

        MmsCommand::Set { name, value } => {
            cli::cmd_set(state, &name, value.as_deref())?;
        }

        MmsCommand::SendSignerConfig => {
            cli::cmd_send_signer_config(state)?;
        }

        MmsCommand::StartAutoConfig { labels } => {
            cli::cmd_start_auto_config(state, &labels)?;
        }

        MmsCommand::StopAutoConfig => {
            cli::cmd_stop_auto_config(state)?;
        }

        MmsCommand::AutoConfig { token } => {
            cli::cmd_auto_config(state, &token)?;
        }
    }

    Ok(())
}

fn run_relay(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        println!("📡 Starting relay on port {}...", port);
        let server = RelayServer::bind(port).await?;

        // Handle Ctrl+C
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            println!("\n📴 Shutting down relay...");
            std::process::exit(0);
        });

        server.run().await
    })?;

    Ok(())
}
