use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "chatline",
    about = "Chat message delivery worker",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one change-stream batch through the pipeline
    Process(ProcessArgs),
    /// Register a connection
    Connect(ConnectArgs),
    /// Remove a connection
    Disconnect(DisconnectArgs),
    /// Associate a connection with a channel
    Join(JoinArgs),
    /// Store a message in a channel
    Send(SendArgs),
    /// Show a channel's messages, oldest first
    History(HistoryArgs),
    /// Drop expired idempotency records and compact the table logs
    Purge,
}

#[derive(Args)]
pub struct ProcessArgs {
    /// Batch file: `{"Records": [...]}` or a bare array
    pub batch: PathBuf,
}

#[derive(Args)]
pub struct ConnectArgs {
    pub connection_id: String,
    #[arg(long)]
    pub channel: Option<String>,
}

#[derive(Args)]
pub struct DisconnectArgs {
    pub connection_id: String,
}

#[derive(Args)]
pub struct JoinArgs {
    pub connection_id: String,
    pub channel: String,
}

#[derive(Args)]
pub struct SendArgs {
    pub channel: String,
    pub content: String,
    #[arg(long)]
    pub sender: String,
    /// Client message id; generated when omitted
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args)]
pub struct HistoryArgs {
    pub channel: String,
}
