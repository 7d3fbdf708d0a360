use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line client for a Tether realtime gateway.
#[derive(Debug, Parser)]
#[command(name = "tether", version, about, long_about = None)]
pub struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Gateway URL, e.g. `wss://gateway.example.com/realtime`.
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Bearer token to authenticate with.
    #[arg(short, long)]
    pub token: Option<String>,

    /// Do not reconnect after the connection drops.
    #[arg(long)]
    pub no_reconnect: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Subscribe to topics and print every message until interrupted.
    Listen {
        /// Topics to subscribe to. Defaults to the configured topics.
        topics: Vec<String>,
    },
    /// Publish one payload on a topic. Payloads that parse as JSON are sent as JSON.
    Publish {
        /// Target topic.
        topic: String,
        /// Payload text.
        payload: String,
    },
}
