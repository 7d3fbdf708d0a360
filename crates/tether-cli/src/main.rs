//! # Tether CLI
//!
//! Command line client for a Tether realtime gateway.
//!
//! ## Usage
//!
//! ```bash
//! # Print every message on two topics
//! tether --endpoint ws://localhost:8000/ --token "$TOKEN" listen /user/42 /broadcast
//!
//! # Publish a JSON payload
//! tether publish /room/1 '{"type":"hello"}'
//!
//! # Configure through the environment
//! TETHER_ENDPOINT=wss://gateway.example.com/ TETHER_CREDENTIAL=... tether listen
//! ```

mod commands;
mod config;
mod metrics;
mod opt;

use anyhow::Result;
use clap::Parser;
use opt::{Cli, Command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only messages
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_cli=info,tether_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = config::Config::load(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        config.endpoint = endpoint;
    }
    if let Some(token) = cli.token {
        config.credential = Some(token);
    }
    if cli.no_reconnect {
        config.reconnect.enabled = false;
    }

    tracing::info!(endpoint = %config.endpoint, "Starting Tether client");

    metrics::init(&config.metrics)?;

    match cli.command {
        Command::Listen { topics } => commands::listen(config, topics).await,
        Command::Publish { topic, payload } => commands::publish(config, topic, payload).await,
    }
}
