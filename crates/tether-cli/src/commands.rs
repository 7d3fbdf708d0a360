//! `listen` and `publish` commands.

use crate::config::Config;
use anyhow::{anyhow, bail, Context, Result};
use std::time::Duration;
use tether_client::{Client, ClientEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Subscribe to `topics` and print each message as `topic<TAB>payload`.
pub async fn listen(config: Config, topics: Vec<String>) -> Result<()> {
    let topics = if topics.is_empty() {
        config.topics.clone()
    } else {
        topics
    };
    if topics.is_empty() {
        bail!("No topics given and none configured");
    }

    let client = Client::websocket(config.client());
    if let Some(token) = &config.credential {
        client.set_credential(token.as_str());
    }

    for topic in &topics {
        let name = topic.clone();
        client
            .subscribe(topic, move |payload| {
                println!("{name}\t{payload}");
                Ok(())
            })
            .with_context(|| format!("Cannot subscribe to {topic}"))?;
    }

    let events = client.events();
    client.connect(config.endpoint()?)?;
    let log = tokio::spawn(log_events(events));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    client.disconnect().await;
    log.abort();
    Ok(())
}

/// Publish one payload and wait for it to be written.
pub async fn publish(config: Config, topic: String, payload: String) -> Result<()> {
    let client = Client::websocket(config.client());
    let mut events = client.events();
    client.connect(config.endpoint()?)?;

    tokio::time::timeout(CONNECT_TIMEOUT, wait_connected(&mut events))
        .await
        .map_err(|_| anyhow!("Timed out connecting to {}", config.endpoint))??;

    if let Some(token) = &config.credential {
        client
            .authenticate(token.as_str())
            .await
            .context("Authentication failed")?;
    }

    let published = match serde_json::from_str::<serde_json::Value>(&payload) {
        Ok(json) => client.publish(&topic, &json).await,
        Err(_) => {
            debug!("Payload is not JSON, publishing as text");
            client.publish_text(&topic, payload).await
        }
    };
    published.with_context(|| format!("Failed to publish to {topic}"))?;

    info!(topic = %topic, "Published");
    client.disconnect().await;
    Ok(())
}

async fn wait_connected(events: &mut broadcast::Receiver<ClientEvent>) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(ClientEvent::Connected { .. }) => return Ok(()),
            Ok(ClientEvent::ConnectFailed { error }) => warn!(error = %error, "Connect failed"),
            Ok(ClientEvent::Stopped) => bail!("Gave up connecting"),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => bail!("Client dropped"),
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::Connected { connection }) => info!(connection = %connection, "Connected"),
            Ok(ClientEvent::ConnectFailed { error }) => warn!(error = %error, "Connect failed"),
            Ok(ClientEvent::Disconnected { reason }) => {
                warn!(reason = reason.as_deref().unwrap_or("closed"), "Disconnected");
            }
            Ok(ClientEvent::Reconnecting { attempt, delay }) => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            }
            Ok(ClientEvent::Authenticated) => info!("Authenticated"),
            Ok(ClientEvent::AuthenticationFailed { reason }) => {
                warn!(reason = %reason, "Authentication failed");
            }
            Ok(ClientEvent::SubscribeRejected { topic, reason }) => {
                warn!(topic = %topic, reason = %reason, "Subscription rejected");
            }
            Ok(ClientEvent::Stopped) => {
                warn!("Connection driver stopped; press Ctrl-C to exit");
            }
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "Missed lifecycle events"),
            Err(RecvError::Closed) => break,
        }
    }
}
