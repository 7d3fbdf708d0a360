//! Connection driver.
//!
//! One task per [`Client::connect`](crate::Client::connect) owns the socket.
//! It writes queued frames, applies inbound frames in arrival order and
//! reconnects with backoff when the connection is lost.

use crate::client::ClientInner;
use crate::event::ClientEvent;
use crate::metrics;
use crate::reconnect::Backoff;
use std::sync::Arc;
use std::time::Duration;
use tether_protocol::Frame;
use tether_transport::{Connection, Endpoint, TransportError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Work queued for the driver by the client API.
pub(crate) enum Command {
    /// Write a frame. `done` receives the write result.
    Send {
        frame: Frame,
        done: Option<oneshot::Sender<Result<(), TransportError>>>,
    },
    /// Close the connection and stop.
    Disconnect,
}

/// Why a session ended.
#[derive(Debug)]
enum SessionEnd {
    Requested,
    Closed,
    Lost(String),
}

impl SessionEnd {
    fn reason(&self) -> Option<String> {
        match self {
            SessionEnd::Requested => Some("disconnect requested".to_string()),
            SessionEnd::Closed => None,
            SessionEnd::Lost(reason) => Some(reason.clone()),
        }
    }
}

fn reject(done: Option<oneshot::Sender<Result<(), TransportError>>>) {
    if let Some(done) = done {
        let _ = done.send(Err(TransportError::ConnectionClosed));
    }
}

pub(crate) async fn run(
    inner: Arc<ClientInner>,
    endpoint: Endpoint,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut backoff = Backoff::new(inner.config.reconnect.clone());
    let connector = Arc::clone(&inner.connector);

    loop {
        let attempt = tokio::select! {
            result = connector.connect(&endpoint) => result,
            () = until_disconnect(&mut commands) => {
                debug!(endpoint = %endpoint, "Connect abandoned");
                break;
            }
        };

        match attempt {
            Ok(connection) => {
                backoff.reset();
                let end = run_session(&inner, connection, &mut commands).await;
                let stop = matches!(end, SessionEnd::Requested);
                inner.on_disconnected(end.reason());
                if stop {
                    break;
                }
            }
            Err(e) => {
                warn!(endpoint = %endpoint, error = %e, "Failed to connect to gateway");
                inner.emit(ClientEvent::ConnectFailed {
                    error: e.to_string(),
                });
            }
        }

        let Some(delay) = backoff.next_delay() else {
            info!(endpoint = %endpoint, "Not reconnecting");
            break;
        };

        metrics::record_reconnect();
        debug!(
            attempt = backoff.attempt(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        inner.emit(ClientEvent::Reconnecting {
            attempt: backoff.attempt(),
            delay,
        });

        if !wait_for_retry(delay, &mut commands).await {
            break;
        }
    }

    inner.on_driver_stopped();
}

/// Fail queued frames until a disconnect is requested.
async fn until_disconnect(commands: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match commands.recv().await {
            Some(Command::Send { done, .. }) => reject(done),
            Some(Command::Disconnect) | None => return,
        }
    }
}

/// Sleep until the next attempt, failing any frames queued meanwhile.
///
/// Returns `false` if a disconnect was requested.
async fn wait_for_retry(delay: Duration, commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = until_disconnect(commands) => false,
    }
}

/// Fail frames queued for a previous connection.
///
/// Returns `true` if a disconnect was requested.
fn drain_stale(commands: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    while let Ok(command) = commands.try_recv() {
        match command {
            Command::Send { done, .. } => reject(done),
            Command::Disconnect => return true,
        }
    }
    false
}

async fn run_session(
    inner: &Arc<ClientInner>,
    connection: Connection,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd {
    let Connection {
        id,
        mut sink,
        mut source,
    } = connection;

    if drain_stale(commands) {
        let _ = sink.close().await;
        return SessionEnd::Requested;
    }

    inner.on_connected(&id);

    match inner.credential() {
        Some(credential) => {
            debug!(connection = %id, "Presenting stored credential");
            if let Err(e) = sink.send(&Frame::authenticate(credential.expose())).await {
                return SessionEnd::Lost(e.to_string());
            }
        }
        None => inner.open_pending(),
    }

    let end = loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send { frame, done }) => {
                    let result = sink.send(&frame).await;
                    let lost = match &result {
                        Err(e) if !e.is_recoverable() => Some(e.to_string()),
                        _ => None,
                    };
                    match done {
                        Some(done) => {
                            let _ = done.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                warn!(connection = %id, kind = %frame.kind(), error = %e, "Failed to send frame");
                            }
                        }
                    }
                    if let Some(reason) = lost {
                        break SessionEnd::Lost(reason);
                    }
                }
                Some(Command::Disconnect) | None => break SessionEnd::Requested,
            },
            inbound = source.recv() => match inbound {
                Ok(Some(frame)) => {
                    if let Some(reply) = inner.handle_frame(frame) {
                        if let Err(e) = sink.send(&reply).await {
                            if !e.is_recoverable() {
                                break SessionEnd::Lost(e.to_string());
                            }
                        }
                    }
                }
                Ok(None) => break SessionEnd::Closed,
                Err(e) if e.is_recoverable() => {
                    warn!(connection = %id, error = %e, "Dropping malformed frame");
                }
                Err(e) => break SessionEnd::Lost(e.to_string()),
            },
        }
    };

    if let Err(e) = sink.close().await {
        debug!(connection = %id, error = %e, "Error while closing connection");
    }
    end
}
