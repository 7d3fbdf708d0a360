//! The client: one gateway connection shared by every topic subscription.

use crate::channel::ChannelState;
use crate::config::ClientConfig;
use crate::dispatch::HandlerResult;
use crate::driver::{self, Command};
use crate::error::ClientError;
use crate::event::ClientEvent;
use crate::handle::HandleId;
use crate::metrics;
use crate::registry::{Registry, RegistryStats};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tether_protocol::{validate_topic, Frame, Payload};
use tether_transport::{ConnectionId, Connector, Endpoint};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// A bearer credential handed to the client by its caller.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a bearer token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl From<String> for Credential {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Credential {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Authenticated pub/sub client.
///
/// Cloning is cheap; every clone drives the same connection and registry.
///
/// ```rust,no_run
/// use tether_client::{Client, ClientConfig, Endpoint};
///
/// # async fn run() -> Result<(), tether_client::ClientError> {
/// let client = Client::websocket(ClientConfig::default());
/// client.connect(Endpoint::new("gateway.local", 8000))?;
///
/// let handle = client.subscribe("/user/42", |payload| {
///     println!("{payload}");
///     Ok(())
/// })?;
///
/// client.authenticate("token").await?;
/// client.unsubscribe(handle);
/// client.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    pub(crate) registry: Registry,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) config: ClientConfig,
    connected: AtomicBool,
    authenticated: AtomicBool,
    credential: RwLock<Option<Credential>>,
    pending_auth: Mutex<Option<oneshot::Sender<Result<(), String>>>>,
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    endpoint: RwLock<Option<Endpoint>>,
    events: broadcast::Sender<ClientEvent>,
}

impl Client {
    /// Create a client that dials through `connector`.
    #[must_use]
    pub fn new(connector: impl Connector + 'static, config: ClientConfig) -> Self {
        Self::with_connector(Arc::new(connector), config)
    }

    /// Create a client from a shared connector.
    #[must_use]
    pub fn with_connector(connector: Arc<dyn Connector>, config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(ClientInner {
                registry: Registry::new(),
                connector,
                config,
                connected: AtomicBool::new(false),
                authenticated: AtomicBool::new(false),
                credential: RwLock::new(None),
                pending_auth: Mutex::new(None),
                commands: Mutex::new(None),
                driver: Mutex::new(None),
                endpoint: RwLock::new(None),
                events,
            }),
        }
    }

    /// Create a client that dials over WebSocket.
    #[cfg(feature = "websocket")]
    #[must_use]
    pub fn websocket(config: ClientConfig) -> Self {
        Self::new(tether_transport::WebSocketConnector::default(), config)
    }

    /// Start connecting to `endpoint` and return immediately.
    ///
    /// Connection progress is reported through [`Client::events`]. The
    /// driver keeps reconnecting according to the reconnect policy until
    /// [`Client::disconnect`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if a driver is already running or no Tokio runtime
    /// is available.
    pub fn connect(&self, endpoint: Endpoint) -> Result<(), ClientError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut driver = lock(&self.inner.driver);
        if driver.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(ClientError::AlreadyConnected);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.inner.commands) = Some(tx);
        *self
            .inner
            .endpoint
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(endpoint.clone());

        info!(
            endpoint = %endpoint,
            transport = self.inner.connector.name(),
            "Connecting to gateway"
        );
        *driver = Some(runtime.spawn(driver::run(Arc::clone(&self.inner), endpoint, rx)));

        Ok(())
    }

    /// Close the connection and stop reconnecting.
    ///
    /// Tracked topics are kept; a later [`Client::connect`] followed by
    /// authentication reopens them.
    pub async fn disconnect(&self) {
        let commands = lock(&self.inner.commands).clone();
        if let Some(commands) = commands {
            let _ = commands.send(Command::Disconnect);
        }

        let driver = lock(&self.inner.driver).take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                warn!(error = %e, "Connection driver ended abnormally");
            }
        }
    }

    /// Whether the transport is currently connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Whether the gateway accepted the current credential on this connection.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::SeqCst)
    }

    /// Whether a credential is held for (re)authentication.
    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.inner.credential().is_some()
    }

    /// The endpoint passed to the last [`Client::connect`].
    #[must_use]
    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner
            .endpoint
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Present `credential` to the gateway.
    ///
    /// On success every tracked topic is reopened. The credential is kept
    /// whatever the outcome and presented again on every reconnect until
    /// [`Client::deauthenticate`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Authentication`] if the gateway rejects the
    /// credential, [`ClientError::NotConnected`] if there is no connection,
    /// or [`ClientError::Interrupted`] if the connection drops first.
    pub async fn authenticate(&self, credential: impl Into<Credential>) -> Result<(), ClientError> {
        let credential = credential.into();
        self.set_credential(credential.clone());

        if !self.is_connected() {
            debug!("Not connected; credential kept for the next connect");
            return Err(ClientError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        if lock(&self.inner.pending_auth).replace(tx).is_some() {
            debug!("Superseding pending authentication");
        }
        self.inner.send(Frame::authenticate(credential.expose()))?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(ClientError::Authentication(reason)),
            Err(_) => Err(ClientError::Interrupted),
        }
    }

    /// Store a credential without presenting it.
    ///
    /// It is presented on the next connect.
    pub fn set_credential(&self, credential: impl Into<Credential>) {
        *self
            .inner
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(credential.into());
    }

    /// Drop the credential, close every channel and empty the registry.
    ///
    /// Existing handles are orphaned; callers must subscribe again.
    pub fn deauthenticate(&self) {
        *self
            .inner
            .credential
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.inner.authenticated.store(false, Ordering::SeqCst);
        drop(lock(&self.inner.pending_auth).take());

        let live = self.inner.registry.clear();
        if self.is_connected() {
            for topic in &live {
                if let Err(e) = self.inner.send(Frame::unsubscribe(topic.as_str())) {
                    debug!(topic = %topic, error = %e, "Could not send unsubscribe");
                }
            }
            if let Err(e) = self.inner.send(Frame::Deauthenticate) {
                debug!(error = %e, "Could not send deauthenticate");
            }
        }

        info!(closed = live.len(), "Deauthenticated");
    }

    /// Register `handler` for messages on `topic`.
    ///
    /// The first handler for a topic opens its channel; the subscribe
    /// handshake completes in the background. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic name is invalid.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<HandleId, ClientError>
    where
        F: Fn(&Payload) -> HandlerResult + Send + Sync + 'static,
    {
        let registration = self.inner.registry.subscribe(topic, Arc::new(handler))?;

        if registration.created && self.is_connected() {
            self.inner.open_channel(topic);
        }

        Ok(registration.handle)
    }

    /// Remove a handler. Unknown or already removed handles are ignored.
    ///
    /// Removing the last handler of a topic closes its channel.
    pub fn unsubscribe(&self, handle: HandleId) {
        let Some(removal) = self.inner.registry.unsubscribe(handle) else {
            trace!(handle = %handle, "Ignoring unsubscribe for unknown handle");
            return;
        };

        if removal.closed && removal.previous.is_live() && self.is_connected() {
            if let Err(e) = self.inner.send(Frame::unsubscribe(removal.topic.as_str())) {
                debug!(topic = %removal.topic, error = %e, "Could not send unsubscribe");
            }
        }
    }

    /// Serialize `payload` as JSON and publish it on `topic`.
    ///
    /// No subscription to `topic` is required. Completes once the frame has
    /// been written to the socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid, the payload cannot be
    /// serialized, or the transport is not connected.
    pub async fn publish<T>(&self, topic: &str, payload: &T) -> Result<(), ClientError>
    where
        T: Serialize + ?Sized,
    {
        validate_topic(topic).map_err(ClientError::InvalidTopic)?;
        let text = serde_json::to_string(payload)?;
        self.publish_text(topic, text).await
    }

    /// Publish pre-encoded text on `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is invalid or the transport is not
    /// connected.
    pub async fn publish_text(&self, topic: &str, text: impl Into<String>) -> Result<(), ClientError> {
        validate_topic(topic).map_err(ClientError::InvalidTopic)?;
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let (done, written) = oneshot::channel();
        self.inner.submit(Command::Send {
            frame: Frame::publish(topic, text),
            done: Some(done),
        })?;

        written
            .await
            .map_err(|_| ClientError::NotConnected)?
            .map_err(ClientError::from)
    }

    /// State of a topic's channel, if the topic is tracked.
    #[must_use]
    pub fn state(&self, topic: &str) -> Option<ChannelState> {
        self.inner.registry.state(topic)
    }

    /// Names of all tracked topics.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.inner.registry.topics()
    }

    /// Number of handlers registered for `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.registry.subscriber_count(topic)
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.inner.registry.stats()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.is_connected())
            .field("authenticated", &self.is_authenticated())
            .field("topics", &self.inner.registry.stats().topic_count)
            .finish()
    }
}

impl ClientInner {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn credential(&self) -> Option<Credential> {
        self.credential
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn submit(&self, command: Command) -> Result<(), ClientError> {
        let commands = lock(&self.commands);
        let commands = commands.as_ref().ok_or(ClientError::NotConnected)?;
        commands.send(command).map_err(|_| ClientError::NotConnected)
    }

    /// Queue a frame for the driver without waiting for the write.
    pub(crate) fn send(&self, frame: Frame) -> Result<(), ClientError> {
        self.submit(Command::Send { frame, done: None })
    }

    fn open_channel(&self, topic: &str) {
        // With a credential pending, the replay on `Authenticated` opens it.
        if self.credential().is_some() && !self.authenticated.load(Ordering::SeqCst) {
            trace!(topic = %topic, "Deferring subscribe until authenticated");
            return;
        }
        if !self.registry.claim_open(topic) {
            return;
        }
        if let Err(e) = self.send(Frame::subscribe(topic)) {
            debug!(topic = %topic, error = %e, "Could not send subscribe");
        }
    }

    pub(crate) fn on_connected(&self, connection: &ConnectionId) {
        self.connected.store(true, Ordering::SeqCst);
        metrics::record_connected();
        info!(connection = %connection, "Connected to gateway");
        self.emit(ClientEvent::Connected {
            connection: connection.to_string(),
        });
    }

    pub(crate) fn on_disconnected(&self, reason: Option<String>) {
        self.connected.store(false, Ordering::SeqCst);
        self.authenticated.store(false, Ordering::SeqCst);
        drop(lock(&self.pending_auth).take());

        let suspended = self.registry.suspend_all();
        metrics::record_disconnected();
        info!(
            reason = reason.as_deref().unwrap_or("closed"),
            suspended,
            "Disconnected from gateway"
        );
        self.emit(ClientEvent::Disconnected { reason });
    }

    pub(crate) fn on_driver_stopped(&self) {
        *lock(&self.commands) = None;
        self.connected.store(false, Ordering::SeqCst);
        debug!("Connection driver stopped");
        self.emit(ClientEvent::Stopped);
    }

    /// Apply one inbound frame. Returns a frame to send back, if any.
    pub(crate) fn handle_frame(&self, frame: Frame) -> Option<Frame> {
        match frame {
            Frame::Message { topic, payload } => {
                metrics::record_message_received();
                if !self.registry.deliver(&topic, payload) {
                    trace!(topic = %topic, "Dropping message for a topic that is not open");
                }
                None
            }
            Frame::Subscribed { topic } => {
                if self.registry.acknowledge(&topic) {
                    debug!(topic = %topic, "Channel open");
                }
                None
            }
            Frame::SubscribeRejected { topic, reason } => {
                warn!(topic = %topic, reason = %reason, "Gateway rejected subscription");
                if let Some(orphaned) = self.registry.reject(&topic) {
                    debug!(topic = %topic, orphaned = orphaned.len(), "Dropped rejected topic");
                }
                self.emit(ClientEvent::SubscribeRejected { topic, reason });
                None
            }
            Frame::Authenticated => {
                self.on_authenticated();
                None
            }
            Frame::AuthenticationFailed { reason } => {
                self.on_authentication_failed(reason);
                None
            }
            Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),
            Frame::Pong { .. } => None,
            Frame::Error { message } => {
                warn!(message = %message, "Gateway reported an error");
                None
            }
            other => {
                warn!(kind = %other.kind(), "Unexpected frame from gateway");
                None
            }
        }
    }

    fn on_authenticated(&self) {
        if self.credential().is_none() {
            debug!("Ignoring authentication after the credential was cleared");
            return;
        }
        self.authenticated.store(true, Ordering::SeqCst);
        if let Some(waiter) = lock(&self.pending_auth).take() {
            let _ = waiter.send(Ok(()));
        }
        info!("Authenticated");
        self.emit(ClientEvent::Authenticated);
        self.replay();
    }

    fn on_authentication_failed(&self, reason: String) {
        self.authenticated.store(false, Ordering::SeqCst);
        warn!(reason = %reason, "Authentication failed");
        if let Some(waiter) = lock(&self.pending_auth).take() {
            let _ = waiter.send(Err(reason.clone()));
        }
        self.emit(ClientEvent::AuthenticationFailed { reason });
    }

    /// Open topics that were tracked while offline, on a session without a
    /// credential.
    pub(crate) fn open_pending(&self) {
        let mut opened = 0;
        for topic in self.registry.topics() {
            if !self.registry.claim_open(&topic) {
                continue;
            }
            match self.send(Frame::subscribe(topic.as_str())) {
                Ok(()) => opened += 1,
                Err(e) => debug!(topic = %topic, error = %e, "Could not send subscribe"),
            }
        }
        if opened > 0 {
            debug!(opened, "Opened pending topics");
        }
    }

    /// Reopen every tracked topic. Each topic is attempted independently.
    fn replay(&self) {
        let topics = self.registry.topics();
        let mut reopened = 0;

        for topic in &topics {
            if !self.registry.reopen(topic) {
                continue;
            }
            match self.send(Frame::subscribe(topic.as_str())) {
                Ok(()) => reopened += 1,
                Err(e) => warn!(topic = %topic, error = %e, "Failed to replay subscription"),
            }
        }

        debug!(tracked = topics.len(), reopened, "Replayed subscriptions");
    }
}
