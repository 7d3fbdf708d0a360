//! End-to-end client behavior against an in-process gateway.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_client::{
    ChannelState, Client, ClientConfig, ClientError, ClientEvent, Endpoint, HandleId, Payload,
    ReconnectConfig,
};
use tether_protocol::Frame;
use tether_transport::memory::{pair, MemoryGateway, MemorySession};
use tether_transport::{Connection, Connector, TransportError};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

fn fast_reconnect() -> ClientConfig {
    ClientConfig {
        reconnect: ReconnectConfig {
            initial_delay_ms: 10,
            max_delay_ms: 50,
            ..ReconnectConfig::default()
        },
        ..ClientConfig::default()
    }
}

fn no_reconnect() -> ClientConfig {
    ClientConfig {
        reconnect: ReconnectConfig::disabled(),
        ..ClientConfig::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_frame(session: &mut MemorySession) -> Frame {
    timeout(WAIT, session.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("client closed the session")
}

/// Assert nothing else was sent after letting the driver catch up.
async fn assert_quiet(session: &mut MemorySession) {
    sleep(Duration::from_millis(50)).await;
    assert_eq!(session.try_recv(), None);
}

async fn accept(gateway: &mut MemoryGateway) -> MemorySession {
    timeout(WAIT, gateway.accept())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

async fn connected(config: ClientConfig) -> (Client, MemoryGateway, MemorySession) {
    let (connector, mut gateway) = pair();
    let client = Client::new(connector, config);
    client.connect(Endpoint::new("gateway.test", 8000)).unwrap();

    let session = accept(&mut gateway).await;
    wait_until(|| client.is_connected()).await;
    (client, gateway, session)
}

async fn authenticate(client: &Client, session: &mut MemorySession, token: &'static str) {
    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.authenticate(token).await })
    };
    assert_eq!(next_frame(session).await, Frame::authenticate(token));
    session.send(Frame::Authenticated).unwrap();
    pending.await.unwrap().unwrap();
}

fn recorder(client: &Client, topic: &str) -> (HandleId, mpsc::UnboundedReceiver<Payload>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = client
        .subscribe(topic, move |payload| {
            let _ = tx.send(payload.clone());
            Ok(())
        })
        .unwrap();
    (handle, rx)
}

async fn received(rx: &mut mpsc::UnboundedReceiver<Payload>) -> Payload {
    timeout(WAIT, rx.recv())
        .await
        .expect("handler not called in time")
        .expect("handler dropped")
}

async fn open(client: &Client, session: &mut MemorySession, topic: &str) {
    assert_eq!(next_frame(session).await, Frame::subscribe(topic));
    session.send(Frame::subscribed(topic)).unwrap();
    wait_until(|| client.state(topic) == Some(ChannelState::Open)).await;
}

#[tokio::test]
async fn test_message_reaches_handler_as_decoded_event() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;
    let (_h1, mut rx) = recorder(&client, "/user/42");

    open(&client, &mut session, "/user/42").await;
    session
        .send(Frame::message("/user/42", r#"{"type":"ping"}"#))
        .unwrap();

    let payload = received(&mut rx).await;
    assert_eq!(payload.kind(), Some("ping"));
    assert!(payload.data().is_none());
}

#[tokio::test]
async fn test_shared_topic_survives_partial_unsubscribe() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;
    let (h1, mut rx1) = recorder(&client, "/user/42");
    let (_h2, mut rx2) = recorder(&client, "/user/42");

    // Two handlers, one subscribe on the wire.
    open(&client, &mut session, "/user/42").await;
    assert_quiet(&mut session).await;
    assert_eq!(client.subscriber_count("/user/42"), 2);

    client.unsubscribe(h1);
    assert_eq!(client.state("/user/42"), Some(ChannelState::Open));
    assert_quiet(&mut session).await;

    session
        .send(Frame::message("/user/42", r#"{"type":"notice","data":{"n":1}}"#))
        .unwrap();
    let payload = received(&mut rx2).await;
    assert_eq!(payload.kind(), Some("notice"));
    assert_eq!(payload.data(), Some(&serde_json::json!({"n": 1})));

    sleep(Duration::from_millis(50)).await;
    assert!(rx1.try_recv().is_err());
}

#[tokio::test]
async fn test_last_unsubscribe_closes_channel() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;
    let (h1, mut rx1) = recorder(&client, "/user/42");
    let (h2, mut rx2) = recorder(&client, "/user/42");
    open(&client, &mut session, "/user/42").await;

    client.unsubscribe(h1);
    client.unsubscribe(h2);
    assert_eq!(client.state("/user/42"), None);
    assert!(client.topics().is_empty());

    // Exactly one unsubscribe frame, even if the handle is removed twice.
    client.unsubscribe(h2);
    assert_eq!(next_frame(&mut session).await, Frame::unsubscribe("/user/42"));
    assert_quiet(&mut session).await;

    session
        .send(Frame::message("/user/42", r#"{"type":"late"}"#))
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(rx1.try_recv().is_err());
    assert!(rx2.try_recv().is_err());
}

#[tokio::test]
async fn test_rejected_credential_leaves_registry_untouched() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;
    let (_h, _rx) = recorder(&client, "/user/42");
    open(&client, &mut session, "/user/42").await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.authenticate("badtoken").await })
    };
    assert_eq!(next_frame(&mut session).await, Frame::authenticate("badtoken"));
    session
        .send(Frame::authentication_failed("invalid token"))
        .unwrap();

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Authentication(ref reason) if reason == "invalid token"));
    assert!(!client.is_authenticated());
    assert_eq!(client.topics(), vec!["/user/42".to_string()]);
    assert_eq!(client.state("/user/42"), Some(ChannelState::Open));
    assert_eq!(client.subscriber_count("/user/42"), 1);
}

#[tokio::test]
async fn test_authentication_reaffirms_tracked_topics() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;
    let (_a, _rx_a) = recorder(&client, "/a");
    open(&client, &mut session, "/a").await;

    authenticate(&client, &mut session, "token").await;
    assert!(client.is_authenticated());

    // Open topics are re-affirmed without leaving Open.
    assert_eq!(next_frame(&mut session).await, Frame::subscribe("/a"));
    assert_eq!(client.state("/a"), Some(ChannelState::Open));
}

#[tokio::test]
async fn test_deauthenticate_clears_registry() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;
    let (a, _rx_a) = recorder(&client, "/a");
    let (_b, _rx_b) = recorder(&client, "/b");
    open(&client, &mut session, "/a").await;
    open(&client, &mut session, "/b").await;

    client.deauthenticate();
    assert!(client.topics().is_empty());
    assert!(!client.has_credential());

    let mut closed = vec![next_frame(&mut session).await, next_frame(&mut session).await];
    closed.sort_by_key(|frame| frame.topic().map(str::to_string));
    assert_eq!(closed, vec![Frame::unsubscribe("/a"), Frame::unsubscribe("/b")]);
    assert_eq!(next_frame(&mut session).await, Frame::Deauthenticate);

    // Orphaned handles are ignored.
    client.unsubscribe(a);
    assert_quiet(&mut session).await;
}

#[tokio::test]
async fn test_reconnect_replays_subscriptions_after_authentication() {
    let (client, mut gateway, mut session) = connected(fast_reconnect()).await;
    authenticate(&client, &mut session, "token").await;

    let (_h, mut rx) = recorder(&client, "/user/42");
    open(&client, &mut session, "/user/42").await;

    let mut events = client.events();
    drop(session);
    timeout(WAIT, async {
        while !matches!(events.recv().await, Ok(ClientEvent::Disconnected { .. })) {}
    })
    .await
    .expect("no disconnect event");
    assert_eq!(client.state("/user/42"), Some(ChannelState::Unopened));

    let mut session = accept(&mut gateway).await;
    // The stored credential is presented before anything else.
    assert_eq!(next_frame(&mut session).await, Frame::authenticate("token"));
    session.send(Frame::Authenticated).unwrap();

    open(&client, &mut session, "/user/42").await;
    session
        .send(Frame::message("/user/42", r#"{"type":"back"}"#))
        .unwrap();
    assert_eq!(received(&mut rx).await.kind(), Some("back"));
    assert_eq!(gateway.connect_attempts(), 2);

    client.disconnect().await;
}

#[tokio::test]
async fn test_handler_failures_are_isolated() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;
    let calls = Arc::new(AtomicUsize::new(0));

    client
        .subscribe("/t", |_| Err("handler error".into()))
        .unwrap();
    client
        .subscribe("/t", |_| panic!("handler panic"))
        .unwrap();
    let (_h, mut rx) = recorder(&client, "/t");
    {
        let calls = Arc::clone(&calls);
        client
            .subscribe("/t", move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
    }
    open(&client, &mut session, "/t").await;

    session.send(Frame::message("/t", "one")).unwrap();
    session.send(Frame::message("/t", "two")).unwrap();

    assert_eq!(received(&mut rx).await, Payload::Raw("one".into()));
    assert_eq!(received(&mut rx).await, Payload::Raw("two".into()));
    wait_until(|| calls.load(Ordering::SeqCst) == 2).await;
}

#[tokio::test]
async fn test_gateway_rejection_drops_topic() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;
    let mut events = client.events();
    let (handle, _rx) = recorder(&client, "/secret");

    assert_eq!(next_frame(&mut session).await, Frame::subscribe("/secret"));
    session
        .send(Frame::subscribe_rejected("/secret", "forbidden"))
        .unwrap();
    wait_until(|| client.state("/secret").is_none()).await;

    let rejected = timeout(WAIT, async {
        loop {
            if let Ok(ClientEvent::SubscribeRejected { topic, reason }) = events.recv().await {
                return (topic, reason);
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(rejected, ("/secret".to_string(), "forbidden".to_string()));

    // The orphaned handle is a no-op; no unsubscribe is sent.
    client.unsubscribe(handle);
    assert_quiet(&mut session).await;
}

#[tokio::test]
async fn test_messages_before_acknowledgment_are_dropped() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;
    let (_h, mut rx) = recorder(&client, "/t");

    assert_eq!(next_frame(&mut session).await, Frame::subscribe("/t"));
    session.send(Frame::message("/t", "early")).unwrap();
    session.send(Frame::subscribed("/t")).unwrap();
    session.send(Frame::message("/t", "on time")).unwrap();

    assert_eq!(received(&mut rx).await, Payload::Raw("on time".into()));
}

#[tokio::test]
async fn test_publish_requires_connection() {
    let (connector, _gateway) = pair();
    let client = Client::new(connector, no_reconnect());

    let err = client
        .publish("/t", &serde_json::json!({"type": "hello"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn test_publish_writes_frame() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;

    client
        .publish("/room/1", &serde_json::json!({"type": "hello"}))
        .await
        .unwrap();
    assert_eq!(
        next_frame(&mut session).await,
        Frame::publish("/room/1", r#"{"type":"hello"}"#)
    );

    assert!(matches!(
        client.publish_text("", "x").await,
        Err(ClientError::InvalidTopic(_))
    ));
}

#[tokio::test]
async fn test_ping_is_answered() {
    let (_client, _gateway, mut session) = connected(no_reconnect()).await;

    session.send(Frame::Ping { timestamp: Some(7) }).unwrap();
    assert_eq!(next_frame(&mut session).await, Frame::pong(Some(7)));
}

#[tokio::test]
async fn test_authenticate_while_disconnected_keeps_credential() {
    let (connector, mut gateway) = pair();
    let client = Client::new(connector, no_reconnect());

    let err = client.authenticate("token").await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    assert!(client.has_credential());

    client.connect(Endpoint::new("gateway.test", 8000)).unwrap();
    let mut session = accept(&mut gateway).await;
    assert_eq!(next_frame(&mut session).await, Frame::authenticate("token"));
}

#[tokio::test]
async fn test_topics_tracked_offline_open_on_connect() {
    let (connector, mut gateway) = pair();
    let client = Client::new(connector, no_reconnect());
    let (_h, mut rx) = recorder(&client, "/user/42");
    assert_eq!(client.state("/user/42"), Some(ChannelState::Unopened));

    client.connect(Endpoint::new("gateway.test", 8000)).unwrap();
    let mut session = accept(&mut gateway).await;
    open(&client, &mut session, "/user/42").await;

    session
        .send(Frame::message("/user/42", r#"{"type":"hello"}"#))
        .unwrap();
    assert_eq!(received(&mut rx).await.kind(), Some("hello"));
}

#[tokio::test]
async fn test_disconnect_interrupts_pending_authentication() {
    let (client, _gateway, mut session) = connected(no_reconnect()).await;

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.authenticate("token").await })
    };
    assert_eq!(next_frame(&mut session).await, Frame::authenticate("token"));
    drop(session);

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Interrupted));
}

#[tokio::test]
async fn test_connect_twice_is_rejected() {
    let (client, _gateway, _session) = connected(no_reconnect()).await;

    assert!(matches!(
        client.connect(Endpoint::new("gateway.test", 8000)),
        Err(ClientError::AlreadyConnected)
    ));

    client.disconnect().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_refused_connect_gives_up_after_max_attempts() {
    let (connector, gateway) = pair();
    gateway.set_accepting(false);
    let client = Client::new(
        connector,
        ClientConfig {
            reconnect: ReconnectConfig {
                initial_delay_ms: 1,
                max_delay_ms: 5,
                max_attempts: Some(2),
                ..ReconnectConfig::default()
            },
            ..ClientConfig::default()
        },
    );
    let mut events = client.events();
    client.connect(Endpoint::new("gateway.test", 8000)).unwrap();

    let stopped = timeout(WAIT, async {
        loop {
            if let Ok(ClientEvent::Stopped) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(stopped.is_ok());
    assert_eq!(gateway.connect_attempts(), 3);
}

#[test]
fn test_connect_outside_runtime() {
    let (connector, _gateway) = pair();
    let client = Client::new(connector, ClientConfig::default());
    assert!(matches!(
        client.connect(Endpoint::new("gateway.test", 8000)),
        Err(ClientError::NoRuntime)
    ));
}

/// A gateway that accepts the TCP dial but never completes the handshake.
struct Unresponsive;

#[async_trait]
impl Connector for Unresponsive {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<Connection, TransportError> {
        std::future::pending().await
    }

    fn name(&self) -> &'static str {
        "unresponsive"
    }
}

#[tokio::test]
async fn test_disconnect_abandons_pending_connect() {
    let client = Client::new(Unresponsive, fast_reconnect());
    let mut events = client.events();
    client.connect(Endpoint::new("gateway.test", 8000)).unwrap();

    timeout(WAIT, client.disconnect())
        .await
        .expect("disconnect waited for the dial");
    assert!(!client.is_connected());
    assert!(matches!(events.try_recv(), Ok(ClientEvent::Stopped)));

    // A fresh connect is accepted once the driver has stopped.
    client.connect(Endpoint::new("gateway.test", 8000)).unwrap();
    timeout(WAIT, client.disconnect()).await.unwrap();
}

#[tokio::test]
async fn test_subscribe_during_pending_authentication_sends_one_frame() {
    let (connector, mut gateway) = pair();
    let client = Client::new(connector, no_reconnect());
    client.set_credential("token");
    client.connect(Endpoint::new("gateway.test", 8000)).unwrap();

    let mut session = accept(&mut gateway).await;
    assert_eq!(next_frame(&mut session).await, Frame::authenticate("token"));

    let (_h, mut rx) = recorder(&client, "/user/42");
    assert_quiet(&mut session).await;
    assert_eq!(client.state("/user/42"), Some(ChannelState::Unopened));

    session.send(Frame::Authenticated).unwrap();
    open(&client, &mut session, "/user/42").await;
    assert_quiet(&mut session).await;

    session
        .send(Frame::message("/user/42", r#"{"type":"hello"}"#))
        .unwrap();
    assert_eq!(received(&mut rx).await.kind(), Some("hello"));
}

#[tokio::test]
async fn test_late_authenticated_after_deauthenticate_is_ignored() {
    let (connector, mut gateway) = pair();
    let client = Client::new(connector, no_reconnect());
    client.set_credential("token");
    client.connect(Endpoint::new("gateway.test", 8000)).unwrap();

    let mut session = accept(&mut gateway).await;
    assert_eq!(next_frame(&mut session).await, Frame::authenticate("token"));

    client.deauthenticate();
    assert_eq!(next_frame(&mut session).await, Frame::Deauthenticate);

    let (_h, _rx) = recorder(&client, "/a");
    assert_eq!(next_frame(&mut session).await, Frame::subscribe("/a"));

    // The acknowledgment of the cleared credential arrives late.
    session.send(Frame::Authenticated).unwrap();
    assert_quiet(&mut session).await;
    assert!(!client.is_authenticated());
    assert_eq!(client.state("/a"), Some(ChannelState::Opening));
}
