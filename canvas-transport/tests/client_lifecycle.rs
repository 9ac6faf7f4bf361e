//! End-to-end tests for `TransportClient` over in-memory links.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use canvas_transport::{
    ClientEvent, ConnectionState, Connector, EncryptedPayload, Frame, Link, LinkPeer,
    ReconnectPolicy, Timer, TransportClient, TransportConfig, TransportError, TransportEvent,
    TransportResult,
};
use serde_json::json;
use tokio::sync::mpsc;
use url::Url;

const URL: &str = "ws://canvas.test/ws";
const WAIT: Duration = Duration::from_secs(5);

/// Hands out pre-built links in order; fails once they run out.
#[derive(Clone, Default)]
struct ScriptedConnector {
    links: Arc<Mutex<VecDeque<TransportResult<Link>>>>,
    dials: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    fn push_link(&self) -> LinkPeer {
        let (link, peer) = Link::pair(16);
        self.links.lock().unwrap().push_back(Ok(link));
        peer
    }

    fn push_failure(&self) {
        self.links
            .lock()
            .unwrap()
            .push_back(Err(TransportError::Connect("refused".to_string())));
    }

    fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &Url, _room_id: &str) -> TransportResult<Link> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let next = self.links.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(TransportError::Connect("no server".to_string())))
    }
}

/// Records requested delays and returns at once.
#[derive(Clone, Default)]
struct RecordingTimer {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingTimer {
    fn delays_ms(&self) -> Vec<u128> {
        self.delays.lock().unwrap().iter().map(Duration::as_millis).collect()
    }
}

#[async_trait]
impl Timer for RecordingTimer {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
        tokio::task::yield_now().await;
    }
}

/// Records requested delays and never fires.
#[derive(Clone, Default)]
struct StalledTimer {
    delays: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl Timer for StalledTimer {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
        std::future::pending::<()>().await;
    }
}

fn config() -> TransportConfig {
    TransportConfig {
        reconnect: ReconnectPolicy::new(1000, 5),
        ..TransportConfig::default()
    }
}

fn listen(client: &TransportClient) -> mpsc::UnboundedReceiver<TransportEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _listener = client.on(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("listener dropped")
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
    wanted: impl Fn(&TransportEvent) -> bool,
) -> Vec<TransportEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = wanted(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

async fn received(peer: &mut LinkPeer) -> Frame {
    tokio::time::timeout(WAIT, peer.received.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("link closed")
}

#[tokio::test]
async fn test_open_sends_join_and_reports_connected() {
    let connector = ScriptedConnector::default();
    let mut peer = connector.push_link();
    let mut client = TransportClient::with_timer(config(), connector.clone(), RecordingTimer::default());
    let mut events = listen(&client);

    assert_eq!(client.state(), ConnectionState::Idle);
    client.connect(URL, "room-1").expect("connect");

    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    assert!(client.connected());

    let Frame::Text(join) = received(&mut peer).await else {
        panic!("join must be a text frame");
    };
    let join: serde_json::Value = serde_json::from_str(&join).expect("json");
    assert_eq!(join, json!({"type": "join-room", "roomId": "room-1"}));

    client.close().await;
}

#[tokio::test]
async fn test_exhaustion_after_max_attempts() {
    let connector = ScriptedConnector::default();
    let timer = RecordingTimer::default();
    let mut client = TransportClient::with_timer(config(), connector.clone(), timer.clone());
    let mut events = listen(&client);

    client.connect(URL, "room-1").expect("connect");
    let seen = wait_for(&mut events, |e| *e == TransportEvent::ReconnectExhausted).await;

    let scheduled: Vec<(u32, u128)> = seen
        .iter()
        .filter_map(|e| match e {
            TransportEvent::ReconnectScheduled { attempt, delay } => {
                Some((*attempt, delay.as_millis()))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        scheduled,
        vec![(1, 1000), (2, 2000), (3, 4000), (4, 8000), (5, 16000)]
    );
    assert_eq!(timer.delays_ms(), vec![1000, 2000, 4000, 8000, 16000]);
    assert_eq!(connector.dials(), 6);
    assert_eq!(client.state(), ConnectionState::Exhausted);

    // Nothing follows the terminal event.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(connector.dials(), 6);

    client.close().await;
    assert_eq!(client.state(), ConnectionState::Exhausted);
}

#[tokio::test]
async fn test_close_cancels_pending_reconnect() {
    let connector = ScriptedConnector::default();
    let peer = connector.push_link();
    let timer = StalledTimer::default();
    let mut client = TransportClient::with_timer(config(), connector.clone(), timer.clone());
    let mut events = listen(&client);

    client.connect(URL, "room-1").expect("connect");
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    drop(peer);
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Disconnected {
            intentional: false,
            ..
        }
    ));
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(1000)
        }
    );
    assert_eq!(client.state(), ConnectionState::Reconnecting);

    client.close().await;
    assert_eq!(client.state(), ConnectionState::ClosedIntentional);
    assert_eq!(client.connection().next_delay, None);
    assert_eq!(connector.dials(), 1);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_intentional_close_never_reconnects() {
    let connector = ScriptedConnector::default();
    let _peer = connector.push_link();
    let timer = RecordingTimer::default();
    let mut client = TransportClient::with_timer(config(), connector.clone(), timer.clone());
    let mut events = listen(&client);

    client.connect(URL, "room-1").expect("connect");
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    client.close().await;
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::Disconnected {
            intentional: true,
            reason: "closed by client".to_string()
        }
    );
    assert_eq!(client.state(), ConnectionState::ClosedIntentional);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.dials(), 1);
    assert!(timer.delays_ms().is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_successful_reopen_resets_attempts() {
    let connector = ScriptedConnector::default();
    connector.push_failure();
    connector.push_failure();
    let peer = connector.push_link();
    let timer = RecordingTimer::default();
    let mut client = TransportClient::with_timer(config(), connector.clone(), timer.clone());
    let mut events = listen(&client);

    client.connect(URL, "room-1").expect("connect");
    let seen = wait_for(&mut events, |e| *e == TransportEvent::Connected).await;
    assert_eq!(seen.len(), 3, "two retries then connected: {seen:?}");
    assert_eq!(client.connection().attempt, 0);

    drop(peer);
    let seen = wait_for(&mut events, |e| {
        matches!(e, TransportEvent::ReconnectScheduled { .. })
    })
    .await;
    assert_eq!(
        seen.last(),
        Some(&TransportEvent::ReconnectScheduled {
            attempt: 1,
            delay: Duration::from_millis(1000)
        })
    );

    // The next retry is only scheduled once the previous sleep was taken.
    wait_for(&mut events, |e| {
        matches!(e, TransportEvent::ReconnectScheduled { attempt: 2, .. })
    })
    .await;
    assert_eq!(timer.delays_ms()[..3], [1000, 2000, 1000]);

    client.close().await;
}

#[tokio::test]
async fn test_read_error_counts_as_unexpected_close() {
    let connector = ScriptedConnector::default();
    let peer = connector.push_link();
    let mut client = TransportClient::with_timer(config(), connector.clone(), StalledTimer::default());
    let mut events = listen(&client);

    client.connect(URL, "room-1").expect("connect");
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    peer.fail(TransportError::Closed).await;
    let TransportEvent::Disconnected {
        intentional,
        reason,
    } = next_event(&mut events).await
    else {
        panic!("expected disconnect");
    };
    assert!(!intentional);
    assert_eq!(reason, "Connection closed");

    client.close().await;
}

#[tokio::test]
async fn test_inbound_frames_are_classified() {
    let connector = ScriptedConnector::default();
    let peer = connector.push_link();
    let mut client = TransportClient::with_timer(config(), connector.clone(), StalledTimer::default());
    let mut events = listen(&client);

    client.connect(URL, "room-1").expect("connect");
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);

    let text = |value: serde_json::Value| Frame::Text(value.to_string());
    peer.send(text(json!({"type": "room-joined", "roomId": "room-1"})))
        .await
        .expect("send");
    peer.send(Frame::Text("{ not json".to_string())).await.expect("send");
    peer.send(text(json!({"type": "cursor-party"}))).await.expect("send");
    peer.send(Frame::Binary(vec![0, 1, 2])).await.expect("send");
    peer.send(Frame::Binary(vec![2, 9, 9, 42])).await.expect("send");
    peer.send(text(json!({"type": "peer-joined", "peerId": "p2"})))
        .await
        .expect("send");

    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::RoomJoined {
            room_id: Some("room-1".to_string())
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::RemoteUpdate(EncryptedPayload::new(vec![42], vec![9, 9]))
    );
    assert_eq!(
        next_event(&mut events).await,
        TransportEvent::PeerJoined {
            peer_id: "p2".to_string()
        }
    );
    assert!(client.connected());

    client.close().await;
}

#[tokio::test]
async fn test_emit_only_while_open() {
    let connector = ScriptedConnector::default();
    let mut peer = connector.push_link();
    let mut client = TransportClient::with_timer(config(), connector.clone(), StalledTimer::default());
    let mut events = listen(&client);

    let payload = EncryptedPayload::new(vec![1, 2, 3], vec![7; 12]);
    let broadcast = ClientEvent::Broadcast(payload.clone());
    assert!(!client.emit(&broadcast));

    client.connect(URL, "room-1").expect("connect");
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    let _join = received(&mut peer).await;

    assert!(client.emit(&broadcast));
    let Frame::Binary(bytes) = received(&mut peer).await else {
        panic!("broadcast must be binary");
    };
    assert_eq!(bytes[0], 12);
    assert_eq!(&bytes[13..], &[1, 2, 3]);

    assert!(client.emit(&ClientEvent::VolatileBroadcast(payload)));
    let Frame::Text(json) = received(&mut peer).await else {
        panic!("volatile broadcast must be text");
    };
    assert!(json.contains("server-volatile-broadcast"));

    assert!(!client.emit(&ClientEvent::Broadcast(EncryptedPayload::new(vec![1], Vec::new()))));

    client.close().await;
    assert!(!client.emit(&broadcast));
}

#[tokio::test]
async fn test_listeners_can_be_removed() {
    let connector = ScriptedConnector::default();
    let _peer = connector.push_link();
    let mut client = TransportClient::with_timer(config(), connector.clone(), StalledTimer::default());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let id = client.on(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(client.off(id));
    assert!(!client.off(id));

    let mut events = listen(&client);
    client.connect(URL, "room-1").expect("connect");
    assert_eq!(next_event(&mut events).await, TransportEvent::Connected);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    client.close().await;
}

#[tokio::test]
async fn test_connect_errors() {
    let connector = ScriptedConnector::default();
    let _peer = connector.push_link();
    let mut client = TransportClient::with_timer(config(), connector.clone(), StalledTimer::default());

    assert!(matches!(
        client.connect("not a url", "room-1"),
        Err(TransportError::InvalidUrl(_))
    ));

    client.connect(URL, "room-1").expect("connect");
    assert!(matches!(
        client.connect(URL, "room-1"),
        Err(TransportError::AlreadyConnected)
    ));

    client.close().await;
}
