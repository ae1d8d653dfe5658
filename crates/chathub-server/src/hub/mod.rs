//! Hub lifecycle: bind listeners, run the dispatcher, serve connections,
//! and shut everything down again.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{Dispatcher, Event, PresenceEvent};
pub use registry::{Registry, RegistrySize};

use crate::auth::IdentityVerifier;
use crate::connection::{self, ConnId, ConnectionContext};
use crate::monitor;
use crate::store::{DiscardStore, MessageStore};
use crate::transport::{self, Accepted};
use chathub_core::{HubError, HubResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Capacity of the reader → dispatcher event channel.
const EVENT_CAPACITY: usize = 1024;

/// Presence events buffered per subscriber.
const PRESENCE_CAPACITY: usize = 256;

/// Runtime settings of one hub instance.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Line protocol listen address; `None` disables it.
    pub line_addr: Option<SocketAddr>,
    /// WebSocket listen address; `None` disables it.
    pub ws_addr: Option<SocketAddr>,
    /// Outbound queue capacity per connection.
    pub queue_capacity: usize,
    pub probe_interval: Duration,
    /// Evict connections silent for this long.
    pub idle_timeout: Option<Duration>,
    pub self_echo: bool,
    /// Resource monitor period; `None` disables the monitor.
    pub monitor_interval: Option<Duration>,
    /// How long `stop` waits for connections to flush before forcing them.
    pub shutdown_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            line_addr: None,
            ws_addr: None,
            queue_capacity: 256,
            probe_interval: Duration::from_secs(10),
            idle_timeout: None,
            self_echo: false,
            monitor_interval: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl HubConfig {
    pub fn new(queue_capacity: usize, probe_interval: Duration) -> Self {
        Self {
            queue_capacity,
            probe_interval,
            ..Self::default()
        }
    }

    pub fn with_line(mut self, addr: SocketAddr) -> Self {
        self.line_addr = Some(addr);
        self
    }

    pub fn with_websocket(mut self, addr: SocketAddr) -> Self {
        self.ws_addr = Some(addr);
        self
    }

    fn validate(&self) -> HubResult<()> {
        if self.line_addr.is_none() && self.ws_addr.is_none() {
            return Err(HubError::Config("no listener configured".into()));
        }
        if self.queue_capacity == 0 {
            return Err(HubError::Config("queue capacity must be at least 1".into()));
        }
        if self.probe_interval.is_zero() {
            return Err(HubError::Config("probe interval must be positive".into()));
        }
        Ok(())
    }
}

/// A configured, not yet running hub.
pub struct Hub {
    config: HubConfig,
    verifier: Arc<dyn IdentityVerifier>,
    store: Arc<dyn MessageStore>,
}

impl Hub {
    pub fn new(config: HubConfig, verifier: Arc<dyn IdentityVerifier>) -> Self {
        Self {
            config,
            verifier,
            store: Arc::new(DiscardStore),
        }
    }

    /// Hand chat messages to `store` before they are routed.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = store;
        self
    }

    /// Bind the configured listeners and start serving.
    pub async fn start(self) -> HubResult<HubHandle> {
        let Hub {
            config,
            verifier,
            store,
        } = self;
        config.validate()?;

        let shutdown = CancellationToken::new();
        let force = CancellationToken::new();
        let tracker = TaskTracker::new();

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (presence_tx, _) = broadcast::channel(PRESENCE_CAPACITY);
        let dispatcher = Dispatcher::new(presence_tx.clone())
            .with_self_echo(config.self_echo)
            .with_idle_timeout(config.idle_timeout);
        let size = dispatcher.registry_size();

        let ctx = ConnectionContext {
            events: events_tx,
            verifier,
            store,
            queue_capacity: config.queue_capacity,
            probe_interval: config.probe_interval,
            force: force.clone(),
        };
        let next_id = Arc::new(AtomicU64::new(1));

        let mut line_addr = None;
        let mut ws_addr = None;
        let mut listeners = Vec::new();
        let bound: HubResult<()> = async {
            if let Some(addr) = config.line_addr {
                let (local, rx) = transport::line::start_listener(addr, shutdown.clone()).await?;
                line_addr = Some(local);
                listeners.push(rx);
            }
            if let Some(addr) = config.ws_addr {
                let (local, rx) =
                    transport::websocket::start_listener(addr, shutdown.clone()).await?;
                ws_addr = Some(local);
                listeners.push(rx);
            }
            Ok(())
        }
        .await;
        if let Err(e) = bound {
            shutdown.cancel();
            return Err(e);
        }

        let dispatcher_task = tokio::spawn(dispatcher.run(events_rx, shutdown.clone()));
        for rx in listeners {
            tokio::spawn(accept_loop(
                rx,
                ctx.clone(),
                tracker.clone(),
                Arc::clone(&next_id),
            ));
        }
        if let Some(every) = config.monitor_interval {
            tokio::spawn(monitor::run(every, size.clone(), shutdown.clone()));
        }

        info!(
            line = ?line_addr,
            websocket = ?ws_addr,
            queue_capacity = config.queue_capacity,
            "hub started"
        );

        Ok(HubHandle {
            line_addr,
            ws_addr,
            size,
            presence: presence_tx,
            shutdown,
            force,
            tracker,
            dispatcher: dispatcher_task,
            shutdown_grace: config.shutdown_grace,
        })
    }
}

async fn accept_loop(
    mut accepted: mpsc::Receiver<Accepted>,
    ctx: ConnectionContext,
    tracker: TaskTracker,
    next_id: Arc<AtomicU64>,
) {
    while let Some(conn) = accepted.recv().await {
        let id = ConnId(next_id.fetch_add(1, Ordering::Relaxed));
        tracker.spawn(connection::serve(id, conn, ctx.clone()));
    }
}

/// Handle to a running hub.
pub struct HubHandle {
    line_addr: Option<SocketAddr>,
    ws_addr: Option<SocketAddr>,
    size: RegistrySize,
    presence: broadcast::Sender<PresenceEvent>,
    shutdown: CancellationToken,
    force: CancellationToken,
    tracker: TaskTracker,
    dispatcher: JoinHandle<()>,
    shutdown_grace: Duration,
}

impl HubHandle {
    /// Bound address of the line listener.
    pub fn line_addr(&self) -> Option<SocketAddr> {
        self.line_addr
    }

    /// Bound address of the WebSocket listener.
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws_addr
    }

    /// Number of registered identities.
    pub fn connection_count(&self) -> usize {
        self.size.get()
    }

    /// Subscribe to online/offline transitions.
    pub fn presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence.subscribe()
    }

    /// Stop accepting, close every connection gracefully, and wait for them.
    ///
    /// Connections still busy after the grace period are torn down.
    pub async fn stop(self) {
        info!("hub stopping");
        self.shutdown.cancel();
        if let Err(e) = self.dispatcher.await {
            warn!(error = %e, "dispatcher task failed");
        }

        self.tracker.close();
        if tokio::time::timeout(self.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.tracker.len(),
                "grace period expired, forcing connections closed"
            );
            self.force.cancel();
            self.tracker.wait().await;
        }
        info!("hub stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::HmacVerifier;
    use crate::transport::websocket::MAX_WS_FRAME_SIZE;
    use chathub_core::{issue_token, ChatMessage, Status};
    use std::future::Future;
    use std::pin::Pin;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;

    const SECRET: &[u8] = b"test-secret";
    const WAIT: Duration = Duration::from_secs(5);

    fn local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn start(config: HubConfig) -> HubHandle {
        Hub::new(config, Arc::new(HmacVerifier::new(SECRET.to_vec())))
            .start()
            .await
            .unwrap()
    }

    struct LineClient {
        lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
        write: OwnedWriteHalf,
    }

    impl LineClient {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read, write) = stream.into_split();
            Self {
                lines: BufReader::new(read).lines(),
                write,
            }
        }

        async fn send(&mut self, line: &str) {
            self.write
                .write_all(format!("{line}\n").as_bytes())
                .await
                .unwrap();
        }

        async fn recv(&mut self) -> Option<String> {
            tokio::time::timeout(WAIT, self.lines.next_line())
                .await
                .expect("timed out waiting for a line")
                .unwrap()
        }

        async fn login(addr: SocketAddr, name: &str) -> Self {
            let mut client = Self::connect(addr).await;
            client.send(&format!("LOGIN:{name}")).await;
            assert_eq!(client.recv().await.as_deref(), Some("Login successful"));
            client
        }
    }

    type WsClient =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

    async fn ws_connect(addr: SocketAddr) -> WsClient {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        ws
    }

    async fn ws_recv(ws: &mut WsClient) -> Value {
        loop {
            let msg = tokio::time::timeout(WAIT, ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .unwrap();
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn ws_send(ws: &mut WsClient, value: Value) {
        ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    async fn ws_login(addr: SocketAddr, name: &str) -> WsClient {
        let mut ws = ws_connect(addr).await;
        let token = issue_token(SECRET, name, 60);
        ws_send(&mut ws, json!({"type": "auth", "token": token})).await;
        let ack = ws_recv(&mut ws).await;
        assert_eq!(ack, json!({"type": "userStatus", "username": name, "status": "online"}));
        ws
    }

    async fn wait_for_count(hub: &HubHandle, expected: usize) {
        tokio::time::timeout(WAIT, async {
            while hub.connection_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count never settled");
    }

    /// Refuses to persist messages whose content is `"unsaved"`.
    struct PickyStore;

    impl MessageStore for PickyStore {
        fn save<'a>(
            &'a self,
            message: &'a ChatMessage,
        ) -> Pin<Box<dyn Future<Output = HubResult<()>> + Send + 'a>> {
            Box::pin(async move {
                if message.content == "unsaved" {
                    Err(HubError::Store("disk full".into()))
                } else {
                    Ok(())
                }
            })
        }
    }

    #[tokio::test]
    async fn requires_a_listener() {
        let result = Hub::new(
            HubConfig::default(),
            Arc::new(HmacVerifier::new(SECRET.to_vec())),
        )
        .start()
        .await;
        assert!(matches!(result, Err(HubError::Config(_))));
    }

    #[tokio::test]
    async fn line_broadcast_and_private() {
        let hub = start(HubConfig::default().with_line(local())).await;
        let addr = hub.line_addr().unwrap();

        let mut alice = LineClient::login(addr, "alice").await;
        let mut bob = LineClient::login(addr, "bob").await;
        assert_eq!(alice.recv().await.as_deref(), Some("STATUS:bob:online"));

        alice.send("MSG_ALL: hello there").await;
        assert_eq!(bob.recv().await.as_deref(), Some("alice:  hello there"));

        bob.send("MSG_USER: alice : psst").await;
        assert_eq!(alice.recv().await.as_deref(), Some("(Private) bob: psst"));

        bob.send("MSG_USER:carol:hi").await;
        assert_eq!(bob.recv().await.as_deref(), Some("User not found"));

        bob.send("HELLO").await;
        assert_eq!(bob.recv().await.as_deref(), Some("Unknown command"));

        bob.send("MSG_USER:nocolon").await;
        assert_eq!(
            bob.recv().await.as_deref(),
            Some("Invalid private message format")
        );

        hub.stop().await;
    }

    #[tokio::test]
    async fn line_duplicate_login_is_rejected_and_closed() {
        let hub = start(HubConfig::default().with_line(local())).await;
        let addr = hub.line_addr().unwrap();

        let _alice = LineClient::login(addr, "alice").await;
        let mut imposter = LineClient::connect(addr).await;
        imposter.send("LOGIN:alice").await;
        assert_eq!(
            imposter.recv().await.as_deref(),
            Some("Username already taken")
        );
        assert_eq!(imposter.recv().await, None);
        assert_eq!(hub.connection_count(), 1);

        hub.stop().await;
    }

    #[tokio::test]
    async fn line_requires_login() {
        let hub = start(HubConfig::default().with_line(local())).await;
        let mut client = LineClient::connect(hub.line_addr().unwrap()).await;

        client.send("MSG_ALL:hi").await;
        assert_eq!(client.recv().await.as_deref(), Some("Please login first"));

        hub.stop().await;
    }

    #[tokio::test]
    async fn logout_announces_offline() {
        let hub = start(HubConfig::default().with_line(local())).await;
        let addr = hub.line_addr().unwrap();
        let mut presence = hub.presence();

        let mut alice = LineClient::login(addr, "alice").await;
        let mut bob = LineClient::login(addr, "bob").await;
        assert_eq!(alice.recv().await.as_deref(), Some("STATUS:bob:online"));

        bob.send("LOGOUT").await;
        assert_eq!(bob.recv().await, None);
        assert_eq!(alice.recv().await.as_deref(), Some("STATUS:bob:offline"));
        wait_for_count(&hub, 1).await;

        let mut seen = Vec::new();
        while let Ok(event) = presence.try_recv() {
            seen.push((event.identity, event.status));
        }
        assert_eq!(
            seen,
            vec![
                ("alice".to_string(), Status::Online),
                ("bob".to_string(), Status::Online),
                ("bob".to_string(), Status::Offline),
            ]
        );

        hub.stop().await;
    }

    #[tokio::test]
    async fn websocket_auth_and_broadcast() {
        let hub = start(HubConfig::default().with_websocket(local())).await;
        let addr = hub.ws_addr().unwrap();

        let mut alice = ws_login(addr, "alice").await;
        let mut bob = ws_login(addr, "bob").await;
        assert_eq!(
            ws_recv(&mut alice).await,
            json!({"type": "userStatus", "username": "bob", "status": "online"})
        );

        ws_send(
            &mut alice,
            json!({
                "type": "message",
                "room": "general",
                "sender": "mallory",
                "content": "hi all",
                "time": "2024-05-01T10:20:30Z"
            }),
        )
        .await;
        let got = ws_recv(&mut bob).await;
        assert_eq!(
            got,
            json!({
                "type": "message",
                "room": "general",
                "sender": "alice",
                "content": "hi all",
                "time": "2024-05-01T10:20:30Z"
            })
        );

        hub.stop().await;
    }

    #[tokio::test]
    async fn websocket_invalid_token_keeps_connection() {
        let hub = start(HubConfig::default().with_websocket(local())).await;
        let addr = hub.ws_addr().unwrap();

        let mut ws = ws_connect(addr).await;
        ws_send(&mut ws, json!({"type": "auth", "token": "garbage"})).await;
        assert_eq!(
            ws_recv(&mut ws).await,
            json!({"type": "error", "message": "Invalid token"})
        );

        let token = issue_token(SECRET, "alice", 60);
        ws_send(&mut ws, json!({"type": "auth", "token": token})).await;
        assert_eq!(ws_recv(&mut ws).await["status"], "online");
        wait_for_count(&hub, 1).await;

        hub.stop().await;
    }

    #[tokio::test]
    async fn websocket_malformed_frame_gets_error() {
        let hub = start(HubConfig::default().with_websocket(local())).await;
        let mut ws = ws_login(hub.ws_addr().unwrap(), "alice").await;

        ws.send(Message::Text("{not json".to_string().into()))
            .await
            .unwrap();
        assert_eq!(ws_recv(&mut ws).await["type"], "error");

        hub.stop().await;
    }

    #[tokio::test]
    async fn websocket_oversize_message_closes_connection() {
        let hub = start(HubConfig::default().with_websocket(local())).await;
        let mut ws = ws_login(hub.ws_addr().unwrap(), "alice").await;
        wait_for_count(&hub, 1).await;

        let content = "x".repeat(MAX_WS_FRAME_SIZE + 1);
        // the server may reset the socket before the whole frame is written
        let _ = ws
            .send(Message::Text(
                json!({"type": "message", "content": content}).to_string().into(),
            ))
            .await;

        wait_for_count(&hub, 0).await;
        tokio::time::timeout(WAIT, async {
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        })
        .await
        .expect("connection stayed open");

        hub.stop().await;
    }

    #[tokio::test]
    async fn store_failure_drops_message() {
        let hub = Hub::new(
            HubConfig::default().with_line(local()),
            Arc::new(HmacVerifier::new(SECRET.to_vec())),
        )
        .with_store(Arc::new(PickyStore))
        .start()
        .await
        .unwrap();
        let addr = hub.line_addr().unwrap();

        let mut alice = LineClient::login(addr, "alice").await;
        let mut bob = LineClient::login(addr, "bob").await;
        assert_eq!(alice.recv().await.as_deref(), Some("STATUS:bob:online"));

        alice.send("MSG_ALL:unsaved").await;
        alice.send("MSG_ALL:saved").await;
        assert_eq!(bob.recv().await.as_deref(), Some("alice: saved"));

        alice.send("MSG_USER:bob:unsaved").await;
        alice.send("MSG_USER:bob:after").await;
        assert_eq!(bob.recv().await.as_deref(), Some("(Private) alice: after"));
        assert_eq!(hub.connection_count(), 2);

        hub.stop().await;
    }

    #[tokio::test]
    async fn cross_wire_delivery() {
        let hub = start(
            HubConfig::default()
                .with_line(local())
                .with_websocket(local()),
        )
        .await;

        let mut line = LineClient::login(hub.line_addr().unwrap(), "alice").await;
        let mut ws = ws_login(hub.ws_addr().unwrap(), "bob").await;
        assert_eq!(line.recv().await.as_deref(), Some("STATUS:bob:online"));

        line.send("MSG_ALL:hi bob").await;
        let got = ws_recv(&mut ws).await;
        assert_eq!(got["sender"], "alice");
        assert_eq!(got["content"], "hi bob");
        assert_eq!(got["room"], "lobby");

        ws_send(
            &mut ws,
            json!({"type": "message", "content": "hi alice", "to": "alice"}),
        )
        .await;
        assert_eq!(line.recv().await.as_deref(), Some("(Private) bob: hi alice"));

        hub.stop().await;
    }

    #[tokio::test]
    async fn stop_closes_clients_gracefully() {
        let hub = start(
            HubConfig::default()
                .with_line(local())
                .with_websocket(local()),
        )
        .await;
        let mut line = LineClient::login(hub.line_addr().unwrap(), "alice").await;
        let mut ws = ws_login(hub.ws_addr().unwrap(), "bob").await;
        assert_eq!(line.recv().await.as_deref(), Some("STATUS:bob:online"));

        hub.stop().await;

        assert_eq!(line.recv().await, None);
        let closing = tokio::time::timeout(WAIT, ws.next()).await.unwrap();
        assert!(matches!(closing, Some(Ok(Message::Close(_))) | None));
    }

    #[tokio::test]
    async fn many_hubs_coexist() {
        let first = start(HubConfig::default().with_line(local())).await;
        let second = start(HubConfig::default().with_line(local())).await;
        assert_ne!(first.line_addr(), second.line_addr());

        let _a = LineClient::login(first.line_addr().unwrap(), "alice").await;
        let _b = LineClient::login(second.line_addr().unwrap(), "alice").await;
        wait_for_count(&first, 1).await;
        wait_for_count(&second, 1).await;

        first.stop().await;
        second.stop().await;
    }
}
