//! Connection to a single audio node: WebSocket lifecycle plus REST access.
//!
//! A [`NodeClient`] owns one WebSocket to the node and republishes everything
//! it reads as [`NodeSignal`]s on an internal channel; the manager consumes
//! those signals and routes them to player sessions. Reconnection is handled
//! here with a bounded, cancelable retry timer.

pub mod rest;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    IncomingMessage, NodeEvent, NodeStats, PlayerStateSnapshot, PlayerUpdate, ResumeSession,
};

pub use rest::RestClient;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Lifecycle of the node WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Everything a node reports upward to the manager.
#[derive(Debug)]
pub enum NodeSignal {
    Ready {
        node: String,
        session_id: String,
        resumed: bool,
    },
    Stats {
        node: String,
        stats: NodeStats,
    },
    PlayerUpdate {
        node: String,
        guild_id: String,
        state: PlayerStateSnapshot,
    },
    Event {
        node: String,
        event: NodeEvent,
    },
    Disconnected {
        node: String,
        reason: String,
    },
    /// All retry attempts for the current outage were spent.
    ReconnectExhausted {
        node: String,
    },
    /// A recoverable node-level problem, e.g. an unparseable frame.
    Error {
        node: String,
        message: String,
    },
}

/// Client for one configured audio node.
pub struct NodeClient {
    config: NodeConfig,
    identifier: String,
    user_id: String,
    rest: RestClient,
    state: Mutex<NodeState>,
    session_id: Mutex<Option<String>>,
    stats: Mutex<Option<NodeStats>>,
    ws_tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    signals: mpsc::UnboundedSender<NodeSignal>,
    reconnect_attempts: AtomicU32,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl NodeClient {
    pub fn new(
        config: NodeConfig,
        user_id: impl Into<String>,
        signals: mpsc::UnboundedSender<NodeSignal>,
    ) -> Result<Self> {
        let rest = RestClient::new(&config)?;
        let identifier = config.identifier();
        let session_id = config.session_id.clone();
        Ok(Self {
            config,
            identifier,
            user_id: user_id.into(),
            rest,
            state: Mutex::new(NodeState::Idle),
            session_id: Mutex::new(session_id),
            stats: Mutex::new(None),
            ws_tx: Mutex::new(None),
            signals,
            reconnect_attempts: AtomicU32::new(0),
            reconnect_timer: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    pub fn connected(&self) -> bool {
        self.state() == NodeState::Connected
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn stats(&self) -> Option<NodeStats> {
        self.stats.lock().clone()
    }

    fn ws_url(&self) -> String {
        let scheme = if self.config.secure { "wss" } else { "ws" };
        format!(
            "{}://{}:{}/v4/websocket",
            scheme, self.config.host, self.config.port
        )
    }

    fn ws_request(&self) -> Result<tungstenite::handshake::client::Request> {
        let mut request = self.ws_url().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", header_value(&self.config.password)?);
        headers.insert("User-Id", header_value(&self.user_id)?);
        headers.insert(
            "Client-Name",
            header_value(concat!("wavelink/", env!("CARGO_PKG_VERSION")))?,
        );
        // A known session id asks the node to resume instead of starting fresh.
        if let Some(session_id) = self.session_id() {
            headers.insert("Session-Id", header_value(&session_id)?);
        }
        Ok(request)
    }

    /// Opens the WebSocket and spawns the read/write tasks.
    ///
    /// On handshake failure the error is returned *and* a bounded reconnect is
    /// scheduled, so callers may simply log it.
    pub async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) || self.connected() {
            return Ok(());
        }
        *self.state.lock() = NodeState::Connecting;
        let request = self.ws_request()?;

        match connect_async(request).await {
            Ok((socket, _)) => {
                let (sink, stream) = socket.split();
                let (tx, rx) = mpsc::unbounded_channel();
                *self.ws_tx.lock() = Some(tx);
                *self.state.lock() = NodeState::Connected;
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                info!(node = %self.identifier, "🔌 Conectado al nodo de audio");

                tokio::spawn(write_loop(sink, rx));
                tokio::spawn(self.clone().read_loop(stream));
                Ok(())
            }
            Err(e) => {
                *self.state.lock() = NodeState::Disconnected;
                warn!(node = %self.identifier, error = %e, "node handshake failed");
                self.schedule_reconnect();
                Err(e.into())
            }
        }
    }

    async fn read_loop(self: Arc<Self>, mut stream: WsStream) {
        let mut close_reason = String::from("stream ended");
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_text(&text),
                Ok(Message::Ping(data)) => {
                    if let Some(tx) = self.ws_tx.lock().as_ref() {
                        let _ = tx.send(Message::Pong(data));
                    }
                }
                Ok(Message::Close(frame)) => {
                    close_reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "closed by node".to_string());
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    close_reason = e.to_string();
                    break;
                }
            }
        }
        self.handle_disconnect(close_reason);
    }

    fn handle_text(self: &Arc<Self>, text: &str) {
        let message: IncomingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                // Bad frame, but the socket itself is fine; report and move on.
                warn!(node = %self.identifier, error = %e, "unparseable node message");
                let _ = self.signals.send(NodeSignal::Error {
                    node: self.identifier.clone(),
                    message: format!("unparseable message: {e}"),
                });
                return;
            }
        };

        match message {
            IncomingMessage::Ready { session_id, resumed } => {
                info!(node = %self.identifier, resumed, "✅ Nodo listo");
                *self.session_id.lock() = Some(session_id.clone());
                if self.config.resume && !resumed {
                    self.spawn_resume_negotiation(session_id.clone());
                }
                self.spawn_info_fetch();
                let _ = self.signals.send(NodeSignal::Ready {
                    node: self.identifier.clone(),
                    session_id,
                    resumed,
                });
            }
            IncomingMessage::Stats(stats) => {
                *self.stats.lock() = Some(stats.clone());
                let _ = self.signals.send(NodeSignal::Stats {
                    node: self.identifier.clone(),
                    stats,
                });
            }
            IncomingMessage::PlayerUpdate { guild_id, state } => {
                let _ = self.signals.send(NodeSignal::PlayerUpdate {
                    node: self.identifier.clone(),
                    guild_id,
                    state,
                });
            }
            IncomingMessage::Event(event) => {
                let _ = self.signals.send(NodeSignal::Event {
                    node: self.identifier.clone(),
                    event,
                });
            }
        }
    }

    fn spawn_resume_negotiation(self: &Arc<Self>, session_id: String) {
        let node = self.clone();
        tokio::spawn(async move {
            let body = ResumeSession {
                resuming: true,
                timeout: node.config.resume_timeout,
            };
            match node.rest.configure_resuming(&session_id, &body).await {
                Ok(()) => debug!(node = %node.identifier, "session resuming enabled"),
                Err(e) => warn!(node = %node.identifier, error = %e, "failed to enable resuming"),
            }
        });
    }

    fn spawn_info_fetch(self: &Arc<Self>) {
        let node = self.clone();
        tokio::spawn(async move {
            match node.rest.fetch_info().await {
                Ok(info) => {
                    info!(
                        node = %node.identifier,
                        version = %info.version.semver,
                        sources = info.source_managers.len(),
                        "📋 Info del nodo"
                    );
                }
                Err(e) => warn!(node = %node.identifier, error = %e, "info fetch failed"),
            }
        });
    }

    fn handle_disconnect(self: &Arc<Self>, reason: String) {
        *self.ws_tx.lock() = None;
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = NodeState::Disconnected;
        warn!(node = %self.identifier, %reason, "node disconnected");
        let _ = self.signals.send(NodeSignal::Disconnected {
            node: self.identifier.clone(),
            reason,
        });
        self.schedule_reconnect();
    }

    /// Schedules one reconnect attempt after `retry_delay`.
    ///
    /// Returns `false` once the attempt budget for the current outage is
    /// spent; a [`NodeSignal::ReconnectExhausted`] is emitted in that case.
    /// Any previously pending timer is canceled first.
    pub fn schedule_reconnect(self: &Arc<Self>) -> bool {
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > self.config.retry_amount {
            error!(node = %self.identifier, "❌ Sin reintentos restantes, nodo abandonado");
            let _ = self.signals.send(NodeSignal::ReconnectExhausted {
                node: self.identifier.clone(),
            });
            return false;
        }

        *self.state.lock() = NodeState::Reconnecting;
        info!(
            node = %self.identifier,
            attempt,
            max = self.config.retry_amount,
            delay = ?self.config.retry_delay,
            "🔁 Reintentando conexión"
        );

        let node = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(node.config.retry_delay).await;
            if let Err(e) = node.connect().await {
                debug!(node = %node.identifier, error = %e, "reconnect attempt failed");
            }
        });
        if let Some(previous) = self.reconnect_timer.lock().replace(handle) {
            previous.abort();
        }
        true
    }

    /// Queues a raw frame for the node; fails synchronously unless connected.
    pub fn send(&self, message: Message) -> Result<()> {
        if self.state() != NodeState::Connected {
            return Err(Error::NodeNotConnected(self.identifier.clone()));
        }
        match self.ws_tx.lock().as_ref() {
            Some(tx) => tx
                .send(message)
                .map_err(|_| Error::NodeNotConnected(self.identifier.clone())),
            None => Err(Error::NodeNotConnected(self.identifier.clone())),
        }
    }

    /// Partial player update; requires a live session id.
    pub async fn update_player(
        &self,
        guild_id: &str,
        update: &PlayerUpdate,
        no_replace: bool,
    ) -> Result<()> {
        let session_id = self
            .session_id()
            .ok_or_else(|| Error::NoSessionId(self.identifier.clone()))?;
        self.rest
            .update_player(&session_id, guild_id, update, no_replace)
            .await
    }

    /// Removes the server-side player for `guild_id`.
    pub async fn destroy_player(&self, guild_id: &str) -> Result<()> {
        let session_id = self
            .session_id()
            .ok_or_else(|| Error::NoSessionId(self.identifier.clone()))?;
        self.rest.destroy_player(&session_id, guild_id).await
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: NodeState) {
        *self.state.lock() = state;
    }

    #[cfg(test)]
    pub(crate) fn force_stats(&self, stats: NodeStats) {
        *self.stats.lock() = Some(stats);
    }

    /// Tears the connection down for good; no reconnect will follow.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        if let Some(timer) = self.reconnect_timer.lock().take() {
            timer.abort();
        }
        // Dropping the sender ends the write loop, which closes the socket.
        *self.ws_tx.lock() = None;
        *self.state.lock() = NodeState::Disconnected;
        info!(node = %self.identifier, "node destroyed");
    }
}

async fn write_loop(mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
    let _ = sink.close().await;
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::from(tungstenite::Error::HttpFormat(e.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn test_node(retry_amount: u32) -> (Arc<NodeClient>, mpsc::UnboundedReceiver<NodeSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = NodeConfig {
            retry_amount,
            // Long enough that no timer fires during a test.
            retry_delay: Duration::from_secs(600),
            ..NodeConfig::new("127.0.0.1", 2333, "youshallnotpass")
        };
        (
            Arc::new(NodeClient::new(config, "user-1", tx).unwrap()),
            rx,
        )
    }

    #[test]
    fn test_ws_url_respects_secure_flag() {
        let (node, _rx) = test_node(1);
        assert_eq!(node.ws_url(), "ws://127.0.0.1:2333/v4/websocket");

        let (tx, _rx) = mpsc::unbounded_channel();
        let secure = NodeClient::new(
            NodeConfig {
                secure: true,
                ..NodeConfig::new("lava.example", 443, "pw")
            },
            "user-1",
            tx,
        )
        .unwrap();
        assert_eq!(secure.ws_url(), "wss://lava.example:443/v4/websocket");
    }

    #[test]
    fn test_send_fails_synchronously_when_not_connected() {
        let (node, _rx) = test_node(1);
        let result = node.send(Message::Text("{}".to_string()));
        assert!(matches!(result, Err(Error::NodeNotConnected(_))));
    }

    #[tokio::test]
    async fn test_reconnect_budget_is_bounded() {
        let (node, mut rx) = test_node(2);

        assert!(node.schedule_reconnect());
        assert_eq!(node.state(), NodeState::Reconnecting);
        assert!(node.schedule_reconnect());
        assert!(!node.schedule_reconnect());

        let mut exhausted = false;
        while let Ok(signal) = rx.try_recv() {
            if matches!(signal, NodeSignal::ReconnectExhausted { .. }) {
                exhausted = true;
            }
        }
        assert!(exhausted);

        node.destroy();
        assert_eq!(node.state(), NodeState::Disconnected);
    }

    #[tokio::test]
    async fn test_update_player_requires_session_id() {
        let (node, _rx) = test_node(1);
        let result = node
            .update_player("guild", &PlayerUpdate::default(), false)
            .await;
        assert!(matches!(result, Err(Error::NoSessionId(_))));
    }
}
