//! WebSocket room server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                         ┌── Room "ABC123" ── BroadcastGroup
//!             ├── ConnectionSession ───┤
//! Client B ──┘        (per socket)     └── Room "XYZ"    ── BroadcastGroup
//!                          │
//!                     RoomRegistry
//! ```
//!
//! Each accepted socket gets its own task running a `select!` over three
//! sources: inbound frames, the room fan-out, and a heartbeat tick. When
//! the socket closes, errors, or misses heartbeats, the session is torn
//! down exactly like an explicit `leave`.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::protocol::ClientMessage;
use crate::registry::RoomRegistry;
use crate::session::ConnectionSession;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    /// Seconds between server pings
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Seconds of inbound silence after which a connection is dropped
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted document, in bytes (None = unlimited)
    #[serde(default)]
    pub max_document_bytes: Option<usize>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_heartbeat_timeout_secs() -> u64 {
    45
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            broadcast_capacity: default_broadcast_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            max_document_bytes: None,
        }
    }
}

impl ServerConfig {
    fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs.max(1))
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    /// Frames that could not be decoded and were dropped.
    pub dropped_frames: u64,
    pub active_rooms: usize,
}

#[derive(Default)]
struct AtomicServerStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
    dropped_frames: AtomicU64,
}

/// The room server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    stats: Arc<AtomicServerStats>,
}

impl SyncServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = RoomRegistry::new(config.broadcast_capacity)
            .with_max_document_bytes(config.max_document_bytes);
        Self {
            config,
            registry: Arc::new(registry),
            stats: Arc::new(AtomicServerStats::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind to the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        log::info!("Room server listening on {}", listener.local_addr()?);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, registry, stats, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<RoomRegistry>,
        stats: Arc<AtomicServerStats>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let mut session = ConnectionSession::new(registry);
        log::info!("WebSocket connection {} established from {addr}", session.id());

        stats.total_connections.fetch_add(1, Ordering::Relaxed);
        stats.active_connections.fetch_add(1, Ordering::Relaxed);

        let result = Self::pump(ws_stream, addr, &mut session, &stats, &config).await;

        // Abrupt drops get the same cleanup as a graceful leave.
        session.disconnect().await;
        stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        log::info!("Connection {} from {addr} closed", session.id());

        result
    }

    async fn pump(
        ws_stream: WebSocketStream<TcpStream>,
        addr: SocketAddr,
        session: &mut ConnectionSession,
        stats: &AtomicServerStats,
        config: &ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let mut heartbeat = tokio::time::interval(config.heartbeat_interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    last_seen = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            stats.total_messages.fetch_add(1, Ordering::Relaxed);
                            match ClientMessage::decode(text.as_str()) {
                                Ok(client_msg) => {
                                    log::debug!("{} from {}", client_msg.event_name(), session.id());
                                    for reply in session.handle(client_msg).await {
                                        let frame = reply.encode()?;
                                        ws_sender.send(Message::Text(frame.into())).await?;
                                    }
                                }
                                Err(e) => {
                                    stats.dropped_frames.fetch_add(1, Ordering::Relaxed);
                                    log::warn!("Dropping frame from {addr}: {e}");
                                }
                            }
                        }

                        Some(Ok(Message::Binary(_))) => {
                            stats.dropped_frames.fetch_add(1, Ordering::Relaxed);
                            log::warn!("Ignoring binary frame from {addr}");
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::debug!("Close from {addr}");
                            return Ok(());
                        }

                        Some(Err(e)) => {
                            log::warn!("WebSocket error from {addr}: {e}");
                            return Ok(());
                        }

                        _ => {}
                    }
                }

                out = session.next_outbound() => {
                    ws_sender.send(Message::Text(out.frame.clone().into())).await?;
                }

                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > config.heartbeat_timeout() {
                        log::info!("Connection {} from {addr} missed heartbeats", session.id());
                        return Ok(());
                    }
                    ws_sender.send(Message::Ping(Default::default())).await?;
                }
            }
        }
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            total_messages: self.stats.total_messages.load(Ordering::Relaxed),
            dropped_frames: self.stats.dropped_frames.load(Ordering::Relaxed),
            active_rooms: self.registry.room_count().await,
        }
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}
