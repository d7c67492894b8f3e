//! WebSocket client for a room server.
//!
//! Provides:
//! - Connection lifecycle (connect, disconnect)
//! - Joining and leaving rooms
//! - A local [`DocumentReplica`] that applies edits optimistically and is
//!   overwritten by remote updates
//! - The room's participant list and typing indicator
//!
//! Inbound frames update the shared state first and are then surfaced as
//! [`SyncEvent`]s, so a UI reacting to an event always reads state that
//! already includes it.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::presence::ParticipantList;
use crate::protocol::{ClientMessage, Language, ProtocolError, ServerMessage};
use crate::replica::DocumentReplica;
use crate::typing::TypingIndicator;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the sync client.
///
/// Events are advisory: when the receiver falls behind they are dropped,
/// while the client's state keeps following the room.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Connected,
    Disconnected,
    ParticipantsUpdated(ParticipantList),
    CodeUpdated(String),
    LanguageUpdated(Language),
    UserTyping(String),
    /// The typing indicator's window ran out.
    TypingCleared,
}

/// The room this client is currently in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRoom {
    pub room_id: String,
    pub user_name: String,
}

pub struct SyncClient {
    server_url: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Inbound room frames are applied only while this is set.
    joined: Arc<RwLock<Option<JoinedRoom>>>,
    replica: Arc<RwLock<DocumentReplica>>,
    participants: Arc<RwLock<ParticipantList>>,
    typing: Arc<Mutex<TypingIndicator>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,
    event_rx: Option<mpsc::Receiver<SyncEvent>>,
    event_tx: mpsc::Sender<SyncEvent>,
}

/// Queue an event without waiting. State is already applied, so an event
/// that does not fit is only logged.
fn emit(event_tx: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = event_tx.try_send(event) {
        log::debug!("Event queue full, dropping {event:?}");
    }
}

/// Clear the typing indicator once `deadline` passes, unless a newer
/// typing event moved it.
fn spawn_typing_timer(
    deadline: Instant,
    typing: Arc<Mutex<TypingIndicator>>,
    event_tx: mpsc::Sender<SyncEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        let now = Instant::now().max(deadline);
        if typing.lock().await.poll_expired_at(now) {
            emit(&event_tx, SyncEvent::TypingCleared);
        }
    })
}

impl SyncClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            joined: Arc::new(RwLock::new(None)),
            replica: Arc::new(RwLock::new(DocumentReplica::new())),
            participants: Arc::new(RwLock::new(Vec::new())),
            typing: Arc::new(Mutex::new(TypingIndicator::new())),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SyncEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    /// No room is joined until [`join_room`](Self::join_room).
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio::time::timeout(
            CONNECT_TIMEOUT,
            tokio_tungstenite::connect_async(self.server_url.as_str()),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => ws_stream,
            Ok(Err(e)) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::Timeout);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        emit(&self.event_tx, SyncEvent::Connected);
        log::info!("Connected to {}", self.server_url);

        // Reader task: apply inbound updates, then surface them
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let joined = self.joined.clone();
        let replica = self.replica.clone();
        let participants = self.participants.clone();
        let typing = self.typing.clone();
        tokio::spawn(async move {
            let mut typing_timer: Option<JoinHandle<()>> = None;

            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let server_msg = match ServerMessage::decode(text.as_str()) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("Ignoring frame from server: {e}");
                                continue;
                            }
                        };

                        // Held while applying, so leave_room cannot reset in between.
                        let in_room = joined.read().await;
                        if in_room.is_none() {
                            log::debug!("Ignoring {} outside a room", server_msg.event_name());
                            continue;
                        }

                        let event = match &server_msg {
                            ServerMessage::UserJoined(list) => {
                                participants.write().await.clone_from(list);
                                SyncEvent::ParticipantsUpdated(list.clone())
                            }
                            ServerMessage::CodeUpdate(text) => {
                                replica.write().await.apply_remote(&server_msg);
                                SyncEvent::CodeUpdated(text.clone())
                            }
                            ServerMessage::LanguageUpdate(language) => {
                                replica.write().await.apply_remote(&server_msg);
                                SyncEvent::LanguageUpdated(language.clone())
                            }
                            ServerMessage::UserTyping(name) => {
                                let deadline = {
                                    let mut indicator = typing.lock().await;
                                    indicator.notify(name.clone());
                                    indicator.deadline()
                                };
                                if let Some(previous) = typing_timer.take() {
                                    previous.abort();
                                }
                                typing_timer = deadline.map(|deadline| {
                                    spawn_typing_timer(deadline, typing.clone(), event_tx.clone())
                                });
                                SyncEvent::UserTyping(name.clone())
                            }
                        };
                        drop(in_room);
                        emit(&event_tx, event);
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            if let Some(timer) = typing_timer {
                timer.abort();
            }
            *state.write().await = ConnectionState::Disconnected;
            emit(&event_tx, SyncEvent::Disconnected);
        });

        Ok(())
    }

    /// Close the connection. The server treats this like a leave.
    pub async fn disconnect(&mut self) {
        // Dropping the sender ends the writer task, which closes the socket.
        self.outgoing_tx = None;
        *self.joined.write().await = None;
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let frame = msg.encode()?;
        match self.outgoing_tx {
            Some(ref tx) => tx.send(frame).await.map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Drop everything that belonged to the previous room.
    async fn reset_room_state(&self) {
        self.replica.write().await.reset();
        self.participants.write().await.clear();
        self.typing.lock().await.clear();
    }

    /// Join a room under a display name.
    ///
    /// Switching rooms resets the local replica, participant list and
    /// typing indicator; the new room's state arrives from the server.
    pub async fn join_room(
        &mut self,
        room_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Result<(), ProtocolError> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(ProtocolError::ConnectionClosed);
        }
        let joined = JoinedRoom { room_id: room_id.into(), user_name: user_name.into() };
        let msg = ClientMessage::join(joined.room_id.clone(), joined.user_name.clone());

        // Marked joined before sending so the server's reply is not ignored.
        let previous = {
            let mut current = self.joined.write().await;
            let previous = current.replace(joined);
            if previous.is_some() {
                self.reset_room_state().await;
            }
            previous
        };

        if let Err(e) = self.send(msg).await {
            *self.joined.write().await = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Leave the current room and reset local state.
    pub async fn leave_room(&mut self) -> Result<(), ProtocolError> {
        let result = self.send(ClientMessage::Leave).await;
        let mut joined = self.joined.write().await;
        *joined = None;
        self.reset_room_state().await;
        result
    }

    /// Apply a local edit and announce it, followed by a typing notice.
    pub async fn edit(&self, text: impl Into<String>) -> Result<(), ProtocolError> {
        let joined = self.joined.read().await.clone().ok_or(ProtocolError::NotJoined)?;
        let change = self.replica.write().await.local_edit(&joined.room_id, text);
        self.send(change).await?;
        self.send(ClientMessage::typing(joined.room_id, joined.user_name)).await
    }

    /// Switch the room's language locally and announce it.
    pub async fn change_language(&self, language: impl Into<Language>) -> Result<(), ProtocolError> {
        let joined = self.joined.read().await.clone().ok_or(ProtocolError::NotJoined)?;
        let change = self
            .replica
            .write()
            .await
            .local_language(&joined.room_id, language);
        self.send(change).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Snapshot of the local replica.
    pub async fn replica(&self) -> DocumentReplica {
        self.replica.read().await.clone()
    }

    pub async fn participants(&self) -> ParticipantList {
        self.participants.read().await.clone()
    }

    /// Current typing label, if its window is still open.
    pub async fn typing_label(&self) -> Option<String> {
        self.typing.lock().await.label()
    }

    pub async fn joined_room(&self) -> Option<JoinedRoom> {
        self.joined.read().await.clone()
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
