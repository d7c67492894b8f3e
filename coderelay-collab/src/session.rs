//! Per-connection lifecycle.
//!
//! ```text
//!                join                     join (implicit leave first)
//!   Connected ─────────► Joined(room) ◄──────────────┐
//!       ▲                  │    │                    │
//!       └──── leave ───────┘    └────────────────────┘
//!       │                  │
//!       └── disconnect ────┴──────► Disconnected (terminal)
//! ```
//!
//! A `ConnectionSession` is owned by the task serving one socket. It is
//! the only handle through which that connection touches the registry, and
//! it owns the connection's subscription to its room's fan-out.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::broadcast::Outbound;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::RoomRegistry;
use crate::ConnectionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected but not in any room.
    Connected,
    Joined { room_id: String, display_name: String },
    /// Closed; every further message is ignored.
    Disconnected,
}

pub struct ConnectionSession {
    id: ConnectionId,
    registry: Arc<RoomRegistry>,
    state: SessionState,
    inbox: Option<broadcast::Receiver<Arc<Outbound>>>,
    /// Frames addressed to this connection alone, sent before the inbox.
    pending: VecDeque<Arc<Outbound>>,
    /// Set when the inbox overflowed and the room state must be resent.
    needs_resync: bool,
}

impl ConnectionSession {
    /// Start a session for a freshly established connection.
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self::with_id(Uuid::new_v4(), registry)
    }

    pub fn with_id(id: ConnectionId, registry: Arc<RoomRegistry>) -> Self {
        Self {
            id,
            registry,
            state: SessionState::Connected,
            inbox: None,
            pending: VecDeque::new(),
            needs_resync: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn room_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Joined { room_id, .. } => Some(room_id),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Disconnected
    }

    /// Apply one inbound message.
    ///
    /// Returns the messages addressed to this connection alone (the
    /// document snapshot after a join). Everything else reaches the
    /// connection through [`next_outbound`](Self::next_outbound).
    pub async fn handle(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        if self.is_closed() {
            return Vec::new();
        }

        match msg {
            ClientMessage::Join { room_id, user_name } => self.join(&room_id, &user_name).await,
            ClientMessage::Leave => {
                self.leave().await;
                Vec::new()
            }
            ClientMessage::CodeChange { room_id, code } => {
                self.registry.update_document(&room_id, self.id, code).await;
                Vec::new()
            }
            ClientMessage::LanguageChange { room_id, language } => {
                self.registry.update_language(&room_id, self.id, language).await;
                Vec::new()
            }
            ClientMessage::Typing { room_id, user_name } => {
                self.registry.relay_typing(&room_id, self.id, &user_name).await;
                Vec::new()
            }
        }
    }

    /// Join a room, leaving the current one first if necessary.
    pub async fn join(&mut self, room_id: &str, display_name: &str) -> Vec<ServerMessage> {
        if self.is_closed() {
            return Vec::new();
        }
        if self.room_id().is_some() {
            self.leave().await;
        }

        let outcome = self.registry.join(room_id, self.id, display_name).await;
        self.inbox = Some(outcome.inbox);
        self.state = SessionState::Joined {
            room_id: room_id.to_string(),
            display_name: display_name.to_string(),
        };
        outcome.snapshot
    }

    /// Leave the current room. Returns `false` if not joined.
    pub async fn leave(&mut self) -> bool {
        // Stop receiving before the registry broadcasts the new list, so a
        // departing connection is never sent its own departure.
        self.inbox = None;
        self.pending.clear();
        self.needs_resync = false;
        let left = self.registry.leave(self.id).await.is_some();
        if self.state != SessionState::Disconnected {
            self.state = SessionState::Connected;
        }
        left
    }

    /// Tear the session down. Same cleanup as an explicit leave.
    pub async fn disconnect(&mut self) {
        if self.is_closed() {
            return;
        }
        self.leave().await;
        self.state = SessionState::Disconnected;
        log::debug!("Session {} closed", self.id);
    }

    /// Wait for the next frame this connection should be sent.
    ///
    /// Frames this connection originated are skipped. Pends forever while
    /// not joined, so it can sit in a `select!` next to the socket reader.
    /// Cancel safe.
    ///
    /// If the room's fan-out overflowed this connection's inbox, the
    /// skipped frames are not replayed. Instead the connection is sent the
    /// room's full current state (participant list, then document) and
    /// continues from there.
    pub async fn next_outbound(&mut self) -> Arc<Outbound> {
        loop {
            if let Some(out) = self.pending.pop_front() {
                return out;
            }
            if self.needs_resync {
                // Cleared only once the state is queued, so a cancelled
                // resync is retried on the next call.
                let room_id = self.room_id().map(str::to_owned);
                if let (Some(room_id), Some(rx)) = (room_id, self.inbox.as_mut()) {
                    let state = self.registry.resync(&room_id, rx).await;
                    self.queue_direct(state);
                }
                self.needs_resync = false;
                continue;
            }
            let Some(rx) = self.inbox.as_mut() else {
                return std::future::pending().await;
            };
            match rx.recv().await {
                Ok(out) if out.is_for(self.id) => return out,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Connection {} lagged by {n} messages, resending room state", self.id);
                    self.needs_resync = true;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.inbox = None;
                }
            }
        }
    }

    fn queue_direct(&mut self, messages: Vec<ServerMessage>) {
        for msg in messages {
            match msg.encode() {
                Ok(frame) => self.pending.push_back(Arc::new(Outbound { origin: None, frame })),
                Err(e) => log::error!("Failed to encode {} for {}: {e}", msg.event_name(), self.id),
            }
        }
    }
}
