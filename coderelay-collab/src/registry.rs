//! In-memory room registry.
//!
//! ```text
//!   RoomRegistry
//!   ├── index (Mutex) ── room id ──────► Arc<Mutex<Room>>
//!   │                └── connection id ─► room id
//!   └── Room
//!       ├── participants (join order)
//!       ├── document (text + language, last write wins)
//!       └── BroadcastGroup (fan-out to members)
//! ```
//!
//! Every mutation of a room happens while that room's mutex is held, and
//! the fan-out triggered by the mutation is queued before the mutex is
//! released. Different rooms never contend except on the brief index
//! lookup.
//!
//! Lock order is always index, then room.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

use crate::broadcast::{BroadcastGroup, Outbound};
use crate::presence::{self, ParticipantList};
use crate::protocol::{Language, ServerMessage};
use crate::ConnectionId;

/// One joined connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub display_name: String,
}

/// Shared document state of a room.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub text: String,
    pub language: Language,
    /// Number of text writes applied; zero means never written.
    pub text_revision: u64,
    /// Number of language writes applied; zero means never set.
    pub language_revision: u64,
}

impl Document {
    /// Messages that bring a freshly joined replica up to date.
    ///
    /// Only state that someone actually wrote is included, so joining an
    /// untouched room leaves the client's own placeholder alone.
    pub fn snapshot(&self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        if self.text_revision > 0 {
            messages.push(ServerMessage::CodeUpdate(self.text.clone()));
        }
        if self.language_revision > 0 {
            messages.push(ServerMessage::LanguageUpdate(self.language.clone()));
        }
        messages
    }
}

/// A shared editing room.
pub struct Room {
    id: String,
    participants: Vec<Participant>,
    document: Document,
    broadcast: BroadcastGroup,
}

impl Room {
    pub fn new(id: impl Into<String>, broadcast_capacity: usize) -> Self {
        Self {
            id: id.into(),
            participants: Vec::new(),
            document: Document::default(),
            broadcast: BroadcastGroup::new(broadcast_capacity),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn broadcast(&self) -> &BroadcastGroup {
        &self.broadcast
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn add_participant(&mut self, participant: Participant) {
        self.participants.push(participant);
    }

    pub fn remove_participant(&mut self, connection_id: ConnectionId) -> Option<Participant> {
        let pos = self
            .participants
            .iter()
            .position(|p| p.connection_id == connection_id)?;
        Some(self.participants.remove(pos))
    }

    fn fan_out(&self, origin: ConnectionId, msg: &ServerMessage) -> usize {
        match self.broadcast.send(Some(origin), msg) {
            Ok(count) => count,
            Err(e) => {
                log::error!("Failed to encode {} for room {}: {e}", msg.event_name(), self.id);
                0
            }
        }
    }
}

/// Result of a join.
pub struct JoinOutcome {
    /// Participant list after the join, as broadcast to the room.
    pub participants: ParticipantList,
    /// Messages to deliver to the joiner only (current document state).
    pub snapshot: Vec<ServerMessage>,
    /// The joiner's subscription to the room's fan-out. It already holds
    /// the participant list queued by this join.
    pub inbox: broadcast::Receiver<Arc<Outbound>>,
    /// Whether the room did not exist before this join.
    pub created: bool,
}

/// Result of a leave.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaveOutcome {
    pub room_id: String,
    /// Participant list after the leave, as broadcast to remaining members.
    pub participants: ParticipantList,
    /// Whether the room was dropped because nobody is left.
    pub evicted: bool,
}

#[derive(Default)]
struct Index {
    rooms: HashMap<String, Arc<Mutex<Room>>>,
    memberships: HashMap<ConnectionId, String>,
}

/// Server-side store of all rooms.
///
/// Rooms are created by the first join and evicted as soon as their last
/// participant leaves. A room id that is not currently live behaves like an
/// empty room; nothing here ever fails with "room not found".
pub struct RoomRegistry {
    index: Mutex<Index>,
    broadcast_capacity: usize,
    max_document_bytes: Option<usize>,
}

impl RoomRegistry {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            index: Mutex::new(Index::default()),
            broadcast_capacity,
            max_document_bytes: None,
        }
    }

    /// Reject document writes larger than `limit` bytes.
    pub fn with_max_document_bytes(mut self, limit: Option<usize>) -> Self {
        self.max_document_bytes = limit;
        self
    }

    /// Add a connection to a room, creating the room if needed.
    ///
    /// A connection that is already in a room leaves it first. The updated
    /// participant list is broadcast to every member, the joiner included.
    pub async fn join(
        &self,
        room_id: &str,
        connection_id: ConnectionId,
        display_name: &str,
    ) -> JoinOutcome {
        let mut index = self.index.lock().await;

        if index.memberships.contains_key(&connection_id) {
            Self::leave_locked(&mut index, connection_id).await;
        }

        let created = !index.rooms.contains_key(room_id);
        let room = index
            .rooms
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Room::new(room_id, self.broadcast_capacity))))
            .clone();
        index.memberships.insert(connection_id, room_id.to_string());

        let mut room = room.lock().await;
        let inbox = room.broadcast().subscribe();
        room.add_participant(Participant {
            connection_id,
            display_name: display_name.to_string(),
        });
        presence::broadcast_participants(&room);

        if created {
            log::info!("Room {room_id} created");
        }
        log::info!("{display_name} ({connection_id}) joined room {room_id}");

        JoinOutcome {
            participants: presence::participant_list(room.participants()),
            snapshot: room.document().snapshot(),
            inbox,
            created,
        }
    }

    /// Remove a connection from whatever room it occupies.
    ///
    /// Returns `None` if the connection was not in a room.
    pub async fn leave(&self, connection_id: ConnectionId) -> Option<LeaveOutcome> {
        let mut index = self.index.lock().await;
        Self::leave_locked(&mut index, connection_id).await
    }

    async fn leave_locked(index: &mut Index, connection_id: ConnectionId) -> Option<LeaveOutcome> {
        let room_id = index.memberships.remove(&connection_id)?;
        let room_arc = index.rooms.get(&room_id)?.clone();
        let mut room = room_arc.lock().await;

        if let Some(p) = room.remove_participant(connection_id) {
            log::info!("{} ({connection_id}) left room {room_id}", p.display_name);
        }

        let evicted = room.is_empty();
        if evicted {
            index.rooms.remove(&room_id);
            log::info!("Room {room_id} removed (empty)");
        } else {
            presence::broadcast_participants(&room);
        }

        Some(LeaveOutcome {
            room_id,
            participants: presence::participant_list(room.participants()),
            evicted,
        })
    }

    async fn room(&self, room_id: &str) -> Option<Arc<Mutex<Room>>> {
        self.index.lock().await.rooms.get(room_id).cloned()
    }

    /// Replace the room's text and fan it out to everyone but `origin`.
    ///
    /// Returns `false` if the room is not live or the text is over the
    /// configured size limit.
    pub async fn update_document(&self, room_id: &str, origin: ConnectionId, text: String) -> bool {
        if let Some(limit) = self.max_document_bytes {
            if text.len() > limit {
                log::warn!(
                    "Dropping {} byte document for room {room_id} from {origin} (limit {limit})",
                    text.len()
                );
                return false;
            }
        }

        let Some(room) = self.room(room_id).await else {
            log::debug!("codeChange for unknown room {room_id} ignored");
            return false;
        };
        let mut room = room.lock().await;
        room.document.text = text;
        room.document.text_revision += 1;
        let msg = ServerMessage::CodeUpdate(room.document.text.clone());
        room.fan_out(origin, &msg);
        true
    }

    /// Replace the room's language and fan it out to everyone but `origin`.
    pub async fn update_language(&self, room_id: &str, origin: ConnectionId, language: Language) -> bool {
        let Some(room) = self.room(room_id).await else {
            log::debug!("languageChange for unknown room {room_id} ignored");
            return false;
        };
        let mut room = room.lock().await;
        log::debug!("Room {room_id} language set to {language}");
        room.document.language = language;
        room.document.language_revision += 1;
        let msg = ServerMessage::LanguageUpdate(room.document.language.clone());
        room.fan_out(origin, &msg);
        true
    }

    /// Tell everyone but `origin` that `display_name` is typing. Nothing is stored.
    pub async fn relay_typing(&self, room_id: &str, origin: ConnectionId, display_name: &str) -> bool {
        let Some(room) = self.room(room_id).await else {
            return false;
        };
        let room = room.lock().await;
        room.fan_out(origin, &ServerMessage::UserTyping(display_name.to_string()));
        true
    }

    /// Bring a member whose inbox overflowed back in line with the room.
    ///
    /// Under the room lock, discards everything still queued in `inbox`
    /// (all of it predates the lock) and returns the full current state:
    /// the participant list followed by the written document fields.
    /// Anything the room sends afterwards arrives through `inbox` as usual.
    pub async fn resync(
        &self,
        room_id: &str,
        inbox: &mut broadcast::Receiver<Arc<Outbound>>,
    ) -> Vec<ServerMessage> {
        let Some(room) = self.room(room_id).await else {
            return Vec::new();
        };
        let room = room.lock().await;

        let mut discarded = 0usize;
        loop {
            match inbox.try_recv() {
                Ok(_) => discarded += 1,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        log::debug!("Resync for room {room_id} discarded {discarded} queued frames");

        let mut messages = vec![ServerMessage::UserJoined(presence::participant_list(room.participants()))];
        messages.extend(room.document().snapshot());
        messages
    }

    pub async fn current_participants(&self, room_id: &str) -> ParticipantList {
        match self.room(room_id).await {
            Some(room) => presence::participant_list(room.lock().await.participants()),
            None => Vec::new(),
        }
    }

    pub async fn current_document(&self, room_id: &str) -> Document {
        match self.room(room_id).await {
            Some(room) => room.lock().await.document().clone(),
            None => Document::default(),
        }
    }

    /// Room currently occupied by a connection.
    pub async fn room_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.index.lock().await.memberships.get(&connection_id).cloned()
    }

    pub async fn room_count(&self) -> usize {
        self.index.lock().await.rooms.len()
    }

    pub async fn active_rooms(&self) -> Vec<String> {
        self.index.lock().await.rooms.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};
    use uuid::Uuid;

    async fn next_frame(rx: &mut broadcast::Receiver<Arc<Outbound>>) -> Arc<Outbound> {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("frame within timeout")
            .expect("channel open")
    }

    fn user_joined(names: &[&str]) -> String {
        ServerMessage::UserJoined(names.iter().map(|n| n.to_string()).collect())
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_join_creates_room() {
        let registry = RoomRegistry::new(16);
        let alice = Uuid::new_v4();

        let mut outcome = registry.join("ABC123", alice, "Alice").await;
        assert!(outcome.created);
        assert_eq!(outcome.participants, vec!["Alice"]);
        assert!(outcome.snapshot.is_empty());
        assert_eq!(next_frame(&mut outcome.inbox).await.frame, user_joined(&["Alice"]));

        assert_eq!(registry.room_count().await, 1);
        assert_eq!(registry.room_of(alice).await.as_deref(), Some("ABC123"));
    }

    #[tokio::test]
    async fn test_second_join_broadcasts_to_both() {
        let registry = RoomRegistry::new(16);
        let mut a = registry.join("ABC123", Uuid::new_v4(), "Alice").await;
        let _ = next_frame(&mut a.inbox).await;

        let mut b = registry.join("ABC123", Uuid::new_v4(), "Bob").await;
        assert!(!b.created);
        assert_eq!(b.participants, vec!["Alice", "Bob"]);

        let expected = user_joined(&["Alice", "Bob"]);
        assert_eq!(next_frame(&mut a.inbox).await.frame, expected);
        assert_eq!(next_frame(&mut b.inbox).await.frame, expected);
    }

    #[tokio::test]
    async fn test_leave_broadcasts_to_remaining_members() {
        let registry = RoomRegistry::new(16);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let mut a = registry.join("r", alice, "Alice").await;
        let b = registry.join("r", bob, "Bob").await;
        drop(b.inbox);
        let _ = next_frame(&mut a.inbox).await;
        let _ = next_frame(&mut a.inbox).await;

        let outcome = registry.leave(bob).await.unwrap();
        assert_eq!(outcome.room_id, "r");
        assert_eq!(outcome.participants, vec!["Alice"]);
        assert!(!outcome.evicted);
        assert_eq!(next_frame(&mut a.inbox).await.frame, user_joined(&["Alice"]));
        assert!(registry.room_of(bob).await.is_none());
    }

    #[tokio::test]
    async fn test_leave_without_room_is_noop() {
        let registry = RoomRegistry::new(16);
        assert!(registry.leave(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_last_leave_evicts_room() {
        let registry = RoomRegistry::new(16);
        let alice = Uuid::new_v4();
        let _a = registry.join("r", alice, "Alice").await;
        registry.update_document("r", alice, "text".into()).await;

        let outcome = registry.leave(alice).await.unwrap();
        assert!(outcome.evicted);
        assert!(outcome.participants.is_empty());
        assert_eq!(registry.room_count().await, 0);

        // Recreated fresh by the next join.
        let again = registry.join("r", Uuid::new_v4(), "Bob").await;
        assert!(again.created);
        assert!(again.snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_join_while_joined_moves_rooms() {
        let registry = RoomRegistry::new(16);
        let alice = Uuid::new_v4();
        let mut bob = registry.join("one", Uuid::new_v4(), "Bob").await;
        let _ = next_frame(&mut bob.inbox).await;

        let _first = registry.join("one", alice, "Alice").await;
        let second = registry.join("two", alice, "Alice").await;

        assert_eq!(second.participants, vec!["Alice"]);
        assert_eq!(registry.room_of(alice).await.as_deref(), Some("two"));
        assert_eq!(registry.current_participants("one").await, vec!["Bob"]);

        assert_eq!(next_frame(&mut bob.inbox).await.frame, user_joined(&["Bob", "Alice"]));
        assert_eq!(next_frame(&mut bob.inbox).await.frame, user_joined(&["Bob"]));
    }

    #[tokio::test]
    async fn test_code_update_carries_origin() {
        let registry = RoomRegistry::new(16);
        let alice = Uuid::new_v4();
        let mut a = registry.join("r", alice, "Alice").await;
        let _ = next_frame(&mut a.inbox).await;

        assert!(registry.update_document("r", alice, "print(1)".into()).await);
        let out = next_frame(&mut a.inbox).await;
        assert_eq!(out.origin, Some(alice));
        assert!(!out.is_for(alice));
        assert_eq!(out.frame, r#"{"event":"codeUpdate","data":"print(1)"}"#);
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let registry = RoomRegistry::new(16);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _ra = registry.join("r", a, "A").await;
        let _rb = registry.join("r", b, "B").await;

        registry.update_document("r", a, "from A".into()).await;
        registry.update_document("r", b, "from B".into()).await;

        let doc = registry.current_document("r").await;
        assert_eq!(doc.text, "from B");
        assert_eq!(doc.text_revision, 2);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_snapshot() {
        let registry = RoomRegistry::new(16);
        let a = Uuid::new_v4();
        let _ra = registry.join("ABC123", a, "Alice").await;
        registry.update_language("ABC123", a, Language::Python).await;

        let c = registry.join("ABC123", Uuid::new_v4(), "Carol").await;
        assert_eq!(c.snapshot, vec![ServerMessage::LanguageUpdate(Language::Python)]);

        registry.update_document("ABC123", a, "print(1)".into()).await;
        let d = registry.join("ABC123", Uuid::new_v4(), "Dave").await;
        assert_eq!(
            d.snapshot,
            vec![
                ServerMessage::CodeUpdate("print(1)".into()),
                ServerMessage::LanguageUpdate(Language::Python),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_room_is_absorbed() {
        let registry = RoomRegistry::new(16);
        let who = Uuid::new_v4();
        assert!(!registry.update_document("ghost", who, "x".into()).await);
        assert!(!registry.update_language("ghost", who, Language::Java).await);
        assert!(!registry.relay_typing("ghost", who, "x").await);
        assert!(registry.current_participants("ghost").await.is_empty());
        assert_eq!(registry.current_document("ghost").await, Document::default());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_document_size_limit() {
        let registry = RoomRegistry::new(16).with_max_document_bytes(Some(4));
        let a = Uuid::new_v4();
        let _ra = registry.join("r", a, "A").await;

        assert!(registry.update_document("r", a, "1234".into()).await);
        assert!(!registry.update_document("r", a, "12345".into()).await);
        assert_eq!(registry.current_document("r").await.text, "1234");
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let registry = RoomRegistry::new(16);
        let a = Uuid::new_v4();
        let mut one = registry.join("one", a, "A").await;
        let mut two = registry.join("two", Uuid::new_v4(), "B").await;
        let _ = next_frame(&mut one.inbox).await;
        let _ = next_frame(&mut two.inbox).await;

        registry.update_document("one", a, "only here".into()).await;
        assert!(timeout(Duration::from_millis(50), two.inbox.recv()).await.is_err());
        assert_eq!(registry.current_document("two").await.text, "");
    }

    #[tokio::test]
    async fn test_resync_discards_queue_and_returns_state() {
        let registry = RoomRegistry::new(8);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut one = registry.join("r", a, "Alice").await;
        registry.join("r", b, "Bob").await;
        registry.update_language("r", b, Language::Java).await;

        let state = registry.resync("r", &mut one.inbox).await;
        assert_eq!(
            state,
            vec![
                ServerMessage::UserJoined(vec!["Alice".into(), "Bob".into()]),
                ServerMessage::LanguageUpdate(Language::Java),
            ]
        );
        assert!(one.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_resync_for_evicted_room_is_empty() {
        let registry = RoomRegistry::new(8);
        let a = Uuid::new_v4();
        let mut outcome = registry.join("r", a, "Alice").await;
        registry.leave(a).await;
        assert!(registry.resync("r", &mut outcome.inbox).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_joins_are_serialized() {
        let registry = Arc::new(RoomRegistry::new(256));
        let mut handles = Vec::new();
        for i in 0..50 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let outcome = registry.join("busy", Uuid::new_v4(), &format!("user{i}")).await;
                outcome.created
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(registry.current_participants("busy").await.len(), 50);
        assert_eq!(registry.room_count().await, 1);
    }
}
