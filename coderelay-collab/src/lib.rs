//! # coderelay-collab: Real-time shared code rooms
//!
//! Lets several participants edit one text document together, see who is
//! in the room, see who is typing, and agree on a highlighting language.
//! Replication is last write wins: every edit ships the full text and the
//! latest write the server applies is what everyone ends up with.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   WebSocket (JSON)   ┌───────────────────┐
//! │ SyncClient  │ ◄──────────────────► │ SyncServer        │
//! │ (per user)  │                      │ ConnectionSession │ (per socket)
//! └──────┬──────┘                      └─────────┬─────────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌──────────────────┐                 ┌───────────────────┐
//! │ DocumentReplica  │                 │ RoomRegistry      │
//! │ TypingIndicator  │                 │  └─ Room          │
//! └──────────────────┘                 │     ├─ Document   │
//!                                      │     └─ Broadcast  │
//!                                      └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: event names, payloads and the JSON frame codec
//! - [`broadcast`]: per-room fan-out with echo suppression
//! - [`registry`]: rooms, membership and document state
//! - [`presence`]: participant-list derivation and push
//! - [`session`]: per-connection join/leave state machine
//! - [`server`]: WebSocket server
//! - [`client`]: WebSocket client
//! - [`replica`]: client-local document mirror
//! - [`typing`]: client-local typing indicator

pub mod protocol;
pub mod broadcast;
pub mod registry;
pub mod presence;
pub mod session;
pub mod server;
pub mod client;
pub mod replica;
pub mod typing;

/// Identifies one live connection. Reconnecting yields a new id.
pub type ConnectionId = uuid::Uuid;

// Re-exports for convenience
pub use protocol::{ClientMessage, Language, ProtocolError, ServerMessage};
pub use broadcast::{BroadcastGroup, BroadcastStats, Outbound};
pub use registry::{Document, JoinOutcome, LeaveOutcome, Participant, Room, RoomRegistry};
pub use presence::ParticipantList;
pub use session::{ConnectionSession, SessionState};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use client::{ConnectionState, JoinedRoom, SyncClient, SyncEvent};
pub use replica::{DocumentReplica, PLACEHOLDER_TEXT};
pub use typing::{TypingIndicator, TYPING_WINDOW};
