//! Per-room fan-out with origin tagging.
//!
//! Uses a tokio broadcast channel so one send reaches every subscriber.
//! Each frame carries the connection that caused it; receivers drop
//! frames whose origin is themselves, which is how a sender never sees
//! its own `codeUpdate`/`languageUpdate`/`userTyping` echoed back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::protocol::{ProtocolError, ServerMessage};
use crate::ConnectionId;

/// A pre-encoded frame queued for every member of a room.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Connection that triggered the frame; `None` for server-originated
    /// frames such as participant lists, which go to everyone.
    pub origin: Option<ConnectionId>,
    /// JSON text frame, encoded once for all recipients.
    pub frame: String,
}

impl Outbound {
    /// Whether this frame should be delivered to `connection_id`.
    pub fn is_for(&self, connection_id: ConnectionId) -> bool {
        self.origin != Some(connection_id)
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    /// Sends that found no live subscriber.
    pub messages_unrouted: u64,
    pub subscribers: usize,
}

struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_unrouted: AtomicU64,
}

/// The fan-out channel of a single room.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Arc<Outbound>>,
    /// Frames buffered per receiver before a slow connection starts lagging.
    capacity: usize,
    stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity,
            stats: AtomicBroadcastStats {
                messages_sent: AtomicU64::new(0),
                messages_unrouted: AtomicU64::new(0),
            },
        }
    }

    /// Register a new recipient. Only frames sent after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Outbound>> {
        self.sender.subscribe()
    }

    /// Encode `msg` once and queue it for every subscriber.
    ///
    /// Returns the number of receivers the frame was queued for, which
    /// includes the origin; filtering happens on the receiving side.
    pub fn send(
        &self,
        origin: Option<ConnectionId>,
        msg: &ServerMessage,
    ) -> Result<usize, ProtocolError> {
        let frame = msg.encode()?;
        Ok(self.send_raw(Arc::new(Outbound { origin, frame })))
    }

    /// Queue an already-encoded frame.
    pub fn send_raw(&self, outbound: Arc<Outbound>) -> usize {
        self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(outbound) {
            Ok(count) => count,
            Err(_) => {
                self.stats.messages_unrouted.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.stats.messages_sent.load(Ordering::Relaxed),
            messages_unrouted: self.stats.messages_unrouted.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}
