//! Presence: who is in a room.
//!
//! The participant list is a pure function of a room's membership and is
//! pushed to every current member after each join or leave, from inside
//! the same locked step as the mutation. A member therefore never sees a
//! list that reflects a half-applied change, and lists arrive in the
//! order the membership changes happened.

use crate::protocol::ServerMessage;
use crate::registry::{Participant, Room};

/// Display names in join order. Names are not unique.
pub type ParticipantList = Vec<String>;

/// Derive the ordered display-name list.
pub fn participant_list(participants: &[Participant]) -> ParticipantList {
    participants.iter().map(|p| p.display_name.clone()).collect()
}

/// Push the room's current participant list to every subscribed member.
///
/// Returns the number of connections the list was queued for.
pub fn broadcast_participants(room: &Room) -> usize {
    let list = participant_list(room.participants());
    log::debug!("Presence in room {}: {:?}", room.id(), list);
    match room.broadcast().send(None, &ServerMessage::UserJoined(list)) {
        Ok(count) => count,
        Err(e) => {
            log::error!("Failed to encode participant list for room {}: {e}", room.id());
            0
        }
    }
}
