//! Room membership: which connections are subscribed to which logical channels.
//!
//! Rooms decouple "who is interested in this conversation" from "who is
//! currently reachable": the router can broadcast to a room without
//! re-deriving participant lists from storage on every event.

use std::collections::HashSet;
use std::fmt;

use dashmap::DashMap;

use crate::store::{ChatId, UserId};

/// A logical broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    /// Per-user private room, used for notifications and targeted pushes.
    User(UserId),
    /// Per-conversation room, used for typing/presence signals.
    Chat(ChatId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user_{id}"),
            Room::Chat(id) => write!(f, "chat_{id}"),
        }
    }
}

/// Many-to-many relation between connection ids and rooms.
pub struct RoomMembership {
    members: DashMap<Room, HashSet<String>>,
    joined: DashMap<String, HashSet<Room>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self {
            members: DashMap::new(),
            joined: DashMap::new(),
        }
    }

    /// Subscribe a connection to a room. Idempotent.
    pub fn join(&self, connection_id: &str, room: Room) {
        self.members
            .entry(room)
            .or_default()
            .insert(connection_id.to_string());
        self.joined
            .entry(connection_id.to_string())
            .or_default()
            .insert(room);
    }

    /// Unsubscribe a connection from a room. Leaving a room never joined is a
    /// no-op.
    pub fn leave(&self, connection_id: &str, room: Room) {
        if let Some(mut entry) = self.members.get_mut(&room) {
            entry.remove(connection_id);
        }
        self.members.remove_if(&room, |_, set| set.is_empty());
        if let Some(mut entry) = self.joined.get_mut(connection_id) {
            entry.remove(&room);
        }
        self.joined.remove_if(connection_id, |_, set| set.is_empty());
    }

    /// Connection ids currently subscribed to a room.
    pub fn members_of(&self, room: Room) -> Vec<String> {
        self.members
            .get(&room)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every membership held by a connection. Called on disconnect so no
    /// dangling connection ids survive in any room.
    pub fn purge(&self, connection_id: &str) {
        let rooms = match self.joined.remove(connection_id) {
            Some((_, rooms)) => rooms,
            None => return,
        };
        for room in rooms {
            if let Some(mut entry) = self.members.get_mut(&room) {
                entry.remove(connection_id);
            }
            self.members.remove_if(&room, |_, set| set.is_empty());
        }
    }

    pub fn is_member(&self, connection_id: &str, room: Room) -> bool {
        self.members
            .get(&room)
            .map(|set| set.contains(connection_id))
            .unwrap_or(false)
    }
}

impl Default for RoomMembership {
    fn default() -> Self {
        Self::new()
    }
}
