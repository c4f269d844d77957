//! Message delivery routing.
//!
//! Given an already-persisted message (or receipt delta), decides which
//! live connections receive it.  The router never mutates stored state and
//! never treats an undeliverable push as an error: the message is durable,
//! the recipient catches up on their next fetch.

use tracing::debug;

use courier_shared::{GroupId, ServerEvent, UserId};

use crate::presence::PresenceRegistry;
use crate::rooms::RoomMap;

#[derive(Clone)]
pub struct DeliveryRouter {
    presence: PresenceRegistry,
    rooms: RoomMap,
}

impl DeliveryRouter {
    pub fn new(presence: PresenceRegistry, rooms: RoomMap) -> Self {
        Self { presence, rooms }
    }

    /// Push an event to a single user's live connection.  Dropped silently
    /// when the user is offline.  Returns whether the push was delivered.
    pub async fn push_direct(&self, to: UserId, event: ServerEvent) -> bool {
        match self.presence.lookup(to).await {
            Some(handle) => {
                let delivered = handle.push(event);
                if !delivered {
                    debug!(user = %to, "connection closing, push dropped");
                }
                delivered
            }
            None => {
                debug!(user = %to, "user offline, push dropped");
                false
            }
        }
    }

    /// Fan an event out to every connection subscribed to the group's
    /// channel, the sender's own sessions included.  No per-member
    /// presence check: channel fan-out is unconditional.
    pub async fn push_group(&self, group: GroupId, event: ServerEvent) -> usize {
        self.rooms.publish(group, event).await
    }
}
