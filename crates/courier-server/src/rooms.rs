//! Per-group broadcast channels.
//!
//! Each group gets one `tokio::sync::broadcast` channel, created lazily on
//! first subscribe.  A connection joins the rooms for all of the user's
//! groups at connect time; membership changes mid-session take effect on
//! the next reconnect.
//!
//! The `subscribe`/`publish` surface is deliberately narrow so a shared
//! pub/sub backing could replace the in-memory map if the service ever
//! outgrows a single process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::trace;

use courier_shared::{GroupId, ServerEvent};

/// Events buffered per room before slow subscribers start lagging.
const ROOM_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct RoomMap {
    rooms: Arc<Mutex<HashMap<GroupId, broadcast::Sender<ServerEvent>>>>,
}

impl RoomMap {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe a connection to a group's channel, creating the channel
    /// if this is the first subscriber.
    pub async fn subscribe(&self, group: GroupId) -> broadcast::Receiver<ServerEvent> {
        let mut rooms = self.rooms.lock().await;
        rooms
            .entry(group)
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Fan an event out to every connection subscribed to the group.
    /// Returns the number of subscribers reached; zero is not an error,
    /// the event is simply undeliverable right now.
    pub async fn publish(&self, group: GroupId, event: ServerEvent) -> usize {
        let mut rooms = self.rooms.lock().await;
        let Some(sender) = rooms.get(&group) else {
            trace!(group = %group, "no room for group, dropping fan-out");
            return 0;
        };

        match sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                // Last subscriber went away; drop the empty room.
                rooms.remove(&group);
                0
            }
        }
    }

    /// Number of live rooms (those with at least one past subscriber).
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }
}

impl Default for RoomMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::UserId;

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let rooms = RoomMap::new();
        let group = GroupId::new();

        let mut rx1 = rooms.subscribe(group).await;
        let mut rx2 = rooms.subscribe(group).await;

        let event = ServerEvent::OnlineUsers(vec![UserId::new()]);
        let reached = rooms.publish(group, event.clone()).await;
        assert_eq!(reached, 2);

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn publish_without_room_is_a_silent_noop() {
        let rooms = RoomMap::new();
        let reached = rooms
            .publish(GroupId::new(), ServerEvent::OnlineUsers(vec![]))
            .await;
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn empty_room_is_dropped_on_publish() {
        let rooms = RoomMap::new();
        let group = GroupId::new();

        let rx = rooms.subscribe(group).await;
        drop(rx);

        assert_eq!(rooms.room_count().await, 1);
        rooms.publish(group, ServerEvent::OnlineUsers(vec![])).await;
        assert_eq!(rooms.room_count().await, 0);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let rooms = RoomMap::new();
        let g1 = GroupId::new();
        let g2 = GroupId::new();

        let mut rx1 = rooms.subscribe(g1).await;
        let _rx2 = rooms.subscribe(g2).await;

        rooms.publish(g2, ServerEvent::OnlineUsers(vec![])).await;
        assert!(rx1.try_recv().is_err());
    }
}
