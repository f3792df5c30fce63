//! Room struct definition
//!
//! Represents a named group of subscribers in delivery order.

use std::sync::{Arc, Weak};

use crate::connection::Streamable;
use crate::types::{ConnectionId, RoomName};

/// Non-owning reference to a subscribed connection
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: ConnectionId,
    pub stream: Weak<dyn Streamable>,
}

impl Subscriber {
    pub fn new(stream: &Arc<dyn Streamable>) -> Self {
        Self {
            id: stream.id(),
            stream: Arc::downgrade(stream),
        }
    }

    /// The connection, if it is still alive
    pub fn upgrade(&self) -> Option<Arc<dyn Streamable>> {
        self.stream.upgrade()
    }
}

/// Publish target
///
/// Subscribers are kept in subscription order, which is delivery order.
#[derive(Debug)]
pub struct Room {
    /// Room name for identification
    pub name: RoomName,
    /// Subscribed connections, first subscribed first
    pub subscribers: Vec<Subscriber>,
}

impl Room {
    /// Create an empty room
    pub fn new(name: RoomName) -> Self {
        Self {
            name,
            subscribers: Vec::new(),
        }
    }

    /// Check if a connection is subscribed
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.subscribers.iter().any(|s| s.id == id)
    }

    /// Append a subscriber
    ///
    /// Returns false if the connection was already subscribed.
    pub fn add(&mut self, subscriber: Subscriber) -> bool {
        if self.contains(subscriber.id) {
            false
        } else {
            self.subscribers.push(subscriber);
            true
        }
    }

    /// Remove a subscriber
    ///
    /// Returns true if the room should be deleted (no subscribers left).
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Subscriber ids in delivery order
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.subscribers.iter().map(|s| s.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SseConnection;

    fn connection() -> Arc<dyn Streamable> {
        let (conn, _rx) = SseConnection::new(4);
        Arc::new(conn)
    }

    fn room() -> Room {
        Room::new(RoomName::new("lobby").unwrap())
    }

    #[test]
    fn test_room_creation() {
        let room = room();

        assert_eq!(room.name.as_str(), "lobby");
        assert!(room.is_empty());
        assert_eq!(room.len(), 0);
    }

    #[test]
    fn test_room_add_keeps_order_and_dedups() {
        let a = connection();
        let b = connection();
        let mut room = room();

        assert!(room.add(Subscriber::new(&a)));
        assert!(room.add(Subscriber::new(&b)));
        assert!(!room.add(Subscriber::new(&a)));

        assert_eq!(room.ids(), vec![a.id(), b.id()]);
    }

    #[test]
    fn test_room_remove() {
        let a = connection();
        let b = connection();
        let mut room = room();
        room.add(Subscriber::new(&a));
        room.add(Subscriber::new(&b));

        assert!(!room.remove(a.id()));
        assert_eq!(room.ids(), vec![b.id()]);

        // Removing an absent connection changes nothing
        assert!(!room.remove(a.id()));
        assert_eq!(room.len(), 1);

        assert!(room.remove(b.id()));
    }

    #[test]
    fn test_subscriber_does_not_own_connection() {
        let a = connection();
        let subscriber = Subscriber::new(&a);

        assert!(subscriber.upgrade().is_some());
        drop(a);
        assert!(subscriber.upgrade().is_none());
    }
}
