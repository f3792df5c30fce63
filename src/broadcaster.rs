//! Room registry and publish fan-out
//!
//! `Broadcaster` is plain single-owner state: mutation goes through
//! `&mut self`, so concurrent hosts serialize access through the
//! `BroadcastServer` actor instead of a lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::connection::Streamable;
use crate::error::{BroadcastError, DeliveryError, WriteError};
use crate::event::{DeliveryCallback, EventData, EventOrOptions, Publication};
use crate::room::{Room, Subscriber};
use crate::types::{ConnectionId, RoomName};

/// Warning emitted for a subscriber whose output was finalized elsewhere
pub const HEADERS_ALREADY_SENT: &str = "headers are already sent";

/// Buffered signals per listener before it starts lagging
const SIGNAL_CAPACITY: usize = 64;

/// Registry contents by room name, subscribers in delivery order
pub type RoomsSnapshot = BTreeMap<String, Vec<ConnectionId>>;

/// Conditions observed during publish
#[derive(Debug, Clone)]
pub enum Signal {
    /// Write skipped, subscriber kept
    Warning {
        description: String,
        subscriber: ConnectionId,
    },
    /// Delivery failed and the publish call had no callback
    Error {
        error: DeliveryError,
        subscriber: ConnectionId,
    },
}

/// The room-based broadcaster
#[derive(Debug)]
pub struct Broadcaster {
    /// All non-empty rooms: RoomName -> Room
    rooms: HashMap<RoomName, Room>,
    /// Warning/error signal source
    signals: broadcast::Sender<Signal>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            rooms: HashMap::new(),
            signals,
        }
    }

    /// Read-only view of the registry
    pub fn rooms(&self) -> &HashMap<RoomName, Room> {
        &self.rooms
    }

    pub fn room(&self, name: &str) -> Option<&Room> {
        self.rooms.get(name)
    }

    /// Copy of the registry, ordered by room name
    pub fn snapshot(&self) -> RoomsSnapshot {
        self.rooms
            .iter()
            .map(|(name, room)| (name.to_string(), room.ids()))
            .collect()
    }

    /// Listen for warning and error signals
    pub fn signals(&self) -> broadcast::Receiver<Signal> {
        self.signals.subscribe()
    }

    pub(crate) fn signal_sender(&self) -> broadcast::Sender<Signal> {
        self.signals.clone()
    }

    /// Subscribe a connection to a room
    ///
    /// Subscribing an already subscribed connection is a no-op.
    pub fn subscribe(
        &mut self,
        room: &str,
        conn: &Arc<dyn Streamable>,
    ) -> Result<&mut Self, BroadcastError> {
        self.subscribe_with_ack(room, conn, || {})
    }

    /// Subscribe a connection, calling `ack` once the subscription exists
    ///
    /// `ack` is not called when the connection was already subscribed.
    pub fn subscribe_with_ack(
        &mut self,
        room: &str,
        conn: &Arc<dyn Streamable>,
        ack: impl FnOnce(),
    ) -> Result<&mut Self, BroadcastError> {
        let name = RoomName::new(room)?;
        let id = conn.id();

        if self.rooms.get(&name).is_some_and(|r| r.contains(id)) {
            debug!("Connection {} already in room {}", id, name);
            return Ok(self);
        }

        // Once per connection, not once per room
        if !conn.headers_sent() {
            conn.disable_buffering();
            if let Err(e) = conn.send_headers() {
                warn!("Failed to send headers to {}: {}", id, e);
            }
        }

        self.rooms
            .entry(name.clone())
            .or_insert_with(|| {
                debug!("Room {} created", name);
                Room::new(name.clone())
            })
            .add(Subscriber::new(conn));

        info!("Connection {} subscribed to room {}", id, name);
        ack();
        Ok(self)
    }

    /// Unsubscribe a connection from a room
    ///
    /// No-op for an absent room or connection. Deletes the room when its
    /// last subscriber leaves.
    pub fn unsubscribe(&mut self, room: &str, conn: &dyn Streamable) -> &mut Self {
        let id = conn.id();
        let Some(entry) = self.rooms.get_mut(room) else {
            return self;
        };

        if !entry.contains(id) {
            return self;
        }

        info!("Connection {} unsubscribed from room {}", id, room);
        if entry.remove(id) {
            self.rooms.remove(room);
            debug!("Room {} deleted (empty)", room);
        }
        self
    }

    /// Publish an event to every subscriber of a room
    ///
    /// Only argument errors are returned. Delivery failures go to
    /// `callback` when given, otherwise they are emitted as error signals.
    pub fn publish(
        &self,
        room: &str,
        target: impl Into<EventOrOptions>,
        data: Option<EventData>,
        callback: Option<DeliveryCallback>,
    ) -> Result<&Self, BroadcastError> {
        let publication = Publication::normalize(room, target.into(), data, callback)?;
        self.deliver(publication);
        Ok(self)
    }

    /// Fan a normalized publication out to the room's current subscribers
    pub fn deliver(&self, publication: Publication) {
        let Publication {
            room,
            event,
            mut callback,
        } = publication;

        // Snapshot; the registry may change while callbacks run
        let subscribers = match self.rooms.get(&room) {
            Some(entry) => entry.subscribers.clone(),
            None => {
                debug!("No subscribers in room {}", room);
                return;
            }
        };
        debug!(
            "Publishing {:?} to room {} ({} subscribers)",
            event.name,
            room,
            subscribers.len()
        );

        let mut frame: Option<Result<Arc<str>, DeliveryError>> = None;

        for subscriber in subscribers {
            let outcome = match subscriber.upgrade() {
                None => Err(DeliveryError::from(WriteError::Closed)),
                Some(stream) if stream.headers_sent() && !stream.is_streaming() => {
                    warn!(
                        "Skipping {} in room {}: {}",
                        subscriber.id, room, HEADERS_ALREADY_SENT
                    );
                    self.emit(Signal::Warning {
                        description: HEADERS_ALREADY_SENT.to_string(),
                        subscriber: subscriber.id,
                    });
                    continue;
                }
                Some(stream) => frame
                    .get_or_insert_with(|| {
                        event
                            .encode()
                            .map(Arc::from)
                            .map_err(DeliveryError::from)
                    })
                    .clone()
                    .and_then(|encoded| {
                        stream
                            .write_frame(encoded.as_bytes())
                            .map_err(DeliveryError::from)
                    }),
            };

            self.report(subscriber.id, outcome, callback.as_mut());
        }
    }

    fn report(
        &self,
        subscriber: ConnectionId,
        outcome: Result<(), DeliveryError>,
        callback: Option<&mut DeliveryCallback>,
    ) {
        match (outcome, callback) {
            (outcome, Some(callback)) => callback(subscriber, outcome),
            (Ok(()), None) => {}
            (Err(error), None) => {
                warn!("Delivery to {} failed: {}", subscriber, error);
                self.emit(Signal::Error { error, subscriber });
            }
        }
    }

    fn emit(&self, signal: Signal) {
        // No listeners is fine
        let _ = self.signals.send(signal);
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
