//! BroadcastServer Actor implementation
//!
//! The central actor that owns the `Broadcaster`. Handles talk to it over
//! an mpsc channel, so registry mutation and fan-out are serialized
//! without locks.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::broadcaster::{Broadcaster, RoomsSnapshot, Signal};
use crate::connection::Streamable;
use crate::error::BroadcastError;
use crate::event::{DeliveryCallback, EventData, EventOrOptions, Publication};
use crate::types::RoomName;

/// Commands sent from handles to the BroadcastServer actor
pub enum BroadcastCommand {
    /// Subscribe a connection to a room
    Subscribe {
        room: RoomName,
        conn: Arc<dyn Streamable>,
        ack: oneshot::Sender<()>,
    },
    /// Unsubscribe a connection from a room
    Unsubscribe {
        room: RoomName,
        conn: Arc<dyn Streamable>,
        ack: oneshot::Sender<()>,
    },
    /// Fan an already validated publication out
    Publish { publication: Publication },
    /// Read the registry
    Snapshot { reply: oneshot::Sender<RoomsSnapshot> },
}

impl std::fmt::Debug for BroadcastCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subscribe { room, conn, .. } => f
                .debug_struct("Subscribe")
                .field("room", room)
                .field("conn", &conn.id())
                .finish(),
            Self::Unsubscribe { room, conn, .. } => f
                .debug_struct("Unsubscribe")
                .field("room", room)
                .field("conn", &conn.id())
                .finish(),
            Self::Publish { publication } => f
                .debug_struct("Publish")
                .field("publication", publication)
                .finish(),
            Self::Snapshot { .. } => f.write_str("Snapshot"),
        }
    }
}

/// The BroadcastServer actor
///
/// Owns the broadcaster and processes commands from handles.
pub struct BroadcastServer {
    /// Room registry and fan-out
    broadcaster: Broadcaster,
    /// Command receiver channel
    receiver: mpsc::Receiver<BroadcastCommand>,
}

impl BroadcastServer {
    /// Create a BroadcastServer with the given command receiver
    pub fn new(broadcaster: Broadcaster, receiver: mpsc::Receiver<BroadcastCommand>) -> Self {
        Self {
            broadcaster,
            receiver,
        }
    }

    /// Create a server with a fresh broadcaster and a handle to it
    pub fn channel(capacity: usize) -> (BroadcasterHandle, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        let broadcaster = Broadcaster::new();
        let handle = BroadcasterHandle {
            sender,
            signals: broadcaster.signal_sender(),
        };
        (handle, Self::new(broadcaster, receiver))
    }

    /// Run the BroadcastServer event loop
    ///
    /// Continuously receives and processes commands until all handles are
    /// dropped.
    pub async fn run(mut self) {
        info!("BroadcastServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("BroadcastServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: BroadcastCommand) {
        match cmd {
            BroadcastCommand::Subscribe { room, conn, ack } => {
                // Room name was validated by the handle
                if self.broadcaster.subscribe(room.as_str(), &conn).is_ok() {
                    debug!("Total rooms: {}", self.broadcaster.rooms().len());
                }
                let _ = ack.send(());
            }
            BroadcastCommand::Unsubscribe { room, conn, ack } => {
                self.broadcaster.unsubscribe(room.as_str(), conn.as_ref());
                debug!("Total rooms: {}", self.broadcaster.rooms().len());
                let _ = ack.send(());
            }
            BroadcastCommand::Publish { publication } => {
                self.broadcaster.deliver(publication);
            }
            BroadcastCommand::Snapshot { reply } => {
                let _ = reply.send(self.broadcaster.snapshot());
            }
        }
    }
}

/// Cloneable handle to a running BroadcastServer
///
/// Arguments are validated here, before a command is sent, so
/// `InvalidArgument` reaches the caller directly.
#[derive(Debug, Clone)]
pub struct BroadcasterHandle {
    sender: mpsc::Sender<BroadcastCommand>,
    signals: broadcast::Sender<Signal>,
}

impl BroadcasterHandle {
    /// Subscribe a connection; resolves once the actor has applied it
    pub async fn subscribe(
        &self,
        room: &str,
        conn: Arc<dyn Streamable>,
    ) -> Result<&Self, BroadcastError> {
        let room = RoomName::new(room)?;
        let (ack, done) = oneshot::channel();
        self.send(BroadcastCommand::Subscribe { room, conn, ack })
            .await?;
        done.await.map_err(|_| BroadcastError::ChannelSend)?;
        Ok(self)
    }

    /// Unsubscribe a connection; resolves once the actor has applied it
    pub async fn unsubscribe(
        &self,
        room: &str,
        conn: Arc<dyn Streamable>,
    ) -> Result<&Self, BroadcastError> {
        let room = RoomName::new(room)?;
        let (ack, done) = oneshot::channel();
        self.send(BroadcastCommand::Unsubscribe { room, conn, ack })
            .await?;
        done.await.map_err(|_| BroadcastError::ChannelSend)?;
        Ok(self)
    }

    /// Validate and queue a publication
    ///
    /// Resolves once queued; delivery outcomes arrive through `callback`
    /// or the signal channel.
    pub async fn publish(
        &self,
        room: &str,
        target: impl Into<EventOrOptions>,
        data: Option<EventData>,
        callback: Option<DeliveryCallback>,
    ) -> Result<&Self, BroadcastError> {
        let publication = Publication::normalize(room, target.into(), data, callback)?;
        self.send(BroadcastCommand::Publish { publication }).await?;
        Ok(self)
    }

    /// Copy of the registry as seen by the actor
    pub async fn rooms(&self) -> Result<RoomsSnapshot, BroadcastError> {
        let (reply, snapshot) = oneshot::channel();
        self.send(BroadcastCommand::Snapshot { reply }).await?;
        snapshot.await.map_err(|_| BroadcastError::ChannelSend)
    }

    /// Listen for warning and error signals
    pub fn signals(&self) -> broadcast::Receiver<Signal> {
        self.signals.subscribe()
    }

    /// Whether the actor has stopped
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Whether two handles reach the same actor
    pub fn same_broadcaster(&self, other: &BroadcasterHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    async fn send(&self, cmd: BroadcastCommand) -> Result<(), BroadcastError> {
        self.sender
            .send(cmd)
            .await
            .map_err(|_| BroadcastError::ChannelSend)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::error::DeliveryError;
    use crate::testing::{fake, WriteLog};
    use crate::types::ConnectionId;

    fn start() -> BroadcasterHandle {
        let (handle, server) = BroadcastServer::channel(16);
        tokio::spawn(server.run());
        handle
    }

    #[tokio::test]
    async fn test_handle_subscribe_and_unsubscribe() {
        let handle = start();
        let log = WriteLog::default();
        let (a, conn_a) = fake(&log);
        let (b, conn_b) = fake(&log);

        handle
            .subscribe("chat", conn_a.clone())
            .await
            .unwrap()
            .subscribe("chat", conn_b.clone())
            .await
            .unwrap();
        let rooms = handle.rooms().await.unwrap();
        assert_eq!(rooms.get("chat"), Some(&vec![a.id, b.id]));

        handle.unsubscribe("chat", conn_a).await.unwrap();
        handle.unsubscribe("chat", conn_b).await.unwrap();
        assert!(handle.rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handle_publish_delivers_in_order() {
        let handle = start();
        let log = WriteLog::default();
        let (a, conn_a) = fake(&log);
        let (b, conn_b) = fake(&log);
        handle.subscribe("chat", conn_a.clone()).await.unwrap();
        handle.subscribe("chat", conn_b.clone()).await.unwrap();
        a.fail_writes();

        let outcomes: Arc<Mutex<Vec<(ConnectionId, bool)>>> = Arc::default();
        let recorded = outcomes.clone();
        let callback: DeliveryCallback =
            Box::new(move |id, outcome| recorded.lock().unwrap().push((id, outcome.is_ok())));
        handle
            .publish("chat", "msg", Some(json!("hi").into()), Some(callback))
            .await
            .unwrap();
        // Commands are processed in order; the snapshot reply follows delivery
        handle.rooms().await.unwrap();

        assert_eq!(*outcomes.lock().unwrap(), vec![(a.id, false), (b.id, true)]);
        assert_eq!(b.frames(), vec!["event: msg\ndata: \"hi\"\n\n".to_string()]);
    }

    #[tokio::test]
    async fn test_handle_rejects_invalid_arguments() {
        let handle = start();
        let log = WriteLog::default();
        let (_a, conn_a) = fake(&log);

        assert!(matches!(
            handle.subscribe("", conn_a).await,
            Err(BroadcastError::InvalidArgument(_))
        ));
        assert!(matches!(
            handle.publish("", "msg", None, None).await,
            Err(BroadcastError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_handle_forwards_error_signals() {
        let handle = start();
        let log = WriteLog::default();
        let (a, conn_a) = fake(&log);
        handle.subscribe("chat", conn_a.clone()).await.unwrap();
        a.fail_writes();
        let mut signals = handle.signals();

        handle.publish("chat", "msg", None, None).await.unwrap();

        match signals.recv().await.unwrap() {
            Signal::Error { error, subscriber } => {
                assert_eq!(subscriber, a.id);
                assert!(matches!(error, DeliveryError::Write(_)));
            }
            other => panic!("Wrong signal: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let (handle, server) = BroadcastServer::channel(4);
        drop(server);

        assert!(handle.is_closed());
        assert!(matches!(
            handle.publish("chat", "msg", None, None).await,
            Err(BroadcastError::ChannelSend)
        ));
    }
}
