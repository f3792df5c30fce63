//! Per-connection convenience methods
//!
//! `extend` turns a broadcaster handle into a method set that can be bound
//! to any connection, letting the connection subscribe, unsubscribe and
//! publish with itself as the implicit subject.

use std::sync::Arc;

use crate::connection::Streamable;
use crate::error::BroadcastError;
use crate::event::{DeliveryCallback, EventData, EventOrOptions};
use crate::server::BroadcasterHandle;

/// Build the connection method set for a broadcaster.
///
/// Fails with `InvalidArgument` when the handle no longer reaches a
/// running broadcaster. Holds no state besides the handle, so extending
/// the same broadcaster twice yields equivalent method sets.
pub fn extend(broadcaster: &BroadcasterHandle) -> Result<ConnectionMethods, BroadcastError> {
    if broadcaster.is_closed() {
        return Err(BroadcastError::InvalidArgument(
            "extend requires a running broadcaster".to_string(),
        ));
    }
    Ok(ConnectionMethods {
        broadcaster: broadcaster.clone(),
    })
}

/// Subscribe/unsubscribe/publish bound to one broadcaster
#[derive(Debug, Clone)]
pub struct ConnectionMethods {
    broadcaster: BroadcasterHandle,
}

impl ConnectionMethods {
    /// Attach the methods to a connection
    pub fn bind(&self, conn: Arc<dyn Streamable>) -> BoundConnection {
        BoundConnection {
            conn,
            broadcaster: self.broadcaster.clone(),
        }
    }

    pub fn broadcaster(&self) -> &BroadcasterHandle {
        &self.broadcaster
    }
}

/// A connection that drives the broadcaster with itself as subject
#[derive(Clone)]
pub struct BoundConnection {
    conn: Arc<dyn Streamable>,
    broadcaster: BroadcasterHandle,
}

impl BoundConnection {
    pub fn connection(&self) -> &Arc<dyn Streamable> {
        &self.conn
    }

    pub async fn subscribe(&self, room: &str) -> Result<&Self, BroadcastError> {
        self.broadcaster.subscribe(room, self.conn.clone()).await?;
        Ok(self)
    }

    pub async fn unsubscribe(&self, room: &str) -> Result<&Self, BroadcastError> {
        self.broadcaster.unsubscribe(room, self.conn.clone()).await?;
        Ok(self)
    }

    /// Publish to a room; the room is still required
    pub async fn publish(
        &self,
        room: &str,
        target: impl Into<EventOrOptions>,
        data: Option<EventData>,
        callback: Option<DeliveryCallback>,
    ) -> Result<&Self, BroadcastError> {
        self.broadcaster.publish(room, target, data, callback).await?;
        Ok(self)
    }
}

impl std::fmt::Debug for BoundConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundConnection")
            .field("conn", &self.conn.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::BroadcastServer;
    use crate::testing::{fake, WriteLog};

    fn start() -> BroadcasterHandle {
        let (handle, server) = BroadcastServer::channel(16);
        tokio::spawn(server.run());
        handle
    }

    #[tokio::test]
    async fn test_extend_requires_running_broadcaster() {
        let (handle, server) = BroadcastServer::channel(4);
        drop(server);

        assert!(matches!(
            extend(&handle),
            Err(BroadcastError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_extend_is_idempotent() {
        let handle = start();

        let first = extend(&handle).unwrap();
        let second = extend(&handle).unwrap();

        assert!(first.broadcaster().same_broadcaster(&handle));
        assert!(second.broadcaster().same_broadcaster(first.broadcaster()));
    }

    #[tokio::test]
    async fn test_bound_methods_use_connection_as_subject() {
        let handle = start();
        let methods = extend(&handle).unwrap();
        let log = WriteLog::default();
        let (a, conn_a) = fake(&log);
        let (b, conn_b) = fake(&log);
        let bound_a = methods.bind(conn_a);
        let bound_b = methods.bind(conn_b);

        bound_a.subscribe("test").await.unwrap();
        bound_b.subscribe("test").await.unwrap();
        bound_a.unsubscribe("test").await.unwrap();
        assert_eq!(
            handle.rooms().await.unwrap().get("test"),
            Some(&vec![b.id])
        );

        bound_b.unsubscribe("test").await.unwrap();
        assert!(handle.rooms().await.unwrap().is_empty());

        bound_b.subscribe("test").await.unwrap();
        bound_a.publish("test", "test", None, None).await.unwrap();
        handle.rooms().await.unwrap();
        assert_eq!(b.frames(), vec!["event: test\ndata: \n\n".to_string()]);
        assert!(a.frames().is_empty());
    }

    #[tokio::test]
    async fn test_bound_methods_chain() {
        let handle = start();
        let methods = extend(&handle).unwrap();
        let log = WriteLog::default();
        let (_a, conn_a) = fake(&log);
        let bound = methods.bind(conn_a.clone());

        let chained = bound
            .publish("test", "test", None, None)
            .await
            .unwrap()
            .subscribe("test")
            .await
            .unwrap()
            .unsubscribe("test")
            .await
            .unwrap();

        assert_eq!(chained.connection().id(), conn_a.id());
        assert!(handle.rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bound_publish_validates_arguments() {
        let handle = start();
        let methods = extend(&handle).unwrap();
        let log = WriteLog::default();
        let (_a, conn_a) = fake(&log);
        let bound = methods.bind(conn_a);

        assert!(matches!(
            bound.publish("", "test", None, None).await,
            Err(BroadcastError::InvalidArgument(_))
        ));
    }
}
