//! Streaming connection definitions
//!
//! `Streamable` is the capability the broadcaster needs from a transport.
//! `SseConnection` implements it on top of a bounded channel drained by the
//! connection's write task.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::WriteError;
use crate::event::RESPONSE_HEAD;
use crate::types::ConnectionId;

/// A long-lived, write-capable endpoint that can be subscribed to rooms
///
/// Writes must not block: a transport that cannot accept a frame right
/// away reports an error instead.
pub trait Streamable: Send + Sync {
    /// Identity used for room membership
    fn id(&self) -> ConnectionId;

    /// Turn off output buffering / Nagle's algorithm
    fn disable_buffering(&self) {}

    /// Write the event-stream response head
    fn send_headers(&self) -> Result<(), WriteError>;

    /// Whether any response head has been written on this connection
    fn headers_sent(&self) -> bool;

    /// Whether the connection is an open event stream
    ///
    /// `headers_sent() && !is_streaming()` means the output was finalized
    /// outside the broadcaster's control.
    fn is_streaming(&self) -> bool;

    /// Write one encoded frame
    fn write_frame(&self, frame: &[u8]) -> Result<(), WriteError>;
}

/// Instructions for the connection's write task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Disable Nagle's algorithm on the socket
    DisableBuffering,
    /// Raw bytes to write
    Data(Vec<u8>),
}

const PENDING: u8 = 0;
const STREAMING: u8 = 1;
const FINISHED: u8 = 2;

/// Channel-backed event-stream connection
///
/// Shared behind an `Arc`; the broadcaster only keeps a weak reference.
#[derive(Debug)]
pub struct SseConnection {
    /// Unique identifier for this connection
    id: ConnectionId,
    /// Connection → write task channel
    sender: mpsc::Sender<Outbound>,
    /// PENDING, STREAMING or FINISHED
    state: AtomicU8,
}

impl SseConnection {
    /// Create a connection and the receiver its write task drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let connection = Self {
            id: ConnectionId::new(),
            sender,
            state: AtomicU8::new(PENDING),
        };
        (connection, receiver)
    }

    /// Mark the output as finalized
    ///
    /// Publishing to a finished connection that is still subscribed raises
    /// a warning instead of writing.
    pub fn finish(&self) {
        self.state.store(FINISHED, Ordering::Release);
    }

    fn enqueue(&self, msg: Outbound) -> Result<(), WriteError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => WriteError::Full,
            TrySendError::Closed(_) => WriteError::Closed,
        })
    }
}

impl Streamable for SseConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn disable_buffering(&self) {
        // Best effort; a closed channel shows up on the next write
        let _ = self.enqueue(Outbound::DisableBuffering);
    }

    fn send_headers(&self) -> Result<(), WriteError> {
        if self
            .state
            .compare_exchange(PENDING, STREAMING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }
        let sent = self.enqueue(Outbound::Data(RESPONSE_HEAD.as_bytes().to_vec()));
        if sent.is_err() {
            // Head never reached the channel; a later subscribe retries it
            let _ = self.state.compare_exchange(
                STREAMING,
                PENDING,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        sent
    }

    fn headers_sent(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    fn is_streaming(&self) -> bool {
        self.state.load(Ordering::Acquire) == STREAMING
    }

    fn write_frame(&self, frame: &[u8]) -> Result<(), WriteError> {
        self.enqueue(Outbound::Data(frame.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_creation() {
        let (conn, _rx) = SseConnection::new(8);

        assert!(!conn.headers_sent());
        assert!(!conn.is_streaming());
    }

    #[tokio::test]
    async fn test_headers_sent_once() {
        let (conn, mut rx) = SseConnection::new(8);

        conn.send_headers().unwrap();
        conn.send_headers().unwrap();

        assert!(conn.headers_sent());
        assert!(conn.is_streaming());
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Data(RESPONSE_HEAD.as_bytes().to_vec()))
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rejected_headers_stay_pending() {
        let (conn, mut rx) = SseConnection::new(1);
        conn.write_frame(b"data: early\n\n").unwrap();

        assert_eq!(conn.send_headers(), Err(WriteError::Full));
        assert!(!conn.headers_sent());
        assert!(!conn.is_streaming());

        rx.recv().await;
        conn.send_headers().unwrap();
        assert!(conn.is_streaming());
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Data(RESPONSE_HEAD.as_bytes().to_vec()))
        );
    }

    #[tokio::test]
    async fn test_finish_marks_output_finalized() {
        let (conn, _rx) = SseConnection::new(8);
        conn.send_headers().unwrap();

        conn.finish();

        assert!(conn.headers_sent());
        assert!(!conn.is_streaming());
    }

    #[tokio::test]
    async fn test_write_errors() {
        let (conn, rx) = SseConnection::new(1);

        conn.write_frame(b"data: 1\n\n").unwrap();
        assert_eq!(conn.write_frame(b"data: 2\n\n"), Err(WriteError::Full));

        drop(rx);
        assert_eq!(conn.write_frame(b"data: 3\n\n"), Err(WriteError::Closed));
    }
}
