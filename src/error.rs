//! Error types for the broadcaster
//!
//! Splits failures by how they travel: `BroadcastError` is returned to the
//! caller, `DeliveryError` is routed per subscriber through callbacks and
//! signals, `AppError` covers the HTTP front end.
//! Uses thiserror for ergonomic error definitions.

use std::sync::Arc;

use thiserror::Error;

/// Errors returned synchronously to the caller
///
/// Raised before any subscriber is touched.
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// Malformed call (bad room name, bad event or options, options + data)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The broadcast server actor is gone
    #[error("Channel send error")]
    ChannelSend,
}

/// Per-subscriber delivery errors
///
/// Never returned from `publish`; handed to the publish callback or emitted
/// as an error signal. Cloneable so one serialization failure can be
/// reported for every subscriber of the room.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// The event payload could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] Arc<serde_json::Error>),

    /// The transport rejected the frame
    #[error("Write error: {0}")]
    Write(#[from] WriteError),
}

impl From<serde_json::Error> for DeliveryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

/// Transport write errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The connection has been closed or dropped
    #[error("Connection closed")]
    Closed,

    /// The connection's outbound buffer is full (slow peer)
    #[error("Outbound buffer full")]
    Full,
}

/// HTTP front-end errors
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error (fatal for the connection)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request body is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Broadcaster rejected the call
    #[error(transparent)]
    Broadcast(#[from] BroadcastError),

    /// Malformed HTTP request
    #[error("Bad request: {0}")]
    BadRequest(String),
}
