//! Basic type definitions for the broadcaster
//!
//! Provides newtype wrappers for type safety:
//! - `ConnectionId`: UUID-based identity of a streaming connection
//! - `RoomName`: validated, non-empty room name

use std::borrow::Borrow;

use uuid::Uuid;

use crate::error::BroadcastError;

/// Unique connection identifier (newtype pattern)
///
/// Membership and dedup in rooms compare this identity, never the
/// connection's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Create a new random connection ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room name (non-empty string)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomName(String);

impl RoomName {
    /// Validate and wrap a room name
    pub fn new(name: impl Into<String>) -> Result<Self, BroadcastError> {
        let name = name.into();
        if name.is_empty() {
            return Err(BroadcastError::InvalidArgument(
                "room name must be a non-empty string".to_string(),
            ));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for RoomName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
