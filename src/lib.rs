//! Room-based Server-Sent Events Broadcaster Library
//!
//! Connections subscribe to named rooms; publishing to a room writes an
//! encoded `text/event-stream` frame to every connection in it.
//!
//! # Features
//! - Room registry with idempotent subscribe and automatic room cleanup
//! - Ordered fan-out with per-subscriber failure isolation
//! - Warning and error signals for delivery problems
//! - Per-connection subscribe/unsubscribe/publish via `extend`
//! - Minimal HTTP front end (`GET`/`POST /rooms/{room}`)
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Broadcaster` holds the registry and performs the fan-out
//! - `BroadcastServer` is the actor owning it; `BroadcasterHandle` talks to it
//! - Each connection has a `handler` task and a write task draining its
//!   outbound channel, so a slow peer never stalls a publish
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use sse_rooms::{extend, handle_connection, BroadcastServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let (handle, server) = BroadcastServer::channel(256);
//!     tokio::spawn(server.run());
//!     let methods = extend(&handle).unwrap();
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, methods.clone()));
//!     }
//! }
//! ```

pub mod broadcaster;
pub mod connection;
pub mod error;
pub mod event;
pub mod extend;
pub mod handler;
pub mod room;
pub mod server;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use broadcaster::{Broadcaster, RoomsSnapshot, Signal, HEADERS_ALREADY_SENT};
pub use connection::{Outbound, SseConnection, Streamable};
pub use error::{AppError, BroadcastError, DeliveryError, WriteError};
pub use event::{
    DeliveryCallback, Event, EventData, EventOrOptions, Publication, PublishOptions,
};
pub use extend::{extend, BoundConnection, ConnectionMethods};
pub use handler::handle_connection;
pub use room::{Room, Subscriber};
pub use server::{BroadcastCommand, BroadcastServer, BroadcasterHandle};
pub use types::{ConnectionId, RoomName};

/// Crate version, as reported in the startup log
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
