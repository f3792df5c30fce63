//! SSE room broadcaster - Entry Point
//!
//! Starts the TCP listener and BroadcastServer actor, accepting connections.

use std::env;

use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sse_rooms::{extend, handle_connection, BroadcastServer, Signal, VERSION};

/// Default server address
const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Channel buffer size for broadcaster commands
const CHANNEL_BUFFER_SIZE: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=sse_rooms=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sse_rooms=info")),
        )
        .init();

    // Get bind address from command line or use default
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_ADDR.to_string());

    // Start TCP listener
    let listener = TcpListener::bind(&addr).await?;
    info!("SSE broadcaster v{} listening on {}", VERSION, addr);

    // Create BroadcastServer actor and start
    let (handle, server) = BroadcastServer::channel(CHANNEL_BUFFER_SIZE);
    tokio::spawn(server.run());

    info!("BroadcastServer actor started");

    // Log delivery problems that no publisher handled
    let mut signals = handle.signals();
    tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(Signal::Warning {
                    description,
                    subscriber,
                }) => warn!("Subscriber {}: {}", subscriber, description),
                Ok(Signal::Error { error, subscriber }) => {
                    error!("Delivery to {} failed: {}", subscriber, error)
                }
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} signals", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let methods = extend(&handle)?;

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let methods = methods.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, methods).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
