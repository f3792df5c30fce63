//! HTTP connection handler
//!
//! Minimal front end for the broadcaster: `GET /rooms/{room}` opens an
//! event stream subscribed to the room, `POST /rooms/{room}` publishes the
//! JSON body to it.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{Outbound, SseConnection};
use crate::error::{AppError, BroadcastError};
use crate::event::EventOrOptions;
use crate::extend::ConnectionMethods;

/// Frames buffered per connection before writes start failing
const OUTBOUND_CAPACITY: usize = 64;

/// Largest accepted publish body
const MAX_BODY_LEN: usize = 64 * 1024;

/// Largest accepted request head
const MAX_HEAD_LINES: usize = 100;

/// Parsed request line and the headers we care about
#[derive(Debug)]
struct RequestHead {
    method: String,
    path: String,
    content_length: usize,
}

impl RequestHead {
    /// Room name from a `/rooms/{room}` path
    fn room(&self) -> Option<&str> {
        let path = self.path.split('?').next().unwrap_or_default();
        path.strip_prefix("/rooms/")
            .filter(|room| !room.is_empty() && !room.contains('/'))
    }
}

/// Handle a new TCP connection
///
/// Reads one request and either streams events until the peer goes away
/// or publishes the request body and closes.
pub async fn handle_connection(
    stream: TcpStream,
    methods: ConnectionMethods,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let head = match read_head(&mut reader).await {
        Ok(head) => head,
        Err(AppError::BadRequest(reason)) => {
            warn!("Bad request from {}: {}", peer_addr, reason);
            return respond(&mut write_half, "400 Bad Request", &reason).await;
        }
        Err(e) => return Err(e),
    };

    let Some(room) = head.room().map(str::to_string) else {
        return respond(&mut write_half, "404 Not Found", "not found").await;
    };

    match head.method.as_str() {
        "GET" => stream_events(reader, write_half, methods, &room).await,
        "POST" => {
            let outcome = publish_body(&mut reader, &methods, &room, head.content_length).await;
            match outcome {
                Ok(()) => respond(&mut write_half, "202 Accepted", "accepted").await,
                Err(AppError::Io(e)) => Err(e.into()),
                Err(e) => {
                    warn!("Publish to room {} from {} rejected: {}", room, peer_addr, e);
                    respond(&mut write_half, status_for(&e), &e.to_string()).await
                }
            }
        }
        _ => respond(&mut write_half, "405 Method Not Allowed", "method not allowed").await,
    }
}

/// Subscribe the peer to `room` and keep the stream open until it leaves
async fn stream_events(
    mut reader: BufReader<OwnedReadHalf>,
    write_half: OwnedWriteHalf,
    methods: ConnectionMethods,
    room: &str,
) -> Result<(), AppError> {
    let (conn, outbound) = SseConnection::new(OUTBOUND_CAPACITY);
    let conn = Arc::new(conn);
    let bound = methods.bind(conn.clone());

    // Spawn write task (Outbound -> socket)
    let mut write_task = tokio::spawn(write_outbound(write_half, outbound));

    if let Err(e) = bound.subscribe(room).await {
        write_task.abort();
        return Err(e.into());
    }
    info!("Connection {} streaming room {}", bound.connection().id(), room);

    // Wait for the peer to hang up or the socket to fail
    let write_done = tokio::select! {
        _ = wait_for_eof(&mut reader) => {
            debug!("Peer closed stream {}", bound.connection().id());
            false
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", bound.connection().id());
            true
        }
    };

    conn.finish();
    bound.unsubscribe(room).await?;
    info!("Connection {} left room {}", bound.connection().id(), room);

    // Dropping the last sender ends the write task
    drop(bound);
    drop(conn);
    // A finished JoinHandle must not be polled again
    if !write_done {
        let _ = write_task.await;
    }

    Ok(())
}

/// Drain an outbound channel into the socket
async fn write_outbound(mut writer: OwnedWriteHalf, mut outbound: mpsc::Receiver<Outbound>) {
    while let Some(msg) = outbound.recv().await {
        match msg {
            Outbound::DisableBuffering => {
                if let Err(e) = writer.as_ref().set_nodelay(true) {
                    debug!("Failed to disable Nagle: {}", e);
                }
            }
            Outbound::Data(bytes) => {
                if writer.write_all(&bytes).await.is_err() {
                    debug!("Socket write failed, ending write task");
                    break;
                }
            }
        }
    }
    debug!("Write task ended for connection");

    let _ = writer.shutdown().await;
}

async fn wait_for_eof(reader: &mut BufReader<OwnedReadHalf>) {
    let mut buf = [0u8; 512];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// Read the publish body and hand it to the broadcaster
async fn publish_body(
    reader: &mut BufReader<OwnedReadHalf>,
    methods: &ConnectionMethods,
    room: &str,
    content_length: usize,
) -> Result<(), AppError> {
    if content_length == 0 {
        return Err(AppError::BadRequest("missing request body".to_string()));
    }
    if content_length > MAX_BODY_LEN {
        return Err(AppError::BadRequest(format!(
            "body larger than {} bytes",
            MAX_BODY_LEN
        )));
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    let value: Value = serde_json::from_slice(&body)?;
    let target = EventOrOptions::try_from(value)?;
    methods.broadcaster().publish(room, target, None, None).await?;
    Ok(())
}

async fn read_head(reader: &mut BufReader<OwnedReadHalf>) -> Result<RequestHead, AppError> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(AppError::BadRequest("empty request".to_string()));
    }

    let mut parts = line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Err(AppError::BadRequest("malformed request line".to_string()));
    };
    let mut head = RequestHead {
        method: method.to_string(),
        path: path.to_string(),
        content_length: 0,
    };

    for _ in 0..MAX_HEAD_LINES {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Err(AppError::BadRequest("truncated request head".to_string()));
        }
        let header = line.trim_end();
        if header.is_empty() {
            return Ok(head);
        }
        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                head.content_length = value.trim().parse().map_err(|_| {
                    AppError::BadRequest("invalid Content-Length".to_string())
                })?;
            }
        }
    }

    Err(AppError::BadRequest("request head too large".to_string()))
}

fn status_for(err: &AppError) -> &'static str {
    match err {
        AppError::BadRequest(_)
        | AppError::Json(_)
        | AppError::Broadcast(BroadcastError::InvalidArgument(_)) => "400 Bad Request",
        AppError::Broadcast(BroadcastError::ChannelSend) => "503 Service Unavailable",
        AppError::Io(_) => "500 Internal Server Error",
    }
}

async fn respond(writer: &mut OwnedWriteHalf, status: &str, body: &str) -> Result<(), AppError> {
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}
