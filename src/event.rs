//! Event protocol definitions
//!
//! Typed publish arguments, their normalization into one canonical
//! `Publication`, and the `text/event-stream` frame encoding.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::error::{BroadcastError, DeliveryError};
use crate::types::{ConnectionId, RoomName};

/// Event name a browser assumes when a frame has no `event:` line
pub const DEFAULT_EVENT: &str = "message";

/// Response head written once per connection on first subscription
pub const RESPONSE_HEAD: &str = "HTTP/1.1 200 OK\r\n\
Content-Type: text/event-stream\r\n\
Cache-Control: no-cache\r\n\
Connection: keep-alive\r\n\
\r\n";

/// Per-subscriber completion callback of a publish call
///
/// Invoked once per subscriber outcome with that subscriber's id.
pub type DeliveryCallback = Box<dyn FnMut(ConnectionId, Result<(), DeliveryError>) + Send>;

type Serializer = Arc<dyn Fn() -> serde_json::Result<String> + Send + Sync>;

/// Event payload
#[derive(Clone)]
pub enum EventData {
    /// JSON value, written as its JSON text
    Json(Value),
    /// Binary payload, written as its (lossy UTF-8) string form
    Binary(Vec<u8>),
    /// Any `Serialize` value, serialized when the frame is encoded
    Deferred(Serializer),
}

impl EventData {
    /// Wrap a value whose serialization is deferred to delivery time.
    ///
    /// Serialization failures then surface per subscriber instead of at
    /// the call site.
    pub fn serialize<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self::Deferred(Arc::new(move || serde_json::to_string(&value)))
    }

    /// Render the payload text that goes into `data:` lines
    pub fn render(&self) -> serde_json::Result<String> {
        match self {
            Self::Json(value) => serde_json::to_string(value),
            Self::Binary(bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            Self::Deferred(serializer) => serializer(),
        }
    }
}

impl std::fmt::Debug for EventData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(value) => f.debug_tuple("Json").field(value).finish(),
            Self::Binary(bytes) => f.debug_tuple("Binary").field(&bytes.len()).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

impl From<Value> for EventData {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<&str> for EventData {
    fn from(text: &str) -> Self {
        Self::Json(Value::String(text.to_string()))
    }
}

impl From<String> for EventData {
    fn from(text: String) -> Self {
        Self::Json(Value::String(text))
    }
}

impl From<Vec<u8>> for EventData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Structured publish options
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub event: Option<String>,
    pub data: Option<EventData>,
    pub id: Option<String>,
    pub retry: Option<Duration>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.event = Some(name.into());
        self
    }

    pub fn data(mut self, data: impl Into<EventData>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn retry(mut self, retry: Duration) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Second publish argument: a bare event name or an options record
#[derive(Debug, Clone)]
pub enum EventOrOptions {
    Event(String),
    Options(PublishOptions),
}

impl From<&str> for EventOrOptions {
    fn from(name: &str) -> Self {
        Self::Event(name.to_string())
    }
}

impl From<String> for EventOrOptions {
    fn from(name: String) -> Self {
        Self::Event(name)
    }
}

impl From<PublishOptions> for EventOrOptions {
    fn from(options: PublishOptions) -> Self {
        Self::Options(options)
    }
}

/// Untyped input: a string is an event name, an object is an options
/// record with `event`, `data`, `id` and `retry` (milliseconds).
impl TryFrom<Value> for EventOrOptions {
    type Error = BroadcastError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut fields = match value {
            Value::String(name) => return Ok(Self::Event(name)),
            Value::Object(fields) => fields,
            other => {
                return Err(invalid(format!(
                    "expected an event name or an options object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let event = match fields.remove("event") {
            None | Some(Value::Null) => None,
            Some(Value::String(name)) => Some(name),
            Some(other) => {
                return Err(invalid(format!(
                    "option `event` must be a string, got {}",
                    json_kind(&other)
                )))
            }
        };
        let id = match fields.remove("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id),
            Some(Value::Number(id)) => Some(id.to_string()),
            Some(other) => {
                return Err(invalid(format!(
                    "option `id` must be a string or number, got {}",
                    json_kind(&other)
                )))
            }
        };
        let retry = match fields.remove("retry") {
            None | Some(Value::Null) => None,
            Some(Value::Number(ms)) => match ms.as_u64() {
                Some(ms) => Some(Duration::from_millis(ms)),
                None => return Err(invalid("option `retry` must be a non-negative integer")),
            },
            Some(other) => {
                return Err(invalid(format!(
                    "option `retry` must be a number, got {}",
                    json_kind(&other)
                )))
            }
        };
        let data = fields.remove("data").map(EventData::Json);

        Ok(Self::Options(PublishOptions {
            event,
            data,
            id,
            retry,
        }))
    }
}

/// One event, ready to be framed
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub name: Option<String>,
    pub data: Option<EventData>,
    pub id: Option<String>,
    pub retry: Option<Duration>,
}

impl Event {
    /// Encode the event as a `text/event-stream` frame
    pub fn encode(&self) -> serde_json::Result<String> {
        let mut frame = String::new();

        if let Some(name) = self
            .name
            .as_deref()
            .filter(|name| !name.is_empty() && *name != DEFAULT_EVENT)
        {
            push_field(&mut frame, "event", name);
        }
        if let Some(id) = &self.id {
            push_field(&mut frame, "id", id);
        }
        if let Some(retry) = self.retry {
            push_field(&mut frame, "retry", &retry.as_millis().to_string());
        }

        let payload = match &self.data {
            Some(data) => data.render()?,
            None => String::new(),
        };
        // CRLF, CR and LF all end a line on the client side
        for line in payload.replace("\r\n", "\n").split(['\r', '\n']) {
            push_field(&mut frame, "data", line);
        }

        frame.push('\n');
        Ok(frame)
    }
}

fn push_field(frame: &mut String, field: &str, value: &str) {
    frame.push_str(field);
    frame.push_str(": ");
    frame.push_str(value);
    frame.push('\n');
}

/// Canonical record produced by publish argument normalization
pub struct Publication {
    pub room: RoomName,
    pub event: Event,
    pub callback: Option<DeliveryCallback>,
}

impl Publication {
    /// Validate publish arguments and fold them into one record.
    ///
    /// Fails with `InvalidArgument` before anything is written.
    pub fn normalize(
        room: &str,
        target: EventOrOptions,
        data: Option<EventData>,
        callback: Option<DeliveryCallback>,
    ) -> Result<Self, BroadcastError> {
        let room = RoomName::new(room)?;

        let event = match target {
            EventOrOptions::Event(name) => Event {
                name: Some(name),
                data,
                id: None,
                retry: None,
            },
            EventOrOptions::Options(options) => {
                if data.is_some() {
                    return Err(invalid(
                        "cannot combine an options argument with a separate data argument",
                    ));
                }
                Event {
                    name: options.event,
                    data: options.data,
                    id: options.id,
                    retry: options.retry,
                }
            }
        };

        if event.name.as_deref().is_some_and(has_line_break) {
            return Err(invalid("event name must not contain line breaks"));
        }
        if event.id.as_deref().is_some_and(has_line_break) {
            return Err(invalid("event id must not contain line breaks"));
        }

        Ok(Self {
            room,
            event,
            callback,
        })
    }
}

impl std::fmt::Debug for Publication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publication")
            .field("room", &self.room)
            .field("event", &self.event)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

fn has_line_break(text: &str) -> bool {
    text.contains(['\n', '\r'])
}

fn invalid(message: impl Into<String>) -> BroadcastError {
    BroadcastError::InvalidArgument(message.into())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
