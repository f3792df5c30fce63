//! Test transports shared by the module tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::connection::Streamable;
use crate::error::WriteError;
use crate::types::ConnectionId;

/// Frames written by all fakes sharing one log, in write order
pub type WriteLog = Arc<Mutex<Vec<(ConnectionId, String)>>>;

/// In-memory `Streamable` recording everything written to it
#[derive(Debug, Default)]
pub struct FakeStream {
    pub id: ConnectionId,
    pub log: WriteLog,
    pub head_writes: AtomicUsize,
    pub buffering_disabled: AtomicUsize,
    pub headers: AtomicBool,
    pub streaming: AtomicBool,
    pub failing: AtomicBool,
}

impl FakeStream {
    pub fn new(log: &WriteLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            ..Default::default()
        })
    }

    /// Make every following write fail
    pub fn fail_writes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Simulate the response being finalized elsewhere
    pub fn finalize(&self) {
        self.headers.store(true, Ordering::SeqCst);
        self.streaming.store(false, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == self.id)
            .map(|(_, frame)| frame.clone())
            .collect()
    }
}

impl Streamable for FakeStream {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn disable_buffering(&self) {
        self.buffering_disabled.fetch_add(1, Ordering::SeqCst);
    }

    fn send_headers(&self) -> Result<(), WriteError> {
        self.head_writes.fetch_add(1, Ordering::SeqCst);
        self.headers.store(true, Ordering::SeqCst);
        self.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn headers_sent(&self) -> bool {
        self.headers.load(Ordering::SeqCst)
    }

    fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    fn write_frame(&self, frame: &[u8]) -> Result<(), WriteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WriteError::Closed);
        }
        self.log
            .lock()
            .unwrap()
            .push((self.id, String::from_utf8_lossy(frame).into_owned()));
        Ok(())
    }
}

/// A fake plus the trait-object handle the broadcaster takes
pub fn fake(log: &WriteLog) -> (Arc<FakeStream>, Arc<dyn Streamable>) {
    let stream = FakeStream::new(log);
    let handle: Arc<dyn Streamable> = stream.clone();
    (stream, handle)
}
