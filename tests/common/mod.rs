//! Helpers shared by the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use bytes::BytesMut;
use logtest::Logger;
use redis_proxy::{
    CommandSplitter,
    Completion,
    DownstreamConnection,
    RespValue,
    SplitRequest,
    resp::encode_value,
};
use rstest::fixture;

/// Exclusive access to the process-wide [`logtest::Logger`].
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();
        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let guard = logger
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Self { guard }
    }

    /// Drain captured records, returning `(level, message)` pairs.
    pub fn drain(&mut self) -> Vec<(log::Level, String)> {
        let mut records = Vec::new();
        while let Some(record) = self.guard.pop() {
            records.push((record.level(), record.args().to_string()));
        }
        records
    }
}

#[fixture]
pub fn logger() -> LoggerHandle {
    let mut handle = LoggerHandle::new();
    handle.drain();
    handle
}

/// Downstream double recording every write. Written bytes count as
/// buffered until the test drains them.
#[derive(Default)]
pub struct RecordingConnection {
    pub written: Vec<u8>,
    pub writes: usize,
    pub closed: bool,
    pub buffered: usize,
}

impl RecordingConnection {
    /// Pretend the socket accepted all but `remaining` buffered bytes.
    pub fn drain_to(&mut self, remaining: usize) { self.buffered = remaining.min(self.buffered); }
}

impl DownstreamConnection for RecordingConnection {
    fn write(&mut self, data: BytesMut) {
        self.written.extend_from_slice(&data);
        self.buffered += data.len();
        self.writes += 1;
    }

    fn close(&mut self) { self.closed = true; }

    fn read_disable(&mut self, _disable: bool) {}

    fn buffered_bytes(&self) -> usize { self.buffered }
}

struct CountingRequest(Arc<AtomicUsize>);

impl SplitRequest for CountingRequest {
    fn cancel(self: Box<Self>) { self.0.fetch_add(1, Ordering::SeqCst); }
}

/// Splitter that holds every completion until the test fires it.
#[derive(Clone, Default)]
pub struct ParkingSplitter {
    parked: Arc<Mutex<Vec<Option<Completion>>>>,
    cancels: Arc<AtomicUsize>,
}

impl ParkingSplitter {
    pub fn submitted(&self) -> usize { self.parked.lock().expect("lock").len() }

    pub fn cancels(&self) -> usize { self.cancels.load(Ordering::SeqCst) }

    pub fn take(&self, index: usize) -> Completion {
        self.parked.lock().expect("lock")[index]
            .take()
            .expect("completion already taken")
    }
}

impl CommandSplitter for ParkingSplitter {
    fn submit(&self, _command: RespValue, completion: Completion) -> Option<Box<dyn SplitRequest>> {
        self.parked.lock().expect("lock").push(Some(completion));
        Some(Box::new(CountingRequest(Arc::clone(&self.cancels))))
    }
}

/// Encode `commands` back to back as a client would pipeline them.
pub fn pipeline(commands: &[&[&str]]) -> Vec<u8> {
    let mut out = BytesMut::new();
    for command in commands {
        encode_value(&RespValue::command(command.iter().copied()), &mut out);
    }
    out.to_vec()
}
