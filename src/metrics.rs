//! Process-wide link counters.
//! Cheap relaxed atomics; read them through [`snapshot`] for diagnostics.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static FRAMES_RECOVERED: AtomicU64 = AtomicU64::new(0);
static BYTES_DROPPED: AtomicU64 = AtomicU64::new(0);
static FRAMING_ERRORS: AtomicU64 = AtomicU64::new(0);
static JSON_RESPONSES: AtomicU64 = AtomicU64::new(0);
static PAYLOAD_BYTES: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}

/// A corrupted frame was skipped and the stream resynchronized; `dropped`
/// bytes were discarded on the way.
pub fn record_recovery(dropped: usize) {
    FRAMES_RECOVERED.fetch_add(1, Ordering::Relaxed);
    BYTES_DROPPED.fetch_add(dropped as u64, Ordering::Relaxed);
}

pub fn inc_framing_errors() {
    FRAMING_ERRORS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_json_response(payload_size: usize) {
    JSON_RESPONSES.fetch_add(1, Ordering::Relaxed);
    PAYLOAD_BYTES.fetch_add(payload_size as u64, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_received: u64,
    pub frames_recovered: u64,
    pub bytes_dropped: u64,
    pub framing_errors: u64,
    pub json_responses: u64,
    pub payload_bytes: u64,
}

pub fn snapshot() -> LinkStats {
    LinkStats {
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        frames_recovered: FRAMES_RECOVERED.load(Ordering::Relaxed),
        bytes_dropped: BYTES_DROPPED.load(Ordering::Relaxed),
        framing_errors: FRAMING_ERRORS.load(Ordering::Relaxed),
        json_responses: JSON_RESPONSES.load(Ordering::Relaxed),
        payload_bytes: PAYLOAD_BYTES.load(Ordering::Relaxed),
    }
}
