//! Link engine counters.
//!
//! Malformed input never fails the engine; it lands here instead.

use std::sync::atomic::{AtomicU64, Ordering};

/// Cumulative counters for one link engine instance.
#[derive(Debug, Default)]
pub struct LinkMetrics {
    /// Frames dropped: shorter than the header or index out of range.
    pub frames_dropped: AtomicU64,
    /// Packet-id collisions observed (new `total` on a live entry).
    pub packet_id_collisions: AtomicU64,
    /// Messages fully reassembled and delivered.
    pub messages_reassembled: AtomicU64,
    /// Messages handed to a session for sending.
    pub messages_sent: AtomicU64,
    /// Individual transport writes or notifications that failed.
    pub write_failures: AtomicU64,
}

impl LinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            packet_id_collisions: self.packet_id_collisions.load(Ordering::Relaxed),
            messages_reassembled: self.messages_reassembled.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Plain-data view of [`LinkMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_dropped: u64,
    pub packet_id_collisions: u64,
    pub messages_reassembled: u64,
    pub messages_sent: u64,
    pub write_failures: u64,
}
