//! Server-wide counters.
//!
//! All counters are relaxed atomics; the server loop updates them and any
//! thread may snapshot them for diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one server instance.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    connections_accepted: AtomicU64,
    connections_closed: AtomicU64,
    frames_received: AtomicU64,
    responses_sent: AtomicU64,
    exception_responses: AtomicU64,
    resync_discards: AtomicU64,
}

/// A point-in-time copy of [`ServerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Connections accepted since start.
    pub connections_accepted: u64,
    /// Connections closed since start.
    pub connections_closed: u64,
    /// Complete request frames recovered from the stream.
    pub frames_received: u64,
    /// Responses written back (normal plus exception).
    pub responses_sent: u64,
    /// Responses that carried an exception code.
    pub exception_responses: u64,
    /// Deframer buffer discards after an impossible length field.
    pub resync_discards: u64,
}

impl ServerMetrics {
    /// Create zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted connection.
    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a closed connection.
    pub fn record_close(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one dispatched request and its response.
    pub fn record_response(&self, exception: bool) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
        if exception {
            self.exception_responses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record deframer discards (delta since the last poll).
    pub fn record_resync_discards(&self, count: u64) {
        self.resync_discards.fetch_add(count, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
            exception_responses: self.exception_responses.load(Ordering::Relaxed),
            resync_discards: self.resync_discards.load(Ordering::Relaxed),
        }
    }
}
