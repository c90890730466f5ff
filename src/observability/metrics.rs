//! Forwarding metrics: lightweight counters and gauges
//!
//! In-process counters shared by the forwarding client and the listeners.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Point-in-time view of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Forwards that produced an upstream response
    pub forwarded: u64,
    /// Forwards that failed before a response arrived
    pub failed: u64,
    /// Units dropped because they could not be translated
    pub dropped: u64,
    /// Upstream responses by status class
    pub status_2xx: u64,
    pub status_3xx: u64,
    pub status_4xx: u64,
    pub status_5xx: u64,
    /// Payload bytes sent upstream
    pub upstream_bytes: u64,
    /// Forwards currently in flight
    pub in_flight: i64,
    /// Currently open inbound connections (TCP/HTTP)
    pub active_connections: i64,
}

/// Forwarding metrics collector
#[derive(Debug, Default)]
pub struct ForwardMetrics {
    forwarded: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    status_2xx: AtomicU64,
    status_3xx: AtomicU64,
    status_4xx: AtomicU64,
    status_5xx: AtomicU64,
    upstream_bytes: AtomicU64,
    in_flight: AtomicI64,
    active_connections: AtomicI64,
}

impl ForwardMetrics {
    /// Create a new collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an upstream response
    pub fn record_response(&self, status: u16, payload_bytes: u64) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.upstream_bytes.fetch_add(payload_bytes, Ordering::Relaxed);
        let class = match status / 100 {
            2 => &self.status_2xx,
            3 => &self.status_3xx,
            4 => &self.status_4xx,
            5 => &self.status_5xx,
            _ => return,
        };
        class.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a forward that got no response
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a unit dropped before sending
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn forward_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn forward_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Increment the open connection gauge
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the open connection gauge
    pub fn dec_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            status_2xx: self.status_2xx.load(Ordering::Relaxed),
            status_3xx: self.status_3xx.load(Ordering::Relaxed),
            status_4xx: self.status_4xx.load(Ordering::Relaxed),
            status_5xx: self.status_5xx.load(Ordering::Relaxed),
            upstream_bytes: self.upstream_bytes.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}
