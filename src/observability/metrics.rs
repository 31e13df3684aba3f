//! Thread-safe metrics collection system
//!
//! Provides atomic counters and a mutex-protected per-kind tally for tracking
//! connection health, frame decoding and event delivery of the listener.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<ListenerMetrics> = Lazy::new(ListenerMetrics::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static ListenerMetrics {
    &METRICS
}

/// Thread-safe listener metrics using atomics and a mutex
pub struct ListenerMetrics {
    // Connection metrics
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    disconnects: AtomicU64,
    resyncs: AtomicU64,
    connection_start_time: AtomicU64,

    // Frame metrics
    frames_received: AtomicU64,
    decode_failures: AtomicU64,
    protocol_warnings: AtomicU64,
    control_publishes: AtomicU64,

    // Event delivery metrics
    events_emitted: AtomicU64,
    events_dropped: AtomicU64,
    events_by_kind: Mutex<HashMap<String, u64>>,

    uptime_start: AtomicU64,
}

impl ListenerMetrics {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            resyncs: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            protocol_warnings: AtomicU64::new(0),
            control_publishes: AtomicU64::new(0),
            events_emitted: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            events_by_kind: Mutex::new(HashMap::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection metrics
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn resync(&self) {
        self.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    // Frame metrics
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_warning(&self) {
        self.protocol_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn control_published(&self) {
        self.control_publishes.fetch_add(1, Ordering::Relaxed);
    }

    // Event metrics
    pub fn event_emitted(&self, kind: &str) {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_kind) = self.events_by_kind.lock() {
            *by_kind.entry(kind.to_string()).or_insert(0) += 1;
        }
    }

    pub fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.disconnects,
            &self.resyncs,
            &self.connection_start_time,
            &self.frames_received,
            &self.decode_failures,
            &self.protocol_warnings,
            &self.control_publishes,
            &self.events_emitted,
            &self.events_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut by_kind) = self.events_by_kind.lock() {
            by_kind.clear();
        }
    }

    /// Seconds since the current connection was established (pure function)
    fn calculate_connection_duration(start: u64, now: u64) -> u64 {
        if start == 0 {
            0
        } else {
            now.saturating_sub(start)
        }
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let events_by_kind = self
            .events_by_kind
            .lock()
            .map(|by_kind| by_kind.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            connection: ConnectionMetrics {
                connected: self.connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                disconnects: self.disconnects.load(Ordering::Relaxed),
                resyncs: self.resyncs.load(Ordering::Relaxed),
                connection_duration_seconds: Self::calculate_connection_duration(
                    self.connection_start_time.load(Ordering::Relaxed),
                    now,
                ),
            },
            frames: FrameMetrics {
                frames_received: self.frames_received.load(Ordering::Relaxed),
                decode_failures: self.decode_failures.load(Ordering::Relaxed),
                protocol_warnings: self.protocol_warnings.load(Ordering::Relaxed),
                control_publishes: self.control_publishes.load(Ordering::Relaxed),
            },
            events: EventMetrics {
                events_emitted: self.events_emitted.load(Ordering::Relaxed),
                events_dropped: self.events_dropped.load(Ordering::Relaxed),
                events_by_kind,
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for ListenerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub frames: FrameMetrics,
    pub events: EventMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub disconnects: u64,
    pub resyncs: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct FrameMetrics {
    pub frames_received: u64,
    pub decode_failures: u64,
    pub protocol_warnings: u64,
    pub control_publishes: u64,
}

#[derive(Debug, Serialize)]
pub struct EventMetrics {
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub events_by_kind: HashMap<String, u64>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
