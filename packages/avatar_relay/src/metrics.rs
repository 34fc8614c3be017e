//! Relay metrics for observability
//!
//! Counters are updated from the hub and the backend link and exposed as a
//! serializable snapshot at `/metrics`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    // Downstream connections
    pub active_connections: AtomicU64,
    pub total_connections: AtomicU64,

    // Client → backend
    /// Text frames received from clients
    pub messages_received: AtomicU64,
    /// Client frames written to the backend
    pub messages_forwarded: AtomicU64,
    /// Client frames answered with an error because the backend was down
    pub messages_rejected: AtomicU64,

    // Backend → clients
    /// Backend frames published to the hub
    pub frames_broadcast: AtomicU64,
    /// Frames written to individual clients
    pub messages_sent: AtomicU64,
    /// Frames skipped by clients that fell behind
    pub messages_dropped: AtomicU64,
    /// Unparseable backend frames
    pub malformed_frames: AtomicU64,

    // Backend link
    pub backend_connects: AtomicU64,
    pub backend_disconnects: AtomicU64,
    pub backend_connect_failures: AtomicU64,

    start_time: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_forwarded(&self) {
        self.messages_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_broadcast(&self) {
        self.frames_broadcast.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_dropped(&self, n: u64) {
        self.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_connected(&self) {
        self.backend_connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_disconnected(&self) {
        self.backend_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backend_connect_failed(&self) {
        self.backend_connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            started_at: self.started_at,
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                forwarded: self.messages_forwarded.load(Ordering::Relaxed),
                rejected: self.messages_rejected.load(Ordering::Relaxed),
                broadcast: self.frames_broadcast.load(Ordering::Relaxed),
                sent: self.messages_sent.load(Ordering::Relaxed),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
                malformed: self.malformed_frames.load(Ordering::Relaxed),
            },
            backend: BackendMetrics {
                connects: self.backend_connects.load(Ordering::Relaxed),
                disconnects: self.backend_disconnects.load(Ordering::Relaxed),
                connect_failures: self.backend_connect_failures.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub connections: ConnectionMetrics,
    pub messages: MessageMetrics,
    pub backend: BackendMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub forwarded: u64,
    pub rejected: u64,
    pub broadcast: u64,
    pub sent: u64,
    pub dropped: u64,
    pub malformed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendMetrics {
    pub connects: u64,
    pub disconnects: u64,
    pub connect_failures: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub backend: BackendHealth,
    pub connections: u64,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub connected: bool,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let metrics = RelayMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_dropped_accumulates_lag() {
        let metrics = RelayMetrics::new();
        metrics.messages_dropped(3);
        metrics.messages_dropped(4);
        assert_eq!(metrics.snapshot().messages.dropped, 7);
    }

    #[test]
    fn test_snapshot() {
        let metrics = RelayMetrics::new();
        metrics.connection_opened();
        metrics.message_received();
        metrics.message_rejected();
        metrics.backend_connected();
        metrics.backend_disconnected();
        metrics.backend_connect_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections.active, 1);
        assert_eq!(snapshot.messages.received, 1);
        assert_eq!(snapshot.messages.rejected, 1);
        assert_eq!(snapshot.backend.connects, 1);
        assert_eq!(snapshot.backend.disconnects, 1);
        assert_eq!(snapshot.backend.connect_failures, 1);
        assert!(snapshot.started_at.is_some());

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["messages"]["rejected"], 1);
    }
}
