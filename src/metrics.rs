//! Operational counters and gauges
//!
//! Plain atomics shared by the projector, bus and HTTP surface. `/metrics`
//! renders a snapshot in Prometheus text format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    events_applied: AtomicU64,
    decode_errors: AtomicU64,
    sequence_violations: AtomicU64,
    rejected_events: AtomicU64,
    active_subscriptions: AtomicU64,
    active_connections: AtomicU64,
    deliveries: AtomicU64,
    dropped_connections: AtomicU64,
    queries: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub events_applied: u64,
    pub decode_errors: u64,
    pub sequence_violations: u64,
    pub rejected_events: u64,
    pub active_subscriptions: u64,
    pub active_connections: u64,
    pub deliveries: u64,
    pub dropped_connections: u64,
    pub queries: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_applied(&self) {
        self.events_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sequence_violation(&self) {
        self.sequence_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Any event rejected without a state change
    pub fn record_rejected(&self) {
        self.rejected_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_opened(&self) {
        self.active_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriptions_closed(&self, n: u64) {
        let _ = self
            .active_subscriptions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(n)));
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_connection(&self) {
        self.dropped_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_applied: self.events_applied.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            sequence_violations: self.sequence_violations.load(Ordering::Relaxed),
            rejected_events: self.rejected_events.load(Ordering::Relaxed),
            active_subscriptions: self.active_subscriptions.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped_connections: self.dropped_connections.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, u64); 9] = [
            ("tableflow_events_applied_total", "counter", self.events_applied),
            ("tableflow_decode_errors_total", "counter", self.decode_errors),
            ("tableflow_sequence_violations_total", "counter", self.sequence_violations),
            ("tableflow_rejected_events_total", "counter", self.rejected_events),
            ("tableflow_active_subscriptions", "gauge", self.active_subscriptions),
            ("tableflow_active_connections", "gauge", self.active_connections),
            ("tableflow_deliveries_total", "counter", self.deliveries),
            ("tableflow_dropped_connections_total", "counter", self.dropped_connections),
            ("tableflow_queries_total", "counter", self.queries),
        ];
        let mut out = String::new();
        for (name, kind, value) in counters {
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            let _ = writeln!(out, "{} {}", name, value);
        }
        out
    }
}
