use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Envelopes the pull router forwarded to a session channel.
pub const ROUTER_FORWARDED: &str = "router.forwarded";
/// Envelopes the pull router dropped (unparseable, no id, publish failed).
pub const ROUTER_DROPPED: &str = "router.dropped";
/// Replies written to a bound connection.
pub const SESSION_DELIVERED: &str = "session.delivered";
/// Replies dropped because no connection was bound or the queue was full.
pub const SESSION_UNDELIVERABLE: &str = "session.undeliverable";
/// Client publishes accepted onto the pull channel.
pub const GATEWAY_PUBLISHED: &str = "gateway.published";
/// Inbound frames answered with a failure frame.
pub const GATEWAY_REJECTED: &str = "gateway.rejected";
/// Sessions currently registered.
pub const SESSIONS_ACTIVE: &str = "sessions.active";
/// WebSocket connections currently open.
pub const CONNECTIONS_ACTIVE: &str = "connections.active";

/// In-memory counter. Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// In-memory gauge. Can go up or down.
struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }
    fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }
    fn increment(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }
    fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Point-in-time copy of every metric.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: String,
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, i64>,
}

/// Thread-safe in-process metrics recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    counters: RwLock<HashMap<String, Counter>>,
    gauges: RwLock<HashMap<String, Gauge>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by n.
    pub fn counter_inc(&self, name: &str, n: u64) {
        let counters = self.counters.read();
        if let Some(c) = counters.get(name) {
            c.increment(n);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        let c = counters.entry(name.to_string()).or_insert_with(Counter::new);
        c.increment(n);
    }

    /// Set a gauge to a specific value.
    pub fn gauge_set(&self, name: &str, value: i64) {
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(name) {
            g.set(value);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        let g = gauges.entry(name.to_string()).or_insert_with(Gauge::new);
        g.set(value);
    }

    /// Increment/decrement a gauge by delta.
    pub fn gauge_inc(&self, name: &str, delta: i64) {
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(name) {
            g.increment(delta);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        let g = gauges.entry(name.to_string()).or_insert_with(Gauge::new);
        g.increment(delta);
    }

    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters.read().get(name).map_or(0, Counter::get)
    }

    pub fn gauge_get(&self, name: &str) -> i64 {
        self.gauges.read().get(name).map_or(0, Gauge::get)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .iter()
            .map(|(name, c)| (name.clone(), c.get()))
            .collect();
        let gauges = self
            .gauges
            .read()
            .iter()
            .map(|(name, g)| (name.clone(), g.get()))
            .collect();
        MetricsSnapshot {
            taken_at: Utc::now().to_rfc3339(),
            counters,
            gauges,
        }
    }
}
