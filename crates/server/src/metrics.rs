use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc, OnceLock,
};

/// Process-wide counters for the broadcast and persistence paths.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    broadcast_deliveries_total: AtomicU64,
    evicted_connections_total: AtomicU64,
    persist_jobs_dropped_total: AtomicU64,
    persist_queue_depth: AtomicI64,
}

static GLOBAL_METRICS: OnceLock<Arc<ServerMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<ServerMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<ServerMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn add_broadcast_deliveries(count: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.broadcast_deliveries_total.fetch_add(count, Ordering::Relaxed);
    }
}

pub fn increment_evicted_connections() {
    if let Some(metrics) = global_metrics() {
        metrics.evicted_connections_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn increment_persist_jobs_dropped() {
    if let Some(metrics) = global_metrics() {
        metrics.persist_jobs_dropped_total.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn set_persist_queue_depth(depth: i64) {
    if let Some(metrics) = global_metrics() {
        metrics.persist_queue_depth.store(depth, Ordering::Relaxed);
    }
}

impl ServerMetrics {
    pub fn broadcast_deliveries_total(&self) -> u64 {
        self.broadcast_deliveries_total.load(Ordering::Relaxed)
    }

    pub fn evicted_connections_total(&self) -> u64 {
        self.evicted_connections_total.load(Ordering::Relaxed)
    }

    pub fn persist_jobs_dropped_total(&self) -> u64 {
        self.persist_jobs_dropped_total.load(Ordering::Relaxed)
    }

    pub fn persist_queue_depth(&self) -> i64 {
        self.persist_queue_depth.load(Ordering::Relaxed)
    }
}
