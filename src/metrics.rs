//! Prometheus metrics for routing, failover and health tracking

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Request outcome label values
pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const FAILOVER_SUCCESS: &str = "failover_success";
    pub const CLIENT_ERROR: &str = "client_error";
    pub const EXHAUSTED: &str = "exhausted";
    pub const BACKEND_ERROR: &str = "backend_error";
}

/// Application metrics, registered against a private prometheus registry
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    failovers_total: IntCounter,
    probe_failures_total: IntCounter,
    sessions_evicted_total: IntCounter,
    registered_nodes: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("georoute_requests_total", "Routed requests by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let failovers_total = IntCounter::new(
            "georoute_failovers_total",
            "Backup attempts triggered by a failed primary exchange",
        )?;
        registry.register(Box::new(failovers_total.clone()))?;

        let probe_failures_total = IntCounter::new(
            "georoute_probe_failures_total",
            "Failed health probes across all nodes",
        )?;
        registry.register(Box::new(probe_failures_total.clone()))?;

        let sessions_evicted_total = IntCounter::new(
            "georoute_sessions_evicted_total",
            "Sticky sessions evicted after the idle timeout",
        )?;
        registry.register(Box::new(sessions_evicted_total.clone()))?;

        let registered_nodes = IntGauge::new(
            "georoute_registered_nodes",
            "Nodes currently present in the registry",
        )?;
        registry.register(Box::new(registered_nodes.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            failovers_total,
            probe_failures_total,
            sessions_evicted_total,
            registered_nodes,
        })
    }

    pub fn record_request(&self, outcome: &str) {
        self.requests_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_failover(&self) {
        self.failovers_total.inc();
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures_total.inc();
    }

    pub fn record_session_eviction(&self) {
        self.sessions_evicted_total.inc();
    }

    pub fn set_registered_nodes(&self, count: usize) {
        self.registered_nodes.set(count as i64);
    }

    /// Render the registry in Prometheus text exposition format
    pub fn gather(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
