//! Background health monitoring for registered nodes
//!
//! Sweeps every registered node on a fixed interval, independent of request
//! traffic, and drives the per-node health/cooldown state machine:
//! `Available ⇄ Unavailable` on probe outcome, cooldown entry at three
//! consecutive failures, and after the cooldown window a single gating probe
//! that either returns the node to rotation or degrades it terminally.
//! Degraded nodes are pruned after each region sweep. Probe failures never
//! surface to clients; they only mutate registry state.

use crate::metrics::Metrics;
use crate::region::Region;
use crate::registry::{NodeRegistry, ProbeTarget};
use std::sync::Arc;
use std::time::Duration;

/// How long a cooldown node is left alone before its single re-probe
pub const COOLDOWN_WINDOW: Duration = Duration::from_secs(120);

/// Periodic prober that owns no node state; all mutation goes through the
/// registry.
pub struct HealthMonitor {
    registry: Arc<NodeRegistry>,
    metrics: Arc<Metrics>,
    client: reqwest::Client,
    interval: Duration,
    cooldown_window: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        metrics: Arc<Metrics>,
        probe_timeout: Duration,
        interval: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .unwrap_or_default();
        Self {
            registry,
            metrics,
            client,
            interval,
            cooldown_window: COOLDOWN_WINDOW,
        }
    }

    /// Override the cooldown window (used by tests to cross the boundary fast)
    pub fn with_cooldown_window(mut self, window: Duration) -> Self {
        self.cooldown_window = window;
        self
    }

    /// Probe one node's health endpoint; any non-2xx status or transport
    /// error counts as a failure.
    async fn probe(&self, target: &ProbeTarget) -> bool {
        let url = format!("{}/health", target.url.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                tracing::debug!(
                    node_id = %target.id,
                    url = %url,
                    status = %response.status(),
                    healthy = healthy,
                    "Health probe completed"
                );
                healthy
            }
            Err(e) => {
                tracing::debug!(node_id = %target.id, url = %url, error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Run one full sweep across every region.
    ///
    /// Exposed so tests can drive the state machine without the interval loop.
    pub async fn run_sweep(&self) {
        let regions = self.registry.regions().await;
        // Regions are independent; probe them concurrently
        futures::future::join_all(regions.into_iter().map(|region| self.sweep_region(region)))
            .await;
        self.metrics
            .set_registered_nodes(self.registry.node_count().await);
    }

    async fn sweep_region(&self, region: Region) {
        for target in self.registry.probe_targets(region).await {
            if target.in_cooldown {
                self.probe_cooldown_node(region, &target).await;
            } else {
                self.probe_active_node(region, &target).await;
            }
        }
        let pruned = self.registry.prune_degraded(region).await;
        if pruned > 0 {
            tracing::warn!(region = %region, pruned = pruned, "Removed degraded nodes");
        }
    }

    async fn probe_active_node(&self, region: Region, target: &ProbeTarget) {
        if self.probe(target).await {
            self.registry.record_probe_success(region, target.key).await;
        } else {
            self.metrics.record_probe_failure();
            self.registry.record_probe_failure(region, target.key).await;
        }
    }

    /// Cooldown nodes are left alone until the window elapses, then get
    /// exactly one probe: success rejoins rotation, failure is terminal.
    async fn probe_cooldown_node(&self, region: Region, target: &ProbeTarget) {
        let elapsed_window = target
            .last_failed_at
            .map(|at| at.elapsed() >= self.cooldown_window)
            .unwrap_or(true);
        if !elapsed_window {
            return;
        }

        if self.probe(target).await {
            self.registry.clear_cooldown(region, target.key).await;
        } else {
            self.metrics.record_probe_failure();
            self.registry.mark_degraded(region, target.key).await;
        }
    }

    /// Start the recurring sweep task, plus a watcher that makes an
    /// unexpected monitor exit loud in the logs.
    pub fn start(self: Arc<Self>) {
        let interval = self.interval;
        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Health monitor started");
            loop {
                tokio::time::sleep(interval).await;
                self.run_sweep().await;
            }
        });

        tokio::spawn(async move {
            match handle.await {
                Ok(_) => tracing::error!(
                    "Health monitor terminated unexpectedly; node state will go stale until restart"
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    "Health monitor panicked; node state will go stale until restart"
                ),
            }
        });
    }
}
