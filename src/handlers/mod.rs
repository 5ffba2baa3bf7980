//! HTTP request handlers for the georoute API

use crate::balance::Selector;
use crate::config::Config;
use crate::error::AppResult;
use crate::metrics::Metrics;
use crate::registry::NodeRegistry;
use crate::session::{IDLE_EVICTION, SessionManager};
use std::sync::Arc;

pub mod admin;
pub mod route;
pub mod static_route;

/// Application state shared across all dynamic-mode handlers
///
/// All fields are Arc'd (or internally Arc'd) for cheap cloning across Axum
/// handlers. The health monitor shares the same registry and metrics but is
/// spawned separately at startup.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    registry: Arc<NodeRegistry>,
    selector: Selector,
    sessions: SessionManager,
    metrics: Arc<Metrics>,
    http: reqwest::Client,
}

impl AppState {
    /// Create a new AppState from configuration
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let registry = Arc::new(NodeRegistry::new());
        let selector = Selector::new(registry.clone());
        let metrics = Arc::new(
            Metrics::new()
                .map_err(|e| crate::error::AppError::Config(format!("metrics setup: {e}")))?,
        );
        let sessions = SessionManager::new_with_metrics(IDLE_EVICTION, metrics.clone());
        // Per-request deadlines are set per exchange; no client-level timeout
        let http = reqwest::Client::new();

        Ok(Self {
            config,
            registry,
            selector,
            sessions,
            metrics,
            http,
        })
    }

    /// Test constructor with a short idle eviction bound
    #[cfg(test)]
    pub(crate) fn with_idle_timeout(
        config: Arc<Config>,
        idle_timeout: std::time::Duration,
    ) -> AppResult<Self> {
        let mut state = Self::new(config)?;
        state.sessions = SessionManager::new(idle_timeout);
        Ok(state)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}
