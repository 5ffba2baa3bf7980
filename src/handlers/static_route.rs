//! Static hash routing handler
//!
//! Catch-all for static mode: the client id alone decides the target node,
//! with no health awareness, sessions or retries. A dead node stays in the
//! rotation and its failures surface to the client as gateway errors.

use crate::balance::StaticPool;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::{Metrics, outcome};
use crate::proxy::{self, ForwardTarget};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Response;
use std::sync::Arc;

use super::route::CLIENT_ID_HEADER;

/// Shared state for static mode
#[derive(Clone)]
pub struct StaticState {
    config: Arc<Config>,
    pool: Arc<StaticPool>,
    metrics: Arc<Metrics>,
    http: reqwest::Client,
}

impl StaticState {
    pub fn new(config: Arc<Config>, pool: StaticPool) -> AppResult<Self> {
        let metrics = Arc::new(
            Metrics::new().map_err(|e| AppError::Config(format!("metrics setup: {e}")))?,
        );
        Ok(Self {
            config,
            pool: Arc::new(pool),
            metrics,
            http: reqwest::Client::new(),
        })
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// Catch-all static routing handler
pub async fn route(
    State(state): State<StaticState>,
    request: Request,
) -> AppResult<Response<Body>> {
    let (parts, body) = request.into_parts();

    let client_id = parts
        .headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            state.metrics.record_request(outcome::CLIENT_ERROR);
            AppError::MissingHeader(CLIENT_ID_HEADER)
        })?;

    let node = state.pool.pick(client_id);
    tracing::debug!(
        client_id = %client_id,
        node_id = %node.id,
        region = %node.region,
        "Hash-routed request"
    );

    // Bounded read: an oversized or broken inbound body is the client's fault
    let body = axum::body::to_bytes(body, state.config.server.max_body_bytes)
        .await
        .map_err(|e| {
            state.metrics.record_request(outcome::CLIENT_ERROR);
            AppError::ClientStream(e.to_string())
        })?;
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    match proxy::forward(
        &state.http,
        &ForwardTarget::from(node),
        state.config.timeouts.forward_base_ms,
        parts.method,
        path_and_query,
        &parts.headers,
        body,
    )
    .await
    {
        Ok(response) => {
            state.metrics.record_request(outcome::SUCCESS);
            Ok(response)
        }
        Err(e) => {
            state.metrics.record_request(outcome::BACKEND_ERROR);
            Err(e.into())
        }
    }
}

/// GET /metrics — Prometheus text exposition
pub async fn metrics(State(state): State<StaticState>) -> String {
    state.metrics.gather()
}
