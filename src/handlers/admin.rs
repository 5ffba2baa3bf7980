//! Node registration, deregistration and metrics endpoints

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::region::Region;
use crate::registry::Registration;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Registration payload; every field is required
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub id: Option<String>,
    pub port: Option<u16>,
    pub region: Option<Region>,
    pub capacity: Option<u32>,
    pub hostname: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeregisterRequest {
    pub id: String,
    pub region: Region,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub status: &'static str,
    pub node_key: String,
}

fn required<T>(field: Option<T>, name: &str) -> AppResult<T> {
    field.ok_or_else(|| AppError::Validation(format!("missing required field: {name}")))
}

/// POST /register
///
/// Adds a node to the dynamic registry. Duplicate registrations are accepted
/// and create an additional entry. A body that fails to deserialize (bad
/// JSON, unknown region name) is a validation error, not an extractor 422.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(payload) = payload.map_err(|e| AppError::Validation(e.body_text()))?;
    let registration = Registration {
        id: required(payload.id, "id")?,
        port: required(payload.port, "port")?,
        region: required(payload.region, "region")?,
        capacity: required(payload.capacity, "capacity")?,
        hostname: required(payload.hostname, "hostname")?,
        url: required(payload.url, "url")?,
    };

    let key = state.registry().register(registration).await?;
    state
        .metrics()
        .set_registered_nodes(state.registry().node_count().await);

    Ok(Json(RegisterResponse {
        status: "registration success",
        node_key: key.to_string(),
    }))
}

/// POST /deregister
///
/// Removes every entry matching id and url from the region. Deliberately
/// lenient: deregistering an unknown node succeeds, so node shutdown hooks
/// can fire without caring whether registration ever happened.
pub async fn deregister(
    State(state): State<AppState>,
    Json(payload): Json<DeregisterRequest>,
) -> impl IntoResponse {
    state
        .registry()
        .deregister(&payload.id, payload.region, &payload.url)
        .await;
    state
        .metrics()
        .set_registered_nodes(state.registry().node_count().await);
    Json(json!({ "status": "ok" }))
}

/// GET /metrics — Prometheus text exposition
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics().gather()
}
