//! Request forwarding to backend nodes
//!
//! Forwards one request/response exchange under a deadline of the configured
//! base timeout plus the node's fixed region latency. The response is streamed
//! back unbuffered with status and headers as received. Failures come back as
//! explicit classes so callers can distinguish a dead backend (retry once)
//! from a timeout (same), while client-side stream errors are classified
//! before this module is ever reached: the inbound body is buffered by the
//! handler so a single retry can replay it.

use crate::balance::StaticNode;
use crate::error::AppError;
use crate::registry::NodeSnapshot;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Response, header};
use std::time::Duration;
use thiserror::Error;

/// Backend-attributed forwarding failure
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("server {node_id} unreachable: {reason}")]
    Backend { node_id: String, reason: String },

    #[error("server {node_id} timeout after {timeout_ms} ms")]
    Timeout { node_id: String, timeout_ms: u64 },
}

impl From<ForwardError> for AppError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::Backend { node_id, reason } => {
                AppError::BackendUnavailable { node_id, reason }
            }
            ForwardError::Timeout { node_id, timeout_ms } => {
                AppError::BackendTimeout { node_id, timeout_ms }
            }
        }
    }
}

/// Address and deadline inputs for one forwarded exchange
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    pub node_id: String,
    pub hostname: String,
    pub port: u16,
    pub latency_ms: u64,
}

impl From<&NodeSnapshot> for ForwardTarget {
    fn from(node: &NodeSnapshot) -> Self {
        Self {
            node_id: node.id.clone(),
            hostname: node.hostname.clone(),
            port: node.port,
            latency_ms: node.latency_ms,
        }
    }
}

impl From<&StaticNode> for ForwardTarget {
    fn from(node: &StaticNode) -> Self {
        Self {
            node_id: node.id.clone(),
            hostname: node.hostname.clone(),
            port: node.port,
            latency_ms: node.latency_ms,
        }
    }
}

/// Forward one exchange to a node and stream its response back.
///
/// The deadline covers the whole exchange; expiry after response headers were
/// received surfaces as an error on the streamed body instead (partial
/// response, connection closed), mirroring reverse-proxy behavior under
/// failure.
pub async fn forward(
    client: &reqwest::Client,
    target: &ForwardTarget,
    base_timeout_ms: u64,
    method: Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, ForwardError> {
    let timeout_ms = base_timeout_ms + target.latency_ms;
    let url = format!("http://{}:{}{}", target.hostname, target.port, path_and_query);

    tracing::debug!(
        node_id = %target.node_id,
        url = %url,
        method = %method,
        timeout_ms = timeout_ms,
        "Forwarding request"
    );

    let response = client
        .request(method, &url)
        .headers(strip_hop_headers(headers))
        .body(body)
        .timeout(Duration::from_millis(timeout_ms))
        .send()
        .await
        .map_err(|e| classify_send_error(e, target, timeout_ms))?;

    let status = response.status();
    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        *response_headers = strip_hop_headers(response.headers());
    }

    builder
        .body(Body::from_stream(response.bytes_stream()))
        .map_err(|e| ForwardError::Backend {
            node_id: target.node_id.clone(),
            reason: format!("failed to assemble response: {e}"),
        })
}

fn classify_send_error(
    err: reqwest::Error,
    target: &ForwardTarget,
    timeout_ms: u64,
) -> ForwardError {
    if err.is_timeout() {
        tracing::warn!(node_id = %target.node_id, timeout_ms = timeout_ms, "Backend timeout");
        ForwardError::Timeout {
            node_id: target.node_id.clone(),
            timeout_ms,
        }
    } else {
        tracing::warn!(node_id = %target.node_id, error = %err, "Backend exchange failed");
        ForwardError::Backend {
            node_id: target.node_id.clone(),
            reason: err.to_string(),
        }
    }
}

/// Drop connection-scoped headers that must not be forwarded verbatim.
///
/// Host and content-length are recomputed by the client; the others are
/// hop-by-hop per RFC 9110.
fn strip_hop_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in [
        header::HOST,
        header::CONTENT_LENGTH,
        header::CONNECTION,
        header::TRANSFER_ENCODING,
        header::TE,
        header::TRAILER,
        header::UPGRADE,
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
    ] {
        out.remove(&name);
    }
    out.remove("keep-alive");
    out
}
