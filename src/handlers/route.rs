//! Dynamic request routing with sticky sessions and single-retry failover
//!
//! Catch-all handler for dynamic mode. Every request must identify its client
//! and region via headers; the client's sticky binding decides whether the
//! request stays on its bound node, overflows to a backup for one exchange, or
//! triggers a fresh allocation. A failed primary exchange gets exactly one
//! retry on a backup node, and a successful retry rebinds the session to the
//! backup.

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::metrics::outcome;
use crate::proxy::{self, ForwardTarget};
use crate::region::Region;
use crate::registry::{NodeKey, NodeRegistry, NodeSnapshot};
use crate::session::SessionBinding;
use axum::body::{Body, BodyDataStream, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, Response};
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

pub const CLIENT_ID_HEADER: &str = "client-id";
pub const CLIENT_REGION_HEADER: &str = "client-region";

/// Fraction of capacity above which a sticky node overflows to a backup
const OVERFLOW_THRESHOLD: f64 = 0.90;

/// What to do with a request given the client's current sticky binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoutePlan {
    /// Bound node is healthy with headroom; stay on it
    Sticky,
    /// Bound node is healthy but loaded; borrow a backup for this exchange
    /// without rebinding
    Overflow,
    /// No usable binding; allocate and bind fresh
    Allocate,
}

/// Pure routing decision from the bound node's snapshot (None when the client
/// has no live binding or the bound node left the registry).
fn plan_route(bound: Option<&NodeSnapshot>) -> RoutePlan {
    match bound {
        Some(node) if node.available => {
            if (node.active_connections as f64) < OVERFLOW_THRESHOLD * node.capacity as f64 {
                RoutePlan::Sticky
            } else {
                RoutePlan::Overflow
            }
        }
        _ => RoutePlan::Allocate,
    }
}

fn required_header<'a>(headers: &'a HeaderMap, name: &'static str) -> AppResult<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .ok_or(AppError::MissingHeader(name))
}

/// Catch-all dynamic routing handler
pub async fn route(
    State(state): State<AppState>,
    request: Request,
) -> AppResult<Response<Body>> {
    let (parts, body) = request.into_parts();

    let client_id = match required_header(&parts.headers, CLIENT_ID_HEADER) {
        Ok(id) => id.to_string(),
        Err(e) => {
            state.metrics().record_request(outcome::CLIENT_ERROR);
            return Err(e);
        }
    };
    let client_region: Region = match required_header(&parts.headers, CLIENT_REGION_HEADER)
        .and_then(|raw| raw.parse().map_err(|_| AppError::UnknownRegion(raw.to_string())))
    {
        Ok(region) => region,
        Err(e) => {
            state.metrics().record_request(outcome::CLIENT_ERROR);
            return Err(e);
        }
    };

    // The inbound body is buffered so the single failover retry can replay
    // it. The read is bounded; an oversized or broken body is the client's
    // fault.
    let body = match axum::body::to_bytes(body, state.config().server.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            state.metrics().record_request(outcome::CLIENT_ERROR);
            return Err(AppError::ClientStream(e.to_string()));
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    let bound = match state.sessions().lookup(&client_id) {
        Some(binding) => state.registry().get(binding.region, binding.node).await,
        None => None,
    };

    let primary = match (plan_route(bound.as_ref()), bound) {
        (RoutePlan::Sticky, Some(node)) => {
            tracing::debug!(
                client_id = %client_id,
                node_id = %node.id,
                node_key = %node.key,
                "Routing to sticky node"
            );
            state.sessions().touch(&client_id);
            node
        }
        (RoutePlan::Overflow, Some(node)) => {
            tracing::info!(
                client_id = %client_id,
                node_id = %node.id,
                active_connections = node.active_connections,
                capacity = node.capacity,
                "Sticky node at capacity, borrowing backup"
            );
            // The session stays bound to the loaded node and its deadline
            // slides, whether or not a backup turns out to exist.
            state.sessions().touch(&client_id);
            state
                .selector()
                .allocate(client_region, Some(node.key))
                .await
                .ok_or_else(|| {
                    state.metrics().record_request(outcome::EXHAUSTED);
                    AppError::NoBackupAvailable
                })?
        }
        _ => {
            let node = state
                .selector()
                .allocate(client_region, None)
                .await
                .ok_or_else(|| {
                    state.metrics().record_request(outcome::EXHAUSTED);
                    AppError::NoServerAvailable
                })?;
            state.sessions().bind(
                &client_id,
                SessionBinding {
                    region: node.region,
                    node: node.key,
                },
            );
            node
        }
    };

    proxy_with_failover(
        &state,
        &client_id,
        client_region,
        primary,
        parts.method,
        &path_and_query,
        &parts.headers,
        body,
    )
    .await
}

/// Forward to the chosen node; on failure, retry exactly once on a backup that
/// excludes the failed node. A successful retry rebinds the session to the
/// backup.
#[allow(clippy::too_many_arguments)]
async fn proxy_with_failover(
    state: &AppState,
    client_id: &str,
    client_region: Region,
    primary: NodeSnapshot,
    method: Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> AppResult<Response<Body>> {
    let base_timeout_ms = state.config().timeouts.forward_base_ms;

    match forward_exchange(
        state,
        &primary,
        base_timeout_ms,
        method.clone(),
        path_and_query,
        headers,
        body.clone(),
    )
    .await
    {
        Ok(response) => {
            state.metrics().record_request(outcome::SUCCESS);
            return Ok(response);
        }
        Err(e) => {
            tracing::warn!(
                client_id = %client_id,
                node_id = %primary.id,
                node_key = %primary.key,
                error = %e,
                "Primary exchange failed, attempting failover"
            );
            state
                .registry()
                .mark_backend_failure(primary.region, primary.key)
                .await;
            state.metrics().record_failover();
        }
    }

    let backup = state
        .selector()
        .allocate(client_region, Some(primary.key))
        .await
        .ok_or_else(|| {
            state.metrics().record_request(outcome::EXHAUSTED);
            AppError::AllServersFailed
        })?;

    match forward_exchange(
        state,
        &backup,
        base_timeout_ms,
        method,
        path_and_query,
        headers,
        body,
    )
    .await
    {
        Ok(response) => {
            tracing::info!(
                client_id = %client_id,
                failed_node = %primary.id,
                backup_node = %backup.id,
                "Failover succeeded, session rebound"
            );
            state.sessions().bind(
                client_id,
                SessionBinding {
                    region: backup.region,
                    node: backup.key,
                },
            );
            state.metrics().record_request(outcome::FAILOVER_SUCCESS);
            Ok(response)
        }
        Err(e) => {
            tracing::error!(
                client_id = %client_id,
                backup_node = %backup.id,
                error = %e,
                "Backup exchange failed, giving up"
            );
            state
                .registry()
                .mark_backend_failure(backup.region, backup.key)
                .await;
            state.metrics().record_request(outcome::BACKEND_ERROR);
            Err(AppError::AllServersFailed)
        }
    }
}

/// Holds a node's in-flight connection slot; releases it on drop.
///
/// Attached to the response body so the count covers the streamed bytes,
/// not just the arrival of the response headers. Dropping it on an error
/// path releases the slot immediately.
struct ExchangeGuard {
    registry: Arc<NodeRegistry>,
    region: Region,
    node: NodeKey,
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let region = self.region;
        let node = self.node;
        tokio::spawn(async move {
            registry.end_exchange(region, node).await;
        });
    }
}

/// Response data stream that keeps its node's connection slot held until the
/// body finishes (or the client disconnects and the stream is dropped)
struct GuardedStream {
    inner: BodyDataStream,
    _guard: ExchangeGuard,
}

impl Stream for GuardedStream {
    type Item = Result<Bytes, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// One forwarded exchange with the connection count held for its duration,
/// response body included
async fn forward_exchange(
    state: &AppState,
    node: &NodeSnapshot,
    base_timeout_ms: u64,
    method: Method,
    path_and_query: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response<Body>, proxy::ForwardError> {
    state.registry().begin_exchange(node.region, node.key).await;
    let guard = ExchangeGuard {
        registry: state.registry().clone(),
        region: node.region,
        node: node.key,
    };

    // On error the guard drops here and the slot is released
    let response = proxy::forward(
        state.http(),
        &ForwardTarget::from(node),
        base_timeout_ms,
        method,
        path_and_query,
        headers,
        body,
    )
    .await?;

    let (parts, body) = response.into_parts();
    let body = Body::from_stream(GuardedStream {
        inner: body.into_data_stream(),
        _guard: guard,
    });
    Ok(Response::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Mode, ServerConfig};
    use crate::registry::Registration;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::response::IntoResponse;
    use std::time::Duration;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config_with_cap(max_body_bytes: usize) -> Arc<Config> {
        Arc::new(Config {
            mode: Mode::Dynamic,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                max_body_bytes,
            },
            timeouts: Default::default(),
            health: Default::default(),
            static_pool: Default::default(),
            observability: Default::default(),
        })
    }

    fn test_state() -> AppState {
        AppState::new(test_config_with_cap(1024 * 1024)).expect("state should build")
    }

    async fn register_mock(
        state: &AppState,
        id: &str,
        server: &MockServer,
        region: Region,
        capacity: u32,
    ) -> NodeKey {
        let addr = server.address();
        state
            .registry()
            .register(Registration {
                id: id.to_string(),
                port: addr.port(),
                region,
                capacity,
                hostname: addr.ip().to_string(),
                url: server.uri(),
            })
            .await
            .expect("should register")
    }

    async fn register_dead(state: &AppState, id: &str, region: Region, capacity: u32) -> NodeKey {
        state
            .registry()
            .register(Registration {
                id: id.to_string(),
                port: 1,
                region,
                capacity,
                hostname: "127.0.0.1".to_string(),
                url: "http://127.0.0.1:1".to_string(),
            })
            .await
            .expect("should register")
    }

    fn request(client_id: &str, region: &str, target_path: &str) -> Request {
        HttpRequest::builder()
            .method(Method::POST)
            .uri(target_path)
            .header(CLIENT_ID_HEADER, client_id)
            .header(CLIENT_REGION_HEADER, region)
            .body(Body::from("payload"))
            .expect("request should build")
    }

    fn snapshot(available: bool, active: u32, capacity: u32) -> NodeSnapshot {
        NodeSnapshot {
            key: NodeKey(1),
            id: "s1".to_string(),
            hostname: "127.0.0.1".to_string(),
            port: 3001,
            region: Region::UsEast,
            capacity,
            latency_ms: 10,
            active_connections: active,
            available,
            score: 0.0,
        }
    }

    #[test]
    fn test_plan_no_binding_allocates() {
        assert_eq!(plan_route(None), RoutePlan::Allocate);
    }

    #[test]
    fn test_plan_healthy_bound_node_is_sticky() {
        assert_eq!(plan_route(Some(&snapshot(true, 0, 10))), RoutePlan::Sticky);
        assert_eq!(plan_route(Some(&snapshot(true, 8, 10))), RoutePlan::Sticky);
    }

    #[test]
    fn test_plan_loaded_node_overflows_at_ninety_percent() {
        assert_eq!(plan_route(Some(&snapshot(true, 9, 10))), RoutePlan::Overflow);
        assert_eq!(plan_route(Some(&snapshot(true, 10, 10))), RoutePlan::Overflow);
        // capacity 1: a single in-flight exchange crosses the threshold
        assert_eq!(plan_route(Some(&snapshot(true, 1, 1))), RoutePlan::Overflow);
    }

    #[test]
    fn test_plan_unavailable_bound_node_reallocates() {
        assert_eq!(plan_route(Some(&snapshot(false, 0, 10))), RoutePlan::Allocate);
    }

    #[tokio::test]
    async fn test_route_binds_session_and_forwards() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let state = test_state();
        let key = register_mock(&state, "s1", &server, Region::UsEast, 4).await;

        let response = route(State(state.clone()), request("alice", "us-east", "/orders"))
            .await
            .expect("route should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            state.sessions().lookup("alice"),
            Some(SessionBinding {
                region: Region::UsEast,
                node: key,
            })
        );
    }

    #[tokio::test]
    async fn test_sticky_client_returns_to_bound_node() {
        let preferred = MockServer::start().await;
        let other = MockServer::start().await;
        for server in [&preferred, &other] {
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(200))
                .mount(server)
                .await;
        }

        let state = test_state();
        // The other node scores higher, so only the sticky binding explains
        // repeated hits on the preferred node.
        register_mock(&state, "high", &other, Region::UsEast, 1).await;
        let low = register_mock(&state, "low", &preferred, Region::UsEast, 10).await;
        state.sessions().bind(
            "alice",
            SessionBinding {
                region: Region::UsEast,
                node: low,
            },
        );

        for _ in 0..3 {
            route(State(state.clone()), request("alice", "us-east", "/data"))
                .await
                .expect("route should succeed");
        }
        assert_eq!(preferred.received_requests().await.unwrap().len(), 3);
        assert!(other.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_client_id_is_400() {
        let state = test_state();
        let req = HttpRequest::builder()
            .uri("/data")
            .header(CLIENT_REGION_HEADER, "us-east")
            .body(Body::empty())
            .unwrap();

        let err = route(State(state), req).await.unwrap_err();
        assert!(matches!(err, AppError::MissingHeader("client-id")));
    }

    #[tokio::test]
    async fn test_unknown_region_is_400() {
        let state = test_state();
        let err = route(State(state), request("alice", "atlantis", "/data"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnknownRegion(_)));
    }

    #[tokio::test]
    async fn test_no_registered_nodes_is_503() {
        let state = test_state();
        let err = route(State(state), request("alice", "us-east", "/data"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoServerAvailable));
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_failover_retries_once_and_rebinds() {
        let backup = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("from backup"))
            .mount(&backup)
            .await;

        let state = test_state();
        // Dead node scores higher (capacity 1) so allocation picks it first
        let dead = register_dead(&state, "dead", Region::UsEast, 1).await;
        let live = register_mock(&state, "live", &backup, Region::UsEast, 10).await;

        let response = route(State(state.clone()), request("alice", "us-east", "/data"))
            .await
            .expect("failover should succeed");
        assert_eq!(response.status(), StatusCode::OK);

        // Session rebound to the backup, failed node marked unavailable
        assert_eq!(
            state.sessions().lookup("alice"),
            Some(SessionBinding {
                region: Region::UsEast,
                node: live,
            })
        );
        let failed = state.registry().get(Region::UsEast, dead).await.unwrap();
        assert!(!failed.available);
    }

    #[tokio::test]
    async fn test_both_attempts_failing_is_503_no_servers() {
        let state = test_state();
        register_dead(&state, "dead-1", Region::UsEast, 1).await;
        register_dead(&state, "dead-2", Region::UsEast, 2).await;

        let err = route(State(state.clone()), request("alice", "us-east", "/data"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no servers available");
        assert!(matches!(err, AppError::AllServersFailed));
    }

    #[tokio::test]
    async fn test_overflow_borrows_backup_without_rebinding() {
        let loaded = MockServer::start().await;
        let spare = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&spare)
            .await;

        let state = test_state();
        let loaded_key = register_mock(&state, "loaded", &loaded, Region::UsEast, 1).await;
        register_mock(&state, "spare", &spare, Region::UsEast, 10).await;

        // Simulate an in-flight exchange holding the bound node at capacity
        state.registry().begin_exchange(Region::UsEast, loaded_key).await;
        state.sessions().bind(
            "alice",
            SessionBinding {
                region: Region::UsEast,
                node: loaded_key,
            },
        );

        let response = route(State(state.clone()), request("alice", "us-east", "/data"))
            .await
            .expect("overflow should succeed");
        assert_eq!(response.status(), StatusCode::OK);

        // Request went to the spare node but the binding is unchanged
        assert_eq!(spare.received_requests().await.unwrap().len(), 1);
        assert!(loaded.received_requests().await.unwrap().is_empty());
        assert_eq!(
            state.sessions().lookup("alice"),
            Some(SessionBinding {
                region: Region::UsEast,
                node: loaded_key,
            })
        );
    }

    #[tokio::test]
    async fn test_overflow_with_no_backup_is_503() {
        let loaded = MockServer::start().await;
        let state = test_state();
        let loaded_key = register_mock(&state, "loaded", &loaded, Region::UsEast, 1).await;
        state.registry().begin_exchange(Region::UsEast, loaded_key).await;
        state.sessions().bind(
            "alice",
            SessionBinding {
                region: Region::UsEast,
                node: loaded_key,
            },
        );

        let err = route(State(state), request("alice", "us-east", "/data"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoBackupAvailable));
    }

    #[tokio::test]
    async fn test_pruned_bound_node_triggers_fresh_allocation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let state = test_state();
        let live = register_mock(&state, "live", &server, Region::UsEast, 2).await;
        // Stale binding to a node that no longer exists
        state.sessions().bind(
            "alice",
            SessionBinding {
                region: Region::UsEast,
                node: NodeKey(999),
            },
        );

        let response = route(State(state.clone()), request("alice", "us-east", "/data"))
            .await
            .expect("route should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            state.sessions().lookup("alice"),
            Some(SessionBinding {
                region: Region::UsEast,
                node: live,
            })
        );
    }

    #[tokio::test]
    async fn test_cross_region_allocation_for_empty_home_region() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let state = test_state();
        register_mock(&state, "east", &server, Region::UsEast, 2).await;

        // us-west clients have no home region in the registry at all
        let response = route(State(state), request("alice", "us-west", "/data"))
            .await
            .expect("route should succeed");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_connection_held_until_response_body_consumed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("streamed"))
            .mount(&server)
            .await;

        let state = test_state();
        let key = register_mock(&state, "s1", &server, Region::UsEast, 4).await;

        let response = route(State(state.clone()), request("alice", "us-east", "/data"))
            .await
            .expect("route should succeed");

        // Headers have arrived but the body is still unconsumed: the node
        // must still carry the exchange.
        let node = state.registry().get(Region::UsEast, key).await.unwrap();
        assert_eq!(node.active_connections, 1);

        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should collect");
        tokio::time::sleep(Duration::from_millis(50)).await;
        let node = state.registry().get(Region::UsEast, key).await.unwrap();
        assert_eq!(node.active_connections, 0);
    }

    #[tokio::test]
    async fn test_overflow_without_backup_still_slides_idle_deadline() {
        let loaded = MockServer::start().await;
        let state = AppState::with_idle_timeout(
            test_config_with_cap(1024 * 1024),
            Duration::from_millis(80),
        )
        .expect("state should build");
        let loaded_key = register_mock(&state, "loaded", &loaded, Region::UsEast, 1).await;
        state.registry().begin_exchange(Region::UsEast, loaded_key).await;
        state.sessions().bind(
            "alice",
            SessionBinding {
                region: Region::UsEast,
                node: loaded_key,
            },
        );

        // Keep hitting the loaded node past several would-be deadlines; every
        // attempt fails for lack of a backup but must still refresh the
        // session.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let err = route(State(state.clone()), request("alice", "us-east", "/data"))
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::NoBackupAvailable));
        }
        assert_eq!(
            state.sessions().lookup("alice"),
            Some(SessionBinding {
                region: Region::UsEast,
                node: loaded_key,
            })
        );

        // Left alone, the short deadline still evicts
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(state.sessions().lookup("alice").is_none());
    }

    #[tokio::test]
    async fn test_oversized_body_is_client_error() {
        let server = MockServer::start().await;
        let state = AppState::new(test_config_with_cap(16)).expect("state should build");
        register_mock(&state, "s1", &server, Region::UsEast, 4).await;

        let req = HttpRequest::builder()
            .method(Method::POST)
            .uri("/data")
            .header(CLIENT_ID_HEADER, "alice")
            .header(CLIENT_REGION_HEADER, "us-east")
            .body(Body::from(vec![0u8; 64]))
            .expect("request should build");

        let err = route(State(state), req).await.unwrap_err();
        assert!(matches!(err, AppError::ClientStream(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
        // No backend was ever contacted
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
