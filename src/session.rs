//! Sticky client sessions with sliding idle eviction
//!
//! Maps a client identifier to its currently bound node. Each bind or refresh
//! rearms a single expiry deadline: the superseded timer task is aborted, and
//! an epoch bump backstops a timer already past its sleep when the abort
//! lands, so a stale timer never evicts a refreshed session. All per-client
//! mutation is serialized by the map lock.

use crate::metrics::Metrics;
use crate::region::Region;
use crate::registry::NodeKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sliding idle bound before a session is evicted
pub const IDLE_EVICTION: Duration = Duration::from_secs(9000);

/// A client's bound routing target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBinding {
    pub region: Region,
    pub node: NodeKey,
}

#[derive(Debug)]
struct SessionEntry {
    binding: SessionBinding,
    epoch: u64,
    deadline: tokio::task::JoinHandle<()>,
}

struct Inner {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    idle_timeout: Duration,
    metrics: Option<Arc<Metrics>>,
}

/// Owner of the client-id → sticky-node map
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                idle_timeout,
                metrics: None,
            }),
        }
    }

    /// Like [`new`](Self::new), with eviction counting wired to metrics
    pub fn new_with_metrics(idle_timeout: Duration, metrics: Arc<Metrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                idle_timeout,
                metrics: Some(metrics),
            }),
        }
    }

    /// Current binding for a client, if a live session exists
    pub fn lookup(&self, client_id: &str) -> Option<SessionBinding> {
        let sessions = self.inner.sessions.lock().expect("session map poisoned");
        sessions.get(client_id).map(|entry| entry.binding)
    }

    /// Bind (or rebind) a client to a node and arm a fresh idle deadline
    pub fn bind(&self, client_id: &str, binding: SessionBinding) {
        {
            let mut sessions = self.inner.sessions.lock().expect("session map poisoned");
            let epoch = sessions
                .get(client_id)
                .map(|entry| entry.epoch + 1)
                .unwrap_or(0);
            let deadline = self.arm_deadline(client_id.to_string(), epoch);
            let previous = sessions.insert(
                client_id.to_string(),
                SessionEntry {
                    binding,
                    epoch,
                    deadline,
                },
            );
            if let Some(entry) = previous {
                entry.deadline.abort();
            }
        }
        tracing::debug!(
            client_id = %client_id,
            region = %binding.region,
            node_key = %binding.node,
            "Session bound"
        );
    }

    /// Refresh the idle deadline without touching the binding.
    ///
    /// No-op for clients with no live session.
    pub fn touch(&self, client_id: &str) {
        let mut sessions = self.inner.sessions.lock().expect("session map poisoned");
        let Some(entry) = sessions.get_mut(client_id) else {
            return;
        };
        entry.epoch += 1;
        entry.deadline.abort();
        entry.deadline = self.arm_deadline(client_id.to_string(), entry.epoch);
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.inner.sessions.lock().expect("session map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn arm_deadline(&self, client_id: String, epoch: u64) -> tokio::task::JoinHandle<()> {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.idle_timeout).await;
            let mut sessions = inner.sessions.lock().expect("session map poisoned");
            // The abort on refresh can race a timer already past its sleep;
            // the epoch check keeps such a timer from evicting.
            let expired = matches!(sessions.get(&client_id), Some(entry) if entry.epoch == epoch);
            if expired {
                sessions.remove(&client_id);
                drop(sessions);
                tracing::info!(client_id = %client_id, "Session evicted after idle timeout");
                if let Some(metrics) = &inner.metrics {
                    metrics.record_session_eviction();
                }
            }
        })
    }
}
