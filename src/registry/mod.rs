//! Dynamic node registry
//!
//! Maintains, per region, the set of currently registered nodes and their
//! mutable runtime state (availability, load, health counters). The registry
//! is the single owner of node state: request handling, the selector and the
//! health monitor all go through its operations, which serialize access via
//! one RwLock.

pub mod node;

pub use node::{FAILURE_THRESHOLD, HealthState, Node, NodeKey, NodeSnapshot};

use crate::error::{AppError, AppResult};
use crate::region::Region;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

/// Validated registration payload
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: String,
    pub port: u16,
    pub region: Region,
    pub capacity: u32,
    pub hostname: String,
    pub url: String,
}

/// Per-node view the health monitor probes against
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub key: NodeKey,
    pub id: String,
    pub url: String,
    pub in_cooldown: bool,
    pub last_failed_at: Option<Instant>,
}

/// Region-keyed registry of dynamic nodes
pub struct NodeRegistry {
    regions: RwLock<HashMap<Region, Vec<Node>>>,
    next_key: AtomicU64,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// Create a registry with an empty node list per serving region
    pub fn new() -> Self {
        let mut regions = HashMap::new();
        for region in Region::SERVING {
            regions.insert(region, Vec::new());
        }
        Self {
            regions: RwLock::new(regions),
            next_key: AtomicU64::new(1),
        }
    }

    /// Register a node in its region.
    ///
    /// Duplicate id/url registrations are accepted and produce a second entry
    /// with its own key.
    pub async fn register(&self, registration: Registration) -> AppResult<NodeKey> {
        if registration.id.trim().is_empty() {
            return Err(AppError::Validation("id must not be empty".to_string()));
        }
        if registration.hostname.trim().is_empty() {
            return Err(AppError::Validation("hostname must not be empty".to_string()));
        }
        if registration.url.trim().is_empty() {
            return Err(AppError::Validation("url must not be empty".to_string()));
        }
        if registration.port == 0 {
            return Err(AppError::Validation("port must be greater than 0".to_string()));
        }
        if registration.capacity == 0 {
            return Err(AppError::Validation(
                "capacity must be greater than 0".to_string(),
            ));
        }
        let latency_ms = registration.region.latency_ms().ok_or_else(|| {
            AppError::Validation(format!(
                "region {} does not accept registrations",
                registration.region
            ))
        })?;

        let key = NodeKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let mut node = Node {
            key,
            id: registration.id,
            hostname: registration.hostname,
            port: registration.port,
            url: registration.url,
            region: registration.region,
            capacity: registration.capacity,
            latency_ms,
            active_connections: 0,
            available: true,
            score: 0.0,
            failed_probes: 0,
            last_failed_at: None,
            in_cooldown: false,
            degraded: false,
        };
        node.recompute_score();

        let mut regions = self.regions.write().await;
        let list = regions.entry(registration.region).or_default();
        tracing::info!(
            node_id = %node.id,
            node_key = %key,
            region = %node.region,
            capacity = node.capacity,
            score = node.score,
            "Registered node"
        );
        list.push(node);
        Ok(key)
    }

    /// Remove every entry matching id and url from the region list.
    ///
    /// Resets the active connection count first. No-op when nothing matches.
    pub async fn deregister(&self, id: &str, region: Region, url: &str) {
        let mut regions = self.regions.write().await;
        if let Some(list) = regions.get_mut(&region) {
            let before = list.len();
            list.retain_mut(|node| {
                if node.id == id && node.url == url {
                    node.active_connections = 0;
                    false
                } else {
                    true
                }
            });
            if before != list.len() {
                tracing::info!(node_id = %id, region = %region, "Deregistered node");
            }
        }
    }

    /// Snapshot the nodes registered in a region.
    ///
    /// Returns None for regions that have no registry entry at all (client-only
    /// regions), which the selector treats differently from an empty list.
    pub async fn candidates(&self, region: Region) -> Option<Vec<NodeSnapshot>> {
        let regions = self.regions.read().await;
        regions
            .get(&region)
            .map(|list| list.iter().map(NodeSnapshot::from).collect())
    }

    /// Snapshot a single node by key
    pub async fn get(&self, region: Region, key: NodeKey) -> Option<NodeSnapshot> {
        let regions = self.regions.read().await;
        regions
            .get(&region)?
            .iter()
            .find(|node| node.key == key)
            .map(NodeSnapshot::from)
    }

    /// Count of registered nodes across all regions
    pub async fn node_count(&self) -> usize {
        let regions = self.regions.read().await;
        regions.values().map(Vec::len).sum()
    }

    /// Increment the active connection count around a forwarded exchange.
    ///
    /// Returns false when the node has disappeared (deregistered or pruned
    /// mid-flight).
    pub async fn begin_exchange(&self, region: Region, key: NodeKey) -> bool {
        self.with_node(region, key, |node| {
            node.active_connections += 1;
            node.recompute_score();
        })
        .await
    }

    /// Decrement the active connection count after a forwarded exchange.
    ///
    /// Always paired with [`begin_exchange`](Self::begin_exchange), on failure
    /// paths included.
    pub async fn end_exchange(&self, region: Region, key: NodeKey) {
        self.with_node(region, key, |node| {
            node.active_connections = node.active_connections.saturating_sub(1);
            node.recompute_score();
        })
        .await;
    }

    /// Record a forwarding failure against a node: clears availability and
    /// bumps the failure counter. Cooldown entry stays the health monitor's
    /// call.
    pub async fn mark_backend_failure(&self, region: Region, key: NodeKey) {
        self.with_node(region, key, |node| {
            node.available = false;
            node.failed_probes += 1;
            tracing::warn!(
                node_id = %node.id,
                node_key = %node.key,
                region = %node.region,
                failed_probes = node.failed_probes,
                "Backend failure recorded, node marked unavailable"
            );
        })
        .await;
    }

    /// Record a successful health probe: resets the failure counter and
    /// restores availability.
    pub async fn record_probe_success(&self, region: Region, key: NodeKey) {
        self.with_node(region, key, |node| {
            if !node.available {
                tracing::info!(
                    node_id = %node.id,
                    node_key = %node.key,
                    region = %node.region,
                    "Node recovered"
                );
            }
            node.failed_probes = 0;
            node.available = true;
        })
        .await;
    }

    /// Record a failed health probe: marks the node unavailable, abandons its
    /// in-flight connection count and, at the failure threshold, enters
    /// cooldown.
    pub async fn record_probe_failure(&self, region: Region, key: NodeKey) {
        self.with_node(region, key, |node| {
            node.failed_probes += 1;
            node.available = false;
            node.active_connections = 0;
            node.recompute_score();
            if node.failed_probes >= FAILURE_THRESHOLD && !node.in_cooldown {
                node.last_failed_at = Some(Instant::now());
                node.in_cooldown = true;
                tracing::warn!(
                    node_id = %node.id,
                    node_key = %node.key,
                    region = %node.region,
                    failed_probes = node.failed_probes,
                    "Node entered cooldown"
                );
            }
        })
        .await;
    }

    /// A cooldown node answered its single re-probe: rejoin normal rotation
    pub async fn clear_cooldown(&self, region: Region, key: NodeKey) {
        self.with_node(region, key, |node| {
            node.in_cooldown = false;
            node.degraded = false;
            node.failed_probes = 0;
            node.available = true;
            tracing::info!(
                node_id = %node.id,
                node_key = %node.key,
                region = %node.region,
                "Node left cooldown and rejoined rotation"
            );
        })
        .await;
    }

    /// A cooldown node failed its single re-probe: terminal degradation
    pub async fn mark_degraded(&self, region: Region, key: NodeKey) {
        self.with_node(region, key, |node| {
            node.degraded = true;
            tracing::warn!(
                node_id = %node.id,
                node_key = %node.key,
                region = %node.region,
                "Node marked degraded, pending removal"
            );
        })
        .await;
    }

    /// Drop every degraded node from the region. Terminal: a pruned node must
    /// re-register to return.
    pub async fn prune_degraded(&self, region: Region) -> usize {
        let mut regions = self.regions.write().await;
        let Some(list) = regions.get_mut(&region) else {
            return 0;
        };
        let before = list.len();
        list.retain(|node| {
            if node.degraded {
                tracing::warn!(
                    node_id = %node.id,
                    node_key = %node.key,
                    region = %node.region,
                    "Pruned degraded node from registry"
                );
                false
            } else {
                true
            }
        });
        before - list.len()
    }

    /// Regions currently present in the registry
    pub async fn regions(&self) -> Vec<Region> {
        let regions = self.regions.read().await;
        regions.keys().copied().collect()
    }

    /// Probe view of a region for the health monitor
    pub async fn probe_targets(&self, region: Region) -> Vec<ProbeTarget> {
        let regions = self.regions.read().await;
        regions
            .get(&region)
            .map(|list| {
                list.iter()
                    .map(|node| ProbeTarget {
                        key: node.key,
                        id: node.id.clone(),
                        url: node.url.clone(),
                        in_cooldown: node.in_cooldown,
                        last_failed_at: node.last_failed_at,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Derived health state of a node, for tests and introspection
    pub async fn health_state(&self, region: Region, key: NodeKey) -> Option<HealthState> {
        let regions = self.regions.read().await;
        regions
            .get(&region)?
            .iter()
            .find(|node| node.key == key)
            .map(Node::health_state)
    }

    async fn with_node<F>(&self, region: Region, key: NodeKey, mutate: F) -> bool
    where
        F: FnOnce(&mut Node),
    {
        let mut regions = self.regions.write().await;
        match regions
            .get_mut(&region)
            .and_then(|list| list.iter_mut().find(|node| node.key == key))
        {
            Some(node) => {
                mutate(node);
                true
            }
            None => false,
        }
    }
}
