//! Node state for the dynamic registry
//!
//! A node is plain data owned by the [`NodeRegistry`](super::NodeRegistry);
//! all mutation goes through registry operations so that score recomputation
//! and health transitions stay atomic with respect to concurrent requests and
//! the background health sweep.

use crate::region::Region;
use serde::Serialize;
use std::time::Instant;

/// Consecutive probe failures before a node enters cooldown
pub const FAILURE_THRESHOLD: u32 = 3;

/// Opaque per-registration key
///
/// Duplicate id/url registrations produce distinct entries; the key is what
/// sessions and exclusion lists refer to, never the user-supplied id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeKey(pub u64);

impl std::fmt::Display for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Derived health state, used for logging and assertions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Available,
    Unavailable,
    CoolDown,
    Degraded,
}

/// A registered backend node
#[derive(Debug, Clone)]
pub struct Node {
    pub key: NodeKey,
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub url: String,
    pub region: Region,
    pub capacity: u32,
    pub latency_ms: u64,
    pub active_connections: u32,
    pub available: bool,
    pub score: f64,
    pub failed_probes: u32,
    pub last_failed_at: Option<Instant>,
    pub in_cooldown: bool,
    pub degraded: bool,
}

impl Node {
    /// Recompute the load score from latency, capacity and active connections.
    ///
    /// Idle nodes score `latency / capacity`; loaded nodes scale that ratio by
    /// the connection count. The selector picks the maximum score among
    /// eligible candidates.
    pub fn recompute_score(&mut self) {
        let base = self.latency_ms as f64 / self.capacity as f64;
        self.score = if self.active_connections == 0 {
            base
        } else {
            base * self.active_connections as f64
        };
    }

    /// Derive the health-machine state from the raw flags
    pub fn health_state(&self) -> HealthState {
        if self.degraded {
            HealthState::Degraded
        } else if self.in_cooldown {
            HealthState::CoolDown
        } else if self.available {
            HealthState::Available
        } else {
            HealthState::Unavailable
        }
    }
}

/// Immutable copy of the node fields the selector and proxy need
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub key: NodeKey,
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub region: Region,
    pub capacity: u32,
    pub latency_ms: u64,
    pub active_connections: u32,
    pub available: bool,
    pub score: f64,
}

impl From<&Node> for NodeSnapshot {
    fn from(node: &Node) -> Self {
        Self {
            key: node.key,
            id: node.id.clone(),
            hostname: node.hostname.clone(),
            port: node.port,
            region: node.region,
            capacity: node.capacity,
            latency_ms: node.latency_ms,
            active_connections: node.active_connections,
            available: node.available,
            score: node.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node(latency_ms: u64, capacity: u32) -> Node {
        let mut node = Node {
            key: NodeKey(1),
            id: "s1".to_string(),
            hostname: "127.0.0.1".to_string(),
            port: 3001,
            url: "http://127.0.0.1:3001".to_string(),
            region: Region::UsEast,
            capacity,
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
        node
    }

    #[test]
    fn test_idle_score_is_latency_over_capacity() {
        let node = test_node(100, 4);
        assert_eq!(node.score, 25.0);
    }

    #[test]
    fn test_loaded_score_scales_with_connections() {
        let mut node = test_node(100, 4);
        node.active_connections = 3;
        node.recompute_score();
        assert_eq!(node.score, 75.0);
    }

    #[test]
    fn test_single_connection_score_matches_idle() {
        // latency/capacity * 1 == latency/capacity, so one connection is
        // indistinguishable from idle under this formula
        let mut node = test_node(50, 2);
        let idle = node.score;
        node.active_connections = 1;
        node.recompute_score();
        assert_eq!(node.score, idle);
    }

    #[test]
    fn test_health_state_derivation() {
        let mut node = test_node(10, 1);
        assert_eq!(node.health_state(), HealthState::Available);

        node.available = false;
        assert_eq!(node.health_state(), HealthState::Unavailable);

        node.in_cooldown = true;
        assert_eq!(node.health_state(), HealthState::CoolDown);

        node.degraded = true;
        assert_eq!(node.health_state(), HealthState::Degraded);
    }

    #[test]
    fn test_snapshot_copies_routing_fields() {
        let mut node = test_node(30, 3);
        node.active_connections = 2;
        node.recompute_score();
        let snapshot = NodeSnapshot::from(&node);
        assert_eq!(snapshot.key, node.key);
        assert_eq!(snapshot.capacity, 3);
        assert_eq!(snapshot.active_connections, 2);
        assert_eq!(snapshot.score, node.score);
    }
}
