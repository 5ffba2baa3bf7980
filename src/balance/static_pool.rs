//! Static hash routing over a fixed, capacity-weighted pool
//!
//! The pool is built once at startup from a JSON manifest; each node appears
//! `capacity` times, so a node with capacity k owns a k-fold larger share of
//! the hash space. The pool is never mutated and carries no health state: a
//! client always lands on the same node, up or not.

use crate::error::{AppError, AppResult};
use crate::region::Region;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;

/// One manifest entry
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestNode {
    #[serde(default)]
    pub id: Option<String>,
    pub hostname: String,
    pub port: u16,
    pub region: Region,
    pub capacity: u32,
}

/// A resolved static pool member
#[derive(Debug, Clone, PartialEq)]
pub struct StaticNode {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub region: Region,
    pub capacity: u32,
    pub latency_ms: u64,
}

/// Fixed, capacity-weighted selection domain
#[derive(Debug)]
pub struct StaticPool {
    entries: Vec<StaticNode>,
}

impl StaticPool {
    /// Build the pool from a JSON manifest file.
    ///
    /// An unreadable, invalid or empty manifest is a fatal configuration
    /// error, not a runtime case.
    pub fn from_manifest_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("failed to read manifest {}: {}", path.display(), e))
        })?;
        let nodes: Vec<ManifestNode> = serde_json::from_str(&raw).map_err(|e| {
            AppError::Config(format!("failed to parse manifest {}: {}", path.display(), e))
        })?;
        Self::from_nodes(nodes)
    }

    /// Build the pool from parsed manifest entries
    pub fn from_nodes(nodes: Vec<ManifestNode>) -> AppResult<Self> {
        let mut entries = Vec::new();
        for node in nodes {
            if node.capacity == 0 {
                return Err(AppError::Config(format!(
                    "manifest node {}:{} has zero capacity",
                    node.hostname, node.port
                )));
            }
            let latency_ms = node.region.latency_ms().ok_or_else(|| {
                AppError::Config(format!(
                    "manifest node {}:{} uses client-only region {}",
                    node.hostname, node.port, node.region
                ))
            })?;
            let resolved = StaticNode {
                id: node
                    .id
                    .unwrap_or_else(|| format!("{}:{}", node.hostname, node.port)),
                hostname: node.hostname,
                port: node.port,
                region: node.region,
                capacity: node.capacity,
                latency_ms,
            };
            for _ in 0..resolved.capacity {
                entries.push(resolved.clone());
            }
        }
        if entries.is_empty() {
            return Err(AppError::Config(
                "static pool manifest contains no nodes".to_string(),
            ));
        }
        tracing::info!(pool_size = entries.len(), "Static pool built");
        Ok(Self { entries })
    }

    /// Deterministically pick the node for a client identifier.
    ///
    /// SHA-256 of the id, first 32 bits of the digest as an unsigned integer,
    /// modulo the pool length.
    pub fn pick(&self, client_id: &str) -> &StaticNode {
        let index = hash_client_id(client_id) as usize % self.entries.len();
        &self.entries[index]
    }

    /// Number of pool slots (sum of capacities)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// First 32 bits of the SHA-256 digest of the client id
fn hash_client_id(client_id: &str) -> u32 {
    let digest = Sha256::digest(client_id.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
