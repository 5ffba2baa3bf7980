//! Health-aware node selection with region-proximity fallback

use crate::region::Region;
use crate::registry::{NodeKey, NodeRegistry, NodeSnapshot};
use std::sync::Arc;

/// Picks a routing target from live registry state.
///
/// Within a candidate list the node with the maximum score wins, ties resolved
/// by first-seen order. Unavailable nodes and the excluded node (a failed
/// primary or an overflowing sticky target) are skipped.
#[derive(Clone)]
pub struct Selector {
    registry: Arc<NodeRegistry>,
}

impl Selector {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Allocate a node for a client region.
    ///
    /// The home region is scanned when it has at least one registered node.
    /// Otherwise the proximity ranking is walked and the scan runs in the
    /// FIRST region with any registered node; later fallback regions are never
    /// consulted, even if that scan comes up empty.
    ///
    /// Returns None on hard allocation failure.
    pub async fn allocate(
        &self,
        client_region: Region,
        exclude: Option<NodeKey>,
    ) -> Option<NodeSnapshot> {
        if let Some(home) = self.registry.candidates(client_region).await {
            if !home.is_empty() {
                let picked = best_scoring(&home, exclude);
                log_allocation(client_region, client_region, picked.as_ref(), exclude);
                return picked;
            }
        }

        for &region in client_region.proximity() {
            let Some(candidates) = self.registry.candidates(region).await else {
                continue;
            };
            if candidates.is_empty() {
                continue;
            }
            let picked = best_scoring(&candidates, exclude);
            log_allocation(client_region, region, picked.as_ref(), exclude);
            return picked;
        }

        tracing::warn!(
            client_region = %client_region,
            "Allocation failed: no registered nodes in region or fallbacks"
        );
        None
    }
}

/// Max-score scan over one region's candidates
fn best_scoring(candidates: &[NodeSnapshot], exclude: Option<NodeKey>) -> Option<NodeSnapshot> {
    let mut target: Option<&NodeSnapshot> = None;
    for node in candidates {
        if Some(node.key) == exclude {
            continue;
        }
        if !node.available {
            continue;
        }
        match target {
            Some(current) if node.score <= current.score => {}
            _ => target = Some(node),
        }
    }
    target.cloned()
}

fn log_allocation(
    client_region: Region,
    scanned_region: Region,
    picked: Option<&NodeSnapshot>,
    exclude: Option<NodeKey>,
) {
    match picked {
        Some(node) => tracing::debug!(
            client_region = %client_region,
            scanned_region = %scanned_region,
            node_id = %node.id,
            node_key = %node.key,
            score = node.score,
            excluded = ?exclude,
            "Allocated node"
        ),
        None => tracing::warn!(
            client_region = %client_region,
            scanned_region = %scanned_region,
            excluded = ?exclude,
            "No eligible node in scanned region"
        ),
    }
}
