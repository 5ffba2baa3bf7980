//! Routing target selection
//!
//! Two independent strategies share the region/capacity vocabulary:
//! [`StaticPool`] hashes a client id onto a fixed capacity-weighted pool,
//! [`Selector`] scans live registry state with region-proximity fallback.

mod selector;
mod static_pool;

pub use selector::Selector;
pub use static_pool::{ManifestNode, StaticNode, StaticPool};
