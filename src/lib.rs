//! Georoute - Region-aware HTTP load balancer
//!
//! Distributes client traffic across regional backend nodes in one of two
//! modes: deterministic client-id hashing over a static pool, or dynamic
//! health-aware routing with region-proximity fallback, sticky sessions and
//! single-retry failover.

pub mod balance;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod region;
pub mod registry;
pub mod session;
pub mod telemetry;
