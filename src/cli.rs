//! Command-line interface for Georoute
//!
//! Provides argument parsing and subcommand handling for the georoute binary.

use crate::config::{Config, Mode};
use clap::{Parser, Subcommand};

/// Region-aware HTTP load balancer
#[derive(Parser)]
#[command(name = "georoute")]
#[command(version)]
#[command(about = "Region-aware HTTP load balancer")]
#[command(
    long_about = "Georoute distributes client traffic across regional backend nodes, \
    either by deterministic client-id hashing over a static pool or by health-aware \
    dynamic routing with sticky sessions and failover."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "georoute.toml", global = true)]
    pub config: String,

    /// Operating mode override (static or dynamic)
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Base forwarding timeout override in milliseconds
    #[arg(long)]
    pub forward_base_ms: Option<u64>,

    /// Health probe timeout override in milliseconds
    #[arg(long)]
    pub probe_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ModeArg {
    Static,
    Dynamic,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Static => Mode::Static,
            ModeArg::Dynamic => Mode::Dynamic,
        }
    }
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(forward_base_ms) = self.forward_base_ms {
            config.timeouts.forward_base_ms = forward_base_ms;
        }
        if let Some(probe_ms) = self.probe_ms {
            config.timeouts.probe_ms = probe_ms;
        }
    }
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# Georoute Configuration
# ======================
#
# This file configures the HTTP server, routing mode, timeouts and
# observability settings for Georoute.

# Operating mode:
#   - "static": deterministic client-id hash routing over a fixed manifest;
#     no health checks, sessions or retries
#   - "dynamic": registration-driven routing with health monitoring, sticky
#     sessions and single-retry failover
mode = "static"

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 3000

# Largest inbound request body accepted for forwarding, in bytes.
# Larger requests are rejected before any backend is contacted.
max_body_bytes = 10485760

[timeouts]
# Base forwarding timeout in milliseconds. The effective deadline for a node
# is this value plus the node's fixed region latency.
forward_base_ms = 2000

# Health probe timeout in milliseconds (dynamic mode only)
probe_ms = 5000

[health]
# Seconds between health-check sweeps (dynamic mode only)
probe_interval_secs = 10

[static_pool]
# Path to the JSON node manifest consumed in static mode. Each entry:
#   {"id": "edge-1", "hostname": "10.0.0.1", "port": 3001,
#    "region": "us-east", "capacity": 2}
# Serving regions: us-east, eu-west, asia-south, oceania, ca-central
manifest = "servers.json"

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
# For production, consider using a reverse proxy to restrict access
"#
}
