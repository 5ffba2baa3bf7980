//! Georoute HTTP server
//!
//! Starts an Axum web server that routes client requests to regional backend
//! nodes, in static (hash) or dynamic (health-aware) mode.

use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use clap::Parser;
use georoute::balance::StaticPool;
use georoute::cli::{Cli, Command, generate_config_template};
use georoute::config::{Config, Mode};
use georoute::handlers::{AppState, admin, route, static_route, static_route::StaticState};
use georoute::health::HealthMonitor;
use georoute::middleware::request_id_middleware;
use georoute::telemetry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Handle subcommands before touching the config file
    if let Some(Command::Config { output }) = &cli.command {
        let template = generate_config_template();
        match output {
            Some(path) => {
                std::fs::write(path, template)?;
                println!("Configuration template written to {path}");
            }
            None => print!("{template}"),
        }
        return Ok(());
    }

    let mut config = Config::from_file(&cli.config)?;
    cli.apply_overrides(&mut config);
    config.validate()?;

    telemetry::init(&config.observability.log_level);

    tracing::info!(
        mode = ?config.mode,
        host = %config.server.host,
        port = config.server.port,
        "Starting Georoute"
    );

    let config = Arc::new(config);
    let app = match config.mode {
        Mode::Static => build_static_app(config.clone())?,
        Mode::Dynamic => build_dynamic_app(config.clone())?,
    };
    let app = app
        .layer(from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http());

    // validate() has already vetted the host; a parse failure here is fatal
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Static mode: the manifest is loaded once and a bad manifest is fatal
fn build_static_app(config: Arc<Config>) -> Result<Router, Box<dyn std::error::Error>> {
    let pool = StaticPool::from_manifest_file(&config.static_pool.manifest)?;
    tracing::info!(
        manifest = %config.static_pool.manifest,
        pool_slots = pool.len(),
        "Static pool loaded"
    );
    let state = StaticState::new(config, pool)?;

    Ok(Router::new()
        .route("/metrics", get(static_route::metrics))
        .fallback(static_route::route)
        .with_state(state))
}

/// Dynamic mode: registration endpoints plus the routing catch-all, with the
/// health monitor sweeping in the background
fn build_dynamic_app(config: Arc<Config>) -> Result<Router, Box<dyn std::error::Error>> {
    let state = AppState::new(config.clone())?;

    let monitor = Arc::new(HealthMonitor::new(
        state.registry().clone(),
        state.metrics().clone(),
        config.timeouts.probe(),
        Duration::from_secs(config.health.probe_interval_secs),
    ));
    monitor.start();

    Ok(Router::new()
        .route("/register", post(admin::register))
        .route("/deregister", post(admin::deregister))
        .route("/metrics", get(admin::metrics))
        .fallback(route::route)
        .with_state(state))
}
