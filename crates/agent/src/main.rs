//! dynpool agent - hosts live-tunable worker pools
//!
//! Builds the pools declared in the bootstrap file, runs the health monitor,
//! serves the HTTP API and re-applies the file whenever it changes.

use anyhow::{Context, Result};
use dynpool_lib::{
    build_pools,
    health::components,
    shutdown_pools,
    ConfigRefresher, HealthMonitor, HealthRegistry, NotifierDispatcher, PoolMetrics, PoolRegistry,
    StructuredLogger,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod watcher;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting dynpool-agent");

    let config = config::AgentConfig::load()?;
    let bootstrap = &config.bootstrap;
    info!(
        application = %bootstrap.application_name,
        profile = %bootstrap.active_profile,
        path = %config.config_path.display(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::REFRESHER).await;
    health_registry.register(components::NOTIFIER).await;

    let metrics = PoolMetrics::new();
    let logger = StructuredLogger::new(&bootstrap.application_name);

    let registry = Arc::new(PoolRegistry::new());
    let built = build_pools(bootstrap, &registry).context("Failed to build pools")?;

    let mut dispatcher =
        NotifierDispatcher::new(bootstrap.identity()).with_health(health_registry.clone());
    if let Some(platform) = bootstrap.platform() {
        dispatcher = dispatcher.with_platform(platform);
    }
    let dispatcher = Arc::new(dispatcher);

    let refresher = Arc::new(
        ConfigRefresher::new(registry.clone(), dispatcher.clone())
            .with_metrics(metrics.clone())
            .with_health(health_registry.clone()),
    );

    let monitor = if bootstrap.enable && bootstrap.monitor.enable {
        health_registry.register(components::MONITOR).await;
        let monitor = HealthMonitor::new(
            registry.clone(),
            dispatcher.clone(),
            bootstrap.monitor.monitor_config(),
        )
        .with_metrics(metrics.clone())
        .with_health(health_registry.clone());
        Some(monitor.start())
    } else {
        info!("Pool health monitor disabled");
        None
    };

    logger.log_startup(AGENT_VERSION, built);

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        registry.clone(),
        refresher.clone(),
    ));

    // Pools are built, the agent can take traffic
    health_registry.set_ready(true).await;

    let api_port = config.api_port;
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            warn!(error = %e, "API server stopped");
        }
    });

    let _watcher = if config.watch_config {
        let watcher = watcher::ConfigWatcher::new(&config.config_path, refresher, dispatcher);
        match watcher.start().await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Configuration file will not be watched");
                None
            }
        }
    } else {
        None
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;

    if let Some(monitor) = monitor {
        monitor.stop().await;
    }
    api_handle.abort();

    let undrained = tokio::task::spawn_blocking(move || {
        shutdown_pools(&registry, Some(&metrics), SHUTDOWN_GRACE)
    })
    .await?;

    info!(undrained = undrained.len(), "Shutting down");
    Ok(())
}
