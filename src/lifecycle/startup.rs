//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging, metrics, and the resilience context in order
//! - Start background loops (task reaper, config reload)
//! - Bind the admin listener last
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Shutdown reverses startup: listener, reload loop, then tasks
//! - Task shutdown is bounded by `tasks.shutdown_timeout_secs`

use std::net::{AddrParseError, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::loader::{load_config, ConfigError};
use crate::config::watcher::ConfigWatcher;
use crate::config::ResilienceConfig;
use crate::context::ResilienceContext;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::shutdown_signal;
use crate::observability::{logging, metrics};
use crate::resilience::registry::CircuitBreakerRegistry;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logging init failed: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),

    #[error("metrics exporter failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("invalid address '{address}': {source}")]
    Address {
        address: String,
        source: AddrParseError,
    },

    #[error("config watcher failed: {0}")]
    Watcher(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_addr(address: &str) -> Result<SocketAddr, StartupError> {
    address.parse().map_err(|source| StartupError::Address {
        address: address.to_string(),
        source,
    })
}

/// Run the host process until SIGINT/SIGTERM, then shut down in order.
pub async fn run(config_path: &Path) -> Result<(), StartupError> {
    let from_file = config_path.exists();
    let config = if from_file {
        load_config(config_path)?
    } else {
        ResilienceConfig::default()
    };
    logging::init(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "resilience-core starting"
    );
    if !from_file {
        tracing::warn!(config = %config_path.display(), "Config file not found, using defaults");
    }
    log_config(&config);

    if config.observability.metrics_enabled {
        metrics::init_metrics(parse_addr(&config.observability.metrics_address)?)?;
    }

    let context = ResilienceContext::from_config(&config);
    context.tasks().start();

    let shutdown = Shutdown::new();

    let (watcher, updates) = ConfigWatcher::new(config_path);
    let _watcher = if from_file {
        Some(watcher.run()?)
    } else {
        // Nothing to watch; closing the channel ends the reload loop.
        drop(watcher);
        None
    };
    let reload = tokio::spawn(apply_reloads(
        Arc::clone(context.registry()),
        updates,
        shutdown.subscribe(),
    ));

    let server = if config.admin.enabled {
        let listener = TcpListener::bind(parse_addr(&config.admin.bind_address)?).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin listener bound");

        let app = setup_admin_router(AdminState::new(context.clone(), config.admin.api_key.as_str()));
        let graceful = shutdown.wait();
        Some(tokio::spawn(async move {
            axum::serve(listener, app).with_graceful_shutdown(graceful).await
        }))
    } else {
        tracing::info!("Admin listener disabled");
        None
    };

    shutdown_signal().await?;
    shutdown.trigger();

    if let Some(server) = server {
        match server.await {
            Ok(Ok(())) => tracing::info!("Admin listener closed"),
            Ok(Err(e)) => tracing::error!(error = %e, "Admin listener failed"),
            Err(e) => tracing::error!(error = %e, "Admin listener task panicked"),
        }
    }
    if let Err(e) = reload.await {
        tracing::error!(error = %e, "Config reload loop panicked");
    }

    let report = context.tasks().stop(config.tasks.shutdown_timeout()).await;
    tracing::info!(
        cancelled = report.cancelled,
        unacknowledged = report.unacknowledged,
        "Shutdown complete"
    );
    Ok(())
}

fn log_config(config: &ResilienceConfig) {
    tracing::info!(
        failure_threshold = config.circuit_breaker.failure_threshold,
        recovery_timeout_ms = config.circuit_breaker.recovery_timeout_ms,
        call_timeout_ms = config.circuit_breaker.call_timeout_ms,
        overrides = config.breakers.len(),
        task_capacity = config.tasks.capacity,
        cleanup_interval_secs = config.tasks.cleanup_interval_secs,
        "Configuration loaded"
    );
}

/// Feed reloaded breaker defaults into the registry until shutdown.
async fn apply_reloads(
    registry: Arc<CircuitBreakerRegistry>,
    mut updates: mpsc::UnboundedReceiver<ResilienceConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Some(config) => registry.set_defaults(config.circuit_breaker, config.breakers),
                None => break,
            },
            _ = shutdown.recv() => break,
        }
    }
}
