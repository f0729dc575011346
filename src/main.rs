//! Para Sports ID card API server.
//!
//! Startup order:
//! 1. `.env` overrides (outside production)
//! 2. Runtime and tunable configuration
//! 3. Logging and optional metrics exporter
//! 4. Lifecycle: connect database, bind, serve until SIGTERM, drain, close

use std::process::ExitCode;

use idcard_api::config::{loader, Environment, LogFormat, RuntimeConfig};
use idcard_api::database::{ConnectionManager, PoolSettings};
use idcard_api::lifecycle::{signals, Lifecycle, StartupError};
use idcard_api::observability::{logging, metrics};

#[tokio::main]
async fn main() -> ExitCode {
    let ambient = Environment::from_value(std::env::var("NODE_ENV").ok().as_deref());
    let overrides = loader::load_local_env(&ambient);

    let runtime = RuntimeConfig::from_env();
    let settings = loader::load_from_lookup(|key| std::env::var(key).ok());

    let log_format = settings
        .as_ref()
        .map(|s| s.observability.log_format)
        .unwrap_or(LogFormat::Auto);
    logging::init(log_format, &runtime.environment);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Para Sports backend server");
    overrides.log();
    runtime.log_summary();

    let settings = match settings {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "Failed to start server");
            return ExitCode::FAILURE;
        }
    };

    if settings.observability.metrics_enabled {
        match settings.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %settings.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let db = ConnectionManager::builder()
        .uri(runtime.database_uri.clone())
        .environment(runtime.environment.clone())
        .settings(PoolSettings::from(&settings.database))
        .with_logging()
        .build();

    let lifecycle = Lifecycle::new(runtime, settings, db);
    match lifecycle.run(signals::terminate()).await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &StartupError) {
    match err {
        StartupError::Database(_) => {
            tracing::error!(error = %err, "Failed to start server: database unavailable")
        }
        _ => tracing::error!(error = %err, "Failed to start server"),
    }
}
