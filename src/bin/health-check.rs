//! Verify that the configured MongoDB deployment is reachable.
//!
//! Exits 0 when a connection and ping succeed, 1 otherwise.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use idcard_api::config::{loader, DatabaseConfig, LogFormat};
use idcard_api::database::connector::redact_uri;
use idcard_api::database::{MongoConnector, PoolSettings};
use idcard_api::observability::logging;

#[derive(Parser)]
#[command(name = "health-check")]
#[command(about = "Check connectivity to the ID card API database", long_about = None)]
struct Cli {
    /// Connection string; defaults to MONGODB_URI.
    #[arg(short, long, env = "MONGODB_URI", hide_env_values = true)]
    uri: Option<String>,

    /// Server selection timeout in seconds.
    #[arg(short, long, default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    // The tool always honours a local .env, whatever NODE_ENV says.
    let overrides = loader::read_env_file();
    let cli = Cli::parse();
    let runtime = idcard_api::RuntimeConfig::from_env();

    logging::init(LogFormat::Auto, &runtime.environment);
    overrides.log();

    tracing::info!(
        environment = %runtime.environment,
        port = runtime.port,
        database_uri = if cli.uri.is_some() { "SET" } else { "NOT SET" },
        "Environment check"
    );

    let Some(uri) = cli.uri.filter(|u| !u.trim().is_empty()) else {
        tracing::error!("MONGODB_URI is not set");
        return ExitCode::FAILURE;
    };

    let timeout = Duration::from_secs(cli.timeout_secs);
    let settings = PoolSettings {
        server_selection_timeout: timeout,
        socket_timeout: timeout,
        ..PoolSettings::from(&DatabaseConfig::default())
    };

    tracing::info!(uri = %redact_uri(&uri), "Testing MongoDB connection");
    match MongoConnector.open(&uri, &settings, None).await {
        Ok(client) => {
            let database = client
                .default_database()
                .map(|db| db.name().to_string())
                .unwrap_or_else(|| "test".to_string());
            tracing::info!(database = %database, "MongoDB connection successful");
            client.shutdown().await;
            tracing::info!("Connection closed");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "MongoDB connection failed");
            ExitCode::FAILURE
        }
    }
}
