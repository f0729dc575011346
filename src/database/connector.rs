//! Driver-level connection establishment.

use std::future::IntoFuture;
use std::time::Duration;

use futures_util::future::BoxFuture;
use mongodb::bson::doc;
use mongodb::options::{Acknowledgment, ClientOptions, WriteConcern};
use mongodb::Client;

use crate::config::DatabaseConfig;
use crate::database::monitor::TopologyMonitor;
use crate::database::DbError;

/// Connection parameters applied to every client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub server_selection_timeout: Duration,
    pub socket_timeout: Duration,
    pub max_idle_time: Duration,
    pub retry_writes: bool,
    pub app_name: Option<String>,
}

impl From<&DatabaseConfig> for PoolSettings {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            min_pool_size: config.min_pool_size,
            max_pool_size: config.max_pool_size,
            server_selection_timeout: Duration::from_secs(config.server_selection_timeout_secs),
            socket_timeout: Duration::from_secs(config.socket_timeout_secs),
            max_idle_time: Duration::from_secs(config.max_idle_time_secs),
            retry_writes: config.retry_writes,
            app_name: config.app_name.clone(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

impl PoolSettings {
    /// Overlay these settings onto options parsed from a URI.
    pub fn apply(&self, options: &mut ClientOptions) {
        options.min_pool_size = Some(self.min_pool_size);
        options.max_pool_size = Some(self.max_pool_size);
        options.server_selection_timeout = Some(self.server_selection_timeout);
        options.max_idle_time = Some(self.max_idle_time);
        options.retry_writes = Some(self.retry_writes);
        options.write_concern = Some(WriteConcern::builder().w(Acknowledgment::Majority).build());
        if options.app_name.is_none() {
            options.app_name = self.app_name.clone();
        }
    }
}

/// Opens a verified client for a connection string.
///
/// Implementations install `monitor` on the client options so the manager
/// follows the server's availability after the initial connect.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        uri: &'a str,
        settings: &'a PoolSettings,
        monitor: TopologyMonitor,
    ) -> BoxFuture<'a, Result<Client, DbError>>;
}

/// Connector backed by the official MongoDB driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

impl MongoConnector {
    /// Build a client and ping it, optionally reporting topology changes.
    pub async fn open(
        &self,
        uri: &str,
        settings: &PoolSettings,
        monitor: Option<&TopologyMonitor>,
    ) -> Result<Client, DbError> {
        let mut options = ClientOptions::parse(uri).await?;
        settings.apply(&mut options);
        if let Some(monitor) = monitor {
            monitor.install(&mut options);
        }

        let client = Client::with_options(options)?;

        // The driver connects lazily; ping so failures surface at startup.
        let admin = client.database("admin");
        let ping = admin.run_command(doc! { "ping": 1 }).into_future();
        let outcome = tokio::time::timeout(settings.socket_timeout, ping).await;
        match outcome {
            Ok(Ok(_)) => Ok(client),
            Ok(Err(err)) => {
                client.shutdown().await;
                Err(DbError::Driver(err))
            }
            Err(_) => {
                client.shutdown().await;
                Err(DbError::Timeout(settings.socket_timeout))
            }
        }
    }
}

impl Connector for MongoConnector {
    fn connect<'a>(
        &'a self,
        uri: &'a str,
        settings: &'a PoolSettings,
        monitor: TopologyMonitor,
    ) -> BoxFuture<'a, Result<Client, DbError>> {
        Box::pin(async move { self.open(uri, settings, Some(&monitor)).await })
    }
}

/// First 30 characters of a connection string with credentials masked, for logs.
pub fn redact_uri(uri: &str) -> String {
    let masked = match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &uri[..scheme_end + 3], &uri[at..])
        }
        _ => uri.to_string(),
    };
    let prefix: String = masked.chars().take(30).collect();
    format!("{prefix}...")
}
