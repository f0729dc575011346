//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use mongodb::options::{ClientOptions, ServerAddress};
use mongodb::Client;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use idcard_api::config::{Environment, RuntimeConfig, ServerConfig};
use idcard_api::database::{
    ConnectionEvent, ConnectionManager, ConnectionManagerBuilder, Connector, DbError, PoolSettings,
    TopologyMonitor,
};
use idcard_api::lifecycle::{Lifecycle, LifecycleHandle, StartupError};

/// A driver client that never dials until used.
pub fn lazy_client() -> Client {
    let options = ClientOptions::builder()
        .hosts(vec![ServerAddress::Tcp {
            host: "127.0.0.1".to_string(),
            port: Some(27017),
        }])
        .server_selection_timeout(Duration::from_millis(200))
        .build();
    Client::with_options(options).unwrap()
}

/// Connector that counts attempts and hands out lazy clients.
///
/// The topology monitor is not installed, so the status stays where the
/// manager puts it.
#[derive(Default)]
pub struct FakeConnector {
    pub attempts: Arc<AtomicUsize>,
    pub fail: bool,
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        _uri: &'a str,
        _settings: &'a PoolSettings,
        _monitor: TopologyMonitor,
    ) -> BoxFuture<'a, Result<Client, DbError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DbError::Timeout(Duration::from_millis(1)));
            }
            Ok(lazy_client())
        })
    }
}

/// Shared log of test events in the order they happened.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Manager backed by [`FakeConnector`], recording transitions in `log`.
pub fn fake_manager(uri: Option<&str>, environment: Environment, log: EventLog) -> ConnectionManager {
    ConnectionManagerBuilder::new(Box::new(FakeConnector::default()))
        .uri(uri.map(String::from))
        .environment(environment)
        .observe(move |event: &ConnectionEvent| {
            log.lock().unwrap().push(format!("database {event}"));
        })
        .build()
}

/// Runtime config with an ephemeral port.
pub fn runtime(vars: &[(&str, &str)]) -> RuntimeConfig {
    let mut map: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    map.entry("PORT".to_string()).or_insert_with(|| "0".to_string());
    RuntimeConfig::from_lookup(|key| map.get(key).cloned())
}

/// Server settings with static directories under `root`.
pub fn settings(root: &Path) -> ServerConfig {
    let mut settings = ServerConfig::default();
    settings.listener.host = "127.0.0.1".to_string();
    settings.static_files.uploads_dir = root.join("uploads").to_string_lossy().to_string();
    settings.static_files.idcards_dir = root.join("idcards").to_string_lossy().to_string();
    settings
}

/// A lifecycle running on a background task.
pub struct TestServer {
    pub handle: LifecycleHandle,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), StartupError>>,
}

impl TestServer {
    pub fn start(lifecycle: Lifecycle) -> Self {
        let handle = lifecycle.handle();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(lifecycle.run(async move {
            let _ = stopped.await;
        }));
        Self {
            handle,
            stop: Some(stop),
            task,
        }
    }

    pub async fn addr(&mut self) -> SocketAddr {
        tokio::time::timeout(Duration::from_secs(5), self.handle.listening())
            .await
            .expect("server did not start in time")
            .expect("server stopped before listening")
    }

    pub async fn url(&mut self, path: &str) -> String {
        format!("http://{}{}", self.addr().await, path)
    }

    /// Deliver the termination signal without waiting.
    pub fn terminate(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }

    /// Terminate and wait for the lifecycle to finish.
    pub async fn shutdown(mut self) -> Result<(), StartupError> {
        self.terminate();
        self.join().await
    }

    /// Wait for the lifecycle to finish on its own.
    pub async fn join(self) -> Result<(), StartupError> {
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("lifecycle did not finish in time")
            .expect("lifecycle task panicked")
    }
}

/// HTTP client without connection pooling or proxies.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
