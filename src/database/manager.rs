//! Shared connection ownership and state transitions.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use mongodb::{Client, Database};
use tokio::sync::{watch, Mutex};

use crate::config::Environment;
use crate::database::connector::{redact_uri, Connector, MongoConnector, PoolSettings};
use crate::database::monitor::{StatusCell, TopologyMonitor};
use crate::database::DbError;

/// Connection status, changed by the manager and by driver topology events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

/// Transition notifications delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// connecting → connected
    Connected,
    /// any → error
    Error(String),
    /// connected → disconnected
    Disconnected,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connected => f.write_str("connected"),
            ConnectionEvent::Error(reason) => write!(f, "error: {reason}"),
            ConnectionEvent::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Side-effect-only callback invoked synchronously on each transition.
pub type Observer = Box<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Result of a successful (or tolerated) `connect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection was established.
    Connected,
    /// Already connected; nothing was done.
    AlreadyConnected,
    /// The attempt failed but the environment tolerates running without a database.
    Degraded,
}

/// Owns the single process-wide database connection.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    uri: Option<String>,
    environment: Environment,
    settings: PoolSettings,
    cell: Arc<StatusCell>,
    client: RwLock<Option<Client>>,
    /// Serializes connect and disconnect; held across the driver await.
    attempt: Mutex<()>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .field("environment", &self.environment)
            .field("observers", &self.cell.observer_count())
            .finish()
    }
}

impl ConnectionManager {
    /// Start building a manager that uses the MongoDB driver.
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new(Box::new(MongoConnector))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.cell.get()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.cell.subscribe()
    }

    /// Connect unless already connected.
    ///
    /// A failure is returned as an error outside production. In production
    /// it is logged and reported as [`ConnectOutcome::Degraded`].
    pub async fn connect(&self) -> Result<ConnectOutcome, DbError> {
        if self.is_connected() {
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        let _attempt = self.attempt.lock().await;
        // Another caller may have finished while we waited.
        if self.is_connected() {
            return Ok(ConnectOutcome::AlreadyConnected);
        }

        // A client whose server went away is replaced, not reused.
        let stale = self.client.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(stale) = stale {
            self.cell.end_epoch();
            stale.shutdown().await;
        }

        match self.establish().await {
            Ok(client) => {
                *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
                self.transition(ConnectionStatus::Connected, Some(ConnectionEvent::Connected));
                tracing::info!("Connected to MongoDB");
                Ok(ConnectOutcome::Connected)
            }
            Err(err) => {
                self.cell.end_epoch();
                self.transition(
                    ConnectionStatus::Error,
                    Some(ConnectionEvent::Error(err.to_string())),
                );
                tracing::error!(error = %err, details = ?err, "MongoDB connection failed");
                if self.environment.is_production() {
                    tracing::warn!("Starting server without MongoDB connection");
                    Ok(ConnectOutcome::Degraded)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn establish(&self) -> Result<Client, DbError> {
        let uri = match self.uri.as_deref() {
            Some(uri) if !uri.trim().is_empty() => uri,
            _ => return Err(DbError::MissingUri),
        };

        self.transition(ConnectionStatus::Connecting, None);
        let monitor = TopologyMonitor::new(self.cell.clone(), self.cell.begin_epoch());
        tracing::info!(uri = %redact_uri(uri), "Attempting to connect to MongoDB");
        self.connector.connect(uri, &self.settings, monitor).await
    }

    /// Close the connection. Closing an already-closed manager is a no-op.
    pub async fn disconnect(&self) {
        let _attempt = self.attempt.lock().await;
        self.cell.end_epoch();
        let client = self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match client {
            Some(client) => {
                client.shutdown().await;
                self.transition(
                    ConnectionStatus::Disconnected,
                    Some(ConnectionEvent::Disconnected),
                );
                tracing::info!("MongoDB connection closed");
            }
            None => {
                self.transition(ConnectionStatus::Disconnected, None);
                tracing::debug!("MongoDB connection already closed");
            }
        }
    }

    /// Database handle for the connection's default database.
    ///
    /// Fails immediately when not connected instead of queueing work.
    pub fn database(&self) -> Result<Database, DbError> {
        if !self.is_connected() {
            return Err(DbError::Unavailable);
        }
        let guard = self.client.read().unwrap_or_else(PoisonError::into_inner);
        let client = guard.as_ref().ok_or(DbError::Unavailable)?;
        Ok(client
            .default_database()
            .unwrap_or_else(|| client.database("test")))
    }

    fn transition(&self, status: ConnectionStatus, event: Option<ConnectionEvent>) {
        self.cell.set(status, event);
    }
}

/// Builder for [`ConnectionManager`]. Observers are fixed at build time.
pub struct ConnectionManagerBuilder {
    connector: Box<dyn Connector>,
    uri: Option<String>,
    environment: Environment,
    settings: PoolSettings,
    observers: Vec<Observer>,
}

impl ConnectionManagerBuilder {
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            uri: None,
            environment: Environment::Development,
            settings: PoolSettings::default(),
            observers: Vec::new(),
        }
    }

    pub fn uri(mut self, uri: Option<String>) -> Self {
        self.uri = uri;
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn settings(mut self, settings: PoolSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn observe<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    /// Add the standard logging observer.
    pub fn with_logging(self) -> Self {
        self.observe(log_event)
    }

    pub fn build(self) -> ConnectionManager {
        ConnectionManager {
            connector: self.connector,
            uri: self.uri,
            environment: self.environment,
            settings: self.settings,
            cell: Arc::new(StatusCell::new(self.observers)),
            client: RwLock::new(None),
            attempt: Mutex::new(()),
        }
    }
}

fn log_event(event: &ConnectionEvent) {
    match event {
        ConnectionEvent::Connected => tracing::info!("Database connection established"),
        ConnectionEvent::Error(reason) => tracing::error!(error = %reason, "Database connection error"),
        ConnectionEvent::Disconnected => tracing::info!("Database disconnected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use mongodb::options::{ClientOptions, ServerAddress};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Hands out lazily-connecting clients without touching the network.
    ///
    /// With `watch_topology` the client reports its heartbeats to the
    /// manager and points at a port nothing listens on.
    #[derive(Default)]
    struct FakeConnector {
        attempts: Arc<AtomicUsize>,
        fail: bool,
        watch_topology: bool,
    }

    impl Connector for FakeConnector {
        fn connect<'a>(
            &'a self,
            _uri: &'a str,
            _settings: &'a PoolSettings,
            monitor: TopologyMonitor,
        ) -> BoxFuture<'a, Result<Client, DbError>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                if self.fail {
                    return Err(DbError::Timeout(Duration::from_millis(20)));
                }
                let port = if self.watch_topology { 1 } else { 27017 };
                let mut options = ClientOptions::builder()
                    .hosts(vec![ServerAddress::Tcp {
                        host: "127.0.0.1".to_string(),
                        port: Some(port),
                    }])
                    .heartbeat_freq(Duration::from_millis(500))
                    .server_selection_timeout(Duration::from_secs(30))
                    .build();
                if self.watch_topology {
                    monitor.install(&mut options);
                }
                Ok(Client::with_options(options)?)
            })
        }
    }

    fn manager(
        fail: bool,
        uri: Option<&str>,
        environment: Environment,
    ) -> (ConnectionManager, Arc<AtomicUsize>, Arc<std::sync::Mutex<Vec<ConnectionEvent>>>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        let connector = FakeConnector {
            attempts: attempts.clone(),
            fail,
            ..FakeConnector::default()
        };
        let manager = ConnectionManagerBuilder::new(Box::new(connector))
            .uri(uri.map(String::from))
            .environment(environment)
            .observe(move |e| sink.lock().unwrap().push(e.clone()))
            .build();
        (manager, attempts, events)
    }

    #[tokio::test]
    async fn connect_is_idempotent() {
        let (db, attempts, events) = manager(false, Some("mongodb://db/cards"), Environment::Development);

        assert_eq!(db.connect().await.unwrap(), ConnectOutcome::Connected);
        assert_eq!(db.connect().await.unwrap(), ConnectOutcome::AlreadyConnected);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(db.status(), ConnectionStatus::Connected);
        assert_eq!(*events.lock().unwrap(), vec![ConnectionEvent::Connected]);
    }

    #[tokio::test]
    async fn concurrent_connects_share_one_attempt() {
        let (db, attempts, _) = manager(false, Some("mongodb://db/cards"), Environment::Development);
        let db = Arc::new(db);

        let (a, b) = tokio::join!(db.connect(), db.connect());
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o as u8);
        assert_eq!(outcomes, vec![ConnectOutcome::Connected, ConnectOutcome::AlreadyConnected]);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_uri_is_fatal_outside_production() {
        let (db, attempts, events) = manager(false, None, Environment::Development);

        let err = db.connect().await.unwrap_err();
        assert!(matches!(err, DbError::MissingUri));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert_eq!(db.status(), ConnectionStatus::Error);
        assert!(matches!(events.lock().unwrap()[0], ConnectionEvent::Error(_)));
    }

    #[tokio::test]
    async fn production_tolerates_failures() {
        let (db, _, _) = manager(false, None, Environment::Production);
        assert_eq!(db.connect().await.unwrap(), ConnectOutcome::Degraded);

        let (db, attempts, _) = manager(true, Some("mongodb://db"), Environment::Production);
        assert_eq!(db.connect().await.unwrap(), ConnectOutcome::Degraded);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(db.database(), Err(DbError::Unavailable)));
    }

    #[tokio::test]
    async fn driver_failure_is_fatal_in_other_environments() {
        let (db, _, _) = manager(true, Some("mongodb://db"), Environment::Other("staging".into()));
        assert!(matches!(db.connect().await, Err(DbError::Timeout(_))));
    }

    #[tokio::test]
    async fn database_requires_connection() {
        let (db, _, _) = manager(false, Some("mongodb://db/cards"), Environment::Development);
        assert!(matches!(db.database(), Err(DbError::Unavailable)));

        db.connect().await.unwrap();
        assert_eq!(db.database().unwrap().name(), "test");
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (db, _, events) = manager(false, Some("mongodb://db"), Environment::Development);
        db.connect().await.unwrap();

        db.disconnect().await;
        db.disconnect().await;

        assert_eq!(db.status(), ConnectionStatus::Disconnected);
        assert_eq!(
            *events.lock().unwrap(),
            vec![ConnectionEvent::Connected, ConnectionEvent::Disconnected]
        );
        assert!(matches!(db.database(), Err(DbError::Unavailable)));
    }

    #[tokio::test]
    async fn losing_the_server_after_startup_fails_fast() {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        let connector = FakeConnector {
            watch_topology: true,
            ..FakeConnector::default()
        };
        let db = ConnectionManagerBuilder::new(Box::new(connector))
            .uri(Some("mongodb://127.0.0.1:1/cards".to_string()))
            .observe(move |e| sink.lock().unwrap().push(e.clone()))
            .build();

        assert_eq!(db.connect().await.unwrap(), ConnectOutcome::Connected);

        let mut status = db.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s != ConnectionStatus::Connected),
        )
        .await
        .expect("status never left connected")
        .unwrap();

        // Commands are refused at once instead of waiting out server selection.
        let started = std::time::Instant::now();
        assert!(matches!(db.database(), Err(DbError::Unavailable)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(events.lock().unwrap()[1], ConnectionEvent::Disconnected);

        // Closing the replaced client does not produce further runtime events.
        db.disconnect().await;
        let seen = events.lock().unwrap().len();
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(events.lock().unwrap().len(), seen);
        assert_eq!(db.status(), ConnectionStatus::Disconnected);
    }
}
