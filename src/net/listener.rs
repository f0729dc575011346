//! TCP listener with connection back-pressure.
//!
//! # Responsibilities
//! - Bind to the configured host and port
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//!
//! # Design Decisions
//! - A permit is acquired before `accept`, so connections beyond the limit
//!   wait in the kernel backlog instead of being reset

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] std::io::Error),

    /// The connection limiter was closed.
    #[error("listener closed")]
    Closed,
}

/// A bounded TCP listener that limits concurrent connections.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to `host:port`. Port 0 picks an ephemeral port.
    pub async fn bind(host: &str, port: u16, max_connections: usize) -> Result<Self, ListenerError> {
        let address = format!("{host}:{port}");
        let inner = TcpListener::bind(&address)
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;

        let local_addr = inner.local_addr().map_err(|source| ListenerError::Bind {
            address: address.clone(),
            source,
        })?;

        tracing::info!(
            address = %local_addr,
            max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Accept a new connection, waiting while the limit is reached.
    ///
    /// The returned permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A connection slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_bound_concurrent_connections() {
        let listener = Listener::bind("127.0.0.1", 0, 1).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _first_client = TcpStream::connect(addr).await.unwrap();
        let (_stream, _, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 0);

        // The second client sits in the backlog until the slot frees up.
        let _second_client = TcpStream::connect(addr).await.unwrap();
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), listener.accept()).await;
        assert!(blocked.is_err());

        drop(permit);
        assert_eq!(listener.available_permits(), 1);
        let accepted =
            tokio::time::timeout(std::time::Duration::from_secs(1), listener.accept()).await;
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn bind_failure_names_address() {
        // Second bind to the same port fails with AddrInUse.
        let taken = Listener::bind("127.0.0.1", 0, 1).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = Listener::bind("127.0.0.1", port, 1).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert!(err.to_string().contains(&format!("127.0.0.1:{port}")));
    }
}
