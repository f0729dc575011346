//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count open connections so shutdown can wait for them to drain
//! - Track in-flight requests per connection for keep-alive expiry

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts open connections and lets shutdown wait for zero.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    open: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { open: Arc::new(tx) }
    }

    /// Record a new connection. The guard decrements the count on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.open.send_modify(|n| *n += 1);
        ConnectionGuard {
            open: Arc::clone(&self.open),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        *self.open.borrow()
    }

    /// Resolve once every tracked connection has closed.
    pub async fn wait_for_drain(&self) {
        let mut rx = self.open.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<watch::Sender<usize>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Request activity on one connection.
///
/// A connection is idle when it has no request in flight; `idle_for`
/// measures the time since the last request finished.
#[derive(Debug, Clone)]
pub struct ConnectionActivity {
    inner: Arc<ActivityInner>,
}

#[derive(Debug)]
struct ActivityInner {
    in_flight: AtomicUsize,
    last_active: Mutex<Instant>,
}

impl ConnectionActivity {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ActivityInner {
                in_flight: AtomicUsize::new(0),
                last_active: Mutex::new(Instant::now()),
            }),
        }
    }

    /// Mark a request as started. Dropping the guard marks it finished.
    pub fn begin(&self) -> RequestGuard {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Time spent idle, or `None` while a request is in flight.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        if self.in_flight() > 0 {
            return None;
        }
        let last = *self
            .inner
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Some(now.saturating_duration_since(last))
    }
}

impl Default for ConnectionActivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct RequestGuard {
    inner: Arc<ActivityInner>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        *self
            .inner
            .last_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.track();
        let guard2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);
        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn drain_waits_for_last_connection() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.wait_for_drain().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn busy_connections_are_never_idle() {
        let activity = ConnectionActivity::new();
        let request = activity.begin();
        assert_eq!(activity.idle_for(Instant::now()), None);

        drop(request);
        let later = Instant::now() + Duration::from_secs(5);
        assert!(activity.idle_for(later).unwrap() >= Duration::from_secs(4));
    }
}
