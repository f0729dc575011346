//! Runtime connection health from driver topology events.
//!
//! The driver reports server discovery and heartbeat results through its
//! SDAM event handler. [`TopologyMonitor`] turns those reports into status
//! transitions on the manager, so a server lost after startup is noticed
//! without waiting for a command to hit the server-selection timeout.
//!
//! # Transitions
//! ```text
//! no selectable server   Connected    → Disconnected
//! heartbeat failed       Connected    → Disconnected   (no selectable server)
//!                        Disconnected → Error
//! selectable again       Disconnected | Error → Connected
//! ```
//!
//! Events from a client the manager has already replaced or closed are
//! ignored; every client gets its own epoch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use mongodb::event::sdam::SdamEvent;
use mongodb::event::EventHandler;
use mongodb::options::ClientOptions;
use tokio::sync::watch;

use crate::database::manager::{ConnectionEvent, ConnectionStatus, Observer};
use crate::observability::metrics;

/// Status shared between the manager and the driver's event callbacks.
pub(crate) struct StatusCell {
    status: watch::Sender<ConnectionStatus>,
    observers: Vec<Observer>,
    epoch: AtomicU64,
}

impl StatusCell {
    pub(crate) fn new(observers: Vec<Observer>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            status,
            observers,
            epoch: AtomicU64::new(0),
        }
    }

    pub(crate) fn get(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Unconditional transition driven by the manager itself.
    pub(crate) fn set(&self, status: ConnectionStatus, event: Option<ConnectionEvent>) {
        self.status.send_replace(status);
        metrics::record_db_status(status);
        if let Some(event) = event {
            self.notify(&event);
        }
    }

    /// Transition only if `decide` accepts the current status.
    fn update<F>(&self, decide: F)
    where
        F: FnOnce(ConnectionStatus) -> Option<(ConnectionStatus, ConnectionEvent)>,
    {
        let mut applied = None;
        self.status.send_if_modified(|status| match decide(*status) {
            Some((next, event)) => {
                *status = next;
                applied = Some((next, event));
                true
            }
            None => false,
        });
        if let Some((next, event)) = applied {
            metrics::record_db_status(next);
            self.notify(&event);
        }
    }

    fn notify(&self, event: &ConnectionEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }

    /// Open a new epoch for a client about to be created.
    pub(crate) fn begin_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stop listening to the current client's events.
    pub(crate) fn end_epoch(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }
}

/// Feeds one client's topology events into the manager's status.
#[derive(Clone)]
pub struct TopologyMonitor {
    cell: Arc<StatusCell>,
    epoch: u64,
    reachable: Arc<AtomicBool>,
}

impl TopologyMonitor {
    pub(crate) fn new(cell: Arc<StatusCell>, epoch: u64) -> Self {
        Self {
            cell,
            epoch,
            reachable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register this monitor as the SDAM event handler of `options`.
    pub fn install(&self, options: &mut ClientOptions) {
        let monitor = self.clone();
        options.sdam_event_handler = Some(EventHandler::callback(move |event: SdamEvent| {
            monitor.handle(event)
        }));
    }

    pub fn handle(&self, event: SdamEvent) {
        match event {
            SdamEvent::TopologyDescriptionChanged(change) => {
                let selectable = change.new_description.has_writable_server()
                    || change.new_description.has_readable_server(None);
                self.topology_changed(selectable);
            }
            SdamEvent::ServerHeartbeatFailed(failed) => {
                tracing::debug!(
                    server = %failed.server_address,
                    error = %failed.failure,
                    "MongoDB heartbeat failed"
                );
                self.heartbeat_failed(failed.failure.to_string());
            }
            _ => {}
        }
    }

    fn topology_changed(&self, selectable: bool) {
        if !self.cell.is_current(self.epoch) {
            return;
        }
        self.reachable.store(selectable, Ordering::SeqCst);
        if selectable {
            self.cell.update(|status| match status {
                ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                    Some((ConnectionStatus::Connected, ConnectionEvent::Connected))
                }
                _ => None,
            });
        } else {
            self.cell.update(|status| match status {
                ConnectionStatus::Connected => {
                    Some((ConnectionStatus::Disconnected, ConnectionEvent::Disconnected))
                }
                _ => None,
            });
        }
    }

    fn heartbeat_failed(&self, reason: String) {
        // A failing member of a healthy replica set changes nothing.
        if !self.cell.is_current(self.epoch) || self.reachable.load(Ordering::SeqCst) {
            return;
        }
        self.cell.update(|status| match status {
            ConnectionStatus::Connected => {
                Some((ConnectionStatus::Disconnected, ConnectionEvent::Disconnected))
            }
            ConnectionStatus::Disconnected => {
                Some((ConnectionStatus::Error, ConnectionEvent::Error(reason)))
            }
            _ => None,
        });
    }
}
