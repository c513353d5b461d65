//! Lazily created, shared connections keyed by address.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use grpc_client::GrpcError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::agent::Dispatchable;
use crate::discovery::{MembershipEvent, MembershipSnapshot};

/// Builds the connection for one address. Must not block; channels are lazy.
pub type Connector<C> = Arc<dyn Fn(&str) -> Result<Arc<C>, GrpcError> + Send + Sync>;

/// At most one connection per address, created on first use.
///
/// Callers hold an `Arc` for the duration of a call, so evicting an address
/// never interrupts calls already running against it; the connection is
/// released when the last holder drops it.
pub struct ConnectionRegistry<C: ?Sized + Send + Sync> {
    name: &'static str,
    connector: Connector<C>,
    entries: Mutex<HashMap<String, Arc<C>>>,
}

impl<C: ?Sized + Send + Sync> ConnectionRegistry<C> {
    pub fn new(name: &'static str, connector: Connector<C>) -> Self {
        Self {
            name,
            connector,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<C>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, address: &str) -> Result<Arc<C>, GrpcError> {
        let mut entries = self.lock();
        if let Some(existing) = entries.get(address) {
            return Ok(existing.clone());
        }
        let created = (self.connector)(address)?;
        entries.insert(address.to_string(), created.clone());
        debug!(registry = self.name, address = %address, "Connection created");
        Ok(created)
    }

    pub fn evict(&self, address: &str) -> bool {
        let removed = self.lock().remove(address).is_some();
        if removed {
            info!(registry = self.name, address = %address, "Connection evicted");
        }
        removed
    }

    /// Evict every entry not in `keep`. Returns the evicted addresses.
    pub fn retain(&self, keep: &HashSet<String>) -> Vec<String> {
        let mut evicted = Vec::new();
        self.lock().retain(|address, _| {
            let keep = keep.contains(address);
            if !keep {
                evicted.push(address.clone());
            }
            keep
        });
        for address in &evicted {
            info!(registry = self.name, address = %address, "Connection evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<_> = self.lock().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    /// Follow membership changes until shutdown.
    ///
    /// `Removed` events evict immediately. When the event stream lags, the
    /// registry reconciles against the latest snapshot instead.
    pub async fn watch_membership(
        self: Arc<Self>,
        mut events: broadcast::Receiver<MembershipEvent>,
        snapshots: watch::Receiver<Arc<MembershipSnapshot>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(registry = self.name, "Watching membership");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(registry = self.name, "Membership watcher shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(MembershipEvent::Removed(address)) => {
                        self.evict(&address);
                    }
                    Ok(MembershipEvent::Added(_)) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(registry = self.name, skipped, "Membership events lagged, reconciling");
                        let keep: HashSet<String> =
                            snapshots.borrow().addresses().into_iter().collect();
                        self.retain(&keep);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!(registry = self.name, "Membership event stream closed");
                        break;
                    }
                },
            }
        }
    }
}

impl ConnectionRegistry<dyn Dispatchable> {
    /// Circuit state of every cached agent connection, by address.
    pub fn circuit_states(&self) -> HashMap<String, String> {
        self.lock()
            .iter()
            .map(|(address, agent)| (address.clone(), agent.circuit_state().to_string()))
            .collect()
    }
}
