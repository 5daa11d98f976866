//! Live backend handles, one per adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::proxy::Transport;

/// Per-adapter serving state.
///
/// `Unresolved → Resolved → Proxying* → Closed`. Closing an adapter
/// invalidates its sessions before any backend is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingState {
    Unresolved,
    Resolved,
    /// At least one request is in flight.
    Proxying,
    Closed,
}

/// Binds an adapter to a reachable backend plus a health flag.
pub struct BackendHandle {
    pub adapter: String,
    pub address: String,
    healthy: AtomicBool,
    in_flight: AtomicUsize,
    transport: Arc<dyn Transport>,
}

impl BackendHandle {
    pub fn new(adapter: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            adapter: adapter.into(),
            address: transport.address().to_string(),
            healthy: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            transport,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Healthy and still attached to a live backend.
    pub fn is_usable(&self) -> bool {
        self.healthy.load(Ordering::Acquire) && self.transport.is_alive()
    }

    pub fn mark_unhealthy(&self) {
        if self.healthy.swap(false, Ordering::AcqRel) {
            tracing::warn!(adapter = %self.adapter, address = %self.address, "Backend marked unhealthy");
        }
    }

    /// Count a request as in flight until the guard drops.
    pub fn begin(&self) -> InFlight<'_> {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        InFlight { handle: self }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

pub struct InFlight<'a> {
    handle: &'a BackendHandle,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.handle.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

enum Slot {
    Live(Arc<BackendHandle>),
    Closed,
}

/// Concurrent table of backend handles.
///
/// Lookups share a read lock. Resolution of a missing handle is serialised
/// per adapter, so two racing `initialize` calls start one backend, not two.
#[derive(Default)]
pub struct HandleTable {
    slots: RwLock<HashMap<String, Slot>>,
    resolve_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Usable handle for `adapter`, if one exists.
    pub async fn get(&self, adapter: &str) -> Option<Arc<BackendHandle>> {
        match self.slots.read().await.get(adapter) {
            Some(Slot::Live(handle)) if handle.is_usable() => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Handle for `adapter` even if it is no longer usable.
    pub async fn get_any(&self, adapter: &str) -> Option<Arc<BackendHandle>> {
        match self.slots.read().await.get(adapter) {
            Some(Slot::Live(handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    pub async fn is_closed(&self, adapter: &str) -> bool {
        matches!(self.slots.read().await.get(adapter), Some(Slot::Closed))
    }

    /// Install `handle`, returning the one it replaced.
    ///
    /// Refuses (returns `Err(handle)`) when the adapter is closed.
    pub async fn insert(
        &self,
        handle: Arc<BackendHandle>,
    ) -> Result<Option<Arc<BackendHandle>>, Arc<BackendHandle>> {
        let mut slots = self.slots.write().await;
        match slots.get(&handle.adapter) {
            Some(Slot::Closed) => Err(handle),
            _ => match slots.insert(handle.adapter.clone(), Slot::Live(handle)) {
                Some(Slot::Live(old)) => Ok(Some(old)),
                _ => Ok(None),
            },
        }
    }

    /// Mark `adapter` closed and hand back its handle, if any.
    pub async fn close(&self, adapter: &str) -> Option<Arc<BackendHandle>> {
        match self.slots.write().await.insert(adapter.to_string(), Slot::Closed) {
            Some(Slot::Live(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Forget `adapter` entirely so the name can be reused.
    pub async fn remove(&self, adapter: &str) {
        self.slots.write().await.remove(adapter);
        self.resolve_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(adapter);
    }

    pub fn resolve_lock(&self, adapter: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .resolve_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(adapter.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn state(&self, adapter: &str) -> ServingState {
        match self.slots.read().await.get(adapter) {
            None => ServingState::Unresolved,
            Some(Slot::Closed) => ServingState::Closed,
            Some(Slot::Live(handle)) if handle.in_flight() > 0 => ServingState::Proxying,
            Some(Slot::Live(_)) => ServingState::Resolved,
        }
    }
}
