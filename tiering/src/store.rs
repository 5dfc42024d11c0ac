//! Session registry with deferred eviction
//!
//! Each client gets its own `tokio::sync::Mutex<ClientContext>`; the map of
//! clients is only locked long enough to look up or insert a slot. On
//! disconnect a purge task is scheduled after the grace period and aborted
//! if the client identifies again first.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::session::{ClientContext, ClientId};

/// Shared handle to one client's state
pub type SharedClient = Arc<tokio::sync::Mutex<ClientContext>>;

/// Shared reference to SessionStore
pub type SharedSessionStore = Arc<SessionStore>;

struct PendingPurge {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Registry of live client sessions
pub struct SessionStore {
    clients: Mutex<HashMap<ClientId, SharedClient>>,
    purges: Mutex<HashMap<ClientId, PendingPurge>>,
    generation: AtomicU64,
    consumption_window: usize,
    eviction_grace: Duration,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl SessionStore {
    pub fn new(consumption_window: usize, eviction_grace: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            purges: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            consumption_window,
            eviction_grace,
        }
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedSessionStore {
        Arc::new(self)
    }

    /// Look up a client's slot, creating it if absent.
    /// Returns the slot and whether it was created by this call.
    pub fn upsert(&self, client_id: &str) -> (SharedClient, bool) {
        let mut clients = lock(&self.clients);
        if let Some(existing) = clients.get(client_id) {
            return (existing.clone(), false);
        }
        let ctx = ClientContext::new(client_id, self.consumption_window, Utc::now());
        let slot = Arc::new(tokio::sync::Mutex::new(ctx));
        clients.insert(client_id.to_string(), slot.clone());
        info!(client_id, "Client session created");
        (slot, true)
    }

    pub fn get(&self, client_id: &str) -> Option<SharedClient> {
        lock(&self.clients).get(client_id).cloned()
    }

    pub fn remove(&self, client_id: &str) -> bool {
        lock(&self.clients).remove(client_id).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.clients).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.clients).is_empty()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<_> = lock(&self.clients).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop committed tier and route memory for the client
    pub async fn reset(&self, client_id: &str) -> bool {
        match self.get(client_id) {
            Some(slot) => {
                slot.lock().await.reset();
                debug!(client_id, "Client session reset");
                true
            }
            None => false,
        }
    }

    /// Whether a purge is pending for the client
    pub fn purge_pending(&self, client_id: &str) -> bool {
        lock(&self.purges).contains_key(client_id)
    }

    /// Cancel a pending purge. Returns true if one was pending.
    pub fn cancel_purge(&self, client_id: &str) -> bool {
        match lock(&self.purges).remove(client_id) {
            Some(pending) => {
                pending.handle.abort();
                debug!(client_id, "Pending purge cancelled");
                true
            }
            None => false,
        }
    }

    /// Purge the client after the grace period unless cancelled first.
    /// `on_evict` runs after the state has been dropped.
    pub fn schedule_purge<F>(self: &Arc<Self>, client_id: &str, on_evict: F)
    where
        F: FnOnce(&str) + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let store = Arc::clone(self);
        let id = client_id.to_string();
        let grace = self.eviction_grace;

        // Hold the purge map while spawning so the task cannot look itself
        // up before it has been registered.
        let mut purges = lock(&self.purges);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if store.finish_purge(&id, generation) {
                on_evict(&id);
            }
        });
        if let Some(previous) = purges.insert(
            client_id.to_string(),
            PendingPurge { generation, handle },
        ) {
            previous.handle.abort();
        }
        debug!(client_id, grace_secs = grace.as_secs(), "Purge scheduled");
    }

    fn finish_purge(&self, client_id: &str, generation: u64) -> bool {
        let mut purges = lock(&self.purges);
        match purges.get(client_id) {
            Some(pending) if pending.generation == generation => {
                purges.remove(client_id);
            }
            _ => return false,
        }
        drop(purges);
        let removed = self.remove(client_id);
        if removed {
            info!(client_id, "Client session evicted");
        }
        removed
    }
}
