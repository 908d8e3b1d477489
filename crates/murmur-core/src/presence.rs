//! Presence glue.
//!
//! Ties connection bind/unbind to online/offline updates on the storage
//! collaborator. Each successful bind produces exactly one `online` update and
//! each unbind that actually removed a binding produces exactly one `offline`
//! update; repeated or stale unbinds produce none. Entries swept by
//! [`ConnectionRegistry::cleanup_stale`] are reported through
//! [`PresenceGlue::evicted`].
//!
//! Registry changes and the presence write that follows them happen under a
//! per-identity lock, so the store always ends with the presence of the most
//! recent registry change for that identity.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, instrument, warn};

use crate::protocol::ServerFrame;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::ChatStore;
use crate::types::{Identity, Presence};

/// Connects registry lifecycle events to presence updates.
#[derive(Clone)]
pub struct PresenceGlue {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ChatStore>,
    locks: Arc<DashMap<Identity, Arc<Mutex<()>>>>,
}

impl PresenceGlue {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn ChatStore>) -> Self {
        Self {
            registry,
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Bind the connection and mark the identity online.
    #[instrument(name = "presence.connect", skip(self, sender), fields(identity = %identity))]
    pub async fn connect(
        &self,
        identity: Identity,
        sender: mpsc::Sender<ServerFrame>,
    ) -> ConnectionId {
        let lock = self.lock_for(&identity);
        let _guard = lock.lock().await;
        let connection = self.registry.bind(identity.clone(), sender);
        self.update(&identity, Presence::Online).await;
        connection
    }

    /// Unbind the connection and mark the identity offline.
    ///
    /// Returns whether this call removed the binding.
    #[instrument(name = "presence.disconnect", skip(self), fields(identity = %identity))]
    pub async fn disconnect(&self, identity: &Identity, connection: ConnectionId) -> bool {
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;
        let removed = self.registry.unbind(identity, connection);
        if removed {
            self.update(identity, Presence::Offline).await;
        }
        removed
    }

    /// Mark identities removed by `cleanup_stale` offline.
    ///
    /// An identity that has bound a new connection since the sweep is left
    /// online. Returns how many were marked offline.
    #[instrument(name = "presence.evicted", skip_all, fields(count = identities.len()))]
    pub async fn evicted(&self, identities: &[Identity]) -> usize {
        let mut marked = 0;
        for identity in identities {
            let lock = self.lock_for(identity);
            let _guard = lock.lock().await;
            if self.registry.is_connected(identity) {
                debug!(identity = %identity, "Evicted identity has reconnected");
                continue;
            }
            self.update(identity, Presence::Offline).await;
            marked += 1;
        }
        marked
    }

    fn lock_for(&self, identity: &Identity) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(identity.clone()).or_default().value())
    }

    // Storage failures are logged; they never tear down a connection.
    async fn update(&self, identity: &Identity, presence: Presence) {
        if let Err(e) = self.store.set_presence(identity, presence).await {
            warn!(identity = %identity, %presence, error = %e, "Failed to update presence");
        }
    }
}
