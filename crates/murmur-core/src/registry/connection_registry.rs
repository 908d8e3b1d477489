//! Connection Registry implementation.
//!
//! Tracks the live connection of every bound identity.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::metrics;
use crate::protocol::ServerFrame;
use crate::types::Identity;

/// Default capacity of a connection's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Identifies one physical connection.
///
/// An identity that reconnects gets a new id, which lets the registry tell
/// the close of a stale connection apart from the close of the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection state stored in the registry.
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Physical connection this entry belongs to
    pub id: ConnectionId,
    /// Channel drained by the connection's writer task
    pub sender: mpsc::Sender<ServerFrame>,
    /// When the identity was bound to this connection
    pub bound_at: DateTime<Utc>,
}

impl ConnectionEntry {
    fn new(sender: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
            bound_at: Utc::now(),
        }
    }
}

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableReason {
    /// No connection is bound for the identity
    NotConnected,
    /// The outbound queue is full (slow or stuck peer)
    QueueFull,
    /// The connection's writer has gone away
    Closed,
}

/// Result of a best-effort send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Frame was queued for the connection's writer
    Delivered,
    /// Frame was dropped; the caller decides on any fallback
    Unreachable(UnreachableReason),
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered)
    }
}

/// Registry binding identities to their live connection.
///
/// Thread-safe; backed by a `DashMap` so bind, unbind, lookup and send are
/// atomic relative to each other for a given identity. The last bind wins:
/// a previous connection for the same identity is replaced, not closed.
///
/// ## Usage
///
/// ```ignore
/// let registry = ConnectionRegistry::new();
///
/// // When a connection authenticates:
/// let (tx, rx) = mpsc::channel(DEFAULT_OUTBOUND_CAPACITY);
/// let connection_id = registry.bind(identity.clone(), tx);
///
/// // When routing a frame:
/// let delivery = registry.send(&recipient, frame);
///
/// // When the connection closes:
/// registry.unbind(&identity, connection_id);
/// ```
pub struct ConnectionRegistry {
    connections: DashMap<Identity, ConnectionEntry>,
}

impl ConnectionRegistry {
    /// Create a new, empty connection registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            connections: DashMap::new(),
        }
    }

    /// Bind a connection's outbound channel to an identity.
    ///
    /// Any existing entry for the identity is replaced. The replaced
    /// connection is left open; its eventual `unbind` is ignored because its
    /// connection id no longer matches.
    #[instrument(skip(self, sender), fields(identity = %identity))]
    pub fn bind(&self, identity: Identity, sender: mpsc::Sender<ServerFrame>) -> ConnectionId {
        let entry = ConnectionEntry::new(sender);
        let id = entry.id;
        let existing = self.connections.insert(identity, entry);
        match existing {
            Some(previous) => debug!(previous = %previous.id, connection = %id, "Replaced existing binding"),
            None => debug!(connection = %id, "Bound new connection"),
        }
        metrics::connections_active().record(self.connections.len() as i64, &[]);
        id
    }

    /// Remove the binding for `identity` if it still belongs to `connection`.
    ///
    /// Returns true only for the call that actually removed the entry, so a
    /// second unbind for the same closed connection (error then close) is a
    /// no-op, as is the close of a connection that was already replaced.
    #[instrument(skip(self), fields(identity = %identity, connection = %connection))]
    pub fn unbind(&self, identity: &Identity, connection: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, entry| entry.id == connection)
            .is_some();
        if removed {
            debug!("Unbound connection");
            metrics::connections_active().record(self.connections.len() as i64, &[]);
        } else {
            debug!("Connection was not bound (already unbound or replaced)");
        }
        removed
    }

    /// Current connection for an identity, if any.
    pub fn lookup(&self, identity: &Identity) -> Option<ConnectionId> {
        self.connections.get(identity).map(|entry| entry.id)
    }

    /// Check if an identity currently has a live binding.
    pub fn is_connected(&self, identity: &Identity) -> bool {
        self.connections.contains_key(identity)
    }

    /// Number of bound identities.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Push a frame to an identity without waiting.
    ///
    /// Never blocks and never fails: a missing binding, a full outbound queue
    /// or a closed writer all report `Unreachable`. A closed writer's entry
    /// stays bound until its handler unbinds it or `cleanup_stale` runs, so
    /// the offline transition always goes through presence.
    #[instrument(skip(self, frame), fields(to = %identity, frame = frame.name()))]
    pub fn send(&self, identity: &Identity, frame: ServerFrame) -> Delivery {
        // Clone the sender so the shard lock is not held across try_send.
        let sender = match self.connections.get(identity) {
            Some(entry) => entry.sender.clone(),
            None => {
                debug!("Recipient not connected");
                return Delivery::Unreachable(UnreachableReason::NotConnected);
            }
        };

        match sender.try_send(frame) {
            Ok(()) => {
                debug!("Frame queued for delivery");
                Delivery::Delivered
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound queue full, dropping frame");
                Delivery::Unreachable(UnreachableReason::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outbound queue closed, connection may have dropped");
                Delivery::Unreachable(UnreachableReason::Closed)
            }
        }
    }

    /// Push the same frame to several identities.
    ///
    /// Returns one `(identity, delivery)` pair per recipient, in order.
    pub fn send_to_many<'a, I>(&self, recipients: I, frame: &ServerFrame) -> Vec<(Identity, Delivery)>
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        recipients
            .into_iter()
            .map(|identity| (identity.clone(), self.send(identity, frame.clone())))
            .collect()
    }

    /// List all bound identities.
    pub fn list_connections(&self) -> Vec<Identity> {
        self.connections.iter().map(|r| r.key().clone()).collect()
    }

    /// Remove all entries whose writer has gone away.
    ///
    /// Can be called periodically to clean up connections that were never
    /// unbound.
    pub fn cleanup_stale(&self) -> Vec<Identity> {
        let stale: Vec<(Identity, ConnectionId)> = self
            .connections
            .iter()
            .filter(|entry| entry.value().sender.is_closed())
            .map(|entry| (entry.key().clone(), entry.value().id))
            .collect();

        let mut removed = Vec::new();
        for (identity, id) in stale {
            if self.connections.remove_if(&identity, |_, entry| entry.id == id).is_some() {
                debug!(identity = %identity, "Removed stale connection");
                removed.push(identity);
            }
        }

        if !removed.is_empty() {
            metrics::connections_active().record(self.connections.len() as i64, &[]);
            info!(count = removed.len(), "Cleaned up stale connections");
        }

        removed
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .finish()
    }
}
