//! Per-user connection registry
//!
//! Every client connection gets its own unbounded event channel; fan-out to a
//! user means cloning the event into each of their live connections. A send
//! failure on one connection prunes that connection and never blocks the
//! others — delivery is at-most-once per connection, with no queueing for
//! the disconnected.

use comet_core::{ServerEvent, UserId};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier for a single client connection
pub type ConnectionId = Uuid;

#[derive(Debug)]
struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

// ----------------------------------------------------------------------------
// Connection Registry
// ----------------------------------------------------------------------------

/// Maps users to their open connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Vec<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for a user; returns the connection id and
    /// the receiving end of its event stream
    pub fn register(&self, user_id: UserId) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.connections
            .entry(user_id)
            .or_default()
            .push(ConnectionHandle { id, sender });
        debug!(%user_id, connection_id = %id, "connection registered");
        (id, receiver)
    }

    /// Drop a connection; returns whether it existed
    pub fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut removed = false;
        if let Some(mut handles) = self.connections.get_mut(&user_id) {
            let before = handles.len();
            handles.retain(|h| h.id != connection_id);
            removed = handles.len() != before;
        }
        self.connections.remove_if(&user_id, |_, v| v.is_empty());
        if removed {
            debug!(%user_id, connection_id = %connection_id, "connection unregistered");
        }
        removed
    }

    /// Whether the user has at least one live connection
    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.connections
            .get(&user_id)
            .is_some_and(|h| !h.is_empty())
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.connections.get(&user_id).map_or(0, |h| h.len())
    }

    /// Deliver an event to every connection of a user. Dead connections are
    /// pruned and logged; returns how many connections accepted the event.
    pub fn send_to_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        if let Some(mut handles) = self.connections.get_mut(&user_id) {
            handles.retain(|handle| match handle.sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    warn!(
                        %user_id,
                        connection_id = %handle.id,
                        event = event.name(),
                        "dropping dead connection"
                    );
                    false
                }
            });
        }
        self.connections.remove_if(&user_id, |_, v| v.is_empty());
        delivered
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
