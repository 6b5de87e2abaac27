//! Presence tracking
//!
//! Maps each user to a stored status preference and the externally visible
//! status derived from it. The derived value is what other users see:
//! invisible reads as offline, and a user with no open connections is
//! offline no matter what they stored. Block relationships further narrow
//! visibility per viewer.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::errors::{CometError, Result};
use crate::types::UserId;

// ----------------------------------------------------------------------------
// Status Types
// ----------------------------------------------------------------------------

/// The status preference a user sets for themselves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoredStatus {
    #[default]
    Online,
    Idle,
    Busy,
    Invisible,
}

/// The status broadcast to other users
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Idle,
    Busy,
    #[default]
    Offline,
}

impl StoredStatus {
    /// The externally visible status this preference derives to while the
    /// user is connected
    pub fn derived(self) -> Status {
        match self {
            StoredStatus::Online => Status::Online,
            StoredStatus::Idle => Status::Idle,
            StoredStatus::Busy => Status::Busy,
            StoredStatus::Invisible => Status::Offline,
        }
    }
}

/// A change in a user's externally visible status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub user_id: UserId,
    pub status: Status,
}

// ----------------------------------------------------------------------------
// Presence Tracker
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PresenceEntry {
    stored: StoredStatus,
    connections: u32,
}

impl PresenceEntry {
    fn visible(&self) -> Status {
        if self.connections == 0 {
            Status::Offline
        } else {
            self.stored.derived()
        }
    }
}

/// Tracks stored status, connection counts and block relationships.
///
/// Lifecycle is tied to process uptime; entries are seeded on first
/// connection and keep the stored preference across disconnects.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    entries: HashMap<UserId, PresenceEntry>,
    /// (blocker, blocked) pairs; the blocked side sees the blocker offline
    blocks: HashSet<(UserId, UserId)>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more open connection for a user. Returns the status
    /// change to broadcast when the user just came online.
    pub fn connection_opened(&mut self, user_id: UserId) -> Option<StatusChange> {
        let entry = self.entries.entry(user_id).or_insert(PresenceEntry {
            stored: StoredStatus::default(),
            connections: 0,
        });
        let before = entry.visible();
        entry.connections += 1;
        let after = entry.visible();
        (before != after).then_some(StatusChange {
            user_id,
            status: after,
        })
    }

    /// Register a closed connection. Returns the offline transition when the
    /// last connection went away.
    pub fn connection_closed(&mut self, user_id: UserId) -> Option<StatusChange> {
        let entry = self.entries.get_mut(&user_id)?;
        let before = entry.visible();
        entry.connections = entry.connections.saturating_sub(1);
        let after = entry.visible();
        (before != after).then_some(StatusChange {
            user_id,
            status: after,
        })
    }

    /// Update a user's stored status preference and recompute the visible
    /// status. Unknown users are a reported no-op.
    pub fn set_status(
        &mut self,
        user_id: UserId,
        stored: StoredStatus,
    ) -> Result<Option<StatusChange>> {
        let entry = self
            .entries
            .get_mut(&user_id)
            .ok_or_else(|| CometError::user_not_found(user_id))?;
        let before = entry.visible();
        entry.stored = stored;
        let after = entry.visible();
        Ok((before != after).then_some(StatusChange {
            user_id,
            status: after,
        }))
    }

    /// The status a user broadcasts, ignoring per-viewer blocks
    pub fn status_of(&self, user_id: UserId) -> Status {
        self.entries
            .get(&user_id)
            .map(PresenceEntry::visible)
            .unwrap_or(Status::Offline)
    }

    /// The status `viewer` sees for `target`: offline when the target has
    /// blocked the viewer
    pub fn status_visible_to(&self, viewer: UserId, target: UserId) -> Status {
        if self.blocks.contains(&(target, viewer)) {
            Status::Offline
        } else {
            self.status_of(target)
        }
    }

    pub fn set_blocked(&mut self, blocker: UserId, blocked: UserId, active: bool) {
        if active {
            self.blocks.insert((blocker, blocked));
        } else {
            self.blocks.remove(&(blocker, blocked));
        }
    }

    pub fn is_blocked(&self, blocker: UserId, blocked: UserId) -> bool {
        self.blocks.contains(&(blocker, blocked))
    }

    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.entries
            .get(&user_id)
            .is_some_and(|e| e.connections > 0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
