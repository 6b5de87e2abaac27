//! Error types for the Comet engine
//!
//! A single taxonomy shared by the core logic and the runtime. Permission and
//! not-found failures surface to the invoking client; delivery and
//! reconciliation failures are recovered locally and logged, never fatal.

use crate::types::{AssociationId, ChatId, UserId};

/// Core error types for the Comet engine
#[derive(Debug, thiserror::Error)]
pub enum CometError {
    /// A referenced chat, user or association does not exist
    #[error("{what} {id} not found")]
    NotFound { what: &'static str, id: u32 },

    /// The actor lacks the required rank or membership for a mutating action
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// The reconciler found data it refuses to auto-repair
    #[error("integrity anomaly in chat {chat_id}: {reason}")]
    IntegrityAnomaly { chat_id: ChatId, reason: String },

    /// Push to a single recipient failed; never fails the enclosing publish
    #[error("delivery to user {user_id} failed: {reason}")]
    Delivery { user_id: UserId, reason: String },

    /// Internal channel communication error
    #[error("channel error: {message}")]
    Channel { message: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl CometError {
    pub fn chat_not_found(id: ChatId) -> Self {
        CometError::NotFound {
            what: "chat",
            id: id.get(),
        }
    }

    pub fn user_not_found(id: UserId) -> Self {
        CometError::NotFound {
            what: "user",
            id: id.get(),
        }
    }

    pub fn association_not_found(id: AssociationId) -> Self {
        CometError::NotFound {
            what: "association",
            id: id.get(),
        }
    }

    pub fn permission_denied<T: Into<String>>(reason: T) -> Self {
        CometError::PermissionDenied {
            reason: reason.into(),
        }
    }

    pub fn integrity_anomaly<T: Into<String>>(chat_id: ChatId, reason: T) -> Self {
        CometError::IntegrityAnomaly {
            chat_id,
            reason: reason.into(),
        }
    }

    pub fn delivery<T: Into<String>>(user_id: UserId, reason: T) -> Self {
        CometError::Delivery {
            user_id,
            reason: reason.into(),
        }
    }

    pub fn channel_error<T: Into<String>>(message: T) -> Self {
        CometError::Channel {
            message: message.into(),
        }
    }

    /// Whether this error should surface to the invoking client
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CometError::NotFound { .. } | CometError::PermissionDenied { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, CometError>;
