//! Comet Core
//!
//! Sans-IO domain logic for the Comet realtime presence/chat-delivery engine:
//! - Data model and `ChatStore` trait over the store of record
//! - `PresenceTracker` and `TypingTracker` keyed in-memory state
//! - `ServerEvent`, the typed event vocabulary pushed to clients
//! - Reconciler passes restoring chat integrity invariants
//!
//! The tokio orchestration (connection registry, hub task, sweeps) lives in
//! `comet-runtime`; this crate holds the state machines it drives.

pub mod config;
pub mod errors;
pub mod events;
pub mod model;
pub mod presence;
pub mod reconciler;
pub mod store;
pub mod typing;
pub mod types;

pub use config::{ChannelConfig, CometConfig, TypingConfig};
pub use errors::{CometError, Result};
pub use events::ServerEvent;
pub use model::{
    intent_key, Chat, ChatAssociation, ChatType, DirectPair, Message, MessageKind,
    NotificationSetting, Rank,
};
pub use presence::{PresenceTracker, Status, StatusChange, StoredStatus};
pub use reconciler::ReconcilerReport;
pub use store::{ChatStore, MemoryStore};
pub use typing::{SignalOutcome, TypingTracker};
pub use types::{
    AssociationId, ChatId, LegacyUserId, ManualTimeSource, MessageId, SystemTimeSource,
    TimeSource, Timestamp, UserId,
};
