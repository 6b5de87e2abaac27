//! Comet Runtime
//!
//! Tokio orchestration for the Comet engine: the per-user connection
//! registry, the single hub task that owns all broadcast state, and the
//! builder API consumers use to start a runtime and attach client
//! connections. The domain logic itself lives in `comet-core`.

pub mod builder;
pub mod hub;
pub mod registry;

pub use builder::{create_test_runtime, ClientConnection, RuntimeBuilder, RuntimeHandle};
pub use hub::{HubCommand, HubStats, HubTask};
pub use registry::{ConnectionId, ConnectionRegistry};

// Core types consumers need alongside the runtime API
pub use comet_core::{
    AssociationId, ChatId, ChatStore, CometConfig, CometError, MemoryStore, Message, MessageId,
    Rank, Result, ServerEvent, Status, StoredStatus, UserId,
};
