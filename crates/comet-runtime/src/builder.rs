//! Runtime Builder API
//!
//! Builder-style entry point for consumers (gateway, tests) to seed a store,
//! start the hub task and get a handle for client connections and
//! collaborator events.

use std::sync::{Arc, Mutex};

use comet_core::{
    AssociationId, ChatId, ChatStore, CometConfig, CometError, MemoryStore, Message, Rank, Result,
    StoredStatus, UserId,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::info;

use crate::hub::{HubCommand, HubStats, HubTask};
use crate::registry::{ConnectionId, ConnectionRegistry};

// ----------------------------------------------------------------------------
// Runtime Builder
// ----------------------------------------------------------------------------

/// Builder for a Comet runtime instance
pub struct RuntimeBuilder<S: ChatStore + Send + 'static = MemoryStore> {
    store: S,
    config: CometConfig,
    console_logging: bool,
}

impl RuntimeBuilder<MemoryStore> {
    /// Create a builder over an empty in-memory store
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            config: CometConfig::default(),
            console_logging: false,
        }
    }
}

impl Default for RuntimeBuilder<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ChatStore + Send + 'static> RuntimeBuilder<S> {
    /// Replace the backing store (seeded in-memory store, or a
    /// database-backed implementation)
    pub fn with_store<S2: ChatStore + Send + 'static>(self, store: S2) -> RuntimeBuilder<S2> {
        RuntimeBuilder {
            store,
            config: self.config,
            console_logging: self.console_logging,
        }
    }

    /// Set the engine configuration
    pub fn with_config(mut self, config: CometConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a console tracing subscriber on start
    pub fn with_console_logging(mut self) -> Self {
        self.console_logging = true;
        self
    }

    /// Build and start the hub task
    pub async fn build_and_start(self) -> Result<RuntimeHandle<S>> {
        if self.console_logging {
            // Ignore failure if the host already installed a subscriber
            let _ = tracing_subscriber::fmt().try_init();
        }
        info!("starting comet runtime");

        let (command_sender, command_receiver) =
            mpsc::channel(self.config.channels.command_buffer_size);
        let registry = Arc::new(ConnectionRegistry::new());
        let store = Arc::new(Mutex::new(self.store));

        let hub = HubTask::new(
            Arc::clone(&store),
            self.config,
            Arc::clone(&registry),
            command_receiver,
        );
        let hub_handle = tokio::spawn(hub.run());

        Ok(RuntimeHandle {
            command_sender,
            registry,
            store,
            hub_handle: Some(hub_handle),
        })
    }
}

// ----------------------------------------------------------------------------
// Client Connection
// ----------------------------------------------------------------------------

/// A registered client connection and its event stream
pub struct ClientConnection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub events: mpsc::UnboundedReceiver<comet_core::ServerEvent>,
}

// ----------------------------------------------------------------------------
// Runtime Handle
// ----------------------------------------------------------------------------

/// Handle to a running Comet runtime
pub struct RuntimeHandle<S: ChatStore + Send + 'static = MemoryStore> {
    command_sender: mpsc::Sender<HubCommand>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<Mutex<S>>,
    hub_handle: Option<JoinHandle<()>>,
}

impl<S: ChatStore + Send + 'static> RuntimeHandle<S> {
    /// Shared access to the store of record (collaborators, assertions)
    pub fn store(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.store)
    }

    /// Open a persistent connection for a user
    pub async fn connect(&self, user_id: UserId) -> Result<ClientConnection> {
        let (id, events) = self.registry.register(user_id);
        self.send(HubCommand::ConnectionOpened { user_id }).await?;
        Ok(ClientConnection {
            id,
            user_id,
            events,
        })
    }

    /// Close a client connection
    pub async fn disconnect(&self, user_id: UserId, connection_id: ConnectionId) -> Result<()> {
        self.registry.unregister(user_id, connection_id);
        self.send(HubCommand::ConnectionClosed { user_id }).await
    }

    /// Client signal: user is typing in a chat
    pub async fn signal_typing(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.request(|reply| HubCommand::SignalTyping {
            chat_id,
            user_id,
            reply,
        })
        .await
    }

    /// Client signal: user read a chat up to its newest message
    pub async fn read_chat(&self, association_id: AssociationId, user_id: UserId) -> Result<()> {
        self.request(|reply| HubCommand::ReadChat {
            association_id,
            user_id,
            reply,
        })
        .await
    }

    /// Client signal: update the stored status preference
    pub async fn set_status(&self, user_id: UserId, status: StoredStatus) -> Result<()> {
        self.request(|reply| HubCommand::SetStatus {
            user_id,
            status,
            reply,
        })
        .await
    }

    /// Collaborator event: a message row was durably written
    pub async fn publish_message(&self, chat_id: ChatId, message: Message) -> Result<()> {
        self.send(HubCommand::MessageCreated { chat_id, message })
            .await
    }

    /// Collaborator event: block relationship changed
    pub async fn user_blocked(&self, blocker: UserId, blocked: UserId, active: bool) -> Result<()> {
        self.send(HubCommand::UserBlocked {
            blocker,
            blocked,
            active,
        })
        .await
    }

    /// Collaborator event: a membership's rank changed
    pub async fn association_rank_changed(
        &self,
        association_id: AssociationId,
        rank: Rank,
    ) -> Result<()> {
        self.send(HubCommand::AssociationRankChanged {
            association_id,
            rank,
        })
        .await
    }

    /// Collaborator event: a member left or was removed from a chat
    pub async fn member_left(&self, association_id: AssociationId) -> Result<()> {
        self.send(HubCommand::MemberLeft { association_id }).await
    }

    /// Collaborator event: a chat was deleted
    pub async fn chat_deleted(&self, chat_id: ChatId) -> Result<()> {
        self.send(HubCommand::ChatDeleted { chat_id }).await
    }

    /// Snapshot of the hub's counters
    pub async fn stats(&self) -> Result<HubStats> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::QueryStats { reply }).await?;
        response
            .await
            .map_err(|_| CometError::channel_error("hub task dropped the reply"))
    }

    /// Whether the hub task is still running
    pub fn is_running(&self) -> bool {
        self.hub_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Shut the runtime down gracefully
    pub async fn shutdown(&mut self) -> Result<()> {
        let _ = self.send(HubCommand::Shutdown).await;
        if let Some(handle) = self.hub_handle.take() {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
        Ok(())
    }

    async fn send(&self, command: HubCommand) -> Result<()> {
        self.command_sender
            .send(command)
            .await
            .map_err(|_| CometError::channel_error("hub task is gone"))
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<()>>) -> HubCommand,
    ) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(make(reply)).await?;
        response
            .await
            .map_err(|_| CometError::channel_error("hub task dropped the reply"))?
    }
}

// ----------------------------------------------------------------------------
// Convenience Functions
// ----------------------------------------------------------------------------

/// Start a runtime over a seeded in-memory store with fast typing expiry,
/// for tests
pub async fn create_test_runtime(store: MemoryStore) -> Result<RuntimeHandle<MemoryStore>> {
    RuntimeBuilder::new()
        .with_store(store)
        .with_config(CometConfig::for_tests())
        .build_and_start()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runtime_builder_lifecycle() {
        let mut runtime = RuntimeBuilder::new()
            .build_and_start()
            .await
            .expect("failed to build runtime");
        assert!(runtime.is_running());

        runtime.shutdown().await.expect("failed to shutdown");
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let mut runtime = RuntimeBuilder::new().build_and_start().await.unwrap();
        runtime.shutdown().await.unwrap();

        let result = runtime.signal_typing(ChatId::new(1), UserId::new(1)).await;
        assert!(matches!(result, Err(CometError::Channel { .. })));
    }
}
