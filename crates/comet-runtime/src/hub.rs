//! Hub task: the single logic loop of the engine
//!
//! One task owns the presence tracker, the typing tracker and access to the
//! store of record, and consumes a single command channel. Every mutation
//! flows through here, so per-chat delivery order falls out of the command
//! order and no state needs finer-grained locking. Client-invoked commands
//! carry a oneshot reply so permission and not-found failures surface
//! synchronously; collaborator events are fire-and-forget and recover
//! locally.

use std::sync::{Arc, Mutex, MutexGuard};

use comet_core::{
    AssociationId, ChatId, ChatStore, CometConfig, CometError, Message, PresenceTracker, Rank,
    Result, ServerEvent, SignalOutcome, StatusChange, StoredStatus, SystemTimeSource,
    TypingTracker, UserId,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::registry::ConnectionRegistry;

// ----------------------------------------------------------------------------
// Hub Commands
// ----------------------------------------------------------------------------

type ReplyTo = oneshot::Sender<Result<()>>;

/// Commands consumed by the hub task. Client-invoked variants carry a reply
/// channel; collaborator events do not.
#[derive(Debug)]
pub enum HubCommand {
    /// A client opened a persistent connection (already registered)
    ConnectionOpened { user_id: UserId },
    /// A client connection closed (already unregistered)
    ConnectionClosed { user_id: UserId },
    /// Client signal: the user is typing in a chat
    SignalTyping {
        chat_id: ChatId,
        user_id: UserId,
        reply: ReplyTo,
    },
    /// Client signal: the user read a chat up to its newest message
    ReadChat {
        association_id: AssociationId,
        user_id: UserId,
        reply: ReplyTo,
    },
    /// Client signal: update the stored status preference
    SetStatus {
        user_id: UserId,
        status: StoredStatus,
        reply: ReplyTo,
    },
    /// A message row was durably written by the persistence collaborator
    MessageCreated { chat_id: ChatId, message: Message },
    /// The blocking collaborator changed a block relationship
    UserBlocked {
        blocker: UserId,
        blocked: UserId,
        active: bool,
    },
    /// The chat-administration collaborator changed a membership's rank
    AssociationRankChanged {
        association_id: AssociationId,
        rank: Rank,
    },
    /// A member left or was removed from a chat
    MemberLeft { association_id: AssociationId },
    /// The chat-administration collaborator deleted a chat
    ChatDeleted { chat_id: ChatId },
    /// Snapshot the hub's counters
    QueryStats { reply: oneshot::Sender<HubStats> },
    /// Stop the hub task
    Shutdown,
}

// ----------------------------------------------------------------------------
// Hub Statistics
// ----------------------------------------------------------------------------

/// Counters for the hub task
#[derive(Debug, Default, Clone)]
pub struct HubStats {
    pub commands_processed: u64,
    pub messages_published: u64,
    pub typing_broadcasts: u64,
    pub typing_expiries: u64,
    pub presence_changes: u64,
}

// ----------------------------------------------------------------------------
// Hub Task
// ----------------------------------------------------------------------------

/// The engine's single logic task
pub struct HubTask<S: ChatStore> {
    store: Arc<Mutex<S>>,
    presence: PresenceTracker,
    typing: TypingTracker<SystemTimeSource>,
    registry: Arc<ConnectionRegistry>,
    commands: mpsc::Receiver<HubCommand>,
    config: CometConfig,
    stats: HubStats,
}

impl<S: ChatStore> HubTask<S> {
    pub fn new(
        store: Arc<Mutex<S>>,
        config: CometConfig,
        registry: Arc<ConnectionRegistry>,
        commands: mpsc::Receiver<HubCommand>,
    ) -> Self {
        Self {
            store,
            presence: PresenceTracker::new(),
            typing: TypingTracker::with_config(config.typing.clone(), SystemTimeSource),
            registry,
            commands,
            config,
            stats: HubStats::default(),
        }
    }

    /// Run until `Shutdown` or until every command sender is dropped
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.config.typing.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(HubCommand::Shutdown) => break,
                    Some(command) => {
                        self.stats.commands_processed += 1;
                        self.handle(command);
                    }
                },
                _ = sweep.tick() => self.sweep_typing(),
            }
        }
        info!(
            commands = self.stats.commands_processed,
            messages = self.stats.messages_published,
            "hub task stopped"
        );
    }

    // Lock is only ever held inside a synchronous handler, never across an
    // await point.
    fn store(&self) -> MutexGuard<'_, S> {
        self.store.lock().expect("store lock poisoned")
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::ConnectionOpened { user_id } => self.handle_connection_opened(user_id),
            HubCommand::ConnectionClosed { user_id } => self.handle_connection_closed(user_id),
            HubCommand::SignalTyping {
                chat_id,
                user_id,
                reply,
            } => {
                let result = self.handle_signal_typing(chat_id, user_id);
                let _ = reply.send(result);
            }
            HubCommand::ReadChat {
                association_id,
                user_id,
                reply,
            } => {
                let result = self.handle_read_chat(association_id, user_id);
                let _ = reply.send(result);
            }
            HubCommand::SetStatus {
                user_id,
                status,
                reply,
            } => {
                let result = self.handle_set_status(user_id, status);
                let _ = reply.send(result);
            }
            HubCommand::MessageCreated { chat_id, message } => {
                self.handle_message_created(chat_id, message)
            }
            HubCommand::UserBlocked {
                blocker,
                blocked,
                active,
            } => self.handle_user_blocked(blocker, blocked, active),
            HubCommand::AssociationRankChanged {
                association_id,
                rank,
            } => self.handle_rank_changed(association_id, rank),
            HubCommand::MemberLeft { association_id } => self.handle_member_left(association_id),
            HubCommand::ChatDeleted { chat_id } => self.handle_chat_deleted(chat_id),
            HubCommand::QueryStats { reply } => {
                let _ = reply.send(self.stats.clone());
            }
            HubCommand::Shutdown => {}
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    fn handle_connection_opened(&mut self, user_id: UserId) {
        if let Some(change) = self.presence.connection_opened(user_id) {
            self.broadcast_presence(change);
        }
    }

    fn handle_connection_closed(&mut self, user_id: UserId) {
        // Typing indicators die with the last connection, not with the TTL
        if !self.registry.is_connected(user_id) {
            for chat_id in self.typing.expire_all_for_user(user_id) {
                self.stats.typing_expiries += 1;
                self.broadcast_to_members(
                    chat_id,
                    Some(user_id),
                    &ServerEvent::CancelTyping {
                        chat_id,
                        user: user_id,
                    },
                );
            }
        }
        if let Some(change) = self.presence.connection_closed(user_id) {
            self.broadcast_presence(change);
        }
    }

    // ------------------------------------------------------------------
    // Client signals
    // ------------------------------------------------------------------

    fn handle_signal_typing(&mut self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        {
            let store = self.store();
            if store.chat(chat_id).is_none() {
                return Err(CometError::chat_not_found(chat_id));
            }
            if store.association_for(chat_id, user_id).is_none() {
                return Err(CometError::permission_denied(format!(
                    "user {user_id} is not a member of chat {chat_id}"
                )));
            }
        }

        match self.typing.signal(chat_id, user_id) {
            SignalOutcome::Broadcast { expires } => {
                self.stats.typing_broadcasts += 1;
                self.broadcast_to_members(
                    chat_id,
                    Some(user_id),
                    &ServerEvent::Typing {
                        chat_id,
                        user: user_id,
                        expires,
                    },
                );
            }
            SignalOutcome::Refreshed { .. } => {
                debug!(%chat_id, %user_id, "typing refresh coalesced");
            }
        }
        Ok(())
    }

    fn handle_read_chat(&mut self, association_id: AssociationId, user_id: UserId) -> Result<()> {
        let (chat_id, last_read) = {
            let mut store = self.store();
            let association = store
                .association(association_id)
                .ok_or_else(|| CometError::association_not_found(association_id))?;
            if association.user_id != Some(user_id) {
                return Err(CometError::permission_denied(
                    "association does not belong to the caller",
                ));
            }
            let last_read = store.latest_message_id(association.chat_id);
            store.reset_unread(association_id)?;
            store.set_last_read(association_id, last_read)?;
            (association.chat_id, last_read)
        };

        self.broadcast_to_members(
            chat_id,
            Some(user_id),
            &ServerEvent::ReadChat {
                chat_id,
                association_id,
                user_id,
                last_read,
            },
        );
        Ok(())
    }

    fn handle_set_status(&mut self, user_id: UserId, status: StoredStatus) -> Result<()> {
        if let Some(change) = self.presence.set_status(user_id, status)? {
            self.broadcast_presence(change);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Collaborator events
    // ------------------------------------------------------------------

    fn handle_message_created(&mut self, chat_id: ChatId, message: Message) {
        let members = {
            let mut store = self.store();
            if store.chat(chat_id).is_none() {
                warn!(%chat_id, "dropping message for unknown chat");
                return;
            }
            store.insert_message(message.clone());
            store.associations_for_chat(chat_id)
        };

        // A send is an implicit stop-typing
        let sender = message.user_id;
        if self.typing.expire(chat_id, sender) {
            self.broadcast_to_members(
                chat_id,
                Some(sender),
                &ServerEvent::CancelTyping {
                    chat_id,
                    user: sender,
                },
            );
        }

        let event = ServerEvent::Message {
            chat_id,
            message: message.clone(),
        };
        for association in &members {
            let Some(user_id) = association.user_id else {
                continue;
            };
            let cursor = if user_id == sender {
                self.store().set_last_read(association.id, Some(message.id))
            } else {
                self.store().increment_unread(association.id).map(|_| ())
            };
            if let Err(error) = cursor {
                warn!(association_id = %association.id, %error, "cursor update failed");
            }
            self.registry.send_to_user(user_id, &event);
        }
        self.stats.messages_published += 1;
    }

    fn handle_user_blocked(&mut self, blocker: UserId, blocked: UserId, active: bool) {
        self.presence.set_blocked(blocker, blocked, active);
        self.registry.send_to_user(
            blocked,
            &ServerEvent::UserBlocked {
                user_id: blocker,
                blocked: active,
            },
        );
        // The blocked side's view of the blocker changes immediately
        let status = self.presence.status_visible_to(blocked, blocker);
        self.registry.send_to_user(
            blocked,
            &ServerEvent::Presence {
                user_id: blocker,
                status,
            },
        );
    }

    fn handle_rank_changed(&mut self, association_id: AssociationId, rank: Rank) {
        let association = self.store().association(association_id);
        let Some(association) = association else {
            warn!(%association_id, "rank change for unknown association");
            return;
        };
        if let Err(error) = self.store().set_rank(association_id, rank) {
            warn!(%association_id, %error, "rank change failed");
            return;
        }
        self.broadcast_to_members(
            association.chat_id,
            None,
            &ServerEvent::RankChanged {
                chat_id: association.chat_id,
                association_id,
                rank,
            },
        );
    }

    fn handle_member_left(&mut self, association_id: AssociationId) {
        let removed = self.store().remove_association(association_id);
        match removed {
            Ok(association) => {
                let Some(user_id) = association.user_id else {
                    return;
                };
                if self.typing.expire(association.chat_id, user_id) {
                    self.stats.typing_expiries += 1;
                    self.broadcast_to_members(
                        association.chat_id,
                        Some(user_id),
                        &ServerEvent::CancelTyping {
                            chat_id: association.chat_id,
                            user: user_id,
                        },
                    );
                }
            }
            Err(error) => warn!(%association_id, %error, "member-left for unknown association"),
        }
    }

    fn handle_chat_deleted(&mut self, chat_id: ChatId) {
        let members: Vec<UserId> = self
            .store()
            .associations_for_chat(chat_id)
            .iter()
            .filter_map(|a| a.user_id)
            .collect();
        self.typing.clear_chat(chat_id);
        if let Err(error) = self.store().delete_chat(chat_id) {
            warn!(%chat_id, %error, "chat deletion failed");
            return;
        }
        let event = ServerEvent::ChatDeleted { chat_id };
        for user_id in members {
            self.registry.send_to_user(user_id, &event);
        }
    }

    // ------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------

    fn sweep_typing(&mut self) {
        for (chat_id, user_id) in self.typing.sweep() {
            self.stats.typing_expiries += 1;
            self.broadcast_to_members(
                chat_id,
                Some(user_id),
                &ServerEvent::CancelTyping {
                    chat_id,
                    user: user_id,
                },
            );
        }
    }

    /// Deliver an event to every resolved, connected member of a chat,
    /// optionally excluding one user. Per-recipient failures are absorbed by
    /// the registry.
    fn broadcast_to_members(
        &self,
        chat_id: ChatId,
        except: Option<UserId>,
        event: &ServerEvent,
    ) -> usize {
        let members = self.store().associations_for_chat(chat_id);
        let mut delivered = 0;
        for association in members {
            let Some(user_id) = association.user_id else {
                continue;
            };
            if Some(user_id) == except {
                continue;
            }
            delivered += self.registry.send_to_user(user_id, event);
        }
        delivered
    }

    /// Tell everyone who tracks this user about a visible status change,
    /// applying per-viewer block visibility
    fn broadcast_presence(&mut self, change: StatusChange) {
        self.stats.presence_changes += 1;
        let watchers = self.store().shared_chat_users(change.user_id);
        for watcher in watchers {
            let status = self.presence.status_visible_to(watcher, change.user_id);
            self.registry.send_to_user(
                watcher,
                &ServerEvent::Presence {
                    user_id: change.user_id,
                    status,
                },
            );
        }
    }
}
