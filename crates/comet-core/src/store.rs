//! Chat store trait and in-memory implementation
//!
//! The store of record is the single source of truth for chats, memberships
//! and messages. Every component consults it for membership and permission;
//! in-memory broadcast state is only ever a cache on top of it.
//!
//! `MemoryStore` is the reference implementation used by the runtime and the
//! reconciler tests; a database-backed implementation lives with the
//! persistence collaborator and implements the same trait.

use std::collections::BTreeMap;

use crate::errors::{CometError, Result};
use crate::model::{Chat, ChatAssociation, ChatType, Message, MessageKind, NotificationSetting, Rank};
use crate::types::{AssociationId, ChatId, LegacyUserId, MessageId, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Chat Store Trait
// ----------------------------------------------------------------------------

/// Read/write access to the chat dataset.
///
/// Read methods return owned snapshots: callers mutate the store while
/// iterating over earlier reads, and the reconciler depends on stable
/// ascending-id iteration order.
pub trait ChatStore {
    /// A single chat by id
    fn chat(&self, id: ChatId) -> Option<Chat>;

    /// All chats, optionally filtered by type, in ascending id order
    fn chats(&self, chat_type: Option<ChatType>) -> Vec<Chat>;

    /// A single association by id
    fn association(&self, id: AssociationId) -> Option<ChatAssociation>;

    /// The association binding a resolved user to a chat
    fn association_for(&self, chat_id: ChatId, user_id: UserId) -> Option<ChatAssociation>;

    /// All associations of a chat, in ascending id order
    fn associations_for_chat(&self, chat_id: ChatId) -> Vec<ChatAssociation>;

    /// Every resolved user sharing at least one chat with `user_id`,
    /// excluding the user themselves. These are the presence watchers.
    fn shared_chat_users(&self, user_id: UserId) -> Vec<UserId>;

    /// Id of the newest message in a chat
    fn latest_message_id(&self, chat_id: ChatId) -> Option<MessageId>;

    /// Record a message row (already durably written by the persistence
    /// collaborator)
    fn insert_message(&mut self, message: Message);

    /// Move every message of `from` into `to`; returns how many moved
    fn reassign_messages(&mut self, from: ChatId, to: ChatId) -> usize;

    fn set_rank(&mut self, id: AssociationId, rank: Rank) -> Result<()>;

    fn set_last_read(&mut self, id: AssociationId, message_id: Option<MessageId>) -> Result<()>;

    /// Bump the unread counter; returns the new value
    fn increment_unread(&mut self, id: AssociationId) -> Result<u32>;

    fn reset_unread(&mut self, id: AssociationId) -> Result<()>;

    fn set_intent(&mut self, chat_id: ChatId, intent: String) -> Result<()>;

    /// Remove a membership row (user left or was removed)
    fn remove_association(&mut self, id: AssociationId) -> Result<ChatAssociation>;

    /// Delete a chat row together with its associations and any remaining
    /// messages
    fn delete_chat(&mut self, chat_id: ChatId) -> Result<()>;
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

/// BTreeMap-backed store; ascending-id iteration falls out of the key order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chats: BTreeMap<ChatId, Chat>,
    associations: BTreeMap<AssociationId, ChatAssociation>,
    messages: BTreeMap<MessageId, Message>,
    next_chat_id: u32,
    next_association_id: u32,
    next_message_id: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chat row and return its id
    pub fn add_chat(
        &mut self,
        chat_type: ChatType,
        name: &str,
        creator: Option<UserId>,
    ) -> ChatId {
        self.next_chat_id += 1;
        let id = ChatId::new(self.next_chat_id);
        self.chats.insert(
            id,
            Chat {
                id,
                chat_type,
                name: name.to_string(),
                creator,
                intent: None,
            },
        );
        id
    }

    /// Insert a membership row for a resolved user
    pub fn add_association(&mut self, chat_id: ChatId, user_id: UserId, rank: Rank) -> AssociationId {
        self.insert_association(chat_id, Some(user_id), None, rank)
    }

    /// Insert a membership row backed only by a legacy account
    pub fn add_legacy_association(
        &mut self,
        chat_id: ChatId,
        legacy_user_id: LegacyUserId,
        rank: Rank,
    ) -> AssociationId {
        self.insert_association(chat_id, None, Some(legacy_user_id), rank)
    }

    fn insert_association(
        &mut self,
        chat_id: ChatId,
        user_id: Option<UserId>,
        legacy_user_id: Option<LegacyUserId>,
        rank: Rank,
    ) -> AssociationId {
        self.next_association_id += 1;
        let id = AssociationId::new(self.next_association_id);
        self.associations.insert(
            id,
            ChatAssociation {
                id,
                chat_id,
                user_id,
                legacy_user_id,
                rank,
                last_read: None,
                unread: 0,
                notifications: NotificationSetting::default(),
            },
        );
        id
    }

    /// Insert a message row, assigning the next id
    pub fn add_message(&mut self, chat_id: ChatId, user_id: UserId, content: &str) -> MessageId {
        self.next_message_id += 1;
        let id = MessageId::new(self.next_message_id);
        self.messages.insert(
            id,
            Message {
                id,
                chat_id,
                user_id,
                content: content.to_string(),
                created_at: Timestamp::now(),
                reply_id: None,
                kind: MessageKind::Message,
            },
        );
        id
    }

    /// All messages of a chat in ascending id order
    pub fn messages_for_chat(&self, chat_id: ChatId) -> Vec<Message> {
        self.messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }

    fn association_mut(&mut self, id: AssociationId) -> Result<&mut ChatAssociation> {
        self.associations
            .get_mut(&id)
            .ok_or_else(|| CometError::association_not_found(id))
    }
}

impl ChatStore for MemoryStore {
    fn chat(&self, id: ChatId) -> Option<Chat> {
        self.chats.get(&id).cloned()
    }

    fn chats(&self, chat_type: Option<ChatType>) -> Vec<Chat> {
        self.chats
            .values()
            .filter(|c| chat_type.is_none_or(|t| c.chat_type == t))
            .cloned()
            .collect()
    }

    fn association(&self, id: AssociationId) -> Option<ChatAssociation> {
        self.associations.get(&id).cloned()
    }

    fn association_for(&self, chat_id: ChatId, user_id: UserId) -> Option<ChatAssociation> {
        self.associations
            .values()
            .find(|a| a.chat_id == chat_id && a.user_id == Some(user_id))
            .cloned()
    }

    fn associations_for_chat(&self, chat_id: ChatId) -> Vec<ChatAssociation> {
        self.associations
            .values()
            .filter(|a| a.chat_id == chat_id)
            .cloned()
            .collect()
    }

    fn shared_chat_users(&self, user_id: UserId) -> Vec<UserId> {
        let chat_ids: Vec<ChatId> = self
            .associations
            .values()
            .filter(|a| a.user_id == Some(user_id))
            .map(|a| a.chat_id)
            .collect();

        let mut users: Vec<UserId> = self
            .associations
            .values()
            .filter(|a| chat_ids.contains(&a.chat_id))
            .filter_map(|a| a.user_id)
            .filter(|u| *u != user_id)
            .collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    fn latest_message_id(&self, chat_id: ChatId) -> Option<MessageId> {
        self.messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .map(|m| m.id)
            .max()
    }

    fn insert_message(&mut self, message: Message) {
        self.next_message_id = self.next_message_id.max(message.id.get());
        self.messages.insert(message.id, message);
    }

    fn reassign_messages(&mut self, from: ChatId, to: ChatId) -> usize {
        let mut moved = 0;
        for message in self.messages.values_mut() {
            if message.chat_id == from {
                message.chat_id = to;
                moved += 1;
            }
        }
        moved
    }

    fn set_rank(&mut self, id: AssociationId, rank: Rank) -> Result<()> {
        self.association_mut(id)?.rank = rank;
        Ok(())
    }

    fn set_last_read(&mut self, id: AssociationId, message_id: Option<MessageId>) -> Result<()> {
        self.association_mut(id)?.last_read = message_id;
        Ok(())
    }

    fn increment_unread(&mut self, id: AssociationId) -> Result<u32> {
        let association = self.association_mut(id)?;
        association.unread = association.unread.saturating_add(1);
        Ok(association.unread)
    }

    fn reset_unread(&mut self, id: AssociationId) -> Result<()> {
        self.association_mut(id)?.unread = 0;
        Ok(())
    }

    fn set_intent(&mut self, chat_id: ChatId, intent: String) -> Result<()> {
        let chat = self
            .chats
            .get_mut(&chat_id)
            .ok_or_else(|| CometError::chat_not_found(chat_id))?;
        chat.intent = Some(intent);
        Ok(())
    }

    fn remove_association(&mut self, id: AssociationId) -> Result<ChatAssociation> {
        self.associations
            .remove(&id)
            .ok_or_else(|| CometError::association_not_found(id))
    }

    fn delete_chat(&mut self, chat_id: ChatId) -> Result<()> {
        self.chats
            .remove(&chat_id)
            .ok_or_else(|| CometError::chat_not_found(chat_id))?;
        self.associations.retain(|_, a| a.chat_id != chat_id);
        self.messages.retain(|_, m| m.chat_id != chat_id);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
