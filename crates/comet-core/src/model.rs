//! Data model for chats, memberships and messages
//!
//! These mirror the rows owned by the store of record. The engine never
//! invents rows of its own; it reads them for membership lookups and writes
//! back read-cursors, ranks and intent keys.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::types::{AssociationId, ChatId, LegacyUserId, MessageId, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Enumerations
// ----------------------------------------------------------------------------

/// Kind of chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
    Channel,
}

/// Permission tier within a chat. Ordering follows privilege: owner > admin
/// > member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Member,
    Admin,
    Owner,
}

/// Per-association mute preference
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSetting {
    #[default]
    All,
    Mentions,
    #[serde(rename = "none")]
    Nothing,
}

/// Message payload kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Message,
    System,
}

// ----------------------------------------------------------------------------
// Chat
// ----------------------------------------------------------------------------

/// A chat row. `creator` is the account that created the chat and drives
/// owner-gap promotion priority; `intent` is the order-independent duplicate
/// key for direct chats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    pub name: String,
    pub creator: Option<UserId>,
    pub intent: Option<String>,
}

impl Chat {
    pub fn is_direct(&self) -> bool {
        self.chat_type == ChatType::Direct
    }

    /// Whether this chat has a persisted, non-empty intent key
    pub fn has_intent(&self) -> bool {
        self.intent.as_deref().is_some_and(|i| !i.is_empty())
    }
}

// ----------------------------------------------------------------------------
// Chat Association
// ----------------------------------------------------------------------------

/// A user's membership record in a specific chat.
///
/// Exactly one of `user_id` / `legacy_user_id` identifies the member; a row
/// with no live `user_id` is *unresolved* and excluded from delivery,
/// merging and promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAssociation {
    pub id: AssociationId,
    pub chat_id: ChatId,
    pub user_id: Option<UserId>,
    pub legacy_user_id: Option<LegacyUserId>,
    pub rank: Rank,
    /// Read cursor: id of the newest message this member has read
    pub last_read: Option<MessageId>,
    /// Unread message counter, zeroed by `readChat`
    pub unread: u32,
    pub notifications: NotificationSetting,
}

impl ChatAssociation {
    /// The live account behind this membership, if any
    pub fn resolved_user(&self) -> Option<UserId> {
        self.user_id
    }

    pub fn is_resolved(&self) -> bool {
        self.user_id.is_some()
    }
}

// ----------------------------------------------------------------------------
// Message
// ----------------------------------------------------------------------------

/// A message row, durably written by the persistence collaborator before it
/// reaches the delivery channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: Timestamp,
    pub reply_id: Option<MessageId>,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

// ----------------------------------------------------------------------------
// Direct-Chat Intent
// ----------------------------------------------------------------------------

/// The two resolved participants of a direct chat
pub type DirectPair = SmallVec<[UserId; 2]>;

/// Order-independent duplicate key for a direct chat: the sorted participant
/// ids joined by `-`.
pub fn intent_key(a: UserId, b: UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}-{hi}")
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
