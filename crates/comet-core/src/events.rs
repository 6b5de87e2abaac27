//! Typed event vocabulary pushed to connected clients
//!
//! Every fan-out goes through `ServerEvent`, dispatched over each
//! connection's own channel rather than ad-hoc namespace strings. The wire
//! names and payload shapes (`typing`, `readChat`, `userBlocked`, ...) are
//! part of the client protocol and must not change.

use serde::{Deserialize, Serialize};

use crate::model::{Message, Rank};
use crate::presence::Status;
use crate::types::{AssociationId, ChatId, MessageId, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Server Events
// ----------------------------------------------------------------------------

/// Events emitted to clients over their persistent connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
#[serde(rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Someone started typing; shown until `expires` or a cancel
    Typing {
        chat_id: ChatId,
        user: UserId,
        expires: Timestamp,
    },
    /// A typing indicator went away before or at its TTL
    CancelTyping { chat_id: ChatId, user: UserId },
    /// A new message was published to a chat the client belongs to
    Message { chat_id: ChatId, message: Message },
    /// A member read the chat up to `last_read`
    ReadChat {
        chat_id: ChatId,
        association_id: AssociationId,
        user_id: UserId,
        last_read: Option<MessageId>,
    },
    /// A tracked user's visible status changed
    Presence { user_id: UserId, status: Status },
    /// The client was blocked or unblocked by `user_id`
    UserBlocked { user_id: UserId, blocked: bool },
    /// A membership's rank was changed administratively
    RankChanged {
        chat_id: ChatId,
        association_id: AssociationId,
        rank: Rank,
    },
    /// A chat the client belonged to was deleted
    ChatDeleted { chat_id: ChatId },
}

impl ServerEvent {
    /// Wire name of the event, for logging
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::CancelTyping { .. } => "cancelTyping",
            ServerEvent::Message { .. } => "message",
            ServerEvent::ReadChat { .. } => "readChat",
            ServerEvent::Presence { .. } => "presence",
            ServerEvent::UserBlocked { .. } => "userBlocked",
            ServerEvent::RankChanged { .. } => "rankChanged",
            ServerEvent::ChatDeleted { .. } => "chatDeleted",
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typing_wire_shape() {
        let event = ServerEvent::Typing {
            chat_id: ChatId::new(3),
            user: UserId::new(7),
            expires: Timestamp::new(12_345),
        };
        assert_eq!(event.name(), "typing");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "typing",
                "data": { "chatId": 3, "user": 7, "expires": 12_345 }
            })
        );
    }

    #[test]
    fn test_read_chat_wire_shape() {
        let event = ServerEvent::ReadChat {
            chat_id: ChatId::new(1),
            association_id: AssociationId::new(9),
            user_id: UserId::new(2),
            last_read: Some(MessageId::new(40)),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "readChat",
                "data": { "chatId": 1, "associationId": 9, "userId": 2, "lastRead": 40 }
            })
        );
    }

    #[test]
    fn test_user_blocked_wire_shape() {
        let event = ServerEvent::UserBlocked {
            user_id: UserId::new(5),
            blocked: true,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "userBlocked",
                "data": { "userId": 5, "blocked": true }
            })
        );
    }

    #[test]
    fn test_round_trip() {
        let event = ServerEvent::Presence {
            user_id: UserId::new(1),
            status: Status::Busy,
        };
        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: ServerEvent = serde_json::from_str(&encoded).unwrap();
        assert_eq!(event, decoded);
    }
}
