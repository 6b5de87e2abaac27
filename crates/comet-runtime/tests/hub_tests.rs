//! Integration tests for the hub task: message delivery order, unread
//! cursors, presence fan-out, blocks and chat administration events

use comet_core::{ChatType, MessageKind, Timestamp};
use comet_runtime::{
    create_test_runtime, AssociationId, ChatId, ChatStore, ClientConnection, CometError,
    MemoryStore, Message, MessageId, Rank, ServerEvent, Status, StoredStatus, UserId,
};
use tokio::time::{timeout, Duration};

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

async fn next_event(conn: &mut ClientConnection) -> ServerEvent {
    timeout(Duration::from_secs(2), conn.events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event stream closed")
}

fn message(id: u32, chat_id: ChatId, user_id: UserId, content: &str) -> Message {
    Message {
        id: MessageId::new(id),
        chat_id,
        user_id,
        content: content.to_string(),
        created_at: Timestamp::now(),
        reply_id: None,
        kind: MessageKind::Message,
    }
}

/// Group chat with users 1 (owner), 2 and 3
fn seeded_group() -> (MemoryStore, ChatId, [AssociationId; 3]) {
    let mut store = MemoryStore::new();
    let chat = store.add_chat(ChatType::Group, "lounge", Some(UserId::new(1)));
    let a1 = store.add_association(chat, UserId::new(1), Rank::Owner);
    let a2 = store.add_association(chat, UserId::new(2), Rank::Member);
    let a3 = store.add_association(chat, UserId::new(3), Rank::Member);
    (store, chat, [a1, a2, a3])
}

// ----------------------------------------------------------------------------
// Message delivery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_messages_delivered_in_publish_order() {
    let (store, chat, [a1, a2, _]) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();
    let mut observer = runtime.connect(UserId::new(2)).await.unwrap();

    for id in 1..=5 {
        let msg = message(id, chat, UserId::new(1), &format!("msg {id}"));
        runtime.publish_message(chat, msg).await.unwrap();
    }

    for id in 1..=5u32 {
        match next_event(&mut observer).await {
            ServerEvent::Message {
                chat_id,
                message: delivered,
            } => {
                assert_eq!(chat_id, chat);
                assert_eq!(delivered.id, MessageId::new(id));
            }
            other => panic!("expected message event, got {other:?}"),
        }
    }

    // Receiving the last event proves all five were processed
    let store = runtime.store();
    let store = store.lock().unwrap();
    assert_eq!(store.association(a2).unwrap().unread, 5);
    assert_eq!(
        store.association(a1).unwrap().last_read,
        Some(MessageId::new(5))
    );
}

#[tokio::test]
async fn test_publish_to_unknown_chat_is_dropped() {
    let (store, chat, _) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();
    let mut observer = runtime.connect(UserId::new(2)).await.unwrap();

    let orphan = message(1, ChatId::new(999), UserId::new(1), "lost");
    runtime.publish_message(ChatId::new(999), orphan).await.unwrap();
    let kept = message(2, chat, UserId::new(1), "kept");
    runtime.publish_message(chat, kept.clone()).await.unwrap();

    // Only the second publish reaches the observer
    assert_eq!(
        next_event(&mut observer).await,
        ServerEvent::Message {
            chat_id: chat,
            message: kept,
        }
    );
}

// ----------------------------------------------------------------------------
// Unread cursors and readChat
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_read_chat_resets_only_the_callers_counter() {
    let (store, chat, [_, a2, a3]) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();
    let mut conn1 = runtime.connect(UserId::new(1)).await.unwrap();
    let mut conn2 = runtime.connect(UserId::new(2)).await.unwrap();
    let mut conn3 = runtime.connect(UserId::new(3)).await.unwrap();

    // Connect fan-out: user 1 sees 2 and 3 come online, user 2 sees 3
    assert_eq!(
        next_event(&mut conn1).await,
        ServerEvent::Presence {
            user_id: UserId::new(2),
            status: Status::Online,
        }
    );
    assert_eq!(
        next_event(&mut conn1).await,
        ServerEvent::Presence {
            user_id: UserId::new(3),
            status: Status::Online,
        }
    );
    assert_eq!(
        next_event(&mut conn2).await,
        ServerEvent::Presence {
            user_id: UserId::new(3),
            status: Status::Online,
        }
    );

    let msg = message(1, chat, UserId::new(1), "hello");
    runtime.publish_message(chat, msg.clone()).await.unwrap();
    for conn in [&mut conn1, &mut conn2, &mut conn3] {
        assert_eq!(
            next_event(conn).await,
            ServerEvent::Message {
                chat_id: chat,
                message: msg.clone(),
            }
        );
    }

    runtime.read_chat(a2, UserId::new(2)).await.unwrap();

    {
        let store = runtime.store();
        let store = store.lock().unwrap();
        let read = store.association(a2).unwrap();
        assert_eq!(read.unread, 0);
        assert_eq!(read.last_read, Some(MessageId::new(1)));
        // The third member's counter is untouched
        assert_eq!(store.association(a3).unwrap().unread, 1);
    }

    // Other members learn about the read cursor; the reader does not echo
    let expected = ServerEvent::ReadChat {
        chat_id: chat,
        association_id: a2,
        user_id: UserId::new(2),
        last_read: Some(MessageId::new(1)),
    };
    assert_eq!(next_event(&mut conn1).await, expected);
    assert_eq!(next_event(&mut conn3).await, expected);
}

#[tokio::test]
async fn test_read_chat_rejects_bad_caller() {
    let (store, _, [_, a2, _]) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();

    let result = runtime.read_chat(AssociationId::new(999), UserId::new(1)).await;
    assert!(matches!(result, Err(CometError::NotFound { .. })));

    // The association belongs to user 2
    let result = runtime.read_chat(a2, UserId::new(1)).await;
    assert!(matches!(result, Err(CometError::PermissionDenied { .. })));
}

#[tokio::test]
async fn test_signal_typing_rejects_outsiders() {
    let (store, chat, _) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();

    let result = runtime.signal_typing(ChatId::new(999), UserId::new(1)).await;
    assert!(matches!(result, Err(CometError::NotFound { .. })));

    let result = runtime.signal_typing(chat, UserId::new(42)).await;
    assert!(matches!(result, Err(CometError::PermissionDenied { .. })));
}

// ----------------------------------------------------------------------------
// Presence
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_presence_transitions_reach_watchers() {
    let (store, _, _) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();
    let mut conn1 = runtime.connect(UserId::new(1)).await.unwrap();
    let conn2 = runtime.connect(UserId::new(2)).await.unwrap();

    let presence = |status| ServerEvent::Presence {
        user_id: UserId::new(2),
        status,
    };
    assert_eq!(next_event(&mut conn1).await, presence(Status::Online));

    runtime
        .set_status(UserId::new(2), StoredStatus::Busy)
        .await
        .unwrap();
    assert_eq!(next_event(&mut conn1).await, presence(Status::Busy));

    // Invisible reads as offline to everyone else
    runtime
        .set_status(UserId::new(2), StoredStatus::Invisible)
        .await
        .unwrap();
    assert_eq!(next_event(&mut conn1).await, presence(Status::Offline));

    runtime
        .set_status(UserId::new(2), StoredStatus::Online)
        .await
        .unwrap();
    assert_eq!(next_event(&mut conn1).await, presence(Status::Online));

    runtime.disconnect(UserId::new(2), conn2.id).await.unwrap();
    assert_eq!(next_event(&mut conn1).await, presence(Status::Offline));
}

#[tokio::test]
async fn test_set_status_requires_a_known_user() {
    let (store, _, _) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();

    // Never connected, so presence has no entry to update
    let result = runtime.set_status(UserId::new(42), StoredStatus::Idle).await;
    assert!(matches!(result, Err(CometError::NotFound { .. })));
}

#[tokio::test]
async fn test_block_hides_the_blocker() {
    let (store, _, _) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();
    let _conn1 = runtime.connect(UserId::new(1)).await.unwrap();
    let mut conn2 = runtime.connect(UserId::new(2)).await.unwrap();

    runtime
        .user_blocked(UserId::new(1), UserId::new(2), true)
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut conn2).await,
        ServerEvent::UserBlocked {
            user_id: UserId::new(1),
            blocked: true,
        }
    );
    // The blocker drops to offline in the blocked side's view
    assert_eq!(
        next_event(&mut conn2).await,
        ServerEvent::Presence {
            user_id: UserId::new(1),
            status: Status::Offline,
        }
    );

    runtime
        .user_blocked(UserId::new(1), UserId::new(2), false)
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut conn2).await,
        ServerEvent::UserBlocked {
            user_id: UserId::new(1),
            blocked: false,
        }
    );
    assert_eq!(
        next_event(&mut conn2).await,
        ServerEvent::Presence {
            user_id: UserId::new(1),
            status: Status::Online,
        }
    );
}

// ----------------------------------------------------------------------------
// Chat administration
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_rank_change_is_stored_and_broadcast() {
    let (store, chat, [_, a2, _]) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();
    let mut observer = runtime.connect(UserId::new(2)).await.unwrap();

    runtime.association_rank_changed(a2, Rank::Admin).await.unwrap();
    assert_eq!(
        next_event(&mut observer).await,
        ServerEvent::RankChanged {
            chat_id: chat,
            association_id: a2,
            rank: Rank::Admin,
        }
    );
    let store = runtime.store();
    assert_eq!(
        store.lock().unwrap().association(a2).unwrap().rank,
        Rank::Admin
    );
}

#[tokio::test]
async fn test_member_left_removes_the_association() {
    let (store, chat, [_, _, a3]) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();
    let mut observer = runtime.connect(UserId::new(2)).await.unwrap();

    runtime.member_left(a3).await.unwrap();
    // A later publish proves the departure was processed first
    let msg = message(1, chat, UserId::new(1), "after");
    runtime.publish_message(chat, msg.clone()).await.unwrap();
    assert_eq!(
        next_event(&mut observer).await,
        ServerEvent::Message {
            chat_id: chat,
            message: msg,
        }
    );

    let store = runtime.store();
    assert!(store.lock().unwrap().association(a3).is_none());
}

#[tokio::test]
async fn test_stats_track_publishes_and_typing() {
    let (store, chat, _) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();
    let mut observer = runtime.connect(UserId::new(2)).await.unwrap();

    runtime.signal_typing(chat, UserId::new(1)).await.unwrap();
    for id in 1..=2 {
        let msg = message(id, chat, UserId::new(1), "hi");
        runtime.publish_message(chat, msg).await.unwrap();
    }
    // Drain: typing, its cancel on send, then both messages
    for _ in 0..4 {
        next_event(&mut observer).await;
    }

    let stats = runtime.stats().await.unwrap();
    assert_eq!(stats.messages_published, 2);
    assert_eq!(stats.typing_broadcasts, 1);
    assert_eq!(stats.presence_changes, 1);
    assert!(stats.commands_processed >= 4);
}

#[tokio::test]
async fn test_chat_deleted_notifies_members() {
    let (store, chat, _) = seeded_group();
    let runtime = create_test_runtime(store).await.unwrap();
    let mut observer = runtime.connect(UserId::new(2)).await.unwrap();

    runtime.chat_deleted(chat).await.unwrap();
    assert_eq!(
        next_event(&mut observer).await,
        ServerEvent::ChatDeleted { chat_id: chat }
    );
    let store = runtime.store();
    assert!(store.lock().unwrap().chat(chat).is_none());
}
