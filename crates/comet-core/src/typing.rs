//! Ephemeral typing indicators
//!
//! Keyed by (chat, user) with a fixed TTL. A fresh signal inside the debounce
//! window extends the TTL without rebroadcasting; expiry is proactive via
//! `sweep`, and immediate on message send, chat leave or disconnect. All of
//! this state is process-local and simply dropped on restart.

use std::collections::HashMap;

use crate::config::TypingConfig;
use crate::types::{ChatId, TimeSource, Timestamp, UserId};

// ----------------------------------------------------------------------------
// Signal Outcome
// ----------------------------------------------------------------------------

/// What a typing signal did, and whether the caller must broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    /// New or stale indicator: broadcast `typing` with this expiry
    Broadcast { expires: Timestamp },
    /// Recent indicator extended: no broadcast (debounced)
    Refreshed { expires: Timestamp },
}

// ----------------------------------------------------------------------------
// Typing Tracker
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Typist {
    expires_at: Timestamp,
    last_broadcast: Timestamp,
}

/// Tracks the set of active typists per chat
#[derive(Debug)]
pub struct TypingTracker<T: TimeSource> {
    config: TypingConfig,
    chats: HashMap<ChatId, HashMap<UserId, Typist>>,
    time_source: T,
}

impl<T: TimeSource> TypingTracker<T> {
    /// Create a tracker with default configuration
    pub fn new(time_source: T) -> Self {
        Self::with_config(TypingConfig::default(), time_source)
    }

    /// Create a tracker with custom configuration
    pub fn with_config(config: TypingConfig, time_source: T) -> Self {
        Self {
            config,
            chats: HashMap::new(),
            time_source,
        }
    }

    pub fn config(&self) -> &TypingConfig {
        &self.config
    }

    /// Insert or refresh the indicator for (chat, user). Last-write-wins per
    /// key; rapid repeats inside the debounce window coalesce into the
    /// original broadcast.
    pub fn signal(&mut self, chat_id: ChatId, user_id: UserId) -> SignalOutcome {
        let now = self.time_source.now();
        let expires = now + self.config.ttl;
        let debounce_ms = self.config.debounce.as_millis() as u64;

        let typists = self.chats.entry(chat_id).or_default();
        match typists.get_mut(&user_id) {
            Some(typist) if now < typist.expires_at && now - typist.last_broadcast < debounce_ms => {
                typist.expires_at = expires;
                SignalOutcome::Refreshed { expires }
            }
            Some(typist) => {
                typist.expires_at = expires;
                typist.last_broadcast = now;
                SignalOutcome::Broadcast { expires }
            }
            None => {
                typists.insert(
                    user_id,
                    Typist {
                        expires_at: expires,
                        last_broadcast: now,
                    },
                );
                SignalOutcome::Broadcast { expires }
            }
        }
    }

    /// Remove the indicator for (chat, user). Idempotent; returns whether an
    /// indicator was present, i.e. whether a cleared event must go out.
    pub fn expire(&mut self, chat_id: ChatId, user_id: UserId) -> bool {
        let Some(typists) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        let removed = typists.remove(&user_id).is_some();
        if typists.is_empty() {
            self.chats.remove(&chat_id);
        }
        removed
    }

    /// Remove every indicator a user holds (disconnect). Returns the chats
    /// that need a cleared event.
    pub fn expire_all_for_user(&mut self, user_id: UserId) -> Vec<ChatId> {
        let mut cleared = Vec::new();
        self.chats.retain(|chat_id, typists| {
            if typists.remove(&user_id).is_some() {
                cleared.push(*chat_id);
            }
            !typists.is_empty()
        });
        cleared.sort_unstable();
        cleared
    }

    /// Drop all indicators for a chat (chat deleted); no cleared events are
    /// owed since the chat no longer exists
    pub fn clear_chat(&mut self, chat_id: ChatId) {
        self.chats.remove(&chat_id);
    }

    /// Remove every indicator past its TTL; returns the (chat, user) pairs
    /// that need a cleared event
    pub fn sweep(&mut self) -> Vec<(ChatId, UserId)> {
        let now = self.time_source.now();
        let mut expired = Vec::new();
        self.chats.retain(|chat_id, typists| {
            typists.retain(|user_id, typist| {
                if now >= typist.expires_at {
                    expired.push((*chat_id, *user_id));
                    false
                } else {
                    true
                }
            });
            !typists.is_empty()
        });
        expired.sort_unstable();
        expired
    }

    /// Users currently typing in a chat
    pub fn typists(&self, chat_id: ChatId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .chats
            .get(&chat_id)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default();
        users.sort_unstable();
        users
    }

    pub fn is_typing(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.chats
            .get(&chat_id)
            .is_some_and(|t| t.contains_key(&user_id))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManualTimeSource;
    use core::time::Duration;

    fn tracker() -> (TypingTracker<ManualTimeSource>, ManualTimeSource) {
        let clock = ManualTimeSource::new(Timestamp::new(0));
        let config = TypingConfig {
            ttl: Duration::from_millis(5_000),
            debounce: Duration::from_millis(2_000),
            sweep_interval: Duration::from_millis(1_000),
        };
        (TypingTracker::with_config(config, clock.clone()), clock)
    }

    #[test]
    fn test_signal_then_refresh_within_debounce() {
        let (mut tracker, clock) = tracker();
        let chat = ChatId::new(1);
        let user = UserId::new(1);

        assert!(matches!(
            tracker.signal(chat, user),
            SignalOutcome::Broadcast { .. }
        ));

        clock.advance(Duration::from_millis(500));
        // Inside the debounce window: extended, not rebroadcast
        match tracker.signal(chat, user) {
            SignalOutcome::Refreshed { expires } => {
                assert_eq!(expires, Timestamp::new(5_500));
            }
            other => panic!("expected refresh, got {other:?}"),
        }

        clock.advance(Duration::from_millis(2_000));
        // Past the debounce window: rebroadcast
        assert!(matches!(
            tracker.signal(chat, user),
            SignalOutcome::Broadcast { .. }
        ));
    }

    #[test]
    fn test_sweep_removes_expired() {
        let (mut tracker, clock) = tracker();
        let chat = ChatId::new(1);
        tracker.signal(chat, UserId::new(1));

        clock.advance(Duration::from_millis(1_000));
        tracker.signal(chat, UserId::new(2));

        clock.advance(Duration::from_millis(4_000));
        // User 1 signed at t=0 (expires 5000), user 2 at t=1000 (expires 6000)
        assert_eq!(tracker.sweep(), vec![(chat, UserId::new(1))]);
        assert_eq!(tracker.typists(chat), vec![UserId::new(2)]);

        clock.advance(Duration::from_millis(1_000));
        assert_eq!(tracker.sweep(), vec![(chat, UserId::new(2))]);
        assert!(tracker.typists(chat).is_empty());
        assert!(tracker.sweep().is_empty());
    }

    #[test]
    fn test_refresh_extends_ttl() {
        let (mut tracker, clock) = tracker();
        let chat = ChatId::new(1);
        let user = UserId::new(1);

        tracker.signal(chat, user);
        clock.advance(Duration::from_millis(4_000));
        tracker.signal(chat, user); // rebroadcast, new expiry at 9000

        clock.advance(Duration::from_millis(2_000));
        assert!(tracker.sweep().is_empty());
        assert!(tracker.is_typing(chat, user));
    }

    #[test]
    fn test_expire_is_idempotent() {
        let (mut tracker, _clock) = tracker();
        let chat = ChatId::new(1);
        let user = UserId::new(1);

        tracker.signal(chat, user);
        assert!(tracker.expire(chat, user));
        assert!(!tracker.expire(chat, user));
        assert!(!tracker.is_typing(chat, user));
    }

    #[test]
    fn test_expire_all_for_user() {
        let (mut tracker, _clock) = tracker();
        let user = UserId::new(1);
        tracker.signal(ChatId::new(1), user);
        tracker.signal(ChatId::new(2), user);
        tracker.signal(ChatId::new(2), UserId::new(2));

        assert_eq!(
            tracker.expire_all_for_user(user),
            vec![ChatId::new(1), ChatId::new(2)]
        );
        assert_eq!(tracker.typists(ChatId::new(2)), vec![UserId::new(2)]);
        assert!(tracker.expire_all_for_user(user).is_empty());
    }
}
