//! Property-based tests for the direct-chat intent key and backfill pass

use comet_core::reconciler::backfill_intents;
use comet_core::store::ChatStore;
use comet_core::{intent_key, ChatType, MemoryStore, Rank, UserId};
use proptest::prelude::*;

proptest! {
    /// The intent key never depends on argument order
    #[test]
    fn intent_key_is_symmetric(a in 1u32..100_000, b in 1u32..100_000) {
        prop_assert_eq!(
            intent_key(UserId::new(a), UserId::new(b)),
            intent_key(UserId::new(b), UserId::new(a))
        );
    }

    /// The key is always `min-max` of the pair
    #[test]
    fn intent_key_is_sorted_pair(a in 1u32..100_000, b in 1u32..100_000) {
        let key = intent_key(UserId::new(a), UserId::new(b));
        prop_assert_eq!(key, format!("{}-{}", a.min(b), a.max(b)));
    }

    /// Backfill produces the formula key for every resolvable pair and a
    /// second run changes nothing
    #[test]
    fn backfill_matches_formula_and_is_idempotent(
        pairs in prop::collection::vec((1u32..500, 1u32..500), 1..10)
    ) {
        let mut store = MemoryStore::new();
        let mut expected = Vec::new();
        for (a, b) in &pairs {
            // Direct chats need two distinct members to be backfilled
            prop_assume!(a != b);
            let chat = store.add_chat(ChatType::Direct, "", Some(UserId::new(*a)));
            store.add_association(chat, UserId::new(*a), Rank::Member);
            store.add_association(chat, UserId::new(*b), Rank::Member);
            expected.push((chat, intent_key(UserId::new(*a), UserId::new(*b))));
        }

        let report = backfill_intents(&mut store);
        prop_assert_eq!(report.intents_backfilled, expected.len() as u64);
        for (chat, key) in &expected {
            let chat_record = store.chat(*chat).unwrap();
            prop_assert_eq!(chat_record.intent.as_deref(), Some(key.as_str()));
        }
        prop_assert!(backfill_intents(&mut store).is_noop());
    }
}
