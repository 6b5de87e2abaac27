//! Offline maintenance passes restoring chat integrity invariants
//!
//! Each pass scans the store of record and repairs one invariant: duplicate
//! direct chats are merged, ownerless group chats get an owner promoted,
//! direct chats are stripped of rank hierarchy, and missing intent keys are
//! backfilled. Every pass is idempotent; re-running on a consistent dataset
//! changes nothing. Anomalies the passes refuse to guess about (empty chats,
//! unresolved members) are logged and counted, never auto-repaired.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::model::{intent_key, ChatType, DirectPair, Rank};
use crate::store::ChatStore;
use crate::types::ChatId;

// ----------------------------------------------------------------------------
// Reconciler Report
// ----------------------------------------------------------------------------

/// Counts of what a reconciliation run did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcilerReport {
    /// Duplicate direct chats merged away
    pub chats_merged: u64,
    /// Messages reassigned to surviving chats
    pub messages_reassigned: u64,
    /// Owner associations promoted into ownerless group chats
    pub owners_promoted: u64,
    /// Direct-chat associations demoted back to member
    pub ranks_flattened: u64,
    /// Direct chats that received an intent key
    pub intents_backfilled: u64,
    /// Merge candidates skipped because a member was unresolved
    pub skipped_unresolved: u64,
    /// Chats needing manual attention (no associations, no resolvable member)
    pub anomalies: u64,
}

impl ReconcilerReport {
    /// Whether the run mutated nothing (anomaly counts are observations, not
    /// mutations)
    pub fn is_noop(&self) -> bool {
        self.chats_merged == 0
            && self.messages_reassigned == 0
            && self.owners_promoted == 0
            && self.ranks_flattened == 0
            && self.intents_backfilled == 0
    }

    /// Fold another report's counts into this one
    pub fn absorb(&mut self, other: ReconcilerReport) {
        self.chats_merged += other.chats_merged;
        self.messages_reassigned += other.messages_reassigned;
        self.owners_promoted += other.owners_promoted;
        self.ranks_flattened += other.ranks_flattened;
        self.intents_backfilled += other.intents_backfilled;
        self.skipped_unresolved += other.skipped_unresolved;
        self.anomalies += other.anomalies;
    }
}

// ----------------------------------------------------------------------------
// Membership Snapshot
// ----------------------------------------------------------------------------

/// Sorted resolved participants of a chat, plus the raw association count
/// and whether any member is unresolved
fn direct_members<S: ChatStore>(store: &S, chat_id: ChatId) -> (DirectPair, usize, bool) {
    let associations = store.associations_for_chat(chat_id);
    let total = associations.len();
    let mut resolved: DirectPair = associations.iter().filter_map(|a| a.user_id).collect();
    resolved.sort_unstable();
    let unresolved = resolved.len() != total;
    (resolved, total, unresolved)
}

// ----------------------------------------------------------------------------
// Duplicate Direct-Chat Merge
// ----------------------------------------------------------------------------

/// Merge direct chats that share the same unordered participant pair.
///
/// Pairwise scan in ascending id order; the first-encountered (lowest-id)
/// chat survives, the later one's messages are reassigned to it and its
/// associations and chat row are deleted. Candidates with an unresolved
/// member are skipped: guessing how legacy memberships map risks data loss.
pub fn merge_duplicate_direct_chats<S: ChatStore>(store: &mut S) -> ReconcilerReport {
    let mut report = ReconcilerReport::default();
    let chats = store.chats(Some(ChatType::Direct));
    let mut removed: HashSet<ChatId> = HashSet::new();

    for (i, survivor) in chats.iter().enumerate() {
        if removed.contains(&survivor.id) {
            continue;
        }
        let (members, total, unresolved) = direct_members(store, survivor.id);

        for later in &chats[i + 1..] {
            if removed.contains(&later.id) {
                continue;
            }
            let (other_members, other_total, other_unresolved) = direct_members(store, later.id);
            if total != other_total || members != other_members {
                continue;
            }
            if unresolved || other_unresolved {
                warn!(
                    survivor = %survivor.id,
                    duplicate = %later.id,
                    "skipping merge candidate with unresolved member"
                );
                report.skipped_unresolved += 1;
                continue;
            }
            if members.len() != 2 {
                continue;
            }

            let moved = store.reassign_messages(later.id, survivor.id);
            if let Err(error) = store.delete_chat(later.id) {
                warn!(chat_id = %later.id, %error, "failed to delete merged chat");
                continue;
            }
            removed.insert(later.id);
            report.chats_merged += 1;
            report.messages_reassigned += moved as u64;
            info!(
                survivor = %survivor.id,
                merged = %later.id,
                messages = moved,
                "merged duplicate direct chat"
            );
        }
    }
    report
}

// ----------------------------------------------------------------------------
// Owner-Gap Repair
// ----------------------------------------------------------------------------

/// Promote exactly one owner into each ownerless group/channel chat.
///
/// Priority: the association matching the chat's recorded creator, else any
/// resolved admin, else any resolved member. Chats with no associations at
/// all are a data-integrity anomaly and are skipped for manual repair.
pub fn repair_owner_gaps<S: ChatStore>(store: &mut S) -> ReconcilerReport {
    let mut report = ReconcilerReport::default();

    for chat in store.chats(None) {
        if chat.chat_type == ChatType::Direct {
            continue;
        }
        let associations = store.associations_for_chat(chat.id);
        if associations.is_empty() {
            warn!(chat_id = %chat.id, "chat has no associations; manual fix required");
            report.anomalies += 1;
            continue;
        }
        if associations.iter().any(|a| a.rank == Rank::Owner) {
            continue;
        }

        let candidate = associations
            .iter()
            .find(|a| chat.creator.is_some() && a.user_id == chat.creator)
            .or_else(|| {
                associations
                    .iter()
                    .find(|a| a.rank == Rank::Admin && a.is_resolved())
            })
            .or_else(|| {
                associations
                    .iter()
                    .find(|a| a.rank == Rank::Member && a.is_resolved())
            });

        match candidate {
            Some(association) => {
                if let Err(error) = store.set_rank(association.id, Rank::Owner) {
                    warn!(association_id = %association.id, %error, "owner promotion failed");
                    continue;
                }
                report.owners_promoted += 1;
                info!(
                    chat_id = %chat.id,
                    association_id = %association.id,
                    "promoted owner into ownerless chat"
                );
            }
            None => {
                warn!(chat_id = %chat.id, "no resolvable member to promote; manual fix required");
                report.anomalies += 1;
            }
        }
    }
    report
}

// ----------------------------------------------------------------------------
// Direct-Chat Rank Flattening
// ----------------------------------------------------------------------------

/// Direct chats carry no rank hierarchy; demote any admin/owner association
/// back to member.
pub fn flatten_direct_ranks<S: ChatStore>(store: &mut S) -> ReconcilerReport {
    let mut report = ReconcilerReport::default();

    for chat in store.chats(Some(ChatType::Direct)) {
        for association in store.associations_for_chat(chat.id) {
            if association.rank == Rank::Member {
                continue;
            }
            if let Err(error) = store.set_rank(association.id, Rank::Member) {
                warn!(association_id = %association.id, %error, "rank flattening failed");
                continue;
            }
            report.ranks_flattened += 1;
            debug!(
                chat_id = %chat.id,
                association_id = %association.id,
                "flattened direct-chat rank to member"
            );
        }
    }
    report
}

// ----------------------------------------------------------------------------
// Intent Backfill
// ----------------------------------------------------------------------------

/// Persist the duplicate-detection key for direct chats that lack one and
/// have exactly two resolvable members.
pub fn backfill_intents<S: ChatStore>(store: &mut S) -> ReconcilerReport {
    let mut report = ReconcilerReport::default();

    for chat in store.chats(Some(ChatType::Direct)) {
        if chat.has_intent() {
            continue;
        }
        let (members, total, unresolved) = direct_members(store, chat.id);
        if total != 2 || unresolved {
            debug!(chat_id = %chat.id, "skipping intent backfill for unresolvable pair");
            report.skipped_unresolved += 1;
            continue;
        }
        let intent = intent_key(members[0], members[1]);
        if let Err(error) = store.set_intent(chat.id, intent.clone()) {
            warn!(chat_id = %chat.id, %error, "intent backfill failed");
            continue;
        }
        report.intents_backfilled += 1;
        info!(chat_id = %chat.id, intent = %intent, "backfilled direct-chat intent");
    }
    report
}

// ----------------------------------------------------------------------------
// Combined Run
// ----------------------------------------------------------------------------

/// Run every pass once: merge, owner repair, rank flattening, intent
/// backfill. Safe to re-run; partial failure leaves the dataset no worse
/// than before.
pub fn run_all<S: ChatStore>(store: &mut S) -> ReconcilerReport {
    let mut report = merge_duplicate_direct_chats(store);
    report.absorb(repair_owner_gaps(store));
    report.absorb(flatten_direct_ranks(store));
    report.absorb(backfill_intents(store));
    info!(
        merged = report.chats_merged,
        owners = report.owners_promoted,
        flattened = report.ranks_flattened,
        intents = report.intents_backfilled,
        anomalies = report.anomalies,
        "reconciliation complete"
    );
    report
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
