// tests/properties.rs
//! Property tests for sequencing, lifecycle and eviction

use netpanel_engine::events::EventBus;
use netpanel_engine::record::{DropReason, Origin, OutboundRequest, RequestState};
use netpanel_engine::store::{RecordDraft, RecordPatch, RequestStore};
use netpanel_engine::utils::config::StoreConfig;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

// =============================================================================
// Strategies
// =============================================================================

/// What happens to a record right after it is appended
#[derive(Debug, Clone, Copy)]
enum Fate {
    Stay,
    Hold,
    Drop,
    Forward,
}

fn arb_fate() -> impl Strategy<Value = Fate> {
    prop_oneof![
        Just(Fate::Stay),
        Just(Fate::Hold),
        Just(Fate::Drop),
        Just(Fate::Forward),
    ]
}

fn arb_state() -> impl Strategy<Value = RequestState> {
    prop_oneof![
        Just(RequestState::Pending),
        Just(RequestState::Held),
        Just(RequestState::Forwarded),
        Just(RequestState::Dropped),
        Just(RequestState::Completed),
        Just(RequestState::Failed),
    ]
}

fn draft(n: usize) -> RecordDraft {
    RecordDraft::new(
        Origin::tab(1),
        OutboundRequest::get(format!("http://example.test/{}", n)),
    )
}

fn apply(store: &RequestStore, fate: Fate, n: usize) {
    let record = store.append(draft(n));
    let patch = match fate {
        Fate::Stay => return,
        Fate::Hold => RecordPatch::Hold,
        Fate::Drop => RecordPatch::Drop(DropReason::User),
        Fate::Forward => RecordPatch::Forward {
            request: record.outbound.clone(),
            at: chrono::Utc::now(),
        },
    };
    // Eviction can only touch records older than this one.
    store.update(record.id, patch).unwrap();
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_concurrent_sequences_unique_and_ordered(threads in 2usize..6, per_thread in 1usize..40) {
        let store = Arc::new(RequestStore::new(
            StoreConfig { capacity: 10_000, evict_batch: 10 },
            Arc::new(EventBus::new(16)),
        ));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|i| store.append(draft(t * 1000 + i)).sequence)
                        .collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            let seen = handle.join().unwrap();
            // Each producer observes its own admissions in increasing order.
            prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
            all.extend(seen);
        }

        let unique: HashSet<u64> = all.iter().copied().collect();
        prop_assert_eq!(unique.len(), threads * per_thread);
        prop_assert_eq!(*all.iter().max().unwrap(), (threads * per_thread) as u64);

        let snapshot: Vec<u64> = store.snapshot().iter().map(|r| r.sequence).collect();
        prop_assert!(snapshot.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_eviction_spares_unsettled_and_takes_oldest(
        capacity in 2usize..20,
        evict_batch in 1usize..8,
        fates in prop::collection::vec(arb_fate(), 1..80),
    ) {
        let store = RequestStore::new(
            StoreConfig { capacity, evict_batch },
            Arc::new(EventBus::new(16)),
        );

        let mut unsettled = HashSet::new();
        let mut appended = Vec::new();
        for (n, fate) in fates.iter().enumerate() {
            let before: HashSet<_> = store.snapshot().iter().map(|r| r.id).collect();
            apply(&store, *fate, n);
            let after = store.snapshot();
            let newest = after.iter().max_by_key(|r| r.sequence).unwrap();
            appended.push(newest.id);
            if !newest.state.is_terminal() {
                unsettled.insert(newest.id);
            }

            // Everything that disappeared was evictable and older than
            // every evictable survivor.
            let remaining: HashSet<_> = after.iter().map(|r| r.id).collect();
            let gone: Vec<_> = before.difference(&remaining).collect();
            for id in &gone {
                prop_assert!(!unsettled.contains(*id));
            }
            if !gone.is_empty() {
                let oldest_evictable_survivor = after
                    .iter()
                    .filter(|r| r.state.is_terminal())
                    .filter(|r| r.id != newest.id)
                    .map(|r| r.sequence)
                    .min();
                if let Some(survivor) = oldest_evictable_survivor {
                    let gone_max = appended
                        .iter()
                        .enumerate()
                        .filter(|(_, id)| gone.contains(id))
                        .map(|(i, _)| i as u64 + 1)
                        .max()
                        .unwrap();
                    prop_assert!(gone_max < survivor);
                }
            }
        }

        for id in &unsettled {
            prop_assert!(store.get(*id).is_some());
        }
    }

    #[test]
    fn prop_transitions_only_move_forward(from in arb_state(), to in arb_state()) {
        if from.can_advance_to(to) {
            prop_assert!(!from.is_terminal());
            prop_assert!(from != to);
        }
        if from == RequestState::Held && to == RequestState::Completed {
            prop_assert!(!from.can_advance_to(to));
        }
        if from.is_terminal() {
            prop_assert!(!from.can_advance_to(to));
        }
    }
}
