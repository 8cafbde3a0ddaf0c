//! Property-based tests for the progression dispatcher.
//!
//! Generates random sequences of statistic updates and checks that the
//! unlocked set only grows and does not depend on update order.

use std::collections::BTreeSet;

use proptest::prelude::*;
use vitalis_core::id::EntryId;
use vitalis_core::test_utils::*;
use vitalis_progression::dispatcher::{ProgressionConfig, ProgressionDispatcher};
use vitalis_progression::persistence::MemoryStore;

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
enum StatOp {
    ProduceAtp(u32),
    Kill(u8),
    Item(u32),
    Research,
    Custom(u32),
}

fn arb_ops(max_ops: usize) -> impl Strategy<Value = Vec<StatOp>> {
    proptest::collection::vec(
        prop_oneof![
            (1..200u32).prop_map(StatOp::ProduceAtp),
            (0..3u8).prop_map(StatOp::Kill),
            (0..15u32).prop_map(StatOp::Item),
            Just(StatOp::Research),
            (1..50u32).prop_map(StatOp::Custom),
        ],
        0..=max_ops,
    )
}

fn fresh() -> ProgressionDispatcher {
    ProgressionDispatcher::new(
        shared_fixture(),
        ProgressionConfig::default(),
        Box::new(MemoryStore::new()),
    )
}

fn apply(d: &mut ProgressionDispatcher, op: &StatOp) {
    let registry = d.registry().clone();
    match op {
        StatOp::ProduceAtp(n) => {
            let atp = registry.resource_id(ATP).unwrap();
            d.on_resource_produced(atp, fixed(f64::from(*n)));
        }
        StatOp::Kill(unit) => {
            let name = ["bacterium", "virus", "fungus"][*unit as usize];
            d.on_enemy_killed(name);
        }
        StatOp::Item(n) => {
            let glucose = registry.resource_id(GLUCOSE).unwrap();
            d.on_item_count_reached(glucose, *n);
        }
        StatOp::Research => {
            let oxphos = registry.tech_id(OXPHOS).unwrap();
            d.on_research_complete(oxphos);
        }
        StatOp::Custom(n) => {
            d.record_stat("cells_divided", fixed(f64::from(*n)));
        }
    }
}

fn unlocked(d: &ProgressionDispatcher) -> BTreeSet<EntryId> {
    d.unlocked_entries().collect()
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Once unlocked, always unlocked.
    #[test]
    fn unlocks_are_monotonic(ops in arb_ops(40)) {
        let mut d = fresh();
        let mut previous = unlocked(&d);
        for op in &ops {
            apply(&mut d, op);
            let now = unlocked(&d);
            prop_assert!(previous.is_subset(&now));
            previous = now;
        }
    }

    /// Any permutation of the same updates unlocks the same entries.
    #[test]
    fn unlock_set_order_independent(ops in arb_ops(40), seed in any::<u64>()) {
        let mut shuffled = ops.clone();
        // Deterministic Fisher-Yates driven by the generated seed.
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let j = (state % (i as u64 + 1)) as usize;
            shuffled.swap(i, j);
        }

        let mut a = fresh();
        let mut b = fresh();
        for op in &ops {
            apply(&mut a, op);
        }
        for op in &shuffled {
            apply(&mut b, op);
        }
        prop_assert_eq!(unlocked(&a), unlocked(&b));
    }

    /// The index never misses an entry a full scan would unlock.
    #[test]
    fn index_matches_full_scan(ops in arb_ops(40)) {
        let mut d = fresh();
        for op in &ops {
            apply(&mut d, op);
        }
        prop_assert_eq!(d.recheck_all(), 0);
    }
}
