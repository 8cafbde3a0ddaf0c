//! Property-based tests for the Vitalis core kernel.
//!
//! Uses proptest to generate random ledger operations, modifier sets and
//! frame sequences, then verify the kernel's invariants hold.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use vitalis_core::disease::{EvaluationMode, triggers_hold};
use vitalis_core::event::{BusConfig, DeliveryMode, Event, EventBus, EventKind};
use vitalis_core::fixed::{DEFAULT_EPSILON, Fixed64, f64_to_fixed64};
use vitalis_core::id::*;
use vitalis_core::kernel::{Kernel, KernelConfig};
use vitalis_core::ledger::ResourceLedger;
use vitalis_core::modifier::{Modifier, ModifierKey, ModifierStack};
use vitalis_core::test_utils::*;
use proptest::prelude::*;

// ===========================================================================
// Generators
// ===========================================================================

#[derive(Debug, Clone)]
enum LedgerOp {
    Credit(u32, f64),
    Debit(u32, f64),
    DebitAll(Vec<(u32, f64)>),
}

fn arb_ledger_ops(max_ops: usize) -> impl Strategy<Value = Vec<LedgerOp>> {
    proptest::collection::vec(
        prop_oneof![
            (0..4u32, 0.0..50.0f64).prop_map(|(r, a)| LedgerOp::Credit(r, a)),
            (0..4u32, 0.0..50.0f64).prop_map(|(r, a)| LedgerOp::Debit(r, a)),
            proptest::collection::vec((0..4u32, 0.0..20.0f64), 1..4).prop_map(LedgerOp::DebitAll),
        ],
        1..=max_ops,
    )
}

/// Feed the cell or let time pass.
#[derive(Debug, Clone)]
enum ProductionOp {
    Credit(usize, f64),
    Tick(f64),
}

fn arb_production(max_ops: usize) -> impl Strategy<Value = Vec<ProductionOp>> {
    proptest::collection::vec(
        prop_oneof![
            (0..2usize, 0.0..5.0f64).prop_map(|(r, a)| ProductionOp::Credit(r, a)),
            (0.1..4.0f64).prop_map(ProductionOp::Tick),
        ],
        1..=max_ops,
    )
}

fn arb_mode() -> impl Strategy<Value = DeliveryMode> {
    prop_oneof![Just(DeliveryMode::Immediate), Just(DeliveryMode::Deferred)]
}

/// A frame of gameplay: optionally adjust the acid level, then tick.
#[derive(Debug, Clone)]
enum FrameOp {
    AddAcid(f64),
    RemoveAcid(f64),
    Tick(f64),
}

fn arb_frames(max_ops: usize) -> impl Strategy<Value = Vec<FrameOp>> {
    proptest::collection::vec(
        prop_oneof![
            (0.0..6.0f64).prop_map(FrameOp::AddAcid),
            (0.0..6.0f64).prop_map(FrameOp::RemoveAcid),
            (0.0..20.0f64).prop_map(FrameOp::Tick),
        ],
        1..=max_ops,
    )
}

fn run_frames(mode: EvaluationMode, frames: &[FrameOp]) -> Kernel {
    let registry = shared_fixture();
    let lactic = registry.resource_id(LACTIC_ACID).unwrap();
    let config = KernelConfig {
        evaluation: mode,
        ..KernelConfig::default()
    };
    let mut kernel = Kernel::new(registry, config);
    let mut bus = EventBus::default();
    for op in frames {
        match op {
            FrameOp::AddAcid(a) => {
                kernel.credit(lactic, f64_to_fixed64(*a)).unwrap();
            }
            FrameOp::RemoveAcid(a) => {
                let amount = f64_to_fixed64(*a).min(kernel.quantity(lactic));
                kernel.debit(lactic, amount).unwrap();
            }
            FrameOp::Tick(dt) => {
                kernel.update(f64_to_fixed64(*dt), &mut bus);
            }
        }
    }
    kernel.update(f64_to_fixed64(0.1), &mut bus);
    kernel
}

// ===========================================================================
// Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Ledger quantities never go negative, whatever sequence of operations.
    #[test]
    fn ledger_never_negative(ops in arb_ledger_ops(40)) {
        let mut ledger = ResourceLedger::new();
        for op in ops {
            match op {
                LedgerOp::Credit(r, a) => {
                    let _ = ledger.credit(ResourceId(r), f64_to_fixed64(a));
                }
                LedgerOp::Debit(r, a) => {
                    let _ = ledger.debit(ResourceId(r), f64_to_fixed64(a));
                }
                LedgerOp::DebitAll(reqs) => {
                    let reqs: Vec<_> = reqs
                        .into_iter()
                        .map(|(r, a)| (ResourceId(r), f64_to_fixed64(a)))
                        .collect();
                    let before = ledger.snapshot();
                    if ledger.debit_all(&reqs).is_err() {
                        // Failed batch debits leave the ledger untouched.
                        prop_assert_eq!(before, ledger.snapshot());
                    }
                }
            }
            for r in 0..4 {
                prop_assert!(ledger.quantity(ResourceId(r)) >= Fixed64::ZERO);
            }
        }
    }

    /// The multiplier does not depend on the order modifiers were added.
    #[test]
    fn modifier_order_independent(
        factors in proptest::collection::vec((0.0..3.0f64, any::<bool>()), 1..6),
        rotation in 0..6usize,
    ) {
        let atp = ResourceId(1);
        let tags = vec!["energy".to_string()];
        let modifiers: Vec<Modifier> = factors
            .iter()
            .enumerate()
            .map(|(i, (f, by_tag))| {
                let key = if *by_tag {
                    ModifierKey::Tag("energy".into())
                } else {
                    ModifierKey::Resource(atp)
                };
                Modifier::new(format!("upgrade_{i}")).with_factor(key, f64_to_fixed64(*f))
            })
            .collect();

        let mut forward = ModifierStack::new();
        for m in &modifiers {
            forward.add(m.clone());
        }
        let mut rotated = ModifierStack::new();
        let n = modifiers.len();
        for i in 0..n {
            rotated.add(modifiers[(i + rotation) % n].clone());
        }

        prop_assert_eq!(
            forward.multiplier_for(atp, &tags),
            rotated.multiplier_for(atp, &tags)
        );
    }

    /// Reactive evaluation gives the same disease state as a full scan.
    #[test]
    fn reactive_matches_full_scan(frames in arb_frames(30)) {
        let reactive = run_frames(EvaluationMode::Reactive, &frames);
        let full = run_frames(EvaluationMode::FullScan, &frames);

        let a: Vec<_> = reactive.active_diseases().map(|(id, s)| (id, *s)).collect();
        let b: Vec<_> = full.active_diseases().map(|(id, s)| (id, *s)).collect();
        prop_assert_eq!(a, b);
        prop_assert_eq!(reactive.modifiers(), full.modifiers());
        prop_assert!(reactive.disease_evaluations() <= full.disease_evaluations());
    }

    /// After a frame, a disease is active exactly when all its triggers hold.
    #[test]
    fn disease_active_iff_triggers_hold(frames in arb_frames(30)) {
        let kernel = run_frames(EvaluationMode::Reactive, &frames);
        let registry = kernel.registry();
        let epsilon = f64_to_fixed64(DEFAULT_EPSILON);
        let snapshot = kernel.snapshot();
        for (id, def) in registry.diseases() {
            let board_holds = {
                // Rebuild a board view from the kernel's biomarker values.
                let mut board = vitalis_core::biomarker::BiomarkerBoard::new(registry);
                board.refresh(registry, kernel.ledger(), snapshot.clock);
                triggers_hold(def, &board, epsilon)
            };
            prop_assert_eq!(kernel.disease_state(id).is_some(), board_holds);
        }
    }

    /// Production never drives a quantity negative, and the ledger always
    /// equals what was credited plus what the production events report.
    #[test]
    fn production_is_atomic(ops in arb_production(40)) {
        let registry = shared_fixture();
        let feed = [
            registry.resource_id(GLUCOSE).unwrap(),
            registry.resource_id(LACTIC_ACID).unwrap(),
        ];
        let cell = registry.building_id(CELL).unwrap();
        let mut kernel = Kernel::new(Arc::clone(&registry), KernelConfig::default());
        let mut bus = EventBus::default();
        kernel.register_building(cell, 0, 0, &mut bus).unwrap();
        let log = record_all(&mut bus);

        let mut expected: BTreeMap<ResourceId, Fixed64> = BTreeMap::new();
        for op in ops {
            match op {
                ProductionOp::Credit(i, a) => {
                    let amount = f64_to_fixed64(a);
                    kernel.credit(feed[i], amount).unwrap();
                    *expected.entry(feed[i]).or_insert(Fixed64::ZERO) += amount;
                }
                ProductionOp::Tick(dt) => {
                    kernel.update(f64_to_fixed64(dt), &mut bus);
                }
            }
            for (_, quantity) in kernel.snapshot().ledger {
                prop_assert!(quantity >= Fixed64::ZERO);
            }
        }

        for event in log.borrow().iter() {
            match event {
                Event::ResourcesConsumed { resources, .. } => {
                    for (r, a) in resources {
                        *expected.entry(*r).or_insert(Fixed64::ZERO) -= *a;
                    }
                }
                Event::ResourcesProduced { resources, .. } => {
                    for (r, a) in resources {
                        *expected.entry(*r).or_insert(Fixed64::ZERO) += *a;
                    }
                }
                _ => {}
            }
        }
        for r in 0..registry.resource_count() as u32 {
            let id = ResourceId(r);
            prop_assert_eq!(
                kernel.quantity(id),
                expected.get(&id).copied().unwrap_or(Fixed64::ZERO)
            );
        }

        let completed = count_kind(&log, EventKind::RecipeCompleted);
        prop_assert_eq!(count_kind(&log, EventKind::ResourcesConsumed), completed);
        prop_assert_eq!(count_kind(&log, EventKind::ResourcesProduced), completed);
    }

    /// However handlers fan follow-ups out, every handler sees every event of
    /// its kind exactly once and no handler call overlaps another of its own.
    #[test]
    fn nested_publish_reaches_every_handler(
        limits in proptest::collection::vec(0..4u32, 1..4),
        mode in arb_mode(),
    ) {
        let mut bus = EventBus::new(BusConfig {
            mode,
            max_cascade_depth: 16,
        });
        let overlaps = Rc::new(Cell::new(0u32));
        let mut counters = Vec::new();

        for limit in limits {
            let calls = Rc::new(Cell::new(0u64));
            counters.push(Rc::clone(&calls));
            let running = Rc::new(Cell::new(false));
            let overlaps = Rc::clone(&overlaps);
            bus.subscribe(
                EventKind::EnemyKilled,
                Box::new(move |event, bus| {
                    if running.replace(true) {
                        overlaps.set(overlaps.get() + 1);
                    }
                    calls.set(calls.get() + 1);
                    if let Event::EnemyKilled { unit } = event {
                        let level: u32 = unit.parse().unwrap_or(0);
                        if level < limit {
                            bus.publish(Event::EnemyKilled {
                                unit: (level + 1).to_string(),
                            });
                        }
                    }
                    running.set(false);
                    Ok(())
                }),
            );
        }

        bus.publish(Event::EnemyKilled { unit: "0".to_string() });

        let emitted = bus.emitted_count(EventKind::EnemyKilled);
        for calls in &counters {
            prop_assert_eq!(calls.get(), emitted);
        }
        prop_assert_eq!(overlaps.get(), 0);
        prop_assert_eq!(bus.cascade_overflows(), 0);
        prop_assert!(!bus.is_delivering());
    }
}

#[test]
fn unknown_disease_id_has_no_state() {
    let kernel = Kernel::new(shared_fixture(), KernelConfig::default());
    assert!(kernel.disease_state(DiseaseId(42)).is_none());
}
