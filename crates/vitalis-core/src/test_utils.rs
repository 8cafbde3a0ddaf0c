//! Shared test helpers for unit tests, integration tests, and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.
//!
//! The fixture content models a tiny slice of cellular metabolism:
//!
//! - `glycolysis` (cell, 3s): 1 GLUCOSE -> 2 ATP
//! - `fermentation` (cell, 2s): 1 GLUCOSE -> 2 ATP + waste 2 LACTIC_ACID
//! - `respiration` (mitochondrion, 5s, needs `oxidative_phosphorylation`):
//!   1 GLUCOSE + 6 OXYGEN -> 30 ATP + waste 6 CO2
//! - LACTATE = 1.0 per LACTIC_ACID, PH = 7.4 - 0.05 per LACTIC_ACID
//! - LACTIC_ACIDOSIS: LACTATE >= 4.0 AND PH <= 7.35, halves `energy` output

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::disease::{ComparisonOp, Trigger};
use crate::event::{Event, EventBus, EventKind};
use crate::fixed::{Fixed64, f64_to_fixed64};
use crate::modifier::ModifierKey;
use crate::registry::*;
use crate::unlock::*;

// ===========================================================================
// Fixed-point helper
// ===========================================================================

pub fn fixed(v: f64) -> Fixed64 {
    f64_to_fixed64(v)
}

// ===========================================================================
// Fixture names
// ===========================================================================

pub const GLUCOSE: &str = "GLUCOSE";
pub const ATP: &str = "ATP";
pub const OXYGEN: &str = "OXYGEN";
pub const CO2: &str = "CO2";
pub const LACTIC_ACID: &str = "LACTIC_ACID";

pub const LACTATE: &str = "LACTATE";
pub const PH: &str = "PH";
pub const ATP_LEVEL: &str = "ATP_LEVEL";

pub const CELL: &str = "cell";
pub const MITOCHONDRION: &str = "mitochondrion";

pub const GLYCOLYSIS: &str = "glycolysis";
pub const FERMENTATION: &str = "fermentation";
pub const RESPIRATION: &str = "respiration";

pub const FATIGUE: &str = "fatigue";
pub const LACTIC_ACIDOSIS: &str = "LACTIC_ACIDOSIS";
pub const DORMANT: &str = "DORMANT";

pub const OXPHOS: &str = "oxidative_phosphorylation";

pub const TOTAL_ENERGY: &str = "total_energy_produced";

pub const ENTRY_BASICS: &str = "cell_basics";
pub const ENTRY_ATP_SYNTHASE: &str = "atp_synthase";
pub const ENTRY_MITOCHONDRIA: &str = "mitochondria";
pub const ENTRY_IMMUNE_LOG: &str = "immune_log";
pub const ENTRY_GLUCOSE_STORE: &str = "glucose_store";

// ===========================================================================
// Fixture registry
// ===========================================================================

fn resource(name: &str, tags: &[&str]) -> ResourceDef {
    ResourceDef {
        name: name.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        transferable: true,
        biomarker_mods: Vec::new(),
    }
}

fn entry(name: &str, category: &str, condition: Option<UnlockCondition>) -> EntryDef {
    EntryDef {
        name: name.to_string(),
        display_name: name.replace('_', " "),
        category: category.to_string(),
        condition,
    }
}

/// Builder pre-populated with the fixture content, for tests that add more.
pub fn fixture_builder() -> RegistryBuilder {
    let mut b = RegistryBuilder::new();

    // Biomarkers first so resources can reference them.
    let lactate = b.register_biomarker(BiomarkerDef {
        name: LACTATE.into(),
        baseline: Fixed64::ZERO,
        source: BiomarkerSource::Formula,
        critical_low: None,
        critical_high: Some(fixed(8.0)),
    });
    let ph = b.register_biomarker(BiomarkerDef {
        name: PH.into(),
        baseline: fixed(7.4),
        source: BiomarkerSource::Formula,
        critical_low: Some(fixed(7.0)),
        critical_high: Some(fixed(7.8)),
    });

    let glucose = b.register_resource(resource(GLUCOSE, &["nutrient"]));
    let atp = b.register_resource(resource(ATP, &["energy"]));
    let oxygen = b.register_resource(resource(OXYGEN, &["gas"]));
    let co2 = b.register_resource(resource(CO2, &["gas", "waste"]));
    let mut lactic_def = resource(LACTIC_ACID, &["waste"]);
    lactic_def.biomarker_mods = vec![
        BiomarkerMod {
            marker: lactate,
            mode: ModMode::Add,
            value: fixed(1.0),
        },
        BiomarkerMod {
            marker: ph,
            mode: ModMode::Add,
            value: fixed(-0.05),
        },
    ];
    let lactic = b.register_resource(lactic_def);

    b.register_biomarker(BiomarkerDef {
        name: ATP_LEVEL.into(),
        baseline: Fixed64::ZERO,
        source: BiomarkerSource::Resource(atp),
        critical_low: None,
        critical_high: None,
    });

    let cell = b.register_building(BuildingTypeDef {
        name: CELL.into(),
        size: (1, 1),
        hp: 100,
        supported_recipes: Vec::new(),
    });
    let mitochondrion = b.register_building(BuildingTypeDef {
        name: MITOCHONDRION.into(),
        size: (2, 1),
        hp: 150,
        supported_recipes: Vec::new(),
    });

    let oxphos = b.intern_tech(OXPHOS);

    b.register_recipe(RecipeDef {
        name: GLYCOLYSIS.into(),
        machines: vec![cell],
        inputs: vec![RecipeEntry::new(glucose, fixed(1.0))],
        outputs: vec![RecipeEntry::new(atp, fixed(2.0))],
        waste_outputs: Vec::new(),
        duration: fixed(3.0),
        priority: 1,
        required_research: Vec::new(),
    });
    b.register_recipe(RecipeDef {
        name: FERMENTATION.into(),
        machines: vec![cell],
        inputs: vec![RecipeEntry::new(glucose, fixed(1.0))],
        outputs: vec![RecipeEntry::new(atp, fixed(2.0))],
        waste_outputs: vec![RecipeEntry::new(lactic, fixed(2.0))],
        duration: fixed(2.0),
        priority: 0,
        required_research: Vec::new(),
    });
    b.register_recipe(RecipeDef {
        name: RESPIRATION.into(),
        machines: vec![mitochondrion],
        inputs: vec![
            RecipeEntry::new(glucose, fixed(1.0)),
            RecipeEntry::new(oxygen, fixed(6.0)),
        ],
        outputs: vec![RecipeEntry::new(atp, fixed(30.0))],
        waste_outputs: vec![RecipeEntry::new(co2, fixed(6.0))],
        duration: fixed(5.0),
        priority: 10,
        required_research: vec![oxphos],
    });

    let fatigue = b.register_effect(EffectDef {
        name: FATIGUE.into(),
        factors: vec![(ModifierKey::Tag("energy".into()), fixed(0.5))],
    });

    b.register_disease(DiseaseDef {
        name: LACTIC_ACIDOSIS.into(),
        triggers: vec![
            Trigger {
                marker: lactate,
                op: ComparisonOp::Gte,
                value: fixed(4.0),
            },
            Trigger {
                marker: ph,
                op: ComparisonOp::Lte,
                value: fixed(7.35),
            },
        ],
        effects: vec![fatigue],
        max_tier: 3,
        progression_dwell: fixed(30.0),
    });
    b.register_disease(DiseaseDef {
        name: DORMANT.into(),
        triggers: Vec::new(),
        effects: vec![fatigue],
        max_tier: 3,
        progression_dwell: fixed(30.0),
    });

    b.register_entry(entry(ENTRY_BASICS, "codex", None));
    b.register_entry(entry(
        ENTRY_ATP_SYNTHASE,
        "building",
        Some(UnlockCondition::StatThreshold {
            stat: TOTAL_ENERGY.into(),
            value: fixed(500.0),
        }),
    ));
    b.register_entry(entry(
        ENTRY_MITOCHONDRIA,
        "building",
        Some(UnlockCondition::ResearchComplete { tech: oxphos }),
    ));
    b.register_entry(entry(
        ENTRY_IMMUNE_LOG,
        "codex",
        Some(UnlockCondition::KillCount {
            unit: "bacterium".into(),
            value: 3,
        }),
    ));
    b.register_entry(entry(
        ENTRY_GLUCOSE_STORE,
        "building",
        Some(UnlockCondition::ItemCollected {
            item: glucose,
            amount: 10,
        }),
    ));

    b.add_stat_rule(TrackedStatRule {
        path: TOTAL_ENERGY.into(),
        source: StatSource::Produced,
        selector: StatSelector::Tag("energy".into()),
    });

    b
}

/// The fixture content, frozen.
pub fn fixture_registry() -> Registry {
    match fixture_builder().build() {
        Ok(registry) => registry,
        Err(err) => panic!("fixture registry is invalid: {err}"),
    }
}

pub fn shared_fixture() -> Arc<Registry> {
    Arc::new(fixture_registry())
}

// ===========================================================================
// Event recording
// ===========================================================================

/// Shared log of every event delivered to a recorder.
pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// Subscribe a passive recorder to every event kind.
pub fn record_all(bus: &mut EventBus) -> EventLog {
    let log: EventLog = Rc::new(RefCell::new(Vec::new()));
    for kind in EventKind::ALL {
        let sink = Rc::clone(&log);
        bus.on_passive(kind, Box::new(move |event| sink.borrow_mut().push(event.clone())));
    }
    log
}

/// Number of recorded events of `kind`.
pub fn count_kind(log: &EventLog, kind: EventKind) -> usize {
    log.borrow().iter().filter(|e| e.kind() == kind).count()
}
