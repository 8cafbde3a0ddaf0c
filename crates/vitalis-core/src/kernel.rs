//! The simulation kernel: owns the ledger and drives the frame pipeline.
//!
//! # Architecture
//!
//! The `Kernel` owns:
//! - The [`ResourceLedger`]
//! - One [`ProductionState`] per registered building (slotmap keyed)
//! - The [`ModifierStack`] (upgrades plus active disease effects)
//! - The [`BiomarkerBoard`] and [`DiseaseTracker`]
//! - The set of completed research
//!
//! The event bus is passed in by the caller. Subscribers cannot reach the
//! kernel from inside a handler; they react by publishing follow-ups.
//!
//! # Frame Pipeline
//!
//! Each [`Kernel::update`] runs:
//! 1. **Clock** -- advance simulation time by `dt`
//! 2. **Production** -- buildings in recipe priority order (highest first)
//! 3. **Biomarkers** -- recompute derived values, publish changes
//! 4. **Diseases** -- re-evaluate candidates, apply or remove effects
//!
//! Unknown ids are logged and skipped. Nothing in the frame path panics.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::biomarker::{BiomarkerBoard, BiomarkerState, CriticalBand};
use crate::disease::{self, ActiveDisease, DiseaseTracker, DiseaseTransition, EvaluationMode};
use crate::event::{Event, EventBus};
use crate::fixed::{DEFAULT_EPSILON, Fixed64, f64_to_fixed64};
use crate::id::*;
use crate::ledger::{LedgerError, ResourceLedger};
use crate::modifier::{Modifier, ModifierStack};
use crate::recipe::{ProductionState, TickOutcome};
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// Configuration & errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Tolerance for `==` and `!=` disease triggers.
    pub epsilon: f64,
    pub evaluation: EvaluationMode,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            evaluation: EvaluationMode::Reactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("unknown building type {0:?}")]
    UnknownBuildingType(BuildingTypeId),
    #[error("unknown building {0:?}")]
    UnknownBuilding(BuildingId),
    #[error("unknown recipe {0:?}")]
    UnknownRecipe(RecipeId),
    #[error("unknown resource {0:?}")]
    UnknownResource(ResourceId),
    #[error("unknown research {0:?}")]
    UnknownTech(TechId),
    #[error("recipe {recipe:?} is not supported by building type {building_type:?}")]
    RecipeNotSupported {
        building_type: BuildingTypeId,
        recipe: RecipeId,
    },
    #[error("recipe {0:?} requires research that is not complete")]
    RecipeLocked(RecipeId),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Counts from one [`Kernel::update`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSummary {
    pub completions: u32,
    pub starved: u32,
    pub biomarker_changes: u32,
    pub disease_transitions: u32,
}

/// Read-only copy of kernel state for UI panels and debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelSnapshot {
    pub clock: Fixed64,
    pub tick_count: u64,
    pub ledger: BTreeMap<ResourceId, Fixed64>,
    pub buildings: Vec<(BuildingId, ProductionState)>,
    pub biomarkers: Vec<(BiomarkerId, BiomarkerState)>,
    pub diseases: Vec<(DiseaseId, ActiveDisease)>,
    pub modifier_sources: Vec<String>,
    pub research: Vec<TechId>,
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Kernel {
    registry: Arc<Registry>,
    config: KernelConfig,
    epsilon: Fixed64,
    ledger: ResourceLedger,
    buildings: SlotMap<BuildingId, ProductionState>,
    modifiers: ModifierStack,
    biomarkers: BiomarkerBoard,
    diseases: DiseaseTracker,
    research: BTreeSet<TechId>,
    clock: Fixed64,
    tick_count: u64,
    /// False until the first frame has evaluated every disease.
    primed: bool,
}

impl Kernel {
    pub fn new(registry: Arc<Registry>, config: KernelConfig) -> Self {
        let biomarkers = BiomarkerBoard::new(&registry);
        let diseases = DiseaseTracker::new(&registry);
        Self {
            epsilon: f64_to_fixed64(config.epsilon),
            registry,
            config,
            ledger: ResourceLedger::new(),
            buildings: SlotMap::with_key(),
            modifiers: ModifierStack::new(),
            biomarkers,
            diseases,
            research: BTreeSet::new(),
            clock: Fixed64::ZERO,
            tick_count: 0,
            primed: false,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Simulation time in seconds.
    pub fn clock(&self) -> Fixed64 {
        self.clock
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    // -----------------------------------------------------------------------
    // Buildings
    // -----------------------------------------------------------------------

    /// Register a building instance at `(x, y)`. Its recipe is the highest
    /// priority supported recipe whose research is complete, if any.
    pub fn register_building(
        &mut self,
        building_type: BuildingTypeId,
        x: i32,
        y: i32,
        bus: &mut EventBus,
    ) -> Result<BuildingId, KernelError> {
        if self.registry.get_building(building_type).is_none() {
            tracing::warn!(?building_type, "register_building: unknown building type");
            return Err(KernelError::UnknownBuildingType(building_type));
        }
        let recipe = self.select_recipe(building_type);
        let building = self
            .buildings
            .insert(ProductionState::new(building_type, recipe, x, y));
        tracing::debug!(?building, ?building_type, ?recipe, x, y, "building registered");
        bus.publish(Event::BuildingRegistered {
            building,
            building_type,
            x,
            y,
        });
        Ok(building)
    }

    /// Destroy a building instance. Partial progress is discarded.
    pub fn unregister_building(
        &mut self,
        building: BuildingId,
        bus: &mut EventBus,
    ) -> Result<ProductionState, KernelError> {
        let Some(state) = self.buildings.remove(building) else {
            tracing::warn!(?building, "unregister_building: unknown building");
            return Err(KernelError::UnknownBuilding(building));
        };
        bus.publish(Event::BuildingUnregistered {
            building,
            x: state.x,
            y: state.y,
        });
        Ok(state)
    }

    /// Assign a recipe (or clear it with `None`).
    pub fn set_recipe(
        &mut self,
        building: BuildingId,
        recipe: Option<RecipeId>,
    ) -> Result<(), KernelError> {
        let Some(state) = self.buildings.get(building) else {
            tracing::warn!(?building, "set_recipe: unknown building");
            return Err(KernelError::UnknownBuilding(building));
        };
        if let Some(recipe) = recipe {
            if self.registry.get_recipe(recipe).is_none() {
                tracing::warn!(?recipe, "set_recipe: unknown recipe");
                return Err(KernelError::UnknownRecipe(recipe));
            }
            let building_type = state.building_type;
            if !self
                .registry
                .recipes_for_building(building_type)
                .contains(&recipe)
            {
                return Err(KernelError::RecipeNotSupported {
                    building_type,
                    recipe,
                });
            }
            if !self.recipe_unlocked(recipe) {
                return Err(KernelError::RecipeLocked(recipe));
            }
        }
        if let Some(state) = self.buildings.get_mut(building) {
            state.set_recipe(recipe);
        }
        Ok(())
    }

    /// Pause or resume a building. Inactive buildings keep their progress.
    pub fn set_active(&mut self, building: BuildingId, active: bool) -> Result<(), KernelError> {
        let Some(state) = self.buildings.get_mut(building) else {
            tracing::warn!(?building, "set_active: unknown building");
            return Err(KernelError::UnknownBuilding(building));
        };
        state.active = active;
        Ok(())
    }

    pub fn production_state(&self, building: BuildingId) -> Option<&ProductionState> {
        self.buildings.get(building)
    }

    pub fn buildings(&self) -> impl Iterator<Item = (BuildingId, &ProductionState)> {
        self.buildings.iter()
    }

    pub fn building_count(&self) -> usize {
        self.buildings.len()
    }

    fn select_recipe(&self, building_type: BuildingTypeId) -> Option<RecipeId> {
        self.registry
            .recipes_for_building(building_type)
            .iter()
            .copied()
            .find(|r| self.recipe_unlocked(*r))
    }

    // -----------------------------------------------------------------------
    // Ledger
    // -----------------------------------------------------------------------

    /// Add resources directly (gameplay pickups, initial stock). Publishes
    /// nothing; recipe output is reported by the frame pipeline.
    pub fn credit(&mut self, resource: ResourceId, amount: Fixed64) -> Result<(), KernelError> {
        self.check_resource(resource)?;
        self.ledger.credit(resource, amount)?;
        Ok(())
    }

    /// Remove resources directly. Fails without mutation if insufficient.
    pub fn debit(&mut self, resource: ResourceId, amount: Fixed64) -> Result<(), KernelError> {
        self.check_resource(resource)?;
        self.ledger.debit(resource, amount)?;
        Ok(())
    }

    fn check_resource(&self, resource: ResourceId) -> Result<(), KernelError> {
        if self.registry.get_resource(resource).is_none() {
            tracing::warn!(?resource, "unknown resource");
            return Err(KernelError::UnknownResource(resource));
        }
        Ok(())
    }

    pub fn quantity(&self, resource: ResourceId) -> Fixed64 {
        self.ledger.quantity(resource)
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    // -----------------------------------------------------------------------
    // Modifiers
    // -----------------------------------------------------------------------

    /// Add a modifier, replacing any with the same source.
    pub fn add_modifier(&mut self, modifier: Modifier) {
        self.modifiers.add(modifier);
    }

    pub fn remove_modifier(&mut self, source: &str) -> bool {
        self.modifiers.remove(source)
    }

    /// Product of every active factor applying to `resource`.
    pub fn output_multiplier(&self, resource: ResourceId) -> Fixed64 {
        self.modifiers
            .multiplier_for(resource, self.registry.resource_tags(resource))
    }

    pub fn modifiers(&self) -> &ModifierStack {
        &self.modifiers
    }

    // -----------------------------------------------------------------------
    // Research
    // -----------------------------------------------------------------------

    /// Record a completed technology. Buildings without a recipe pick one
    /// up if the research made one eligible. Returns `false` if the tech
    /// was already complete.
    pub fn complete_research(&mut self, tech: TechId, bus: &mut EventBus) -> Result<bool, KernelError> {
        if self.registry.tech_name(tech).is_none() {
            tracing::warn!(?tech, "complete_research: unknown research");
            return Err(KernelError::UnknownTech(tech));
        }
        if !self.research.insert(tech) {
            return Ok(false);
        }
        tracing::info!(tech = self.registry.tech_name(tech).unwrap_or("?"), "research completed");

        let idle: Vec<(BuildingId, BuildingTypeId)> = self
            .buildings
            .iter()
            .filter(|(_, s)| s.recipe.is_none())
            .map(|(id, s)| (id, s.building_type))
            .collect();
        for (building, building_type) in idle {
            let recipe = self.select_recipe(building_type);
            if let (Some(recipe), Some(state)) = (recipe, self.buildings.get_mut(building)) {
                state.set_recipe(Some(recipe));
            }
        }

        bus.publish(Event::ResearchCompleted { tech });
        Ok(true)
    }

    pub fn is_research_complete(&self, tech: TechId) -> bool {
        self.research.contains(&tech)
    }

    /// Whether every research requirement of `recipe` is complete.
    pub fn recipe_unlocked(&self, recipe: RecipeId) -> bool {
        self.registry.get_recipe(recipe).is_some_and(|def| {
            def.required_research
                .iter()
                .all(|t| self.research.contains(t))
        })
    }

    // -----------------------------------------------------------------------
    // Biomarkers & diseases
    // -----------------------------------------------------------------------

    pub fn biomarker(&self, id: BiomarkerId) -> Option<&BiomarkerState> {
        self.biomarkers.get(id)
    }

    pub fn biomarker_value(&self, id: BiomarkerId) -> Fixed64 {
        self.biomarkers.value(id)
    }

    pub fn disease_state(&self, id: DiseaseId) -> Option<&ActiveDisease> {
        self.diseases.get(id)
    }

    pub fn active_diseases(&self) -> impl Iterator<Item = (DiseaseId, &ActiveDisease)> {
        self.diseases.active()
    }

    /// Trigger-conjunction evaluations performed so far.
    pub fn disease_evaluations(&self) -> u64 {
        self.diseases.evaluations()
    }

    // -----------------------------------------------------------------------
    // Frame
    // -----------------------------------------------------------------------

    /// Advance the simulation by `dt` seconds. A negative `dt` skips the
    /// frame.
    pub fn update(&mut self, dt: Fixed64, bus: &mut EventBus) -> FrameSummary {
        let mut summary = FrameSummary::default();
        if dt < Fixed64::ZERO {
            tracing::warn!(%dt, "negative frame delta, frame skipped");
            return summary;
        }

        self.clock = self.clock.saturating_add(dt);
        self.phase_production(dt, bus, &mut summary);
        let changed = self.phase_biomarkers(bus, &mut summary);
        self.phase_diseases(&changed, bus, &mut summary);
        self.tick_count += 1;
        summary
    }

    fn phase_production(&mut self, dt: Fixed64, bus: &mut EventBus, summary: &mut FrameSummary) {
        let registry = Arc::clone(&self.registry);

        // Highest recipe priority first; ties in registration order.
        let mut order: Vec<(std::cmp::Reverse<i32>, BuildingId)> = self
            .buildings
            .iter()
            .map(|(id, state)| {
                let priority = state
                    .recipe
                    .and_then(|r| registry.get_recipe(r))
                    .map_or(i32::MIN, |def| def.priority);
                (std::cmp::Reverse(priority), id)
            })
            .collect();
        order.sort();

        for (_, building) in order {
            let Some(state) = self.buildings.get_mut(building) else {
                continue;
            };
            let outcome = match (state.active, state.recipe) {
                (false, _) => TickOutcome::Inactive,
                (true, None) => TickOutcome::NoRecipe,
                (true, Some(recipe_id)) => match registry.get_recipe(recipe_id) {
                    Some(recipe) => state.advance(
                        recipe_id,
                        recipe,
                        dt,
                        &mut self.ledger,
                        &self.modifiers,
                        &registry,
                    ),
                    None => {
                        tracing::warn!(?building, ?recipe_id, "unknown recipe, building skipped");
                        TickOutcome::NoRecipe
                    }
                },
            };

            match outcome {
                TickOutcome::Completed(done) => {
                    summary.completions += 1;
                    tracing::debug!(?building, recipe = ?done.recipe, "recipe completed");
                    bus.publish(Event::ResourcesConsumed {
                        building: Some(building),
                        resources: done.consumed.clone(),
                    });
                    bus.publish(Event::ResourcesProduced {
                        building: Some(building),
                        resources: done.produced.clone(),
                    });
                    bus.publish(Event::RecipeCompleted {
                        building,
                        recipe: done.recipe,
                        inputs: done.consumed,
                        outputs: done.produced,
                    });
                }
                TickOutcome::Starved => summary.starved += 1,
                TickOutcome::Inactive | TickOutcome::NoRecipe | TickOutcome::Accumulating => {}
            }
        }
    }

    fn phase_biomarkers(&mut self, bus: &mut EventBus, summary: &mut FrameSummary) -> BTreeSet<BiomarkerId> {
        let changes = self
            .biomarkers
            .refresh(&self.registry, &self.ledger, self.clock);
        let mut changed = BTreeSet::new();
        for change in changes {
            summary.biomarker_changes += 1;
            changed.insert(change.biomarker);
            bus.publish(Event::BiomarkerUpdated {
                biomarker: change.biomarker,
                old_value: change.old_value,
                new_value: change.new_value,
            });
            match change.entered {
                Some(CriticalBand::Low) => bus.publish(Event::BiomarkerCriticalLow {
                    biomarker: change.biomarker,
                    value: change.new_value,
                }),
                Some(CriticalBand::High) => bus.publish(Event::BiomarkerCriticalHigh {
                    biomarker: change.biomarker,
                    value: change.new_value,
                }),
                Some(CriticalBand::Normal) | None => {}
            }
        }
        changed
    }

    fn phase_diseases(
        &mut self,
        changed: &BTreeSet<BiomarkerId>,
        bus: &mut EventBus,
        summary: &mut FrameSummary,
    ) {
        // The first frame checks everything so diseases already satisfied
        // at baseline are caught without a biomarker change.
        let mode = if self.primed {
            self.config.evaluation
        } else {
            EvaluationMode::FullScan
        };
        self.primed = true;

        let transitions = self.diseases.evaluate(
            &self.registry,
            &self.biomarkers,
            changed,
            self.clock,
            self.epsilon,
            mode,
        );

        for transition in transitions {
            summary.disease_transitions += 1;
            match transition {
                DiseaseTransition::Onset { disease, tier } => {
                    self.apply_disease_effects(disease, tier);
                    tracing::info!(?disease, "disease onset");
                    bus.publish(Event::DiseaseTriggered { disease, tier });
                }
                DiseaseTransition::Progressed { disease, tier } => {
                    self.apply_disease_effects(disease, tier);
                    tracing::debug!(?disease, tier, "disease progressed");
                    bus.publish(Event::DiseaseProgressed { disease, tier });
                }
                DiseaseTransition::Remitted { disease, tier } => {
                    if let Some(def) = self.registry.get_disease(disease) {
                        self.modifiers.remove(&disease::modifier_source(def));
                    }
                    tracing::info!(?disease, tier, "disease remitted");
                    bus.publish(Event::DiseaseRemitted { disease, tier });
                }
            }
        }
    }

    fn apply_disease_effects(&mut self, disease: DiseaseId, tier: u8) {
        let Some(def) = self.registry.get_disease(disease) else {
            return;
        };
        let modifier = disease::effect_modifier(&self.registry, def, tier);
        self.modifiers.add(modifier);
    }

    // -----------------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------------

    pub fn snapshot(&self) -> KernelSnapshot {
        KernelSnapshot {
            clock: self.clock,
            tick_count: self.tick_count,
            ledger: self.ledger.snapshot(),
            buildings: self
                .buildings
                .iter()
                .map(|(id, state)| (id, state.clone()))
                .collect(),
            biomarkers: self.biomarkers.iter().map(|(id, s)| (id, *s)).collect(),
            diseases: self.diseases.active().map(|(id, s)| (id, *s)).collect(),
            modifier_sources: self.modifiers.sources().map(str::to_string).collect(),
            research: self.research.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::test_utils::*;

    fn setup() -> (Kernel, EventBus, EventLog) {
        let kernel = Kernel::new(shared_fixture(), KernelConfig::default());
        let mut bus = EventBus::default();
        let log = record_all(&mut bus);
        (kernel, bus, log)
    }

    fn res(kernel: &Kernel, name: &str) -> ResourceId {
        kernel.registry().resource_id(name).unwrap()
    }

    // -----------------------------------------------------------------------
    // Test 1: Registration picks the best unlocked recipe
    // -----------------------------------------------------------------------
    #[test]
    fn register_selects_highest_priority_recipe() {
        let (mut kernel, mut bus, log) = setup();
        let cell = kernel.registry().building_id(CELL).unwrap();
        let id = kernel.register_building(cell, 3, 4, &mut bus).unwrap();

        let state = kernel.production_state(id).unwrap();
        assert_eq!(state.recipe, kernel.registry().recipe_id(GLYCOLYSIS));
        assert_eq!((state.x, state.y), (3, 4));
        assert_eq!(count_kind(&log, EventKind::BuildingRegistered), 1);
    }

    // -----------------------------------------------------------------------
    // Test 2: Research gates recipe selection
    // -----------------------------------------------------------------------
    #[test]
    fn research_unlocks_gated_recipe() {
        let (mut kernel, mut bus, log) = setup();
        let mito = kernel.registry().building_id(MITOCHONDRION).unwrap();
        let respiration = kernel.registry().recipe_id(RESPIRATION).unwrap();
        let id = kernel.register_building(mito, 0, 0, &mut bus).unwrap();
        assert_eq!(kernel.production_state(id).unwrap().recipe, None);
        assert_eq!(
            kernel.set_recipe(id, Some(respiration)),
            Err(KernelError::RecipeLocked(respiration))
        );

        let oxphos = kernel.registry().tech_id(OXPHOS).unwrap();
        assert!(kernel.complete_research(oxphos, &mut bus).unwrap());
        assert!(!kernel.complete_research(oxphos, &mut bus).unwrap());

        assert_eq!(kernel.production_state(id).unwrap().recipe, Some(respiration));
        assert_eq!(count_kind(&log, EventKind::ResearchCompleted), 1);
    }

    // -----------------------------------------------------------------------
    // Test 3: Unsupported recipes are rejected
    // -----------------------------------------------------------------------
    #[test]
    fn set_recipe_rejects_unsupported() {
        let (mut kernel, mut bus, _) = setup();
        let cell = kernel.registry().building_id(CELL).unwrap();
        let respiration = kernel.registry().recipe_id(RESPIRATION).unwrap();
        let fermentation = kernel.registry().recipe_id(FERMENTATION).unwrap();
        let id = kernel.register_building(cell, 0, 0, &mut bus).unwrap();

        assert!(matches!(
            kernel.set_recipe(id, Some(respiration)),
            Err(KernelError::RecipeNotSupported { .. })
        ));
        kernel.set_recipe(id, Some(fermentation)).unwrap();
        assert_eq!(kernel.production_state(id).unwrap().recipe, Some(fermentation));
    }

    // -----------------------------------------------------------------------
    // Test 4: One recipe cycle over 3s of frames
    // -----------------------------------------------------------------------
    #[test]
    fn glycolysis_completes_after_three_seconds() {
        let (mut kernel, mut bus, log) = setup();
        let glucose = res(&kernel, GLUCOSE);
        let atp = res(&kernel, ATP);
        let cell = kernel.registry().building_id(CELL).unwrap();
        kernel.credit(glucose, fixed(5.0)).unwrap();
        kernel.register_building(cell, 0, 0, &mut bus).unwrap();

        for _ in 0..30 {
            kernel.update(fixed(0.1), &mut bus);
        }
        // 0.1 is inexact in fixed point; allow one extra frame.
        if kernel.quantity(atp) == Fixed64::ZERO {
            kernel.update(fixed(0.1), &mut bus);
        }

        assert_eq!(kernel.quantity(glucose), fixed(4.0));
        assert_eq!(kernel.quantity(atp), fixed(2.0));
        assert_eq!(count_kind(&log, EventKind::RecipeCompleted), 1);
        assert_eq!(count_kind(&log, EventKind::ResourcesProduced), 1);
        assert_eq!(count_kind(&log, EventKind::ResourcesConsumed), 1);
    }

    // -----------------------------------------------------------------------
    // Test 5: Inactive buildings do not produce
    // -----------------------------------------------------------------------
    #[test]
    fn inactive_building_is_skipped() {
        let (mut kernel, mut bus, _) = setup();
        let glucose = res(&kernel, GLUCOSE);
        let cell = kernel.registry().building_id(CELL).unwrap();
        kernel.credit(glucose, fixed(5.0)).unwrap();
        let id = kernel.register_building(cell, 0, 0, &mut bus).unwrap();
        kernel.set_active(id, false).unwrap();

        kernel.update(fixed(10.0), &mut bus);

        assert_eq!(kernel.quantity(glucose), fixed(5.0));
        assert_eq!(kernel.production_state(id).unwrap().cycles, 0);
    }

    // -----------------------------------------------------------------------
    // Test 6: Priority order decides who gets scarce inputs
    // -----------------------------------------------------------------------
    #[test]
    fn higher_priority_recipe_runs_first() {
        let (mut kernel, mut bus, _) = setup();
        let glucose = res(&kernel, GLUCOSE);
        let cell = kernel.registry().building_id(CELL).unwrap();
        let fermentation = kernel.registry().recipe_id(FERMENTATION).unwrap();

        // Fermenter registered first, but glycolysis has higher priority.
        let fermenter = kernel.register_building(cell, 0, 0, &mut bus).unwrap();
        kernel.set_recipe(fermenter, Some(fermentation)).unwrap();
        let glycolytic = kernel.register_building(cell, 1, 0, &mut bus).unwrap();
        kernel.credit(glucose, fixed(1.0)).unwrap();

        kernel.update(fixed(3.0), &mut bus);

        assert_eq!(kernel.production_state(glycolytic).unwrap().cycles, 1);
        assert_eq!(kernel.production_state(fermenter).unwrap().cycles, 0);
    }

    // -----------------------------------------------------------------------
    // Test 7: Disease onset applies its effect to outputs
    // -----------------------------------------------------------------------
    #[test]
    fn disease_effect_scales_energy_output() {
        let (mut kernel, mut bus, log) = setup();
        let glucose = res(&kernel, GLUCOSE);
        let atp = res(&kernel, ATP);
        let lactic = res(&kernel, LACTIC_ACID);
        let cell = kernel.registry().building_id(CELL).unwrap();
        let acidosis = kernel.registry().disease_id(LACTIC_ACIDOSIS).unwrap();

        kernel.credit(lactic, fixed(5.0)).unwrap();
        kernel.update(fixed(0.1), &mut bus);
        assert!(kernel.disease_state(acidosis).is_some());
        assert_eq!(count_kind(&log, EventKind::DiseaseTriggered), 1);
        assert_eq!(kernel.output_multiplier(atp), fixed(0.5));

        kernel.credit(glucose, fixed(1.0)).unwrap();
        kernel.register_building(cell, 0, 0, &mut bus).unwrap();
        kernel.update(fixed(3.0), &mut bus);
        assert_eq!(kernel.quantity(atp), fixed(1.0));

        kernel.debit(lactic, fixed(5.0)).unwrap();
        kernel.update(fixed(0.1), &mut bus);
        assert!(kernel.disease_state(acidosis).is_none());
        assert_eq!(kernel.output_multiplier(atp), Fixed64::ONE);
        assert_eq!(count_kind(&log, EventKind::DiseaseRemitted), 1);
    }

    // -----------------------------------------------------------------------
    // Test 8: Unknown ids are rejected without side effects
    // -----------------------------------------------------------------------
    #[test]
    fn unknown_ids_are_skipped() {
        let (mut kernel, mut bus, log) = setup();
        assert!(kernel
            .register_building(BuildingTypeId(99), 0, 0, &mut bus)
            .is_err());
        assert!(kernel.credit(ResourceId(99), fixed(1.0)).is_err());
        assert!(kernel.complete_research(TechId(99), &mut bus).is_err());
        assert!(log.borrow().is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 9: Unregister publishes and forgets the building
    // -----------------------------------------------------------------------
    #[test]
    fn unregister_building() {
        let (mut kernel, mut bus, log) = setup();
        let cell = kernel.registry().building_id(CELL).unwrap();
        let id = kernel.register_building(cell, 5, 6, &mut bus).unwrap();

        let state = kernel.unregister_building(id, &mut bus).unwrap();
        assert_eq!((state.x, state.y), (5, 6));
        assert!(kernel.production_state(id).is_none());
        assert!(kernel.unregister_building(id, &mut bus).is_err());
        assert_eq!(count_kind(&log, EventKind::BuildingUnregistered), 1);
    }

    // -----------------------------------------------------------------------
    // Test 10: Biomarker events and critical crossings
    // -----------------------------------------------------------------------
    #[test]
    fn biomarker_events_published() {
        let (mut kernel, mut bus, log) = setup();
        let lactic = res(&kernel, LACTIC_ACID);
        let lactate = kernel.registry().biomarker_id(LACTATE).unwrap();

        kernel.credit(lactic, fixed(9.0)).unwrap();
        kernel.update(fixed(0.1), &mut bus);

        assert_eq!(kernel.biomarker_value(lactate), fixed(9.0));
        assert!(count_kind(&log, EventKind::BiomarkerUpdated) >= 2);
        // LACTATE above 8 and PH below 7.0.
        assert_eq!(count_kind(&log, EventKind::BiomarkerCriticalHigh), 1);
        assert_eq!(count_kind(&log, EventKind::BiomarkerCriticalLow), 1);

        kernel.update(fixed(0.1), &mut bus);
        assert_eq!(count_kind(&log, EventKind::BiomarkerCriticalHigh), 1);
    }

    // -----------------------------------------------------------------------
    // Test 11: Negative dt skips the frame
    // -----------------------------------------------------------------------
    #[test]
    fn negative_dt_is_ignored() {
        let (mut kernel, mut bus, _) = setup();
        let summary = kernel.update(fixed(-1.0), &mut bus);
        assert_eq!(summary, FrameSummary::default());
        assert_eq!(kernel.tick_count(), 0);
        assert_eq!(kernel.clock(), Fixed64::ZERO);
    }

    #[test]
    fn snapshot_reflects_state() {
        let (mut kernel, mut bus, _) = setup();
        let glucose = res(&kernel, GLUCOSE);
        kernel.credit(glucose, fixed(2.0)).unwrap();
        kernel.update(fixed(1.0), &mut bus);

        let snap = kernel.snapshot();
        assert_eq!(snap.tick_count, 1);
        assert_eq!(snap.ledger.get(&glucose), Some(&fixed(2.0)));
        assert_eq!(snap.biomarkers.len(), kernel.registry().biomarker_count());
    }
}
