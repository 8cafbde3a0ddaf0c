//! Per-building recipe execution.
//!
//! Each registered building owns a [`ProductionState`]. Every frame the
//! kernel calls [`ProductionState::advance`], which runs this state machine:
//!
//! - inputs not all present: no progress, no consumption, phase `Idle`
//! - otherwise `progress += dt`, phase `Accumulating`
//! - `progress >= duration`: debit every input and credit every (modified)
//!   output plus waste as one atomic pair, then reset progress to zero
//!
//! At most one cycle completes per building per frame, whatever `dt` is.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::*;
use crate::ledger::ResourceLedger;
use crate::modifier::ModifierStack;
use crate::registry::{RecipeDef, Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProductionPhase {
    #[default]
    Idle,
    Accumulating,
}

/// Runtime state of one registered building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionState {
    pub building_type: BuildingTypeId,
    pub recipe: Option<RecipeId>,
    /// Seconds accumulated towards the current cycle.
    pub progress: Fixed64,
    pub active: bool,
    pub phase: ProductionPhase,
    pub x: i32,
    pub y: i32,
    /// Completed cycles since registration.
    pub cycles: u64,
}

impl ProductionState {
    pub fn new(building_type: BuildingTypeId, recipe: Option<RecipeId>, x: i32, y: i32) -> Self {
        Self {
            building_type,
            recipe,
            progress: Fixed64::ZERO,
            active: true,
            phase: ProductionPhase::Idle,
            x,
            y,
            cycles: 0,
        }
    }

    /// Switch recipe, discarding partial progress.
    pub fn set_recipe(&mut self, recipe: Option<RecipeId>) {
        self.recipe = recipe;
        self.progress = Fixed64::ZERO;
        self.phase = ProductionPhase::Idle;
    }

    /// Advance by `dt` seconds against `recipe`.
    pub fn advance(
        &mut self,
        recipe_id: RecipeId,
        recipe: &RecipeDef,
        dt: Fixed64,
        ledger: &mut ResourceLedger,
        modifiers: &ModifierStack,
        registry: &Registry,
    ) -> TickOutcome {
        let inputs: Vec<(ResourceId, Fixed64)> = recipe
            .inputs
            .iter()
            .map(|e| (e.resource, e.amount))
            .collect();

        if !ledger.has_all(&inputs) {
            self.phase = ProductionPhase::Idle;
            return TickOutcome::Starved;
        }

        self.phase = ProductionPhase::Accumulating;
        self.progress = self.progress.saturating_add(dt);
        if self.progress < recipe.duration {
            return TickOutcome::Accumulating;
        }

        if ledger.debit_all(&inputs).is_err() {
            self.phase = ProductionPhase::Idle;
            return TickOutcome::Starved;
        }

        let mut produced: Vec<(ResourceId, Fixed64)> = recipe
            .outputs
            .iter()
            .map(|e| {
                let tags = registry.resource_tags(e.resource);
                (e.resource, modifiers.apply(e.resource, tags, e.amount))
            })
            .collect();
        produced.extend(recipe.waste_outputs.iter().map(|e| (e.resource, e.amount)));

        for (resource, amount) in &produced {
            // Registry::build rejects negative base amounts and modifier
            // factors are clamped at zero.
            if let Err(err) = ledger.credit(*resource, *amount) {
                tracing::warn!(%err, recipe = %recipe.name, "output credit rejected");
            }
        }

        self.progress = Fixed64::ZERO;
        self.cycles += 1;

        TickOutcome::Completed(Completion {
            recipe: recipe_id,
            consumed: inputs,
            produced,
        })
    }
}

/// Resources moved by one completed cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub recipe: RecipeId,
    pub consumed: Vec<(ResourceId, Fixed64)>,
    /// Modified outputs followed by waste outputs.
    pub produced: Vec<(ResourceId, Fixed64)>,
}

/// What happened to one building this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Inactive,
    NoRecipe,
    Starved,
    Accumulating,
    Completed(Completion),
}
