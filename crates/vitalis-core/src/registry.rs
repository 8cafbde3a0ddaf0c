//! Immutable content database.
//!
//! Content is registered through a [`RegistryBuilder`], which hands out
//! dense ids in registration order, then frozen into a [`Registry`] by
//! [`RegistryBuilder::build`]. The build step validates every cross-table
//! reference and precomputes the lookup tables the kernel needs each frame
//! (recipes per building type, resource contributions per biomarker).

use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::disease::Trigger;
use crate::fixed::Fixed64;
use crate::id::*;
use crate::modifier::ModifierKey;
use crate::unlock::{EntryDef, StatSelector, TrackedStatRule, UnlockCondition};

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// How a resource quantity feeds a formula biomarker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModMode {
    /// `value += quantity * k`
    Add,
    /// `value *= 1 + quantity * k`
    Mul,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerMod {
    pub marker: BiomarkerId,
    pub mode: ModMode,
    pub value: Fixed64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDef {
    pub name: String,
    pub tags: Vec<String>,
    pub transferable: bool,
    pub biomarker_mods: Vec<BiomarkerMod>,
}

impl ResourceDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tags: Vec::new(),
            transferable: true,
            biomarker_mods: Vec::new(),
        }
    }
}

/// A recipe input/output entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecipeEntry {
    pub resource: ResourceId,
    pub amount: Fixed64,
}

impl RecipeEntry {
    pub fn new(resource: ResourceId, amount: Fixed64) -> Self {
        Self { resource, amount }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecipeDef {
    pub name: String,
    /// Building types that can run this recipe.
    pub machines: Vec<BuildingTypeId>,
    pub inputs: Vec<RecipeEntry>,
    pub outputs: Vec<RecipeEntry>,
    /// Unmodified by-products, credited alongside outputs.
    pub waste_outputs: Vec<RecipeEntry>,
    /// Craft time in seconds. Must be positive.
    pub duration: Fixed64,
    /// Higher runs first and is preferred on building registration.
    pub priority: i32,
    pub required_research: Vec<TechId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildingTypeDef {
    pub name: String,
    pub size: (u32, u32),
    pub hp: u32,
    pub supported_recipes: Vec<RecipeId>,
}

/// Where a biomarker's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BiomarkerSource {
    /// Never derived; stays at baseline.
    #[default]
    None,
    /// Mirrors a resource quantity.
    Resource(ResourceId),
    /// Baseline adjusted by every resource's `biomarker_mods`.
    Formula,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BiomarkerDef {
    pub name: String,
    pub baseline: Fixed64,
    pub source: BiomarkerSource,
    pub critical_low: Option<Fixed64>,
    pub critical_high: Option<Fixed64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectDef {
    pub name: String,
    pub factors: Vec<(ModifierKey, Fixed64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiseaseDef {
    pub name: String,
    /// All must hold for the disease to be active. Empty never activates.
    pub triggers: Vec<Trigger>,
    pub effects: Vec<EffectId>,
    pub max_tier: u8,
    /// Seconds a disease must stay active before advancing a tier.
    pub progression_dwell: Fixed64,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for constructing an immutable Registry.
/// Three-phase lifecycle: registration -> mutation -> finalization.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    resources: Vec<ResourceDef>,
    resource_name_to_id: HashMap<String, ResourceId>,
    recipes: Vec<RecipeDef>,
    recipe_name_to_id: HashMap<String, RecipeId>,
    buildings: Vec<BuildingTypeDef>,
    building_name_to_id: HashMap<String, BuildingTypeId>,
    biomarkers: Vec<BiomarkerDef>,
    biomarker_name_to_id: HashMap<String, BiomarkerId>,
    effects: Vec<EffectDef>,
    effect_name_to_id: HashMap<String, EffectId>,
    diseases: Vec<DiseaseDef>,
    disease_name_to_id: HashMap<String, DiseaseId>,
    entries: Vec<EntryDef>,
    entry_name_to_id: HashMap<String, EntryId>,
    techs: Vec<String>,
    tech_name_to_id: HashMap<String, TechId>,
    stat_rules: Vec<TrackedStatRule>,
    duplicates: Vec<String>,
}

fn index_name<I: Copy>(
    map: &mut HashMap<String, I>,
    duplicates: &mut Vec<String>,
    name: &str,
    id: I,
) {
    if map.insert(name.to_string(), id).is_some() {
        duplicates.push(name.to_string());
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase 1: Register a resource type. Returns its ID.
    pub fn register_resource(&mut self, def: ResourceDef) -> ResourceId {
        let id = ResourceId(self.resources.len() as u32);
        index_name(&mut self.resource_name_to_id, &mut self.duplicates, &def.name, id);
        self.resources.push(def);
        id
    }

    /// Phase 1: Register a recipe. Returns its ID.
    pub fn register_recipe(&mut self, def: RecipeDef) -> RecipeId {
        let id = RecipeId(self.recipes.len() as u32);
        index_name(&mut self.recipe_name_to_id, &mut self.duplicates, &def.name, id);
        self.recipes.push(def);
        id
    }

    /// Phase 1: Register a building type. Returns its ID.
    pub fn register_building(&mut self, def: BuildingTypeDef) -> BuildingTypeId {
        let id = BuildingTypeId(self.buildings.len() as u32);
        index_name(&mut self.building_name_to_id, &mut self.duplicates, &def.name, id);
        self.buildings.push(def);
        id
    }

    /// Phase 1: Register a biomarker. Returns its ID.
    pub fn register_biomarker(&mut self, def: BiomarkerDef) -> BiomarkerId {
        let id = BiomarkerId(self.biomarkers.len() as u32);
        index_name(&mut self.biomarker_name_to_id, &mut self.duplicates, &def.name, id);
        self.biomarkers.push(def);
        id
    }

    /// Phase 1: Register a disease effect. Returns its ID.
    pub fn register_effect(&mut self, def: EffectDef) -> EffectId {
        let id = EffectId(self.effects.len() as u32);
        index_name(&mut self.effect_name_to_id, &mut self.duplicates, &def.name, id);
        self.effects.push(def);
        id
    }

    /// Phase 1: Register a disease. Returns its ID.
    pub fn register_disease(&mut self, def: DiseaseDef) -> DiseaseId {
        let id = DiseaseId(self.diseases.len() as u32);
        index_name(&mut self.disease_name_to_id, &mut self.duplicates, &def.name, id);
        self.diseases.push(def);
        id
    }

    /// Phase 1: Register an unlockable entry. Returns its ID.
    pub fn register_entry(&mut self, def: EntryDef) -> EntryId {
        let id = EntryId(self.entries.len() as u32);
        index_name(&mut self.entry_name_to_id, &mut self.duplicates, &def.name, id);
        self.entries.push(def);
        id
    }

    /// Phase 1: Add a tracked-stat rule.
    pub fn add_stat_rule(&mut self, rule: TrackedStatRule) {
        self.stat_rules.push(rule);
    }

    /// Research technologies have no table of their own: any name that
    /// content references becomes a tech. Returns the existing ID if known.
    pub fn intern_tech(&mut self, name: &str) -> TechId {
        if let Some(id) = self.tech_name_to_id.get(name) {
            return *id;
        }
        let id = TechId(self.techs.len() as u32);
        self.techs.push(name.to_string());
        self.tech_name_to_id.insert(name.to_string(), id);
        id
    }

    /// Phase 2: Mutate an existing recipe by name.
    pub fn mutate_recipe<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut RecipeDef),
    {
        let id = self
            .recipe_name_to_id
            .get(name)
            .ok_or(RegistryError::NotFound(name.to_string()))?;
        f(&mut self.recipes[id.0 as usize]);
        Ok(())
    }

    /// Phase 2: Mutate an existing building type by name.
    pub fn mutate_building<F>(&mut self, name: &str, f: F) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut BuildingTypeDef),
    {
        let id = self
            .building_name_to_id
            .get(name)
            .ok_or(RegistryError::NotFound(name.to_string()))?;
        f(&mut self.buildings[id.0 as usize]);
        Ok(())
    }

    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        self.resource_name_to_id.get(name).copied()
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        self.recipe_name_to_id.get(name).copied()
    }

    pub fn building_id(&self, name: &str) -> Option<BuildingTypeId> {
        self.building_name_to_id.get(name).copied()
    }

    pub fn biomarker_id(&self, name: &str) -> Option<BiomarkerId> {
        self.biomarker_name_to_id.get(name).copied()
    }

    pub fn effect_id(&self, name: &str) -> Option<EffectId> {
        self.effect_name_to_id.get(name).copied()
    }

    pub fn disease_id(&self, name: &str) -> Option<DiseaseId> {
        self.disease_name_to_id.get(name).copied()
    }

    /// Phase 3: Validate references and freeze the registry.
    pub fn build(self) -> Result<Registry, RegistryError> {
        if let Some(name) = self.duplicates.first() {
            return Err(RegistryError::DuplicateName(name.clone()));
        }
        self.validate()?;

        // Recipes each building type can run: declared on either side,
        // ordered by priority (highest first), then by id.
        let mut building_recipes: Vec<Vec<RecipeId>> = self
            .buildings
            .iter()
            .map(|b| b.supported_recipes.clone())
            .collect();
        for (i, recipe) in self.recipes.iter().enumerate() {
            for machine in &recipe.machines {
                building_recipes[machine.0 as usize].push(RecipeId(i as u32));
            }
        }
        for list in &mut building_recipes {
            list.sort_by_key(|r| (std::cmp::Reverse(self.recipes[r.0 as usize].priority), *r));
            list.dedup();
        }

        // Per-biomarker contributions for formula derivation, in resource
        // id order so the fold is deterministic.
        let mut marker_contributions: Vec<Vec<(ResourceId, BiomarkerMod)>> =
            vec![Vec::new(); self.biomarkers.len()];
        for (i, resource) in self.resources.iter().enumerate() {
            for m in &resource.biomarker_mods {
                marker_contributions[m.marker.0 as usize].push((ResourceId(i as u32), m.clone()));
            }
        }

        Ok(Registry {
            resources: self.resources,
            resource_name_to_id: self.resource_name_to_id,
            recipes: self.recipes,
            recipe_name_to_id: self.recipe_name_to_id,
            buildings: self.buildings,
            building_name_to_id: self.building_name_to_id,
            biomarkers: self.biomarkers,
            biomarker_name_to_id: self.biomarker_name_to_id,
            effects: self.effects,
            effect_name_to_id: self.effect_name_to_id,
            diseases: self.diseases,
            disease_name_to_id: self.disease_name_to_id,
            entries: self.entries,
            entry_name_to_id: self.entry_name_to_id,
            techs: self.techs,
            tech_name_to_id: self.tech_name_to_id,
            stat_rules: self.stat_rules,
            building_recipes,
            marker_contributions,
        })
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let resource_ok = |id: ResourceId| (id.0 as usize) < self.resources.len();
        let biomarker_ok = |id: BiomarkerId| (id.0 as usize) < self.biomarkers.len();
        let tech_ok = |id: TechId| (id.0 as usize) < self.techs.len();

        for resource in &self.resources {
            for m in &resource.biomarker_mods {
                if !biomarker_ok(m.marker) {
                    return Err(RegistryError::InvalidBiomarkerRef {
                        owner: resource.name.clone(),
                        id: m.marker,
                    });
                }
            }
        }

        for recipe in &self.recipes {
            if recipe.duration <= Fixed64::ZERO {
                return Err(RegistryError::NonPositiveDuration(recipe.name.clone()));
            }
            let entries = recipe
                .inputs
                .iter()
                .chain(&recipe.outputs)
                .chain(&recipe.waste_outputs);
            for entry in entries {
                if !resource_ok(entry.resource) {
                    return Err(RegistryError::InvalidResourceRef {
                        owner: recipe.name.clone(),
                        id: entry.resource,
                    });
                }
                if entry.amount < Fixed64::ZERO {
                    return Err(RegistryError::NegativeAmount {
                        owner: recipe.name.clone(),
                        id: entry.resource,
                        amount: entry.amount,
                    });
                }
            }
            for machine in &recipe.machines {
                if machine.0 as usize >= self.buildings.len() {
                    return Err(RegistryError::InvalidBuildingRef {
                        owner: recipe.name.clone(),
                        id: *machine,
                    });
                }
            }
            for tech in &recipe.required_research {
                if !tech_ok(*tech) {
                    return Err(RegistryError::InvalidTechRef {
                        owner: recipe.name.clone(),
                        id: *tech,
                    });
                }
            }
        }

        for building in &self.buildings {
            for recipe in &building.supported_recipes {
                if recipe.0 as usize >= self.recipes.len() {
                    return Err(RegistryError::InvalidRecipeRef {
                        owner: building.name.clone(),
                        id: *recipe,
                    });
                }
            }
        }

        for biomarker in &self.biomarkers {
            if let BiomarkerSource::Resource(id) = biomarker.source
                && !resource_ok(id)
            {
                return Err(RegistryError::InvalidResourceRef {
                    owner: biomarker.name.clone(),
                    id,
                });
            }
        }

        for effect in &self.effects {
            for (key, _) in &effect.factors {
                if let ModifierKey::Resource(id) = key
                    && !resource_ok(*id)
                {
                    return Err(RegistryError::InvalidResourceRef {
                        owner: effect.name.clone(),
                        id: *id,
                    });
                }
            }
        }

        for disease in &self.diseases {
            for trigger in &disease.triggers {
                if !biomarker_ok(trigger.marker) {
                    return Err(RegistryError::InvalidBiomarkerRef {
                        owner: disease.name.clone(),
                        id: trigger.marker,
                    });
                }
            }
            for effect in &disease.effects {
                if effect.0 as usize >= self.effects.len() {
                    return Err(RegistryError::InvalidEffectRef {
                        owner: disease.name.clone(),
                        id: *effect,
                    });
                }
            }
        }

        for entry in &self.entries {
            match &entry.condition {
                Some(UnlockCondition::ItemCollected { item, .. }) if !resource_ok(*item) => {
                    return Err(RegistryError::InvalidResourceRef {
                        owner: entry.name.clone(),
                        id: *item,
                    });
                }
                Some(UnlockCondition::ResearchComplete { tech }) if !tech_ok(*tech) => {
                    return Err(RegistryError::InvalidTechRef {
                        owner: entry.name.clone(),
                        id: *tech,
                    });
                }
                _ => {}
            }
        }

        for rule in &self.stat_rules {
            if let StatSelector::Resource(id) = rule.selector
                && !resource_ok(id)
            {
                return Err(RegistryError::InvalidResourceRef {
                    owner: rule.path.clone(),
                    id,
                });
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable registry. Frozen after build(). Shared via `Arc`.
#[derive(Debug)]
pub struct Registry {
    resources: Vec<ResourceDef>,
    resource_name_to_id: HashMap<String, ResourceId>,
    recipes: Vec<RecipeDef>,
    recipe_name_to_id: HashMap<String, RecipeId>,
    buildings: Vec<BuildingTypeDef>,
    building_name_to_id: HashMap<String, BuildingTypeId>,
    biomarkers: Vec<BiomarkerDef>,
    biomarker_name_to_id: HashMap<String, BiomarkerId>,
    effects: Vec<EffectDef>,
    effect_name_to_id: HashMap<String, EffectId>,
    diseases: Vec<DiseaseDef>,
    disease_name_to_id: HashMap<String, DiseaseId>,
    entries: Vec<EntryDef>,
    entry_name_to_id: HashMap<String, EntryId>,
    techs: Vec<String>,
    tech_name_to_id: HashMap<String, TechId>,
    stat_rules: Vec<TrackedStatRule>,
    building_recipes: Vec<Vec<RecipeId>>,
    marker_contributions: Vec<Vec<(ResourceId, BiomarkerMod)>>,
}

fn lookup<I: Copy + Eq + Hash>(map: &HashMap<String, I>, name: &str) -> Option<I> {
    map.get(name).copied()
}

impl Registry {
    // -- Resources --

    pub fn get_resource(&self, id: ResourceId) -> Option<&ResourceDef> {
        self.resources.get(id.0 as usize)
    }

    pub fn resource_id(&self, name: &str) -> Option<ResourceId> {
        lookup(&self.resource_name_to_id, name)
    }

    /// Display tags of a resource; empty for unknown ids.
    pub fn resource_tags(&self, id: ResourceId) -> &[String] {
        self.get_resource(id).map(|r| r.tags.as_slice()).unwrap_or(&[])
    }

    pub fn resource_name(&self, id: ResourceId) -> Option<&str> {
        self.get_resource(id).map(|r| r.name.as_str())
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    // -- Recipes --

    pub fn get_recipe(&self, id: RecipeId) -> Option<&RecipeDef> {
        self.recipes.get(id.0 as usize)
    }

    pub fn recipe_id(&self, name: &str) -> Option<RecipeId> {
        lookup(&self.recipe_name_to_id, name)
    }

    pub fn recipe_count(&self) -> usize {
        self.recipes.len()
    }

    // -- Buildings --

    pub fn get_building(&self, id: BuildingTypeId) -> Option<&BuildingTypeDef> {
        self.buildings.get(id.0 as usize)
    }

    pub fn building_id(&self, name: &str) -> Option<BuildingTypeId> {
        lookup(&self.building_name_to_id, name)
    }

    pub fn building_count(&self) -> usize {
        self.buildings.len()
    }

    /// Recipes runnable by a building type, highest priority first.
    pub fn recipes_for_building(&self, id: BuildingTypeId) -> &[RecipeId] {
        self.building_recipes
            .get(id.0 as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // -- Biomarkers --

    pub fn get_biomarker(&self, id: BiomarkerId) -> Option<&BiomarkerDef> {
        self.biomarkers.get(id.0 as usize)
    }

    pub fn biomarker_id(&self, name: &str) -> Option<BiomarkerId> {
        lookup(&self.biomarker_name_to_id, name)
    }

    pub fn biomarker_count(&self) -> usize {
        self.biomarkers.len()
    }

    pub fn biomarkers(&self) -> impl Iterator<Item = (BiomarkerId, &BiomarkerDef)> {
        self.biomarkers
            .iter()
            .enumerate()
            .map(|(i, def)| (BiomarkerId(i as u32), def))
    }

    /// Resource mods feeding a formula biomarker, in resource id order.
    pub fn marker_contributions(&self, id: BiomarkerId) -> &[(ResourceId, BiomarkerMod)] {
        self.marker_contributions
            .get(id.0 as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    // -- Effects and diseases --

    pub fn get_effect(&self, id: EffectId) -> Option<&EffectDef> {
        self.effects.get(id.0 as usize)
    }

    pub fn effect_id(&self, name: &str) -> Option<EffectId> {
        lookup(&self.effect_name_to_id, name)
    }

    pub fn get_disease(&self, id: DiseaseId) -> Option<&DiseaseDef> {
        self.diseases.get(id.0 as usize)
    }

    pub fn disease_id(&self, name: &str) -> Option<DiseaseId> {
        lookup(&self.disease_name_to_id, name)
    }

    pub fn disease_count(&self) -> usize {
        self.diseases.len()
    }

    pub fn diseases(&self) -> impl Iterator<Item = (DiseaseId, &DiseaseDef)> {
        self.diseases
            .iter()
            .enumerate()
            .map(|(i, def)| (DiseaseId(i as u32), def))
    }

    // -- Entries, research, stats --

    pub fn get_entry(&self, id: EntryId) -> Option<&EntryDef> {
        self.entries.get(id.0 as usize)
    }

    pub fn entry_id(&self, name: &str) -> Option<EntryId> {
        lookup(&self.entry_name_to_id, name)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &EntryDef)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, def)| (EntryId(i as u32), def))
    }

    pub fn tech_id(&self, name: &str) -> Option<TechId> {
        lookup(&self.tech_name_to_id, name)
    }

    pub fn tech_name(&self, id: TechId) -> Option<&str> {
        self.techs.get(id.0 as usize).map(String::as_str)
    }

    pub fn tech_count(&self) -> usize {
        self.techs.len()
    }

    pub fn stat_rules(&self) -> &[TrackedStatRule] {
        &self.stat_rules
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate name: {0}")]
    DuplicateName(String),
    #[error("recipe {0} must have a positive duration")]
    NonPositiveDuration(String),
    #[error("{owner}: negative amount {amount} for resource {id:?}")]
    NegativeAmount {
        owner: String,
        id: ResourceId,
        amount: Fixed64,
    },
    #[error("{owner}: invalid resource reference {id:?}")]
    InvalidResourceRef { owner: String, id: ResourceId },
    #[error("{owner}: invalid recipe reference {id:?}")]
    InvalidRecipeRef { owner: String, id: RecipeId },
    #[error("{owner}: invalid building type reference {id:?}")]
    InvalidBuildingRef { owner: String, id: BuildingTypeId },
    #[error("{owner}: invalid biomarker reference {id:?}")]
    InvalidBiomarkerRef { owner: String, id: BiomarkerId },
    #[error("{owner}: invalid effect reference {id:?}")]
    InvalidEffectRef { owner: String, id: EffectId },
    #[error("{owner}: invalid research reference {id:?}")]
    InvalidTechRef { owner: String, id: TechId },
}
