//! Serde data file structs for content definitions.
//!
//! These structs define the on-disk format for resources, recipes,
//! buildings, biomarkers, effects, diseases, unlockable entries and tracked
//! statistics. Every cross-reference is by name (`id`); the loader resolves
//! names into registry ids.

use std::collections::BTreeMap;

use serde::Deserialize;
use vitalis_core::registry::ModMode;
use vitalis_core::unlock::StatSource;

fn default_true() -> bool {
    true
}

// ===========================================================================
// Resources
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceData {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub transferable: bool,
    #[serde(default)]
    pub biomarker_mods: Vec<BiomarkerModData>,
}

/// How holding this resource moves a biomarker.
#[derive(Debug, Clone, Deserialize)]
pub struct BiomarkerModData {
    pub marker_id: String,
    pub mode: ModMode,
    pub value: f64,
}

// ===========================================================================
// Recipes
// ===========================================================================

/// A `(resource, amount)` pair.
#[derive(Debug, Clone, Deserialize)]
pub struct AmountData {
    pub id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipeData {
    pub id: String,
    #[serde(default)]
    pub machine_ids: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<AmountData>,
    #[serde(default)]
    pub outputs: Vec<AmountData>,
    #[serde(default)]
    pub waste_outputs: Vec<AmountData>,
    /// Required; a recipe without a positive duration is skipped.
    #[serde(default)]
    pub time_seconds: Option<f64>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub unlock_by_research: Vec<String>,
}

// ===========================================================================
// Buildings
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BuildingData {
    pub id: String,
    #[serde(default = "default_size")]
    pub size: (u32, u32),
    #[serde(default = "default_hp")]
    pub hp: u32,
    #[serde(default)]
    pub supported_recipes: Vec<String>,
}

fn default_size() -> (u32, u32) {
    (1, 1)
}

fn default_hp() -> u32 {
    100
}

// ===========================================================================
// Biomarkers
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiomarkerSourceData {
    /// `{ resource = "ATP" }`
    Resource(String),
    /// `"formula"`
    Formula,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BiomarkerData {
    pub id: String,
    #[serde(default)]
    pub baseline: f64,
    /// Omitted: formula if any resource modifies this marker, else never
    /// derived.
    #[serde(default)]
    pub source: Option<BiomarkerSourceData>,
    #[serde(default)]
    pub critical_low: Option<f64>,
    #[serde(default)]
    pub critical_high: Option<f64>,
}

// ===========================================================================
// Effects & diseases
// ===========================================================================

/// Factor keys are resource names, or tags written as `tag:<name>`. A key
/// that names no resource is also read as a tag.
#[derive(Debug, Clone, Deserialize)]
pub struct EffectData {
    pub id: String,
    #[serde(default)]
    pub factors: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriggerData {
    pub marker_id: String,
    /// One of `>=`, `<=`, `>`, `<`, `==`, `!=`.
    pub op: String,
    pub value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiseaseData {
    pub id: String,
    #[serde(default)]
    pub triggers: Vec<TriggerData>,
    #[serde(default)]
    pub effects: Vec<String>,
    #[serde(default)]
    pub max_tier: Option<u8>,
    #[serde(default)]
    pub progression_seconds: Option<f64>,
}

// ===========================================================================
// Progression
// ===========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnlockConditionData {
    StatThreshold { stat: String, value: f64 },
    ItemCollected { item: String, amount: u32 },
    KillCount { unit: String, value: u32 },
    ResearchComplete { tech: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryData {
    pub id: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub unlock_condition: Option<UnlockConditionData>,
}

/// Exactly one of `resource` or `tag` selects what feeds the stat.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackedStatData {
    pub path: String,
    pub source: StatSource,
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
}
