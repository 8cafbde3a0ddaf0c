//! Resolution pipeline: reads data files, resolves cross-references, builds
//! the registry.
//!
//! Content lives in one directory, one file per table, each in RON, JSON or
//! TOML. `resources` and `recipes` are required; every other table is
//! optional. Structural problems (unparseable files, duplicate names) fail
//! the load. Individual records with bad references are skipped with a
//! warning and listed in the [`LoadReport`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use vitalis_core::disease::{ComparisonOp, Trigger};
use vitalis_core::fixed::f64_to_fixed64;
use vitalis_core::id::{BiomarkerId, BuildingTypeId, EffectId, RecipeId, ResourceId};
use vitalis_core::modifier::ModifierKey;
use vitalis_core::registry::{
    BiomarkerDef, BiomarkerMod, BiomarkerSource, BuildingTypeDef, DiseaseDef, EffectDef, RecipeDef,
    RecipeEntry, Registry, RegistryBuilder, RegistryError, ResourceDef,
};
use vitalis_core::unlock::{EntryDef, StatSelector, TrackedStatRule, UnlockCondition};

use crate::schema::*;

/// Tier cap for diseases that do not declare one.
pub const DEFAULT_MAX_TIER: u8 = 3;

/// Seconds a disease must stay active per tier when not declared.
pub const DEFAULT_PROGRESSION_SECONDS: f64 = 30.0;

/// Category given to entries that do not declare one.
pub const DEFAULT_CATEGORY: &str = "general";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A name reference could not be resolved.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// The resolved content failed registry validation.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without
/// extension).
///
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;
    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }
    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, detail: impl ToString) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Read a file and deserialize it according to its format.
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list from a file. TOML has no top-level arrays, so the list
/// is read from the array under `toml_key` (`[[resources]]` tables). RON and
/// JSON files hold the list directly.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => {
            let table: toml::Table = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
            let Some(array) = table.get(toml_key) else {
                // An empty TOML file is an empty table.
                return if table.is_empty() {
                    Ok(Vec::new())
                } else {
                    Err(parse_error(path, format!("missing key '{toml_key}' in TOML file")))
                };
            };
            array
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| parse_error(path, e))
        }
    }
}

/// Load a table if its file exists; a missing optional table is empty.
fn load_optional<T: DeserializeOwned>(
    dir: &Path,
    base_name: &str,
) -> Result<(PathBuf, Vec<T>), DataLoadError> {
    match find_data_file(dir, base_name)? {
        Some(path) => {
            let list = deserialize_list(&path, base_name)?;
            Ok((path, list))
        }
        None => Ok((dir.join(base_name), Vec::new())),
    }
}

fn load_required<T: DeserializeOwned>(
    dir: &Path,
    base_name: &str,
) -> Result<(PathBuf, Vec<T>), DataLoadError> {
    let path = require_data_file(dir, base_name)?;
    let list = deserialize_list(&path, base_name)?;
    Ok((path, list))
}

// ===========================================================================
// Name resolution helpers
// ===========================================================================

/// Look up a name in a map, returning an `UnresolvedRef` error if not found.
pub fn resolve_name<'a, V>(
    map: &'a HashMap<String, V>,
    name: &str,
    file: &Path,
    expected_kind: &'static str,
) -> Result<&'a V, DataLoadError> {
    map.get(name).ok_or_else(|| DataLoadError::UnresolvedRef {
        file: file.to_path_buf(),
        name: name.to_string(),
        expected_kind,
    })
}

/// Check whether a name already exists in a map, returning a `DuplicateName`
/// error if so.
pub fn check_duplicate<V>(
    map: &HashMap<String, V>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if map.contains_key(name) {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    } else {
        Ok(())
    }
}

/// Assign positional ids to a table's names, rejecting duplicates.
fn index_names<'a, Id>(
    names: impl Iterator<Item = &'a str>,
    file: &Path,
    make_id: impl Fn(u32) -> Id,
) -> Result<HashMap<String, Id>, DataLoadError> {
    let mut map = HashMap::new();
    for (i, name) in names.enumerate() {
        check_duplicate(&map, name, file)?;
        map.insert(name.to_string(), make_id(i as u32));
    }
    Ok(map)
}

// ===========================================================================
// Load report
// ===========================================================================

/// A record dropped during loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub file: PathBuf,
    pub name: String,
    pub reason: String,
}

/// Everything the loader skipped instead of failing.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub skipped: Vec<SkippedRecord>,
}

impl LoadReport {
    fn skip(&mut self, file: &Path, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(file = %file.display(), name, %reason, "content record skipped");
        self.skipped.push(SkippedRecord {
            file: file.to_path_buf(),
            name: name.to_string(),
            reason,
        });
    }

    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn was_skipped(&self, name: &str) -> bool {
        self.skipped.iter().any(|s| s.name == name)
    }
}

/// A frozen registry plus what was skipped building it.
#[derive(Debug)]
pub struct LoadedContent {
    pub registry: Registry,
    pub report: LoadReport,
}

// ===========================================================================
// Pipeline
// ===========================================================================

/// Load every content table in `dir` into a frozen [`Registry`].
pub fn load_content(dir: &Path) -> Result<LoadedContent, DataLoadError> {
    let mut loader = Loader {
        builder: RegistryBuilder::new(),
        report: LoadReport::default(),
        resources: HashMap::new(),
        biomarkers: HashMap::new(),
        effects: HashMap::new(),
        buildings: HashMap::new(),
    };

    let (resource_path, resources) = load_required::<ResourceData>(dir, "resources")?;
    let (recipe_path, recipes) = load_required::<RecipeData>(dir, "recipes")?;
    let (building_path, buildings) = load_optional::<BuildingData>(dir, "buildings")?;
    let (biomarker_path, biomarkers) = load_optional::<BiomarkerData>(dir, "biomarkers")?;
    let (effect_path, effects) = load_optional::<EffectData>(dir, "effects")?;
    let (disease_path, diseases) = load_optional::<DiseaseData>(dir, "diseases")?;
    let (entry_path, entries) = load_optional::<EntryData>(dir, "entries")?;
    let (stat_path, stats) = load_optional::<TrackedStatData>(dir, "tracked_stats")?;

    // Resources are never skipped, so their ids are their positions. That
    // lets biomarker sources resolve before resources are registered.
    loader.resources = index_names(resources.iter().map(|r| r.id.as_str()), &resource_path, ResourceId)?;
    for (path, names) in [
        (&recipe_path, recipes.iter().map(|r| r.id.as_str()).collect::<Vec<_>>()),
        (&building_path, buildings.iter().map(|b| b.id.as_str()).collect()),
        (&biomarker_path, biomarkers.iter().map(|b| b.id.as_str()).collect()),
        (&effect_path, effects.iter().map(|e| e.id.as_str()).collect()),
        (&disease_path, diseases.iter().map(|d| d.id.as_str()).collect()),
        (&entry_path, entries.iter().map(|e| e.id.as_str()).collect()),
    ] {
        index_names(names.into_iter(), path, |i| i)?;
    }

    loader.load_biomarkers(&biomarker_path, &biomarkers, &resources);
    loader.load_resources(&resource_path, &resources);
    loader.load_effects(&effects);
    loader.load_buildings(&buildings);
    let supported = loader.load_recipes(&recipe_path, &recipes);
    loader.attach_supported_recipes(&building_path, &buildings, &supported)?;
    loader.load_diseases(&disease_path, &diseases);
    loader.load_entries(&entry_path, &entries);
    loader.load_stat_rules(&stat_path, &stats);

    let registry = loader.builder.build()?;
    tracing::info!(
        dir = %dir.display(),
        resources = registry.resource_count(),
        recipes = registry.recipe_count(),
        diseases = registry.disease_count(),
        entries = registry.entry_count(),
        skipped = loader.report.skipped.len(),
        "content loaded"
    );
    Ok(LoadedContent {
        registry,
        report: loader.report,
    })
}

struct Loader {
    builder: RegistryBuilder,
    report: LoadReport,
    resources: HashMap<String, ResourceId>,
    biomarkers: HashMap<String, BiomarkerId>,
    effects: HashMap<String, EffectId>,
    buildings: HashMap<String, BuildingTypeId>,
}

impl Loader {
    fn load_biomarkers(&mut self, path: &Path, data: &[BiomarkerData], resources: &[ResourceData]) {
        let modified: HashSet<&str> = resources
            .iter()
            .flat_map(|r| r.biomarker_mods.iter().map(|m| m.marker_id.as_str()))
            .collect();

        for marker in data {
            let source = match &marker.source {
                Some(BiomarkerSourceData::Resource(name)) => match resolve_name(&self.resources, name, path, "resource") {
                    Ok(id) => BiomarkerSource::Resource(*id),
                    Err(e) => {
                        self.report.skip(path, &marker.id, e.to_string());
                        continue;
                    }
                },
                Some(BiomarkerSourceData::Formula) => BiomarkerSource::Formula,
                None if modified.contains(marker.id.as_str()) => BiomarkerSource::Formula,
                None => BiomarkerSource::None,
            };
            let id = self.builder.register_biomarker(BiomarkerDef {
                name: marker.id.clone(),
                baseline: f64_to_fixed64(marker.baseline),
                source,
                critical_low: marker.critical_low.map(f64_to_fixed64),
                critical_high: marker.critical_high.map(f64_to_fixed64),
            });
            self.biomarkers.insert(marker.id.clone(), id);
        }
    }

    fn load_resources(&mut self, path: &Path, data: &[ResourceData]) {
        for resource in data {
            let mut def = ResourceDef::new(&resource.id);
            def.tags = resource.tags.clone();
            def.transferable = resource.transferable;
            for m in &resource.biomarker_mods {
                match self.biomarkers.get(&m.marker_id) {
                    Some(&marker) => def.biomarker_mods.push(BiomarkerMod {
                        marker,
                        mode: m.mode,
                        value: f64_to_fixed64(m.value),
                    }),
                    None => tracing::warn!(
                        file = %path.display(),
                        resource = %resource.id,
                        marker = %m.marker_id,
                        "biomarker mod dropped: unknown biomarker"
                    ),
                }
            }
            self.builder.register_resource(def);
        }
    }

    fn load_effects(&mut self, data: &[EffectData]) {
        for effect in data {
            let factors = effect
                .factors
                .iter()
                .map(|(key, factor)| (self.modifier_key(key), f64_to_fixed64(*factor)))
                .collect();
            let id = self.builder.register_effect(EffectDef {
                name: effect.id.clone(),
                factors,
            });
            self.effects.insert(effect.id.clone(), id);
        }
    }

    fn modifier_key(&self, key: &str) -> ModifierKey {
        if let Some(tag) = key.strip_prefix("tag:") {
            return ModifierKey::Tag(tag.to_string());
        }
        match self.resources.get(key) {
            Some(&id) => ModifierKey::Resource(id),
            None => ModifierKey::Tag(key.to_string()),
        }
    }

    fn load_buildings(&mut self, data: &[BuildingData]) {
        for building in data {
            // Supported recipes are attached once recipes have ids.
            let id = self.builder.register_building(BuildingTypeDef {
                name: building.id.clone(),
                size: building.size,
                hp: building.hp,
                supported_recipes: Vec::new(),
            });
            self.buildings.insert(building.id.clone(), id);
        }
    }

    fn amounts(&self, entries: &[AmountData], path: &Path) -> Result<Vec<RecipeEntry>, DataLoadError> {
        entries
            .iter()
            .map(|e| {
                let id = resolve_name(&self.resources, &e.id, path, "resource")?;
                Ok(RecipeEntry::new(*id, f64_to_fixed64(e.amount)))
            })
            .collect()
    }

    /// Returns recipe name to id for the recipes that survived.
    fn load_recipes(&mut self, path: &Path, data: &[RecipeData]) -> HashMap<String, RecipeId> {
        let mut loaded = HashMap::new();
        for recipe in data {
            let duration = match recipe.time_seconds {
                Some(t) if t > 0.0 && t.is_finite() => f64_to_fixed64(t),
                Some(t) => {
                    self.report.skip(path, &recipe.id, format!("non-positive duration {t}"));
                    continue;
                }
                None => {
                    self.report.skip(path, &recipe.id, "missing time_seconds");
                    continue;
                }
            };
            let bad_amount = recipe
                .inputs
                .iter()
                .chain(&recipe.outputs)
                .chain(&recipe.waste_outputs)
                .find(|e| !(e.amount >= 0.0 && e.amount.is_finite()));
            if let Some(entry) = bad_amount {
                self.report.skip(
                    path,
                    &recipe.id,
                    format!("invalid amount {} for {}", entry.amount, entry.id),
                );
                continue;
            }
            let resolved = self.amounts(&recipe.inputs, path).and_then(|inputs| {
                Ok((
                    inputs,
                    self.amounts(&recipe.outputs, path)?,
                    self.amounts(&recipe.waste_outputs, path)?,
                ))
            });
            let (inputs, outputs, waste_outputs) = match resolved {
                Ok(lists) => lists,
                Err(e) => {
                    self.report.skip(path, &recipe.id, e.to_string());
                    continue;
                }
            };

            let mut machines = Vec::new();
            for name in &recipe.machine_ids {
                match self.buildings.get(name) {
                    Some(&id) => machines.push(id),
                    None => tracing::warn!(
                        file = %path.display(),
                        recipe = %recipe.id,
                        machine = %name,
                        "machine reference dropped: unknown building"
                    ),
                }
            }
            let required_research = recipe
                .unlock_by_research
                .iter()
                .map(|tech| self.builder.intern_tech(tech))
                .collect();

            let id = self.builder.register_recipe(RecipeDef {
                name: recipe.id.clone(),
                machines,
                inputs,
                outputs,
                waste_outputs,
                duration,
                priority: recipe.priority,
                required_research,
            });
            loaded.insert(recipe.id.clone(), id);
        }
        loaded
    }

    fn attach_supported_recipes(
        &mut self,
        path: &Path,
        data: &[BuildingData],
        recipes: &HashMap<String, RecipeId>,
    ) -> Result<(), DataLoadError> {
        for building in data {
            let mut supported = Vec::new();
            for name in &building.supported_recipes {
                match recipes.get(name) {
                    Some(&id) => supported.push(id),
                    None => tracing::warn!(
                        file = %path.display(),
                        building = %building.id,
                        recipe = %name,
                        "supported recipe dropped: unknown or skipped recipe"
                    ),
                }
            }
            if !supported.is_empty() {
                self.builder
                    .mutate_building(&building.id, |def| def.supported_recipes = supported)?;
            }
        }
        Ok(())
    }

    fn load_diseases(&mut self, path: &Path, data: &[DiseaseData]) {
        'diseases: for disease in data {
            let mut triggers = Vec::with_capacity(disease.triggers.len());
            for trigger in &disease.triggers {
                let Some(op) = ComparisonOp::from_symbol(&trigger.op) else {
                    self.report
                        .skip(path, &disease.id, format!("unknown operator '{}'", trigger.op));
                    continue 'diseases;
                };
                let marker = match resolve_name(&self.biomarkers, &trigger.marker_id, path, "biomarker") {
                    Ok(id) => *id,
                    Err(e) => {
                        self.report.skip(path, &disease.id, e.to_string());
                        continue 'diseases;
                    }
                };
                triggers.push(Trigger {
                    marker,
                    op,
                    value: f64_to_fixed64(trigger.value),
                });
            }

            let mut effects = Vec::new();
            for name in &disease.effects {
                match self.effects.get(name) {
                    Some(&id) => effects.push(id),
                    None => tracing::warn!(
                        file = %path.display(),
                        disease = %disease.id,
                        effect = %name,
                        "effect reference dropped: unknown effect"
                    ),
                }
            }

            let dwell = disease
                .progression_seconds
                .filter(|s| *s > 0.0)
                .unwrap_or(DEFAULT_PROGRESSION_SECONDS);
            self.builder.register_disease(DiseaseDef {
                name: disease.id.clone(),
                triggers,
                effects,
                max_tier: disease.max_tier.unwrap_or(DEFAULT_MAX_TIER).max(1),
                progression_dwell: f64_to_fixed64(dwell),
            });
        }
    }

    fn load_entries(&mut self, path: &Path, data: &[EntryData]) {
        for entry in data {
            let condition = match &entry.unlock_condition {
                None => None,
                Some(UnlockConditionData::StatThreshold { stat, value }) => Some(UnlockCondition::StatThreshold {
                    stat: stat.clone(),
                    value: f64_to_fixed64(*value),
                }),
                Some(UnlockConditionData::ItemCollected { item, amount }) => {
                    match resolve_name(&self.resources, item, path, "resource") {
                        Ok(&item) => Some(UnlockCondition::ItemCollected { item, amount: *amount }),
                        Err(e) => {
                            self.report.skip(path, &entry.id, e.to_string());
                            continue;
                        }
                    }
                }
                Some(UnlockConditionData::KillCount { unit, value }) => Some(UnlockCondition::KillCount {
                    unit: unit.clone(),
                    value: *value,
                }),
                Some(UnlockConditionData::ResearchComplete { tech }) => Some(UnlockCondition::ResearchComplete {
                    tech: self.builder.intern_tech(tech),
                }),
            };
            self.builder.register_entry(EntryDef {
                name: entry.id.clone(),
                display_name: entry.name.clone().unwrap_or_else(|| entry.id.clone()),
                category: entry
                    .category
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
                condition,
            });
        }
    }

    fn load_stat_rules(&mut self, path: &Path, data: &[TrackedStatData]) {
        for stat in data {
            let selector = match (&stat.resource, &stat.tag) {
                (Some(name), None) => match resolve_name(&self.resources, name, path, "resource") {
                    Ok(&id) => StatSelector::Resource(id),
                    Err(e) => {
                        self.report.skip(path, &stat.path, e.to_string());
                        continue;
                    }
                },
                (None, Some(tag)) => StatSelector::Tag(tag.clone()),
                _ => {
                    self.report
                        .skip(path, &stat.path, "exactly one of resource or tag is required");
                    continue;
                }
            };
            self.builder.add_stat_rule(TrackedStatRule {
                path: stat.path.clone(),
                source: stat.source,
                selector,
            });
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
