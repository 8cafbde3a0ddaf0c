//! Disease triggers, tiers and effects.
//!
//! A disease is active exactly while every one of its triggers holds. On
//! onset it enters tier 1; while it stays active it advances one tier per
//! dwell period up to its maximum; when any trigger stops holding it
//! remits. Effects are applied through the modifier stack under the source
//! id `disease:<name>`, with each factor raised to the current tier.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::biomarker::BiomarkerBoard;
use crate::fixed::{Fixed64, approx_eq, saturating_powi};
use crate::id::{BiomarkerId, DiseaseId};
use crate::modifier::{Modifier, ModifierKey};
use crate::registry::{DiseaseDef, Registry};

// ---------------------------------------------------------------------------
// Comparisons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    Ne,
}

impl ComparisonOp {
    /// Parse `>`, `<`, `==`, `>=`, `<=` or `!=`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol.trim() {
            ">" => Some(ComparisonOp::Gt),
            "<" => Some(ComparisonOp::Lt),
            "==" => Some(ComparisonOp::Eq),
            ">=" => Some(ComparisonOp::Gte),
            "<=" => Some(ComparisonOp::Lte),
            "!=" => Some(ComparisonOp::Ne),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Gt => ">",
            ComparisonOp::Lt => "<",
            ComparisonOp::Eq => "==",
            ComparisonOp::Gte => ">=",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Ne => "!=",
        }
    }

    /// `Eq` and `Ne` compare within `epsilon`; the rest are exact.
    pub fn evaluate(self, lhs: Fixed64, rhs: Fixed64, epsilon: Fixed64) -> bool {
        match self {
            ComparisonOp::Gt => lhs > rhs,
            ComparisonOp::Lt => lhs < rhs,
            ComparisonOp::Gte => lhs >= rhs,
            ComparisonOp::Lte => lhs <= rhs,
            ComparisonOp::Eq => approx_eq(lhs, rhs, epsilon),
            ComparisonOp::Ne => !approx_eq(lhs, rhs, epsilon),
        }
    }
}

/// One comparison of a biomarker against a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub marker: BiomarkerId,
    pub op: ComparisonOp,
    pub value: Fixed64,
}

impl Trigger {
    pub fn holds(&self, biomarkers: &BiomarkerBoard, epsilon: Fixed64) -> bool {
        self.op
            .evaluate(biomarkers.value(self.marker), self.value, epsilon)
    }
}

/// Whether every trigger holds. An empty trigger list never holds.
pub fn triggers_hold(def: &DiseaseDef, biomarkers: &BiomarkerBoard, epsilon: Fixed64) -> bool {
    !def.triggers.is_empty() && def.triggers.iter().all(|t| t.holds(biomarkers, epsilon))
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Which diseases to re-check each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationMode {
    /// Diseases referencing a changed biomarker, plus every active disease.
    #[default]
    Reactive,
    /// Every disease, every frame.
    FullScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveDisease {
    pub tier: u8,
    pub onset: Fixed64,
    pub last_progression: Fixed64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiseaseTransition {
    Onset { disease: DiseaseId, tier: u8 },
    Progressed { disease: DiseaseId, tier: u8 },
    Remitted { disease: DiseaseId, tier: u8 },
}

/// Active disease states plus the biomarker -> diseases reverse index.
#[derive(Debug, Clone, PartialEq)]
pub struct DiseaseTracker {
    active: BTreeMap<DiseaseId, ActiveDisease>,
    by_marker: BTreeMap<BiomarkerId, Vec<DiseaseId>>,
    evaluations: u64,
}

impl DiseaseTracker {
    pub fn new(registry: &Registry) -> Self {
        let mut by_marker: BTreeMap<BiomarkerId, Vec<DiseaseId>> = BTreeMap::new();
        for (id, def) in registry.diseases() {
            for trigger in &def.triggers {
                let list = by_marker.entry(trigger.marker).or_default();
                if !list.contains(&id) {
                    list.push(id);
                }
            }
        }
        Self {
            active: BTreeMap::new(),
            by_marker,
            evaluations: 0,
        }
    }

    pub fn get(&self, disease: DiseaseId) -> Option<&ActiveDisease> {
        self.active.get(&disease)
    }

    pub fn is_active(&self, disease: DiseaseId) -> bool {
        self.active.contains_key(&disease)
    }

    pub fn active(&self) -> impl Iterator<Item = (DiseaseId, &ActiveDisease)> {
        self.active.iter().map(|(id, state)| (*id, state))
    }

    /// Diseases whose triggers reference `marker`.
    pub fn diseases_for_marker(&self, marker: BiomarkerId) -> &[DiseaseId] {
        self.by_marker.get(&marker).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total trigger-conjunction evaluations performed.
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Re-evaluate candidate diseases at simulation time `now` and return
    /// the transitions, in disease id order.
    pub fn evaluate(
        &mut self,
        registry: &Registry,
        biomarkers: &BiomarkerBoard,
        changed: &BTreeSet<BiomarkerId>,
        now: Fixed64,
        epsilon: Fixed64,
        mode: EvaluationMode,
    ) -> Vec<DiseaseTransition> {
        let candidates: BTreeSet<DiseaseId> = match mode {
            EvaluationMode::FullScan => registry.diseases().map(|(id, _)| id).collect(),
            EvaluationMode::Reactive => changed
                .iter()
                .flat_map(|m| self.diseases_for_marker(*m).iter().copied())
                .chain(self.active.keys().copied())
                .collect(),
        };

        let mut transitions = Vec::new();
        for disease in candidates {
            let Some(def) = registry.get_disease(disease) else {
                tracing::warn!(?disease, "unknown disease skipped");
                continue;
            };
            self.evaluations += 1;
            let holds = triggers_hold(def, biomarkers, epsilon);

            match (holds, self.active.get_mut(&disease)) {
                (true, None) => {
                    self.active.insert(
                        disease,
                        ActiveDisease {
                            tier: 1,
                            onset: now,
                            last_progression: now,
                        },
                    );
                    transitions.push(DiseaseTransition::Onset { disease, tier: 1 });
                }
                (true, Some(state)) => {
                    let dwelled = now.saturating_sub(state.last_progression) >= def.progression_dwell;
                    if dwelled && state.tier < def.max_tier {
                        state.tier += 1;
                        state.last_progression = now;
                        transitions.push(DiseaseTransition::Progressed {
                            disease,
                            tier: state.tier,
                        });
                    }
                }
                (false, Some(state)) => {
                    let tier = state.tier;
                    self.active.remove(&disease);
                    transitions.push(DiseaseTransition::Remitted { disease, tier });
                }
                (false, None) => {}
            }
        }
        transitions
    }
}

/// The modifier a disease applies at `tier`: every effect factor raised to
/// the tier, with factors on the same key multiplied together.
pub fn effect_modifier(registry: &Registry, def: &DiseaseDef, tier: u8) -> Modifier {
    let mut merged: BTreeMap<ModifierKey, Fixed64> = BTreeMap::new();
    for effect_id in &def.effects {
        let Some(effect) = registry.get_effect(*effect_id) else {
            tracing::warn!(disease = %def.name, ?effect_id, "unknown effect skipped");
            continue;
        };
        for (key, factor) in &effect.factors {
            let scaled = saturating_powi(*factor, u32::from(tier));
            let slot = merged.entry(key.clone()).or_insert(Fixed64::ONE);
            *slot = slot.saturating_mul(scaled);
        }
    }
    Modifier {
        source: modifier_source(def),
        factors: merged.into_iter().collect(),
    }
}

pub fn modifier_source(def: &DiseaseDef) -> String {
    format!("disease:{}", def.name)
}
