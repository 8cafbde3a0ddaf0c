//! Biomarker derivation.
//!
//! Biomarkers are read-only diagnostics computed from the ledger once per
//! frame. A biomarker either mirrors a resource quantity or follows a
//! formula: start at the baseline, apply every additive contribution
//! (`value += qty * k`), then every multiplicative one
//! (`value *= 1 + qty * k`). Contributions come from the resources'
//! `biomarker_mods` and are folded in resource id order.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::BiomarkerId;
use crate::ledger::ResourceLedger;
use crate::registry::{BiomarkerDef, BiomarkerSource, ModMode, Registry};

/// Which critical band a value sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CriticalBand {
    #[default]
    Normal,
    Low,
    High,
}

impl CriticalBand {
    pub fn classify(def: &BiomarkerDef, value: Fixed64) -> Self {
        match (def.critical_low, def.critical_high) {
            (Some(low), _) if value < low => CriticalBand::Low,
            (_, Some(high)) if value > high => CriticalBand::High,
            _ => CriticalBand::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerState {
    pub value: Fixed64,
    /// Simulation time of the last value change.
    pub last_update: Fixed64,
    pub band: CriticalBand,
}

/// A value change produced by [`BiomarkerBoard::refresh`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiomarkerChange {
    pub biomarker: BiomarkerId,
    pub old_value: Fixed64,
    pub new_value: Fixed64,
    /// Set when the value crossed into a critical band this frame.
    pub entered: Option<CriticalBand>,
}

/// Current state of every biomarker, indexed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerBoard {
    states: Vec<BiomarkerState>,
}

impl BiomarkerBoard {
    /// Every biomarker starts at its baseline.
    pub fn new(registry: &Registry) -> Self {
        let states = registry
            .biomarkers()
            .map(|(_, def)| BiomarkerState {
                value: def.baseline,
                last_update: Fixed64::ZERO,
                band: CriticalBand::classify(def, def.baseline),
            })
            .collect();
        Self { states }
    }

    pub fn get(&self, id: BiomarkerId) -> Option<&BiomarkerState> {
        self.states.get(id.0 as usize)
    }

    /// Current value; zero for unknown ids.
    pub fn value(&self, id: BiomarkerId) -> Fixed64 {
        self.get(id).map(|s| s.value).unwrap_or(Fixed64::ZERO)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BiomarkerId, &BiomarkerState)> {
        self.states
            .iter()
            .enumerate()
            .map(|(i, s)| (BiomarkerId(i as u32), s))
    }

    /// Recompute every derived biomarker and return the ones that changed.
    pub fn refresh(
        &mut self,
        registry: &Registry,
        ledger: &ResourceLedger,
        now: Fixed64,
    ) -> Vec<BiomarkerChange> {
        let mut changes = Vec::new();
        for (id, def) in registry.biomarkers() {
            let Some(new_value) = derive(registry, id, def, ledger) else {
                continue;
            };
            let Some(state) = self.states.get_mut(id.0 as usize) else {
                continue;
            };
            if state.value == new_value {
                continue;
            }

            let band = CriticalBand::classify(def, new_value);
            let entered = (band != state.band && band != CriticalBand::Normal).then_some(band);
            changes.push(BiomarkerChange {
                biomarker: id,
                old_value: state.value,
                new_value,
                entered,
            });
            state.value = new_value;
            state.band = band;
            state.last_update = now;
        }
        changes
    }
}

/// Value of one biomarker for the given ledger. `None` if it has no source.
pub fn derive(
    registry: &Registry,
    id: BiomarkerId,
    def: &BiomarkerDef,
    ledger: &ResourceLedger,
) -> Option<Fixed64> {
    match def.source {
        BiomarkerSource::None => None,
        BiomarkerSource::Resource(resource) => Some(ledger.quantity(resource)),
        BiomarkerSource::Formula => {
            let contributions = registry.marker_contributions(id);
            let mut value = def.baseline;
            for (resource, m) in contributions.iter().filter(|(_, m)| m.mode == ModMode::Add) {
                let qty = ledger.quantity(*resource);
                value = value.saturating_add(qty.saturating_mul(m.value));
            }
            for (resource, m) in contributions.iter().filter(|(_, m)| m.mode == ModMode::Mul) {
                let qty = ledger.quantity(*resource);
                let factor = Fixed64::ONE.saturating_add(qty.saturating_mul(m.value));
                value = value.saturating_mul(factor);
            }
            Some(value)
        }
    }
}
