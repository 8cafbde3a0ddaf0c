//! Progression statistics.
//!
//! Every statistic only grows: counters accumulate non-negative deltas,
//! kill tallies increment, item counts keep their high-water mark, and
//! completed research is a set. Unlock conditions are thresholds over these
//! values, so once a condition holds it keeps holding.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use vitalis_core::fixed::Fixed64;
use vitalis_core::id::{ResourceId, TechId};

/// Counter path for total production of one resource.
pub fn produced_path(resource_name: &str) -> String {
    format!("produced.{resource_name}")
}

/// Counter path for total consumption of one resource.
pub fn consumed_path(resource_name: &str) -> String {
    format!("consumed.{resource_name}")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressionStats {
    counters: BTreeMap<String, Fixed64>,
    kills: BTreeMap<String, u32>,
    items: BTreeMap<ResourceId, u32>,
    research: BTreeSet<TechId>,
}

impl ProgressionStats {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    /// Add `delta` to the counter at `path` and return the new total.
    /// Negative deltas are ignored.
    pub fn add_counter(&mut self, path: &str, delta: Fixed64) -> Fixed64 {
        let slot = self.counters.entry(path.to_string()).or_insert(Fixed64::ZERO);
        if delta > Fixed64::ZERO {
            *slot = slot.saturating_add(delta);
        }
        *slot
    }

    pub fn counter(&self, path: &str) -> Fixed64 {
        self.counters.get(path).copied().unwrap_or(Fixed64::ZERO)
    }

    pub fn counters(&self) -> impl Iterator<Item = (&str, Fixed64)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }

    // -----------------------------------------------------------------------
    // Kills
    // -----------------------------------------------------------------------

    /// Count one kill of `unit`; returns the new tally.
    pub fn record_kill(&mut self, unit: &str) -> u32 {
        let tally = self.kills.entry(unit.to_string()).or_insert(0);
        *tally = tally.saturating_add(1);
        *tally
    }

    /// Raise the kill tally for `unit` to at least `count` (used on load).
    pub fn set_kills_at_least(&mut self, unit: &str, count: u32) {
        let tally = self.kills.entry(unit.to_string()).or_insert(0);
        *tally = (*tally).max(count);
    }

    pub fn kills(&self, unit: &str) -> u32 {
        self.kills.get(unit).copied().unwrap_or(0)
    }

    pub fn kill_tallies(&self) -> impl Iterator<Item = (&str, u32)> {
        self.kills.iter().map(|(k, v)| (k.as_str(), *v))
    }

    // -----------------------------------------------------------------------
    // Items
    // -----------------------------------------------------------------------

    /// Record an observed count of `item`. Returns `true` if it raised the
    /// high-water mark.
    pub fn record_item(&mut self, item: ResourceId, count: u32) -> bool {
        let mark = self.items.entry(item).or_insert(0);
        if count > *mark {
            *mark = count;
            true
        } else {
            false
        }
    }

    pub fn item_high_water(&self, item: ResourceId) -> u32 {
        self.items.get(&item).copied().unwrap_or(0)
    }

    pub fn items(&self) -> impl Iterator<Item = (ResourceId, u32)> + '_ {
        self.items.iter().map(|(k, v)| (*k, *v))
    }

    // -----------------------------------------------------------------------
    // Research
    // -----------------------------------------------------------------------

    /// Returns `false` if `tech` was already recorded.
    pub fn record_research(&mut self, tech: TechId) -> bool {
        self.research.insert(tech)
    }

    pub fn is_research_complete(&self, tech: TechId) -> bool {
        self.research.contains(&tech)
    }

    pub fn research(&self) -> impl Iterator<Item = TechId> + '_ {
        self.research.iter().copied()
    }
}
