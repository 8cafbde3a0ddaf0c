//! Evaluation of unlock conditions against progression statistics.

use std::fmt;

use vitalis_core::fixed::{Fixed64, fixed64_to_f64};
use vitalis_core::registry::Registry;
use vitalis_core::unlock::{ConditionKey, UnlockCondition};

use crate::stats::ProgressionStats;

/// Whether `condition` holds for the current statistics.
pub fn is_satisfied(condition: &UnlockCondition, stats: &ProgressionStats) -> bool {
    let (current, target) = measure(condition, stats);
    current >= target
}

/// How far along a locked entry is. Computed on demand, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct UnlockHint {
    pub key: ConditionKey,
    /// What the condition is about: stat path, resource, unit or research
    /// name.
    pub subject: String,
    pub current: Fixed64,
    pub target: Fixed64,
}

impl UnlockHint {
    /// Fraction in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.target <= Fixed64::ZERO {
            return 1.0;
        }
        let current = self.current.min(self.target);
        fixed64_to_f64(current) / fixed64_to_f64(self.target)
    }
}

impl fmt::Display for UnlockHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = &self.subject;
        match &self.key {
            ConditionKey::Stat(_) => write!(f, "{subject}: {}/{}", self.current, self.target),
            ConditionKey::Item(_) => {
                write!(f, "collect {subject}: {}/{}", self.current, self.target)
            }
            ConditionKey::Kill(_) => write!(f, "defeat {subject}: {}/{}", self.current, self.target),
            ConditionKey::Research(_) => write!(f, "research {subject}"),
        }
    }
}

/// Progress toward `condition`, with ids resolved to content names.
pub fn progress(condition: &UnlockCondition, stats: &ProgressionStats, registry: &Registry) -> UnlockHint {
    let (current, target) = measure(condition, stats);
    let subject = match condition {
        UnlockCondition::StatThreshold { stat, .. } => stat.clone(),
        UnlockCondition::ItemCollected { item, .. } => registry
            .resource_name(*item)
            .map_or_else(|| format!("{item:?}"), str::to_string),
        UnlockCondition::KillCount { unit, .. } => unit.clone(),
        UnlockCondition::ResearchComplete { tech } => registry
            .tech_name(*tech)
            .map_or_else(|| format!("{tech:?}"), str::to_string),
    };
    UnlockHint {
        key: condition.key(),
        subject,
        current,
        target,
    }
}

fn measure(condition: &UnlockCondition, stats: &ProgressionStats) -> (Fixed64, Fixed64) {
    match condition {
        UnlockCondition::StatThreshold { stat, value } => (stats.counter(stat), *value),
        UnlockCondition::ItemCollected { item, amount } => (
            Fixed64::from_num(stats.item_high_water(*item)),
            Fixed64::from_num(*amount),
        ),
        UnlockCondition::KillCount { unit, value } => (
            Fixed64::from_num(stats.kills(unit)),
            Fixed64::from_num(*value),
        ),
        UnlockCondition::ResearchComplete { tech } => {
            let done = if stats.is_research_complete(*tech) {
                Fixed64::ONE
            } else {
                Fixed64::ZERO
            };
            (done, Fixed64::ONE)
        }
    }
}
