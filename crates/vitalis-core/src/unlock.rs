//! Unlockable entries and the conditions that gate them.
//!
//! These are content definitions only; the progression crate owns the
//! runtime state that evaluates them.

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::{ResourceId, TechId};

/// What an entry waits on before it unlocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UnlockCondition {
    /// A named statistic reaches `value`.
    StatThreshold { stat: String, value: Fixed64 },
    /// The high-water count of `item` reaches `amount`.
    ItemCollected { item: ResourceId, amount: u32 },
    /// `value` kills of `unit`.
    KillCount { unit: String, value: u32 },
    /// A research technology completes.
    ResearchComplete { tech: TechId },
}

impl UnlockCondition {
    /// The single bucket this condition is indexed under.
    pub fn key(&self) -> ConditionKey {
        match self {
            UnlockCondition::StatThreshold { stat, .. } => ConditionKey::Stat(stat.clone()),
            UnlockCondition::ItemCollected { item, .. } => ConditionKey::Item(*item),
            UnlockCondition::KillCount { unit, .. } => ConditionKey::Kill(unit.clone()),
            UnlockCondition::ResearchComplete { tech } => ConditionKey::Research(*tech),
        }
    }
}

/// Reverse-index key: the exact input a condition depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionKey {
    Stat(String),
    Item(ResourceId),
    Kill(String),
    Research(TechId),
}

/// An unlockable content entry (codex page, building, recipe card).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDef {
    pub name: String,
    pub display_name: String,
    pub category: String,
    /// `None` unlocks at initialization.
    pub condition: Option<UnlockCondition>,
}

/// Whether a tracked statistic counts production or consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatSource {
    Produced,
    Consumed,
}

/// Which resources feed a tracked statistic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatSelector {
    Resource(ResourceId),
    Tag(String),
}

/// Maps production or consumption of some resources onto a named stat path,
/// e.g. `total_energy_produced` fed by every produced resource tagged
/// `energy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedStatRule {
    pub path: String,
    pub source: StatSource,
    pub selector: StatSelector,
}

impl TrackedStatRule {
    pub fn matches(&self, source: StatSource, resource: ResourceId, tags: &[String]) -> bool {
        if self.source != source {
            return false;
        }
        match &self.selector {
            StatSelector::Resource(id) => *id == resource,
            StatSelector::Tag(tag) => tags.iter().any(|t| t == tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_keys() {
        let stat = UnlockCondition::StatThreshold {
            stat: "total_energy_produced".into(),
            value: Fixed64::from_num(500),
        };
        assert_eq!(stat.key(), ConditionKey::Stat("total_energy_produced".into()));

        let research = UnlockCondition::ResearchComplete { tech: TechId(4) };
        assert_eq!(research.key(), ConditionKey::Research(TechId(4)));

        let kill = UnlockCondition::KillCount {
            unit: "bacterium".into(),
            value: 10,
        };
        assert_eq!(kill.key(), ConditionKey::Kill("bacterium".into()));
    }

    #[test]
    fn stat_rule_matches_by_tag_and_source() {
        let rule = TrackedStatRule {
            path: "total_energy_produced".into(),
            source: StatSource::Produced,
            selector: StatSelector::Tag("energy".into()),
        };
        let tags = vec!["energy".to_string()];
        assert!(rule.matches(StatSource::Produced, ResourceId(0), &tags));
        assert!(!rule.matches(StatSource::Consumed, ResourceId(0), &tags));
        assert!(!rule.matches(StatSource::Produced, ResourceId(0), &[]));
    }

    #[test]
    fn stat_rule_matches_by_resource() {
        let rule = TrackedStatRule {
            path: "glucose_burned".into(),
            source: StatSource::Consumed,
            selector: StatSelector::Resource(ResourceId(3)),
        };
        assert!(rule.matches(StatSource::Consumed, ResourceId(3), &[]));
        assert!(!rule.matches(StatSource::Consumed, ResourceId(4), &[]));
    }
}
