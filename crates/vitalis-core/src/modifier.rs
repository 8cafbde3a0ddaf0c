//! Multiplicative output modifiers.
//!
//! A [`Modifier`] is a named source (a disease, an upgrade, a buff) carrying
//! factors keyed by resource id or resource tag. The [`ModifierStack`] folds
//! every applicable factor in canonical source order, so the result does not
//! depend on the order modifiers were added. Modifiers never subtract: a
//! factor below zero is clamped to zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fixed::Fixed64;
use crate::id::ResourceId;

/// What a factor applies to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ModifierKey {
    /// A single resource.
    Resource(ResourceId),
    /// Every resource carrying this display tag.
    Tag(String),
}

impl ModifierKey {
    /// Whether this key selects `resource` (which carries `tags`).
    pub fn matches(&self, resource: ResourceId, tags: &[String]) -> bool {
        match self {
            ModifierKey::Resource(id) => *id == resource,
            ModifierKey::Tag(tag) => tags.iter().any(|t| t == tag),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub source: String,
    pub factors: Vec<(ModifierKey, Fixed64)>,
}

impl Modifier {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            factors: Vec::new(),
        }
    }

    pub fn with_factor(mut self, key: ModifierKey, factor: Fixed64) -> Self {
        self.factors.push((key, factor));
        self
    }
}

/// Active modifiers keyed by source id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModifierStack {
    modifiers: BTreeMap<String, Vec<(ModifierKey, Fixed64)>>,
}

impl ModifierStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a modifier, replacing any modifier with the same source.
    /// Returns `true` if a previous modifier was replaced.
    pub fn add(&mut self, modifier: Modifier) -> bool {
        let Modifier { source, factors } = modifier;
        let factors = factors
            .into_iter()
            .map(|(key, factor)| {
                if factor < Fixed64::ZERO {
                    tracing::warn!(%source, ?key, %factor, "negative modifier factor clamped to zero");
                    (key, Fixed64::ZERO)
                } else {
                    (key, factor)
                }
            })
            .collect();
        self.modifiers.insert(source, factors).is_some()
    }

    /// Remove the modifier for `source`. Returns `false` if none was active.
    pub fn remove(&mut self, source: &str) -> bool {
        self.modifiers.remove(source).is_some()
    }

    pub fn contains(&self, source: &str) -> bool {
        self.modifiers.contains_key(source)
    }

    pub fn factors(&self, source: &str) -> Option<&[(ModifierKey, Fixed64)]> {
        self.modifiers.get(source).map(Vec::as_slice)
    }

    /// Product of every factor that applies to `resource`, folded in
    /// source order. `1` when nothing applies.
    pub fn multiplier_for(&self, resource: ResourceId, tags: &[String]) -> Fixed64 {
        self.modifiers
            .values()
            .flatten()
            .filter(|(key, _)| key.matches(resource, tags))
            .fold(Fixed64::ONE, |acc, (_, factor)| acc.saturating_mul(*factor))
    }

    /// Scale a base output amount.
    pub fn apply(&self, resource: ResourceId, tags: &[String], base: Fixed64) -> Fixed64 {
        base.saturating_mul(self.multiplier_for(resource, tags))
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }

    /// Sources in canonical order.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.modifiers.keys().map(String::as_str)
    }
}
