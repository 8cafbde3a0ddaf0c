//! The progression dispatcher: owns the unlocked set and statistics and
//! reacts to gameplay events.
//!
//! # Reverse index
//!
//! Every locked entry sits in exactly one bucket keyed by the
//! [`ConditionKey`] it waits on. A statistic update touches a handful of
//! keys and re-checks only those buckets, so a production event costs
//! O(1) lookups plus O(k) condition checks for the k entries that could
//! possibly be affected. [`ProgressionDispatcher::recheck_all`] is the
//! full-scan equivalent.
//!
//! # Persistence
//!
//! Every unlock saves synchronously through the injected
//! [`ProgressStore`]. A failed save is logged and leaves the dispatcher
//! dirty; memory stays authoritative and the save is retried on the next
//! unlock or when the autosave timer in [`ProgressionDispatcher::tick`]
//! fires.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vitalis_core::event::Event;
use vitalis_core::fixed::{Fixed64, f64_to_fixed64};
use vitalis_core::id::{EntryId, ResourceId, TechId};
use vitalis_core::registry::Registry;
use vitalis_core::unlock::{ConditionKey, EntryDef, StatSource};

use crate::condition::{self, UnlockHint};
use crate::persistence::{PersistenceError, ProgressStore};
use crate::snapshot::{ProgressSnapshot, TrackedStats, unix_timestamp};
use crate::stats::{ProgressionStats, consumed_path, produced_path};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionConfig {
    /// Seconds between autosave attempts while unsaved changes exist.
    pub autosave_interval: f64,
}

impl Default for ProgressionConfig {
    fn default() -> Self {
        Self {
            autosave_interval: 60.0,
        }
    }
}

/// Called once per newly unlocked entry with its definition (and so its
/// condition).
pub type UnlockCallback = Box<dyn FnMut(EntryId, &EntryDef)>;

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct ProgressionDispatcher {
    registry: Arc<Registry>,
    autosave_interval: Fixed64,
    unlocked: BTreeSet<EntryId>,
    /// Unlock order, for display and saves.
    unlock_order: Vec<EntryId>,
    buckets: BTreeMap<ConditionKey, Vec<EntryId>>,
    stats: ProgressionStats,
    store: Box<dyn ProgressStore>,
    callbacks: Vec<UnlockCallback>,
    /// Unlocked since the last [`Self::drain_unlocked`].
    fresh: Vec<EntryId>,
    dirty: bool,
    since_save: Fixed64,
    save_failures: u64,
}

impl std::fmt::Debug for ProgressionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressionDispatcher")
            .field("unlocked", &self.unlocked.len())
            .field("pending", &self.pending_count())
            .field("dirty", &self.dirty)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl ProgressionDispatcher {
    /// Load any saved progress from `store`, then index every entry.
    ///
    /// Entries with no condition, and entries the loaded statistics already
    /// satisfy, unlock here; they are reported by the first
    /// [`Self::drain_unlocked`].
    pub fn new(registry: Arc<Registry>, config: ProgressionConfig, store: Box<dyn ProgressStore>) -> Self {
        let mut dispatcher = Self {
            registry,
            autosave_interval: f64_to_fixed64(config.autosave_interval),
            unlocked: BTreeSet::new(),
            unlock_order: Vec::new(),
            buckets: BTreeMap::new(),
            stats: ProgressionStats::new(),
            store,
            callbacks: Vec::new(),
            fresh: Vec::new(),
            dirty: false,
            since_save: Fixed64::ZERO,
            save_failures: 0,
        };

        match dispatcher.store.load() {
            Ok(Some(snapshot)) => dispatcher.restore(&snapshot),
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, "progression load failed, starting fresh"),
        }
        dispatcher.build_index();
        dispatcher
    }

    fn build_index(&mut self) {
        let registry = Arc::clone(&self.registry);
        let mut ready = Vec::new();
        for (id, def) in registry.entries() {
            if self.unlocked.contains(&id) {
                continue;
            }
            match &def.condition {
                None => ready.push(id),
                Some(cond) if condition::is_satisfied(cond, &self.stats) => ready.push(id),
                Some(cond) => self.buckets.entry(cond.key()).or_default().push(id),
            }
        }
        tracing::debug!(
            entries = registry.entry_count(),
            pending = self.pending_count(),
            buckets = self.buckets.len(),
            "unlock index built"
        );
        self.unlock_batch(ready);
    }

    fn restore(&mut self, snapshot: &ProgressSnapshot) {
        let tracked = &snapshot.tracked_stats;
        for (path, value) in &tracked.counters {
            self.stats.add_counter(path, *value);
        }
        for (unit, count) in &tracked.kills {
            self.stats.set_kills_at_least(unit, *count);
        }
        for (name, count) in &tracked.items {
            match self.registry.resource_id(name) {
                Some(item) => {
                    self.stats.record_item(item, *count);
                }
                None => tracing::warn!(item = %name, "saved item no longer exists, skipped"),
            }
        }
        for name in &tracked.research {
            match self.registry.tech_id(name) {
                Some(tech) => {
                    self.stats.record_research(tech);
                }
                None => tracing::warn!(tech = %name, "saved research no longer exists, skipped"),
            }
        }
        for name in &snapshot.unlocked_entries {
            match self.registry.entry_id(name) {
                Some(entry) => {
                    if self.unlocked.insert(entry) {
                        self.unlock_order.push(entry);
                    }
                }
                None => tracing::warn!(entry = %name, "saved entry no longer exists, skipped"),
            }
        }
        tracing::info!(
            unlocked = self.unlocked.len(),
            version = snapshot.meta.save_version,
            "progression restored"
        );
    }

    /// Register a callback for future unlocks.
    pub fn on_unlock(&mut self, callback: UnlockCallback) {
        self.callbacks.push(callback);
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    /// Route a bus event to the matching handler. Returns the number of
    /// entries it unlocked.
    pub fn handle_event(&mut self, event: &Event) -> usize {
        match event {
            Event::ResourcesProduced { resources, .. } => resources
                .iter()
                .map(|(r, a)| self.on_resource_produced(*r, *a))
                .sum(),
            Event::ResourcesConsumed { resources, .. } => resources
                .iter()
                .map(|(r, a)| self.on_resource_consumed(*r, *a))
                .sum(),
            Event::EnemyKilled { unit } => self.on_enemy_killed(unit),
            Event::ResearchCompleted { tech } => self.on_research_complete(*tech),
            Event::ItemCountReached { item, count } => self.on_item_count_reached(*item, *count),
            _ => 0,
        }
    }

    pub fn on_resource_produced(&mut self, resource: ResourceId, amount: Fixed64) -> usize {
        self.on_resource_flow(StatSource::Produced, resource, amount)
    }

    pub fn on_resource_consumed(&mut self, resource: ResourceId, amount: Fixed64) -> usize {
        self.on_resource_flow(StatSource::Consumed, resource, amount)
    }

    fn on_resource_flow(&mut self, source: StatSource, resource: ResourceId, amount: Fixed64) -> usize {
        let registry = Arc::clone(&self.registry);
        let Some(name) = registry.resource_name(resource) else {
            tracing::warn!(?resource, "unknown resource in production event, skipped");
            return 0;
        };
        if amount <= Fixed64::ZERO {
            return 0;
        }

        let mut touched = vec![match source {
            StatSource::Produced => produced_path(name),
            StatSource::Consumed => consumed_path(name),
        }];
        let tags = registry.resource_tags(resource);
        for rule in registry.stat_rules() {
            if rule.matches(source, resource, tags) && !touched.contains(&rule.path) {
                touched.push(rule.path.clone());
            }
        }

        for path in &touched {
            self.stats.add_counter(path, amount);
        }
        self.dirty = true;

        touched
            .into_iter()
            .map(|path| self.recheck(&ConditionKey::Stat(path)))
            .sum()
    }

    pub fn on_enemy_killed(&mut self, unit: &str) -> usize {
        let tally = self.stats.record_kill(unit);
        tracing::debug!(unit, tally, "kill recorded");
        self.dirty = true;
        self.recheck(&ConditionKey::Kill(unit.to_string()))
    }

    /// Research needs no re-check: everything waiting on it unlocks.
    pub fn on_research_complete(&mut self, tech: TechId) -> usize {
        if !self.stats.record_research(tech) {
            return 0;
        }
        self.dirty = true;
        let waiting = self
            .buckets
            .remove(&ConditionKey::Research(tech))
            .unwrap_or_default();
        self.unlock_batch(waiting)
    }

    pub fn on_item_count_reached(&mut self, item: ResourceId, count: u32) -> usize {
        if !self.stats.record_item(item, count) {
            return 0;
        }
        self.dirty = true;
        self.recheck(&ConditionKey::Item(item))
    }

    /// Add to a gameplay statistic by path.
    pub fn record_stat(&mut self, path: &str, delta: Fixed64) -> usize {
        if delta <= Fixed64::ZERO {
            return 0;
        }
        self.stats.add_counter(path, delta);
        self.dirty = true;
        self.recheck(&ConditionKey::Stat(path.to_string()))
    }

    // -----------------------------------------------------------------------
    // Unlocking
    // -----------------------------------------------------------------------

    fn recheck(&mut self, key: &ConditionKey) -> usize {
        let Some(bucket) = self.buckets.get(key) else {
            return 0;
        };
        let ready: Vec<EntryId> = bucket
            .iter()
            .copied()
            .filter(|id| self.entry_satisfied(*id))
            .collect();
        self.unlock_batch(ready)
    }

    /// Check every locked entry against the statistics. Equivalent to the
    /// indexed handlers, at O(n) per call.
    pub fn recheck_all(&mut self) -> usize {
        let ready: Vec<EntryId> = self
            .buckets
            .values()
            .flatten()
            .copied()
            .filter(|id| self.entry_satisfied(*id))
            .collect();
        self.unlock_batch(ready)
    }

    fn entry_satisfied(&self, entry: EntryId) -> bool {
        self.registry
            .get_entry(entry)
            .and_then(|def| def.condition.as_ref())
            .is_some_and(|cond| condition::is_satisfied(cond, &self.stats))
    }

    /// Unlock `entry` regardless of its condition (scripted rewards, debug).
    /// Returns `false` if it was already unlocked or does not exist.
    pub fn unlock(&mut self, entry: EntryId) -> bool {
        if self.registry.get_entry(entry).is_none() {
            tracing::warn!(?entry, "unlock: unknown entry");
            return false;
        }
        self.unlock_batch(vec![entry]) == 1
    }

    fn unlock_batch(&mut self, entries: Vec<EntryId>) -> usize {
        let count = entries.into_iter().filter(|e| self.mark_unlocked(*e)).count();
        if count > 0 {
            self.persist();
        }
        count
    }

    fn mark_unlocked(&mut self, entry: EntryId) -> bool {
        if !self.unlocked.insert(entry) {
            return false;
        }
        self.unlock_order.push(entry);
        self.fresh.push(entry);
        self.dirty = true;

        let registry = Arc::clone(&self.registry);
        let Some(def) = registry.get_entry(entry) else {
            return true;
        };
        if let Some(cond) = &def.condition
            && let Some(bucket) = self.buckets.get_mut(&cond.key())
        {
            bucket.retain(|e| *e != entry);
            if bucket.is_empty() {
                self.buckets.remove(&cond.key());
            }
        }

        tracing::info!(entry = %def.name, category = %def.category, "entry unlocked");
        for callback in &mut self.callbacks {
            callback(entry, def);
        }
        true
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    fn persist(&mut self) {
        self.since_save = Fixed64::ZERO;
        if let Err(err) = self.save_now() {
            self.save_failures += 1;
            tracing::warn!(%err, failures = self.save_failures, "progression save failed, will retry");
        }
    }

    /// Save immediately. On success the dispatcher is clean.
    pub fn save_now(&mut self) -> Result<(), PersistenceError> {
        let snapshot = self.snapshot();
        self.store.save(&snapshot)?;
        self.dirty = false;
        Ok(())
    }

    /// Advance the autosave timer by `dt` seconds.
    pub fn tick(&mut self, dt: Fixed64) {
        if dt > Fixed64::ZERO {
            self.since_save = self.since_save.saturating_add(dt);
        }
        if self.dirty && self.since_save >= self.autosave_interval {
            self.persist();
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let registry = &self.registry;
        let entry_names = self
            .unlock_order
            .iter()
            .filter_map(|id| registry.get_entry(*id))
            .map(|def| def.name.clone())
            .collect();
        let tracked = TrackedStats {
            counters: self
                .stats
                .counters()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            kills: self
                .stats
                .kill_tallies()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            items: self
                .stats
                .items()
                .filter_map(|(id, n)| registry.resource_name(id).map(|name| (name.to_string(), n)))
                .collect(),
            research: self
                .stats
                .research()
                .filter_map(|t| registry.tech_name(t).map(str::to_string))
                .collect(),
        };
        ProgressSnapshot::new(unix_timestamp(), entry_names, tracked)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save_failures(&self) -> u64 {
        self.save_failures
    }

    pub fn store(&self) -> &dyn ProgressStore {
        self.store.as_ref()
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn is_unlocked(&self, entry: EntryId) -> bool {
        self.unlocked.contains(&entry)
    }

    pub fn is_unlocked_name(&self, name: &str) -> bool {
        self.registry
            .entry_id(name)
            .is_some_and(|id| self.is_unlocked(id))
    }

    /// Progress towards a locked entry. `None` once unlocked, or for
    /// unknown or unconditional entries.
    pub fn unlock_hint(&self, entry: EntryId) -> Option<UnlockHint> {
        if self.is_unlocked(entry) {
            return None;
        }
        let cond = self.registry.get_entry(entry)?.condition.as_ref()?;
        Some(condition::progress(cond, &self.stats, &self.registry))
    }

    /// Unlocked entries in unlock order.
    pub fn unlocked_entries(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.unlock_order.iter().copied()
    }

    pub fn unlocked_count(&self) -> usize {
        self.unlocked.len()
    }

    /// Entries unlocked since the previous call.
    pub fn drain_unlocked(&mut self) -> Vec<EntryId> {
        std::mem::take(&mut self.fresh)
    }

    pub fn stats(&self) -> &ProgressionStats {
        &self.stats
    }

    /// Locked entries still waiting in a bucket.
    pub fn pending_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn bucket_len(&self, key: &ConditionKey) -> usize {
        self.buckets.get(key).map_or(0, Vec::len)
    }

    /// Items some locked entry is waiting on.
    pub fn watched_items(&self) -> Vec<ResourceId> {
        self.buckets
            .keys()
            .filter_map(|k| match k {
                ConditionKey::Item(item) => Some(*item),
                _ => None,
            })
            .collect()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}
