//! The session context: one bus, one kernel, one progression dispatcher.
//!
//! The dispatcher is shared with its bus handler through `Rc<RefCell<..>>`.
//! The handler borrows it only while recording the event, then releases the
//! borrow before publishing `EntryUnlocked`, so subscribers to unlocks may
//! read the dispatcher through [`Session::progression`] handles they hold.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use vitalis_core::event::{
    Event, EventBus, EventKind, HandlerError, PassiveListener, ReactiveHandler,
};
use vitalis_core::fixed::{Fixed64, f64_to_fixed64};
use vitalis_core::id::{BuildingId, ResourceId, SubscriptionToken};
use vitalis_core::kernel::{FrameSummary, Kernel, KernelSnapshot};
use vitalis_core::registry::Registry;
use vitalis_data::load_content;
use vitalis_progression::dispatcher::ProgressionDispatcher;
use vitalis_progression::persistence::{FileStore, MemoryStore, ProgressStore};

use crate::config::SessionConfig;
use crate::error::SessionError;

/// Event kinds the dispatcher consumes.
const PROGRESSION_KINDS: [EventKind; 5] = [
    EventKind::ResourcesProduced,
    EventKind::ResourcesConsumed,
    EventKind::EnemyKilled,
    EventKind::ResearchCompleted,
    EventKind::ItemCountReached,
];

pub struct Session {
    registry: Arc<Registry>,
    bus: EventBus,
    kernel: Kernel,
    progression: Rc<RefCell<ProgressionDispatcher>>,
    progression_tokens: Vec<SubscriptionToken>,
    /// Last whole count published per watched item.
    reported_items: BTreeMap<ResourceId, u32>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("clock", &self.kernel.clock())
            .field("buildings", &self.kernel.building_count())
            .field("progression", &self.progression)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Wire a session over already-loaded content.
    pub fn new(registry: Arc<Registry>, config: &SessionConfig, store: Box<dyn ProgressStore>) -> Self {
        let bus = EventBus::new(config.bus);
        let kernel = Kernel::new(Arc::clone(&registry), config.kernel);
        let dispatcher = ProgressionDispatcher::new(Arc::clone(&registry), config.progression, store);
        let mut session = Self {
            registry,
            bus,
            kernel,
            progression: Rc::new(RefCell::new(dispatcher)),
            progression_tokens: Vec::new(),
            reported_items: BTreeMap::new(),
        };
        session.attach_progression();
        session
    }

    /// Load content and open the configured save store.
    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        let dir = config.content_dir.as_deref().ok_or(SessionError::NoContent)?;
        let content = load_content(dir)?;
        if !content.report.is_clean() {
            tracing::warn!(skipped = content.report.skipped.len(), "content loaded with skipped records");
        }
        let store: Box<dyn ProgressStore> = match &config.save.path {
            Some(path) => Box::new(FileStore::new(path, config.save.format)),
            None => Box::new(MemoryStore::new()),
        };
        Ok(Self::new(Arc::new(content.registry), config, store))
    }

    fn attach_progression(&mut self) {
        for kind in PROGRESSION_KINDS {
            let progression = Rc::clone(&self.progression);
            let handler: ReactiveHandler = Box::new(move |event, bus| {
                let unlocked = {
                    let mut dispatcher = progression.try_borrow_mut().map_err(|_| HandlerError::Busy)?;
                    dispatcher.handle_event(event);
                    dispatcher.drain_unlocked()
                };
                for entry in unlocked {
                    bus.publish(Event::EntryUnlocked { entry });
                }
                Ok(())
            });
            let token = self.bus.subscribe(kind, handler);
            self.progression_tokens.push(token);
        }
    }

    // -----------------------------------------------------------------------
    // Frame
    // -----------------------------------------------------------------------

    /// Advance one frame of `dt` seconds.
    pub fn update(&mut self, dt: f64) -> FrameSummary {
        let dt = f64_to_fixed64(dt);
        let summary = self.kernel.update(dt, &mut self.bus);
        self.report_item_counts();
        self.flush_unlocks();
        if let Ok(mut dispatcher) = self.progression.try_borrow_mut() {
            dispatcher.tick(dt);
        }
        summary
    }

    /// Publish `ItemCountReached` for items some entry waits on, whenever
    /// the whole count held changes.
    fn report_item_counts(&mut self) {
        let watched = match self.progression.try_borrow() {
            Ok(dispatcher) => dispatcher.watched_items(),
            Err(_) => return,
        };
        for item in watched {
            let count = self.kernel.quantity(item).floor().saturating_to_num::<u32>();
            if self.reported_items.get(&item) == Some(&count) {
                continue;
            }
            self.reported_items.insert(item, count);
            self.bus.publish(Event::ItemCountReached { item, count });
        }
    }

    /// Publish unlocks that happened outside a bus handler (initial
    /// unconditional entries, direct stat records).
    fn flush_unlocks(&mut self) {
        let pending = match self.progression.try_borrow_mut() {
            Ok(mut dispatcher) => dispatcher.drain_unlocked(),
            Err(_) => return,
        };
        for entry in pending {
            self.bus.publish(Event::EntryUnlocked { entry });
        }
    }

    // -----------------------------------------------------------------------
    // Gameplay operations (by content name)
    // -----------------------------------------------------------------------

    pub fn register_building(&mut self, building_type: &str, x: i32, y: i32) -> Result<BuildingId, SessionError> {
        let id = self
            .registry
            .building_id(building_type)
            .ok_or_else(|| unknown("building type", building_type))?;
        Ok(self.kernel.register_building(id, x, y, &mut self.bus)?)
    }

    pub fn unregister_building(&mut self, building: BuildingId) -> Result<(), SessionError> {
        self.kernel.unregister_building(building, &mut self.bus)?;
        Ok(())
    }

    pub fn credit(&mut self, resource: &str, amount: f64) -> Result<(), SessionError> {
        let id = self.resource(resource)?;
        Ok(self.kernel.credit(id, f64_to_fixed64(amount))?)
    }

    pub fn debit(&mut self, resource: &str, amount: f64) -> Result<(), SessionError> {
        let id = self.resource(resource)?;
        Ok(self.kernel.debit(id, f64_to_fixed64(amount))?)
    }

    pub fn quantity(&self, resource: &str) -> Result<Fixed64, SessionError> {
        Ok(self.kernel.quantity(self.resource(resource)?))
    }

    /// Returns `false` if the research was already complete.
    pub fn complete_research(&mut self, tech: &str) -> Result<bool, SessionError> {
        let id = self.registry.tech_id(tech).ok_or_else(|| unknown("research", tech))?;
        Ok(self.kernel.complete_research(id, &mut self.bus)?)
    }

    pub fn record_kill(&mut self, unit: &str) {
        self.bus.publish(Event::EnemyKilled { unit: unit.to_string() });
    }

    /// Add to a custom stat path. Returns the number of entries unlocked;
    /// their events go out with the next frame.
    pub fn record_stat(&mut self, path: &str, delta: f64) -> usize {
        match self.progression.try_borrow_mut() {
            Ok(mut dispatcher) => dispatcher.record_stat(path, f64_to_fixed64(delta)),
            Err(_) => {
                tracing::warn!(path, delta, "record_stat: progression is busy, stat dropped");
                0
            }
        }
    }

    pub fn save(&mut self) -> Result<(), SessionError> {
        Ok(self.progression_mut().save_now()?)
    }

    fn resource(&self, name: &str) -> Result<ResourceId, SessionError> {
        self.registry.resource_id(name).ok_or_else(|| unknown("resource", name))
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Publish a gameplay event from outside the kernel.
    pub fn publish(&mut self, event: Event) {
        self.bus.publish(event);
    }

    pub fn subscribe(&mut self, kind: EventKind, handler: ReactiveHandler) -> SubscriptionToken {
        self.bus.subscribe(kind, handler)
    }

    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) -> SubscriptionToken {
        self.bus.on_passive(kind, listener)
    }

    /// Progression's own subscriptions cannot be removed this way.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        if self.progression_tokens.contains(&token) {
            return false;
        }
        self.bus.unsubscribe(token)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    #[cfg(test)]
    fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn progression(&self) -> Ref<'_, ProgressionDispatcher> {
        self.progression.borrow()
    }

    pub fn progression_mut(&self) -> RefMut<'_, ProgressionDispatcher> {
        self.progression.borrow_mut()
    }

    /// Shared handle for subscribers that want to read unlock state.
    pub fn progression_handle(&self) -> Rc<RefCell<ProgressionDispatcher>> {
        Rc::clone(&self.progression)
    }

    pub fn is_unlocked(&self, entry: &str) -> bool {
        self.progression.borrow().is_unlocked_name(entry)
    }

    pub fn snapshot(&self) -> KernelSnapshot {
        self.kernel.snapshot()
    }
}

fn unknown(kind: &'static str, name: &str) -> SessionError {
    tracing::warn!(kind, name, "unknown content name");
    SessionError::UnknownName {
        kind,
        name: name.to_string(),
    }
}
