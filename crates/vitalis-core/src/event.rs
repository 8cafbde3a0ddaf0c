//! Synchronous publish/subscribe event bus.
//!
//! Every state transition in the kernel and the progression layer is
//! published here as a typed [`Event`]. Delivery happens in the publisher's
//! stack, in `(priority, registration order)` order, and each handler is
//! isolated: an `Err` or a panic is caught at the bus boundary, logged, and
//! counted while sibling handlers still run.
//!
//! # Re-entrancy
//!
//! Handlers receive `&mut EventBus` and may publish follow-up events,
//! subscribe, or unsubscribe (themselves included). Follow-ups are delivered
//! either depth-first ([`DeliveryMode::Immediate`]) or FIFO after the current
//! event ([`DeliveryMode::Deferred`]). In both modes a cascade deeper than
//! [`BusConfig::max_cascade_depth`] is dropped with a warning.
//!
//! A handler that is currently running is never re-entered. An event that
//! reaches it recursively is queued on its subscription and delivered, in
//! order and at its own cascade depth, as soon as the handler returns.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::fixed::Fixed64;
use crate::id::*;

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// A simulation or gameplay event with a fixed payload shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // -- Economy --
    ResourcesProduced {
        building: Option<BuildingId>,
        resources: Vec<(ResourceId, Fixed64)>,
    },
    ResourcesConsumed {
        building: Option<BuildingId>,
        resources: Vec<(ResourceId, Fixed64)>,
    },
    RecipeCompleted {
        building: BuildingId,
        recipe: RecipeId,
        inputs: Vec<(ResourceId, Fixed64)>,
        outputs: Vec<(ResourceId, Fixed64)>,
    },

    // -- Buildings --
    BuildingRegistered {
        building: BuildingId,
        building_type: BuildingTypeId,
        x: i32,
        y: i32,
    },
    BuildingUnregistered {
        building: BuildingId,
        x: i32,
        y: i32,
    },

    // -- Biomarkers --
    BiomarkerUpdated {
        biomarker: BiomarkerId,
        old_value: Fixed64,
        new_value: Fixed64,
    },
    BiomarkerCriticalLow {
        biomarker: BiomarkerId,
        value: Fixed64,
    },
    BiomarkerCriticalHigh {
        biomarker: BiomarkerId,
        value: Fixed64,
    },

    // -- Diseases --
    DiseaseTriggered {
        disease: DiseaseId,
        tier: u8,
    },
    DiseaseProgressed {
        disease: DiseaseId,
        tier: u8,
    },
    DiseaseRemitted {
        disease: DiseaseId,
        tier: u8,
    },

    // -- Gameplay / progression --
    ResearchCompleted {
        tech: TechId,
    },
    EnemyKilled {
        unit: String,
    },
    ItemCountReached {
        item: ResourceId,
        count: u32,
    },
    EntryUnlocked {
        entry: EntryId,
    },
}

/// Discriminant tag for event types, used for subscription and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    ResourcesProduced,
    ResourcesConsumed,
    RecipeCompleted,
    BuildingRegistered,
    BuildingUnregistered,
    BiomarkerUpdated,
    BiomarkerCriticalLow,
    BiomarkerCriticalHigh,
    DiseaseTriggered,
    DiseaseProgressed,
    DiseaseRemitted,
    ResearchCompleted,
    EnemyKilled,
    ItemCountReached,
    EntryUnlocked,
}

/// Total number of event kinds.
const EVENT_KIND_COUNT: usize = 15;

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; EVENT_KIND_COUNT] = [
        EventKind::ResourcesProduced,
        EventKind::ResourcesConsumed,
        EventKind::RecipeCompleted,
        EventKind::BuildingRegistered,
        EventKind::BuildingUnregistered,
        EventKind::BiomarkerUpdated,
        EventKind::BiomarkerCriticalLow,
        EventKind::BiomarkerCriticalHigh,
        EventKind::DiseaseTriggered,
        EventKind::DiseaseProgressed,
        EventKind::DiseaseRemitted,
        EventKind::ResearchCompleted,
        EventKind::EnemyKilled,
        EventKind::ItemCountReached,
        EventKind::EntryUnlocked,
    ];

    /// Convert to usize index for array lookups.
    fn index(self) -> usize {
        self as usize
    }
}

impl Event {
    /// Get the discriminant kind for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ResourcesProduced { .. } => EventKind::ResourcesProduced,
            Event::ResourcesConsumed { .. } => EventKind::ResourcesConsumed,
            Event::RecipeCompleted { .. } => EventKind::RecipeCompleted,
            Event::BuildingRegistered { .. } => EventKind::BuildingRegistered,
            Event::BuildingUnregistered { .. } => EventKind::BuildingUnregistered,
            Event::BiomarkerUpdated { .. } => EventKind::BiomarkerUpdated,
            Event::BiomarkerCriticalLow { .. } => EventKind::BiomarkerCriticalLow,
            Event::BiomarkerCriticalHigh { .. } => EventKind::BiomarkerCriticalHigh,
            Event::DiseaseTriggered { .. } => EventKind::DiseaseTriggered,
            Event::DiseaseProgressed { .. } => EventKind::DiseaseProgressed,
            Event::DiseaseRemitted { .. } => EventKind::DiseaseRemitted,
            Event::ResearchCompleted { .. } => EventKind::ResearchCompleted,
            Event::EnemyKilled { .. } => EventKind::EnemyKilled,
            Event::ItemCountReached { .. } => EventKind::ItemCountReached,
            Event::EntryUnlocked { .. } => EventKind::EntryUnlocked,
        }
    }

    /// Check the payload. Quantities must be non-negative and names
    /// non-empty; a disease tier is at least 1.
    pub fn validate(&self) -> Result<(), InvalidEvent> {
        let check_amounts = |list: &[(ResourceId, Fixed64)]| {
            match list.iter().find(|(_, amount)| *amount < Fixed64::ZERO) {
                Some((resource, amount)) => Err(InvalidEvent::NegativeQuantity {
                    resource: *resource,
                    amount: *amount,
                }),
                None => Ok(()),
            }
        };
        match self {
            Event::ResourcesProduced { resources, .. }
            | Event::ResourcesConsumed { resources, .. } => check_amounts(resources),
            Event::RecipeCompleted {
                inputs, outputs, ..
            } => {
                check_amounts(inputs)?;
                check_amounts(outputs)
            }
            Event::DiseaseTriggered { tier, .. } | Event::DiseaseProgressed { tier, .. } => {
                if *tier == 0 {
                    Err(InvalidEvent::ZeroTier)
                } else {
                    Ok(())
                }
            }
            Event::EnemyKilled { unit } if unit.is_empty() => Err(InvalidEvent::EmptyName),
            _ => Ok(()),
        }
    }
}

/// Why [`Event::validate`] rejected a payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidEvent {
    #[error("negative quantity {amount} for resource {resource:?}")]
    NegativeQuantity { resource: ResourceId, amount: Fixed64 },
    #[error("empty name in payload")]
    EmptyName,
    #[error("disease tier must be at least 1")]
    ZeroTier,
}

/// Error a reactive handler may return. Caught and logged by the bus.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler's shared state was already borrowed (re-entrant call).
    #[error("handler state is busy")]
    Busy,
    #[error("{0}")]
    Failed(String),
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// A passive listener receives events read-only.
pub type PassiveListener = Box<dyn FnMut(&Event)>;

/// A reactive handler receives the event and the bus, through which it may
/// publish follow-ups or change subscriptions.
pub type ReactiveHandler = Box<dyn FnMut(&Event, &mut EventBus) -> Result<(), HandlerError>>;

/// Subscriber that can be either passive or reactive.
enum Subscriber {
    Passive(PassiveListener),
    Reactive(ReactiveHandler),
}

impl Subscriber {
    fn call(&mut self, event: &Event, bus: &mut EventBus) -> Result<(), HandlerError> {
        match self {
            Subscriber::Passive(listener) => {
                listener(event);
                Ok(())
            }
            Subscriber::Reactive(handler) => handler(event, bus),
        }
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subscriber::Passive(_) => write!(f, "Passive(<fn>)"),
            Subscriber::Reactive(_) => write!(f, "Reactive(<fn>)"),
        }
    }
}

/// Priority level for event subscribers. Lower priorities run first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SubscriberPriority {
    Pre = 0,
    #[default]
    Normal = 1,
    Post = 2,
}

/// Wraps a [`Subscriber`] with its kind, priority and insertion order.
/// `subscriber` is `None` while the handler is executing; events that reach
/// it meanwhile wait in `missed`.
#[derive(Debug)]
struct SubscriberEntry {
    kind: EventKind,
    subscriber: Option<Subscriber>,
    priority: SubscriberPriority,
    insertion_order: u64,
    missed: VecDeque<(Event, u32)>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How follow-up events published from inside a handler are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Depth-first: a follow-up is delivered before `publish` returns.
    #[default]
    Immediate,
    /// Breadth-first: follow-ups queue behind the event being delivered and
    /// drain before the outermost `publish` returns.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub mode: DeliveryMode,
    /// Maximum nesting of follow-up events. A top-level publish is depth 1.
    pub max_cascade_depth: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Immediate,
            max_cascade_depth: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

pub struct EventBus {
    config: BusConfig,

    subscribers: SlotMap<SubscriptionToken, SubscriberEntry>,

    /// Delivery order per kind, sorted by `(priority, insertion_order)`.
    by_kind: [Vec<SubscriptionToken>; EVENT_KIND_COUNT],

    /// Events accepted per kind.
    emitted: [u64; EVENT_KIND_COUNT],

    /// Monotonically increasing counter for stable ordering.
    next_insertion_order: u64,

    /// Depth of the event currently being delivered (0 when idle).
    depth: u32,

    /// Follow-ups waiting in deferred mode, with their cascade depth.
    queue: VecDeque<(Event, u32)>,

    handler_failures: u64,
    cascade_overflows: u64,
    rejected: u64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("subscribers", &self.subscribers.len())
            .field("depth", &self.depth)
            .field("handler_failures", &self.handler_failures)
            .field("cascade_overflows", &self.cascade_overflows)
            .finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscribers: SlotMap::with_key(),
            by_kind: Default::default(),
            emitted: [0; EVENT_KIND_COUNT],
            next_insertion_order: 0,
            depth: 0,
            queue: VecDeque::new(),
            handler_failures: 0,
            cascade_overflows: 0,
            rejected: 0,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Subscription
    // -----------------------------------------------------------------------

    /// Register a reactive handler with `Normal` priority.
    pub fn subscribe(&mut self, kind: EventKind, handler: ReactiveHandler) -> SubscriptionToken {
        self.subscribe_with_priority(kind, SubscriberPriority::Normal, handler)
    }

    /// Register a reactive handler with an explicit priority. Handlers of
    /// equal priority run in registration order.
    pub fn subscribe_with_priority(
        &mut self,
        kind: EventKind,
        priority: SubscriberPriority,
        handler: ReactiveHandler,
    ) -> SubscriptionToken {
        self.insert(kind, priority, Subscriber::Reactive(handler))
    }

    /// Register a read-only listener with `Normal` priority.
    pub fn on_passive(&mut self, kind: EventKind, listener: PassiveListener) -> SubscriptionToken {
        self.insert(kind, SubscriberPriority::Normal, Subscriber::Passive(listener))
    }

    fn insert(
        &mut self,
        kind: EventKind,
        priority: SubscriberPriority,
        subscriber: Subscriber,
    ) -> SubscriptionToken {
        let order = self.next_insertion_order;
        self.next_insertion_order += 1;
        let token = self.subscribers.insert(SubscriberEntry {
            kind,
            subscriber: Some(subscriber),
            priority,
            insertion_order: order,
            missed: VecDeque::new(),
        });

        let subscribers = &self.subscribers;
        let list = &mut self.by_kind[kind.index()];
        let pos = list.partition_point(|t| {
            subscribers
                .get(*t)
                .is_some_and(|entry| (entry.priority, entry.insertion_order) <= (priority, order))
        });
        list.insert(pos, token);
        token
    }

    /// Remove a subscription. Returns `false` if the token was already
    /// disposed. Safe to call from inside a handler, including for the
    /// handler's own token.
    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let Some(entry) = self.subscribers.remove(token) else {
            return false;
        };
        self.by_kind[entry.kind.index()].retain(|t| *t != token);
        true
    }

    pub fn is_subscribed(&self, token: SubscriptionToken) -> bool {
        self.subscribers.contains_key(token)
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.by_kind[kind.index()].len()
    }

    // -----------------------------------------------------------------------
    // Publishing
    // -----------------------------------------------------------------------

    /// Publish an event to every subscriber of its kind.
    ///
    /// Invalid payloads and cascades past the configured depth are dropped
    /// with a warning.
    pub fn publish(&mut self, event: Event) {
        let kind = event.kind();
        if let Err(reason) = event.validate() {
            tracing::warn!(?kind, %reason, "rejected invalid event");
            self.rejected += 1;
            return;
        }

        let depth = self.depth + 1;
        if depth > self.config.max_cascade_depth {
            tracing::warn!(
                ?kind,
                depth,
                max = self.config.max_cascade_depth,
                "event cascade too deep, dropping event"
            );
            self.cascade_overflows += 1;
            return;
        }

        self.emitted[kind.index()] += 1;

        match self.config.mode {
            DeliveryMode::Immediate => self.deliver(&event, depth),
            DeliveryMode::Deferred => {
                if self.depth > 0 {
                    self.queue.push_back((event, depth));
                    return;
                }
                self.deliver(&event, depth);
                while let Some((queued, queued_depth)) = self.queue.pop_front() {
                    self.deliver(&queued, queued_depth);
                }
            }
        }
    }

    /// Deliver one event to a snapshot of its subscriber list. Handlers
    /// removed mid-delivery are skipped; handlers added mid-delivery are not
    /// in the snapshot.
    fn deliver(&mut self, event: &Event, depth: u32) {
        let kind = event.kind();
        let targets = self.by_kind[kind.index()].clone();
        let outer_depth = std::mem::replace(&mut self.depth, depth);

        for token in targets {
            let Some(entry) = self.subscribers.get_mut(token) else {
                continue;
            };
            // None means the handler is running further up the stack; it
            // picks the event up when it returns.
            let Some(mut subscriber) = entry.subscriber.take() else {
                entry.missed.push_back((event.clone(), depth));
                continue;
            };

            self.invoke(&mut subscriber, event);

            // Catch up on events that arrived while the handler ran. If it
            // unsubscribed itself, its slot is gone and the closure and its
            // backlog are dropped here.
            while let Some(entry) = self.subscribers.get_mut(token) {
                let Some((missed, missed_depth)) = entry.missed.pop_front() else {
                    entry.subscriber = Some(subscriber);
                    break;
                };
                self.depth = missed_depth;
                self.invoke(&mut subscriber, &missed);
            }
            self.depth = depth;
        }

        self.depth = outer_depth;
    }

    /// Run one handler, containing its error or panic.
    fn invoke(&mut self, subscriber: &mut Subscriber, event: &Event) {
        let kind = event.kind();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| subscriber.call(event, self)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                self.handler_failures += 1;
                tracing::warn!(?kind, %error, "event handler failed");
            }
            Err(_) => {
                self.handler_failures += 1;
                tracing::warn!(?kind, "event handler panicked");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Number of accepted events of this kind since creation.
    pub fn emitted_count(&self, kind: EventKind) -> u64 {
        self.emitted[kind.index()]
    }

    /// Total accepted events across all kinds.
    pub fn total_emitted(&self) -> u64 {
        self.emitted.iter().sum()
    }

    /// Handlers that returned `Err` or panicked.
    pub fn handler_failures(&self) -> u64 {
        self.handler_failures
    }

    /// Events dropped for exceeding the cascade depth.
    pub fn cascade_overflows(&self) -> u64 {
        self.cascade_overflows
    }

    /// Events dropped by payload validation.
    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    /// Whether an event is currently being delivered.
    pub fn is_delivering(&self) -> bool {
        self.depth > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::f64_to_fixed64;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn kill(unit: &str) -> Event {
        Event::EnemyKilled {
            unit: unit.to_string(),
        }
    }

    fn recorder(log: &Rc<RefCell<Vec<String>>>, tag: &'static str) -> ReactiveHandler {
        let log = Rc::clone(log);
        Box::new(move |_, _| {
            log.borrow_mut().push(tag.to_string());
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Test 1: Delivery in registration order
    // -----------------------------------------------------------------------
    #[test]
    fn delivers_in_registration_order() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "a"));
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "b"));
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "c"));

        bus.publish(kill("slime"));

        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert_eq!(bus.emitted_count(EventKind::EnemyKilled), 1);
    }

    // -----------------------------------------------------------------------
    // Test 2: Priorities sort before registration order
    // -----------------------------------------------------------------------
    #[test]
    fn priority_orders_delivery() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe_with_priority(EventKind::EnemyKilled, SubscriberPriority::Post, recorder(&log, "post"));
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "normal"));
        bus.subscribe_with_priority(EventKind::EnemyKilled, SubscriberPriority::Pre, recorder(&log, "pre"));
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "normal2"));

        bus.publish(kill("slime"));

        assert_eq!(*log.borrow(), vec!["pre", "normal", "normal2", "post"]);
    }

    // -----------------------------------------------------------------------
    // Test 3: Only subscribers of the published kind run
    // -----------------------------------------------------------------------
    #[test]
    fn kinds_are_independent() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(EventKind::ResearchCompleted, recorder(&log, "research"));

        bus.publish(kill("slime"));
        assert!(log.borrow().is_empty());

        bus.publish(Event::ResearchCompleted { tech: TechId(0) });
        assert_eq!(log.borrow().len(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 4: Unsubscribe returns whether the token was live
    // -----------------------------------------------------------------------
    #[test]
    fn unsubscribe_disposes_token() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let token = bus.subscribe(EventKind::EnemyKilled, recorder(&log, "a"));

        assert!(bus.unsubscribe(token));
        assert!(!bus.unsubscribe(token));
        assert_eq!(bus.subscriber_count(EventKind::EnemyKilled), 0);

        bus.publish(kill("slime"));
        assert!(log.borrow().is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 5: Self-unsubscribe mid-delivery keeps siblings intact
    // -----------------------------------------------------------------------
    #[test]
    fn self_unsubscribe_mid_delivery() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let own_token: Rc<RefCell<Option<SubscriptionToken>>> = Rc::new(RefCell::new(None));

        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "a"));
        let token_slot = Rc::clone(&own_token);
        let log_b = Rc::clone(&log);
        let token = bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(move |_, bus| {
                log_b.borrow_mut().push("b".to_string());
                if let Some(t) = *token_slot.borrow() {
                    bus.unsubscribe(t);
                }
                Ok(())
            }),
        );
        *own_token.borrow_mut() = Some(token);
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "c"));

        bus.publish(kill("slime"));
        bus.publish(kill("slime"));

        assert_eq!(*log.borrow(), vec!["a", "b", "c", "a", "c"]);
        assert!(!bus.is_subscribed(token));
    }

    // -----------------------------------------------------------------------
    // Test 6: Unsubscribing a later sibling skips it for this delivery
    // -----------------------------------------------------------------------
    #[test]
    fn removed_sibling_is_skipped() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let victim: Rc<RefCell<Option<SubscriptionToken>>> = Rc::new(RefCell::new(None));

        let victim_slot = Rc::clone(&victim);
        bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(move |_, bus| {
                if let Some(t) = victim_slot.borrow_mut().take() {
                    bus.unsubscribe(t);
                }
                Ok(())
            }),
        );
        let t = bus.subscribe(EventKind::EnemyKilled, recorder(&log, "victim"));
        *victim.borrow_mut() = Some(t);
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "survivor"));

        bus.publish(kill("slime"));

        assert_eq!(*log.borrow(), vec!["survivor"]);
    }

    // -----------------------------------------------------------------------
    // Test 7: Subscribers added mid-delivery miss the in-flight event
    // -----------------------------------------------------------------------
    #[test]
    fn late_subscriber_misses_in_flight_event() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_inner = Rc::clone(&log);
        let added = Rc::new(RefCell::new(false));
        let added_flag = Rc::clone(&added);

        bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(move |_, bus| {
                if !*added_flag.borrow() {
                    *added_flag.borrow_mut() = true;
                    bus.subscribe(EventKind::EnemyKilled, recorder(&log_inner, "late"));
                }
                Ok(())
            }),
        );

        bus.publish(kill("slime"));
        assert!(log.borrow().is_empty());

        bus.publish(kill("slime"));
        assert_eq!(*log.borrow(), vec!["late"]);
    }

    // -----------------------------------------------------------------------
    // Test 8: Failing and panicking handlers are isolated
    // -----------------------------------------------------------------------
    #[test]
    fn handler_failures_are_isolated() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));

        bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(|_, _| Err(HandlerError::Failed("boom".into()))),
        );
        bus.subscribe(EventKind::EnemyKilled, Box::new(|_, _| panic!("handler panic")));
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "ok"));

        bus.publish(kill("slime"));

        assert_eq!(*log.borrow(), vec!["ok"]);
        assert_eq!(bus.handler_failures(), 2);

        // The panicking handler stays subscribed and keeps being isolated.
        bus.publish(kill("slime"));
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(bus.handler_failures(), 4);
    }

    // -----------------------------------------------------------------------
    // Test 9: Immediate mode delivers follow-ups depth-first
    // -----------------------------------------------------------------------
    #[test]
    fn immediate_mode_is_depth_first() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = Rc::clone(&log);
        bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(move |_, bus| {
                log_a.borrow_mut().push("kill-a".to_string());
                bus.publish(Event::EntryUnlocked { entry: EntryId(1) });
                Ok(())
            }),
        );
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "kill-b"));
        bus.subscribe(EventKind::EntryUnlocked, recorder(&log, "unlocked"));

        bus.publish(kill("slime"));

        assert_eq!(*log.borrow(), vec!["kill-a", "unlocked", "kill-b"]);
    }

    // -----------------------------------------------------------------------
    // Test 10: Deferred mode queues follow-ups behind the current event
    // -----------------------------------------------------------------------
    #[test]
    fn deferred_mode_is_fifo() {
        let mut bus = EventBus::new(BusConfig {
            mode: DeliveryMode::Deferred,
            ..BusConfig::default()
        });
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = Rc::clone(&log);
        bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(move |_, bus| {
                log_a.borrow_mut().push("kill-a".to_string());
                bus.publish(Event::EntryUnlocked { entry: EntryId(1) });
                Ok(())
            }),
        );
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "kill-b"));
        bus.subscribe(EventKind::EntryUnlocked, recorder(&log, "unlocked"));

        bus.publish(kill("slime"));

        assert_eq!(*log.borrow(), vec!["kill-a", "kill-b", "unlocked"]);
        assert!(!bus.is_delivering());
    }

    // -----------------------------------------------------------------------
    // Test 11: Cascade depth is bounded in both modes
    // -----------------------------------------------------------------------
    #[test]
    fn cascade_depth_is_bounded() {
        for mode in [DeliveryMode::Immediate, DeliveryMode::Deferred] {
            let mut bus = EventBus::new(BusConfig {
                mode,
                max_cascade_depth: 4,
            });

            // Each link forwards to the next kind, so no handler re-enters.
            bus.subscribe(
                EventKind::EnemyKilled,
                Box::new(|_, bus| {
                    bus.publish(Event::EntryUnlocked { entry: EntryId(0) });
                    Ok(())
                }),
            );
            bus.subscribe(
                EventKind::EntryUnlocked,
                Box::new(|_, bus| {
                    bus.publish(Event::ResearchCompleted { tech: TechId(0) });
                    Ok(())
                }),
            );
            bus.subscribe(
                EventKind::ResearchCompleted,
                Box::new(|_, bus| {
                    bus.publish(Event::ItemCountReached {
                        item: ResourceId(0),
                        count: 1,
                    });
                    Ok(())
                }),
            );
            bus.subscribe(
                EventKind::ItemCountReached,
                Box::new(|_, bus| {
                    bus.publish(Event::DiseaseRemitted {
                        disease: DiseaseId(0),
                        tier: 1,
                    });
                    Ok(())
                }),
            );

            bus.publish(kill("slime"));

            assert_eq!(bus.total_emitted(), 4, "mode {mode:?}");
            assert_eq!(bus.cascade_overflows(), 1, "mode {mode:?}");
            assert_eq!(bus.emitted_count(EventKind::DiseaseRemitted), 0);
            assert!(!bus.is_delivering());
        }
    }

    // -----------------------------------------------------------------------
    // Test 12: A running handler receives its own follow-up once it returns
    // -----------------------------------------------------------------------
    #[test]
    fn running_handler_receives_nested_event_after_return() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_a = Rc::clone(&log);

        bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(move |event, bus| {
                let Event::EnemyKilled { unit } = event else {
                    return Ok(());
                };
                log_a.borrow_mut().push(format!("a:{unit}:start"));
                if unit == "slime" {
                    bus.publish(kill("again"));
                }
                log_a.borrow_mut().push(format!("a:{unit}:end"));
                Ok(())
            }),
        );
        let log_b = Rc::clone(&log);
        bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(move |event, _| {
                if let Event::EnemyKilled { unit } = event {
                    log_b.borrow_mut().push(format!("b:{unit}"));
                }
                Ok(())
            }),
        );

        bus.publish(kill("slime"));

        // The nested event reaches the sibling immediately and the running
        // handler right after it returns; no call overlaps another.
        assert_eq!(
            *log.borrow(),
            vec![
                "a:slime:start",
                "b:again",
                "a:slime:end",
                "a:again:start",
                "a:again:end",
                "b:slime",
            ]
        );
        assert_eq!(bus.emitted_count(EventKind::EnemyKilled), 2);
        assert!(!bus.is_delivering());
    }

    // -----------------------------------------------------------------------
    // Test 12b: A self-feeding handler stops at the cascade bound
    // -----------------------------------------------------------------------
    #[test]
    fn self_feeding_handler_is_bounded() {
        let mut bus = EventBus::new(BusConfig {
            mode: DeliveryMode::Immediate,
            max_cascade_depth: 5,
        });
        let calls = Rc::new(RefCell::new(0u64));
        let calls_inner = Rc::clone(&calls);

        bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(move |_, bus| {
                *calls_inner.borrow_mut() += 1;
                bus.publish(kill("again"));
                Ok(())
            }),
        );

        bus.publish(kill("slime"));

        assert_eq!(*calls.borrow(), bus.emitted_count(EventKind::EnemyKilled));
        assert_eq!(*calls.borrow(), 5);
        assert_eq!(bus.cascade_overflows(), 1);
        assert!(!bus.is_delivering());
    }

    // -----------------------------------------------------------------------
    // Test 12c: Unsubscribing while events are queued drops the backlog
    // -----------------------------------------------------------------------
    #[test]
    fn unsubscribe_drops_missed_backlog() {
        let mut bus = EventBus::default();
        let calls = Rc::new(RefCell::new(0u32));
        let calls_inner = Rc::clone(&calls);
        let token = Rc::new(RefCell::new(None));
        let token_inner = Rc::clone(&token);

        let t = bus.subscribe(
            EventKind::EnemyKilled,
            Box::new(move |_, bus| {
                *calls_inner.borrow_mut() += 1;
                bus.publish(kill("again"));
                if let Some(t) = *token_inner.borrow() {
                    bus.unsubscribe(t);
                }
                Ok(())
            }),
        );
        *token.borrow_mut() = Some(t);

        bus.publish(kill("slime"));

        assert_eq!(*calls.borrow(), 1);
        assert!(!bus.is_subscribed(t));
        assert_eq!(bus.emitted_count(EventKind::EnemyKilled), 2);
    }

    // -----------------------------------------------------------------------
    // Test 12d: Equal priorities keep registration order
    // -----------------------------------------------------------------------
    #[test]
    fn equal_priority_keeps_registration_order() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe_with_priority(EventKind::EnemyKilled, SubscriberPriority::Post, recorder(&log, "post-1"));
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "normal-1"));
        bus.subscribe_with_priority(EventKind::EnemyKilled, SubscriberPriority::Post, recorder(&log, "post-2"));
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "normal-2"));
        bus.subscribe_with_priority(EventKind::EnemyKilled, SubscriberPriority::Pre, recorder(&log, "pre"));

        bus.publish(kill("slime"));

        assert_eq!(*log.borrow(), vec!["pre", "normal-1", "normal-2", "post-1", "post-2"]);
    }

    // -----------------------------------------------------------------------
    // Test 13: Invalid payloads are rejected
    // -----------------------------------------------------------------------
    #[test]
    fn invalid_payloads_rejected() {
        let mut bus = EventBus::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        bus.subscribe(EventKind::ResourcesProduced, recorder(&log, "produced"));
        bus.subscribe(EventKind::EnemyKilled, recorder(&log, "killed"));

        bus.publish(Event::ResourcesProduced {
            building: None,
            resources: vec![(ResourceId(0), f64_to_fixed64(-1.0))],
        });
        bus.publish(kill(""));

        assert!(log.borrow().is_empty());
        assert_eq!(bus.rejected_count(), 2);
        assert_eq!(bus.total_emitted(), 0);
    }

    // -----------------------------------------------------------------------
    // Test 14: Passive listeners observe events
    // -----------------------------------------------------------------------
    #[test]
    fn passive_listener_receives_payload() {
        let mut bus = EventBus::default();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_inner = Rc::clone(&seen);
        bus.on_passive(
            EventKind::DiseaseTriggered,
            Box::new(move |event| seen_inner.borrow_mut().push(event.clone())),
        );

        let event = Event::DiseaseTriggered {
            disease: DiseaseId(3),
            tier: 1,
        };
        bus.publish(event.clone());

        assert_eq!(*seen.borrow(), vec![event]);
    }

    #[test]
    fn event_kind_all_matches_index() {
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
