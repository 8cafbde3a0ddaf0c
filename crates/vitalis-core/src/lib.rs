//! Vitalis Core -- the rule-driven simulation kernel.
//!
//! This crate turns declarative content (resources, recipes, biomarkers,
//! diseases, unlockable entries) into runtime behavior. It provides the
//! content registry, the synchronous event bus, the resource ledger, the
//! multiplicative modifier stack, and the kernel that drives recipes,
//! biomarker derivation, and disease triggers once per frame.
//!
//! # Frame Pipeline
//!
//! Each call to [`kernel::Kernel::update`] advances the simulation by one
//! frame through the following phases:
//!
//! 1. **Clock** -- Advance the simulation clock by `dt` seconds.
//! 2. **Production** -- Registered buildings accumulate progress on their
//!    recipe and complete cycles when inputs are available.
//! 3. **Biomarkers** -- Derived values are recomputed from the ledger.
//! 4. **Diseases** -- Trigger conjunctions are re-evaluated for diseases that
//!    reference a changed biomarker (plus active ones, for tier progression).
//!
//! Every state transition is published on the [`event::EventBus`] in the
//! caller's stack.
//!
//! # Key Types
//!
//! - [`kernel::Kernel`] -- Owns the ledger and drives the frame pipeline.
//! - [`registry::Registry`] -- Immutable content database (frozen at startup).
//! - [`event::EventBus`] -- Publish/subscribe dispatcher with disposable tokens.
//! - [`ledger::ResourceLedger`] -- Non-negative resource quantities.
//! - [`modifier::ModifierStack`] -- Multiplicative output scaling.
//! - [`fixed::Fixed64`] -- Q32.32 fixed-point type for deterministic math.

pub mod biomarker;
pub mod disease;
pub mod event;
pub mod fixed;
pub mod id;
pub mod kernel;
pub mod ledger;
pub mod modifier;
pub mod recipe;
pub mod registry;
pub mod unlock;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
