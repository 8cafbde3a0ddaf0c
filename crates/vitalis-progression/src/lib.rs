//! Vitalis Progression -- reactive content unlocking.
//!
//! The [`dispatcher::ProgressionDispatcher`] owns the unlocked set and the
//! statistics that feed unlock conditions. It listens to kernel and
//! gameplay events, re-checks only the entries indexed under the inputs an
//! event touched, and saves through an injected
//! [`persistence::ProgressStore`].
//!
//! # Key Types
//!
//! - [`dispatcher::ProgressionDispatcher`] -- Reverse-indexed unlock evaluation.
//! - [`stats::ProgressionStats`] -- Monotonic counters, kills, items, research.
//! - [`snapshot::ProgressSnapshot`] -- Versioned save (JSON or bitcode).
//! - [`persistence::ProgressStore`] -- Save backend seam.

pub mod condition;
pub mod dispatcher;
pub mod persistence;
pub mod snapshot;
pub mod stats;
