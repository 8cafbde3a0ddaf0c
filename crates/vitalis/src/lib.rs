//! Vitalis -- session facade over the kernel, the progression dispatcher and
//! the content loader.
//!
//! A [`Session`] owns one event bus, one kernel and one progression
//! dispatcher, wired so that kernel events feed the dispatcher and unlocks
//! come back out as [`vitalis_core::event::Event::EntryUnlocked`]. There are
//! no globals; tests and tools create as many sessions as they like.

pub mod config;
pub mod error;
pub mod logging;
pub mod session;

pub use config::{SaveConfig, SessionConfig};
pub use error::SessionError;
pub use logging::init_logging;
pub use session::Session;
