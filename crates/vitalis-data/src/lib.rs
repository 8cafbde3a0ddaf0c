//! Content loading for Vitalis.
//!
//! Reads resource, recipe, building, biomarker, effect, disease, entry and
//! tracked-stat tables from a directory (RON, JSON or TOML, one format per
//! table), resolves name references and freezes the result into a
//! [`vitalis_core::registry::Registry`].

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, LoadReport, LoadedContent, load_content};
