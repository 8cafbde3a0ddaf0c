use std::path::PathBuf;

use vitalis_core::kernel::KernelError;
use vitalis_data::DataLoadError;
use vitalis_progression::persistence::PersistenceError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("content: {0}")]
    Content(#[from] DataLoadError),
    #[error("config {path}: {detail}")]
    Config { path: PathBuf, detail: String },
    #[error("no content directory configured")]
    NoContent,
    #[error("unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("logging already initialized")]
    LoggingInitialized,
}
