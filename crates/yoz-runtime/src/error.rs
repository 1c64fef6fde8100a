//! Runtime error types.

use thiserror::Error;
use yoz_core::TransportError;
use yoz_framework::LifecycleError;

use crate::config::ConfigError;

/// Errors that can end or prevent a runtime run.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The plugin root could not be scanned.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// The event source stayed disconnected through every retry.
    #[error("event source did not reconnect after {attempts} attempt(s): {last_error}")]
    ReconnectExhausted {
        attempts: u32,
        #[source]
        last_error: TransportError,
    },

    /// `run` was called while another run is in progress.
    #[error("runtime is already running")]
    AlreadyRunning,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
