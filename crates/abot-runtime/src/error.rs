//! Runtime error types.

use thiserror::Error;

use abot_core::{Abort, BackendError};
use abot_framework::RegistrationError;

use crate::config::ConfigError;

/// Errors that can occur while setting up or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The runtime stopped because an abort was raised.
    #[error(transparent)]
    Aborted(#[from] Abort),

    /// The same backend instance was attached twice.
    #[error("backend '{0}' is already attached")]
    BackendAlreadyAttached(&'static str),

    /// A backend failed its one-time initialization.
    #[error("failed to initialize backend '{backend}'")]
    Initialize {
        backend: &'static str,
        #[source]
        source: BackendError,
    },

    /// The configuration section of a backend was rejected.
    #[error("invalid configuration for backend '{backend}': {reason}")]
    BackendConfig {
        backend: &'static str,
        reason: String,
    },

    /// Backend error.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Handler registration error.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
