//! Configuration for the abot runtime.
//!
//! Settings are layered with figment: built-in defaults, then config files,
//! then `ABOT_*` environment variables. Backend sections stay untyped here and
//! are deserialized by each backend.

pub mod error;
pub mod loader;
pub mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    AbotConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, RuntimeSettings,
    SpanEventConfig,
};
