//! abot Runtime - Orchestration layer for the abot bot runtime.
//!
//! This crate provides:
//! - The event loop ([`AbotRuntime`]) that merges backend streams and feeds the router
//! - Layered configuration ([`config`])
//! - Logging setup ([`logging`])
//!
//! ```ignore
//! use abot_runtime::AbotRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = AbotRuntime::builder().build()?;
//!     runtime.attach_configured::<DubtrackBackend>()?;
//!     runtime.on(|chat: EventContext<ChatMessageEvent>| async move {
//!         tracing::info!(text = chat.text(), "chat");
//!     })?;
//!
//!     // Until Ctrl+C, SIGTERM or a handler abort
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{AbotConfig, ConfigError, ConfigLoader, ConfigResult, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{FmtSpan, LoggingBuilder};
pub use runtime::{AbotRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for handler code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
