//! # abot
//!
//! An event-driven bot runtime. Backends turn remote services into streams of
//! tagged events; the runtime merges those streams and hands every event to
//! the handlers registered for its tags.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  stream  ┌─────────────┐        ┌──────────┐
//! │ Backend A    │─────────▶│             │        │          │──▶ handler (own task)
//! ├──────────────┤  stream  │ Multiplexer │──────▶ │  Router  │──▶ handler (own task)
//! │ Backend B    │─────────▶│             │        │  (tags)  │──▶ handler (own task)
//! └──────────────┘          └─────────────┘        └──────────┘
//! ```
//!
//! - **Backends**: connections to remote services ([`core::Backend`])
//! - **Multiplexer**: merges streams in arrival order ([`framework::Multiplexer`])
//! - **Router**: starts every interested handler in its own failure boundary
//!   ([`framework::EventRouter`])
//! - **Runtime**: initializes backends, restarts ended streams and stops on
//!   abort ([`runtime::AbotRuntime`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use abot::prelude::*;
//! use abot::dubtrack::{ChatMessageEvent, DubtrackBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut runtime = AbotRuntime::new();
//!     runtime.attach_configured::<DubtrackBackend>()?;
//!
//!     runtime.on(|chat: EventContext<ChatMessageEvent>| async move {
//!         info!(text = chat.text(), "chat");
//!     })?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `dubtrack`: Dubtrack backend (default)
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use abot_core as core;
pub use abot_framework as framework;
pub use abot_runtime as runtime;

#[cfg(feature = "dubtrack")]
pub use abot_dubtrack as dubtrack;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use abot::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use abot_runtime::{AbotConfig, AbotRuntime, RuntimeError, RuntimeResult};

    // Event system - for writing handlers
    pub use abot_core::prelude::*;
    pub use abot_core::{AbortSignal, BoxedChannel, match_mention};
    pub use abot_framework::{BoxError, EventSet, HandlerId};

    // Logging macros
    pub use abot_runtime::prelude::*;
}
