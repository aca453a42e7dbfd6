//! # abot Dubtrack Backend
//!
//! Connects the abot runtime to one [Dubtrack](https://www.dubtrack.fm) room.
//!
//! ## Features
//!
//! - **Login**: form login with a cookie session, or anonymous read-only access
//! - **Socket**: reconnecting client with a per-connection heartbeat and a
//!   strike breaker per retry tier
//! - **Events**: chat, dubs, playlist, queue, join and role events, each with
//!   its own tag
//! - **Entities**: every user seen on the wire is cached and kept up to date
//! - **Chat**: [`RoomChannel`] posts to the room and swallows its own echo
//!
//! ## Layers
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ DubtrackBackend  (initialize / consume)       │
//! ├───────────────────────┬───────────────────────┤
//! │ ProtocolClient        │ DubtrackApi (REST)    │
//! │ token → connect → read│                       │
//! ├───────────────────────┴───────────────────────┤
//! │ ProtocolSession: frame → action → content     │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use abot_dubtrack::{ChatMessageEvent, DubtrackBackend};
//!
//! let mut runtime = AbotRuntime::new();
//! runtime.attach_configured::<DubtrackBackend>()?;
//! runtime.on(|event: EventContext<ChatMessageEvent>| async move {
//!     tracing::info!(text = event.text(), "chat");
//!     Ok(())
//! })?;
//! runtime.run().await?;
//! ```

pub mod api;
pub mod backend;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod retry;
pub mod session;
pub mod users;

#[cfg(test)]
mod testing;

pub use api::{DubtrackApi, RoomApi, RoomInfo};
pub use backend::DubtrackBackend;
pub use channel::RoomChannel;
pub use client::{Dialer, ProtocolClient, RoomDialer, Socket};
pub use config::{DubtrackConfig, RetryConfig};
pub use error::ProtocolError;
pub use model::{
    ChatDeleteEvent, ChatMessageEvent, ChatSkipEvent, Content, ContentKind, DubEvent,
    DubtrackEvent, PlayingEvent, QueuePauseEvent, QueueReorderEvent, QueueUpdateEvent,
    SetRoleEvent, UnsetRoleEvent, UserJoinEvent, UserUpdateEvent,
};
pub use retry::{StrikeBreaker, Tier, Verdict};
pub use session::{ProtocolSession, SuppressionList};
