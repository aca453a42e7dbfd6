//! # abot Core
//!
//! The contracts shared by every abot crate.
//!
//! - **Event Model**: Tagged, type-erased events ([`Event`], [`BoxedEvent`], [`EventContext`])
//! - **Backends**: Connections to remote services ([`Backend`], [`EventStream`])
//! - **Channels**: Outbound destinations ([`Channel`])
//! - **Entities**: Participants with live-updated profiles ([`Entity`], [`EntityCache`])
//! - **Abort**: The fatal stop request ([`Abort`], [`AbortSignal`])
//!
//! ## Event Flow
//!
//! ```text
//! ┌─────────────┐  EventStream  ┌──────────────┐     ┌───────────┐
//! │   Backend   │──────────────▶│   Runtime    │────▶│  Router   │──▶ handlers
//! │ (dubtrack)  │               │ (multiplex)  │     │  (tags)   │
//! └─────────────┘               └──────────────┘     └───────────┘
//!        ▲                                                 │
//!        └──────────────── Channel::say ◀──────────────────┘
//! ```

pub mod abort;
pub mod backend;
pub mod channel;
pub mod entity;
pub mod error;
pub mod event;
pub mod mention;

pub use abort::{Abort, AbortSignal};
pub use backend::{Backend, BoxedBackend, ConfigurableBackend, EventStream};
pub use channel::{BoxedChannel, Channel};
pub use entity::{Entity, EntityCache, EntityInfo, EntityUpdate};
pub use error::{
    BackendError, BackendResult, EventError, EventResult, TransportError, TransportResult,
};
pub use event::{
    AsAny, BoxedEvent, Event, EventBase, EventContext, EventKind, EventTag, MessageEvent,
};
pub use mention::match_mention;

/// Prelude for common imports.
pub mod prelude {
    pub use super::{
        Abort, Backend, BackendError, BackendResult, BoxedEvent, Channel, Entity, Event,
        EventContext, EventKind, EventTag, MessageEvent,
    };
}
