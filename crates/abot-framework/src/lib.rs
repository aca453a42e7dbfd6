//! # abot Framework
//!
//! The concurrency core between backends and handlers:
//!
//! - [`Multiplexer`] merges the event streams of every backend by arrival
//! - [`EventRouter`] starts every handler interested in an event, each in its
//!   own failure boundary
//!
//! Both are independent of any particular backend.

pub mod error;
pub mod multiplexer;
pub mod router;

pub use error::{EventSkipped, RegistrationError};
pub use multiplexer::{Multiplexer, SourceId};
pub use router::{BoxedHandlerService, EventRouter, EventSet, HandlerId, HandlerOutcome};

/// Re-exported so handlers can return `Result<(), BoxError>` without a direct
/// tower dependency.
pub use tower::BoxError;
