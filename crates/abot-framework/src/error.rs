//! Error types for the abot framework.

use thiserror::Error;

/// Returned by a handler when an event turned out not to concern it.
///
/// The router recognises this error and skips the handler without logging
/// anything. All other errors are treated as genuine failures.
#[derive(Debug, Clone, Error)]
#[error("event skipped by handler")]
pub struct EventSkipped;

/// Errors raised while registering handlers.
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// The handler would never run.
    #[error("handler '{handler}' was registered without any event tag")]
    EmptyTagSet {
        /// Name of the rejected handler.
        handler: String,
    },
}
