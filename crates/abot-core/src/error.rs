//! Unified error types for the abot core.
//!
//! Framework-level errors (handler registration) live in `abot-framework`,
//! runtime errors in `abot-runtime`.

use thiserror::Error;

use crate::abort::Abort;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in socket and HTTP plumbing.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The request could not be performed.
    #[error("request to {url} failed: {reason}")]
    Request {
        /// Target URL.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        /// Target URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The response body could not be decoded.
    #[error("failed to decode response from {url}: {reason}")]
    Decode {
        /// Target URL.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

// =============================================================================
// Event Errors
// =============================================================================

/// Errors raised while building or mutating events.
#[derive(Debug, Clone, Error)]
pub enum EventError {
    /// The channel slot was already filled.
    #[error("channel for event '{event}' is already set")]
    ChannelAlreadySet {
        /// Name of the event whose channel was set twice.
        event: &'static str,
    },
}

// =============================================================================
// Backend Errors
// =============================================================================

/// Errors surfaced by a [`Backend`](crate::Backend).
///
/// [`BackendError::Abort`] is the fatal variant: the runtime stops as soon as
/// it sees one. Everything else is recoverable.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Fatal stop request.
    #[error(transparent)]
    Abort(#[from] Abort),

    /// Options passed to `configure` were rejected.
    #[error("invalid backend configuration: {0}")]
    Config(String),

    /// Authentication with the remote service failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// An operation needs a logged-in identity.
    #[error("backend is not logged in")]
    NotLoggedIn,

    /// The remote service spoke something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Event construction error.
    #[error(transparent)]
    Event(#[from] EventError),

    /// Internal backend error.
    #[error("backend error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Creates an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the abort payload if this is the fatal variant.
    pub fn as_abort(&self) -> Option<&Abort> {
        match self {
            Self::Abort(abort) => Some(abort),
            _ => None,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for event operations.
pub type EventResult<T> = Result<T, EventError>;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
