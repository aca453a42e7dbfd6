//! Errors specific to the Dubtrack protocol.

use thiserror::Error;

use abot_core::BackendError;

use crate::retry::Tier;

/// Failures while speaking the Dubtrack protocol.
///
/// Surfaced to the runtime as [`BackendError::Protocol`].
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// A socket frame could not be parsed.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A content payload did not match its declared kind.
    #[error("malformed '{kind}' content: {reason}")]
    MalformedContent {
        /// Declared content kind.
        kind: String,
        /// Parser message.
        reason: String,
    },

    /// A REST response lacked an expected field.
    #[error("unexpected response from {endpoint}: {reason}")]
    UnexpectedResponse {
        /// Endpoint path.
        endpoint: String,
        /// What was missing or wrong.
        reason: String,
    },

    /// A retry tier ran out of strikes.
    #[error("{tier} failed {strikes} times within {window_secs}s, last error: {last}")]
    GaveUp {
        /// Tier that gave up.
        tier: Tier,
        /// Failures counted in the window.
        strikes: u32,
        /// Counting window.
        window_secs: u64,
        /// Message of the last failure.
        last: String,
    },
}

impl ProtocolError {
    pub(crate) fn unexpected(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }
}

impl From<ProtocolError> for BackendError {
    fn from(err: ProtocolError) -> Self {
        BackendError::Protocol(err.to_string())
    }
}
