//! The fatal stop signal.
//!
//! [`Abort`] is an ordinary error value that handlers and backends return to
//! request that the whole runtime stop. [`AbortSignal`] is the shared latch the
//! runtime and the router watch: the first raised abort wins and later ones are
//! ignored.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Request to stop the entire runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("abort requested: {reason}")]
pub struct Abort {
    reason: String,
}

impl Abort {
    /// Creates an abort with a human readable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the reason given when the abort was raised.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Shared, clonable abort latch.
///
/// ```rust,ignore
/// let signal = AbortSignal::new();
/// let watcher = signal.clone();
/// tokio::spawn(async move {
///     let abort = watcher.raised().await;
///     println!("stopping: {}", abort.reason());
/// });
/// signal.raise(Abort::new("maintenance"));
/// ```
#[derive(Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
    abort: Arc<Mutex<Option<Abort>>>,
}

impl AbortSignal {
    /// Creates a signal that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Returns `false` if it was already raised.
    pub fn raise(&self, abort: Abort) -> bool {
        {
            let mut slot = self.abort.lock();
            if slot.is_some() {
                debug!(reason = %abort.reason(), "Abort already raised, ignoring");
                return false;
            }
            *slot = Some(abort);
        }
        self.token.cancel();
        true
    }

    /// Whether the signal has been raised.
    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The abort that raised the signal, if any.
    pub fn get(&self) -> Option<Abort> {
        self.abort.lock().clone()
    }

    /// Waits until the signal is raised and returns the winning abort.
    pub async fn raised(&self) -> Abort {
        self.token.cancelled().await;
        self.get()
            .unwrap_or_else(|| Abort::new("abort signal raised without a reason"))
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("abort", &self.get())
            .finish()
    }
}
