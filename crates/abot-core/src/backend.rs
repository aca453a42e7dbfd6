//! Backend abstraction.
//!
//! A backend connects the runtime to one remote service. Its lifecycle is:
//!
//! 1. `configure` with options (optional, before initialization)
//! 2. `initialize` exactly once
//! 3. `consume` to obtain an event stream, possibly several times: the runtime
//!    calls it again after the previous stream ended or failed
//! 4. `shutdown` when the runtime stops
//!
//! # Example
//!
//! ```rust,ignore
//! struct MyBackend { /* ... */ }
//!
//! #[async_trait]
//! impl Backend for MyBackend {
//!     fn name(&self) -> &'static str { "my" }
//!     async fn initialize(&self) -> BackendResult<()> { Ok(()) }
//!     fn consume(self: Arc<Self>) -> EventStream {
//!         futures::stream::empty().boxed()
//!     }
//!     fn whoami(&self) -> Option<Arc<Entity>> { None }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use crate::entity::Entity;
use crate::error::{BackendError, BackendResult};
use crate::event::{BoxedEvent, MessageEvent};
use crate::mention::match_mention;

/// Stream of events produced by one `consume` call.
///
/// An `Err` item does not end the stream. A
/// [`BackendError::Abort`](crate::BackendError::Abort) item stops the runtime.
pub type EventStream = BoxStream<'static, BackendResult<BoxedEvent>>;

/// A shared backend trait object.
pub type BoxedBackend = Arc<dyn Backend>;

/// Connection to one remote service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend name, used in logs and configuration keys.
    fn name(&self) -> &'static str;

    /// Applies backend options from a generic value.
    ///
    /// The default accepts only an empty object or `null`.
    fn configure(&self, options: &serde_json::Value) -> BackendResult<()> {
        match options {
            serde_json::Value::Null => Ok(()),
            serde_json::Value::Object(map) if map.is_empty() => Ok(()),
            _ => Err(BackendError::config(format!(
                "backend '{}' takes no options",
                self.name()
            ))),
        }
    }

    /// One-time setup. Called once before the first `consume`.
    async fn initialize(&self) -> BackendResult<()>;

    /// Opens a new event stream.
    fn consume(self: Arc<Self>) -> EventStream;

    /// The identity this backend acts as, once known.
    fn whoami(&self) -> Option<Arc<Entity>>;

    /// Whether `message` addresses this backend's identity.
    ///
    /// Returns the matched name.
    fn is_mentioned(&self, message: &dyn MessageEvent) -> Option<String> {
        let name = self.whoami()?.username()?;
        match_mention(message.text(), &name).map(str::to_owned)
    }

    /// Releases resources. Called once when the runtime stops.
    async fn shutdown(&self) -> BackendResult<()> {
        Ok(())
    }
}

/// A backend constructible from a typed configuration section.
pub trait ConfigurableBackend: Backend + Sized {
    /// Key of this backend's section under `backends` in the config file.
    const NAME: &'static str;

    /// Typed configuration.
    type Config: DeserializeOwned + Default + Send;

    /// Builds the backend from its configuration.
    fn from_config(config: Self::Config) -> BackendResult<Self>;
}
