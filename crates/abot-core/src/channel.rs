//! Outbound destinations.

use std::sync::Arc;

use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::BackendResult;

/// A destination that accepts text and knows its members.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Backend-specific channel identifier.
    fn id(&self) -> &str;

    /// Human-readable channel name.
    fn name(&self) -> &str {
        self.id()
    }

    /// Sends `text` to the channel.
    async fn say(&self, text: &str) -> BackendResult<()>;

    /// Entities currently known to be in the channel.
    fn entities(&self) -> Vec<Arc<Entity>>;
}

/// A shared channel trait object.
pub type BoxedChannel = Arc<dyn Channel>;
