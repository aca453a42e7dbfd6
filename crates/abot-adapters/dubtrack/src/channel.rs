//! The room as an outbound channel.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use abot_core::{BackendError, BackendResult, Channel, Entity, EntityCache};

use crate::api::RoomInfo;
use crate::backend::Initialized;
use crate::session::ProtocolSession;

/// Chat of the joined room.
pub struct RoomChannel {
    room: RoomInfo,
    state: Arc<Initialized>,
    session: Arc<ProtocolSession>,
    users: Arc<EntityCache>,
}

impl RoomChannel {
    pub(crate) fn new(
        room: RoomInfo,
        state: Arc<Initialized>,
        session: Arc<ProtocolSession>,
        users: Arc<EntityCache>,
    ) -> Self {
        Self {
            room,
            state,
            session,
            users,
        }
    }

    /// Room details.
    pub fn room(&self) -> &RoomInfo {
        &self.room
    }
}

#[async_trait]
impl Channel for RoomChannel {
    fn id(&self) -> &str {
        &self.room.id
    }

    fn name(&self) -> &str {
        &self.room.name
    }

    /// Posts `text` to the room chat.
    ///
    /// The echo of `text` coming back over the socket is swallowed once.
    async fn say(&self, text: &str) -> BackendResult<()> {
        if self.state.me.is_none() {
            return Err(BackendError::NotLoggedIn);
        }

        let pending = self.session.suppression();
        pending.record(text);
        if let Err(e) = self.state.room.say(text).await {
            pending.take(text);
            return Err(e);
        }
        debug!(room = %self.room.name, text, "Said");
        Ok(())
    }

    fn entities(&self) -> Vec<Arc<Entity>> {
        self.users.all()
    }
}

impl std::fmt::Debug for RoomChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomChannel")
            .field("room", &self.room)
            .finish_non_exhaustive()
    }
}
