//! Dubtrack event types.
//!
//! One generic [`DubtrackEvent`] wraps every content kind. The aliases below
//! name each concrete event for handler registration:
//!
//! ```rust,ignore
//! runtime.on(|event: EventContext<ChatMessageEvent>| async move {
//!     tracing::info!(text = event.text(), "chat");
//!     Ok(())
//! })?;
//! ```

use std::fmt;
use std::sync::Arc;

use abot_core::{
    BoxedBackend, Entity, EntityCache, Event, EventBase, EventKind, EventTag, MessageEvent,
};

use super::content::{
    ChatDelete, ChatMessage, ChatSkip, ContentKind, Dub, NowPlaying, QueuePause, QueueReorder,
    QueueUpdate, RoleChange, SetRole, UnsetRole, UserJoin, UserUpdate,
};
use crate::users::user_key;

/// An event raised by the Dubtrack backend.
pub struct DubtrackEvent<C> {
    base: EventBase,
    content: C,
    users: Arc<EntityCache>,
}

impl<C: ContentKind> DubtrackEvent<C> {
    /// Wraps `content`. Users are resolved lazily against `users`.
    pub fn new(backend: BoxedBackend, content: C, users: Arc<EntityCache>) -> Self {
        Self {
            base: EventBase::new(backend),
            content,
            users,
        }
    }

    /// The decoded content.
    pub fn content(&self) -> &C {
        &self.content
    }

    fn lookup(&self, key: Option<&str>) -> Option<Arc<Entity>> {
        self.users.find(key?)
    }
}

impl<C: ContentKind> Event for DubtrackEvent<C> {
    fn tags(&self) -> &'static [EventTag] {
        C::TAGS
    }

    fn base(&self) -> &EventBase {
        &self.base
    }

    fn sender(&self) -> Option<Arc<Entity>> {
        self.lookup(self.content.sender_key())
    }

    fn as_message(&self) -> Option<&dyn MessageEvent> {
        C::as_message(self)
    }
}

impl<C: ContentKind> EventKind for DubtrackEvent<C> {
    const TAGS: &'static [EventTag] = C::TAGS;
}

impl<C: ContentKind> fmt::Debug for DubtrackEvent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DubtrackEvent")
            .field("kind", &C::NAME)
            .field("content", &self.content)
            .field("base", &self.base)
            .finish()
    }
}

impl MessageEvent for DubtrackEvent<ChatMessage> {
    fn text(&self) -> &str {
        &self.content.message
    }

    fn message_id(&self) -> Option<&str> {
        self.content.chatid.as_deref()
    }
}

impl DubtrackEvent<SetRole> {
    /// The user who received the role.
    pub fn receiver(&self) -> Option<Arc<Entity>> {
        self.lookup(user_key(&self.content.0.receiver))
    }

    /// Details of the change.
    pub fn change(&self) -> &RoleChange {
        &self.content.0
    }
}

impl DubtrackEvent<UnsetRole> {
    /// The user who lost the role.
    pub fn receiver(&self) -> Option<Arc<Entity>> {
        self.lookup(user_key(&self.content.0.receiver))
    }

    /// Details of the change.
    pub fn change(&self) -> &RoleChange {
        &self.content.0
    }
}

impl DubtrackEvent<NowPlaying> {
    /// The user whose song is playing.
    pub fn dj(&self) -> Option<Arc<Entity>> {
        self.sender()
    }
}

pub type ChatMessageEvent = DubtrackEvent<ChatMessage>;
pub type ChatDeleteEvent = DubtrackEvent<ChatDelete>;
pub type ChatSkipEvent = DubtrackEvent<ChatSkip>;
pub type DubEvent = DubtrackEvent<Dub>;
pub type QueueReorderEvent = DubtrackEvent<QueueReorder>;
pub type QueueUpdateEvent = DubtrackEvent<QueueUpdate>;
pub type PlayingEvent = DubtrackEvent<NowPlaying>;
pub type UserJoinEvent = DubtrackEvent<UserJoin>;
pub type QueuePauseEvent = DubtrackEvent<QueuePause>;
pub type SetRoleEvent = DubtrackEvent<SetRole>;
pub type UnsetRoleEvent = DubtrackEvent<UnsetRole>;
pub type UserUpdateEvent = DubtrackEvent<UserUpdate>;
