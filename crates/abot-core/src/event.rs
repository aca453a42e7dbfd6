//! Event system for abot.
//!
//! This module provides the core event infrastructure:
//!
//! - [`Event`] - Base trait for all events
//! - [`EventTag`] - Static routing labels an event answers to
//! - [`EventKind`] - Compile-time tag table of a concrete event type
//! - [`MessageEvent`] - Capability for events carrying plain text
//! - [`EventContext<E>`] - Typed view over a [`BoxedEvent`]
//!
//! # Tags Instead Of A Class Hierarchy
//!
//! Every concrete event declares, at definition time, the ordered list of tags
//! it answers to: its own tag first, then every capability or ancestor tag,
//! most specific first. Routing is a lookup over that list.
//!
//! ```rust,ignore
//! impl EventKind for ChatMessage {
//!     const TAGS: &'static [EventTag] = &[
//!         EventTag::new("dubtrack.chat-message"),
//!         EventTag::new("dubtrack"),
//!         EventTag::MESSAGE,
//!         EventTag::EVENT,
//!     ];
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

use crate::backend::BoxedBackend;
use crate::channel::BoxedChannel;
use crate::entity::Entity;
use crate::error::{BackendError, BackendResult, EventError, EventResult};

// ============================================================================
// Event Tags
// ============================================================================

/// A routing label attached to events.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventTag(&'static str);

impl EventTag {
    /// Root tag carried by every event.
    pub const EVENT: Self = Self("event");

    /// Carried by every event that implements [`MessageEvent`].
    pub const MESSAGE: Self = Self("message");

    /// Creates a tag from a static name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Returns the tag name.
    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Debug for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// Core Event Trait
// ============================================================================

/// Downcasting support, implemented for every `Any + Send + Sync` type.
pub trait AsAny: Any + Send + Sync {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// Converts an `Arc<Self>` into an `Arc<dyn Any>`.
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// The base trait for all events.
///
/// The backend reference is fixed when the event is built. The channel is a
/// write-once slot filled by the backend after construction.
pub trait Event: AsAny + fmt::Debug {
    /// Ordered tags this event answers to, most specific first.
    fn tags(&self) -> &'static [EventTag];

    /// Shared backend/channel state.
    fn base(&self) -> &EventBase;

    /// Returns the human-readable name of this event type.
    fn event_name(&self) -> &'static str {
        self.tags()
            .first()
            .map_or(EventTag::EVENT.as_str(), EventTag::as_str)
    }

    /// The backend that raised the event.
    fn backend(&self) -> BoxedBackend {
        self.base().backend()
    }

    /// The channel the event happened in, once set.
    fn channel(&self) -> Option<BoxedChannel> {
        self.base().channel()
    }

    /// Fills the channel slot. Fails if it was already filled.
    fn set_channel(&self, channel: BoxedChannel) -> EventResult<()> {
        self.base().set_channel(channel, self.event_name())
    }

    /// The participant that caused the event, resolved on demand.
    fn sender(&self) -> Option<Arc<Entity>> {
        None
    }

    /// Message view of this event, for events carrying text.
    fn as_message(&self) -> Option<&dyn MessageEvent> {
        None
    }
}

impl dyn Event {
    /// Whether this event answers to `tag`.
    pub fn has_tag(&self, tag: EventTag) -> bool {
        self.tags().contains(&tag)
    }

    /// Says `text` in the event's channel.
    pub async fn reply(&self, text: &str) -> BackendResult<()> {
        let channel = self.channel().ok_or_else(|| {
            BackendError::internal(format!("event '{}' has no channel", self.event_name()))
        })?;
        channel.say(text).await
    }
}

/// Static tag table for a concrete event type.
///
/// Lets handlers be registered by Rust type instead of by tag name.
pub trait EventKind: Event + Sized {
    /// All tags, own tag first.
    const TAGS: &'static [EventTag];

    /// The tag identifying exactly this type.
    const TAG: EventTag = Self::TAGS[0];
}

/// Capability of events that carry plain text.
pub trait MessageEvent: Event {
    /// Plain text of the message.
    fn text(&self) -> &str;

    /// Backend-specific message identifier.
    fn message_id(&self) -> Option<&str> {
        None
    }
}

// ============================================================================
// Event Base
// ============================================================================

/// Backend reference and channel slot embedded in every event.
pub struct EventBase {
    backend: BoxedBackend,
    channel: OnceLock<BoxedChannel>,
}

impl EventBase {
    /// Creates a base with an empty channel slot.
    pub fn new(backend: BoxedBackend) -> Self {
        Self {
            backend,
            channel: OnceLock::new(),
        }
    }

    /// Returns the owning backend.
    pub fn backend(&self) -> BoxedBackend {
        Arc::clone(&self.backend)
    }

    /// Returns the channel, if set.
    pub fn channel(&self) -> Option<BoxedChannel> {
        self.channel.get().cloned()
    }

    /// Sets the channel exactly once.
    pub fn set_channel(&self, channel: BoxedChannel, event: &'static str) -> EventResult<()> {
        self.channel
            .set(channel)
            .map_err(|_| EventError::ChannelAlreadySet { event })
    }
}

impl fmt::Debug for EventBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBase")
            .field("backend", &self.backend.name())
            .field("channel", &self.channel.get().map(|c| c.id().to_string()))
            .finish()
    }
}

// ============================================================================
// Boxed Event
// ============================================================================

/// A type-erased, cheaply clonable event.
///
/// `BoxedEvent` implements `Deref<Target = dyn Event>`, so trait methods can
/// be called directly:
///
/// ```rust,ignore
/// let event: BoxedEvent = /* ... */;
/// println!("{} from {:?}", event.event_name(), event.sender());
/// ```
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Event>,
}

impl BoxedEvent {
    /// Boxes a concrete event.
    pub fn new<E: Event>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    /// Returns the inner `Arc<dyn Event>`.
    pub fn inner(&self) -> &Arc<dyn Event> {
        &self.inner
    }

    /// Whether the concrete type is `E`.
    pub fn is<E: Event>(&self) -> bool {
        (*self.inner).as_any().is::<E>()
    }

    /// Attempts to downcast to a concrete event type.
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        (*self.inner).as_any().downcast_ref()
    }

    /// Attempts to downcast into a shared handle of the concrete type.
    pub fn downcast<E: Event>(&self) -> Option<Arc<E>> {
        Arc::clone(&self.inner).into_any().downcast::<E>().ok()
    }

    /// Attempts to build a typed context for `E`.
    pub fn extract<E: EventKind>(&self) -> Option<EventContext<E>> {
        EventContext::from_event(self)
    }
}

impl Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl<E: Event> From<E> for BoxedEvent {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}

impl fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.inner.as_ref(), f)
    }
}

// ============================================================================
// Event Context
// ============================================================================

/// Typed view over a dispatched event.
///
/// Derefs to the concrete event while keeping the original [`BoxedEvent`]
/// around for replies and logging.
///
/// ```rust,ignore
/// async fn on_chat(event: EventContext<ChatMessageEvent>) {
///     println!("{}", event.text());
///     event.reply("pong").await.ok();
/// }
/// ```
pub struct EventContext<E> {
    event: Arc<E>,
    root: BoxedEvent,
}

impl<E: EventKind> EventContext<E> {
    /// Builds a context if `root` is an `E`.
    pub fn from_event(root: &BoxedEvent) -> Option<Self> {
        root.downcast::<E>().map(|event| Self {
            event,
            root: root.clone(),
        })
    }

    /// The concrete event.
    pub fn data(&self) -> &E {
        &self.event
    }

    /// The type-erased event this context was built from.
    pub fn root(&self) -> &BoxedEvent {
        &self.root
    }

    /// Consumes the context, returning the shared concrete event.
    pub fn into_inner(self) -> Arc<E> {
        self.event
    }

    /// Says `text` in the event's channel.
    pub async fn reply(&self, text: &str) -> BackendResult<()> {
        self.root.reply(text).await
    }
}

impl<E> Clone for EventContext<E> {
    fn clone(&self) -> Self {
        Self {
            event: Arc::clone(&self.event),
            root: self.root.clone(),
        }
    }
}

impl<E> Deref for EventContext<E> {
    type Target = E;

    fn deref(&self) -> &Self::Target {
        &self.event
    }
}

impl<E: fmt::Debug> fmt::Debug for EventContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("data", &self.event)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NullBackend, StubChannel};

    #[derive(Debug)]
    struct Ping {
        base: EventBase,
    }

    impl Event for Ping {
        fn tags(&self) -> &'static [EventTag] {
            Self::TAGS
        }

        fn base(&self) -> &EventBase {
            &self.base
        }
    }

    impl EventKind for Ping {
        const TAGS: &'static [EventTag] = &[EventTag::new("test.ping"), EventTag::EVENT];
    }

    #[derive(Debug)]
    struct Pong {
        base: EventBase,
    }

    const PONG_TAGS: &[EventTag] = &[EventTag::new("test.pong"), EventTag::EVENT];

    impl Event for Pong {
        fn tags(&self) -> &'static [EventTag] {
            PONG_TAGS
        }

        fn base(&self) -> &EventBase {
            &self.base
        }
    }

    fn ping() -> BoxedEvent {
        BoxedEvent::new(Ping {
            base: EventBase::new(NullBackend::boxed()),
        })
    }

    #[test]
    fn own_tag_comes_first() {
        assert_eq!(Ping::TAG.as_str(), "test.ping");
        let event = ping();
        assert_eq!(event.event_name(), "test.ping");
        assert!(event.has_tag(EventTag::EVENT));
        assert!(!event.has_tag(EventTag::MESSAGE));
    }

    #[test]
    fn downcast_to_concrete_type() {
        let event = ping();
        assert!(event.is::<Ping>());
        assert!(!event.is::<Pong>());
        assert!(event.downcast_ref::<Ping>().is_some());
        assert!(event.downcast::<Pong>().is_none());

        let ctx = event.extract::<Ping>().unwrap();
        assert_eq!(ctx.event_name(), "test.ping");
    }

    #[test]
    fn channel_can_only_be_set_once() {
        let event = ping();
        assert!(event.channel().is_none());

        event.set_channel(StubChannel::boxed("room")).unwrap();
        assert_eq!(event.channel().unwrap().id(), "room");

        let err = event.set_channel(StubChannel::boxed("other")).unwrap_err();
        assert!(matches!(
            err,
            EventError::ChannelAlreadySet { event: "test.ping" }
        ));
        assert_eq!(event.channel().unwrap().id(), "room");
    }

    #[tokio::test]
    async fn reply_goes_through_the_channel() {
        let event = ping();
        assert!(event.reply("nobody listens").await.is_err());

        let channel = StubChannel::new("room");
        event.set_channel(channel.clone()).unwrap();
        event.reply("hello").await.unwrap();
        assert_eq!(channel.said(), vec!["hello".to_string()]);
    }
}
