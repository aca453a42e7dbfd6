//! Tag-based event routing.
//!
//! A handler is registered for a set of [`EventTag`]s. Dispatching an event
//! walks the event's own tag list (most specific first) and starts every
//! handler registered for any of those tags, each exactly once, each in its
//! own task.
//!
//! # Failure Boundary
//!
//! Every handler invocation is wrapped so that:
//!
//! - an error is logged with the handler name and the event, then dropped
//! - a panic is caught and logged the same way
//! - [`EventSkipped`] is dropped silently
//! - an [`Abort`] (directly, or as [`BackendError::Abort`]) raises the router's
//!   [`AbortSignal`]; no further events are dispatched afterwards
//!
//! # Example
//!
//! ```rust,ignore
//! let mut router = EventRouter::new();
//!
//! router.on(|chat: EventContext<ChatMessageEvent>| async move {
//!     info!(text = chat.text(), "chat");
//! })?;
//!
//! router.on_any::<(ChatSkipEvent, PlayingEvent), _, _, _>(|event: BoxedEvent| async move {
//!     info!(event = event.event_name(), "playback changed");
//! })?;
//! ```

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use abot_core::{Abort, AbortSignal, BackendError, BoxedEvent, EventContext, EventKind, EventTag};
use futures::FutureExt;
use tokio_util::task::TaskTracker;
use tower::util::BoxCloneSyncService;
use tower::{BoxError, Service, ServiceExt, service_fn};
use tracing::{Instrument, debug, debug_span, error, trace, warn};

use crate::error::{EventSkipped, RegistrationError};

/// A type-erased, `Clone + Send + Sync` tower service handling one event.
///
/// The error type is [`BoxError`]: [`EventSkipped`] is ignored, [`Abort`] stops
/// the runtime, anything else is logged.
pub type BoxedHandlerService = BoxCloneSyncService<BoxedEvent, (), BoxError>;

/// Index of a registration within an [`EventRouter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(usize);

// ============================================================================
// Handler Outcome
// ============================================================================

/// Return types accepted from handler functions.
pub trait HandlerOutcome: Send + 'static {
    /// Normalizes the outcome for the failure boundary.
    fn into_result(self) -> Result<(), BoxError>;
}

impl HandlerOutcome for () {
    fn into_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> HandlerOutcome for Result<(), E>
where
    E: Into<BoxError> + Send + 'static,
{
    fn into_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

// ============================================================================
// Event Sets
// ============================================================================

/// A finite union of event types, written as a tuple.
///
/// ```rust,ignore
/// router.on_any::<(ChatSkipEvent, PlayingEvent), _, _, _>(handler)?;
/// ```
pub trait EventSet {
    /// Own tags of every member type.
    fn tags() -> Vec<EventTag>;
}

macro_rules! impl_event_set {
    ($($ty:ident),+) => {
        impl<$($ty: EventKind),+> EventSet for ($($ty,)+) {
            fn tags() -> Vec<EventTag> {
                vec![$($ty::TAG),+]
            }
        }
    };
}

impl_event_set!(E1);
impl_event_set!(E1, E2);
impl_event_set!(E1, E2, E3);
impl_event_set!(E1, E2, E3, E4);
impl_event_set!(E1, E2, E3, E4, E5);
impl_event_set!(E1, E2, E3, E4, E5, E6);

// ============================================================================
// Router
// ============================================================================

struct Registration {
    name: Arc<str>,
    tags: Vec<EventTag>,
    service: BoxedHandlerService,
}

/// Handler registry and dispatcher.
///
/// Registration happens before the runtime starts; dispatch only reads.
pub struct EventRouter {
    registrations: Vec<Registration>,
    index: HashMap<EventTag, Vec<usize>>,
    tracker: TaskTracker,
    abort: AbortSignal,
}

impl EventRouter {
    /// Creates an empty router with its own abort signal.
    pub fn new() -> Self {
        Self::with_abort_signal(AbortSignal::new())
    }

    /// Creates an empty router raising `abort` when a handler aborts.
    pub fn with_abort_signal(abort: AbortSignal) -> Self {
        Self {
            registrations: Vec::new(),
            index: HashMap::new(),
            tracker: TaskTracker::new(),
            abort,
        }
    }

    /// The signal raised when a handler aborts.
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.registrations.len()
    }

    /// Number of handler invocations still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Registers `service` for every tag in `tags`.
    pub fn register<S>(
        &mut self,
        name: impl Into<Arc<str>>,
        tags: impl IntoIterator<Item = EventTag>,
        service: S,
    ) -> Result<HandlerId, RegistrationError>
    where
        S: Service<BoxedEvent, Response = (), Error = BoxError> + Clone + Send + Sync + 'static,
        S::Future: Send + 'static,
    {
        let name = name.into();
        let mut unique = Vec::new();
        for tag in tags {
            if !unique.contains(&tag) {
                unique.push(tag);
            }
        }
        if unique.is_empty() {
            return Err(RegistrationError::EmptyTagSet {
                handler: name.to_string(),
            });
        }

        let id = self.registrations.len();
        for tag in &unique {
            self.index.entry(*tag).or_default().push(id);
        }
        debug!(handler = %name, tags = ?unique, "Registered handler");
        self.registrations.push(Registration {
            name,
            tags: unique,
            service: BoxCloneSyncService::new(service),
        });
        Ok(HandlerId(id))
    }

    /// Registers a handler for the concrete event type `E`.
    pub fn on<E, F, Fut, R>(&mut self, handler: F) -> Result<HandlerId, RegistrationError>
    where
        E: EventKind,
        F: Fn(EventContext<E>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        let service = service_fn(move |event: BoxedEvent| {
            let handler = handler.clone();
            async move {
                let Some(ctx) = event.extract::<E>() else {
                    return Err(EventSkipped.into());
                };
                handler(ctx).await.into_result()
            }
        });
        self.register(type_name::<F>(), [E::TAG], service)
    }

    /// Registers a handler for every member of the event set `S`.
    pub fn on_any<S, F, Fut, R>(&mut self, handler: F) -> Result<HandlerId, RegistrationError>
    where
        S: EventSet,
        F: Fn(BoxedEvent) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        self.on_tags(S::tags(), handler)
    }

    /// Registers a handler for explicit tags, including capability tags such as
    /// [`EventTag::MESSAGE`].
    pub fn on_tags<F, Fut, R>(
        &mut self,
        tags: impl IntoIterator<Item = EventTag>,
        handler: F,
    ) -> Result<HandlerId, RegistrationError>
    where
        F: Fn(BoxedEvent) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        let service = service_fn(move |event: BoxedEvent| {
            let handler = handler.clone();
            async move { handler(event).await.into_result() }
        });
        self.register(type_name::<F>(), tags, service)
    }

    /// Starts every handler interested in `event`.
    ///
    /// Returns as soon as the handlers are spawned, with the number started.
    /// Fails without starting anything once the abort signal is raised.
    pub fn dispatch(&self, event: BoxedEvent) -> Result<usize, Abort> {
        if let Some(abort) = self.abort.get() {
            return Err(abort);
        }

        let span = debug_span!("dispatch", event_name = %event.event_name());
        let _enter = span.enter();

        let mut selected: Vec<usize> = Vec::new();
        for tag in event.tags() {
            for &id in self.index.get(tag).into_iter().flatten() {
                if !selected.contains(&id) {
                    selected.push(id);
                }
            }
        }

        if selected.is_empty() {
            trace!("No handler registered for event");
            return Ok(0);
        }

        for &id in &selected {
            let registration = &self.registrations[id];
            let name = Arc::clone(&registration.name);
            let service = registration.service.clone();
            let abort = self.abort.clone();
            let event = event.clone();

            let task_span = debug_span!("handler", handler = %name);
            self.tracker.spawn(
                async move {
                    let outcome = AssertUnwindSafe(service.oneshot(event.clone()))
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(Ok(())) => trace!("Handler finished"),
                        Ok(Err(err)) => report_failure(&name, &event, err, &abort),
                        Err(panic) => error!(
                            handler = %name,
                            event = ?event,
                            panic = panic_message(panic.as_ref()),
                            "Handler panicked"
                        ),
                    }
                }
                .instrument(task_span),
            );
        }

        Ok(selected.len())
    }

    /// Waits until every started handler has finished.
    pub async fn idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field(
                "handlers",
                &self
                    .registrations
                    .iter()
                    .map(|r| (&*r.name, &r.tags))
                    .collect::<Vec<_>>(),
            )
            .field("in_flight", &self.tracker.len())
            .field("abort", &self.abort)
            .finish()
    }
}

fn report_failure(name: &str, event: &BoxedEvent, err: BoxError, abort: &AbortSignal) {
    if err.is::<EventSkipped>() {
        return;
    }
    let err = match err.downcast::<Abort>() {
        Ok(requested) => return raise(name, *requested, abort),
        Err(err) => err,
    };
    match err.downcast::<BackendError>() {
        Ok(backend_err) => match *backend_err {
            BackendError::Abort(requested) => raise(name, requested, abort),
            other => error!(handler = %name, event = ?event, error = %other, "Handler failed"),
        },
        Err(err) => error!(handler = %name, event = ?event, error = %err, "Handler failed"),
    }
}

fn raise(name: &str, requested: Abort, abort: &AbortSignal) {
    warn!(handler = %name, reason = requested.reason(), "Handler requested abort");
    abort.raise(requested);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use abot_core::{Backend, BackendResult, BoxedBackend, Entity, Event, EventBase, EventStream};
    use async_trait::async_trait;
    use futures::StreamExt;

    struct TestBackend;

    #[async_trait]
    impl Backend for TestBackend {
        fn name(&self) -> &'static str {
            "test"
        }

        async fn initialize(&self) -> BackendResult<()> {
            Ok(())
        }

        fn consume(self: Arc<Self>) -> EventStream {
            futures::stream::empty().boxed()
        }

        fn whoami(&self) -> Option<Arc<Entity>> {
            None
        }
    }

    fn backend() -> BoxedBackend {
        Arc::new(TestBackend)
    }

    const GROUP: EventTag = EventTag::new("test");

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
        const TAGS: &'static [EventTag] = &[EventTag::new("test.ping"), GROUP, EventTag::EVENT];
    }

    #[derive(Debug)]
    struct Pong {
        base: EventBase,
    }

    impl Event for Pong {
        fn tags(&self) -> &'static [EventTag] {
            Self::TAGS
        }

        fn base(&self) -> &EventBase {
            &self.base
        }
    }

    impl EventKind for Pong {
        const TAGS: &'static [EventTag] = &[EventTag::new("test.pong"), GROUP, EventTag::EVENT];
    }

    fn ping() -> BoxedEvent {
        BoxedEvent::new(Ping {
            base: EventBase::new(backend()),
        })
    }

    fn pong() -> BoxedEvent {
        BoxedEvent::new(Pong {
            base: EventBase::new(backend()),
        })
    }

    fn counting(
        counter: &Arc<AtomicUsize>,
    ) -> impl Fn(BoxedEvent) -> futures::future::Ready<()> + Clone + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(())
        }
    }

    async fn explode(_: BoxedEvent) {
        panic!("handler panicked")
    }

    #[tokio::test]
    async fn dispatch_reaches_own_and_ancestor_tags_only() {
        let own = Arc::new(AtomicUsize::new(0));
        let group = Arc::new(AtomicUsize::new(0));
        let root = Arc::new(AtomicUsize::new(0));
        let unrelated = Arc::new(AtomicUsize::new(0));

        let mut router = EventRouter::new();
        router.on_tags([Ping::TAG], counting(&own)).unwrap();
        router.on_tags([GROUP], counting(&group)).unwrap();
        router.on_tags([EventTag::EVENT], counting(&root)).unwrap();
        router.on_tags([Pong::TAG], counting(&unrelated)).unwrap();

        assert_eq!(router.dispatch(ping()).unwrap(), 3);
        router.idle().await;

        assert_eq!(own.load(Ordering::SeqCst), 1);
        assert_eq!(group.load(Ordering::SeqCst), 1);
        assert_eq!(root.load(Ordering::SeqCst), 1);
        assert_eq!(unrelated.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_matching_several_tags_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut router = EventRouter::new();
        router
            .on_tags([Ping::TAG, GROUP, EventTag::EVENT], counting(&counter))
            .unwrap();

        assert_eq!(router.dispatch(ping()).unwrap(), 1);
        router.idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn typed_handler_receives_concrete_event() {
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);

        let mut router = EventRouter::new();
        router
            .on(move |ctx: EventContext<Ping>| {
                let seen = Arc::clone(&seen);
                async move {
                    assert_eq!(ctx.event_name(), "test.ping");
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        router.dispatch(ping()).unwrap();
        router.dispatch(pong()).unwrap();
        router.idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn event_set_covers_every_member() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut router = EventRouter::new();
        router.on_any::<(Ping, Pong), _, _, _>(counting(&counter)).unwrap();

        router.dispatch(ping()).unwrap();
        router.dispatch(pong()).unwrap();
        router.idle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_handler_does_not_affect_others() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut router = EventRouter::new();
        router
            .on_tags([Ping::TAG], |_| async { Err::<(), _>("handler exploded") })
            .unwrap();
        router.on_tags([Ping::TAG], explode).unwrap();
        router.on_tags([Ping::TAG], counting(&counter)).unwrap();

        assert_eq!(router.dispatch(ping()).unwrap(), 3);
        router.idle().await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!router.abort_signal().is_raised());
        assert!(router.dispatch(ping()).is_ok());
    }

    #[tokio::test]
    async fn skipped_events_are_not_failures() {
        let mut router = EventRouter::new();
        router
            .on_tags([Ping::TAG], |_| async { Err::<(), _>(EventSkipped) })
            .unwrap();

        router.dispatch(ping()).unwrap();
        router.idle().await;
        assert!(!router.abort_signal().is_raised());
    }

    #[tokio::test]
    async fn abort_stops_further_dispatch() {
        let mut router = EventRouter::new();
        router
            .on_tags([Ping::TAG], |_| async { Err::<(), _>(Abort::new("stop")) })
            .unwrap();

        router.dispatch(ping()).unwrap();
        router.idle().await;

        assert_eq!(router.abort_signal().get(), Some(Abort::new("stop")));
        assert_eq!(router.dispatch(ping()), Err(Abort::new("stop")));
    }

    #[tokio::test]
    async fn backend_abort_is_recognised() {
        let mut router = EventRouter::new();
        router
            .on_tags([Ping::TAG], |_| async {
                Err::<(), _>(BackendError::Abort(Abort::new("backend says stop")))
            })
            .unwrap();

        router.dispatch(ping()).unwrap();
        router.idle().await;
        assert!(router.abort_signal().is_raised());
    }

    #[test]
    fn empty_tag_set_is_rejected() {
        let mut router = EventRouter::new();
        let err = router
            .on_tags(std::iter::empty(), |_| async {})
            .unwrap_err();
        assert!(matches!(err, RegistrationError::EmptyTagSet { .. }));
        assert_eq!(router.handler_count(), 0);
    }
}
