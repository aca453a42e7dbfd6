//! The event loop.
//!
//! [`AbotRuntime`] owns the attached backends and the [`EventRouter`]. Its
//! loop merges every backend's event stream with a [`Multiplexer`] and hands
//! each event to the router as it arrives:
//!
//! ```text
//!  backend A ── consume() ──┐
//!  backend B ── consume() ──┼──▶ Multiplexer ──▶ EventRouter::dispatch
//!  backend C ── consume() ──┘         │
//!        ▲                            │ stream ended: consume() again after a delay
//!        └────────────────────────────┘ error item:   log, rebuild over survivors
//! ```
//!
//! Only an [`Abort`] stops the loop, whether it comes from a handler, from a
//! backend stream, or from a shutdown signal.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let mut runtime = AbotRuntime::builder()
//!     .config_file("abot.toml")
//!     .build()?;
//! runtime.attach_configured::<DubtrackBackend>()?;
//! runtime.run().await?;
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::error::Error as _;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{StreamExt, future};
use tokio::signal;
use tracing::{debug, error, info, trace, warn};

use abot_core::{
    Abort, AbortSignal, BackendError, BackendResult, BoxedBackend, BoxedEvent,
    ConfigurableBackend, EventContext, EventKind, EventStream, EventTag,
};
use abot_framework::{EventRouter, EventSet, HandlerId, HandlerOutcome, Multiplexer, SourceId};

use crate::config::{AbotConfig, ConfigLoader, ConfigResult};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

/// Reason carried by the abort raised on Ctrl+C or SIGTERM.
const SHUTDOWN_REASON: &str = "shutdown signal received";

// =============================================================================
// Stream Bookkeeping
// =============================================================================

/// One item of a backend stream, plus an explicit end marker so the loop
/// learns which backend went quiet.
enum Feed {
    Item(BackendResult<BoxedEvent>),
    Ended,
}

type FeedStream = BoxStream<'static, Feed>;

fn feed(events: EventStream) -> FeedStream {
    events
        .map(Feed::Item)
        .chain(stream::once(future::ready(Feed::Ended)))
        .boxed()
}

/// Consumes `backend` again once `delay` has passed.
fn delayed_feed(backend: BoxedBackend, delay: Duration) -> FeedStream {
    feed(
        stream::once(tokio::time::sleep(delay))
            .flat_map(move |()| Arc::clone(&backend).consume())
            .boxed(),
    )
}

/// A multiplexer plus the backend index behind each of its live sources.
#[derive(Default)]
struct Merge {
    mux: Multiplexer<FeedStream>,
    owners: HashMap<SourceId, usize>,
}

impl Merge {
    fn push(&mut self, backend: usize, feed: FeedStream) {
        let id = self.mux.push(feed);
        self.owners.insert(id, backend);
    }

    fn owner(&self, source: SourceId) -> Option<usize> {
        self.owners.get(&source).copied()
    }

    /// Forgets a source whose stream has ended.
    fn retire(&mut self, source: SourceId) {
        self.owners.remove(&source);
    }

    /// A fresh merge over the sources that have not ended.
    fn rebuild(self) -> Self {
        let Self { mux, owners } = self;
        let mut merge = Self::default();
        for (source, feed) in mux.into_sources() {
            if let Some(&backend) = owners.get(&source) {
                merge.push(backend, feed);
            }
        }
        merge
    }
}

// =============================================================================
// AbotRuntime
// =============================================================================

/// Owns the backends and the handler registry and runs the event loop.
///
/// ```rust,ignore
/// let mut runtime = AbotRuntime::new();
/// runtime.attach(backend)?;
/// runtime.on(|chat: EventContext<ChatMessageEvent>| async move {
///     if chat.text() == "!stop" {
///         return Err(Abort::new("stop requested in chat"));
///     }
///     Ok(())
/// })?;
/// runtime.run().await?;
/// ```
pub struct AbotRuntime {
    config: AbotConfig,
    backends: Vec<BoxedBackend>,
    router: EventRouter,
    abort: AbortSignal,
    restart_delay: Duration,
    initialized: AtomicBool,
}

impl AbotRuntime {
    /// Creates a runtime from the configuration found in the default
    /// locations, falling back to defaults.
    pub fn new() -> Self {
        let config = ConfigLoader::new().load().unwrap_or_else(|e| {
            eprintln!("Warning: Failed to load config ({e}), using defaults");
            AbotConfig::default()
        });
        Self::from_config(&config)
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from loaded configuration and installs logging.
    pub fn from_config(config: &AbotConfig) -> Self {
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            restart_delay_ms = config.runtime.restart_delay_ms,
            "Runtime initialized from configuration"
        );

        let abort = AbortSignal::new();
        Self {
            config: config.clone(),
            backends: Vec::new(),
            router: EventRouter::with_abort_signal(abort.clone()),
            abort,
            restart_delay: config.runtime.restart_delay(),
            initialized: AtomicBool::new(false),
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &AbotConfig {
        &self.config
    }

    /// The attached backends, in attachment order.
    pub fn backends(&self) -> &[BoxedBackend] {
        &self.backends
    }

    /// The shared abort signal. Raising it stops the loop.
    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    /// The handler registry.
    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    /// Direct access to the router, for registering tower services.
    pub fn router_mut(&mut self) -> &mut EventRouter {
        &mut self.router
    }

    // =========================================================================
    // Backends
    // =========================================================================

    /// Attaches a backend.
    ///
    /// If the configuration has a section under the backend's name, it is
    /// passed to [`Backend::configure`](abot_core::Backend::configure) first.
    pub fn attach(&mut self, backend: BoxedBackend) -> RuntimeResult<&mut Self> {
        if let Some(options) = self.config.backend(backend.name()) {
            backend
                .configure(options)
                .map_err(|e| RuntimeError::BackendConfig {
                    backend: backend.name(),
                    reason: e.to_string(),
                })?;
        }
        self.push_backend(backend)?;
        Ok(self)
    }

    /// Builds backend `B` from its configuration section and attaches it.
    ///
    /// A missing section means `B::Config::default()`. Returns the typed
    /// handle so callers can keep using backend-specific methods.
    pub fn attach_configured<B>(&mut self) -> RuntimeResult<Arc<B>>
    where
        B: ConfigurableBackend + 'static,
    {
        let config: B::Config = match self.config.backend(B::NAME) {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                RuntimeError::BackendConfig {
                    backend: B::NAME,
                    reason: e.to_string(),
                }
            })?,
            None => {
                warn!(
                    backend = B::NAME,
                    "No configuration found for backend, using default"
                );
                Default::default()
            }
        };

        let backend = Arc::new(B::from_config(config)?);
        self.push_backend(Arc::clone(&backend) as BoxedBackend)?;
        Ok(backend)
    }

    fn push_backend(&mut self, backend: BoxedBackend) -> RuntimeResult<()> {
        let attached = self
            .backends
            .iter()
            .any(|b| std::ptr::addr_eq(Arc::as_ptr(b), Arc::as_ptr(&backend)));
        if attached {
            return Err(RuntimeError::BackendAlreadyAttached(backend.name()));
        }
        info!(backend = backend.name(), "Attached backend");
        self.backends.push(backend);
        Ok(())
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Registers a handler for the concrete event type `E`.
    pub fn on<E, F, Fut, R>(&mut self, handler: F) -> RuntimeResult<HandlerId>
    where
        E: EventKind,
        F: Fn(EventContext<E>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        Ok(self.router.on(handler)?)
    }

    /// Registers a handler for every member of the event set `S`.
    pub fn on_any<S, F, Fut, R>(&mut self, handler: F) -> RuntimeResult<HandlerId>
    where
        S: EventSet,
        F: Fn(BoxedEvent) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        Ok(self.router.on_any::<S, _, _, _>(handler)?)
    }

    /// Registers a handler for explicit tags, including capability tags such
    /// as [`EventTag::MESSAGE`].
    pub fn add_handler<F, Fut, R>(
        &mut self,
        tags: impl IntoIterator<Item = EventTag>,
        handler: F,
    ) -> RuntimeResult<HandlerId>
    where
        F: Fn(BoxedEvent) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: HandlerOutcome,
    {
        Ok(self.router.on_tags(tags, handler)?)
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Runs until an abort is raised.
    ///
    /// Every backend is initialized once, then consumed. A backend whose
    /// stream ends is consumed again after the restart delay. A non-fatal
    /// error item is logged and the merge is rebuilt over the surviving
    /// streams after the same delay. Every backend is shut down before this
    /// returns.
    pub async fn run_forever(&self) -> RuntimeResult<Infallible> {
        let result = self.drive().await;
        self.shutdown_backends().await;
        result
    }

    /// Runs until Ctrl+C, SIGTERM, or an abort.
    ///
    /// A shutdown signal is a clean stop. Any other abort is returned as
    /// [`RuntimeError::Aborted`].
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("abot runtime is now running. Press Ctrl+C to stop.");
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes or an abort is raised.
    ///
    /// Completion of `shutdown` raises the abort signal and counts as a clean
    /// stop, unless another abort was raised first.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            biased;
            result = self.drive() => match result {
                Ok(never) => match never {},
                Err(err) => Err(err),
            },
            () = shutdown => {
                if self.abort.raise(Abort::new(SHUTDOWN_REASON)) {
                    info!("Runtime stopped");
                    Ok(())
                } else {
                    Err(RuntimeError::Aborted(self.abort.raised().await))
                }
            }
        };
        self.shutdown_backends().await;
        result
    }

    async fn drive(&self) -> RuntimeResult<Infallible> {
        self.initialize_backends().await?;

        if self.backends.is_empty() {
            warn!("No backends attached, waiting for abort");
            return Err(RuntimeError::Aborted(self.abort.raised().await));
        }

        let mut merge = Merge::default();
        for (index, backend) in self.backends.iter().enumerate() {
            debug!(backend = backend.name(), "Opening event stream");
            merge.push(index, feed(Arc::clone(backend).consume()));
        }

        loop {
            self.pump(&mut merge).await?;
            self.pause(self.restart_delay).await?;
            merge = merge.rebuild();
            debug!(streams = merge.mux.len(), "Restarted event loop");
        }
    }

    /// Moves events from `merge` to the router. Returns `Ok` after a
    /// non-fatal backend error.
    async fn pump(&self, merge: &mut Merge) -> RuntimeResult<()> {
        loop {
            let next = tokio::select! {
                biased;
                abort = self.abort.raised() => return Err(RuntimeError::Aborted(abort)),
                next = merge.mux.next() => next,
            };
            let Some((source, feed)) = next else {
                return Err(RuntimeError::Aborted(self.abort.raised().await));
            };
            let Some(index) = merge.owner(source) else {
                warn!(?source, "Item from an unknown source, dropping it");
                continue;
            };
            let backend = &self.backends[index];

            match feed {
                Feed::Item(Ok(event)) => {
                    let started = self.router.dispatch(event.clone())?;
                    trace!(
                        backend = backend.name(),
                        event = event.event_name(),
                        handlers = started,
                        "Dispatched event"
                    );
                }
                Feed::Item(Err(BackendError::Abort(abort))) => {
                    warn!(backend = backend.name(), reason = abort.reason(), "Backend aborted");
                    self.abort.raise(abort.clone());
                    return Err(RuntimeError::Aborted(self.abort.get().unwrap_or(abort)));
                }
                Feed::Item(Err(err)) => {
                    log_backend_error(backend.name(), &err);
                    return Ok(());
                }
                Feed::Ended => {
                    merge.retire(source);
                    info!(
                        backend = backend.name(),
                        delay = ?self.restart_delay,
                        "Event stream ended, consuming again"
                    );
                    merge.push(index, delayed_feed(Arc::clone(backend), self.restart_delay));
                }
            }
        }
    }

    async fn pause(&self, delay: Duration) -> RuntimeResult<()> {
        tokio::select! {
            biased;
            abort = self.abort.raised() => Err(RuntimeError::Aborted(abort)),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    async fn initialize_backends(&self) -> RuntimeResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        for backend in &self.backends {
            info!(backend = backend.name(), "Initializing backend");
            backend.initialize().await.map_err(|source| match source {
                BackendError::Abort(abort) => RuntimeError::Aborted(abort),
                source => RuntimeError::Initialize {
                    backend: backend.name(),
                    source,
                },
            })?;
        }
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn shutdown_backends(&self) {
        for backend in &self.backends {
            if let Err(e) = backend.shutdown().await {
                error!(backend = backend.name(), error = %e, "Error during backend shutdown");
            }
        }
    }
}

impl Default for AbotRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AbotRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbotRuntime")
            .field(
                "backends",
                &self.backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .field("router", &self.router)
            .field("abort", &self.abort)
            .finish()
    }
}

fn log_backend_error(backend: &str, err: &BackendError) {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    error!(backend, error = %err, ?causes, "Backend stream failed, restarting event loop");
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler");
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for an [`AbotRuntime`] with custom configuration sources.
///
/// ```rust,ignore
/// let runtime = AbotRuntime::builder()
///     .config_file("config/production.toml")
///     .profile("production")
///     .build()?;
/// ```
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Creates a builder with the default loader.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
        }
    }

    /// Loads exactly this configuration file.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g. "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Reads `ABOT_*` environment variables.
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Ignores environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Layers a programmatic configuration above the defaults.
    pub fn merge(mut self, config: AbotConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> ConfigResult<AbotRuntime> {
        let config = self.config_loader.load()?;
        Ok(AbotRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use abot_core::{Backend, Entity, Event, EventBase};
    use async_trait::async_trait;
    use serde::Deserialize;

    use super::*;

    type Script = Box<dyn FnOnce(BoxedBackend) -> EventStream + Send>;

    fn script(f: impl FnOnce(BoxedBackend) -> EventStream + Send + 'static) -> Script {
        Box::new(f)
    }

    /// Backend replaying one scripted stream per `consume` call.
    #[derive(Default)]
    struct MockBackend {
        scripts: Mutex<VecDeque<Script>>,
        fail_init: bool,
        initialized: AtomicUsize,
        consumed: AtomicUsize,
        shut_down: AtomicUsize,
    }

    impl MockBackend {
        fn scripted(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                ..Default::default()
            })
        }

        fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn initialize(&self) -> BackendResult<()> {
            self.initialized.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(BackendError::Auth("bad credentials".into()));
            }
            Ok(())
        }

        fn consume(self: Arc<Self>) -> EventStream {
            self.consumed.fetch_add(1, Ordering::SeqCst);
            let next = self.scripts.lock().unwrap().pop_front();
            match next {
                Some(script) => script(self),
                None => stream::pending().boxed(),
            }
        }

        fn whoami(&self) -> Option<Arc<Entity>> {
            None
        }

        async fn shutdown(&self) -> BackendResult<()> {
            self.shut_down.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Tick {
        base: EventBase,
        n: usize,
    }

    impl Event for Tick {
        fn tags(&self) -> &'static [EventTag] {
            Self::TAGS
        }

        fn base(&self) -> &EventBase {
            &self.base
        }
    }

    impl EventKind for Tick {
        const TAGS: &'static [EventTag] = &[EventTag::new("test.tick"), EventTag::EVENT];
    }

    fn tick(backend: &BoxedBackend, n: usize) -> BackendResult<BoxedEvent> {
        Ok(BoxedEvent::new(Tick {
            base: EventBase::new(Arc::clone(backend)),
            n,
        }))
    }

    fn runtime() -> AbotRuntime {
        let mut config = AbotConfig::default();
        config.runtime.restart_delay_ms = 10;
        AbotRuntime::from_config(&config)
    }

    async fn run_to_end(runtime: &AbotRuntime) -> RuntimeError {
        match tokio::time::timeout(Duration::from_secs(5), runtime.run_forever()).await {
            Ok(Err(err)) => err,
            Ok(Ok(never)) => match never {},
            Err(_) => panic!("runtime did not stop"),
        }
    }

    #[tokio::test]
    async fn attaching_the_same_backend_twice_fails() {
        let mut runtime = runtime();
        let backend: BoxedBackend = MockBackend::scripted(Vec::new());
        runtime.attach(Arc::clone(&backend)).unwrap();

        let err = runtime.attach(backend).unwrap_err();
        assert!(matches!(err, RuntimeError::BackendAlreadyAttached("mock")));
        assert_eq!(runtime.backends().len(), 1);
    }

    #[tokio::test]
    async fn unexpected_options_are_rejected_on_attach() {
        let mut config = AbotConfig::default();
        config
            .backends
            .insert("mock".into(), serde_json::json!({ "room": "lounge" }));
        let mut runtime = AbotRuntime::from_config(&config);

        let err = runtime
            .attach(MockBackend::scripted(Vec::new()))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::BackendConfig { backend: "mock", .. }));
    }

    #[tokio::test]
    async fn handler_abort_stops_the_loop() {
        let backend = MockBackend::scripted(vec![script(|b| {
            stream::iter([tick(&b, 1)]).chain(stream::pending()).boxed()
        })]);

        let mut runtime = runtime();
        runtime.attach(backend.clone()).unwrap();
        runtime
            .on(|_: EventContext<Tick>| async { Err::<(), _>(Abort::new("enough")) })
            .unwrap();

        let err = run_to_end(&runtime).await;
        assert!(matches!(&err, RuntimeError::Aborted(a) if a.reason() == "enough"));
        assert_eq!(MockBackend::count(&backend.initialized), 1);
        assert_eq!(MockBackend::count(&backend.shut_down), 1);
    }

    #[tokio::test]
    async fn ended_stream_is_consumed_again_without_reinitializing() {
        let backend = MockBackend::scripted(vec![
            script(|b| stream::iter([tick(&b, 1)]).boxed()),
            script(|b| {
                stream::iter([tick(&b, 2)])
                    .chain(stream::pending())
                    .boxed()
            }),
        ]);

        let mut runtime = runtime();
        runtime.attach(backend.clone()).unwrap();
        runtime
            .on(|tick: EventContext<Tick>| async move {
                if tick.n == 2 {
                    Err(Abort::new("second stream reached"))
                } else {
                    Ok(())
                }
            })
            .unwrap();

        let err = run_to_end(&runtime).await;
        assert!(matches!(&err, RuntimeError::Aborted(a) if a.reason() == "second stream reached"));
        assert_eq!(MockBackend::count(&backend.initialized), 1);
        assert_eq!(MockBackend::count(&backend.consumed), 2);
    }

    #[tokio::test]
    async fn error_item_is_logged_and_the_stream_survives() {
        let backend = MockBackend::scripted(vec![script(|b| {
            stream::iter([Err(BackendError::internal("flaky")), tick(&b, 1)])
                .chain(stream::pending())
                .boxed()
        })]);

        let mut runtime = runtime();
        runtime.attach(backend.clone()).unwrap();
        runtime
            .on(|_: EventContext<Tick>| async { Err::<(), _>(Abort::new("tick after error")) })
            .unwrap();

        let err = run_to_end(&runtime).await;
        assert!(matches!(&err, RuntimeError::Aborted(a) if a.reason() == "tick after error"));
        assert_eq!(MockBackend::count(&backend.consumed), 1);
    }

    #[tokio::test]
    async fn backend_abort_item_stops_the_loop() {
        let backend = MockBackend::scripted(vec![script(|_| {
            stream::iter([Err(BackendError::Abort(Abort::new("gave up")))])
                .chain(stream::pending())
                .boxed()
        })]);

        let mut runtime = runtime();
        runtime.attach(backend.clone()).unwrap();

        let err = run_to_end(&runtime).await;
        assert!(matches!(&err, RuntimeError::Aborted(a) if a.reason() == "gave up"));
        assert!(runtime.abort_signal().is_raised());
        assert_eq!(MockBackend::count(&backend.shut_down), 1);
    }

    #[tokio::test]
    async fn initialize_failure_is_fatal() {
        let backend = Arc::new(MockBackend {
            fail_init: true,
            ..Default::default()
        });

        let mut runtime = runtime();
        runtime.attach(backend.clone()).unwrap();

        let err = run_to_end(&runtime).await;
        assert!(matches!(err, RuntimeError::Initialize { backend: "mock", .. }));
        assert_eq!(MockBackend::count(&backend.consumed), 0);
        assert_eq!(MockBackend::count(&backend.shut_down), 1);
    }

    #[tokio::test]
    async fn external_abort_stops_an_idle_loop() {
        let backend = MockBackend::scripted(Vec::new());
        let mut runtime = runtime();
        runtime.attach(backend).unwrap();

        let signal = runtime.abort_signal().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            signal.raise(Abort::new("operator"));
        });

        let err = run_to_end(&runtime).await;
        assert!(matches!(&err, RuntimeError::Aborted(a) if a.reason() == "operator"));
    }

    #[tokio::test]
    async fn completed_shutdown_is_a_clean_stop() {
        let backend = MockBackend::scripted(Vec::new());
        let mut runtime = runtime();
        runtime.attach(backend.clone()).unwrap();

        let shutdown = tokio::time::sleep(Duration::from_millis(20));
        runtime.run_until(shutdown).await.unwrap();

        assert!(runtime.abort_signal().is_raised());
        assert_eq!(runtime.abort_signal().get().unwrap().reason(), SHUTDOWN_REASON);
        assert_eq!(MockBackend::count(&backend.shut_down), 1);
    }

    #[tokio::test]
    async fn handler_abort_with_the_shutdown_reason_is_still_an_error() {
        let backend = MockBackend::scripted(vec![script(|b| {
            stream::iter([tick(&b, 1)]).chain(stream::pending()).boxed()
        })]);

        let mut runtime = runtime();
        runtime.attach(backend).unwrap();
        runtime
            .on(|_: EventContext<Tick>| async { Err::<(), _>(Abort::new(SHUTDOWN_REASON)) })
            .unwrap();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            runtime.run_until(future::pending()),
        )
        .await
        .expect("runtime did not stop");
        assert!(matches!(&result, Err(RuntimeError::Aborted(a)) if a.reason() == SHUTDOWN_REASON));
    }

    #[tokio::test]
    async fn ended_sources_are_forgotten() {
        let mut merge = Merge::default();
        merge.push(0, feed(stream::pending().boxed()));
        merge.push(1, feed(stream::empty().boxed()));

        for _ in 0..10 {
            let (source, item) = merge.mux.next().await.unwrap();
            assert!(matches!(item, Feed::Ended));
            assert_eq!(merge.owner(source), Some(1));
            merge.retire(source);
            merge.push(1, feed(stream::empty().boxed()));
        }

        assert_eq!(merge.owners.len(), 2);
        let merge = merge.rebuild();
        assert_eq!(merge.owners.len(), 2);
    }

    #[derive(Debug, Default, Deserialize)]
    struct LabelConfig {
        #[serde(default)]
        label: String,
    }

    struct LabelledBackend {
        label: String,
    }

    #[async_trait]
    impl Backend for LabelledBackend {
        fn name(&self) -> &'static str {
            Self::NAME
        }

        async fn initialize(&self) -> BackendResult<()> {
            Ok(())
        }

        fn consume(self: Arc<Self>) -> EventStream {
            stream::empty().boxed()
        }

        fn whoami(&self) -> Option<Arc<Entity>> {
            None
        }
    }

    impl ConfigurableBackend for LabelledBackend {
        const NAME: &'static str = "labelled";
        type Config = LabelConfig;

        fn from_config(config: Self::Config) -> BackendResult<Self> {
            Ok(Self {
                label: config.label,
            })
        }
    }

    #[tokio::test]
    async fn configured_backend_reads_its_section() {
        let mut config = AbotConfig::default();
        config
            .backends
            .insert("labelled".into(), serde_json::json!({ "label": "lounge" }));
        let mut runtime = AbotRuntime::from_config(&config);

        let backend = runtime.attach_configured::<LabelledBackend>().unwrap();
        assert_eq!(backend.label, "lounge");

        let mut bare = AbotRuntime::from_config(&AbotConfig::default());
        let backend = bare.attach_configured::<LabelledBackend>().unwrap();
        assert_eq!(backend.label, "");
    }
}
