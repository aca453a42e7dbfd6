//! Dubtrack backend implementation.
//!
//! [`DubtrackBackend`] ties the pieces together:
//!
//! - `initialize` logs in (when credentials are configured), registers our
//!   own user and every room member
//! - `consume` resolves the room, emits the song playing right now, then
//!   streams socket events through a fresh [`ProtocolClient`]
//!
//! Every emitted event has the room channel set.
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = DubtrackBackend::new(
//!     DubtrackConfig::for_room("master-of-soundtrack").with_credentials("mos-bot", "secret"),
//! );
//! runtime.attach(Arc::new(backend))?;
//! ```

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use abot_core::{
    Backend, BackendError, BackendResult, BoxedBackend, BoxedChannel, BoxedEvent,
    ConfigurableBackend, Entity, EntityCache, Event, EventStream,
};

use crate::api::{DubtrackApi, RoomApi};
use crate::channel::RoomChannel;
use crate::client::{Dialer, ProtocolClient, RoomDialer};
use crate::config::DubtrackConfig;
use crate::error::ProtocolError;
use crate::model::Content;
use crate::session::ProtocolSession;
use crate::users::register_user;

/// What `initialize` established.
pub(crate) struct Initialized {
    pub(crate) room: Arc<dyn RoomApi>,
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) me: Option<Arc<Entity>>,
    pub(crate) config: DubtrackConfig,
}

/// Backend for one Dubtrack room.
pub struct DubtrackBackend {
    config: RwLock<DubtrackConfig>,
    api: OnceLock<Arc<DubtrackApi>>,
    state: OnceLock<Arc<Initialized>>,
    users: Arc<EntityCache>,
    session: Arc<ProtocolSession>,
}

impl DubtrackBackend {
    /// Creates a backend; nothing is contacted until `initialize`.
    pub fn new(config: DubtrackConfig) -> Self {
        Self {
            config: RwLock::new(config),
            api: OnceLock::new(),
            state: OnceLock::new(),
            users: Arc::new(EntityCache::new()),
            session: Arc::new(ProtocolSession::new()),
        }
    }

    /// Current configuration.
    pub fn config(&self) -> DubtrackConfig {
        self.config.read().clone()
    }

    /// Users seen so far.
    pub fn users(&self) -> &Arc<EntityCache> {
        &self.users
    }

    /// Protocol state shared with every consume stream.
    pub fn session(&self) -> &Arc<ProtocolSession> {
        &self.session
    }

    /// REST client, once initialized.
    pub fn api(&self) -> Option<Arc<DubtrackApi>> {
        self.api.get().cloned()
    }

    fn initialized(&self) -> BackendResult<Arc<Initialized>> {
        self.state
            .get()
            .cloned()
            .ok_or_else(|| BackendError::internal("dubtrack backend used before initialize"))
    }

    fn install(&self, state: Initialized) -> BackendResult<()> {
        self.state
            .set(Arc::new(state))
            .map_err(|_| BackendError::internal("dubtrack backend initialized twice"))
    }

    async fn open(self: Arc<Self>) -> BackendResult<EventStream> {
        let state = self.initialized()?;
        let room = state.room.room_info().await?;
        info!(room = %room.name, id = %room.id, "Joining room");

        let channel: BoxedChannel = Arc::new(RoomChannel::new(
            room,
            Arc::clone(&state),
            Arc::clone(&self.session),
            Arc::clone(&self.users),
        ));

        let playing = match state.room.active_song().await {
            Ok(playing) => playing,
            Err(e) => {
                warn!(error = %e, "Could not fetch the active song");
                None
            }
        };

        let client = ProtocolClient::new(
            Arc::clone(&state.dialer),
            Arc::clone(&self.session),
            &state.config,
        );
        let contents = stream::iter(playing.map(|p| Ok(Content::NowPlaying(p))))
            .chain(client.into_stream());

        let users = Arc::clone(&self.users);
        let backend: BoxedBackend = self;
        let events = contents.map(move |item| -> BackendResult<BoxedEvent> {
            let content = item?;
            for user in content.users() {
                register_user(&users, user);
            }
            let event = content.into_event(Arc::clone(&backend), Arc::clone(&users));
            event.set_channel(Arc::clone(&channel))?;
            Ok(event)
        });
        Ok(events.boxed())
    }
}

impl Default for DubtrackBackend {
    fn default() -> Self {
        Self::new(DubtrackConfig::default())
    }
}

impl std::fmt::Debug for DubtrackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DubtrackBackend")
            .field("config", &*self.config.read())
            .field("initialized", &self.state.get().is_some())
            .field("users", &self.users.len())
            .finish()
    }
}

#[async_trait]
impl Backend for DubtrackBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn configure(&self, options: &serde_json::Value) -> BackendResult<()> {
        if options.is_null() {
            return Ok(());
        }
        let config: DubtrackConfig = serde_json::from_value(options.clone())
            .map_err(|e| BackendError::config(format!("dubtrack: {e}")))?;
        config.validate()?;

        if self.state.get().is_some() {
            if *self.config.read() == config {
                return Ok(());
            }
            return Err(BackendError::config(
                "dubtrack backend cannot be reconfigured after initialize",
            ));
        }
        debug!(?config, "Configured");
        *self.config.write() = config;
        Ok(())
    }

    async fn initialize(&self) -> BackendResult<()> {
        let config = self.config();
        config.validate()?;
        let api = Arc::new(DubtrackApi::new(&config)?);

        let me = match config.credentials() {
            Some((username, password)) => {
                api.login(username, password).await?;
                let info = api.session_info().await?;
                let me = register_user(&self.users, info).ok_or_else(|| {
                    ProtocolError::unexpected("auth/session", "session user has no id")
                })?;
                info!(me = %me, "Acting as");
                Some(me)
            }
            None => {
                info!("No credentials configured, joining anonymously");
                None
            }
        };

        let members = api.room_users().await?;
        for member in &members {
            register_user(&self.users, member);
        }
        debug!(count = members.len(), "Registered room members");

        let dialer = Arc::new(RoomDialer::new(
            Arc::clone(&api),
            Arc::clone(&self.session),
            config.ws_url.clone(),
        ));
        self.api
            .set(Arc::clone(&api))
            .map_err(|_| BackendError::internal("dubtrack backend initialized twice"))?;
        self.install(Initialized {
            room: api,
            dialer,
            me,
            config,
        })
    }

    fn consume(self: Arc<Self>) -> EventStream {
        stream::once(self.open())
            .flat_map(|opened| match opened {
                Ok(events) => events,
                Err(e) => stream::iter([Err(e)]).boxed(),
            })
            .boxed()
    }

    fn whoami(&self) -> Option<Arc<Entity>> {
        self.state.get().and_then(|s| s.me.clone())
    }

    async fn shutdown(&self) -> BackendResult<()> {
        info!(users = self.users.len(), "Dubtrack backend stopped");
        Ok(())
    }
}

impl ConfigurableBackend for DubtrackBackend {
    const NAME: &'static str = "dubtrack";
    type Config = DubtrackConfig;

    fn from_config(config: Self::Config) -> BackendResult<Self> {
        config.validate()?;
        Ok(Self::new(config))
    }
}
