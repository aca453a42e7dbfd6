//! Reconnecting socket client.
//!
//! One [`ProtocolClient`] backs one `consume` stream:
//!
//! ```text
//! NeedToken ──token──▶ Connecting ──open──▶ Streaming ──frame──▶ decode ──▶ Content
//!     ▲                    ▲                   │
//!     │                    └──── read error ───┤
//!     └────────────── closed by server ────────┘
//! ```
//!
//! Token and connection failures go through their own [`StrikeBreaker`].
//! A close by the server counts against the connection tier, since a server
//! that accepts and drops every socket is as broken as one that refuses
//! them. When a tier gives up the stream yields one error and ends.
//!
//! A fetched token clears the token tier; decoded content clears the
//! connection tier.
//!
//! The heartbeat is a branch of the read loop, so it lives and dies with the
//! socket it pings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::time::{Instant, Interval, MissedTickBehavior, sleep};
use tracing::{debug, error, info, warn};
use url::Url;

use abot_core::{BackendError, BackendResult, TransportError};
use abot_transport::{WsReceiver, WsSender};

use crate::api::DubtrackApi;
use crate::config::DubtrackConfig;
use crate::error::ProtocolError;
use crate::model::Content;
use crate::model::wire::{self, PING_FRAME};
use crate::retry::{StrikeBreaker, Tier, Verdict};
use crate::session::{LAYER1, ProtocolSession};

// ============================================================================
// Seams
// ============================================================================

/// An open, subscribed socket.
#[async_trait]
pub trait Socket: Send {
    /// Sends one text frame.
    async fn send_text(&mut self, text: String) -> BackendResult<()>;

    /// Next text frame, `None` once the server closed the socket.
    async fn next_text(&mut self) -> BackendResult<Option<String>>;
}

/// Obtains tokens and opens sockets.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// A fresh access token.
    async fn token(&self) -> BackendResult<String>;

    /// Opens a socket authenticated by `token`.
    async fn open(&self, token: &str) -> BackendResult<Box<dyn Socket>>;
}

/// Builds the socket URL for `token`, reusing `client_id` when known.
pub fn socket_url(base: &str, token: &str, client_id: Option<&str>) -> BackendResult<String> {
    let mut url = Url::parse(base)
        .map_err(|e| BackendError::config(format!("invalid ws_url '{base}': {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("connect", "1")
            .append_pair("EIO", "3")
            .append_pair("transport", "websocket")
            .append_pair("access_token", token);
        if let Some(id) = client_id {
            query.append_pair("clientId", id);
        }
    }
    Ok(url.into())
}

struct WsSocket {
    sender: WsSender,
    receiver: WsReceiver,
}

#[async_trait]
impl Socket for WsSocket {
    async fn send_text(&mut self, text: String) -> BackendResult<()> {
        Ok(self.sender.send_text(text).await?)
    }

    async fn next_text(&mut self) -> BackendResult<Option<String>> {
        Ok(self.receiver.next_text().await?)
    }
}

/// Dials the room socket over the REST API.
pub struct RoomDialer {
    api: Arc<DubtrackApi>,
    session: Arc<ProtocolSession>,
    ws_url: String,
}

impl RoomDialer {
    pub fn new(api: Arc<DubtrackApi>, session: Arc<ProtocolSession>, ws_url: String) -> Self {
        Self {
            api,
            session,
            ws_url,
        }
    }
}

#[async_trait]
impl Dialer for RoomDialer {
    async fn token(&self) -> BackendResult<String> {
        self.api.token().await
    }

    async fn open(&self, token: &str) -> BackendResult<Box<dyn Socket>> {
        let url = socket_url(&self.ws_url, token, self.session.client_id().as_deref())?;
        let room_id = self.api.room().await?.id.clone();

        let (mut sender, receiver) = abot_transport::connect(&url).await?;
        sender.send_text(wire::subscribe_frame(&room_id)?).await?;
        sender
            .send_text(wire::presence_frame(&room_id, &wire::request_id())?)
            .await?;
        info!(target: LAYER1, room = %room_id, "Subscribed to room");

        Ok(Box::new(WsSocket { sender, receiver }))
    }
}

// ============================================================================
// Connection
// ============================================================================

struct Connection {
    socket: Box<dyn Socket>,
    token: String,
    heartbeat: Interval,
}

impl Connection {
    fn new(socket: Box<dyn Socket>, token: String, period: Duration) -> Self {
        let mut heartbeat = tokio::time::interval(period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            socket,
            token,
            heartbeat,
        }
    }

    /// Reads the next frame, pinging whenever the heartbeat is due.
    async fn next_frame(&mut self) -> BackendResult<Option<String>> {
        loop {
            tokio::select! {
                biased;
                _ = self.heartbeat.tick() => {
                    debug!(target: LAYER1, "Sending ping");
                    self.socket.send_text(PING_FRAME.to_string()).await?;
                }
                frame = self.socket.next_text() => return frame,
            }
        }
    }
}

// ============================================================================
// Protocol Client
// ============================================================================

enum State {
    NeedToken,
    Connecting(String),
    Streaming(Connection),
    Done,
}

/// Token, connect and read loop for one consume stream.
pub struct ProtocolClient {
    dialer: Arc<dyn Dialer>,
    session: Arc<ProtocolSession>,
    heartbeat: Duration,
    tokens: StrikeBreaker,
    connections: StrikeBreaker,
    state: State,
}

impl ProtocolClient {
    /// Creates a client that starts by fetching a token.
    pub fn new(
        dialer: Arc<dyn Dialer>,
        session: Arc<ProtocolSession>,
        config: &DubtrackConfig,
    ) -> Self {
        Self {
            dialer,
            session,
            heartbeat: config.heartbeat_interval().max(Duration::from_secs(1)),
            tokens: StrikeBreaker::new(Tier::Token, config.retry.clone()),
            connections: StrikeBreaker::new(Tier::Connection, config.retry.clone()),
            state: State::NeedToken,
        }
    }

    /// Turns the client into a stream of decoded content.
    pub fn into_stream(self) -> BoxStream<'static, BackendResult<Content>> {
        futures::stream::unfold(self, |mut client| async move {
            let item = client.next().await?;
            Some((item, client))
        })
        .boxed()
    }

    /// Drives the state machine until content is decoded or the client stops.
    pub async fn next(&mut self) -> Option<BackendResult<Content>> {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Done => return None,

                State::NeedToken => match self.dialer.token().await {
                    Ok(token) => {
                        debug!(target: LAYER1, "Got socket token");
                        self.tokens.reset();
                        self.state = State::Connecting(token);
                    }
                    Err(e) => {
                        if let Some(err) = self.fail(Tier::Token, e, State::NeedToken).await {
                            return Some(Err(err));
                        }
                    }
                },

                State::Connecting(token) => match self.dialer.open(&token).await {
                    Ok(socket) => {
                        self.state = State::Streaming(Connection::new(socket, token, self.heartbeat));
                    }
                    Err(e) => {
                        let retry = State::Connecting(token);
                        if let Some(err) = self.fail(Tier::Connection, e, retry).await {
                            return Some(Err(err));
                        }
                    }
                },

                State::Streaming(mut conn) => match conn.next_frame().await {
                    Ok(Some(text)) => {
                        let content = self.session.decode(&text);
                        self.state = State::Streaming(conn);
                        if let Some(content) = content {
                            self.connections.reset();
                            return Some(Ok(content));
                        }
                    }
                    Ok(None) => {
                        info!(target: LAYER1, "Socket closed by server");
                        self.session.connection_closed();
                        let closed = TransportError::ConnectionClosed {
                            reason: "closed by server".into(),
                        };
                        if let Some(err) =
                            self.fail(Tier::Connection, closed.into(), State::NeedToken).await
                        {
                            return Some(Err(err));
                        }
                    }
                    Err(e) => {
                        self.session.connection_closed();
                        let retry = State::Connecting(conn.token);
                        if let Some(err) = self.fail(Tier::Connection, e, retry).await {
                            return Some(Err(err));
                        }
                    }
                },
            }
        }
    }

    /// Records a failure. Returns the error to surface when the tier gives up.
    async fn fail(&mut self, tier: Tier, err: BackendError, retry: State) -> Option<BackendError> {
        if err.as_abort().is_some() {
            return Some(err);
        }

        let breaker = match tier {
            Tier::Token => &mut self.tokens,
            Tier::Connection => &mut self.connections,
        };
        match breaker.strike(Instant::now()) {
            Verdict::Retry(delay) => {
                warn!(target: LAYER1, %tier, error = %err, ?delay, "Retrying");
                sleep(delay).await;
                self.state = retry;
                None
            }
            Verdict::GiveUp { strikes } => {
                error!(target: LAYER1, %tier, strikes, error = %err, "Giving up");
                Some(
                    ProtocolError::GaveUp {
                        tier,
                        strikes,
                        window_secs: breaker.window().as_secs(),
                        last: err.to_string(),
                    }
                    .into(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::testing::{CHAT_FRAME, FakeDialer, broken, frames};

    fn client(dialer: &Arc<FakeDialer>) -> ProtocolClient {
        let config = DubtrackConfig {
            retry: RetryConfig {
                initial_backoff_ms: 0,
                ..RetryConfig::default()
            },
            ..DubtrackConfig::default()
        };
        let dialer: Arc<dyn Dialer> = Arc::clone(dialer) as Arc<dyn Dialer>;
        ProtocolClient::new(dialer, Arc::new(ProtocolSession::new()), &config)
    }

    #[test]
    fn socket_url_carries_token_and_client_id() {
        let url = socket_url("wss://ws.dubtrack.fm/ws/", "a+b", None).unwrap();
        assert_eq!(
            url,
            "wss://ws.dubtrack.fm/ws/?connect=1&EIO=3&transport=websocket&access_token=a%2Bb"
        );
        let url = socket_url("wss://ws.dubtrack.fm/ws/", "t", Some("c-1")).unwrap();
        assert!(url.ends_with("&access_token=t&clientId=c-1"));
        assert!(socket_url("not a url", "t", None).is_err());
    }

    #[tokio::test]
    async fn streams_content_and_pings() {
        let dialer = Arc::new(FakeDialer::default().with_socket(Ok(frames(vec![
            Ok(Some("0{\"sid\":\"s\"}")),
            Ok(Some(CHAT_FRAME)),
        ]))));
        let mut client = client(&dialer);

        let Some(Ok(Content::ChatMessage(chat))) = client.next().await else {
            panic!("expected chat content");
        };
        assert_eq!(chat.message, "hi");
        assert_eq!(dialer.sent.lock().first().map(String::as_str), Some(PING_FRAME));
    }

    #[tokio::test]
    async fn token_tier_gives_up_after_two_strikes() {
        let dialer = Arc::new(
            FakeDialer::default()
                .with_token(Err(broken()))
                .with_token(Err(broken())),
        );
        let mut stream = client(&dialer).into_stream();

        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("token failed 2 times"), "{err}");
        assert!(stream.next().await.is_none());
        assert_eq!(dialer.tokens_fetched(), 2);
        assert_eq!(dialer.sockets_opened(), 0);
    }

    #[tokio::test]
    async fn one_connection_failure_is_tolerated() {
        let dialer = Arc::new(
            FakeDialer::default()
                .with_socket(Err(broken()))
                .with_socket(Ok(frames(vec![Ok(Some(CHAT_FRAME))]))),
        );
        let mut client = client(&dialer);

        assert!(matches!(client.next().await, Some(Ok(Content::ChatMessage(_)))));
        assert_eq!(dialer.tokens_fetched(), 1);
        assert_eq!(dialer.sockets_opened(), 2);
    }

    #[tokio::test]
    async fn read_errors_exhaust_the_connection_tier() {
        let dialer = Arc::new(
            FakeDialer::default()
                .with_socket(Ok(frames(vec![Err(broken())])))
                .with_socket(Ok(frames(vec![Err(broken())]))),
        );
        let mut client = client(&dialer);

        let err = client.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection failed 2 times"), "{err}");
        assert!(client.next().await.is_none());
    }

    #[tokio::test]
    async fn server_close_fetches_a_new_token() {
        let dialer = Arc::new(
            FakeDialer::default()
                .with_socket(Ok(frames(vec![Ok(None)])))
                .with_socket(Ok(frames(vec![Ok(Some(CHAT_FRAME))]))),
        );
        let mut client = client(&dialer);

        assert!(matches!(client.next().await, Some(Ok(Content::ChatMessage(_)))));
        assert_eq!(dialer.tokens_fetched(), 2);
    }

    #[tokio::test]
    async fn repeated_server_close_gives_up() {
        let mut dialer = FakeDialer::default();
        for _ in 0..50 {
            dialer = dialer.with_socket(Ok(frames(vec![Ok(None)])));
        }
        let dialer = Arc::new(dialer.with_socket(Ok(frames(vec![Ok(Some(CHAT_FRAME))]))));
        let mut client = client(&dialer);

        let err = client.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection failed 2 times"), "{err}");
        assert!(err.to_string().contains("closed by server"), "{err}");
        assert!(client.next().await.is_none());
        assert_eq!(dialer.tokens_fetched(), 2);
        assert_eq!(dialer.sockets_opened(), 2);
    }

    #[tokio::test]
    async fn content_between_closes_clears_the_connection_tier() {
        let dialer = Arc::new(
            FakeDialer::default()
                .with_socket(Ok(frames(vec![Ok(Some(CHAT_FRAME)), Ok(None)])))
                .with_socket(Ok(frames(vec![Ok(Some(CHAT_FRAME)), Ok(None)])))
                .with_socket(Ok(frames(vec![Ok(Some(CHAT_FRAME))]))),
        );
        let mut client = client(&dialer);

        for _ in 0..3 {
            assert!(matches!(client.next().await, Some(Ok(Content::ChatMessage(_)))));
        }
        assert_eq!(dialer.sockets_opened(), 3);
    }

    #[tokio::test]
    async fn a_good_token_clears_the_token_tier() {
        let dialer = Arc::new(
            FakeDialer::default()
                .with_token(Err(broken()))
                .with_token(Ok("t1".into()))
                .with_token(Err(broken()))
                .with_socket(Ok(frames(vec![Ok(None)])))
                .with_socket(Ok(frames(vec![Ok(Some(CHAT_FRAME))]))),
        );
        let mut client = client(&dialer);

        assert!(matches!(client.next().await, Some(Ok(Content::ChatMessage(_)))));
        assert_eq!(dialer.tokens_fetched(), 4);
    }
}
