//! Scripted stand-ins for the socket and the REST API.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use abot_core::{BackendError, BackendResult, TransportError};

use crate::api::{RoomApi, RoomInfo};
use crate::client::{Dialer, Socket};
use crate::model::NowPlaying;

pub(crate) const CHAT_FRAME: &str = r#"4{"action":15,"message":{"type":"json","name":"chat-message","data":"{\"chatid\":\"c1\",\"message\":\"hi\",\"user\":{\"username\":\"bob\",\"userInfo\":{\"userid\":\"u1\"}}}"}}"#;

pub(crate) type Frames = VecDeque<BackendResult<Option<String>>>;

pub(crate) fn frames(items: Vec<BackendResult<Option<&str>>>) -> Frames {
    items
        .into_iter()
        .map(|item| item.map(|frame| frame.map(str::to_string)))
        .collect()
}

pub(crate) fn broken() -> BackendError {
    TransportError::ConnectionClosed {
        reason: "reset".into(),
    }
    .into()
}

/// Replays `frames`, then stays silent.
pub(crate) struct FakeSocket {
    frames: Frames,
    sent: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Socket for FakeSocket {
    async fn send_text(&mut self, text: String) -> BackendResult<()> {
        self.sent.lock().push(text);
        Ok(())
    }

    async fn next_text(&mut self) -> BackendResult<Option<String>> {
        match self.frames.pop_front() {
            Some(frame) => frame,
            None => futures::future::pending().await,
        }
    }
}

/// Hands out queued tokens and sockets. Defaults once a queue runs dry.
#[derive(Default)]
pub(crate) struct FakeDialer {
    tokens: Mutex<VecDeque<BackendResult<String>>>,
    sockets: Mutex<VecDeque<BackendResult<Frames>>>,
    pub(crate) sent: Arc<Mutex<Vec<String>>>,
    pub(crate) token_calls: AtomicUsize,
    pub(crate) open_calls: AtomicUsize,
}

impl FakeDialer {
    pub(crate) fn with_token(self, token: BackendResult<String>) -> Self {
        self.tokens.lock().push_back(token);
        self
    }

    pub(crate) fn with_socket(self, socket: BackendResult<Frames>) -> Self {
        self.sockets.lock().push_back(socket);
        self
    }

    pub(crate) fn tokens_fetched(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn sockets_opened(&self) -> usize {
        self.open_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for FakeDialer {
    async fn token(&self) -> BackendResult<String> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok("t".to_string()))
    }

    async fn open(&self, _token: &str) -> BackendResult<Box<dyn Socket>> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        let frames = self
            .sockets
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(VecDeque::new()))?;
        Ok(Box::new(FakeSocket {
            frames,
            sent: Arc::clone(&self.sent),
        }))
    }
}

/// A room with a fixed active song. Chat posts succeed unless `failing`.
pub(crate) struct FakeRoom {
    pub(crate) info: RoomInfo,
    pub(crate) playing: Option<NowPlaying>,
    pub(crate) failing: bool,
    pub(crate) said: Mutex<Vec<String>>,
}

impl FakeRoom {
    pub(crate) fn new() -> Self {
        Self {
            info: RoomInfo {
                id: "r1".into(),
                slug: "room".into(),
                name: "Room".into(),
            },
            playing: None,
            failing: false,
            said: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn playing(mut self, playing: NowPlaying) -> Self {
        self.playing = Some(playing);
        self
    }

    pub(crate) fn failing(mut self) -> Self {
        self.failing = true;
        self
    }
}

#[async_trait]
impl RoomApi for FakeRoom {
    async fn room_info(&self) -> BackendResult<RoomInfo> {
        Ok(self.info.clone())
    }

    async fn active_song(&self) -> BackendResult<Option<NowPlaying>> {
        Ok(self.playing.clone())
    }

    async fn say(&self, text: &str) -> BackendResult<()> {
        if self.failing {
            return Err(broken());
        }
        self.said.lock().push(text.to_string());
        Ok(())
    }
}
