//! Dubtrack REST API.
//!
//! Every response body is wrapped as `{"data": ...}`.
//!
//! | Method | Path | Used for |
//! |--------|------|----------|
//! | `POST` | `auth/dubtrack` | form login, sets the session cookie |
//! | `GET`  | `auth/session` | our own user |
//! | `GET`  | `auth/token` | socket access token |
//! | `GET`  | `room/<slug>` | room info |
//! | `GET`  | `room/<id>/users` | member list |
//! | `POST` | `room/<id>/users` | our role in the room |
//! | `GET`  | `room/<id>/playlist/active` | current song |
//! | `GET`  | `room/<id>/playlist/history` | past songs, paged |
//! | `POST` | `chat/<id>` | say something |
//!
//! Room info, session info and our role are cached after the first
//! successful call.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use abot_core::{BackendError, BackendResult, TransportError};
use abot_transport::HttpClient;

use crate::config::DubtrackConfig;
use crate::error::ProtocolError;
use crate::model::NowPlaying;

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// The room we are in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomInfo {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "roomUrl")]
    pub slug: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize)]
struct Login<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct ChatPost<'a> {
    chatid: Option<&'a str>,
    message: &'a str,
    time: u128,
    #[serde(rename = "type")]
    kind: &'static str,
    user: &'a Value,
    #[serde(rename = "userRole")]
    user_role: &'a str,
}

#[derive(Serialize)]
struct Page {
    page: u32,
}

/// Client for the REST endpoints of one room.
#[derive(Debug)]
pub struct DubtrackApi {
    http: HttpClient,
    base: String,
    room_slug: String,
    room: OnceCell<RoomInfo>,
    session: OnceCell<Value>,
    role: OnceCell<String>,
}

impl DubtrackApi {
    /// Creates a client for the room named in `config`.
    pub fn new(config: &DubtrackConfig) -> BackendResult<Self> {
        Ok(Self {
            http: HttpClient::new(config.request_timeout())?,
            base: config.api_base.trim_end_matches('/').to_string(),
            room_slug: config.room.clone(),
            room: OnceCell::new(),
            session: OnceCell::new(),
            role: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base)
    }

    /// Logs in with a username and password.
    pub async fn login(&self, username: &str, password: &str) -> BackendResult<()> {
        let status = self
            .http
            .post_form(&self.url("auth/dubtrack"), &Login { username, password })
            .await?;
        if status != 200 {
            return Err(BackendError::Auth(format!(
                "login as '{username}' answered HTTP {status}"
            )));
        }
        info!(username, "Logged in");
        Ok(())
    }

    /// Our own user object. Fails with [`BackendError::NotLoggedIn`] for
    /// anonymous sessions.
    pub async fn session_info(&self) -> BackendResult<&Value> {
        self.session
            .get_or_try_init(|| async {
                let env: Envelope<Value> = self.http.get_json(&self.url("auth/session")).await?;
                if env.data.get("_id").is_none() {
                    return Err(BackendError::NotLoggedIn);
                }
                Ok(env.data)
            })
            .await
    }

    /// Fresh socket access token.
    pub async fn token(&self) -> BackendResult<String> {
        let env: Envelope<Value> = self.http.get_json(&self.url("auth/token")).await?;
        env.data
            .get("token")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| ProtocolError::unexpected("auth/token", "no token in response").into())
    }

    /// Info of the configured room.
    pub async fn room(&self) -> BackendResult<&RoomInfo> {
        self.room
            .get_or_try_init(|| async {
                let path = format!("room/{}", self.room_slug);
                let env: Envelope<RoomInfo> = self.http.get_json(&self.url(&path)).await?;
                debug!(room = %env.data.name, id = %env.data.id, "Resolved room");
                Ok::<_, BackendError>(env.data)
            })
            .await
    }

    /// Raw member objects of the room.
    pub async fn room_users(&self) -> BackendResult<Vec<Value>> {
        let path = format!("room/{}/users", self.room().await?.id);
        let env: Envelope<Vec<Value>> = self.http.get_json(&self.url(&path)).await?;
        Ok(env.data)
    }

    /// Our role type in the room.
    pub async fn user_role(&self) -> BackendResult<&str> {
        let role = self
            .role
            .get_or_try_init(|| async {
                let path = format!("room/{}/users", self.room().await?.id);
                let env: Envelope<Value> = self.http.post_empty(&self.url(&path)).await?;
                env.data
                    .pointer("/user/roleid/type")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .ok_or_else(|| {
                        BackendError::from(ProtocolError::unexpected(path, "no role type"))
                    })
            })
            .await?;
        Ok(role.as_str())
    }

    /// The song playing right now, if any.
    pub async fn active_song(&self) -> BackendResult<Option<NowPlaying>> {
        let path = format!("room/{}/playlist/active", self.room().await?.id);
        let env: Envelope<Value> = match self.http.get_json(&self.url(&path)).await {
            Ok(env) => env,
            Err(TransportError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if env.data.is_null() || env.data.get("err").is_some() {
            return Ok(None);
        }
        serde_json::from_value(env.data)
            .map(Some)
            .map_err(|e| ProtocolError::unexpected(path, e.to_string()).into())
    }

    /// One page of the room's play history.
    pub async fn history(&self, page: u32) -> BackendResult<Vec<Value>> {
        let path = format!("room/{}/playlist/history", self.room().await?.id);
        let env: Envelope<Vec<Value>> = self
            .http
            .get_json_query(&self.url(&path), &Page { page })
            .await?;
        Ok(env.data)
    }

    /// Posts `text` to the room chat.
    pub async fn say(&self, text: &str) -> BackendResult<()> {
        let user = self.session_info().await?;
        let user_role = self.user_role().await?;
        let room_id = &self.room().await?.id;
        let body = ChatPost {
            chatid: None,
            message: text,
            time: unix_millis(),
            kind: "chat-message",
            user,
            user_role,
        };
        let _: Value = self
            .http
            .post_json(&self.url(&format!("chat/{room_id}")), &body)
            .await?;
        Ok(())
    }
}

/// The part of the REST surface a consume stream and its channel rely on.
#[async_trait]
pub trait RoomApi: Send + Sync {
    /// The joined room.
    async fn room_info(&self) -> BackendResult<RoomInfo>;

    /// The song playing right now, if any.
    async fn active_song(&self) -> BackendResult<Option<NowPlaying>>;

    /// Posts `text` to the room chat.
    async fn say(&self, text: &str) -> BackendResult<()>;
}

#[async_trait]
impl RoomApi for DubtrackApi {
    async fn room_info(&self) -> BackendResult<RoomInfo> {
        Ok(self.room().await?.clone())
    }

    async fn active_song(&self) -> BackendResult<Option<NowPlaying>> {
        DubtrackApi::active_song(self).await
    }

    async fn say(&self, text: &str) -> BackendResult<()> {
        DubtrackApi::say(self, text).await
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}
