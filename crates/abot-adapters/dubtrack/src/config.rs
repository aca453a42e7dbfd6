//! Configuration types for the Dubtrack backend.
//!
//! The backend reads its section from `backends.dubtrack` in the global
//! `abot.toml`/`abot.yaml` configuration file.
//!
//! # Example Configuration
//!
//! ```yaml
//! backends:
//!   dubtrack:
//!     username: mos-bot
//!     password: hunter2
//!     room: master-of-soundtrack
//!
//!     # Socket keep-alive
//!     heartbeat_interval_secs: 25
//!
//!     # Token / connection retry tiers
//!     retry:
//!       window_secs: 15
//!       max_strikes: 2
//!       initial_backoff_ms: 500
//!       max_backoff_ms: 30000
//!       multiplier: 2.0
//! ```
//!
//! Without credentials the backend connects anonymously: it still receives
//! room events but cannot speak.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use abot_core::{BackendError, BackendResult};

/// Room joined when none is configured.
pub const DEFAULT_ROOM: &str = "master-of-soundtrack";

/// Dubtrack backend configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DubtrackConfig {
    /// Account name used to log in.
    pub username: Option<String>,

    /// Account password.
    pub password: Option<String>,

    /// Room slug, as it appears in the room URL.
    pub room: String,

    /// REST API base URL.
    pub api_base: String,

    /// Socket endpoint, without query string.
    pub ws_url: String,

    /// Interval between pings on an open socket.
    pub heartbeat_interval_secs: u64,

    /// Timeout for every REST request.
    pub request_timeout_secs: u64,

    /// Failure handling for the token and connection tiers.
    pub retry: RetryConfig,
}

impl Default for DubtrackConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            room: DEFAULT_ROOM.to_string(),
            api_base: default_api_base(),
            ws_url: default_ws_url(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            request_timeout_secs: default_request_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.dubtrack.fm".to_string()
}

fn default_ws_url() -> String {
    "wss://ws.dubtrack.fm/ws/".to_string()
}

fn default_heartbeat_interval() -> u64 {
    25
}

fn default_request_timeout() -> u64 {
    30
}

impl DubtrackConfig {
    /// Config for an anonymous connection to `room`.
    pub fn for_room(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            ..Self::default()
        }
    }

    /// Sets login credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Username and password, when both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Rejects settings the backend cannot run with.
    pub fn validate(&self) -> BackendResult<()> {
        if self.room.trim().is_empty() {
            return Err(BackendError::config("room must not be empty"));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(BackendError::config(
                "username and password must be given together",
            ));
        }
        for (key, value) in [("api_base", &self.api_base), ("ws_url", &self.ws_url)] {
            Url::parse(value)
                .map_err(|e| BackendError::config(format!("{key} '{value}' is not a URL: {e}")))?;
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(BackendError::config(
                "heartbeat_interval_secs must be positive",
            ));
        }
        self.retry.validate()
    }
}

impl fmt::Debug for DubtrackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DubtrackConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|p| "*".repeat(p.len())))
            .field("room", &self.room)
            .field("api_base", &self.api_base)
            .field("ws_url", &self.ws_url)
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Strike breaker and backoff settings, shared by both retry tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Failures further apart than this start a fresh count.
    pub window_secs: u64,

    /// Failures within one window before the tier gives up.
    pub max_strikes: u32,

    /// Pause after the first failure.
    pub initial_backoff_ms: u64,

    /// Upper bound for the pause.
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive pauses.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            window_secs: 15,
            max_strikes: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Counting window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    fn validate(&self) -> BackendResult<()> {
        if self.max_strikes == 0 {
            return Err(BackendError::config("retry.max_strikes must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(BackendError::config("retry.multiplier must be >= 1.0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
username: mos-bot
password: secret
room: chillout
heartbeat_interval_secs: 10
retry:
  max_strikes: 3
  initial_backoff_ms: 0
"#;
        let config: DubtrackConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.credentials(), Some(("mos-bot", "secret")));
        assert_eq!(config.room, "chillout");
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(config.retry.max_strikes, 3);
        assert_eq!(config.retry.initial_backoff_ms, 0);
        assert_eq!(config.retry.window_secs, 15);
        assert_eq!(config.api_base, "https://api.dubtrack.fm");
        config.validate().unwrap();
    }

    #[test]
    fn test_default_config() {
        let config: DubtrackConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, DubtrackConfig::default());
        assert_eq!(config.room, DEFAULT_ROOM);
        assert_eq!(config.heartbeat_interval_secs, 25);
        assert!(config.credentials().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_half_credentials() {
        let config = DubtrackConfig {
            username: Some("mos-bot".into()),
            ..DubtrackConfig::default()
        };
        assert!(matches!(config.validate(), Err(BackendError::Config(_))));

        let config = DubtrackConfig {
            room: " ".into(),
            ..DubtrackConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DubtrackConfig {
            ws_url: "ws.dubtrack.fm".into(),
            ..DubtrackConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_masks_password() {
        let config = DubtrackConfig::for_room("r").with_credentials("me", "hunter2");
        let shown = format!("{config:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("*******"));
    }
}
