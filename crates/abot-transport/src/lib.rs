//! # abot Transport
//!
//! Network plumbing shared by abot backends.
//!
//! ## Features
//!
//! - `ws-client`: WebSocket text-frame client ([`ws_client::connect`])
//! - `http-client`: JSON HTTP client with a cookie session ([`http_client::HttpClient`])
//! - `full`: All of the above
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Backend Layer      │  (Dubtrack, ...)
//! ├─────────────────────┤
//! │  abot-transport     │  <- This crate
//! ├─────────────────────┤
//! │  Network (TCP/HTTP) │
//! └─────────────────────┘
//! ```
//!
//! Reconnection and retry policy stay in the backend.

#[cfg(feature = "http-client")]
pub mod http_client;

#[cfg(feature = "ws-client")]
pub mod ws_client;

#[cfg(feature = "http-client")]
pub use http_client::HttpClient;

#[cfg(feature = "ws-client")]
pub use ws_client::{WsReceiver, WsSender, connect};
