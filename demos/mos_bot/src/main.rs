//! Master of Soundtrack Bot
//!
//! Joins one Dubtrack room and keeps a running log of what happens there:
//! chat, the song playing, skips and dubs. Answers when someone mentions it.
//!
//! # Configuration
//!
//! ```toml
//! [backends.dubtrack]
//! username = "mos-bot"
//! password = "hunter2"
//! room = "master-of-soundtrack"
//! ```
//!
//! Without credentials the bot still listens, but cannot reply.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package mos-bot -- --config abot.toml --profile production
//! ```

use std::path::PathBuf;

use abot::dubtrack::{ChatMessageEvent, ChatSkipEvent, DubEvent, DubtrackBackend, PlayingEvent};
use abot::prelude::*;
use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "mos-bot", version, about = "Master of Soundtrack bot for Dubtrack")]
struct Cli {
    /// Configuration file to load instead of searching for `abot.toml`
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile
    #[arg(short, long)]
    profile: Option<String>,
}

// ============================================================================
// Handler Functions
// ============================================================================

fn display_name(user: Option<std::sync::Arc<Entity>>) -> String {
    user.and_then(|u| u.username())
        .unwrap_or_else(|| "someone".to_string())
}

/// Logs every chat line.
async fn chat_log_handler(chat: EventContext<ChatMessageEvent>) {
    info!("[chat] {}: {}", display_name(chat.sender()), chat.text());
}

/// Replies when the bot's own name shows up in chat.
async fn mention_handler(chat: EventContext<ChatMessageEvent>) -> Result<(), BoxError> {
    let Some(name) = chat.backend().is_mentioned(chat.data()) else {
        return Ok(());
    };
    let who = display_name(chat.sender());
    chat.reply(&format!("@{who} {name} is listening")).await?;
    Ok(())
}

/// Logs a song change.
async fn playing_handler(playing: EventContext<PlayingEvent>) {
    let song = &playing.content().song_info;
    info!(
        song = %song.name,
        source = %song.source,
        length = ?song.length,
        "[playing] {} queued by {}",
        song.name,
        display_name(playing.dj()),
    );
}

/// Logs a skip.
async fn skip_handler(skip: EventContext<ChatSkipEvent>) {
    info!("[skip] {} skipped the song", skip.content().username);
}

/// Logs a dub and the running tally.
async fn dub_handler(dub: EventContext<DubEvent>) {
    let content = dub.content();
    info!(
        up = content.playlist.updubs,
        down = content.playlist.downdubs,
        "[dub] {} {}dubbed",
        display_name(dub.sender()),
        content.dubtype,
    );
}

/// Flags play-history events that arrive without a known user.
async fn history_handler(event: BoxedEvent) {
    if event.sender().is_none() {
        warn!(event = event.event_name(), "History event from an unknown user");
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder = AbotRuntime::builder();
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile);
    }
    let mut runtime = builder.build()?;

    let backend = runtime.attach_configured::<DubtrackBackend>()?;
    info!(room = %backend.config().room, "Dubtrack backend attached");

    runtime.on(chat_log_handler)?;
    runtime.on(mention_handler)?;
    runtime.on(playing_handler)?;
    runtime.on(skip_handler)?;
    runtime.on(dub_handler)?;
    runtime.on_any::<(PlayingEvent, ChatSkipEvent, DubEvent), _, _, _>(history_handler)?;

    runtime.run().await?;
    Ok(())
}
