//! Typed content carried by message actions.
//!
//! The `name` of a message action selects the content kind, and its `data`
//! string is decoded into the matching struct. User objects stay raw JSON:
//! their shape differs between kinds and they are only read when registering
//! entities.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use abot_core::{BoxedBackend, BoxedEvent, EntityCache, EventTag, MessageEvent};

use super::event::DubtrackEvent;
use crate::error::ProtocolError;
use crate::users::user_key;

/// Tag shared by every Dubtrack event.
pub const DUBTRACK: EventTag = EventTag::new("dubtrack");

macro_rules! tags {
    ($name:literal $(, $cap:ident)*) => {
        &[
            EventTag::new(concat!("dubtrack.", $name)),
            DUBTRACK,
            $(EventTag::$cap,)*
            EventTag::EVENT,
        ]
    };
}

/// A content kind and its routing metadata.
pub trait ContentKind: DeserializeOwned + fmt::Debug + Send + Sync + 'static {
    /// Wire name of the kind.
    const NAME: &'static str;

    /// Tags of the event built from this content.
    const TAGS: &'static [EventTag];

    /// Id or username of the user that caused the content.
    fn sender_key(&self) -> Option<&str>;

    /// Raw user objects worth registering.
    fn users(&self) -> Vec<&Value> {
        Vec::new()
    }

    /// Message view of the event, for kinds carrying text.
    fn as_message(event: &DubtrackEvent<Self>) -> Option<&dyn MessageEvent> {
        let _ = event;
        None
    }
}

// ============================================================================
// Chat
// ============================================================================

/// Someone said something in the room.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub chatid: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user: Value,
}

impl ContentKind for ChatMessage {
    const NAME: &'static str = "chat-message";
    const TAGS: &'static [EventTag] = tags!("chat-message", MESSAGE);

    fn sender_key(&self) -> Option<&str> {
        user_key(&self.user)
    }

    fn users(&self) -> Vec<&Value> {
        vec![&self.user]
    }

    fn as_message(event: &DubtrackEvent<Self>) -> Option<&dyn MessageEvent> {
        Some(event)
    }
}

/// A chat message was deleted.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatDelete {
    pub chatid: Option<String>,
    #[serde(default)]
    pub user: Value,
}

impl ContentKind for ChatDelete {
    const NAME: &'static str = "delete-chat-message";
    const TAGS: &'static [EventTag] = tags!("delete-chat-message");

    fn sender_key(&self) -> Option<&str> {
        user_key(&self.user)
    }

    fn users(&self) -> Vec<&Value> {
        vec![&self.user]
    }
}

/// The current song was skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatSkip {
    #[serde(default)]
    pub username: String,
}

impl ContentKind for ChatSkip {
    const NAME: &'static str = "chat-skip";
    const TAGS: &'static [EventTag] = tags!("chat-skip");

    fn sender_key(&self) -> Option<&str> {
        Some(self.username.as_str()).filter(|name| !name.is_empty())
    }
}

// ============================================================================
// Playlist
// ============================================================================

/// Someone voted on the current song.
#[derive(Debug, Clone, Deserialize)]
pub struct Dub {
    /// `updub` or `downdub`.
    #[serde(default)]
    pub dubtype: String,
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub playlist: DubTally,
}

/// Vote totals of the current song after a dub.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DubTally {
    pub updubs: i64,
    pub downdubs: i64,
    /// Song length in milliseconds.
    #[serde(rename = "songLength")]
    pub song_length: Option<i64>,
    /// Start time, unix milliseconds.
    pub played: Option<i64>,
}

impl ContentKind for Dub {
    const NAME: &'static str = "room_playlist-dub";
    const TAGS: &'static [EventTag] = tags!("room_playlist-dub");

    fn sender_key(&self) -> Option<&str> {
        user_key(&self.user)
    }

    fn users(&self) -> Vec<&Value> {
        vec![&self.user]
    }
}

/// The room queue was reordered.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueReorder {
    #[serde(default)]
    pub user: Value,
}

impl ContentKind for QueueReorder {
    const NAME: &'static str = "room_playlist-queue-reorder";
    const TAGS: &'static [EventTag] = tags!("room_playlist-queue-reorder");

    fn sender_key(&self) -> Option<&str> {
        user_key(&self.user)
    }

    fn users(&self) -> Vec<&Value> {
        vec![&self.user]
    }
}

/// A user changed their own queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueUpdate {
    #[serde(default)]
    pub user: Value,
}

impl ContentKind for QueueUpdate {
    const NAME: &'static str = "room_playlist-queue-update-dub";
    const TAGS: &'static [EventTag] = tags!("room_playlist-queue-update-dub");

    fn sender_key(&self) -> Option<&str> {
        user_key(&self.user)
    }

    fn users(&self) -> Vec<&Value> {
        vec![&self.user]
    }
}

/// A new song started playing.
///
/// Also the shape of the active-song REST response.
#[derive(Debug, Clone, Deserialize)]
pub struct NowPlaying {
    #[serde(rename = "songInfo", default)]
    pub song_info: SongInfo,
    #[serde(default)]
    pub song: SongPlay,
}

/// Catalog data of a song.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SongInfo {
    #[serde(rename = "_id", alias = "songid")]
    pub id: Option<String>,
    pub name: String,
    /// Provider, e.g. `youtube` or `soundcloud`.
    #[serde(rename = "type")]
    pub source: String,
    /// Provider-side id.
    pub fkid: String,
    /// Length in milliseconds.
    #[serde(rename = "songLength")]
    pub length: Option<i64>,
}

/// One play of a song in the room.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SongPlay {
    /// The DJ.
    pub userid: Option<String>,
    /// Start time, unix milliseconds.
    pub played: Option<i64>,
}

impl NowPlaying {
    /// Song id, from the catalog entry.
    pub fn song_id(&self) -> Option<&str> {
        self.song_info.id.as_deref()
    }

    /// Start time, unix milliseconds.
    pub fn played_at(&self) -> Option<i64> {
        self.song.played
    }
}

impl ContentKind for NowPlaying {
    const NAME: &'static str = "room_playlist-update";
    const TAGS: &'static [EventTag] = tags!("room_playlist-update");

    fn sender_key(&self) -> Option<&str> {
        self.song.userid.as_deref()
    }
}

// ============================================================================
// Users
// ============================================================================

/// Someone joined the room.
#[derive(Debug, Clone, Deserialize)]
pub struct UserJoin {
    #[serde(default)]
    pub user: Value,
}

impl ContentKind for UserJoin {
    const NAME: &'static str = "user-join";
    const TAGS: &'static [EventTag] = tags!("user-join");

    fn sender_key(&self) -> Option<&str> {
        user_key(&self.user)
    }

    fn users(&self) -> Vec<&Value> {
        vec![&self.user]
    }
}

/// Someone paused their queue.
#[derive(Debug, Clone, Deserialize)]
pub struct QueuePause {
    #[serde(default)]
    pub user: Value,
}

impl ContentKind for QueuePause {
    const NAME: &'static str = "user-pause-queue";
    const TAGS: &'static [EventTag] = tags!("user-pause-queue");

    fn sender_key(&self) -> Option<&str> {
        user_key(&self.user)
    }

    fn users(&self) -> Vec<&Value> {
        vec![&self.user]
    }
}

/// A role change; `user` granted or revoked `role` on `receiver`.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleChange {
    #[serde(rename = "modUser", default)]
    pub receiver: Value,
    #[serde(rename = "role_object", default)]
    pub role: Role,
    #[serde(default)]
    pub user: Value,
}

/// A room role.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Role {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub rights: Vec<String>,
}

impl RoleChange {
    fn parties(&self) -> Vec<&Value> {
        vec![&self.user, &self.receiver]
    }
}

/// A role was granted.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct SetRole(pub RoleChange);

/// A role was revoked.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct UnsetRole(pub RoleChange);

impl ContentKind for SetRole {
    const NAME: &'static str = "user-setrole";
    const TAGS: &'static [EventTag] = tags!("user-setrole");

    fn sender_key(&self) -> Option<&str> {
        user_key(&self.0.user)
    }

    fn users(&self) -> Vec<&Value> {
        self.0.parties()
    }
}

impl ContentKind for UnsetRole {
    const NAME: &'static str = "user-unsetrole";
    const TAGS: &'static [EventTag] = tags!("user-unsetrole");

    fn sender_key(&self) -> Option<&str> {
        user_key(&self.0.user)
    }

    fn users(&self) -> Vec<&Value> {
        self.0.parties()
    }
}

/// Fresh counters of a user. Covers every `user_update*` kind.
#[derive(Debug, Clone, Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub user: Value,
}

impl UserUpdate {
    fn count(&self, key: &str) -> Option<i64> {
        self.user.get(key).and_then(Value::as_i64)
    }

    pub fn skipped_count(&self) -> Option<i64> {
        self.count("skippedCount")
    }

    pub fn played_count(&self) -> Option<i64> {
        self.count("playedCount")
    }

    pub fn songs_in_queue(&self) -> Option<i64> {
        self.count("songsInQueue")
    }

    pub fn dubs(&self) -> Option<i64> {
        self.count("dubs")
    }
}

impl ContentKind for UserUpdate {
    const NAME: &'static str = "user_update";
    const TAGS: &'static [EventTag] = tags!("user_update");

    fn sender_key(&self) -> Option<&str> {
        self.user.get("userid").and_then(Value::as_str)
    }

    fn users(&self) -> Vec<&Value> {
        vec![&self.user]
    }
}

// ============================================================================
// Content
// ============================================================================

macro_rules! contents {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// Any content kind this backend understands.
        #[derive(Debug, Clone)]
        pub enum Content {
            $($variant($ty),)*
        }

        impl Content {
            /// Decodes the payload of a message named `name`.
            ///
            /// Returns `Ok(None)` for kinds we do not know.
            pub fn decode(name: &str, data: &str) -> Result<Option<Self>, ProtocolError> {
                let name = if name.starts_with(UserUpdate::NAME) {
                    UserUpdate::NAME
                } else {
                    name
                };
                $(
                    if name == <$ty as ContentKind>::NAME {
                        return parse::<$ty>(data).map(|c| Some(Self::$variant(c)));
                    }
                )*
                Ok(None)
            }

            /// Wire name of the kind.
            pub fn kind(&self) -> &'static str {
                match self {
                    $(Self::$variant(_) => <$ty as ContentKind>::NAME,)*
                }
            }

            /// Raw user objects worth registering.
            pub fn users(&self) -> Vec<&Value> {
                match self {
                    $(Self::$variant(c) => c.users(),)*
                }
            }

            /// Builds the event for this content.
            pub fn into_event(self, backend: BoxedBackend, users: Arc<EntityCache>) -> BoxedEvent {
                match self {
                    $(Self::$variant(c) => BoxedEvent::new(DubtrackEvent::new(backend, c, users)),)*
                }
            }
        }
    };
}

contents! {
    ChatMessage(ChatMessage),
    ChatDelete(ChatDelete),
    ChatSkip(ChatSkip),
    Dub(Dub),
    QueueReorder(QueueReorder),
    QueueUpdate(QueueUpdate),
    NowPlaying(NowPlaying),
    UserJoin(UserJoin),
    QueuePause(QueuePause),
    SetRole(SetRole),
    UnsetRole(UnsetRole),
    UserUpdate(UserUpdate),
}

fn parse<C: ContentKind>(data: &str) -> Result<C, ProtocolError> {
    serde_json::from_str(data).map_err(|e| ProtocolError::MalformedContent {
        kind: C::NAME.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_chat_message() {
        let data = r#"{"chatid":"c1","message":"hi","user":{"username":"bob","userInfo":{"userid":"u1"}}}"#;
        let Some(Content::ChatMessage(chat)) = Content::decode("chat-message", data).unwrap()
        else {
            panic!("expected a chat message");
        };
        assert_eq!(chat.message, "hi");
        assert_eq!(chat.chatid.as_deref(), Some("c1"));
        assert_eq!(chat.sender_key(), Some("u1"));
    }

    #[test]
    fn decodes_now_playing() {
        let data = r#"{"songInfo":{"_id":"s1","name":"Song","type":"youtube","fkid":"yt1","songLength":180000},"song":{"userid":"dj","played":1500000000000}}"#;
        let Some(Content::NowPlaying(playing)) =
            Content::decode("room_playlist-update", data).unwrap()
        else {
            panic!("expected now playing");
        };
        assert_eq!(playing.song_id(), Some("s1"));
        assert_eq!(playing.song_info.source, "youtube");
        assert_eq!(playing.song_info.length, Some(180_000));
        assert_eq!(playing.played_at(), Some(1_500_000_000_000));
        assert_eq!(playing.sender_key(), Some("dj"));
    }

    #[test]
    fn decodes_role_change() {
        let data = r#"{"modUser":{"username":"alice","_id":"a1"},"role_object":{"label":"Mod","type":"mod","rights":["skip"]},"user":{"username":"bob","_id":"b1"}}"#;
        let Some(Content::SetRole(role)) = Content::decode("user-setrole", data).unwrap() else {
            panic!("expected setrole");
        };
        assert_eq!(role.0.role.label, "Mod");
        assert_eq!(role.0.role.rights, vec!["skip".to_string()]);
        assert_eq!(role.sender_key(), Some("b1"));
        assert_eq!(role.users().len(), 2);
    }

    #[test]
    fn user_update_prefix_selects_one_kind() {
        let data = r#"{"user":{"userid":"u1","skippedCount":2,"playedCount":7,"songsInQueue":1,"dubs":40}}"#;
        let content = Content::decode("user_update_5a1b", data).unwrap().unwrap();
        assert_eq!(content.kind(), "user_update");
        let Content::UserUpdate(update) = content else {
            panic!("expected user update");
        };
        assert_eq!(update.skipped_count(), Some(2));
        assert_eq!(update.played_count(), Some(7));
        assert_eq!(update.songs_in_queue(), Some(1));
        assert_eq!(update.dubs(), Some(40));
    }

    #[test]
    fn unknown_kind_is_none_and_bad_payload_is_error() {
        assert!(Content::decode("room-theme-update", "{}").unwrap().is_none());
        let err = Content::decode("chat-skip", "[1,").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedContent { kind, .. } if kind == "chat-skip"));
    }

    #[test]
    fn tags_put_own_tag_first() {
        assert_eq!(ChatMessage::TAGS[0].as_str(), "dubtrack.chat-message");
        assert!(ChatMessage::TAGS.contains(&EventTag::MESSAGE));
        assert!(!Dub::TAGS.contains(&EventTag::MESSAGE));
        assert_eq!(Dub::TAGS.last(), Some(&EventTag::EVENT));
        assert_eq!(UserUpdate::TAGS[1], DUBTRACK);
    }
}
