//! Dubtrack data model: socket frames, content kinds and events.

pub mod content;
pub mod event;
pub mod wire;

pub use content::{
    ChatDelete, ChatMessage, ChatSkip, Content, ContentKind, Dub, DubTally, NowPlaying,
    QueuePause, QueueReorder, QueueUpdate, Role, RoleChange, SetRole, SongInfo, SongPlay,
    UnsetRole, UserJoin, UserUpdate, DUBTRACK,
};
pub use event::{
    ChatDeleteEvent, ChatMessageEvent, ChatSkipEvent, DubEvent, DubtrackEvent, PlayingEvent,
    QueuePauseEvent, QueueReorderEvent, QueueUpdateEvent, SetRoleEvent, UnsetRoleEvent,
    UserJoinEvent, UserUpdateEvent,
};
