//! Entity registration from raw user objects.
//!
//! Dubtrack sends users in several shapes depending on the endpoint:
//!
//! | Shape | Id | Extra fields |
//! |-------|----|--------------|
//! | chat / join | `userInfo.userid` | top-level `created` |
//! | counters | `userid` | `dubs` |
//! | room members | `_user._id` | `_user.username`, `_user.created` |
//! | role changes | `_id` | |
//!
//! `username`, `playedCount`, `songsInQueue` and `skippedCount` are read from
//! the top level whatever the shape.

use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use abot_core::{Entity, EntityCache, EntityUpdate};

/// Counter holding the number of up-dubs received.
pub const DUBS: &str = "dubs";
/// Counter holding the number of songs played.
pub const PLAYED_COUNT: &str = "played_count";
/// Counter holding the number of queued songs.
pub const SONGS_IN_QUEUE: &str = "songs_in_queue";
/// Counter holding the number of skips.
pub const SKIPS: &str = "skips";

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn int_at(value: &Value, pointer: &str) -> Option<i64> {
    value.pointer(pointer).and_then(Value::as_i64)
}

/// Extracts the user id from any known shape.
pub fn user_id(user: &Value) -> Option<&str> {
    str_at(user, "/userInfo/userid")
        .or_else(|| str_at(user, "/userid"))
        .or_else(|| str_at(user, "/_user/_id"))
        .or_else(|| str_at(user, "/_id"))
}

/// The id of `user`, falling back to its username.
pub fn user_key(user: &Value) -> Option<&str> {
    user_id(user)
        .or_else(|| str_at(user, "/username"))
        .or_else(|| str_at(user, "/_user/username"))
}

/// Creates or updates the entity described by `user`.
///
/// Returns `None` when no id can be found.
pub fn register_user(cache: &EntityCache, user: &Value) -> Option<Arc<Entity>> {
    let Some(id) = user_id(user) else {
        trace!(?user, "User object without id, skipping");
        return None;
    };

    let mut update = EntityUpdate::default();

    if user.get("userInfo").is_some() {
        if let Some(created) = int_at(user, "/created") {
            update = update.created(created);
        }
    } else if user.get("userid").is_some() {
        if let Some(dubs) = int_at(user, "/dubs") {
            update = update.counter(DUBS, dubs);
        }
    } else if let Some(inner) = user.get("_user") {
        if let Some(name) = str_at(inner, "/username") {
            update = update.username(name);
        }
        if let Some(created) = int_at(inner, "/created") {
            update = update.created(created);
        }
    }

    if let Some(name) = str_at(user, "/username") {
        update = update.username(name);
    }
    for (key, counter) in [
        ("/playedCount", PLAYED_COUNT),
        ("/songsInQueue", SONGS_IN_QUEUE),
        ("/skippedCount", SKIPS),
    ] {
        if let Some(value) = int_at(user, key) {
            update = update.counter(counter, value);
        }
    }

    Some(cache.upsert(id, update))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn chat_shape() {
        let cache = EntityCache::new();
        let user = json!({"username": "bob", "created": 1400000000000_i64, "userInfo": {"userid": "u1"}});
        let entity = register_user(&cache, &user).unwrap();
        assert_eq!(entity.id(), "u1");
        assert_eq!(entity.username().as_deref(), Some("bob"));
        assert_eq!(entity.info().created, Some(1_400_000_000_000));
    }

    #[test]
    fn member_shape() {
        let cache = EntityCache::new();
        let user = json!({"_user": {"_id": "u2", "username": "carol", "created": 5}, "skippedCount": 3});
        let entity = register_user(&cache, &user).unwrap();
        assert_eq!(entity.id(), "u2");
        assert_eq!(entity.username().as_deref(), Some("carol"));
        assert_eq!(entity.counter(SKIPS), Some(3));
    }

    #[test]
    fn counters_update_in_place() {
        let cache = EntityCache::new();
        let first = register_user(&cache, &json!({"userInfo": {"userid": "u1"}, "username": "bob"})).unwrap();
        register_user(
            &cache,
            &json!({"userid": "u1", "dubs": 12, "playedCount": 4, "songsInQueue": 2}),
        );
        assert_eq!(first.counter(DUBS), Some(12));
        assert_eq!(first.counter(PLAYED_COUNT), Some(4));
        assert_eq!(first.counter(SONGS_IN_QUEUE), Some(2));
        assert_eq!(first.username().as_deref(), Some("bob"));
    }

    #[test]
    fn missing_id_is_skipped() {
        let cache = EntityCache::new();
        assert!(register_user(&cache, &json!({"username": "ghost"})).is_none());
        assert!(cache.find("ghost").is_none());
    }

    #[test]
    fn key_falls_back_to_username() {
        assert_eq!(user_key(&json!({"_id": "a1", "username": "alice"})), Some("a1"));
        assert_eq!(user_key(&json!({"username": "alice"})), Some("alice"));
        assert_eq!(user_key(&Value::Null), None);
    }
}
