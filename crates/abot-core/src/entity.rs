//! Participants known to a backend.
//!
//! An [`Entity`] for a given identifier is created once and then updated in
//! place, so every holder of an `Arc<Entity>` observes the same counters. The
//! [`EntityCache`] owns that identity map. Entries live as long as the owning
//! backend unless evicted explicitly.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

/// Mutable profile data of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityInfo {
    /// Display name.
    pub username: Option<String>,
    /// Backend-specific counters (play count, votes, ...).
    pub counters: BTreeMap<String, i64>,
    /// Account creation time, unix milliseconds.
    pub created: Option<i64>,
}

/// A partial update merged into [`EntityInfo`].
///
/// Absent fields leave the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityUpdate {
    /// New display name.
    pub username: Option<String>,
    /// Counters to overwrite.
    pub counters: BTreeMap<String, i64>,
    /// Account creation time, unix milliseconds.
    pub created: Option<i64>,
}

impl EntityUpdate {
    /// Sets the display name.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Sets a counter.
    pub fn counter(mut self, name: impl Into<String>, value: i64) -> Self {
        self.counters.insert(name.into(), value);
        self
    }

    /// Sets the creation time.
    pub fn created(mut self, created: i64) -> Self {
        self.created = Some(created);
        self
    }

    /// Whether applying this update would change nothing.
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.counters.is_empty() && self.created.is_none()
    }
}

impl EntityInfo {
    /// Merges `update` into this profile.
    pub fn merge(&mut self, update: EntityUpdate) {
        if let Some(username) = update.username {
            self.username = Some(username);
        }
        if let Some(created) = update.created {
            self.created = Some(created);
        }
        self.counters.extend(update.counters);
    }
}

/// A participant (user) known to a backend.
pub struct Entity {
    id: String,
    info: RwLock<EntityInfo>,
}

impl Entity {
    /// Creates an entity with an empty profile.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            info: RwLock::new(EntityInfo::default()),
        }
    }

    /// Stable identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current display name.
    pub fn username(&self) -> Option<String> {
        self.info.read().username.clone()
    }

    /// Current value of a counter.
    pub fn counter(&self, name: &str) -> Option<i64> {
        self.info.read().counters.get(name).copied()
    }

    /// Copy of the whole profile.
    pub fn info(&self) -> EntityInfo {
        self.info.read().clone()
    }

    /// Merges `update` in place.
    pub fn update(&self, update: EntityUpdate) {
        self.info.write().merge(update);
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Entity {}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.info.read();
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("username", &info.username)
            .field("counters", &info.counters)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.info.read().username.as_deref() {
            Some(name) => write!(f, "{name}#{}", self.id),
            None => write!(f, "#{}", self.id),
        }
    }
}

// =============================================================================
// Entity Cache
// =============================================================================

/// Identity map of entities keyed by id.
#[derive(Default)]
pub struct EntityCache {
    entries: RwLock<HashMap<String, Arc<Entity>>>,
}

impl EntityCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the entity for `id` if needed, then merges `update` into it.
    pub fn upsert(&self, id: &str, update: EntityUpdate) -> Arc<Entity> {
        let entity = {
            let mut entries = self.entries.write();
            Arc::clone(
                entries
                    .entry(id.to_string())
                    .or_insert_with(|| Arc::new(Entity::new(id))),
            )
        };
        if !update.is_empty() {
            trace!(entity_id = %id, ?update, "Updating entity");
            entity.update(update);
        }
        entity
    }

    /// Looks an entity up by id.
    pub fn get(&self, id: &str) -> Option<Arc<Entity>> {
        self.entries.read().get(id).cloned()
    }

    /// Looks an entity up by id, falling back to its display name.
    pub fn find(&self, id_or_name: &str) -> Option<Arc<Entity>> {
        if let Some(entity) = self.get(id_or_name) {
            return Some(entity);
        }
        self.entries
            .read()
            .values()
            .find(|e| e.username().as_deref() == Some(id_or_name))
            .cloned()
    }

    /// Removes an entity. Existing handles keep working but are no longer shared.
    pub fn evict(&self, id: &str) -> Option<Arc<Entity>> {
        self.entries.write().remove(id)
    }

    /// Removes every entity.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Snapshot of every cached entity.
    pub fn all(&self) -> Vec<Arc<Entity>> {
        self.entries.read().values().cloned().collect()
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCache")
            .field("len", &self.len())
            .finish()
    }
}
