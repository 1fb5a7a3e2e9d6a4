//! Session-scoped cache of fetched entity state.
//!
//! Fetched rows are folded into per-entity field maps keyed by [`EntityKey`].
//! Entity-set loads keep a side record per `(owner, field)` pair so later
//! requests can tell whether the cached slice already answers them.

use std::collections::{BTreeMap, HashMap};

use modelsync_core::Value;

use crate::key::EntityKey;

/// Cached field values for one entity row.
#[derive(Debug, Clone, Default)]
pub struct EntityState {
    exact_type: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl EntityState {
    /// Concrete type of the row, once a discriminator or table origin
    /// revealed it.
    #[must_use]
    pub fn exact_type(&self) -> Option<&str> {
        self.exact_type.as_deref()
    }

    /// Cached value of a field, by field name.
    ///
    /// Reference fields store the raw foreign-key value under the field's
    /// own name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Whether the field has been fetched for this row.
    #[must_use]
    pub fn is_field_known(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Names of all fetched fields, in sorted order.
    pub fn known_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// Load state of one entity-set field on one owner row.
#[derive(Debug, Clone)]
pub struct EntitySetState {
    items: Vec<EntityKey>,
    is_fully_loaded: bool,
    total_item_count: usize,
}

impl EntitySetState {
    /// Records the outcome of an entity-set load.
    #[must_use]
    pub fn new(items: Vec<EntityKey>, is_fully_loaded: bool, total_item_count: usize) -> Self {
        Self {
            items,
            is_fully_loaded,
            total_item_count,
        }
    }

    /// Keys of the loaded member rows, in storage order.
    #[must_use]
    pub fn items(&self) -> &[EntityKey] {
        &self.items
    }

    /// Whether every member of the set has been loaded.
    #[must_use]
    pub fn is_fully_loaded(&self) -> bool {
        self.is_fully_loaded
    }

    /// Number of members known to exist.
    ///
    /// When the load was truncated by an item-count limit this is the limit,
    /// not the true population.
    #[must_use]
    pub fn total_item_count(&self) -> usize {
        self.total_item_count
    }

    /// Whether this record already answers a request with the given limit.
    ///
    /// A fully loaded set answers anything. A truncated set answers requests
    /// whose limit fits inside the items already held; an unlimited request
    /// against a truncated set does not.
    #[must_use]
    pub fn covers(&self, requested_limit: Option<usize>) -> bool {
        if self.is_fully_loaded {
            return true;
        }
        requested_limit.is_some_and(|limit| limit <= self.items.len())
    }
}

/// All entity state accumulated by one session.
#[derive(Debug, Default)]
pub struct EntityStateCache {
    entities: HashMap<EntityKey, EntityState>,
    entity_sets: HashMap<(EntityKey, String), EntitySetState>,
}

impl EntityStateCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the cached state of an entity.
    #[must_use]
    pub fn entity(&self, key: &EntityKey) -> Option<&EntityState> {
        self.entities.get(key)
    }

    /// Whether any state has been cached for the key.
    #[must_use]
    pub fn contains_entity(&self, key: &EntityKey) -> bool {
        self.entities.contains_key(key)
    }

    /// Shorthand for one field of one entity.
    #[must_use]
    pub fn field(&self, key: &EntityKey, field: &str) -> Option<&Value> {
        self.entities.get(key).and_then(|state| state.field(field))
    }

    /// Stores a fetched field value, creating the entity record on first
    /// contact. A later fetch of the same field overwrites the earlier value.
    pub fn upsert_field(&mut self, key: &EntityKey, field: &str, value: Value) {
        self.entities
            .entry(key.clone())
            .or_default()
            .fields
            .insert(field.to_string(), value);
    }

    /// Records the concrete type observed for a row.
    ///
    /// Freshly observed discriminator or table provenance wins over an
    /// earlier annotation.
    pub fn note_exact_type(&mut self, key: &EntityKey, exact_type: &str) {
        self.entities.entry(key.clone()).or_default().exact_type = Some(exact_type.to_string());
    }

    /// Looks up the load record of an entity-set field.
    #[must_use]
    pub fn entity_set(&self, key: &EntityKey, field: &str) -> Option<&EntitySetState> {
        self.entity_sets.get(&(key.clone(), field.to_string()))
    }

    /// Stores the outcome of an entity-set load, replacing any earlier
    /// record for the same `(owner, field)` pair.
    pub fn record_entity_set(&mut self, key: &EntityKey, field: &str, state: EntitySetState) {
        self.entity_sets
            .insert((key.clone(), field.to_string()), state);
    }

    /// Number of entities with cached state.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Number of `(owner, field)` entity-set records.
    #[must_use]
    pub fn entity_set_count(&self) -> usize {
        self.entity_sets.len()
    }

    /// Drops all cached state.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.entity_sets.clear();
    }
}
