//! Batched prefetching of entity state.
//!
//! Callers announce what they will need through [`PrefetchManager::invoke_prefetch`];
//! nothing touches storage until [`PrefetchManager::execute_tasks`] runs. Each
//! distinct key gets one [`GraphContainer`] accumulating field requests, so
//! repeating a request before execution never multiplies fetch work.
//!
//! Execution runs in phases: owner rows are read first, grouped per table and
//! chunked by the configured batch size; referenced entities marked for eager
//! loading are read second, once the owning rows revealed their foreign keys;
//! entity-set fields are resolved last through their back references. Rows
//! fetched for one container satisfy every other container waiting on the
//! same entity, which is why some containers never issue a read of their own.

use std::collections::{BTreeMap, BTreeSet};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use modelsync_core::{
    Cx, DataStore, Error, FieldKind, InheritanceSchema, Layout, ModelRegistry, Outcome, Result,
    Row, TableLayout, Value,
};

use crate::key::EntityKey;
use crate::state::{EntitySetState, EntityStateCache};

/// Default cap on keys per storage fetch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 256;

/// Callback invoked when a requested value becomes known.
pub type FetchedCallback = Arc<dyn Fn(&EntityKey) + Send + Sync>;

/// One field requested for prefetch, with loading options.
#[derive(Clone, Default)]
pub struct PrefetchFieldDescriptor {
    field: String,
    fetch_referenced_entity: bool,
    eagerly_load: bool,
    item_count_limit: Option<usize>,
    fetched_callback: Option<FetchedCallback>,
}

impl PrefetchFieldDescriptor {
    /// Requests the named field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Self::default()
        }
    }

    /// For reference fields: resolve the foreign key into the target's
    /// entity key and hand it to the callback.
    #[must_use]
    pub fn fetch_referenced_entity(mut self) -> Self {
        self.fetch_referenced_entity = true;
        self
    }

    /// For reference fields: also fetch the referenced row once the
    /// foreign key is known.
    #[must_use]
    pub fn eagerly_load(mut self) -> Self {
        self.eagerly_load = true;
        self
    }

    /// For entity-set fields: load at most this many items.
    #[must_use]
    pub fn item_count_limit(mut self, limit: usize) -> Self {
        self.item_count_limit = Some(limit);
        self
    }

    /// Registers a callback fired once the field's value is known.
    ///
    /// The key handed to the callback is the owner's, or the referenced
    /// entity's when [`fetch_referenced_entity`](Self::fetch_referenced_entity)
    /// is set (in which case a NULL foreign key fires nothing).
    #[must_use]
    pub fn on_fetched(mut self, callback: impl Fn(&EntityKey) + Send + Sync + 'static) -> Self {
        self.fetched_callback = Some(Arc::new(callback));
        self
    }

    /// The requested field name.
    #[must_use]
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl fmt::Debug for PrefetchFieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchFieldDescriptor")
            .field("field", &self.field)
            .field("fetch_referenced_entity", &self.fetch_referenced_entity)
            .field("eagerly_load", &self.eagerly_load)
            .field("item_count_limit", &self.item_count_limit)
            .field("has_callback", &self.fetched_callback.is_some())
            .finish()
    }
}

/// Lifecycle of a tracked container.
///
/// There is no variant for untracked keys: a key with no container simply
/// has not been requested. Cleared containers are dropped, so the terminal
/// state is observable only as the container vanishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Requests are accumulating; no storage work yet.
    Queued,
    /// The current execution round planned a read for this container.
    TaskGenerated,
    /// Fetched state has been merged and callbacks fired.
    Executed,
    /// The container has been removed from tracking.
    Cleared,
}

/// Merged per-field request flags inside a container.
#[derive(Clone, Default)]
struct FieldRequest {
    fetch_referenced_entity: bool,
    eagerly_load: bool,
    item_count_limit: Option<usize>,
    limit_requested: bool,
    callbacks: Vec<FetchedCallback>,
}

impl FieldRequest {
    fn merge(&mut self, descriptor: &PrefetchFieldDescriptor) {
        self.fetch_referenced_entity |= descriptor.fetch_referenced_entity;
        self.eagerly_load |= descriptor.eagerly_load;
        // An unlimited request outranks any limit; otherwise the larger
        // limit wins.
        if self.limit_requested {
            self.item_count_limit = match (self.item_count_limit, descriptor.item_count_limit) {
                (Some(a), Some(b)) => Some(a.max(b)),
                _ => None,
            };
        } else {
            self.item_count_limit = descriptor.item_count_limit;
            self.limit_requested = true;
        }
        if let Some(callback) = &descriptor.fetched_callback {
            self.callbacks.push(Arc::clone(callback));
        }
    }
}

impl fmt::Debug for FieldRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldRequest")
            .field("fetch_referenced_entity", &self.fetch_referenced_entity)
            .field("eagerly_load", &self.eagerly_load)
            .field("item_count_limit", &self.item_count_limit)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Accumulated prefetch requests for one entity key.
#[derive(Debug)]
pub struct GraphContainer {
    key: EntityKey,
    effective_type: String,
    state: ContainerState,
    fields: BTreeMap<String, FieldRequest>,
}

impl GraphContainer {
    /// The tracked entity key.
    #[must_use]
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    /// The most derived type the key has been requested as.
    #[must_use]
    pub fn effective_type(&self) -> &str {
        &self.effective_type
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Requested field names, in sorted order.
    pub fn requested_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Whether the field has been requested on this container.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

/// Prefetch tuning knobs.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Upper bound on keys per storage fetch.
    pub max_batch_size: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

/// Counters from one execution round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrefetchStats {
    /// Containers consumed by the round.
    pub containers_executed: usize,
    /// Storage fetches issued.
    pub fetches_issued: usize,
    /// Rows returned across all fetches.
    pub rows_fetched: usize,
    /// Fetched-callbacks invoked.
    pub callbacks_fired: usize,
}

/// One planned read against one table.
#[derive(Debug, Default)]
struct TableReadPlan {
    key_column: String,
    columns: BTreeSet<String>,
    keys: Vec<Value>,
}

/// Collects field requests per key and executes them in batched reads.
pub struct PrefetchManager {
    registry: Arc<ModelRegistry>,
    layout: Arc<Layout>,
    max_batch_size: usize,
    containers: HashMap<EntityKey, GraphContainer>,
    queue: Vec<EntityKey>,
    cache: EntityStateCache,
    /// Table name to the model type whose rows it anchors.
    table_owner: HashMap<String, String>,
}

impl PrefetchManager {
    /// Creates a manager over the given model.
    ///
    /// A zero batch size is clamped to one so partitioning always
    /// terminates.
    #[must_use]
    pub fn new(registry: Arc<ModelRegistry>, layout: Arc<Layout>, config: PrefetchConfig) -> Self {
        let max_batch_size = if config.max_batch_size == 0 {
            tracing::warn!("max batch size 0 clamped to 1");
            1
        } else {
            config.max_batch_size
        };
        let mut table_owner = HashMap::new();
        for ty in registry.types() {
            for table in layout.owned_tables(&ty.name) {
                table_owner.insert(table.clone(), ty.name.clone());
            }
        }
        Self {
            registry,
            layout,
            max_batch_size,
            containers: HashMap::new(),
            queue: Vec::new(),
            cache: EntityStateCache::new(),
            table_owner,
        }
    }

    /// The entity state accumulated so far.
    #[must_use]
    pub fn state(&self) -> &EntityStateCache {
        &self.cache
    }

    /// Number of containers waiting for execution.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Whether a container is tracked for the key.
    #[must_use]
    pub fn is_queued(&self, key: &EntityKey) -> bool {
        self.containers.contains_key(key)
    }

    /// The container tracked for the key, if any.
    #[must_use]
    pub fn container(&self, key: &EntityKey) -> Option<&GraphContainer> {
        self.containers.get(key)
    }

    /// Queues field requests for `key`, merging into an existing container
    /// when the key is already tracked. Performs no storage work.
    ///
    /// `type_hint` overrides the key's own exact-type annotation; one of
    /// the two must resolve the key to a registered type inside its
    /// hierarchy. All arguments are validated before any state changes.
    ///
    /// # Errors
    ///
    /// [`Error::Argument`] for keys outside the registered model or an
    /// unresolvable type; [`Error::FieldRequest`] when a descriptor names
    /// a field the resolved type cannot reach, or carries options that do
    /// not fit the field's kind.
    pub fn invoke_prefetch(
        &mut self,
        key: EntityKey,
        type_hint: Option<&str>,
        descriptors: &[PrefetchFieldDescriptor],
    ) -> Result<()> {
        let registry = Arc::clone(&self.registry);

        let root = key.hierarchy_root();
        if registry.root_of(root).is_none_or(|ty| ty.name != root) {
            return Err(Error::argument(
                "key",
                format!("'{root}' is not a registered hierarchy root"),
            ));
        }
        if key.id().is_null() {
            return Err(Error::argument("key", "entity identifier must not be null"));
        }

        let Some(effective) = type_hint.or_else(|| key.exact_type()) else {
            return Err(Error::argument(
                "type_hint",
                format!("key {key} does not resolve to an exact type"),
            ));
        };
        let Some(effective_ty) = registry.get(effective) else {
            return Err(Error::argument(
                "type_hint",
                format!("'{effective}' is not a registered type"),
            ));
        };
        if !registry.is_same_or_descendant(effective, root) {
            return Err(Error::argument(
                "type_hint",
                format!("'{effective}' is outside hierarchy '{root}'"),
            ));
        }
        let schema = registry.hierarchy_of(root).map(|h| h.schema);
        if schema == Some(InheritanceSchema::ConcreteTable) && effective_ty.is_abstract {
            return Err(Error::argument(
                "type_hint",
                format!("abstract '{effective}' has no table to read rows from"),
            ));
        }

        for descriptor in descriptors {
            if descriptor.field.is_empty() {
                return Err(Error::argument(
                    "descriptors",
                    "field name must not be empty",
                ));
            }
            let Some((_, field_def)) = registry.find_field(effective, &descriptor.field) else {
                return Err(Error::field_request(
                    descriptor.field.clone(),
                    Some(effective.to_string()),
                    "field is not reachable from the requested type",
                ));
            };
            if descriptor.eagerly_load && !field_def.is_reference() {
                return Err(Error::field_request(
                    descriptor.field.clone(),
                    Some(effective.to_string()),
                    "eager loading applies to reference fields only",
                ));
            }
            if descriptor.fetch_referenced_entity && !field_def.is_reference() {
                return Err(Error::field_request(
                    descriptor.field.clone(),
                    Some(effective.to_string()),
                    "referenced-entity resolution applies to reference fields only",
                ));
            }
            if descriptor.item_count_limit.is_some() && !field_def.is_entity_set() {
                return Err(Error::field_request(
                    descriptor.field.clone(),
                    Some(effective.to_string()),
                    "item-count limits apply to entity-set fields only",
                ));
            }
        }

        let container = match self.containers.entry(key.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => {
                let container = entry.into_mut();
                if registry.is_same_or_descendant(effective, &container.effective_type) {
                    container.effective_type = effective.to_string();
                } else if !registry.is_same_or_descendant(&container.effective_type, effective) {
                    tracing::warn!(
                        key = %container.key,
                        tracked = %container.effective_type,
                        requested = %effective,
                        "conflicting type hints for key; keeping the earlier one"
                    );
                }
                container
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                self.queue.push(key.clone());
                let effective_type = effective.to_string();
                entry.insert(GraphContainer {
                    key,
                    effective_type,
                    state: ContainerState::Queued,
                    fields: BTreeMap::new(),
                })
            }
        };
        for descriptor in descriptors {
            container
                .fields
                .entry(descriptor.field.clone())
                .or_default()
                .merge(descriptor);
        }
        tracing::trace!(
            key = %container.key,
            fields = container.fields.len(),
            "prefetch request queued"
        );
        Ok(())
    }

    /// Executes every queued container against `store`.
    ///
    /// Partitions planned reads into per-table batches of at most the
    /// configured size, merges fetched rows into the entity state cache,
    /// resolves references and entity sets, and fires callbacks. All
    /// consumed containers are cleared, also when the round fails partway.
    #[tracing::instrument(level = "debug", skip_all, fields(queued = self.queue.len()))]
    pub async fn execute_tasks<S: DataStore>(
        &mut self,
        cx: &Cx,
        store: &S,
    ) -> Outcome<PrefetchStats, Error> {
        let mut stats = PrefetchStats::default();
        if self.queue.is_empty() {
            return Outcome::Ok(stats);
        }

        let keys = std::mem::take(&mut self.queue);
        let mut containers: Vec<GraphContainer> = keys
            .iter()
            .filter_map(|key| self.containers.remove(key))
            .collect();
        stats.containers_executed = containers.len();

        // Phase 1: owner rows.
        let plans = self.plan_owner_reads(&mut containers);
        match self.run_table_reads(cx, store, plans, &mut stats).await {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        // Phase 2: row values are known now; fire scalar and reference
        // callbacks, resolve foreign keys, and read eager targets not
        // already in cache.
        let eager_plans = self.resolve_fetched_values(&containers, &mut stats);
        match self
            .run_table_reads(cx, store, eager_plans, &mut stats)
            .await
        {
            Outcome::Ok(()) => {}
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        }

        // Phase 3: entity sets through their back references.
        for container in &containers {
            let set_fields: Vec<(String, Option<usize>)> = container
                .fields
                .iter()
                .filter(|(field, _)| {
                    self.registry
                        .find_field(&container.effective_type, field)
                        .is_some_and(|(_, def)| def.is_entity_set())
                })
                .map(|(field, request)| (field.clone(), request.item_count_limit))
                .collect();
            for (field, limit) in set_fields {
                let covered = self
                    .cache
                    .entity_set(&container.key, &field)
                    .is_some_and(|set| set.covers(limit));
                if !covered {
                    match self
                        .fetch_entity_set(
                            cx,
                            store,
                            &container.key,
                            &container.effective_type,
                            &field,
                            limit,
                            &mut stats,
                        )
                        .await
                    {
                        Outcome::Ok(Some(set)) => {
                            self.cache.record_entity_set(&container.key, &field, set);
                        }
                        Outcome::Ok(None) => continue,
                        Outcome::Err(e) => return Outcome::Err(e),
                        Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                        Outcome::Panicked(p) => return Outcome::Panicked(p),
                    }
                }
                if let Some(request) = container.fields.get(&field) {
                    fire_callbacks(&request.callbacks, &container.key, &mut stats);
                }
            }
        }

        for container in &mut containers {
            container.state = ContainerState::Executed;
            tracing::trace!(key = %container.key, "container executed");
            container.state = ContainerState::Cleared;
        }
        tracing::debug!(
            containers = stats.containers_executed,
            fetches = stats.fetches_issued,
            rows = stats.rows_fetched,
            callbacks = stats.callbacks_fired,
            "prefetch round complete"
        );
        Outcome::Ok(stats)
    }

    /// Plans phase-1 reads: one per table touched by an unsatisfied
    /// column-bearing field, plus a key-only read for field-less
    /// containers.
    fn plan_owner_reads(
        &self,
        containers: &mut [GraphContainer],
    ) -> BTreeMap<String, TableReadPlan> {
        let registry = Arc::clone(&self.registry);
        let layout = Arc::clone(&self.layout);
        let mut plans: BTreeMap<String, TableReadPlan> = BTreeMap::new();

        for container in containers.iter_mut() {
            let mut planned = false;
            for field in container.fields.keys() {
                let Some((declaring, field_def)) =
                    registry.find_field(&container.effective_type, field)
                else {
                    continue;
                };
                if !field_def.stores_column() {
                    continue;
                }
                if self.cache.field(&container.key, field).is_some() {
                    // Satisfied as a byproduct of an earlier fetch.
                    continue;
                }
                let Some(placement) =
                    layout.locate(&declaring.name, field, &container.effective_type)
                else {
                    continue;
                };
                let Some(table) = layout.table(&placement.table) else {
                    continue;
                };
                plan_read(&mut plans, table, Some(&placement.column), container.key.id());
                planned = true;
            }
            if container.fields.is_empty() && !self.cache.contains_entity(&container.key) {
                if let Some(table) = layout
                    .anchor_table(&container.effective_type)
                    .and_then(|anchor| layout.table(anchor))
                {
                    plan_read(&mut plans, table, None, container.key.id());
                    planned = true;
                }
            }
            if planned {
                container.state = ContainerState::TaskGenerated;
            }
        }
        plans
    }

    /// Settles column-bearing field requests after phase 1: fires their
    /// callbacks, resolves foreign keys, and plans eager reads for targets
    /// the cache does not hold yet.
    fn resolve_fetched_values(
        &self,
        containers: &[GraphContainer],
        stats: &mut PrefetchStats,
    ) -> BTreeMap<String, TableReadPlan> {
        let registry = Arc::clone(&self.registry);
        let mut pending: Vec<(EntityKey, String)> = Vec::new();

        for container in containers {
            for (field, request) in &container.fields {
                let Some((_, field_def)) = registry.find_field(&container.effective_type, field)
                else {
                    continue;
                };
                if !field_def.stores_column() {
                    continue;
                }
                let Some(value) = self.cache.field(&container.key, field).cloned() else {
                    // Owner row absent; the value never became known.
                    continue;
                };
                if field_def.is_scalar() {
                    fire_callbacks(&request.callbacks, &container.key, stats);
                    continue;
                }
                let resolved = if value.is_null() {
                    None
                } else {
                    field_def.target().and_then(|target| {
                        registry
                            .root_of(target)
                            .map(|r| (EntityKey::new(r.name.clone(), value.clone()), target))
                    })
                };
                if request.fetch_referenced_entity {
                    if let Some((target_key, _)) = &resolved {
                        fire_callbacks(&request.callbacks, target_key, stats);
                    }
                } else {
                    fire_callbacks(&request.callbacks, &container.key, stats);
                }
                if request.eagerly_load {
                    if let Some((target_key, target_type)) = resolved {
                        let known = self.cache.contains_entity(&target_key)
                            || pending.iter().any(|(key, _)| *key == target_key);
                        if !known {
                            pending.push((target_key, target_type.to_string()));
                        }
                    }
                }
            }
        }

        let mut plans = BTreeMap::new();
        for (target_key, target_type) in &pending {
            self.plan_entity_read(&mut plans, target_key, target_type);
        }
        plans
    }

    /// Plans a full non-lazy read of one entity as `effective_type`.
    ///
    /// Concrete-table hierarchies read every concrete subtree table; the
    /// row's presence in one of them settles its exact type.
    fn plan_entity_read(
        &self,
        plans: &mut BTreeMap<String, TableReadPlan>,
        key: &EntityKey,
        effective_type: &str,
    ) {
        let registry = Arc::clone(&self.registry);
        let layout = Arc::clone(&self.layout);
        let Some(hierarchy) = layout.hierarchy_of(effective_type) else {
            return;
        };
        let anchors: Vec<String> = match hierarchy.schema {
            InheritanceSchema::SingleTable | InheritanceSchema::ClassTable => {
                vec![effective_type.to_string()]
            }
            InheritanceSchema::ConcreteTable => registry
                .concrete_subtree(effective_type)
                .into_iter()
                .map(|ty| ty.name.clone())
                .collect(),
        };
        for anchor_type in &anchors {
            for (declaring, field_def) in registry.all_fields(anchor_type) {
                if field_def.lazy || !field_def.stores_column() {
                    continue;
                }
                let Some(placement) = layout.locate(&declaring.name, &field_def.name, anchor_type)
                else {
                    continue;
                };
                if let Some(table) = layout.table(&placement.table) {
                    plan_read(plans, table, Some(&placement.column), key.id());
                }
            }
            if let Some(table) = layout
                .anchor_table(anchor_type)
                .and_then(|anchor| layout.table(anchor))
            {
                plan_read(plans, table, None, key.id());
            }
        }
    }

    /// Runs the planned reads, chunked by the batch size, and merges every
    /// returned row into the cache.
    async fn run_table_reads<S: DataStore>(
        &mut self,
        cx: &Cx,
        store: &S,
        plans: BTreeMap<String, TableReadPlan>,
        stats: &mut PrefetchStats,
    ) -> Outcome<(), Error> {
        for (table, plan) in plans {
            let columns: Vec<String> = plan.columns.iter().cloned().collect();
            for chunk in plan.keys.chunks(self.max_batch_size) {
                match store
                    .fetch_by_keys(cx, &table, &plan.key_column, chunk, &columns)
                    .await
                {
                    Outcome::Ok(rows) => {
                        stats.fetches_issued += 1;
                        stats.rows_fetched += rows.len();
                        for row in &rows {
                            self.merge_row(&table, row);
                        }
                    }
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
        }
        Outcome::Ok(())
    }

    /// Loads one entity-set field of one owner through its back reference.
    ///
    /// Fetches one row beyond the limit to learn whether the set was
    /// truncated. Returns `Ok(None)` when the field does not resolve to an
    /// entity set (it then simply records nothing).
    async fn fetch_entity_set<S: DataStore>(
        &mut self,
        cx: &Cx,
        store: &S,
        owner: &EntityKey,
        owner_type: &str,
        field: &str,
        limit: Option<usize>,
        stats: &mut PrefetchStats,
    ) -> Outcome<Option<EntitySetState>, Error> {
        let registry = Arc::clone(&self.registry);
        let layout = Arc::clone(&self.layout);

        let Some((_, field_def)) = registry.find_field(owner_type, field) else {
            return Outcome::Ok(None);
        };
        let FieldKind::EntitySet {
            target,
            back_reference,
        } = &field_def.kind
        else {
            return Outcome::Ok(None);
        };
        let Some((declaring, _)) = registry.find_field(target, back_reference) else {
            return Outcome::Err(Error::field_request(
                back_reference.clone(),
                Some(target.clone()),
                "back reference is not declared on the entity-set target",
            ));
        };
        let placements = layout.placements(&declaring.name, back_reference).to_vec();
        let fetch_limit = limit.map(|l| l + 1);
        let mut items: Vec<EntityKey> = Vec::new();

        for placement in &placements {
            let columns = match layout.table(&placement.table) {
                Some(table) => non_lazy_columns(&registry, table),
                None => continue,
            };
            match store
                .fetch_matching(
                    cx,
                    &placement.table,
                    &placement.column,
                    owner.id(),
                    &columns,
                    fetch_limit,
                )
                .await
            {
                Outcome::Ok(rows) => {
                    stats.fetches_issued += 1;
                    stats.rows_fetched += rows.len();
                    for row in &rows {
                        if let Some(item) = self.merge_row(&placement.table, row) {
                            items.push(item);
                        }
                    }
                }
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        }

        let set = match limit {
            Some(l) if items.len() > l => {
                items.truncate(l);
                EntitySetState::new(items, false, l)
            }
            _ => {
                let total = items.len();
                EntitySetState::new(items, true, total)
            }
        };
        Outcome::Ok(Some(set))
    }

    /// Folds one fetched row into the cache and returns its entity key.
    ///
    /// The key column lands under the hierarchy's key field, a
    /// discriminator refines the exact type, and concrete-table rows take
    /// their exact type from the table itself.
    fn merge_row(&mut self, table: &str, row: &Row) -> Option<EntityKey> {
        let registry = Arc::clone(&self.registry);
        let layout = Arc::clone(&self.layout);
        let table_layout = layout.table(table)?;
        let owner_type = self.table_owner.get(table)?.clone();
        let root = registry.root_of(&owner_type)?.name.clone();
        let hierarchy = layout.hierarchy(&root)?;

        let id = row.get_by_name(&table_layout.key_column)?.clone();
        if id.is_null() {
            return None;
        }
        let key = EntityKey::new(root.clone(), id);
        self.cache
            .upsert_field(&key, &hierarchy.key_field, key.id().clone());

        for (name, value) in row.columns().names().iter().zip(row.values()) {
            if *name == table_layout.key_column {
                continue;
            }
            if table_layout.discriminator_column.as_deref() == Some(name.as_str()) {
                if let Some(def) = registry.hierarchy_of(&root) {
                    self.cache
                        .upsert_field(&key, &def.discriminator_field, value.clone());
                }
                if let Value::Text(type_name) = value {
                    if registry.contains(type_name)
                        && registry.is_same_or_descendant(type_name, &root)
                    {
                        self.cache.note_exact_type(&key, type_name);
                    } else {
                        tracing::warn!(
                            table = %table,
                            value = %type_name,
                            "discriminator names no type in this hierarchy"
                        );
                    }
                }
                continue;
            }
            if let Some(column) = table_layout.column(name) {
                self.cache.upsert_field(&key, &column.field, value.clone());
            }
        }

        if hierarchy.schema == InheritanceSchema::ConcreteTable {
            self.cache.note_exact_type(&key, &owner_type);
        }
        Some(key)
    }
}

impl fmt::Debug for PrefetchManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefetchManager")
            .field("max_batch_size", &self.max_batch_size)
            .field("queued", &self.queue.len())
            .field("cached_entities", &self.cache.entity_count())
            .finish()
    }
}

fn fire_callbacks(callbacks: &[FetchedCallback], key: &EntityKey, stats: &mut PrefetchStats) {
    for callback in callbacks {
        callback(key);
        stats.callbacks_fired += 1;
    }
}

/// Adds a keyed read of `table` to the plan set.
fn plan_read(
    plans: &mut BTreeMap<String, TableReadPlan>,
    table: &TableLayout,
    column: Option<&str>,
    id: &Value,
) {
    let plan = plans.entry(table.name.clone()).or_insert_with(|| {
        let mut columns = BTreeSet::new();
        columns.insert(table.key_column.clone());
        if let Some(discriminator) = &table.discriminator_column {
            columns.insert(discriminator.clone());
        }
        TableReadPlan {
            key_column: table.key_column.clone(),
            columns,
            keys: Vec::new(),
        }
    });
    if let Some(column) = column {
        plan.columns.insert(column.to_string());
    }
    if !plan.keys.contains(id) {
        plan.keys.push(id.clone());
    }
}

/// Every column of `table` worth fetching for materialization: the key,
/// the discriminator when present, and all non-lazy field columns.
fn non_lazy_columns(registry: &ModelRegistry, table: &TableLayout) -> Vec<String> {
    let mut columns = vec![table.key_column.clone()];
    if let Some(discriminator) = &table.discriminator_column {
        columns.push(discriminator.clone());
    }
    for column in &table.columns {
        let lazy = registry
            .find_field(&column.declaring_type, &column.field)
            .is_some_and(|(_, def)| def.lazy);
        if !lazy {
            columns.push(column.column.clone());
        }
    }
    columns
}
