//! modelsync - hint-driven schema synchronization and prefetch for
//! statically-registered domain models.
//!
//! modelsync keeps a storage backend's schema in step with a declared
//! model and batches the reads an object graph needs, providing:
//!
//! - A validated model registry with single-table, class-table, and
//!   concrete-table inheritance
//! - Schema comparison that never guesses: destructive or ambiguous
//!   changes require explicit upgrade hints
//! - Single-transaction upgrades with a model snapshot stored alongside
//!   the schema
//! - A prefetch manager that deduplicates entity requests and reads
//!   whole batches per table
//!
//! # Quick Start
//!
//! ```ignore
//! use modelsync::prelude::*;
//!
//! let registry = ModelRegistry::builder()
//!     .register(
//!         TypeDef::new("app.Person")
//!             .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
//!             .field(FieldDef::scalar("name", ValueType::Text))
//!             .field(FieldDef::reference("employer", "app.Company").nullable()),
//!     )
//!     .register(
//!         TypeDef::new("app.Company")
//!             .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
//!             .field(FieldDef::scalar("title", ValueType::Text)),
//!     )
//!     .build()?;
//!
//! async fn example(cx: &Cx, store: &impl SchemaStore) -> Result<()> {
//!     let domain = Domain::build(
//!         cx,
//!         store,
//!         registry,
//!         DomainConfig::default(),
//!         &DefaultUpgradeHandler,
//!     )
//!     .await?;
//!
//!     let mut prefetch = domain.prefetch();
//!     prefetch.invoke_prefetch(
//!         EntityKey::new("app.Person", 42),
//!         Some("app.Person"),
//!         &[
//!             PrefetchFieldDescriptor::new("name"),
//!             PrefetchFieldDescriptor::new("employer").eagerly_load(),
//!         ],
//!     )?;
//!     let stats = prefetch.execute_tasks(cx, store).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - **No inferred renames**: a column that disappears is a drop, and
//!   drops fail the build unless a hint accounts for them
//! - **Structured concurrency**: built on asupersync for cancel-correct
//!   operations
//! - **Backend-agnostic**: storage is reached through the `DataStore`
//!   and `SchemaStore` traits
//! - **Batched prefetch**: one fetch per table per round, chunked by a
//!   configurable batch size

// Re-export all public types from sub-crates
pub use modelsync_core::{
    // asupersync re-exports
    Budget,
    ColumnLayout,
    ColumnPlacement,
    ColumnSet,
    Cx,
    // Storage access
    DataStore,
    // Core types
    Error,
    FieldDef,
    FieldKind,
    FromValue,
    HierarchyDef,
    // Physical layout
    HierarchyLayout,
    InheritanceSchema,
    Layout,
    LetterCasePolicy,
    ModelRegistry,
    ModelRegistryBuilder,
    NamespacePolicy,
    NamingConvention,
    Outcome,
    RegionId,
    Result,
    Row,
    TableLayout,
    TaskId,
    TypeDef,
    Value,
    ValueType,
    DEFAULT_DISCRIMINATOR_FIELD,
    DEFAULT_KEY_FIELD,
};

pub use modelsync_schema::{
    expected_schema, recreate_plan, ColumnDef, DefaultUpgradeHandler, DiffWarning, ForeignKeyDef,
    HintSet, InertHint, ModelSnapshot, SchemaComparer, SchemaOp, SchemaStore, SchemaTransaction,
    StorageSchema, TableDef, UpgradeConfig, UpgradeHandler, UpgradeHint, UpgradeMode, UpgradePlan,
    UpgradeReport, UpgradeRunner, WarningSeverity,
};

pub use modelsync_session::{
    ContainerState, EntityKey, EntitySetState, EntityState, EntityStateCache, FetchedCallback,
    GraphContainer, PrefetchConfig, PrefetchFieldDescriptor, PrefetchManager, PrefetchStats,
    DEFAULT_MAX_BATCH_SIZE,
};

// Domain assembly
pub mod domain;
pub use domain::{Domain, DomainConfig};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use modelsync::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        // asupersync
        Budget,
        Cx,
        // Storage access
        DataStore,
        DefaultUpgradeHandler,
        // Domain assembly
        Domain,
        DomainConfig,
        // Prefetch
        EntityKey,
        Error,
        FieldDef,
        HierarchyDef,
        // Hints
        HintSet,
        InheritanceSchema,
        // Model declaration
        ModelRegistry,
        NamingConvention,
        Outcome,
        PrefetchFieldDescriptor,
        PrefetchManager,
        RegionId,
        Result,
        Row,
        SchemaStore,
        TaskId,
        TypeDef,
        // Upgrades
        UpgradeConfig,
        UpgradeHandler,
        UpgradeHint,
        UpgradeMode,
        Value,
        ValueType,
    };
}
