//! Schema synchronization for modelsync.
//!
//! This crate turns a registered model into an expected storage schema,
//! compares it against what a backend actually has, and plans the ordered
//! operations bridging the two. Additions are applied freely; anything
//! that would lose data must be sanctioned by an upgrade hint, and
//! unexplained differences fail the build before any change is made.
//!
//! The flow, driven by [`UpgradeRunner`]: introspect the backend, load the
//! previous model snapshot, ask the [`UpgradeHandler`] whether the stored
//! version is upgradable and which hints apply, plan with
//! [`SchemaComparer`], then apply the plan and the fresh snapshot in one
//! backend transaction.

pub mod backend;
pub mod diff;
pub mod expected;
pub mod hints;
pub mod snapshot;
pub mod table;
pub mod upgrade;

pub use backend::{SchemaStore, SchemaTransaction};
pub use diff::{
    recreate_plan, DiffWarning, SchemaComparer, SchemaOp, UpgradePlan, WarningSeverity,
};
pub use expected::expected_schema;
pub use hints::{
    ColumnMove, ColumnRename, DiscriminatorRewrite, HintSet, InertHint, ResolvedHints, RowPurge,
    UpgradeHint,
};
pub use snapshot::ModelSnapshot;
pub use table::{ColumnDef, ForeignKeyDef, StorageSchema, TableDef};
pub use upgrade::{
    DefaultUpgradeHandler, UpgradeConfig, UpgradeHandler, UpgradeMode, UpgradeReport,
    UpgradeRunner,
};
