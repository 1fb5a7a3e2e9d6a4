//! Core building blocks for modelsync.
//!
//! This crate holds the pieces everything else is built from: the dynamic
//! [`Value`] type and fetched [`Row`]s, the statically registered model
//! metadata ([`ModelRegistry`]), naming conventions, the derived physical
//! [`Layout`], the shared [`Error`] type, and the [`DataStore`] trait that
//! storage backends implement.
//!
//! Nothing here talks to storage by itself; backends live in their own
//! crates and the schema/session crates drive them through the traits
//! defined here.

pub mod error;
pub mod layout;
pub mod model;
pub mod naming;
pub mod registry;
pub mod row;
pub mod store;
pub mod value;

// Async building blocks, re-exported so downstream crates name one source.
pub use asupersync::{Budget, Cx, Outcome, RegionId, TaskId};

pub use error::{
    ArgumentError, Error, FieldRequestError, ModelError, ModelErrorKind, Result, SnapshotError,
    StorageError, StorageErrorKind, SynchronizationError, TypeError,
};
pub use layout::{ColumnLayout, ColumnPlacement, HierarchyLayout, Layout, TableLayout};
pub use model::{
    FieldDef, FieldKind, HierarchyDef, InheritanceSchema, TypeDef, DEFAULT_DISCRIMINATOR_FIELD,
    DEFAULT_KEY_FIELD,
};
pub use naming::{LetterCasePolicy, NamespacePolicy, NamingConvention};
pub use registry::{ModelRegistry, ModelRegistryBuilder};
pub use row::{ColumnSet, FromValue, Row};
pub use store::DataStore;
pub use value::{Value, ValueType};
