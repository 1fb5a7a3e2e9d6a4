//! Schema-capable backend traits.
//!
//! A [`SchemaStore`] is a [`DataStore`] that can also report its current
//! schema, persist the model snapshot, and run schema operations inside a
//! transaction. The upgrade runner drives backends exclusively through
//! these traits; it never sees SQL or backend-specific types.

use std::future::Future;

use modelsync_core::{Cx, DataStore, Error, Outcome};

use crate::diff::SchemaOp;
use crate::table::StorageSchema;

/// A storage backend that supports introspection and schema changes.
pub trait SchemaStore: DataStore {
    /// Transaction handle type.
    type Tx<'store>: SchemaTransaction
    where
        Self: 'store;

    /// Reads the current schema: every table with its columns, primary
    /// key, and foreign keys. The backend's own metadata channel is not
    /// reported.
    fn introspect(&self, cx: &Cx) -> impl Future<Output = Outcome<StorageSchema, Error>> + Send;

    /// Loads the stored model snapshot JSON, `None` before the first
    /// build.
    fn load_model_meta(
        &self,
        cx: &Cx,
    ) -> impl Future<Output = Outcome<Option<String>, Error>> + Send;

    /// Begins a schema transaction.
    fn begin(&self, cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send;
}

/// An open schema transaction.
///
/// Dropping the handle without committing discards every change made
/// through it.
pub trait SchemaTransaction: Send {
    /// Applies one schema operation.
    fn apply(&mut self, cx: &Cx, op: &SchemaOp)
        -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Replaces the stored model snapshot JSON.
    fn store_model_meta(
        &mut self,
        cx: &Cx,
        meta: &str,
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Commits every change made through this transaction.
    fn commit(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Discards every change made through this transaction.
    fn rollback(self, cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send;
}
