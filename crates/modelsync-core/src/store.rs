//! Storage access trait for row data.
//!
//! [`DataStore`] is the narrow surface the prefetch machinery needs from a
//! backend: structured reads and writes against named tables and columns.
//! Backends that also support schema introspection and DDL implement the
//! wider trait in the schema crate on top of this one.

use std::future::Future;

use asupersync::{Cx, Outcome};

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;

/// Structured row access to a storage backend.
///
/// All operations are async and context-aware: cancellation arrives through
/// the [`Cx`] and surfaces as `Outcome::Cancelled`. Returned rows carry
/// exactly the requested columns, in request order.
pub trait DataStore: Send + Sync {
    /// Fetches rows whose `key_column` equals one of `keys`.
    ///
    /// Missing keys produce no row. Found rows come back in the order of
    /// `keys`.
    fn fetch_by_keys(
        &self,
        cx: &Cx,
        table: &str,
        key_column: &str,
        keys: &[Value],
        columns: &[String],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Fetches rows whose `filter_column` equals `filter_value`, at most
    /// `limit` of them when a limit is given.
    ///
    /// Row order is backend-defined but stable for a given table state.
    fn fetch_matching(
        &self,
        cx: &Cx,
        table: &str,
        filter_column: &str,
        filter_value: &Value,
        columns: &[String],
        limit: Option<usize>,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Inserts one row with the given columns set; unlisted columns take
    /// their defaults or NULL.
    fn insert(
        &self,
        cx: &Cx,
        table: &str,
        columns: &[String],
        values: &[Value],
    ) -> impl Future<Output = Outcome<(), Error>> + Send;

    /// Updates the row whose `key_column` equals `key`, setting the given
    /// columns. Returns the number of rows updated (0 or 1).
    fn update(
        &self,
        cx: &Cx,
        table: &str,
        key_column: &str,
        key: &Value,
        columns: &[String],
        values: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Deletes rows whose `filter_column` equals `filter_value`. Returns
    /// the number of rows deleted.
    fn delete_matching(
        &self,
        cx: &Cx,
        table: &str,
        filter_column: &str,
        filter_value: &Value,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;
}
