//! In-memory storage backend for modelsync.
//!
//! [`MemoryStore`] keeps tables as plain row maps behind one mutex and
//! implements both store traits: batched reads and writes through
//! `DataStore`, and introspection plus transactional schema changes
//! through `SchemaStore`. Schema transactions work on a copy of the whole
//! store and swap it in on commit, so a failed upgrade leaves both schema
//! and rows untouched.
//!
//! The backend validates column existence, value types, and nullability,
//! and rejects duplicate primary keys. Foreign keys are recorded and
//! introspected but not enforced on writes. Commit is last-writer-wins;
//! the intended usage is one build or session operation at a time.
//!
//! Reads through `fetch_by_keys` and `fetch_matching` bump a counter that
//! tests use to assert batching behavior.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use asupersync::{Cx, Outcome};
use modelsync_core::{
    ColumnSet, DataStore, Error, Result, Row, StorageErrorKind, Value, ValueType,
};
use modelsync_schema::{
    ColumnDef, ForeignKeyDef, SchemaOp, SchemaStore, SchemaTransaction, StorageSchema, TableDef,
};

/// One table: its definition and rows in insertion order.
#[derive(Debug, Clone)]
struct TableState {
    def: TableDef,
    rows: Vec<BTreeMap<String, Value>>,
}

/// Everything the store holds.
#[derive(Debug, Clone, Default)]
struct StoreState {
    tables: BTreeMap<String, TableState>,
    model_meta: Option<String>,
    fetches: u64,
}

/// An in-memory schema-capable storage backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store with no tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keyed and filtered fetches issued so far.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.lock_state().fetches
    }

    /// Resets the fetch counter, typically after test setup.
    pub fn reset_fetch_count(&self) {
        self.lock_state().fetches = 0;
    }

    /// Number of rows in a table, `None` when the table does not exist.
    #[must_use]
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.lock_state()
            .tables
            .get(table)
            .map(|state| state.rows.len())
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn table_not_found(table: &str) -> Error {
    Error::storage(
        StorageErrorKind::TableNotFound,
        format!("table '{table}' does not exist"),
    )
}

fn column_not_found(table: &str, column: &str) -> Error {
    Error::storage(
        StorageErrorKind::ColumnNotFound,
        format!("table '{table}' has no column '{column}'"),
    )
}

/// Validates one value against a column definition.
fn check_value(table: &str, column: &ColumnDef, value: &Value) -> Result<()> {
    if value.is_null() {
        if column.nullable {
            return Ok(());
        }
        return Err(Error::storage(
            StorageErrorKind::NullViolation,
            format!("column '{}.{}' is not nullable", table, column.name),
        ));
    }
    if !column.value_type.accepts(value) {
        return Err(Error::storage(
            StorageErrorKind::TypeViolation,
            format!(
                "column '{}.{}' holds {}, got {}",
                table,
                column.name,
                column.value_type.name(),
                value.type_name()
            ),
        ));
    }
    Ok(())
}

/// Projects stored rows onto the requested columns, sharing one column set.
fn project_rows<'a>(
    table: &TableState,
    matching: impl Iterator<Item = &'a BTreeMap<String, Value>>,
    columns: &[String],
) -> Result<Vec<Row>> {
    for column in columns {
        if !table.def.has_column(column) {
            return Err(column_not_found(&table.def.name, column));
        }
    }
    let column_set = Arc::new(ColumnSet::new(columns.to_vec()));
    let mut rows = Vec::new();
    for stored in matching {
        let values: Vec<Value> = columns
            .iter()
            .map(|column| stored.get(column).cloned().unwrap_or(Value::Null))
            .collect();
        rows.push(Row::new(Arc::clone(&column_set), values)?);
    }
    Ok(rows)
}

impl DataStore for MemoryStore {
    fn fetch_by_keys(
        &self,
        _cx: &Cx,
        table: &str,
        key_column: &str,
        keys: &[Value],
        columns: &[String],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async move {
            let mut state = self.lock_state();
            state.fetches += 1;
            let Some(table_state) = state.tables.get(table) else {
                return Outcome::Err(table_not_found(table));
            };
            if !table_state.def.has_column(key_column) {
                return Outcome::Err(column_not_found(table, key_column));
            }
            let matching = keys.iter().filter_map(|key| {
                table_state
                    .rows
                    .iter()
                    .find(|row| row.get(key_column) == Some(key))
            });
            match project_rows(table_state, matching, columns) {
                Ok(rows) => Outcome::Ok(rows),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn fetch_matching(
        &self,
        _cx: &Cx,
        table: &str,
        filter_column: &str,
        filter_value: &Value,
        columns: &[String],
        limit: Option<usize>,
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async move {
            let mut state = self.lock_state();
            state.fetches += 1;
            let Some(table_state) = state.tables.get(table) else {
                return Outcome::Err(table_not_found(table));
            };
            if !table_state.def.has_column(filter_column) {
                return Outcome::Err(column_not_found(table, filter_column));
            }
            let matching = table_state
                .rows
                .iter()
                .filter(|row| row.get(filter_column) == Some(filter_value))
                .take(limit.unwrap_or(usize::MAX));
            match project_rows(table_state, matching, columns) {
                Ok(rows) => Outcome::Ok(rows),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn insert(
        &self,
        _cx: &Cx,
        table: &str,
        columns: &[String],
        values: &[Value],
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            if columns.len() != values.len() {
                return Outcome::Err(Error::argument(
                    "values",
                    format!(
                        "{} columns but {} values",
                        columns.len(),
                        values.len()
                    ),
                ));
            }
            let mut state = self.lock_state();
            let Some(table_state) = state.tables.get_mut(table) else {
                return Outcome::Err(table_not_found(table));
            };

            let mut row: BTreeMap<String, Value> = BTreeMap::new();
            for (column, value) in columns.iter().zip(values) {
                let Some(def) = table_state.def.column(column) else {
                    return Outcome::Err(column_not_found(table, column));
                };
                if let Err(e) = check_value(table, def, value) {
                    return Outcome::Err(e);
                }
                row.insert(column.clone(), value.clone());
            }
            for def in &table_state.def.columns {
                if row.contains_key(&def.name) {
                    continue;
                }
                let value = def.default.clone().unwrap_or(Value::Null);
                if let Err(e) = check_value(table, def, &value) {
                    return Outcome::Err(e);
                }
                row.insert(def.name.clone(), value);
            }

            let pk = table_state.def.primary_key.clone();
            let pk_value = row.get(&pk).cloned().unwrap_or(Value::Null);
            if table_state
                .rows
                .iter()
                .any(|existing| existing.get(&pk) == Some(&pk_value))
            {
                return Outcome::Err(Error::storage(
                    StorageErrorKind::Constraint,
                    format!("duplicate key in '{table}'"),
                ));
            }
            table_state.rows.push(row);
            Outcome::Ok(())
        }
    }

    fn update(
        &self,
        _cx: &Cx,
        table: &str,
        key_column: &str,
        key: &Value,
        columns: &[String],
        values: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            if columns.len() != values.len() {
                return Outcome::Err(Error::argument(
                    "values",
                    format!(
                        "{} columns but {} values",
                        columns.len(),
                        values.len()
                    ),
                ));
            }
            let mut state = self.lock_state();
            let Some(table_state) = state.tables.get_mut(table) else {
                return Outcome::Err(table_not_found(table));
            };
            if !table_state.def.has_column(key_column) {
                return Outcome::Err(column_not_found(table, key_column));
            }
            for (column, value) in columns.iter().zip(values) {
                let Some(def) = table_state.def.column(column) else {
                    return Outcome::Err(column_not_found(table, column));
                };
                if let Err(e) = check_value(table, def, value) {
                    return Outcome::Err(e);
                }
            }

            let mut updated = 0u64;
            for row in &mut table_state.rows {
                if row.get(key_column) != Some(key) {
                    continue;
                }
                for (column, value) in columns.iter().zip(values) {
                    row.insert(column.clone(), value.clone());
                }
                updated += 1;
            }
            Outcome::Ok(updated)
        }
    }

    fn delete_matching(
        &self,
        _cx: &Cx,
        table: &str,
        filter_column: &str,
        filter_value: &Value,
    ) -> impl Future<Output = Outcome<u64, Error>> + Send {
        async move {
            let mut state = self.lock_state();
            let Some(table_state) = state.tables.get_mut(table) else {
                return Outcome::Err(table_not_found(table));
            };
            if !table_state.def.has_column(filter_column) {
                return Outcome::Err(column_not_found(table, filter_column));
            }
            let before = table_state.rows.len();
            table_state
                .rows
                .retain(|row| row.get(filter_column) != Some(filter_value));
            Outcome::Ok((before - table_state.rows.len()) as u64)
        }
    }
}

impl SchemaStore for MemoryStore {
    type Tx<'store>
        = MemoryTransaction<'store>
    where
        Self: 'store;

    fn introspect(&self, _cx: &Cx) -> impl Future<Output = Outcome<StorageSchema, Error>> + Send {
        async move {
            let state = self.lock_state();
            let mut schema = StorageSchema::new();
            for table_state in state.tables.values() {
                schema.insert_table(table_state.def.clone());
            }
            Outcome::Ok(schema)
        }
    }

    fn load_model_meta(
        &self,
        _cx: &Cx,
    ) -> impl Future<Output = Outcome<Option<String>, Error>> + Send {
        async move { Outcome::Ok(self.lock_state().model_meta.clone()) }
    }

    fn begin(&self, _cx: &Cx) -> impl Future<Output = Outcome<Self::Tx<'_>, Error>> + Send {
        async move {
            let working = self.lock_state().clone();
            Outcome::Ok(MemoryTransaction {
                store: self,
                working,
            })
        }
    }
}

/// A schema transaction over a private copy of the store.
///
/// Every operation mutates the copy; [`SchemaTransaction::commit`] swaps
/// it into the live store. Dropping the handle discards the copy.
#[derive(Debug)]
pub struct MemoryTransaction<'store> {
    store: &'store MemoryStore,
    working: StoreState,
}

impl MemoryTransaction<'_> {
    fn apply_op(&mut self, op: &SchemaOp) -> Result<()> {
        tracing::trace!(op = %op, "applying schema operation");
        match op {
            SchemaOp::CreateTable(def) => self.create_table(def),
            SchemaOp::DropTable { table } => {
                if self.working.tables.remove(table).is_none() {
                    return Err(table_not_found(table));
                }
                Ok(())
            }
            SchemaOp::RenameTable { from, to } => self.rename_table(from, to),
            SchemaOp::AddColumn { table, column } => self.add_column(table, column),
            SchemaOp::DropColumn { table, column } => self.drop_column(table, column),
            SchemaOp::RenameColumn { table, from, to } => self.rename_column(table, from, to),
            SchemaOp::AlterColumnType {
                table,
                column,
                value_type,
            } => self.alter_column_type(table, column, *value_type),
            SchemaOp::AlterColumnNullable {
                table,
                column,
                nullable,
            } => self.alter_column_nullable(table, column, *nullable),
            SchemaOp::AlterColumnDefault {
                table,
                column,
                default,
            } => {
                let def = self.column_mut(table, column)?;
                def.default = default.clone();
                Ok(())
            }
            SchemaOp::AddForeignKey { table, foreign_key } => {
                self.add_foreign_key(table, foreign_key)
            }
            SchemaOp::DropForeignKey { table, column } => self.drop_foreign_key(table, column),
            SchemaOp::MoveColumnData {
                source_table,
                source_column,
                target_table,
                target_column,
                key_column,
            } => self.move_column_data(
                source_table,
                source_column,
                target_table,
                target_column,
                key_column,
            ),
            SchemaOp::RewriteDiscriminator {
                table,
                column,
                from,
                to,
            } => self.rewrite_discriminator(table, column, from, to),
            SchemaOp::PurgeRows {
                table,
                column,
                type_name,
            } => self.purge_rows(table, column, type_name),
        }
    }

    fn table_mut(&mut self, table: &str) -> Result<&mut TableState> {
        self.working
            .tables
            .get_mut(table)
            .ok_or_else(|| table_not_found(table))
    }

    fn column_mut(&mut self, table: &str, column: &str) -> Result<&mut ColumnDef> {
        let state = self.table_mut(table)?;
        let name = state.def.name.clone();
        state
            .def
            .columns
            .iter_mut()
            .find(|c| c.name == column)
            .ok_or_else(|| column_not_found(&name, column))
    }

    fn create_table(&mut self, def: &TableDef) -> Result<()> {
        if self.working.tables.contains_key(&def.name) {
            return Err(Error::storage(
                StorageErrorKind::AlreadyExists,
                format!("table '{}' already exists", def.name),
            ));
        }
        self.working.tables.insert(
            def.name.clone(),
            TableState {
                def: def.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    fn rename_table(&mut self, from: &str, to: &str) -> Result<()> {
        if self.working.tables.contains_key(to) {
            return Err(Error::storage(
                StorageErrorKind::AlreadyExists,
                format!("table '{to}' already exists"),
            ));
        }
        let Some(mut state) = self.working.tables.remove(from) else {
            return Err(table_not_found(from));
        };
        state.def.name = to.to_string();
        self.working.tables.insert(to.to_string(), state);
        // References from other tables follow the rename.
        for other in self.working.tables.values_mut() {
            for fk in &mut other.def.foreign_keys {
                if fk.target_table == from {
                    fk.target_table = to.to_string();
                }
            }
        }
        Ok(())
    }

    fn add_column(&mut self, table: &str, column: &ColumnDef) -> Result<()> {
        let state = self.table_mut(table)?;
        if state.def.has_column(&column.name) {
            return Err(Error::storage(
                StorageErrorKind::AlreadyExists,
                format!("column '{}.{}' already exists", table, column.name),
            ));
        }
        let backfill = column.default.clone().unwrap_or(Value::Null);
        if backfill.is_null() && !column.nullable && !state.rows.is_empty() {
            return Err(Error::storage(
                StorageErrorKind::NullViolation,
                format!(
                    "column '{}.{}' is not nullable and has no default for existing rows",
                    table, column.name
                ),
            ));
        }
        for row in &mut state.rows {
            row.insert(column.name.clone(), backfill.clone());
        }
        state.def.columns.push(column.clone());
        Ok(())
    }

    fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        let state = self.table_mut(table)?;
        if !state.def.has_column(column) {
            return Err(column_not_found(table, column));
        }
        if state.def.primary_key == column {
            return Err(Error::storage(
                StorageErrorKind::Constraint,
                format!("cannot drop primary key column '{table}.{column}'"),
            ));
        }
        state.def.columns.retain(|c| c.name != column);
        state.def.foreign_keys.retain(|fk| fk.column != column);
        for row in &mut state.rows {
            row.remove(column);
        }
        Ok(())
    }

    fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        let state = self.table_mut(table)?;
        if !state.def.has_column(from) {
            return Err(column_not_found(table, from));
        }
        if state.def.has_column(to) {
            return Err(Error::storage(
                StorageErrorKind::AlreadyExists,
                format!("column '{table}.{to}' already exists"),
            ));
        }
        for column in &mut state.def.columns {
            if column.name == from {
                column.name = to.to_string();
            }
        }
        if state.def.primary_key == from {
            state.def.primary_key = to.to_string();
        }
        for fk in &mut state.def.foreign_keys {
            if fk.column == from {
                fk.column = to.to_string();
            }
        }
        for row in &mut state.rows {
            if let Some(value) = row.remove(from) {
                row.insert(to.to_string(), value);
            }
        }
        // Foreign keys elsewhere that point at the renamed column.
        for other in self.working.tables.values_mut() {
            for fk in &mut other.def.foreign_keys {
                if fk.target_table == table && fk.target_column == from {
                    fk.target_column = to.to_string();
                }
            }
        }
        Ok(())
    }

    fn alter_column_type(&mut self, table: &str, column: &str, value_type: ValueType) -> Result<()> {
        let state = self.table_mut(table)?;
        if !state.def.has_column(column) {
            return Err(column_not_found(table, column));
        }
        for row in &state.rows {
            let value = row.get(column).cloned().unwrap_or(Value::Null);
            if !value_type.accepts(&value) {
                return Err(Error::storage(
                    StorageErrorKind::TypeViolation,
                    format!(
                        "existing value of type {} does not fit '{}' in '{table}.{column}'",
                        value.type_name(),
                        value_type.name()
                    ),
                ));
            }
        }
        for def in &mut state.def.columns {
            if def.name == column {
                def.value_type = value_type;
            }
        }
        Ok(())
    }

    fn alter_column_nullable(&mut self, table: &str, column: &str, nullable: bool) -> Result<()> {
        let state = self.table_mut(table)?;
        if !state.def.has_column(column) {
            return Err(column_not_found(table, column));
        }
        if !nullable {
            let nulls = state
                .rows
                .iter()
                .any(|row| row.get(column).is_none_or(Value::is_null));
            if nulls {
                return Err(Error::storage(
                    StorageErrorKind::NullViolation,
                    format!("'{table}.{column}' holds NULL rows"),
                ));
            }
        }
        for def in &mut state.def.columns {
            if def.name == column {
                def.nullable = nullable;
            }
        }
        Ok(())
    }

    fn add_foreign_key(&mut self, table: &str, foreign_key: &ForeignKeyDef) -> Result<()> {
        if !self
            .working
            .tables
            .get(&foreign_key.target_table)
            .is_some_and(|t| t.def.has_column(&foreign_key.target_column))
        {
            return Err(Error::storage(
                StorageErrorKind::ColumnNotFound,
                format!(
                    "foreign key target '{}.{}' does not exist",
                    foreign_key.target_table, foreign_key.target_column
                ),
            ));
        }
        let state = self.table_mut(table)?;
        if !state.def.has_column(&foreign_key.column) {
            return Err(column_not_found(table, &foreign_key.column));
        }
        if state.def.foreign_key_on(&foreign_key.column).is_some() {
            return Err(Error::storage(
                StorageErrorKind::AlreadyExists,
                format!(
                    "column '{}.{}' already carries a foreign key",
                    table, foreign_key.column
                ),
            ));
        }
        state.def.foreign_keys.push(foreign_key.clone());
        Ok(())
    }

    fn drop_foreign_key(&mut self, table: &str, column: &str) -> Result<()> {
        let state = self.table_mut(table)?;
        let before = state.def.foreign_keys.len();
        state.def.foreign_keys.retain(|fk| fk.column != column);
        if state.def.foreign_keys.len() == before {
            return Err(Error::storage(
                StorageErrorKind::Other,
                format!("no foreign key on '{table}.{column}'"),
            ));
        }
        Ok(())
    }

    fn move_column_data(
        &mut self,
        source_table: &str,
        source_column: &str,
        target_table: &str,
        target_column: &str,
        key_column: &str,
    ) -> Result<()> {
        let source = self
            .working
            .tables
            .get(source_table)
            .ok_or_else(|| table_not_found(source_table))?;
        if !source.def.has_column(source_column) {
            return Err(column_not_found(source_table, source_column));
        }
        if !source.def.has_column(key_column) {
            return Err(column_not_found(source_table, key_column));
        }
        let moved: Vec<(Value, Value)> = source
            .rows
            .iter()
            .filter_map(|row| {
                let key = row.get(key_column)?.clone();
                let value = row.get(source_column).cloned().unwrap_or(Value::Null);
                Some((key, value))
            })
            .collect();

        let target = self
            .working
            .tables
            .get_mut(target_table)
            .ok_or_else(|| table_not_found(target_table))?;
        if !target.def.has_column(target_column) {
            return Err(column_not_found(target_table, target_column));
        }
        if !target.def.has_column(key_column) {
            return Err(column_not_found(target_table, key_column));
        }
        for (key, value) in moved {
            // Rows without a counterpart keep their current value.
            if let Some(row) = target
                .rows
                .iter_mut()
                .find(|row| row.get(key_column) == Some(&key))
            {
                row.insert(target_column.to_string(), value);
            }
        }
        Ok(())
    }

    fn rewrite_discriminator(
        &mut self,
        table: &str,
        column: &str,
        from: &str,
        to: &str,
    ) -> Result<()> {
        let state = self.table_mut(table)?;
        if !state.def.has_column(column) {
            return Err(column_not_found(table, column));
        }
        for row in &mut state.rows {
            if row.get(column).and_then(Value::as_str) == Some(from) {
                row.insert(column.to_string(), Value::Text(to.to_string()));
            }
        }
        Ok(())
    }

    fn purge_rows(&mut self, table: &str, column: &str, type_name: &str) -> Result<()> {
        let state = self.table_mut(table)?;
        if !state.def.has_column(column) {
            return Err(column_not_found(table, column));
        }
        let before = state.rows.len();
        state
            .rows
            .retain(|row| row.get(column).and_then(Value::as_str) != Some(type_name));
        tracing::trace!(
            table = %table,
            purged = before - state.rows.len(),
            "purged rows of removed type"
        );
        Ok(())
    }
}

impl SchemaTransaction for MemoryTransaction<'_> {
    fn apply(
        &mut self,
        _cx: &Cx,
        op: &SchemaOp,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            match self.apply_op(op) {
                Ok(()) => Outcome::Ok(()),
                Err(e) => Outcome::Err(e),
            }
        }
    }

    fn store_model_meta(
        &mut self,
        _cx: &Cx,
        meta: &str,
    ) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            self.working.model_meta = Some(meta.to_string());
            Outcome::Ok(())
        }
    }

    fn commit(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            let mut live = self.store.lock_state();
            // The fetch counter tracks the live store, not the copy.
            let fetches = live.fetches;
            *live = self.working;
            live.fetches = fetches;
            Outcome::Ok(())
        }
    }

    fn rollback(self, _cx: &Cx) -> impl Future<Output = Outcome<(), Error>> + Send {
        async move {
            drop(self);
            Outcome::Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use asupersync::runtime::RuntimeBuilder;

    fn unwrap_outcome<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> T {
        match outcome {
            Outcome::Ok(v) => v,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    fn unwrap_err<T: std::fmt::Debug>(outcome: Outcome<T, Error>) -> Error {
        match outcome {
            Outcome::Err(e) => e,
            other => panic!("expected an error, got: {other:?}"),
        }
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    fn team_table() -> TableDef {
        TableDef::new("team", ColumnDef::new("id", ValueType::BigInt))
            .with_column(ColumnDef::new("title", ValueType::Text))
    }

    fn person_table() -> TableDef {
        TableDef::new("person", ColumnDef::new("id", ValueType::BigInt))
            .with_column(ColumnDef::new("name", ValueType::Text))
            .with_column(ColumnDef::new("team_id", ValueType::BigInt).nullable())
            .with_foreign_key(ForeignKeyDef {
                column: "team_id".to_string(),
                target_table: "team".to_string(),
                target_column: "id".to_string(),
            })
    }

    async fn seeded_store(cx: &Cx) -> MemoryStore {
        let store = MemoryStore::new();
        let mut tx = unwrap_outcome(store.begin(cx).await);
        unwrap_outcome(tx.apply(cx, &SchemaOp::CreateTable(team_table())).await);
        unwrap_outcome(tx.apply(cx, &SchemaOp::CreateTable(person_table())).await);
        unwrap_outcome(tx.commit(cx).await);
        store
    }

    async fn insert_person(cx: &Cx, store: &MemoryStore, id: i64, name: &str, team: Option<i64>) {
        let team = team.map_or(Value::Null, Value::BigInt);
        unwrap_outcome(
            store
                .insert(
                    cx,
                    "person",
                    &cols(&["id", "name", "team_id"]),
                    &[Value::BigInt(id), Value::from(name), team],
                )
                .await,
        );
    }

    #[test]
    fn fetch_by_keys_returns_rows_in_key_order() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;
            insert_person(&cx, &store, 1, "ada", None).await;
            insert_person(&cx, &store, 2, "grace", None).await;
            insert_person(&cx, &store, 3, "edsger", None).await;
            store.reset_fetch_count();

            let rows = unwrap_outcome(
                store
                    .fetch_by_keys(
                        &cx,
                        "person",
                        "id",
                        &[Value::BigInt(3), Value::BigInt(1), Value::BigInt(99)],
                        &cols(&["id", "name"]),
                    )
                    .await,
            );
            let names: Vec<_> = rows
                .iter()
                .map(|row| row.get_by_name("name").cloned())
                .collect();
            assert_eq!(names, [Some(Value::from("edsger")), Some(Value::from("ada"))]);
            assert_eq!(store.fetch_count(), 1);
        });
    }

    #[test]
    fn insert_validates_shape_and_constraints() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;
            insert_person(&cx, &store, 1, "ada", None).await;

            let err = unwrap_err(
                store
                    .insert(
                        &cx,
                        "person",
                        &cols(&["id", "name"]),
                        &[Value::BigInt(1), Value::from("again")],
                    )
                    .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::Constraint));

            let err = unwrap_err(
                store
                    .insert(
                        &cx,
                        "person",
                        &cols(&["id", "name"]),
                        &[Value::BigInt(2), Value::Null],
                    )
                    .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::NullViolation));

            let err = unwrap_err(
                store
                    .insert(
                        &cx,
                        "person",
                        &cols(&["id", "name"]),
                        &[Value::BigInt(2), Value::BigInt(7)],
                    )
                    .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::TypeViolation));

            let err = unwrap_err(
                store
                    .insert(
                        &cx,
                        "person",
                        &cols(&["id", "nickname"]),
                        &[Value::BigInt(2), Value::from("g")],
                    )
                    .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::ColumnNotFound));

            let err = unwrap_err(
                store
                    .insert(&cx, "person", &cols(&["id", "name"]), &[Value::BigInt(2)])
                    .await,
            );
            assert!(err.storage_kind().is_none());

            assert_eq!(store.row_count("person"), Some(1));
        });
    }

    #[test]
    fn missing_columns_take_defaults() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = MemoryStore::new();
            let mut tx = unwrap_outcome(store.begin(&cx).await);
            let flag = TableDef::new("flag", ColumnDef::new("id", ValueType::BigInt))
                .with_column(
                    ColumnDef::new("active", ValueType::Bool).default_value(Value::Bool(true)),
                )
                .with_column(ColumnDef::new("note", ValueType::Text).nullable());
            unwrap_outcome(tx.apply(&cx, &SchemaOp::CreateTable(flag)).await);
            let strict = TableDef::new("strict", ColumnDef::new("id", ValueType::BigInt))
                .with_column(ColumnDef::new("label", ValueType::Text));
            unwrap_outcome(tx.apply(&cx, &SchemaOp::CreateTable(strict)).await);
            unwrap_outcome(tx.commit(&cx).await);

            unwrap_outcome(
                store
                    .insert(&cx, "flag", &cols(&["id"]), &[Value::BigInt(1)])
                    .await,
            );
            let rows = unwrap_outcome(
                store
                    .fetch_by_keys(
                        &cx,
                        "flag",
                        "id",
                        &[Value::BigInt(1)],
                        &cols(&["active", "note"]),
                    )
                    .await,
            );
            assert_eq!(rows[0].get_by_name("active"), Some(&Value::Bool(true)));
            assert_eq!(rows[0].get_by_name("note"), Some(&Value::Null));

            let err = unwrap_err(
                store
                    .insert(&cx, "strict", &cols(&["id"]), &[Value::BigInt(1)])
                    .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::NullViolation));
        });
    }

    #[test]
    fn add_column_backfills_existing_rows() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;
            insert_person(&cx, &store, 1, "ada", None).await;

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::AddColumn {
                        table: "person".to_string(),
                        column: ColumnDef::new("age", ValueType::BigInt).nullable(),
                    },
                )
                .await,
            );
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::AddColumn {
                        table: "person".to_string(),
                        column: ColumnDef::new("rank", ValueType::BigInt)
                            .default_value(Value::BigInt(7)),
                    },
                )
                .await,
            );
            unwrap_outcome(tx.commit(&cx).await);

            let rows = unwrap_outcome(
                store
                    .fetch_by_keys(
                        &cx,
                        "person",
                        "id",
                        &[Value::BigInt(1)],
                        &cols(&["age", "rank"]),
                    )
                    .await,
            );
            assert_eq!(rows[0].get_by_name("age"), Some(&Value::Null));
            assert_eq!(rows[0].get_by_name("rank"), Some(&Value::BigInt(7)));

            // Not nullable, no default, table has rows: refused.
            let mut tx = unwrap_outcome(store.begin(&cx).await);
            let err = unwrap_err(
                tx.apply(
                    &cx,
                    &SchemaOp::AddColumn {
                        table: "person".to_string(),
                        column: ColumnDef::new("badge", ValueType::Text),
                    },
                )
                .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::NullViolation));
            drop(tx);

            let schema = unwrap_outcome(store.introspect(&cx).await);
            assert!(!schema.table("person").is_some_and(|t| t.has_column("badge")));
        });
    }

    #[test]
    fn rename_column_rewrites_rows_and_references() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;
            insert_person(&cx, &store, 1, "ada", Some(5)).await;

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::RenameColumn {
                        table: "person".to_string(),
                        from: "name".to_string(),
                        to: "full_name".to_string(),
                    },
                )
                .await,
            );
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::RenameColumn {
                        table: "team".to_string(),
                        from: "id".to_string(),
                        to: "team_key".to_string(),
                    },
                )
                .await,
            );
            unwrap_outcome(tx.commit(&cx).await);

            let schema = unwrap_outcome(store.introspect(&cx).await);
            let team = schema.table("team").expect("team table");
            assert_eq!(team.primary_key, "team_key");
            let person = schema.table("person").expect("person table");
            let fk = person.foreign_key_on("team_id").expect("foreign key");
            assert_eq!(fk.target_column, "team_key");

            let rows = unwrap_outcome(
                store
                    .fetch_by_keys(
                        &cx,
                        "person",
                        "id",
                        &[Value::BigInt(1)],
                        &cols(&["full_name"]),
                    )
                    .await,
            );
            assert_eq!(rows[0].get_by_name("full_name"), Some(&Value::from("ada")));
        });
    }

    #[test]
    fn rename_table_updates_referencing_foreign_keys() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::RenameTable {
                        from: "team".to_string(),
                        to: "squad".to_string(),
                    },
                )
                .await,
            );
            unwrap_outcome(tx.commit(&cx).await);

            let schema = unwrap_outcome(store.introspect(&cx).await);
            assert!(!schema.contains_table("team"));
            assert!(schema.contains_table("squad"));
            let fk = schema
                .table("person")
                .and_then(|t| t.foreign_key_on("team_id"))
                .expect("foreign key");
            assert_eq!(fk.target_table, "squad");

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            let err = unwrap_err(
                tx.apply(
                    &cx,
                    &SchemaOp::RenameTable {
                        from: "squad".to_string(),
                        to: "person".to_string(),
                    },
                )
                .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::AlreadyExists));
        });
    }

    #[test]
    fn move_column_data_matches_rows_by_key() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;
            insert_person(&cx, &store, 1, "ada", None).await;
            insert_person(&cx, &store, 2, "grace", None).await;
            insert_person(&cx, &store, 3, "edsger", None).await;

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            let employee = TableDef::new("employee", ColumnDef::new("id", ValueType::BigInt))
                .with_column(ColumnDef::new("name", ValueType::Text).nullable());
            unwrap_outcome(tx.apply(&cx, &SchemaOp::CreateTable(employee)).await);
            unwrap_outcome(tx.commit(&cx).await);
            for id in [1i64, 2] {
                unwrap_outcome(
                    store
                        .insert(&cx, "employee", &cols(&["id"]), &[Value::BigInt(id)])
                        .await,
                );
            }

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::MoveColumnData {
                        source_table: "person".to_string(),
                        source_column: "name".to_string(),
                        target_table: "employee".to_string(),
                        target_column: "name".to_string(),
                        key_column: "id".to_string(),
                    },
                )
                .await,
            );
            unwrap_outcome(tx.commit(&cx).await);

            let rows = unwrap_outcome(
                store
                    .fetch_by_keys(
                        &cx,
                        "employee",
                        "id",
                        &[Value::BigInt(1), Value::BigInt(2)],
                        &cols(&["name"]),
                    )
                    .await,
            );
            assert_eq!(rows[0].get_by_name("name"), Some(&Value::from("ada")));
            assert_eq!(rows[1].get_by_name("name"), Some(&Value::from("grace")));
            // No employee row 3: the source value has nowhere to go.
            assert_eq!(store.row_count("employee"), Some(2));
        });
    }

    #[test]
    fn discriminator_rewrites_and_purges() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = MemoryStore::new();
            let mut tx = unwrap_outcome(store.begin(&cx).await);
            let doc = TableDef::new("doc", ColumnDef::new("id", ValueType::BigInt))
                .with_column(ColumnDef::new("type_id", ValueType::Text));
            unwrap_outcome(tx.apply(&cx, &SchemaOp::CreateTable(doc)).await);
            unwrap_outcome(tx.commit(&cx).await);
            for (id, ty) in [(1i64, "a"), (2, "b"), (3, "a")] {
                unwrap_outcome(
                    store
                        .insert(
                            &cx,
                            "doc",
                            &cols(&["id", "type_id"]),
                            &[Value::BigInt(id), Value::from(ty)],
                        )
                        .await,
                );
            }

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::RewriteDiscriminator {
                        table: "doc".to_string(),
                        column: "type_id".to_string(),
                        from: "a".to_string(),
                        to: "c".to_string(),
                    },
                )
                .await,
            );
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::PurgeRows {
                        table: "doc".to_string(),
                        column: "type_id".to_string(),
                        type_name: "b".to_string(),
                    },
                )
                .await,
            );
            unwrap_outcome(tx.commit(&cx).await);

            let rewritten = unwrap_outcome(
                store
                    .fetch_matching(
                        &cx,
                        "doc",
                        "type_id",
                        &Value::from("c"),
                        &cols(&["id"]),
                        None,
                    )
                    .await,
            );
            assert_eq!(rewritten.len(), 2);
            assert_eq!(store.row_count("doc"), Some(2));
        });
    }

    #[test]
    fn uncommitted_transactions_leave_the_store_unchanged() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = MemoryStore::new();

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            unwrap_outcome(tx.apply(&cx, &SchemaOp::CreateTable(team_table())).await);
            unwrap_outcome(tx.rollback(&cx).await);
            assert!(unwrap_outcome(store.introspect(&cx).await).is_empty());

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            unwrap_outcome(tx.apply(&cx, &SchemaOp::CreateTable(team_table())).await);
            unwrap_outcome(tx.store_model_meta(&cx, "{\"version\":\"1\"}").await);
            unwrap_outcome(tx.commit(&cx).await);
            assert!(unwrap_outcome(store.introspect(&cx).await).contains_table("team"));
            assert_eq!(
                unwrap_outcome(store.load_model_meta(&cx).await).as_deref(),
                Some("{\"version\":\"1\"}")
            );

            // Dropping the handle discards pending work too.
            let mut tx = unwrap_outcome(store.begin(&cx).await);
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::DropTable {
                        table: "team".to_string(),
                    },
                )
                .await,
            );
            drop(tx);
            assert!(unwrap_outcome(store.introspect(&cx).await).contains_table("team"));
        });
    }

    #[test]
    fn introspect_tracks_column_level_ddl() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::AddColumn {
                        table: "team".to_string(),
                        column: ColumnDef::new("motto", ValueType::Text).nullable(),
                    },
                )
                .await,
            );
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::AlterColumnNullable {
                        table: "team".to_string(),
                        column: "motto".to_string(),
                        nullable: false,
                    },
                )
                .await,
            );
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::AlterColumnDefault {
                        table: "team".to_string(),
                        column: "motto".to_string(),
                        default: Some(Value::from("go")),
                    },
                )
                .await,
            );
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::DropForeignKey {
                        table: "person".to_string(),
                        column: "team_id".to_string(),
                    },
                )
                .await,
            );
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::DropColumn {
                        table: "person".to_string(),
                        column: "team_id".to_string(),
                    },
                )
                .await,
            );
            unwrap_outcome(tx.commit(&cx).await);

            let schema = unwrap_outcome(store.introspect(&cx).await);
            let motto = schema
                .table("team")
                .and_then(|t| t.column("motto"))
                .expect("motto column");
            assert!(!motto.nullable);
            assert_eq!(motto.default, Some(Value::from("go")));
            let person = schema.table("person").expect("person table");
            assert!(!person.has_column("team_id"));
            assert!(person.foreign_keys.is_empty());
        });
    }

    #[test]
    fn column_alterations_respect_existing_rows() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;
            insert_person(&cx, &store, 1, "ada", None).await;

            let mut tx = unwrap_outcome(store.begin(&cx).await);
            let err = unwrap_err(
                tx.apply(
                    &cx,
                    &SchemaOp::AlterColumnNullable {
                        table: "person".to_string(),
                        column: "team_id".to_string(),
                        nullable: false,
                    },
                )
                .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::NullViolation));

            let err = unwrap_err(
                tx.apply(
                    &cx,
                    &SchemaOp::AlterColumnType {
                        table: "person".to_string(),
                        column: "name".to_string(),
                        value_type: ValueType::BigInt,
                    },
                )
                .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::TypeViolation));

            let err = unwrap_err(
                tx.apply(
                    &cx,
                    &SchemaOp::DropColumn {
                        table: "person".to_string(),
                        column: "id".to_string(),
                    },
                )
                .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::Constraint));
        });
    }

    #[test]
    fn fetch_matching_applies_the_limit() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;
            insert_person(&cx, &store, 1, "ada", Some(5)).await;
            insert_person(&cx, &store, 2, "grace", Some(5)).await;
            insert_person(&cx, &store, 3, "edsger", Some(5)).await;
            insert_person(&cx, &store, 4, "barbara", None).await;
            store.reset_fetch_count();

            let limited = unwrap_outcome(
                store
                    .fetch_matching(
                        &cx,
                        "person",
                        "team_id",
                        &Value::BigInt(5),
                        &cols(&["id"]),
                        Some(2),
                    )
                    .await,
            );
            assert_eq!(limited.len(), 2);

            let all = unwrap_outcome(
                store
                    .fetch_matching(
                        &cx,
                        "person",
                        "team_id",
                        &Value::BigInt(5),
                        &cols(&["id"]),
                        None,
                    )
                    .await,
            );
            assert_eq!(all.len(), 3);
            assert_eq!(store.fetch_count(), 2);
        });
    }

    #[test]
    fn update_and_delete_report_matched_rows() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;
            insert_person(&cx, &store, 1, "ada", Some(5)).await;
            insert_person(&cx, &store, 2, "grace", Some(5)).await;

            let updated = unwrap_outcome(
                store
                    .update(
                        &cx,
                        "person",
                        "id",
                        &Value::BigInt(1),
                        &cols(&["name"]),
                        &[Value::from("ada lovelace")],
                    )
                    .await,
            );
            assert_eq!(updated, 1);

            let updated = unwrap_outcome(
                store
                    .update(
                        &cx,
                        "person",
                        "id",
                        &Value::BigInt(99),
                        &cols(&["name"]),
                        &[Value::from("nobody")],
                    )
                    .await,
            );
            assert_eq!(updated, 0);

            let err = unwrap_err(
                store
                    .update(
                        &cx,
                        "person",
                        "id",
                        &Value::BigInt(1),
                        &cols(&["name"]),
                        &[Value::BigInt(9)],
                    )
                    .await,
            );
            assert_eq!(err.storage_kind(), Some(StorageErrorKind::TypeViolation));

            let deleted = unwrap_outcome(
                store
                    .delete_matching(&cx, "person", "team_id", &Value::BigInt(5))
                    .await,
            );
            assert_eq!(deleted, 2);
            assert_eq!(store.row_count("person"), Some(0));
        });
    }

    #[test]
    fn commit_keeps_the_live_fetch_counter() {
        let rt = RuntimeBuilder::current_thread()
            .build()
            .expect("create asupersync runtime");
        rt.block_on(async {
            let cx = Cx::for_testing();
            let store = seeded_store(&cx).await;
            insert_person(&cx, &store, 1, "ada", None).await;

            let _ = unwrap_outcome(
                store
                    .fetch_by_keys(&cx, "person", "id", &[Value::BigInt(1)], &cols(&["id"]))
                    .await,
            );
            let mut tx = unwrap_outcome(store.begin(&cx).await);
            let _ = unwrap_outcome(
                store
                    .fetch_by_keys(&cx, "person", "id", &[Value::BigInt(1)], &cols(&["id"]))
                    .await,
            );
            unwrap_outcome(
                tx.apply(
                    &cx,
                    &SchemaOp::AddColumn {
                        table: "person".to_string(),
                        column: ColumnDef::new("age", ValueType::BigInt).nullable(),
                    },
                )
                .await,
            );
            unwrap_outcome(tx.commit(&cx).await);
            assert_eq!(store.fetch_count(), 2);
        });
    }
}
