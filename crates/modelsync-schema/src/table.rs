//! Storage schema model.
//!
//! [`StorageSchema`] describes a set of tables the way a backend reports
//! them: names, column shapes, primary keys, and foreign keys. The same
//! model serves both sides of a comparison, the expected schema derived
//! from the model layout and the actual schema read back by introspection.

use std::collections::BTreeMap;

use modelsync_core::{Value, ValueType};
use serde::{Deserialize, Serialize};

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Stored value type.
    pub value_type: ValueType,
    /// Whether NULL is storable.
    pub nullable: bool,
    /// Default applied to existing rows when the column is added.
    pub default: Option<Value>,
}

impl ColumnDef {
    /// Creates a non-nullable column without a default.
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            nullable: false,
            default: None,
        }
    }

    /// Marks the column nullable.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the column default.
    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A single-column foreign key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Referencing column in the owning table.
    pub column: String,
    /// Referenced table.
    pub target_table: String,
    /// Referenced column, the target's primary key.
    pub target_column: String,
}

/// One table of a storage schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    /// Table name.
    pub name: String,
    /// Primary key column name. `columns` contains it too.
    pub primary_key: String,
    /// All columns in storage order, primary key included.
    pub columns: Vec<ColumnDef>,
    /// Outgoing foreign keys.
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableDef {
    /// Creates a table containing only its primary key column.
    pub fn new(name: impl Into<String>, key: ColumnDef) -> Self {
        let primary_key = key.name.clone();
        Self {
            name: name.into(),
            primary_key,
            columns: vec![key],
            foreign_keys: Vec::new(),
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Appends a foreign key.
    #[must_use]
    pub fn with_foreign_key(mut self, foreign_key: ForeignKeyDef) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Returns the column with the given name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns `true` if the table has a column with the given name.
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Returns the foreign key carried by `column`, if any.
    pub fn foreign_key_on(&self, column: &str) -> Option<&ForeignKeyDef> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }
}

/// A full storage schema: tables in name order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageSchema {
    tables: BTreeMap<String, TableDef>,
}

impl StorageSchema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a table, replacing any previous table of the same name.
    pub fn insert_table(&mut self, table: TableDef) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Removes the named table, returning it when present.
    pub fn remove_table(&mut self, name: &str) -> Option<TableDef> {
        self.tables.remove(name)
    }

    /// Returns the named table.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.get(name)
    }

    /// Returns the named table mutably.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableDef> {
        self.tables.get_mut(name)
    }

    /// Returns `true` if the named table exists.
    pub fn contains_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Iterates tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableDef> {
        self.tables.values()
    }

    /// Iterates tables mutably in name order.
    pub fn tables_mut(&mut self) -> impl Iterator<Item = &mut TableDef> {
        self.tables.values_mut()
    }

    /// Returns the number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns `true` if the schema has no tables.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
