//! Expected schema derivation.
//!
//! Turns a physical [`Layout`] into the [`StorageSchema`] the storage is
//! supposed to have. The discriminator column is typed [`ValueType::Text`]
//! and stores full type names; class-table child tables get a foreign key
//! from their key column to the parent table.

use modelsync_core::{Layout, TableLayout, ValueType};

use crate::table::{ColumnDef, ForeignKeyDef, StorageSchema, TableDef};

/// Builds the schema a storage must have to hold `layout`.
pub fn expected_schema(layout: &Layout) -> StorageSchema {
    let mut schema = StorageSchema::new();
    for table in layout.tables() {
        schema.insert_table(expected_table(layout, table));
    }
    schema
}

fn expected_table(layout: &Layout, table: &TableLayout) -> TableDef {
    let mut def = TableDef::new(
        &table.name,
        ColumnDef::new(&table.key_column, table.key_type),
    );
    if let Some(parent) = &table.key_parent_table {
        def = def.with_foreign_key(ForeignKeyDef {
            column: table.key_column.clone(),
            target_table: parent.clone(),
            target_column: table.key_column.clone(),
        });
    }
    if let Some(discriminator) = &table.discriminator_column {
        def = def.with_column(ColumnDef::new(discriminator, ValueType::Text));
    }
    for column in &table.columns {
        let mut col = ColumnDef::new(&column.column, column.value_type);
        col.nullable = column.nullable;
        col.default = column.default.clone();
        def = def.with_column(col);
        if let Some(target_table) = &column.reference_target_table {
            if let Some(target) = layout.table(target_table) {
                def = def.with_foreign_key(ForeignKeyDef {
                    column: column.column.clone(),
                    target_table: target_table.clone(),
                    target_column: target.key_column.clone(),
                });
            }
        }
    }
    def
}
