//! Schema comparison and upgrade planning.
//!
//! [`SchemaComparer::compare`] takes the expected schema (derived from the
//! current model), the actual schema (introspected from storage), and the
//! resolved upgrade hints, and produces an ordered [`UpgradePlan`]. Purely
//! additive differences are always planned; anything that would lose data
//! must be sanctioned by a hint, and a difference no hint accounts for
//! fails the comparison with the full offender list. Renames are never
//! inferred from shape similarity.

use std::collections::BTreeSet;

use modelsync_core::{
    Error, Layout, ModelRegistry, NamingConvention, Result, Value, ValueType,
};

use crate::expected::expected_schema;
use crate::hints::{ColumnRename, HintSet, InertHint, ResolvedHints};
use crate::snapshot::ModelSnapshot;
use crate::table::{ColumnDef, ForeignKeyDef, StorageSchema, TableDef};

/// One ordered step of an upgrade plan.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaOp {
    /// Create a table with all its columns and foreign keys.
    CreateTable(TableDef),
    /// Drop a table and all its rows.
    DropTable {
        /// Table to drop.
        table: String,
    },
    /// Rename a table.
    RenameTable {
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Add a column; existing rows take the default or NULL.
    AddColumn {
        /// Owning table.
        table: String,
        /// Column shape.
        column: ColumnDef,
    },
    /// Drop a column and its data.
    DropColumn {
        /// Owning table.
        table: String,
        /// Column to drop.
        column: String,
    },
    /// Rename a column, keeping its data.
    RenameColumn {
        /// Owning table.
        table: String,
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Change a column's value type.
    AlterColumnType {
        /// Owning table.
        table: String,
        /// Column to change.
        column: String,
        /// New value type.
        value_type: ValueType,
    },
    /// Change a column's nullability.
    AlterColumnNullable {
        /// Owning table.
        table: String,
        /// Column to change.
        column: String,
        /// New nullability.
        nullable: bool,
    },
    /// Change a column's default.
    AlterColumnDefault {
        /// Owning table.
        table: String,
        /// Column to change.
        column: String,
        /// New default.
        default: Option<Value>,
    },
    /// Add a foreign key to an existing table.
    AddForeignKey {
        /// Owning table.
        table: String,
        /// Key to add.
        foreign_key: ForeignKeyDef,
    },
    /// Drop the foreign key carried by a column.
    DropForeignKey {
        /// Owning table.
        table: String,
        /// Column carrying the key.
        column: String,
    },
    /// Copy column data between two tables of one hierarchy, joining rows
    /// on the shared key column.
    MoveColumnData {
        /// Table to copy from.
        source_table: String,
        /// Column to copy from.
        source_column: String,
        /// Table to copy into.
        target_table: String,
        /// Column to copy into.
        target_column: String,
        /// Join column present in both tables.
        key_column: String,
    },
    /// Replace one discriminator value with another.
    RewriteDiscriminator {
        /// Owning table.
        table: String,
        /// Discriminator column.
        column: String,
        /// Value to replace.
        from: String,
        /// Replacement value.
        to: String,
    },
    /// Delete the rows whose discriminator equals a removed type's name.
    PurgeRows {
        /// Owning table.
        table: String,
        /// Discriminator column.
        column: String,
        /// Removed type's full name.
        type_name: String,
    },
}

impl SchemaOp {
    /// Returns the primary table the operation touches.
    pub fn table(&self) -> &str {
        match self {
            SchemaOp::CreateTable(t) => &t.name,
            SchemaOp::DropTable { table }
            | SchemaOp::AddColumn { table, .. }
            | SchemaOp::DropColumn { table, .. }
            | SchemaOp::RenameColumn { table, .. }
            | SchemaOp::AlterColumnType { table, .. }
            | SchemaOp::AlterColumnNullable { table, .. }
            | SchemaOp::AlterColumnDefault { table, .. }
            | SchemaOp::AddForeignKey { table, .. }
            | SchemaOp::DropForeignKey { table, .. }
            | SchemaOp::RewriteDiscriminator { table, .. }
            | SchemaOp::PurgeRows { table, .. } => table,
            SchemaOp::RenameTable { from, .. } => from,
            SchemaOp::MoveColumnData { source_table, .. } => source_table,
        }
    }

    /// Returns `true` if the operation discards stored data.
    pub const fn is_destructive(&self) -> bool {
        matches!(
            self,
            SchemaOp::DropTable { .. } | SchemaOp::DropColumn { .. } | SchemaOp::PurgeRows { .. }
        )
    }

    /// Execution phase. Plans run constraint drops first, then renames,
    /// then additions and alterations, then data movement, then constraint
    /// additions, and destructive drops last.
    const fn phase(&self) -> u8 {
        match self {
            SchemaOp::DropForeignKey { .. } => 0,
            SchemaOp::RenameTable { .. } => 1,
            SchemaOp::RenameColumn { .. } => 2,
            SchemaOp::CreateTable(_) => 3,
            SchemaOp::AddColumn { .. } => 4,
            SchemaOp::AlterColumnType { .. }
            | SchemaOp::AlterColumnNullable { .. }
            | SchemaOp::AlterColumnDefault { .. } => 5,
            SchemaOp::MoveColumnData { .. }
            | SchemaOp::RewriteDiscriminator { .. }
            | SchemaOp::PurgeRows { .. } => 6,
            SchemaOp::AddForeignKey { .. } => 7,
            SchemaOp::DropColumn { .. } => 8,
            SchemaOp::DropTable { .. } => 9,
        }
    }
}

impl std::fmt::Display for SchemaOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaOp::CreateTable(t) => write!(f, "create table {}", t.name),
            SchemaOp::DropTable { table } => write!(f, "drop table {table}"),
            SchemaOp::RenameTable { from, to } => write!(f, "rename table {from} to {to}"),
            SchemaOp::AddColumn { table, column } => {
                write!(f, "add column {table}.{}", column.name)
            }
            SchemaOp::DropColumn { table, column } => write!(f, "drop column {table}.{column}"),
            SchemaOp::RenameColumn { table, from, to } => {
                write!(f, "rename column {table}.{from} to {to}")
            }
            SchemaOp::AlterColumnType {
                table,
                column,
                value_type,
            } => write!(f, "alter column {table}.{column} type to {value_type}"),
            SchemaOp::AlterColumnNullable {
                table,
                column,
                nullable,
            } => write!(f, "alter column {table}.{column} nullable to {nullable}"),
            SchemaOp::AlterColumnDefault { table, column, .. } => {
                write!(f, "alter column {table}.{column} default")
            }
            SchemaOp::AddForeignKey { table, foreign_key } => write!(
                f,
                "add foreign key {table}.{} -> {}.{}",
                foreign_key.column, foreign_key.target_table, foreign_key.target_column
            ),
            SchemaOp::DropForeignKey { table, column } => {
                write!(f, "drop foreign key on {table}.{column}")
            }
            SchemaOp::MoveColumnData {
                source_table,
                source_column,
                target_table,
                target_column,
                ..
            } => write!(
                f,
                "move column data {source_table}.{source_column} -> {target_table}.{target_column}"
            ),
            SchemaOp::RewriteDiscriminator {
                table,
                column,
                from,
                to,
            } => write!(f, "rewrite discriminator {table}.{column} '{from}' -> '{to}'"),
            SchemaOp::PurgeRows {
                table, type_name, ..
            } => write!(f, "purge rows of {type_name} from {table}"),
        }
    }
}

/// How much attention a planning note deserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarningSeverity {
    /// Informational.
    Info,
    /// The step can fail or behave surprisingly on some data.
    Caution,
    /// The step discards data.
    Destructive,
}

/// A note attached to a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffWarning {
    /// How serious it is.
    pub severity: WarningSeverity,
    /// What to know.
    pub message: String,
}

fn caution(message: String) -> DiffWarning {
    DiffWarning {
        severity: WarningSeverity::Caution,
        message,
    }
}

fn destructive(message: String) -> DiffWarning {
    DiffWarning {
        severity: WarningSeverity::Destructive,
        message,
    }
}

/// An ordered set of schema operations with planning notes.
#[derive(Debug, Clone, Default)]
pub struct UpgradePlan {
    /// Operations in execution order.
    pub operations: Vec<SchemaOp>,
    /// Notes produced while planning.
    pub warnings: Vec<DiffWarning>,
    /// Hints that resolved to nothing.
    pub inert_hints: Vec<InertHint>,
}

impl UpgradePlan {
    /// Returns `true` if the plan changes nothing.
    pub fn is_noop(&self) -> bool {
        self.operations.is_empty()
    }

    /// Returns `true` if any step discards data.
    pub fn has_destructive_ops(&self) -> bool {
        self.operations.iter().any(SchemaOp::is_destructive)
    }

    /// Returns one line per operation, in execution order.
    pub fn operation_summaries(&self) -> Vec<String> {
        self.operations.iter().map(ToString::to_string).collect()
    }
}

/// Compares expected and actual schemas under a set of upgrade hints.
#[derive(Debug, Clone, Default)]
pub struct SchemaComparer {
    strict_hints: bool,
}

impl SchemaComparer {
    /// Creates a comparer with inert hints tolerated.
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, a hint that resolves to nothing fails the comparison
    /// instead of being recorded on the plan.
    #[must_use]
    pub const fn strict_hints(mut self, strict: bool) -> Self {
        self.strict_hints = strict;
        self
    }

    /// Plans the operations turning `actual` into the schema the model
    /// requires.
    ///
    /// `previous` is the model snapshot the storage was last built from;
    /// hints resolve against it. With no snapshot every hint is inert and
    /// the comparison is a plain expected-vs-actual diff, which on empty
    /// storage is a pure create plan.
    #[allow(clippy::result_large_err)]
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn compare(
        &self,
        previous: Option<&ModelSnapshot>,
        registry: &ModelRegistry,
        naming: &NamingConvention,
        actual: &StorageSchema,
        hints: &HintSet,
    ) -> Result<UpgradePlan> {
        let layout = Layout::build(registry, naming)?;
        let expected = expected_schema(&layout);
        let resolved = match previous {
            Some(snapshot) => {
                let old_layout = snapshot.layout()?;
                hints.resolve(&snapshot.registry, &old_layout, registry, &layout)?
            }
            None => {
                let mut resolved = ResolvedHints::default();
                for hint in hints.iter() {
                    tracing::warn!(hint = %hint, "hint ignored: no previous model snapshot");
                    resolved.inert.push(InertHint {
                        hint: hint.clone(),
                        reason: "no previous model snapshot".to_string(),
                    });
                }
                resolved
            }
        };
        if self.strict_hints && !resolved.inert.is_empty() {
            let listed: Vec<String> = resolved
                .inert
                .iter()
                .map(|i| format!("{}: {}", i.hint, i.reason))
                .collect();
            return Err(Error::argument(
                "hints",
                format!("{} hint(s) had no effect: {}", listed.len(), listed.join("; ")),
            ));
        }

        let mut ops = Vec::new();
        let mut warnings = Vec::new();
        let mut offenders = Vec::new();
        let mut covered: BTreeSet<&str> = BTreeSet::new();

        // A hierarchy cannot change its inheritance schema in place, even
        // when the old and new layouts happen to coincide.
        if let Some(snapshot) = previous {
            for root in registry.roots() {
                let Some(hierarchy) = &root.hierarchy else {
                    continue;
                };
                let old_name = resolved.previous_type_name(&root.name);
                let Some(old_schema) =
                    snapshot.registry.hierarchy_of(old_name).map(|h| h.schema)
                else {
                    continue;
                };
                if old_schema != hierarchy.schema {
                    offenders.push(format!(
                        "hierarchy {} changed inheritance schema from {} to {}",
                        root.name,
                        old_schema.as_str(),
                        hierarchy.schema.as_str()
                    ));
                }
            }
        }

        for table_actual in actual.tables() {
            let mapped = resolved.mapped_table(&table_actual.name);
            covered.insert(mapped);
            if let Some(table_expected) = expected.table(mapped) {
                if mapped != table_actual.name {
                    if actual.contains_table(mapped) {
                        // Drops run last, so the target name would still be
                        // occupied when the rename applies.
                        offenders.push(format!(
                            "renaming table {} to {} collides with a table still present in storage",
                            table_actual.name, mapped
                        ));
                    } else {
                        ops.push(SchemaOp::RenameTable {
                            from: table_actual.name.clone(),
                            to: mapped.to_string(),
                        });
                    }
                }
                diff_table(
                    table_actual,
                    table_expected,
                    &resolved,
                    &mut ops,
                    &mut warnings,
                    &mut offenders,
                );
            } else if resolved.may_drop_table(&table_actual.name) {
                warnings.push(destructive(format!(
                    "dropping table '{}' and all its rows",
                    table_actual.name
                )));
                ops.push(SchemaOp::DropTable {
                    table: table_actual.name.clone(),
                });
            } else {
                offenders.push(format!(
                    "table {} exists in storage but not in the model",
                    table_actual.name
                ));
            }
        }
        for table_expected in expected.tables() {
            if !covered.contains(table_expected.name.as_str()) {
                ops.push(SchemaOp::CreateTable(table_expected.clone()));
            }
        }

        for mv in &resolved.moves {
            warnings.push(caution(format!(
                "moving '{}.{}' to '{}.{}': rows without a matching target row lose the value",
                mv.source_table, mv.source_column, mv.target_table, mv.target_column
            )));
            ops.push(SchemaOp::MoveColumnData {
                source_table: mv.source_table.clone(),
                source_column: mv.source_column.clone(),
                target_table: mv.target_table.clone(),
                target_column: mv.target_column.clone(),
                key_column: mv.key_column.clone(),
            });
        }
        for rewrite in &resolved.discriminator_rewrites {
            ops.push(SchemaOp::RewriteDiscriminator {
                table: rewrite.table.clone(),
                column: rewrite.column.clone(),
                from: rewrite.from.clone(),
                to: rewrite.to.clone(),
            });
        }
        for purge in &resolved.purges {
            warnings.push(destructive(format!(
                "purging rows of removed type '{}' from table '{}'",
                purge.type_name, purge.table
            )));
            ops.push(SchemaOp::PurgeRows {
                table: purge.table.clone(),
                column: purge.column.clone(),
                type_name: purge.type_name.clone(),
            });
        }

        if !offenders.is_empty() {
            return Err(Error::synchronization(
                "storage schema does not match the model",
                offenders,
            ));
        }
        order_operations(&mut ops, &expected, actual);
        tracing::debug!(
            operations = ops.len(),
            warnings = warnings.len(),
            inert_hints = resolved.inert.len(),
            "schema comparison planned"
        );
        Ok(UpgradePlan {
            operations: ops,
            warnings,
            inert_hints: resolved.inert,
        })
    }
}

fn diff_table(
    actual: &TableDef,
    expected: &TableDef,
    resolved: &ResolvedHints,
    ops: &mut Vec<SchemaOp>,
    warnings: &mut Vec<DiffWarning>,
    offenders: &mut Vec<String>,
) {
    let table = &expected.name;
    if actual.primary_key != expected.primary_key {
        offenders.push(format!(
            "key column of table {} is {} in storage but {} in the model",
            actual.name, actual.primary_key, expected.primary_key
        ));
        return;
    }

    let renames_here: Vec<&ColumnRename> = resolved
        .column_renames
        .iter()
        .filter(|r| r.old_table == actual.name)
        .collect();
    for rename in &renames_here {
        ops.push(SchemaOp::RenameColumn {
            table: table.clone(),
            from: rename.old_column.clone(),
            to: rename.new_column.clone(),
        });
    }
    let mut present: BTreeSet<&str> = BTreeSet::new();
    for column_actual in &actual.columns {
        let new_name =
            rename_target(&renames_here, &column_actual.name).unwrap_or(&column_actual.name);
        if let Some(column_expected) = expected.column(new_name) {
            present.insert(&column_expected.name);
            diff_column(table, column_actual, column_expected, ops, warnings);
        } else if resolved.may_drop_column(&actual.name, &column_actual.name) {
            warnings.push(destructive(format!(
                "dropping column '{}.{}' and its data",
                actual.name, column_actual.name
            )));
            ops.push(SchemaOp::DropColumn {
                table: table.clone(),
                column: column_actual.name.clone(),
            });
        } else {
            offenders.push(format!(
                "column {}.{} exists in storage but not in the model",
                actual.name, column_actual.name
            ));
        }
    }
    for column_expected in &expected.columns {
        if !present.contains(column_expected.name.as_str()) {
            if !column_expected.nullable && column_expected.default.is_none() {
                warnings.push(caution(format!(
                    "adding non-nullable column '{}.{}' without a default fails on non-empty tables",
                    table, column_expected.name
                )));
            }
            ops.push(SchemaOp::AddColumn {
                table: table.clone(),
                column: column_expected.clone(),
            });
        }
    }

    diff_foreign_keys(actual, expected, resolved, &renames_here, ops);
}

fn rename_target<'r>(renames: &[&'r ColumnRename], old: &str) -> Option<&'r str> {
    renames
        .iter()
        .find(|r| r.old_column == old)
        .map(|r| r.new_column.as_str())
}

fn diff_column(
    table: &str,
    actual: &ColumnDef,
    expected: &ColumnDef,
    ops: &mut Vec<SchemaOp>,
    warnings: &mut Vec<DiffWarning>,
) {
    if actual.value_type != expected.value_type {
        warnings.push(caution(format!(
            "changing type of '{}.{}' from {} to {}; stored values may not convert",
            table, expected.name, actual.value_type, expected.value_type
        )));
        ops.push(SchemaOp::AlterColumnType {
            table: table.to_string(),
            column: expected.name.clone(),
            value_type: expected.value_type,
        });
    }
    if actual.nullable != expected.nullable {
        if !expected.nullable {
            warnings.push(caution(format!(
                "making '{}.{}' non-nullable fails if NULLs are present",
                table, expected.name
            )));
        }
        ops.push(SchemaOp::AlterColumnNullable {
            table: table.to_string(),
            column: expected.name.clone(),
            nullable: expected.nullable,
        });
    }
    if actual.default != expected.default {
        ops.push(SchemaOp::AlterColumnDefault {
            table: table.to_string(),
            column: expected.name.clone(),
            default: expected.default.clone(),
        });
    }
}

fn diff_foreign_keys(
    actual: &TableDef,
    expected: &TableDef,
    resolved: &ResolvedHints,
    renames_here: &[&ColumnRename],
    ops: &mut Vec<SchemaOp>,
) {
    // Compare in post-rename space; drops still address pre-rename names
    // because constraint drops run before any rename.
    let mut actual_mapped: Vec<(ForeignKeyDef, &str)> = Vec::new();
    for fk in &actual.foreign_keys {
        let mapped = ForeignKeyDef {
            column: rename_target(renames_here, &fk.column)
                .unwrap_or(&fk.column)
                .to_string(),
            target_table: resolved.mapped_table(&fk.target_table).to_string(),
            target_column: fk.target_column.clone(),
        };
        actual_mapped.push((mapped, &fk.column));
    }
    let expected_set: BTreeSet<&ForeignKeyDef> = expected.foreign_keys.iter().collect();
    let actual_set: BTreeSet<&ForeignKeyDef> = actual_mapped.iter().map(|(fk, _)| fk).collect();

    for (mapped, original_column) in &actual_mapped {
        if !expected_set.contains(mapped) {
            ops.push(SchemaOp::DropForeignKey {
                table: actual.name.clone(),
                column: (*original_column).to_string(),
            });
        }
    }
    for fk in &expected.foreign_keys {
        if !actual_set.contains(fk) {
            ops.push(SchemaOp::AddForeignKey {
                table: expected.name.clone(),
                foreign_key: fk.clone(),
            });
        }
    }
}

/// Plans a full rebuild: every existing table dropped child-first, then
/// every expected table created parent-first. Hints play no part.
#[allow(clippy::result_large_err)]
pub fn recreate_plan(
    registry: &ModelRegistry,
    naming: &NamingConvention,
    actual: &StorageSchema,
) -> Result<UpgradePlan> {
    let layout = Layout::build(registry, naming)?;
    let expected = expected_schema(&layout);

    let mut drops: Vec<SchemaOp> = Vec::new();
    let mut warnings = Vec::new();
    for table in actual.tables() {
        warnings.push(destructive(format!(
            "dropping table '{}' and all its rows",
            table.name
        )));
        drops.push(SchemaOp::DropTable {
            table: table.name.clone(),
        });
    }
    drops.sort_by_key(|op| -key_depth(actual, op.table()));

    let mut creates: Vec<SchemaOp> = expected
        .tables()
        .map(|table| SchemaOp::CreateTable(table.clone()))
        .collect();
    creates.sort_by_key(|op| key_depth(&expected, op.table()));

    let mut operations = drops;
    operations.append(&mut creates);
    Ok(UpgradePlan {
        operations,
        warnings,
        inert_hints: Vec::new(),
    })
}

/// Sorts operations into execution order: by phase, with table creates
/// parent-first and table drops child-first along key foreign keys.
fn order_operations(ops: &mut [SchemaOp], expected: &StorageSchema, actual: &StorageSchema) {
    ops.sort_by_key(|op| {
        let depth = match op {
            SchemaOp::CreateTable(t) => key_depth(expected, &t.name),
            SchemaOp::DropTable { table } => -key_depth(actual, table),
            _ => 0,
        };
        (op.phase(), depth)
    });
}

/// Distance from a table to the root of its key foreign-key chain.
fn key_depth(schema: &StorageSchema, name: &str) -> i64 {
    let mut depth = 0i64;
    let mut current = name;
    while let Some(table) = schema.table(current) {
        let Some(fk) = table.foreign_key_on(&table.primary_key) else {
            break;
        };
        depth += 1;
        if depth as usize > schema.len() {
            break;
        }
        current = &fk.target_table;
    }
    depth
}

#[cfg(test)]
mod tests {
    use modelsync_core::{
        FieldDef, HierarchyDef, InheritanceSchema, NamespacePolicy, TypeDef, ValueType,
    };

    use super::*;
    use crate::hints::UpgradeHint;

    fn registry_v1() -> ModelRegistry {
        ModelRegistry::builder()
            .register(
                TypeDef::new("app.Person")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("name", ValueType::Text))
                    .field(FieldDef::scalar("age", ValueType::BigInt).nullable()),
            )
            .register(
                TypeDef::new("app.Employee")
                    .parent("app.Person")
                    .field(FieldDef::scalar("salary", ValueType::BigInt).nullable()),
            )
            .build()
            .unwrap()
    }

    fn storage_for(registry: &ModelRegistry) -> StorageSchema {
        let layout = Layout::build(registry, &NamingConvention::new()).unwrap();
        expected_schema(&layout)
    }

    fn snapshot_v1() -> ModelSnapshot {
        ModelSnapshot::new("1", registry_v1(), NamingConvention::new())
    }

    #[test]
    fn empty_storage_yields_a_create_plan_parents_first() {
        let plan = SchemaComparer::new()
            .compare(
                None,
                &registry_v1(),
                &NamingConvention::new(),
                &StorageSchema::new(),
                &HintSet::new(),
            )
            .unwrap();
        let summaries = plan.operation_summaries();
        assert_eq!(
            summaries,
            ["create table app_Person", "create table app_Employee"]
        );
        assert!(!plan.has_destructive_ops());
    }

    #[test]
    fn matching_storage_is_a_noop() {
        let plan = SchemaComparer::new()
            .compare(
                Some(&snapshot_v1()),
                &registry_v1(),
                &NamingConvention::new(),
                &storage_for(&registry_v1()),
                &HintSet::new(),
            )
            .unwrap();
        assert!(plan.is_noop());
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn added_field_is_planned_without_hints() {
        let registry_v2 = ModelRegistry::builder()
            .register(
                TypeDef::new("app.Person")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("name", ValueType::Text))
                    .field(FieldDef::scalar("age", ValueType::BigInt).nullable())
                    .field(FieldDef::scalar("email", ValueType::Text).nullable()),
            )
            .register(
                TypeDef::new("app.Employee")
                    .parent("app.Person")
                    .field(FieldDef::scalar("salary", ValueType::BigInt).nullable()),
            )
            .build()
            .unwrap();

        let plan = SchemaComparer::new()
            .compare(
                Some(&snapshot_v1()),
                &registry_v2,
                &NamingConvention::new(),
                &storage_for(&registry_v1()),
                &HintSet::new(),
            )
            .unwrap();
        assert_eq!(plan.operation_summaries(), ["add column app_Person.email"]);
    }

    #[test]
    fn removed_field_without_hint_fails_with_offenders() {
        let registry_v2 = ModelRegistry::builder()
            .register(
                TypeDef::new("app.Person")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("name", ValueType::Text)),
            )
            .register(
                TypeDef::new("app.Employee")
                    .parent("app.Person")
                    .field(FieldDef::scalar("salary", ValueType::BigInt).nullable()),
            )
            .build()
            .unwrap();

        let err = SchemaComparer::new()
            .compare(
                Some(&snapshot_v1()),
                &registry_v2,
                &NamingConvention::new(),
                &storage_for(&registry_v1()),
                &HintSet::new(),
            )
            .unwrap_err();
        let offenders = err.offenders().unwrap();
        assert_eq!(
            offenders,
            ["column app_Person.age exists in storage but not in the model"]
        );
    }

    #[test]
    fn removed_field_with_hint_plans_a_drop() {
        let registry_v2 = ModelRegistry::builder()
            .register(
                TypeDef::new("app.Person")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("name", ValueType::Text)),
            )
            .register(
                TypeDef::new("app.Employee")
                    .parent("app.Person")
                    .field(FieldDef::scalar("salary", ValueType::BigInt).nullable()),
            )
            .build()
            .unwrap();
        let hints = HintSet::new().with(UpgradeHint::RemoveField {
            type_name: "app.Person".to_string(),
            field: "age".to_string(),
        });

        let plan = SchemaComparer::new()
            .compare(
                Some(&snapshot_v1()),
                &registry_v2,
                &NamingConvention::new(),
                &storage_for(&registry_v1()),
                &hints,
            )
            .unwrap();
        assert_eq!(plan.operation_summaries(), ["drop column app_Person.age"]);
        assert!(plan.has_destructive_ops());
        assert_eq!(plan.warnings[0].severity, WarningSeverity::Destructive);
    }

    #[test]
    fn renamed_field_with_hint_is_a_rename_not_add_and_drop() {
        let registry_v2 = ModelRegistry::builder()
            .register(
                TypeDef::new("app.Person")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("name", ValueType::Text))
                    .field(FieldDef::scalar("years", ValueType::BigInt).nullable()),
            )
            .register(
                TypeDef::new("app.Employee")
                    .parent("app.Person")
                    .field(FieldDef::scalar("salary", ValueType::BigInt).nullable()),
            )
            .build()
            .unwrap();
        let hints = HintSet::new().with(UpgradeHint::RenameField {
            type_name: "app.Person".to_string(),
            old_field: "age".to_string(),
            new_field: "years".to_string(),
        });

        let plan = SchemaComparer::new()
            .compare(
                Some(&snapshot_v1()),
                &registry_v2,
                &NamingConvention::new(),
                &storage_for(&registry_v1()),
                &hints,
            )
            .unwrap();
        assert_eq!(
            plan.operation_summaries(),
            ["rename column app_Person.age to years"]
        );
    }

    #[test]
    fn renames_are_never_inferred() {
        // Same shapes, different names, no hints: both sides offend.
        let registry_v2 = ModelRegistry::builder()
            .register(
                TypeDef::new("app.Person")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("name", ValueType::Text))
                    .field(FieldDef::scalar("years", ValueType::BigInt).nullable()),
            )
            .register(
                TypeDef::new("app.Employee")
                    .parent("app.Person")
                    .field(FieldDef::scalar("salary", ValueType::BigInt).nullable()),
            )
            .build()
            .unwrap();

        let err = SchemaComparer::new()
            .compare(
                Some(&snapshot_v1()),
                &registry_v2,
                &NamingConvention::new(),
                &storage_for(&registry_v1()),
                &HintSet::new(),
            )
            .unwrap_err();
        assert!(err
            .offenders()
            .unwrap()
            .iter()
            .any(|o| o.contains("app_Person.age")));
    }

    #[test]
    fn strict_hints_promote_inert_hints_to_errors() {
        let hints = HintSet::new().with(UpgradeHint::RemoveField {
            type_name: "app.Person".to_string(),
            field: "missing".to_string(),
        });
        let err = SchemaComparer::new()
            .strict_hints(true)
            .compare(
                Some(&snapshot_v1()),
                &registry_v1(),
                &NamingConvention::new(),
                &storage_for(&registry_v1()),
                &hints,
            )
            .unwrap_err();
        match err {
            Error::Argument(e) => assert!(e.message.contains("had no effect")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dropped_tables_order_children_first() {
        // v2 drops the whole hierarchy.
        let registry_v2 = ModelRegistry::builder()
            .register(
                TypeDef::new("app.Note")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::SingleTable))
                    .field(FieldDef::scalar("text", ValueType::Text)),
            )
            .build()
            .unwrap();
        let hints = HintSet::new().with(UpgradeHint::RemoveType {
            type_name: "app.Person".to_string(),
        });

        let plan = SchemaComparer::new()
            .compare(
                Some(&snapshot_v1()),
                &registry_v2,
                &NamingConvention::new(),
                &storage_for(&registry_v1()),
                &hints,
            )
            .unwrap();
        let summaries = plan.operation_summaries();
        assert_eq!(
            summaries,
            [
                "create table app_Note",
                "drop table app_Employee",
                "drop table app_Person"
            ]
        );
    }

    #[test]
    fn changed_inheritance_schema_fails_even_when_layouts_coincide() {
        // A single-type hierarchy lays out identically under ClassTable and
        // ConcreteTable; only the recorded schema kind tells them apart.
        fn notes(schema: InheritanceSchema) -> ModelRegistry {
            ModelRegistry::builder()
                .register(
                    TypeDef::new("app.Note")
                        .hierarchy(HierarchyDef::new(schema))
                        .field(FieldDef::scalar("body", ValueType::Text)),
                )
                .build()
                .unwrap()
        }
        let snapshot = ModelSnapshot::new(
            "1",
            notes(InheritanceSchema::ClassTable),
            NamingConvention::new(),
        );

        let err = SchemaComparer::new()
            .compare(
                Some(&snapshot),
                &notes(InheritanceSchema::ConcreteTable),
                &NamingConvention::new(),
                &storage_for(&notes(InheritanceSchema::ClassTable)),
                &HintSet::new(),
            )
            .unwrap_err();
        let offenders = err.offenders().unwrap();
        assert_eq!(
            offenders,
            ["hierarchy app.Note changed inheritance schema from class-table to concrete-table"]
        );
    }

    #[test]
    fn rename_onto_an_occupied_table_name_is_an_offender() {
        // The namespace synonym folds legacy.Note onto app.Note's table, so
        // the hinted rename targets a name that is still occupied when
        // renames apply.
        let naming = NamingConvention::new()
            .with_namespace_policy(NamespacePolicy::Synonymize)
            .with_synonym("legacy", "app");
        let registry_v1 = ModelRegistry::builder()
            .register(
                TypeDef::new("app.Note")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("body", ValueType::Text)),
            )
            .register(
                TypeDef::new("draft.Note")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("body", ValueType::Text)),
            )
            .build()
            .unwrap();
        let registry_v2 = ModelRegistry::builder()
            .register(
                TypeDef::new("legacy.Note")
                    .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
                    .field(FieldDef::scalar("body", ValueType::Text)),
            )
            .build()
            .unwrap();
        let hints = HintSet::new()
            .with(UpgradeHint::RenameType {
                old_type: "draft.Note".to_string(),
                new_type: "legacy.Note".to_string(),
            })
            .with(UpgradeHint::RemoveType {
                type_name: "app.Note".to_string(),
            });
        let layout_v1 = Layout::build(&registry_v1, &naming).unwrap();
        let snapshot = ModelSnapshot::new("1", registry_v1, naming.clone());

        let err = SchemaComparer::new()
            .compare(
                Some(&snapshot),
                &registry_v2,
                &naming,
                &expected_schema(&layout_v1),
                &hints,
            )
            .unwrap_err();
        let offenders = err.offenders().unwrap();
        assert_eq!(
            offenders,
            ["renaming table draft_Note to app_Note collides with a table still present in storage"]
        );
    }
}
