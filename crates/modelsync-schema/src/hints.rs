//! Upgrade hints and their resolution.
//!
//! A hint tells the comparer how a model change relates to what is already
//! in storage: a dropped field or type, a rename, a field moved along its
//! hierarchy. Hints are immutable facts collected into a [`HintSet`] and
//! consumed in a single resolution pass against the previous model
//! snapshot and the current model.
//!
//! Resolution is strict about *addressing* and forgiving about *matching*:
//! a hint that names elements which do not line up between the two models
//! resolves to nothing and is recorded as inert rather than failing the
//! build. Two hints addressing the same element are a hard error.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use modelsync_core::{
    ColumnPlacement, Error, InheritanceSchema, Layout, ModelRegistry, Result,
};

/// A single upgrade hint.
///
/// `RemoveField`, `RemoveType`, and `MoveField` sources name types as they
/// were in the *previous* model; `RenameField` and rename targets name
/// types of the *current* model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeHint {
    /// The field was removed from the model; its columns may be dropped.
    RemoveField {
        /// Declaring type in the previous model.
        type_name: String,
        /// Field name in the previous model.
        field: String,
    },
    /// The type (and its whole subtree) was removed from the model; its
    /// tables, columns, and rows may be dropped.
    RemoveType {
        /// Type name in the previous model.
        type_name: String,
    },
    /// The field was renamed; its columns carry over under the new name.
    RenameField {
        /// Declaring type in the *current* model.
        type_name: String,
        /// Field name in the previous model.
        old_field: String,
        /// Field name in the current model.
        new_field: String,
    },
    /// The type was renamed; its tables and discriminator values carry
    /// over under the new name.
    RenameType {
        /// Type name in the previous model.
        old_type: String,
        /// Type name in the current model.
        new_type: String,
    },
    /// The field moved to another type of the same hierarchy.
    MoveField {
        /// Field name, unchanged by the move.
        field: String,
        /// Declaring type in the previous model.
        source_type: String,
        /// Declaring type in the current model.
        target_type: String,
    },
}

impl fmt::Display for UpgradeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpgradeHint::RemoveField { type_name, field } => {
                write!(f, "remove field {type_name}.{field}")
            }
            UpgradeHint::RemoveType { type_name } => write!(f, "remove type {type_name}"),
            UpgradeHint::RenameField {
                type_name,
                old_field,
                new_field,
            } => write!(f, "rename field {type_name}.{old_field} -> {new_field}"),
            UpgradeHint::RenameType { old_type, new_type } => {
                write!(f, "rename type {old_type} -> {new_type}")
            }
            UpgradeHint::MoveField {
                field,
                source_type,
                target_type,
            } => write!(f, "move field {field} from {source_type} to {target_type}"),
        }
    }
}

/// An ordered collection of upgrade hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HintSet {
    hints: Vec<UpgradeHint>,
}

impl HintSet {
    /// Creates an empty hint set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hint.
    pub fn add(&mut self, hint: UpgradeHint) {
        self.hints.push(hint);
    }

    /// Adds a hint, chaining.
    #[must_use]
    pub fn with(mut self, hint: UpgradeHint) -> Self {
        self.hints.push(hint);
        self
    }

    /// Returns the number of hints.
    pub fn len(&self) -> usize {
        self.hints.len()
    }

    /// Returns `true` if no hints were added.
    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    /// Iterates the hints in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &UpgradeHint> {
        self.hints.iter()
    }

    /// Resolves every hint against the previous and current models.
    ///
    /// Type renames resolve first so every later hint sees the final type
    /// mapping, then type removals, then field hints. Returns an argument
    /// error when two hints address the same model element.
    #[allow(clippy::result_large_err)]
    pub fn resolve(
        &self,
        old_registry: &ModelRegistry,
        old_layout: &Layout,
        new_registry: &ModelRegistry,
        new_layout: &Layout,
    ) -> Result<ResolvedHints> {
        let mut resolver = HintResolver {
            old_registry,
            old_layout,
            new_registry,
            new_layout,
            type_map: BTreeMap::new(),
            reverse_map: BTreeMap::new(),
            claimed_types: BTreeSet::new(),
            claimed_fields: BTreeSet::new(),
            out: ResolvedHints::default(),
        };

        for hint in &self.hints {
            if let UpgradeHint::RenameType { old_type, new_type } = hint {
                resolver.apply_rename_type(hint, old_type, new_type)?;
            }
        }
        resolver.complete_type_map();
        for hint in &self.hints {
            if let UpgradeHint::RemoveType { type_name } = hint {
                resolver.apply_remove_type(hint, type_name)?;
            }
        }
        for hint in &self.hints {
            match hint {
                UpgradeHint::RemoveField { type_name, field } => {
                    resolver.apply_remove_field(hint, type_name, field)?;
                }
                UpgradeHint::RenameField {
                    type_name,
                    old_field,
                    new_field,
                } => {
                    resolver.apply_rename_field(hint, type_name, old_field, new_field)?;
                }
                UpgradeHint::MoveField {
                    field,
                    source_type,
                    target_type,
                } => {
                    resolver.apply_move_field(hint, field, source_type, target_type)?;
                }
                UpgradeHint::RemoveType { .. } | UpgradeHint::RenameType { .. } => {}
            }
        }
        Ok(resolver.out)
    }
}

/// A hint that resolved to nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InertHint {
    /// The hint as given.
    pub hint: UpgradeHint,
    /// Why it had no effect.
    pub reason: String,
}

/// A sanctioned column rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRename {
    /// Table name in the previous layout.
    pub old_table: String,
    /// Column name in the previous layout.
    pub old_column: String,
    /// Table name in the current layout.
    pub new_table: String,
    /// Column name in the current layout.
    pub new_column: String,
}

/// A sanctioned key-joined copy of column data between tables of one
/// hierarchy. Tables are named as they are *after* renames apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMove {
    /// Table to copy from.
    pub source_table: String,
    /// Column to copy from.
    pub source_column: String,
    /// Table to copy into.
    pub target_table: String,
    /// Column to copy into.
    pub target_column: String,
    /// Key column joining rows of the two tables.
    pub key_column: String,
}

/// A sanctioned rewrite of discriminator values after a type rename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscriminatorRewrite {
    /// Discriminator table, named as after renames.
    pub table: String,
    /// Discriminator column.
    pub column: String,
    /// Previous full type name stored in rows.
    pub from: String,
    /// Current full type name to store instead.
    pub to: String,
}

/// A sanctioned deletion of a removed type's rows from a shared table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPurge {
    /// Table holding the rows, named as after renames.
    pub table: String,
    /// Discriminator column identifying the rows.
    pub column: String,
    /// Full type name of the removed type.
    pub type_name: String,
}

/// Everything a resolution pass extracted from a [`HintSet`].
///
/// Tables and columns in `dropped_*` and in rename sources use *previous*
/// layout names, since that is what introspection reports before the plan
/// runs. Data operations use post-rename names, since they run after the
/// renames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedHints {
    /// Old table name -> new table name.
    pub table_renames: BTreeMap<String, String>,
    /// Old type name -> new type name for resolved type renames.
    pub type_renames: BTreeMap<String, String>,
    /// Sanctioned column renames.
    pub column_renames: Vec<ColumnRename>,
    /// Old names of tables that may be dropped.
    pub dropped_tables: BTreeSet<String>,
    /// Old `(table, column)` pairs that may be dropped.
    pub dropped_columns: BTreeSet<(String, String)>,
    /// Data copies for moved fields.
    pub moves: Vec<ColumnMove>,
    /// Discriminator value rewrites for renamed types.
    pub discriminator_rewrites: Vec<DiscriminatorRewrite>,
    /// Row purges for removed types in shared tables.
    pub purges: Vec<RowPurge>,
    /// Hints that resolved to nothing.
    pub inert: Vec<InertHint>,
}

impl ResolvedHints {
    /// Maps an old table name through the sanctioned renames.
    pub fn mapped_table<'a>(&'a self, old_table: &'a str) -> &'a str {
        self.table_renames
            .get(old_table)
            .map_or(old_table, String::as_str)
    }

    /// Maps a current type name back to its previous-model name.
    pub fn previous_type_name<'a>(&'a self, current: &'a str) -> &'a str {
        self.type_renames
            .iter()
            .find(|(_, new)| new.as_str() == current)
            .map_or(current, |(old, _)| old.as_str())
    }

    /// Returns `true` if dropping the old table is sanctioned.
    pub fn may_drop_table(&self, old_table: &str) -> bool {
        self.dropped_tables.contains(old_table)
    }

    /// Returns `true` if dropping the old column is sanctioned.
    pub fn may_drop_column(&self, old_table: &str, old_column: &str) -> bool {
        self.dropped_columns
            .contains(&(old_table.to_string(), old_column.to_string()))
    }
}

struct HintResolver<'a> {
    old_registry: &'a ModelRegistry,
    old_layout: &'a Layout,
    new_registry: &'a ModelRegistry,
    new_layout: &'a Layout,
    type_map: BTreeMap<String, String>,
    reverse_map: BTreeMap<String, String>,
    claimed_types: BTreeSet<String>,
    claimed_fields: BTreeSet<(String, String)>,
    out: ResolvedHints,
}

impl HintResolver<'_> {
    fn inert(&mut self, hint: &UpgradeHint, reason: &str) {
        tracing::warn!(hint = %hint, reason, "upgrade hint had no effect");
        self.out.inert.push(InertHint {
            hint: hint.clone(),
            reason: reason.to_string(),
        });
    }

    fn claim_type(&mut self, hint: &UpgradeHint, type_name: &str) -> Result<()> {
        if !self.claimed_types.insert(type_name.to_string()) {
            return Err(Error::argument(
                "hints",
                format!("conflicting hints address type '{type_name}' ({hint})"),
            ));
        }
        Ok(())
    }

    fn claim_field(&mut self, hint: &UpgradeHint, type_name: &str, field: &str) -> Result<()> {
        if !self
            .claimed_fields
            .insert((type_name.to_string(), field.to_string()))
        {
            return Err(Error::argument(
                "hints",
                format!("conflicting hints address field '{type_name}.{field}' ({hint})"),
            ));
        }
        Ok(())
    }

    fn apply_rename_type(
        &mut self,
        hint: &UpgradeHint,
        old_type: &str,
        new_type: &str,
    ) -> Result<()> {
        if !self.old_registry.contains(old_type) {
            self.inert(hint, "type was not in the previous model");
            return Ok(());
        }
        if !self.new_registry.contains(new_type) {
            self.inert(hint, "renamed type is not in the current model");
            return Ok(());
        }
        if self.new_registry.contains(old_type) {
            self.inert(hint, "old name is still in the current model");
            return Ok(());
        }
        if self.old_registry.contains(new_type) {
            self.inert(hint, "new name already existed in the previous model");
            return Ok(());
        }
        self.claim_type(hint, old_type)?;
        self.type_map
            .insert(old_type.to_string(), new_type.to_string());
        self.reverse_map
            .insert(new_type.to_string(), old_type.to_string());
        self.out
            .type_renames
            .insert(old_type.to_string(), new_type.to_string());

        let old_owned = self.old_layout.owned_tables(old_type);
        let new_owned = self.new_layout.owned_tables(new_type);
        if let (Some(old_table), Some(new_table)) = (old_owned.first(), new_owned.first()) {
            if old_table != new_table {
                if self.out.table_renames.values().any(|t| t == new_table) {
                    return Err(Error::argument(
                        "hints",
                        format!("two renames target table '{new_table}'"),
                    ));
                }
                self.out
                    .table_renames
                    .insert(old_table.clone(), new_table.clone());
            }
        }

        let single_table_old = self
            .old_layout
            .hierarchy_of(old_type)
            .is_some_and(|h| h.schema == InheritanceSchema::SingleTable);
        if single_table_old {
            if let Some(discriminator) = self
                .new_layout
                .hierarchy_of(new_type)
                .and_then(|h| h.discriminator.as_ref())
            {
                self.out.discriminator_rewrites.push(DiscriminatorRewrite {
                    table: discriminator.table.clone(),
                    column: discriminator.column.clone(),
                    from: old_type.to_string(),
                    to: new_type.to_string(),
                });
            }
        }
        tracing::debug!(hint = %hint, "resolved type rename");
        Ok(())
    }

    fn complete_type_map(&mut self) {
        for ty in self.old_registry.types() {
            if !self.type_map.contains_key(&ty.name) && self.new_registry.contains(&ty.name) {
                self.type_map.insert(ty.name.clone(), ty.name.clone());
                self.reverse_map.insert(ty.name.clone(), ty.name.clone());
            }
        }
    }

    fn apply_remove_type(&mut self, hint: &UpgradeHint, type_name: &str) -> Result<()> {
        if !self.old_registry.contains(type_name) {
            self.inert(hint, "type was not in the previous model");
            return Ok(());
        }
        if self.type_map.contains_key(type_name) {
            self.inert(hint, "type is still in the current model");
            return Ok(());
        }
        self.claim_type(hint, type_name)?;

        for member in self.old_registry.subtree(type_name) {
            if self.type_map.contains_key(&member.name) {
                // The descendant survived the removal; its own mapping
                // decides what happens to its storage.
                continue;
            }
            for table in self.old_layout.owned_tables(&member.name) {
                self.out.dropped_tables.insert(table.clone());
            }
            self.purge_and_drop_single_table_member(&member.name);
        }
        tracing::debug!(hint = %hint, "resolved type removal");
        Ok(())
    }

    /// Single-table members leave rows and columns behind in the shared
    /// root table; sanction purging and dropping them when the root
    /// itself survives the removal.
    fn purge_and_drop_single_table_member(&mut self, member: &str) {
        let Some(old_hierarchy) = self.old_layout.hierarchy_of(member) else {
            return;
        };
        if old_hierarchy.schema != InheritanceSchema::SingleTable {
            return;
        }
        let Some(new_root) = self.type_map.get(&old_hierarchy.root) else {
            // Root removed too; its table is already sanctioned for drop.
            return;
        };
        if let Some(discriminator) = self
            .new_layout
            .hierarchy_of(new_root)
            .and_then(|h| h.discriminator.as_ref())
        {
            let purge = RowPurge {
                table: discriminator.table.clone(),
                column: discriminator.column.clone(),
                type_name: member.to_string(),
            };
            if !self.out.purges.contains(&purge) {
                self.out.purges.push(purge);
            }
        }
        if let Some(ty) = self.old_registry.get(member) {
            for field in &ty.fields {
                for placement in self.old_layout.placements(member, &field.name) {
                    self.out
                        .dropped_columns
                        .insert((placement.table.clone(), placement.column.clone()));
                }
            }
        }
    }

    fn apply_remove_field(&mut self, hint: &UpgradeHint, type_name: &str, field: &str) -> Result<()> {
        let declared = self
            .old_registry
            .get(type_name)
            .and_then(|ty| ty.find_field(field))
            .is_some();
        if !declared {
            self.inert(hint, "field was not declared on that type in the previous model");
            return Ok(());
        }
        if let Some(new_type) = self.type_map.get(type_name) {
            let still_there = self
                .new_registry
                .get(new_type)
                .and_then(|ty| ty.find_field(field))
                .is_some();
            if still_there {
                self.inert(hint, "field is still declared in the current model");
                return Ok(());
            }
        }
        self.claim_field(hint, type_name, field)?;
        for placement in self.old_layout.placements(type_name, field) {
            self.out
                .dropped_columns
                .insert((placement.table.clone(), placement.column.clone()));
        }
        tracing::debug!(hint = %hint, "resolved field removal");
        Ok(())
    }

    fn apply_rename_field(
        &mut self,
        hint: &UpgradeHint,
        type_name: &str,
        old_field: &str,
        new_field: &str,
    ) -> Result<()> {
        let declared_new = self
            .new_registry
            .get(type_name)
            .and_then(|ty| ty.find_field(new_field))
            .is_some();
        if !declared_new {
            self.inert(hint, "type does not declare the new field name in the current model");
            return Ok(());
        }
        let Some(old_type) = self.reverse_map.get(type_name).cloned() else {
            self.inert(hint, "type is new in the current model");
            return Ok(());
        };
        let declared_old = self
            .old_registry
            .get(&old_type)
            .and_then(|ty| ty.find_field(old_field))
            .is_some();
        if !declared_old {
            self.inert(hint, "field was not declared in the previous model");
            return Ok(());
        }
        self.claim_field(hint, &old_type, old_field)?;

        let old_placements: Vec<ColumnPlacement> = self
            .old_layout
            .placements(&old_type, old_field)
            .to_vec();
        let new_placements = self.new_layout.placements(type_name, new_field);
        for old in &old_placements {
            let mapped = self.out.mapped_table(&old.table).to_string();
            let Some(new) = new_placements.iter().find(|p| p.table == mapped) else {
                continue;
            };
            if new.column != old.column {
                self.out.column_renames.push(ColumnRename {
                    old_table: old.table.clone(),
                    old_column: old.column.clone(),
                    new_table: new.table.clone(),
                    new_column: new.column.clone(),
                });
            }
        }
        tracing::debug!(hint = %hint, "resolved field rename");
        Ok(())
    }

    fn apply_move_field(
        &mut self,
        hint: &UpgradeHint,
        field: &str,
        source_type: &str,
        target_type: &str,
    ) -> Result<()> {
        let declared_old = self
            .old_registry
            .get(source_type)
            .and_then(|ty| ty.find_field(field))
            .is_some();
        if !declared_old {
            self.inert(hint, "field was not declared on the source type in the previous model");
            return Ok(());
        }
        let declared_new = self
            .new_registry
            .get(target_type)
            .and_then(|ty| ty.find_field(field))
            .is_some();
        if !declared_new {
            self.inert(hint, "field is not declared on the target type in the current model");
            return Ok(());
        }
        let old_root = self
            .old_registry
            .root_of(source_type)
            .and_then(|root| self.type_map.get(&root.name));
        let new_root = self.new_registry.root_of(target_type).map(|t| t.name.clone());
        if old_root != new_root.as_ref() || new_root.is_none() {
            self.inert(hint, "source and target are not in the same hierarchy");
            return Ok(());
        }
        self.claim_field(hint, source_type, field)?;

        let old_placements: Vec<ColumnPlacement> = self
            .old_layout
            .placements(source_type, field)
            .to_vec();
        let new_placements: Vec<ColumnPlacement> = self
            .new_layout
            .placements(target_type, field)
            .to_vec();
        let mut matched: BTreeSet<usize> = BTreeSet::new();
        let mut drop_candidates: Vec<&ColumnPlacement> = Vec::new();
        for old in &old_placements {
            let mapped = self.out.mapped_table(&old.table);
            match new_placements
                .iter()
                .position(|p| p.table == mapped && p.column == old.column)
            {
                Some(i) => {
                    matched.insert(i);
                }
                None => drop_candidates.push(old),
            }
        }
        let pending: Vec<usize> = (0..new_placements.len())
            .filter(|i| !matched.contains(i))
            .collect();

        let class_table = self
            .new_layout
            .hierarchy_of(target_type)
            .is_some_and(|h| h.schema == InheritanceSchema::ClassTable);
        if class_table && drop_candidates.len() == 1 && pending.len() == 1 {
            let old = drop_candidates[0];
            let new = &new_placements[pending[0]];
            if let Some(hierarchy) = self.new_layout.hierarchy_of(target_type) {
                self.out.moves.push(ColumnMove {
                    source_table: self.out.mapped_table(&old.table).to_string(),
                    source_column: old.column.clone(),
                    target_table: new.table.clone(),
                    target_column: new.column.clone(),
                    key_column: hierarchy.key_column.clone(),
                });
            }
            self.out
                .dropped_columns
                .insert((old.table.clone(), old.column.clone()));
        } else {
            for old in drop_candidates {
                self.out
                    .dropped_columns
                    .insert((old.table.clone(), old.column.clone()));
            }
        }
        tracing::debug!(hint = %hint, "resolved field move");
        Ok(())
    }
}
