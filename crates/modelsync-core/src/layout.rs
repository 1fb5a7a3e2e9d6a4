//! Physical layout: where each type and field lives in storage.
//!
//! [`Layout::build`] combines a validated registry with a naming convention
//! and produces the full table/column mapping for every hierarchy. The
//! layout is derived data: it is rebuilt from the registry on demand and is
//! never persisted itself. Schema comparison builds the expected schema
//! from it, hint resolution rebuilds the *previous* layout from a snapshot,
//! and prefetch uses it to turn field requests into table reads.

use std::collections::{BTreeMap, HashSet};

use crate::error::{Error, ModelErrorKind, Result};
use crate::model::{FieldDef, FieldKind, InheritanceSchema, TypeDef};
use crate::naming::NamingConvention;
use crate::registry::ModelRegistry;
use crate::value::{Value, ValueType};

/// A physical column location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnPlacement {
    /// Table name.
    pub table: String,
    /// Column name.
    pub column: String,
}

/// A field-bearing column of one table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    /// Column name.
    pub column: String,
    /// Full name of the type declaring the mapped field.
    pub declaring_type: String,
    /// Logical field name.
    pub field: String,
    /// Stored value type.
    pub value_type: ValueType,
    /// Whether storage may hold NULL here. Single-table layouts force
    /// this on for fields declared below the root.
    pub nullable: bool,
    /// Column default, if the field declares one.
    pub default: Option<Value>,
    /// Table whose key this column references, when the field is a
    /// reference and the target hierarchy exposes a key table.
    pub reference_target_table: Option<String>,
}

/// One physical table of a hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLayout {
    /// Table name.
    pub name: String,
    /// Key column name; primary key of the table.
    pub key_column: String,
    /// Key value type.
    pub key_type: ValueType,
    /// Class-table child tables: the parent table the key also
    /// references.
    pub key_parent_table: Option<String>,
    /// Discriminator column; single-table root tables only.
    pub discriminator_column: Option<String>,
    /// Field-bearing columns in declaration order, root-declared first.
    pub columns: Vec<ColumnLayout>,
}

impl TableLayout {
    /// Returns the field-bearing column with the given name.
    pub fn column(&self, name: &str) -> Option<&ColumnLayout> {
        self.columns.iter().find(|c| c.column == name)
    }
}

/// Hierarchy-level layout facts.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyLayout {
    /// Full name of the root type.
    pub root: String,
    /// How the hierarchy maps onto tables.
    pub schema: InheritanceSchema,
    /// Logical key field name.
    pub key_field: String,
    /// Physical key column name, identical in every table of the
    /// hierarchy.
    pub key_column: String,
    /// Key value type.
    pub key_type: ValueType,
    /// The table foreign keys from other hierarchies point at. `None`
    /// for concrete-table hierarchies, which have no single key table.
    pub key_table: Option<String>,
    /// Discriminator location; single-table hierarchies only.
    pub discriminator: Option<ColumnPlacement>,
}

/// The complete physical mapping of a registered model.
#[derive(Debug, Clone)]
pub struct Layout {
    hierarchies: BTreeMap<String, HierarchyLayout>,
    root_index: BTreeMap<String, String>,
    tables: BTreeMap<String, TableLayout>,
    owned: BTreeMap<String, Vec<String>>,
    fields: BTreeMap<String, BTreeMap<String, Vec<ColumnPlacement>>>,
}

impl Layout {
    /// Derives the physical layout of `registry` under `naming`.
    ///
    /// Fails when the naming convention folds two model names onto the
    /// same table or column, which a registry cannot detect on its own.
    #[allow(clippy::result_large_err)]
    pub fn build(registry: &ModelRegistry, naming: &NamingConvention) -> Result<Self> {
        let mut layout = Self {
            hierarchies: BTreeMap::new(),
            root_index: BTreeMap::new(),
            tables: BTreeMap::new(),
            owned: BTreeMap::new(),
            fields: BTreeMap::new(),
        };

        // Hierarchy facts first; reference columns need the key shape of
        // hierarchies that may not have had their tables built yet.
        for root in registry.roots() {
            let Some(hierarchy) = &root.hierarchy else {
                return Err(Error::model(
                    ModelErrorKind::MissingHierarchy,
                    root.name.clone(),
                    "root type lost its hierarchy mapping",
                ));
            };
            let root_table = naming.table_name(&root.name);
            let key_table = match hierarchy.schema {
                InheritanceSchema::SingleTable | InheritanceSchema::ClassTable => {
                    Some(root_table.clone())
                }
                InheritanceSchema::ConcreteTable => None,
            };
            let discriminator = (hierarchy.schema == InheritanceSchema::SingleTable).then(|| {
                ColumnPlacement {
                    table: root_table,
                    column: naming.column_name(&hierarchy.discriminator_field),
                }
            });
            layout.hierarchies.insert(
                root.name.clone(),
                HierarchyLayout {
                    root: root.name.clone(),
                    schema: hierarchy.schema,
                    key_field: hierarchy.key_field.clone(),
                    key_column: naming.column_name(&hierarchy.key_field),
                    key_type: hierarchy.key_type,
                    key_table,
                    discriminator,
                },
            );
            for ty in registry.subtree(&root.name) {
                layout.root_index.insert(ty.name.clone(), root.name.clone());
            }
        }

        for root in registry.roots() {
            layout.build_hierarchy_tables(registry, naming, &root.name)?;
        }
        Ok(layout)
    }

    /// Returns the layout facts of the hierarchy rooted at `root`.
    pub fn hierarchy(&self, root: &str) -> Option<&HierarchyLayout> {
        self.hierarchies.get(root)
    }

    /// Returns the layout facts of the hierarchy containing `type_name`.
    pub fn hierarchy_of(&self, type_name: &str) -> Option<&HierarchyLayout> {
        self.root_index
            .get(type_name)
            .and_then(|root| self.hierarchies.get(root))
    }

    /// Returns the root type name of the hierarchy containing `type_name`.
    pub fn root_of(&self, type_name: &str) -> Option<&str> {
        self.root_index.get(type_name).map(String::as_str)
    }

    /// Iterates hierarchy layouts in root name order.
    pub fn hierarchies(&self) -> impl Iterator<Item = &HierarchyLayout> {
        self.hierarchies.values()
    }

    /// Iterates all tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableLayout> {
        self.tables.values()
    }

    /// Returns the table with the given name.
    pub fn table(&self, name: &str) -> Option<&TableLayout> {
        self.tables.get(name)
    }

    /// Returns the tables named after `type_name`: the ones a type rename
    /// renames and a type removal drops. Empty for single-table non-roots
    /// and concrete-table abstract types.
    pub fn owned_tables(&self, type_name: &str) -> &[String] {
        self.owned.get(type_name).map_or(&[], Vec::as_slice)
    }

    /// Returns every physical column holding `field` as declared on
    /// `declaring`. Concrete-table layouts have one entry per concrete
    /// subtree table; the other layouts exactly one.
    pub fn placements(&self, declaring: &str, field: &str) -> &[ColumnPlacement] {
        self.fields
            .get(declaring)
            .and_then(|fields| fields.get(field))
            .map_or(&[], Vec::as_slice)
    }

    /// Returns the single column applicable when reading `field` (declared
    /// on `declaring`) off rows of exact type `exact_type`.
    pub fn locate(
        &self,
        declaring: &str,
        field: &str,
        exact_type: &str,
    ) -> Option<&ColumnPlacement> {
        let hierarchy = self.hierarchy_of(declaring)?;
        let placements = self.placements(declaring, field);
        match hierarchy.schema {
            InheritanceSchema::SingleTable | InheritanceSchema::ClassTable => placements.first(),
            InheritanceSchema::ConcreteTable => {
                let table = self.owned_tables(exact_type).first()?;
                placements.iter().find(|p| &p.table == table)
            }
        }
    }

    /// Returns the table where a row of exact type `exact_type` is
    /// anchored: the table holding its key that every read starts from.
    pub fn anchor_table(&self, exact_type: &str) -> Option<&str> {
        let hierarchy = self.hierarchy_of(exact_type)?;
        match hierarchy.schema {
            InheritanceSchema::SingleTable | InheritanceSchema::ClassTable => {
                hierarchy.key_table.as_deref()
            }
            InheritanceSchema::ConcreteTable => {
                self.owned_tables(exact_type).first().map(String::as_str)
            }
        }
    }

    fn build_hierarchy_tables(
        &mut self,
        registry: &ModelRegistry,
        naming: &NamingConvention,
        root_name: &str,
    ) -> Result<()> {
        let Some(hierarchy) = self.hierarchies.get(root_name).cloned() else {
            return Err(Error::model(
                ModelErrorKind::UnknownType,
                root_name.to_string(),
                "hierarchy facts missing for root",
            ));
        };
        match hierarchy.schema {
            InheritanceSchema::SingleTable => {
                let table_name = naming.table_name(root_name);
                let mut columns = Vec::new();
                for ty in registry.subtree(root_name) {
                    for field in &ty.fields {
                        if !field.stores_column() {
                            continue;
                        }
                        let mut column = self.column_layout(naming, ty, field)?;
                        column.nullable = field.nullable || ty.name != root_name;
                        self.index_field(ty, field, &table_name, &column.column);
                        columns.push(column);
                    }
                }
                self.add_table(TableLayout {
                    name: table_name.clone(),
                    key_column: hierarchy.key_column.clone(),
                    key_type: hierarchy.key_type,
                    key_parent_table: None,
                    discriminator_column: hierarchy
                        .discriminator
                        .as_ref()
                        .map(|p| p.column.clone()),
                    columns,
                })?;
                self.owned.insert(root_name.to_string(), vec![table_name]);
            }
            InheritanceSchema::ClassTable => {
                for ty in registry.subtree(root_name) {
                    let table_name = naming.table_name(&ty.name);
                    let mut columns = Vec::new();
                    for field in &ty.fields {
                        if !field.stores_column() {
                            continue;
                        }
                        let column = self.column_layout(naming, ty, field)?;
                        self.index_field(ty, field, &table_name, &column.column);
                        columns.push(column);
                    }
                    self.add_table(TableLayout {
                        name: table_name.clone(),
                        key_column: hierarchy.key_column.clone(),
                        key_type: hierarchy.key_type,
                        key_parent_table: ty
                            .parent
                            .as_deref()
                            .map(|parent| naming.table_name(parent)),
                        discriminator_column: None,
                        columns,
                    })?;
                    self.owned.insert(ty.name.clone(), vec![table_name]);
                }
            }
            InheritanceSchema::ConcreteTable => {
                for ty in registry.concrete_subtree(root_name) {
                    let table_name = naming.table_name(&ty.name);
                    let mut columns = Vec::new();
                    for (declaring, field) in registry.all_fields(&ty.name) {
                        if !field.stores_column() {
                            continue;
                        }
                        let column = self.column_layout(naming, declaring, field)?;
                        self.index_field(declaring, field, &table_name, &column.column);
                        columns.push(column);
                    }
                    self.add_table(TableLayout {
                        name: table_name.clone(),
                        key_column: hierarchy.key_column.clone(),
                        key_type: hierarchy.key_type,
                        key_parent_table: None,
                        discriminator_column: None,
                        columns,
                    })?;
                    self.owned.insert(ty.name.clone(), vec![table_name]);
                }
            }
        }
        Ok(())
    }

    fn column_layout(
        &self,
        naming: &NamingConvention,
        declaring: &TypeDef,
        field: &FieldDef,
    ) -> Result<ColumnLayout> {
        let (column, value_type, reference_target_table) = match &field.kind {
            FieldKind::Scalar { value_type } => {
                (naming.column_name(&field.name), *value_type, None)
            }
            FieldKind::Reference { target } => {
                let Some(target_hierarchy) = self.hierarchy_of(target) else {
                    return Err(Error::model(
                        ModelErrorKind::UnresolvedReference,
                        declaring.name.clone(),
                        format!("reference field '{}' targets unmapped type '{target}'", field.name),
                    ));
                };
                (
                    naming.reference_column_name(&field.name, &target_hierarchy.key_field),
                    target_hierarchy.key_type,
                    target_hierarchy.key_table.clone(),
                )
            }
            FieldKind::EntitySet { .. } => {
                return Err(Error::model(
                    ModelErrorKind::UnresolvedReference,
                    declaring.name.clone(),
                    format!("entity-set field '{}' has no column", field.name),
                ));
            }
        };
        Ok(ColumnLayout {
            column,
            declaring_type: declaring.name.clone(),
            field: field.name.clone(),
            value_type,
            nullable: field.nullable,
            default: field.default.clone(),
            reference_target_table,
        })
    }

    fn index_field(&mut self, declaring: &TypeDef, field: &FieldDef, table: &str, column: &str) {
        self.fields
            .entry(declaring.name.clone())
            .or_default()
            .entry(field.name.clone())
            .or_default()
            .push(ColumnPlacement {
                table: table.to_string(),
                column: column.to_string(),
            });
    }

    fn add_table(&mut self, table: TableLayout) -> Result<()> {
        let mut names: HashSet<&str> = HashSet::new();
        names.insert(&table.key_column);
        if let Some(disc) = &table.discriminator_column {
            if !names.insert(disc) {
                return Err(column_collision(&table.name, disc));
            }
        }
        for column in &table.columns {
            if !names.insert(&column.column) {
                return Err(column_collision(&table.name, &column.column));
            }
        }
        let name = table.name.clone();
        if self.tables.insert(name.clone(), table).is_some() {
            return Err(Error::model(
                ModelErrorKind::ColumnCollision,
                name.clone(),
                format!("naming convention maps two types onto table '{name}'"),
            ));
        }
        Ok(())
    }
}

fn column_collision(table: &str, column: &str) -> Error {
    Error::model(
        ModelErrorKind::ColumnCollision,
        table.to_string(),
        format!("naming convention maps two fields onto column '{table}.{column}'"),
    )
}
