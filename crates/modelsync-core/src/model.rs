//! Model metadata: types, fields, and hierarchy mappings.
//!
//! These definitions are plain data. They are registered up front into a
//! [`crate::registry::ModelRegistry`], validated there, and then serve as
//! the single source of truth for schema layout and prefetch planning.
//! Everything here serializes, because the registered model is persisted
//! as a snapshot alongside the storage it was built against.

use serde::{Deserialize, Serialize};

use crate::naming::split_type_name;
use crate::value::{Value, ValueType};

/// Default logical name of the key field.
pub const DEFAULT_KEY_FIELD: &str = "id";

/// Default logical name of the discriminator field.
pub const DEFAULT_DISCRIMINATOR_FIELD: &str = "type_id";

/// How a type hierarchy maps onto tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InheritanceSchema {
    /// One table for the whole hierarchy, rows distinguished by a
    /// discriminator column. Fields declared below the root are nullable
    /// in storage regardless of their declaration.
    SingleTable,
    /// One table per type holding only that type's declared fields. A
    /// child table's key column is also a foreign key to its parent table.
    ClassTable,
    /// One table per concrete type holding the flattened field set of its
    /// whole inheritance chain. No discriminator, no inter-table keys.
    ConcreteTable,
}

impl InheritanceSchema {
    /// Short lowercase label used in log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            InheritanceSchema::SingleTable => "single-table",
            InheritanceSchema::ClassTable => "class-table",
            InheritanceSchema::ConcreteTable => "concrete-table",
        }
    }
}

/// What a field holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// A directly stored value.
    Scalar {
        /// The storable category of the value.
        value_type: ValueType,
    },
    /// A link to a single entity, stored as the target's key.
    Reference {
        /// Full name of the target type.
        target: String,
    },
    /// A collection of entities pointing back at the owner. Not stored in
    /// the owner's table; materialized by following the back reference.
    EntitySet {
        /// Full name of the item type.
        target: String,
        /// Name of the reference field on the item type that points back
        /// at the owner.
        back_reference: String,
    },
}

/// A declared field of a model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Logical field name, unique along the declaring type's chain.
    pub name: String,
    /// What the field holds.
    pub kind: FieldKind,
    /// Whether storage may hold NULL for this field.
    pub nullable: bool,
    /// Column default applied when the field's column is added to
    /// existing rows.
    pub default: Option<Value>,
    /// Lazy fields are excluded from entity materialization unless a
    /// prefetch descriptor names them.
    pub lazy: bool,
}

impl FieldDef {
    /// Declares a scalar field.
    pub fn scalar(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar { value_type },
            nullable: false,
            default: None,
            lazy: false,
        }
    }

    /// Declares a reference field targeting `target`.
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Reference {
                target: target.into(),
            },
            nullable: false,
            default: None,
            lazy: false,
        }
    }

    /// Declares an entity-set field whose items are `target` entities
    /// holding a `back_reference` field pointing at the owner.
    pub fn entity_set(
        name: impl Into<String>,
        target: impl Into<String>,
        back_reference: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::EntitySet {
                target: target.into(),
                back_reference: back_reference.into(),
            },
            nullable: false,
            default: None,
            lazy: false,
        }
    }

    /// Marks the field nullable.
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

    /// Marks the field lazy.
    #[must_use]
    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    /// Returns `true` for scalar fields.
    pub const fn is_scalar(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar { .. })
    }

    /// Returns `true` for reference fields.
    pub const fn is_reference(&self) -> bool {
        matches!(self.kind, FieldKind::Reference { .. })
    }

    /// Returns `true` for entity-set fields.
    pub const fn is_entity_set(&self) -> bool {
        matches!(self.kind, FieldKind::EntitySet { .. })
    }

    /// Returns `true` if the field occupies a column in its type's table.
    ///
    /// Entity sets do not; they live entirely on the item side.
    pub const fn stores_column(&self) -> bool {
        !self.is_entity_set()
    }

    /// Returns the referenced type for reference and entity-set fields.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Scalar { .. } => None,
            FieldKind::Reference { target } | FieldKind::EntitySet { target, .. } => Some(target),
        }
    }
}

/// Hierarchy mapping, declared once on each root type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyDef {
    /// How the hierarchy maps onto tables.
    pub schema: InheritanceSchema,
    /// Logical name of the key field. The key is implicit: it is not
    /// declared among the type's fields and cannot be renamed by hints.
    pub key_field: String,
    /// Storable category of key values.
    pub key_type: ValueType,
    /// Logical name of the discriminator field. Only materialized for
    /// [`InheritanceSchema::SingleTable`].
    pub discriminator_field: String,
}

impl HierarchyDef {
    /// Declares a hierarchy with default key and discriminator names.
    pub fn new(schema: InheritanceSchema) -> Self {
        Self {
            schema,
            key_field: DEFAULT_KEY_FIELD.to_string(),
            key_type: ValueType::BigInt,
            discriminator_field: DEFAULT_DISCRIMINATOR_FIELD.to_string(),
        }
    }

    /// Overrides the key field name.
    #[must_use]
    pub fn key_field(mut self, name: impl Into<String>) -> Self {
        self.key_field = name.into();
        self
    }

    /// Overrides the key value type.
    #[must_use]
    pub fn key_type(mut self, value_type: ValueType) -> Self {
        self.key_type = value_type;
        self
    }

    /// Overrides the discriminator field name.
    #[must_use]
    pub fn discriminator_field(mut self, name: impl Into<String>) -> Self {
        self.discriminator_field = name.into();
        self
    }
}

/// A registered model type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    /// Full name, e.g. `"app.billing.Invoice"`.
    pub name: String,
    /// Full name of the parent type, `None` for hierarchy roots.
    pub parent: Option<String>,
    /// Abstract types never have rows of their exact type.
    pub is_abstract: bool,
    /// Fields declared directly on this type.
    pub fields: Vec<FieldDef>,
    /// Hierarchy mapping; present on roots only.
    pub hierarchy: Option<HierarchyDef>,
}

impl TypeDef {
    /// Declares a type with the given full name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            is_abstract: false,
            fields: Vec::new(),
            hierarchy: None,
        }
    }

    /// Sets the parent type.
    #[must_use]
    pub fn parent(mut self, name: impl Into<String>) -> Self {
        self.parent = Some(name.into());
        self
    }

    /// Marks the type abstract.
    #[must_use]
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Appends a declared field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares the hierarchy mapping. Roots must call this.
    #[must_use]
    pub fn hierarchy(mut self, hierarchy: HierarchyDef) -> Self {
        self.hierarchy = Some(hierarchy);
        self
    }

    /// Returns the name without its namespace.
    pub fn short_name(&self) -> &str {
        split_type_name(&self.name).1
    }

    /// Returns the namespace, `""` when there is none.
    pub fn namespace(&self) -> &str {
        split_type_name(&self.name).0
    }

    /// Returns the declared field with the given name.
    pub fn find_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_builders_set_kind_and_flags() {
        let field = FieldDef::scalar("age", ValueType::BigInt)
            .nullable()
            .default_value(Value::BigInt(0));
        assert!(field.is_scalar());
        assert!(field.nullable);
        assert_eq!(field.default, Some(Value::BigInt(0)));
        assert!(field.stores_column());

        let owner = FieldDef::reference("owner", "app.Person");
        assert!(owner.is_reference());
        assert_eq!(owner.target(), Some("app.Person"));
        assert!(owner.stores_column());

        let pets = FieldDef::entity_set("pets", "app.Animal", "owner");
        assert!(pets.is_entity_set());
        assert!(!pets.stores_column());
    }

    #[test]
    fn hierarchy_defaults_and_overrides() {
        let default = HierarchyDef::new(InheritanceSchema::SingleTable);
        assert_eq!(default.key_field, "id");
        assert_eq!(default.key_type, ValueType::BigInt);
        assert_eq!(default.discriminator_field, "type_id");

        let custom = HierarchyDef::new(InheritanceSchema::ClassTable)
            .key_field("code")
            .key_type(ValueType::Text)
            .discriminator_field("kind");
        assert_eq!(custom.key_field, "code");
        assert_eq!(custom.key_type, ValueType::Text);
        assert_eq!(custom.discriminator_field, "kind");
    }

    #[test]
    fn type_def_exposes_name_parts() {
        let ty = TypeDef::new("app.billing.Invoice")
            .parent("app.billing.Document")
            .field(FieldDef::scalar("total", ValueType::Double));
        assert_eq!(ty.short_name(), "Invoice");
        assert_eq!(ty.namespace(), "app.billing");
        assert!(ty.find_field("total").is_some());
        assert!(ty.find_field("missing").is_none());
    }

    #[test]
    fn model_definitions_serialize() {
        let ty = TypeDef::new("app.Person")
            .hierarchy(HierarchyDef::new(InheritanceSchema::ClassTable))
            .field(FieldDef::scalar("name", ValueType::Text))
            .field(FieldDef::entity_set("pets", "app.Animal", "owner"));
        let encoded = serde_json::to_string(&ty).unwrap();
        let decoded: TypeDef = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, ty);
    }
}
