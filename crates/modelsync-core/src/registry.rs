//! The static model registry.
//!
//! Every type a domain works with is registered up front through
//! [`ModelRegistryBuilder`]. [`ModelRegistryBuilder::build`] validates the
//! whole model in one pass and returns an immutable [`ModelRegistry`];
//! everything downstream (layout, schema comparison, prefetch) can then
//! rely on the registry's invariants without re-checking them.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ModelErrorKind, Result};
use crate::model::{FieldDef, FieldKind, HierarchyDef, InheritanceSchema, TypeDef};

fn identifier_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new("^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles")
    })
}

/// An immutable, validated set of model types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRegistry {
    types: BTreeMap<String, TypeDef>,
}

/// Collects type definitions and validates them into a [`ModelRegistry`].
#[derive(Debug, Default)]
pub struct ModelRegistryBuilder {
    types: Vec<TypeDef>,
}

impl ModelRegistryBuilder {
    /// Adds a type definition.
    #[must_use]
    pub fn register(mut self, ty: TypeDef) -> Self {
        self.types.push(ty);
        self
    }

    /// Validates the collected definitions and builds the registry.
    #[allow(clippy::result_large_err)]
    pub fn build(self) -> Result<ModelRegistry> {
        ModelRegistry::from_types(self.types)
    }
}

impl ModelRegistry {
    /// Starts an empty builder.
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    /// Validates `types` and builds the registry.
    ///
    /// Checks, in order: identifier syntax, duplicate type names, parent
    /// links and cycles, hierarchy placement, field name collisions along
    /// each chain, and reference resolution. The first failure is
    /// returned; nothing is partially registered.
    #[allow(clippy::result_large_err)]
    pub fn from_types(types: Vec<TypeDef>) -> Result<Self> {
        let mut map: BTreeMap<String, TypeDef> = BTreeMap::new();
        for ty in types {
            validate_identifiers(&ty)?;
            let name = ty.name.clone();
            if map.insert(name.clone(), ty).is_some() {
                return Err(Error::model(
                    ModelErrorKind::DuplicateType,
                    name,
                    "type registered more than once",
                ));
            }
        }

        let registry = Self { types: map };
        registry.validate_parent_links()?;
        registry.validate_hierarchy_placement()?;
        registry.validate_field_names()?;
        registry.validate_references()?;
        registry.warn_on_empty_hierarchies();
        Ok(registry)
    }

    /// Returns the type with the given full name.
    pub fn get(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Returns `true` if the name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterates all types in name order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    /// Iterates hierarchy roots in name order.
    pub fn roots(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values().filter(|ty| ty.parent.is_none())
    }

    /// Returns the hierarchy root of the named type.
    pub fn root_of(&self, name: &str) -> Option<&TypeDef> {
        let mut current = self.get(name)?;
        while let Some(parent) = &current.parent {
            current = self.get(parent)?;
        }
        Some(current)
    }

    /// Returns the hierarchy mapping governing the named type.
    pub fn hierarchy_of(&self, name: &str) -> Option<&HierarchyDef> {
        self.root_of(name)?.hierarchy.as_ref()
    }

    /// Returns the inheritance chain of the named type, root first,
    /// the type itself last.
    pub fn chain_of(&self, name: &str) -> Vec<&TypeDef> {
        let mut chain = Vec::new();
        let mut current = self.get(name);
        while let Some(ty) = current {
            chain.push(ty);
            current = ty.parent.as_deref().and_then(|p| self.get(p));
        }
        chain.reverse();
        chain
    }

    /// Returns `true` if `name` is `ancestor` or inherits from it.
    pub fn is_same_or_descendant(&self, name: &str, ancestor: &str) -> bool {
        let mut current = self.get(name);
        while let Some(ty) = current {
            if ty.name == ancestor {
                return true;
            }
            current = ty.parent.as_deref().and_then(|p| self.get(p));
        }
        false
    }

    /// Returns the named type and all its descendants, in name order with
    /// the type itself first.
    pub fn subtree(&self, name: &str) -> Vec<&TypeDef> {
        let mut result = Vec::new();
        if let Some(ty) = self.get(name) {
            result.push(ty);
        }
        for ty in self.types.values() {
            if ty.name != name && self.is_same_or_descendant(&ty.name, name) {
                result.push(ty);
            }
        }
        result
    }

    /// Returns the non-abstract types of the named type's subtree.
    pub fn concrete_subtree(&self, name: &str) -> Vec<&TypeDef> {
        self.subtree(name)
            .into_iter()
            .filter(|ty| !ty.is_abstract)
            .collect()
    }

    /// Returns every field reachable from the named type: its own and all
    /// inherited ones, chain-ordered, each with its declaring type.
    pub fn all_fields(&self, name: &str) -> Vec<(&TypeDef, &FieldDef)> {
        let mut result = Vec::new();
        for ty in self.chain_of(name) {
            for field in &ty.fields {
                result.push((ty, field));
            }
        }
        result
    }

    /// Finds a field by name on the named type or any of its ancestors.
    pub fn find_field(&self, name: &str, field: &str) -> Option<(&TypeDef, &FieldDef)> {
        self.all_fields(name)
            .into_iter()
            .find(|(_, f)| f.name == field)
    }

    /// Returns `true` if the named type declares or inherits `field`.
    pub fn field_accessible_from(&self, name: &str, field: &str) -> bool {
        self.find_field(name, field).is_some()
    }

    fn validate_parent_links(&self) -> Result<()> {
        for ty in self.types.values() {
            let mut seen: HashSet<&str> = HashSet::new();
            seen.insert(&ty.name);
            let mut current = ty;
            while let Some(parent) = &current.parent {
                let Some(parent_ty) = self.get(parent) else {
                    return Err(Error::model(
                        ModelErrorKind::UnknownParent,
                        ty.name.clone(),
                        format!("parent type '{parent}' is not registered"),
                    ));
                };
                if !seen.insert(&parent_ty.name) {
                    return Err(Error::model(
                        ModelErrorKind::HierarchyCycle,
                        ty.name.clone(),
                        format!("parent chain loops through '{}'", parent_ty.name),
                    ));
                }
                current = parent_ty;
            }
        }
        Ok(())
    }

    fn validate_hierarchy_placement(&self) -> Result<()> {
        for ty in self.types.values() {
            match (&ty.parent, &ty.hierarchy) {
                (None, None) => {
                    return Err(Error::model(
                        ModelErrorKind::MissingHierarchy,
                        ty.name.clone(),
                        "root type must declare its hierarchy mapping",
                    ));
                }
                (Some(_), Some(_)) => {
                    return Err(Error::model(
                        ModelErrorKind::ConflictingHierarchy,
                        ty.name.clone(),
                        "hierarchy mapping is declared on the root type only",
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_field_names(&self) -> Result<()> {
        for ty in self.types.values() {
            // Every chain invariant is checked from the leaf's point of
            // view; intermediate types get rechecked, which is harmless.
            let Some(hierarchy) = self.hierarchy_of(&ty.name) else {
                continue;
            };
            let mut seen: HashSet<&str> = HashSet::new();
            for (declaring, field) in self.all_fields(&ty.name) {
                if field.name == hierarchy.key_field {
                    return Err(Error::model(
                        ModelErrorKind::DuplicateField,
                        declaring.name.clone(),
                        format!("field '{}' collides with the implicit key field", field.name),
                    ));
                }
                if hierarchy.schema == InheritanceSchema::SingleTable
                    && field.name == hierarchy.discriminator_field
                {
                    return Err(Error::model(
                        ModelErrorKind::DuplicateField,
                        declaring.name.clone(),
                        format!(
                            "field '{}' collides with the discriminator field",
                            field.name
                        ),
                    ));
                }
                if !seen.insert(&field.name) {
                    return Err(Error::model(
                        ModelErrorKind::DuplicateField,
                        ty.name.clone(),
                        format!("field '{}' appears more than once along the chain", field.name),
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_references(&self) -> Result<()> {
        for ty in self.types.values() {
            for field in &ty.fields {
                match &field.kind {
                    FieldKind::Scalar { .. } => {}
                    FieldKind::Reference { target } => {
                        if !self.contains(target) {
                            return Err(Error::model(
                                ModelErrorKind::UnresolvedReference,
                                ty.name.clone(),
                                format!(
                                    "reference field '{}' targets unregistered type '{target}'",
                                    field.name
                                ),
                            ));
                        }
                    }
                    FieldKind::EntitySet {
                        target,
                        back_reference,
                    } => {
                        self.validate_entity_set(ty, field, target, back_reference)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_entity_set(
        &self,
        owner: &TypeDef,
        field: &FieldDef,
        target: &str,
        back_reference: &str,
    ) -> Result<()> {
        if !self.contains(target) {
            return Err(Error::model(
                ModelErrorKind::UnresolvedReference,
                owner.name.clone(),
                format!(
                    "entity-set field '{}' targets unregistered type '{target}'",
                    field.name
                ),
            ));
        }
        let Some((_, back)) = self.find_field(target, back_reference) else {
            return Err(Error::model(
                ModelErrorKind::UnresolvedReference,
                owner.name.clone(),
                format!(
                    "entity-set field '{}' names back reference '{back_reference}', \
                     which '{target}' does not have",
                    field.name
                ),
            ));
        };
        let FieldKind::Reference { target: back_target } = &back.kind else {
            return Err(Error::model(
                ModelErrorKind::UnresolvedReference,
                owner.name.clone(),
                format!(
                    "back reference '{back_reference}' of entity-set field '{}' \
                     is not a reference field",
                    field.name
                ),
            ));
        };
        let owner_root = self.root_of(&owner.name).map(|t| t.name.as_str());
        let back_root = self.root_of(back_target).map(|t| t.name.as_str());
        if owner_root.is_none() || owner_root != back_root {
            return Err(Error::model(
                ModelErrorKind::UnresolvedReference,
                owner.name.clone(),
                format!(
                    "back reference '{back_reference}' of entity-set field '{}' \
                     points at '{back_target}', which is outside the owner's hierarchy",
                    field.name
                ),
            ));
        }
        Ok(())
    }

    fn warn_on_empty_hierarchies(&self) {
        for root in self.roots() {
            if self
                .subtree(&root.name)
                .iter()
                .all(|ty| ty.is_abstract)
            {
                tracing::warn!(
                    root = %root.name,
                    "hierarchy has no concrete types; it maps to no usable rows"
                );
            }
        }
    }
}

fn validate_identifiers(ty: &TypeDef) -> Result<()> {
    let pattern = identifier_regex();
    if ty.name.is_empty() || !ty.name.split('.').all(|seg| pattern.is_match(seg)) {
        return Err(Error::model(
            ModelErrorKind::InvalidIdentifier,
            ty.name.clone(),
            "type names are dot-separated identifiers",
        ));
    }
    for field in &ty.fields {
        if !pattern.is_match(&field.name) {
            return Err(Error::model(
                ModelErrorKind::InvalidIdentifier,
                ty.name.clone(),
                format!("field name '{}' is not an identifier", field.name),
            ));
        }
    }
    if let Some(hierarchy) = &ty.hierarchy {
        for name in [&hierarchy.key_field, &hierarchy.discriminator_field] {
            if !pattern.is_match(name) {
                return Err(Error::model(
                    ModelErrorKind::InvalidIdentifier,
                    ty.name.clone(),
                    format!("hierarchy field name '{name}' is not an identifier"),
                ));
            }
        }
    }
    Ok(())
}
