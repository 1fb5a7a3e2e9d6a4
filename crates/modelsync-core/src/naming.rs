//! Mapping of model names onto storage names.
//!
//! A [`NamingConvention`] turns full type names (`"app.billing.Invoice"`)
//! into table names and field names into column names. The convention is
//! part of the persisted model snapshot, so older storage layouts can be
//! reconstructed exactly even after the active convention changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Letter case applied to every produced storage name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LetterCasePolicy {
    /// Keep names exactly as declared.
    #[default]
    AsIs,
    /// Fold names to uppercase.
    Uppercase,
    /// Fold names to lowercase.
    Lowercase,
}

/// How type namespaces participate in table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NamespacePolicy {
    /// Use the declared namespace unchanged.
    #[default]
    AsIs,
    /// Replace namespaces through the synonym table before use.
    Synonymize,
}

/// Rules for deriving table and column names from model names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingConvention {
    letter_case: LetterCasePolicy,
    namespace_policy: NamespacePolicy,
    /// Exact full namespace -> replacement token. An empty replacement
    /// elides the namespace entirely.
    namespace_synonyms: BTreeMap<String, String>,
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self::new()
    }
}

impl NamingConvention {
    /// Creates the identity convention: names as declared, namespaces kept.
    pub fn new() -> Self {
        Self {
            letter_case: LetterCasePolicy::AsIs,
            namespace_policy: NamespacePolicy::AsIs,
            namespace_synonyms: BTreeMap::new(),
        }
    }

    /// Sets the letter case policy.
    #[must_use]
    pub fn with_letter_case(mut self, policy: LetterCasePolicy) -> Self {
        self.letter_case = policy;
        self
    }

    /// Sets the namespace policy.
    #[must_use]
    pub fn with_namespace_policy(mut self, policy: NamespacePolicy) -> Self {
        self.namespace_policy = policy;
        self
    }

    /// Registers a namespace synonym.
    ///
    /// Matching is exact: the synonym applies only when the declared
    /// namespace equals `namespace` in full. Register `""` as the
    /// replacement to elide the namespace from table names.
    #[must_use]
    pub fn with_synonym(mut self, namespace: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.namespace_synonyms
            .insert(namespace.into(), replacement.into());
        self
    }

    /// Returns the configured letter case policy.
    pub const fn letter_case(&self) -> LetterCasePolicy {
        self.letter_case
    }

    /// Returns the configured namespace policy.
    pub const fn namespace_policy(&self) -> NamespacePolicy {
        self.namespace_policy
    }

    /// Derives the table name for a full type name.
    ///
    /// The namespace (everything before the last `.`) is resolved through
    /// the namespace policy, joined to the short type name with `_`, and
    /// the result is case-folded. Dots inside the resolved namespace also
    /// become `_`.
    pub fn table_name(&self, full_type_name: &str) -> String {
        let (namespace, short) = split_type_name(full_type_name);
        let resolved = self.resolve_namespace(namespace);
        let joined = if resolved.is_empty() {
            short.to_string()
        } else {
            format!("{}_{}", resolved.replace('.', "_"), short)
        };
        self.apply_case(&joined)
    }

    /// Derives the column name for a scalar field.
    pub fn column_name(&self, field_name: &str) -> String {
        self.apply_case(field_name)
    }

    /// Derives the column name for a reference field.
    ///
    /// Reference columns store the target's key, so the key field name is
    /// appended: field `Owner` with key `Id` maps to `Owner_Id` before
    /// case folding.
    pub fn reference_column_name(&self, field_name: &str, key_field: &str) -> String {
        self.apply_case(&format!("{field_name}_{key_field}"))
    }

    fn resolve_namespace<'a>(&'a self, namespace: &'a str) -> &'a str {
        match self.namespace_policy {
            NamespacePolicy::AsIs => namespace,
            NamespacePolicy::Synonymize => self
                .namespace_synonyms
                .get(namespace)
                .map_or(namespace, String::as_str),
        }
    }

    fn apply_case(&self, name: &str) -> String {
        match self.letter_case {
            LetterCasePolicy::AsIs => name.to_string(),
            LetterCasePolicy::Uppercase => name.to_uppercase(),
            LetterCasePolicy::Lowercase => name.to_lowercase(),
        }
    }
}

/// Splits a full type name into `(namespace, short name)`.
///
/// The namespace is everything before the last `.`, or `""` when the name
/// has no dots.
pub fn split_type_name(full_type_name: &str) -> (&str, &str) {
    match full_type_name.rsplit_once('.') {
        Some((namespace, short)) => (namespace, short),
        None => ("", full_type_name),
    }
}
