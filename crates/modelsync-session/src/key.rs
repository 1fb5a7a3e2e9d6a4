//! Entity keys used to address rows across an inheritance hierarchy.
//!
//! A key names a row by its hierarchy root and identifier value. The exact
//! concrete type of the row may be unknown at request time; it travels with
//! the key as an optional annotation and is refined once discriminator or
//! table provenance data arrives.

use std::fmt;
use std::hash::{Hash, Hasher};

use modelsync_core::Value;

/// Identifies one entity row within a hierarchy.
///
/// Identity is the `(hierarchy_root, id)` pair. The `exact_type` annotation
/// never participates in equality or hashing: the same row requested as its
/// base type and as its concrete type must land in the same tracking slot.
#[derive(Debug, Clone)]
pub struct EntityKey {
    hierarchy_root: String,
    exact_type: Option<String>,
    id: Value,
}

impl EntityKey {
    /// Creates a key for a row of the given hierarchy.
    ///
    /// `hierarchy_root` is the full name of the hierarchy's root type.
    /// Validation against a registry happens when the key is handed to the
    /// prefetch manager, not here.
    pub fn new(hierarchy_root: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            hierarchy_root: hierarchy_root.into(),
            exact_type: None,
            id: id.into(),
        }
    }

    /// Annotates the key with the concrete type of the row, when known.
    #[must_use]
    pub fn with_exact_type(mut self, exact_type: impl Into<String>) -> Self {
        self.exact_type = Some(exact_type.into());
        self
    }

    /// Full name of the hierarchy root this key belongs to.
    #[must_use]
    pub fn hierarchy_root(&self) -> &str {
        &self.hierarchy_root
    }

    /// Concrete type annotation, if the caller knew it.
    #[must_use]
    pub fn exact_type(&self) -> Option<&str> {
        self.exact_type.as_deref()
    }

    /// Identifier value of the row.
    #[must_use]
    pub fn id(&self) -> &Value {
        &self.id
    }
}

impl PartialEq for EntityKey {
    fn eq(&self, other: &Self) -> bool {
        self.hierarchy_root == other.hierarchy_root && value_eq(&self.id, &other.id)
    }
}

impl Eq for EntityKey {}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hierarchy_root.hash(state);
        hash_value(&self.id, state);
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exact_type {
            Some(exact) => write!(f, "{}#", exact)?,
            None => write!(f, "{}#", self.hierarchy_root)?,
        }
        fmt_id(&self.id, f)
    }
}

/// Compares identifier values bitwise for floating-point payloads so the
/// result stays consistent with [`hash_value`].
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

/// Hashes a single identifier value with a per-variant tag.
///
/// Doubles hash through `to_bits` and JSON payloads hash through their text
/// rendering, keeping the hash total over values that `value_eq` can equate.
fn hash_value(v: &Value, hasher: &mut impl Hasher) {
    match v {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::BigInt(i) => {
            2u8.hash(hasher);
            i.hash(hasher);
        }
        Value::Double(f) => {
            3u8.hash(hasher);
            f.to_bits().hash(hasher);
        }
        Value::Text(s) => {
            4u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Bytes(b) => {
            5u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Json(j) => {
            6u8.hash(hasher);
            j.to_string().hash(hasher);
        }
    }
}

fn fmt_id(v: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match v {
        Value::Null => write!(f, "null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::BigInt(i) => write!(f, "{i}"),
        Value::Double(d) => write!(f, "{d}"),
        Value::Text(s) => write!(f, "{s}"),
        Value::Bytes(b) => write!(f, "bytes[{}]", b.len()),
        Value::Json(j) => write!(f, "{j}"),
    }
}
