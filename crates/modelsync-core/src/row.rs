//! Fetched row representation.
//!
//! A [`Row`] pairs a vector of [`Value`]s with a shared [`ColumnSet`]
//! describing the column order. Backends build one `ColumnSet` per result
//! and share it across every row of that result via [`Arc`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result, TypeError};
use crate::value::Value;

/// Column names for a fetched result, shared across its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSet {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColumnSet {
    /// Builds a column set from ordered column names.
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index }
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the column names in result order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the position of `name`, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// A single fetched row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<ColumnSet>,
    values: Vec<Value>,
}

impl Row {
    /// Builds a row over a shared column set.
    ///
    /// Returns an argument error when the value count does not match the
    /// column count.
    pub fn new(columns: Arc<ColumnSet>, values: Vec<Value>) -> Result<Self> {
        if values.len() != columns.len() {
            return Err(Error::argument(
                "values",
                format!(
                    "row has {} value(s) but the column set has {} column(s)",
                    values.len(),
                    columns.len()
                ),
            ));
        }
        Ok(Self { columns, values })
    }

    /// Returns the shared column set.
    pub fn columns(&self) -> &Arc<ColumnSet> {
        &self.columns
    }

    /// Returns the value at `index`, if in range.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns the value of the named column, if present.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns.position(name).and_then(|i| self.values.get(i))
    }

    /// Returns the named column converted to `T`.
    ///
    /// Fails with a type error naming the column when the column is missing
    /// or the value does not convert.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        match self.get_by_name(name) {
            Some(value) => T::from_value(value).map_err(|e| match e {
                Error::Type(te) => Error::Type(TypeError {
                    column: Some(name.to_string()),
                    ..te
                }),
                other => other,
            }),
            None => Err(Error::Type(TypeError {
                expected: "column",
                actual: format!("no column named '{name}'"),
                column: Some(name.to_string()),
            })),
        }
    }

    /// Returns the values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row and returns its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Conversion from a borrowed [`Value`] into a concrete Rust type.
pub trait FromValue: Sized {
    /// Converts the value, failing with a type error on mismatch.
    #[allow(clippy::result_large_err)]
    fn from_value(value: &Value) -> Result<Self>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        bool::try_from(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self> {
        i64::try_from(value.clone())
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        f64::try_from(value.clone())
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        String::try_from(value.clone())
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        Vec::<u8>::try_from(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}
