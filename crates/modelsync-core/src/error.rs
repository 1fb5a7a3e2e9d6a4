//! Error types shared across the modelsync crates.
//!
//! Every fallible operation in the workspace returns [`Result<T>`], with
//! [`Error`] as the single error enum. Variants carry structured payloads so
//! callers can react to *what* failed (an unsatisfied schema change, a bad
//! prefetch request, a storage constraint) without parsing message strings.

use std::fmt;

/// Top-level error type for all modelsync operations.
#[derive(Debug)]
pub enum Error {
    /// Schema synchronization found model changes that no hint accounts for.
    Synchronization(SynchronizationError),
    /// A prefetch request named a field the requested type cannot reach.
    FieldRequest(FieldRequestError),
    /// An argument failed validation before any work started.
    Argument(ArgumentError),
    /// The model registry rejected a type or field definition.
    Model(ModelError),
    /// The storage backend failed to execute a fetch, write, or DDL step.
    Storage(StorageError),
    /// A persisted model snapshot could not be read or written.
    Snapshot(SnapshotError),
    /// A value could not be converted to the requested Rust type.
    Type(TypeError),
    /// Catch-all for errors raised by user callbacks or extensions.
    Custom(String),
}

/// Error details for a failed schema synchronization.
///
/// Raised when the comparer finds differences between the expected and the
/// actual schema that would lose data and that no upgrade hint resolves.
/// `offenders` lists every unaccounted difference so a single run reports
/// the full set instead of stopping at the first one.
#[derive(Debug, Clone)]
pub struct SynchronizationError {
    /// Human-readable summary of the failure.
    pub message: String,
    /// One entry per unaccounted schema difference, e.g.
    /// `"column person.age exists in storage but not in the model"`.
    pub offenders: Vec<String>,
}

impl SynchronizationError {
    /// Creates a synchronization error with no recorded offenders.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offenders: Vec::new(),
        }
    }

    /// Attaches the list of unaccounted differences.
    #[must_use]
    pub fn with_offenders(mut self, offenders: Vec<String>) -> Self {
        self.offenders = offenders;
        self
    }
}

/// Error details for an invalid prefetch field request.
#[derive(Debug, Clone)]
pub struct FieldRequestError {
    /// The field that was requested.
    pub field: String,
    /// The type the request was made against, if one was given.
    pub requested_type: Option<String>,
    /// What went wrong.
    pub message: String,
}

/// Error details for an invalid argument.
#[derive(Debug, Clone)]
pub struct ArgumentError {
    /// Name of the offending argument.
    pub argument: &'static str,
    /// What was wrong with it.
    pub message: String,
}

/// Error details for a model definition the registry rejected.
#[derive(Debug, Clone)]
pub struct ModelError {
    /// The category of definition problem.
    pub kind: ModelErrorKind,
    /// The type the problem was found on, when attributable.
    pub type_name: Option<String>,
    /// Description of the problem.
    pub message: String,
}

/// Categories of model definition problems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// A referenced type is not registered.
    UnknownType,
    /// A type names a parent that is not registered.
    UnknownParent,
    /// Parent links form a cycle.
    HierarchyCycle,
    /// Two types with the same full name were registered.
    DuplicateType,
    /// A field name repeats along an inheritance chain.
    DuplicateField,
    /// A type or field name is not a valid identifier.
    InvalidIdentifier,
    /// A root type does not declare its hierarchy mapping.
    MissingHierarchy,
    /// A non-root type declares its own hierarchy mapping.
    ConflictingHierarchy,
    /// A reference or entity-set field points at an unusable target.
    UnresolvedReference,
    /// Two model elements map onto the same storage column.
    ColumnCollision,
}

impl ModelErrorKind {
    /// Short lowercase label used in log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            ModelErrorKind::UnknownType => "unknown type",
            ModelErrorKind::UnknownParent => "unknown parent",
            ModelErrorKind::HierarchyCycle => "hierarchy cycle",
            ModelErrorKind::DuplicateType => "duplicate type",
            ModelErrorKind::DuplicateField => "duplicate field",
            ModelErrorKind::InvalidIdentifier => "invalid identifier",
            ModelErrorKind::MissingHierarchy => "missing hierarchy",
            ModelErrorKind::ConflictingHierarchy => "conflicting hierarchy",
            ModelErrorKind::UnresolvedReference => "unresolved reference",
            ModelErrorKind::ColumnCollision => "column collision",
        }
    }
}

/// Error details for a failed storage operation.
#[derive(Debug, Clone)]
pub struct StorageError {
    /// The category of storage failure.
    pub kind: StorageErrorKind,
    /// Description of the failure.
    pub message: String,
}

/// Categories of storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// The named table does not exist.
    TableNotFound,
    /// The named column does not exist in its table.
    ColumnNotFound,
    /// A DDL step tried to create something that already exists.
    AlreadyExists,
    /// A write put `NULL` into a non-nullable column.
    NullViolation,
    /// A write put a value of the wrong type into a column.
    TypeViolation,
    /// A uniqueness or foreign-key constraint was violated.
    Constraint,
    /// The transaction was already committed or rolled back.
    TransactionClosed,
    /// The backend failed for a reason outside the categories above.
    Other,
}

impl StorageErrorKind {
    /// Short lowercase label used in log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            StorageErrorKind::TableNotFound => "table not found",
            StorageErrorKind::ColumnNotFound => "column not found",
            StorageErrorKind::AlreadyExists => "already exists",
            StorageErrorKind::NullViolation => "null violation",
            StorageErrorKind::TypeViolation => "type violation",
            StorageErrorKind::Constraint => "constraint",
            StorageErrorKind::TransactionClosed => "transaction closed",
            StorageErrorKind::Other => "other",
        }
    }
}

/// Error details for a model snapshot that could not be used.
#[derive(Debug, Clone)]
pub struct SnapshotError {
    /// What went wrong while reading or writing the snapshot.
    pub message: String,
}

/// Error details for a failed value conversion.
#[derive(Debug, Clone)]
pub struct TypeError {
    /// The Rust type or value type the caller asked for.
    pub expected: &'static str,
    /// Description of the value that was actually present.
    pub actual: String,
    /// The column the value came from, when known.
    pub column: Option<String>,
}

impl Error {
    /// Creates a synchronization error listing the unaccounted differences.
    pub fn synchronization(message: impl Into<String>, offenders: Vec<String>) -> Self {
        Error::Synchronization(SynchronizationError {
            message: message.into(),
            offenders,
        })
    }

    /// Creates a field request error for a request made against `requested_type`.
    pub fn field_request(
        field: impl Into<String>,
        requested_type: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::FieldRequest(FieldRequestError {
            field: field.into(),
            requested_type,
            message: message.into(),
        })
    }

    /// Creates an argument error for the named argument.
    pub fn argument(argument: &'static str, message: impl Into<String>) -> Self {
        Error::Argument(ArgumentError {
            argument,
            message: message.into(),
        })
    }

    /// Creates a model definition error attributed to `type_name`.
    pub fn model(
        kind: ModelErrorKind,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Model(ModelError {
            kind,
            type_name: Some(type_name.into()),
            message: message.into(),
        })
    }

    /// Creates a storage error of the given kind.
    pub fn storage(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Error::Storage(StorageError {
            kind,
            message: message.into(),
        })
    }

    /// Creates a snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Error::Snapshot(SnapshotError {
            message: message.into(),
        })
    }

    /// Returns `true` if this is a synchronization failure.
    pub const fn is_synchronization(&self) -> bool {
        matches!(self, Error::Synchronization(_))
    }

    /// Returns the unaccounted schema differences, if this is a
    /// synchronization failure.
    pub fn offenders(&self) -> Option<&[String]> {
        match self {
            Error::Synchronization(e) => Some(&e.offenders),
            _ => None,
        }
    }

    /// Returns the storage failure category, if this is a storage error.
    pub fn storage_kind(&self) -> Option<StorageErrorKind> {
        match self {
            Error::Storage(e) => Some(e.kind),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Synchronization(e) => {
                write!(f, "Synchronization error: {}", e.message)?;
                if !e.offenders.is_empty() {
                    write!(f, " ({} unaccounted difference(s))", e.offenders.len())?;
                }
                Ok(())
            }
            Error::FieldRequest(e) => match &e.requested_type {
                Some(ty) => write!(
                    f,
                    "Field request error: field '{}' on type '{}': {}",
                    e.field, ty, e.message
                ),
                None => write!(f, "Field request error: field '{}': {}", e.field, e.message),
            },
            Error::Argument(e) => {
                write!(f, "Argument error: '{}': {}", e.argument, e.message)
            }
            Error::Model(e) => match &e.type_name {
                Some(ty) => write!(
                    f,
                    "Model error ({}) on type '{}': {}",
                    e.kind.as_str(),
                    ty,
                    e.message
                ),
                None => write!(f, "Model error ({}): {}", e.kind.as_str(), e.message),
            },
            Error::Storage(e) => {
                write!(f, "Storage error ({}): {}", e.kind.as_str(), e.message)
            }
            Error::Snapshot(e) => write!(f, "Snapshot error: {}", e.message),
            Error::Type(e) => {
                write!(f, "Type error: expected {}, got {}", e.expected, e.actual)?;
                if let Some(column) = &e.column {
                    write!(f, " (column '{column}')")?;
                }
                Ok(())
            }
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<SynchronizationError> for Error {
    fn from(e: SynchronizationError) -> Self {
        Error::Synchronization(e)
    }
}

impl From<FieldRequestError> for Error {
    fn from(e: FieldRequestError) -> Self {
        Error::FieldRequest(e)
    }
}

impl From<ArgumentError> for Error {
    fn from(e: ArgumentError) -> Self {
        Error::Argument(e)
    }
}

impl From<ModelError> for Error {
    fn from(e: ModelError) -> Self {
        Error::Model(e)
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::Storage(e)
    }
}

impl From<SnapshotError> for Error {
    fn from(e: SnapshotError) -> Self {
        Error::Snapshot(e)
    }
}

impl From<TypeError> for Error {
    fn from(e: TypeError) -> Self {
        Error::Type(e)
    }
}

/// Convenience alias used across the modelsync crates.
pub type Result<T> = std::result::Result<T, Error>;
