//! Error types and result types for schema definition, casting, validation and storage.
//!
//! Errors fall into four families:
//!
//! - [`CastError`] - a value could not be coerced to a field's declared type
//! - [`ValidationError`] - a named validator (or the required check) rejected a value
//! - [`SchemaDefinitionError`] - structural misconfiguration, raised synchronously at definition time
//! - [`StorageError`] - opaque pass-through from the storage client
//!
//! [`ModelError`] wraps all of them and is what document and model operations return.

use bson::Bson;
use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use std::fmt;
use thiserror::Error;

/// A value could not be coerced into a field's declared type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("failed to cast {path} value of {value} to {target_type}")]
pub struct CastError {
    /// The dotted path of the field being cast.
    pub path: String,
    /// The raw value as it was before the failing coercion.
    pub value: Bson,
    /// The name of the type the value was being cast to.
    pub target_type: String,
}

impl CastError {
    pub fn new(path: impl Into<String>, value: Bson, target_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value,
            target_type: target_type.into(),
        }
    }
}

/// A named validator rejected the value stored at `path`.
///
/// The builtin required check reports itself under the validator name `required`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("validator {validator} failed for {path}")]
pub struct ValidationError {
    pub validator: String,
    pub path: String,
}

impl ValidationError {
    pub fn new(validator: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            validator: validator.into(),
            path: path.into(),
        }
    }
}

/// A single per-field failure collected while preparing a document for save.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FieldError {
    #[error(transparent)]
    Cast(#[from] CastError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl FieldError {
    /// Returns the dotted path the failure refers to.
    pub fn path(&self) -> &str {
        match self {
            FieldError::Cast(err) => &err.path,
            FieldError::Validation(err) => &err.path,
        }
    }
}

/// Structural errors in a schema or type declaration.
///
/// These are raised at definition or registration time so misconfiguration is caught at
/// startup rather than at first use.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaDefinitionError {
    /// An index direction was not one of `asc`, `desc`, `1` or `-1`.
    #[error("invalid index spec for {0}: the order must be either 'asc', 'desc', -1 or 1")]
    InvalidIndexSpec(String),
    /// A model name collides with a reserved name or an already registered model.
    #[error("name conflict \"{0}\": please choose a different model name")]
    NameConflict(String),
    /// A field was declared with a type name the registry does not know.
    #[error("unknown type {type_name} for field {path}")]
    UnknownType { path: String, type_name: String },
    /// A reference field names a model that was never registered.
    #[error("reference {path} points at unregistered model {target}")]
    UnresolvedReference { path: String, target: String },
    /// A type-level modifier was applied before any field was declared.
    #[error("{0} called before any field was declared")]
    NoCurrentField(String),
    /// A type definition is itself malformed (for example extending an unknown type).
    #[error("invalid type {0}: {1}")]
    InvalidType(String, String),
}

/// Errors surfaced by the storage client.
///
/// The core treats these as opaque and passes them through unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// A write violated a unique index.
    #[error("Duplicate key in collection {0}: {1}")]
    DuplicateKey(String, String),
    /// The document addressed by an update was not found.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// Serialization/deserialization error when converting between record formats.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for storage client operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Every failure a model or document operation can report.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    /// Query casting failed on a single leaf.
    #[error(transparent)]
    Cast(#[from] CastError),
    /// Casting or validation failed while preparing a save; all failures are collected.
    #[error("document failed validation: {}", FieldErrors(.0))]
    Invalid(Vec<FieldError>),
    #[error(transparent)]
    SchemaDefinition(#[from] SchemaDefinitionError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A declared path was read before it was hydrated.
    #[error("path {0} is not hydrated")]
    NotHydrated(String),
    /// The path is not declared by the document's schema.
    #[error("path {0} is not declared by the schema")]
    UnknownPath(String),
    /// No model is registered under the given name on this connection.
    #[error("no model named {0}")]
    UnknownModel(String),
    /// No handler or method is registered under the given name.
    #[error("no method named {0}")]
    UnknownMethod(String),
    /// An interceptor or handler failed, or dropped its continuation without signalling.
    #[error("hook error: {0}")]
    Hook(String),
    /// Serialization/deserialization error when converting documents to other formats.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ModelError {
    /// Returns the collected field errors of a failed save, if that is what this is.
    pub fn field_errors(&self) -> Option<&[FieldError]> {
        match self {
            ModelError::Invalid(errors) => Some(errors),
            _ => None,
        }
    }
}

/// A specialized `Result` type for model and document operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl From<BsonError> for ModelError {
    fn from(err: BsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for ModelError {
    fn from(err: SerdeJsonError) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<BsonError> for StorageError {
    fn from(err: BsonError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

struct FieldErrors<'a>(&'a [FieldError]);

impl fmt::Display for FieldErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}
