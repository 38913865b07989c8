//! Convenient re-exports of commonly used docmodel types.
//!
//! ```ignore
//! use docmodel::prelude::*;
//! ```

pub use docmodel_core::{
    backend::{StoreBackend, StoreBackendBuilder, FindOptions, IndexSpec, Update},
    connection::{Connection, ConnectionOptions},
    document::{Document, Field},
    error::{
        CastError, FieldError, ModelError, ModelResult, SchemaDefinitionError, StorageError,
        StorageResult, ValidationError,
    },
    hooks::{Done, HookArgs, Next},
    model::Model,
    query::Query,
    registry::Registry,
    schema::{IndexOptions, Schema, SchemaDefinition},
    types::{Coercer, IndexDirection, ReferenceArrayStyle, TypeDefinition, Validator},
};
pub use docmodel_memory::InMemoryStore;
pub use bson::{Bson, doc};
