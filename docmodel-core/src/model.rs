//! Compiled models: a schema bound to one connection's storage client.
//!
//! A [`Model`] is the document constructor. It creates new documents from initial values,
//! hydrates documents from stored records, and issues queries whose conditions are cast
//! through the schema before they reach the storage client.
//!
//! Models are cheap to clone and shared across tasks.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let users = connection.model("User")?;
//!
//! let mut ada = users.create(doc! { "name": "Ada", "age": "36" }).await?;
//! ada.save().await?;
//!
//! let adults = users
//!     .find(doc! { "age": { "$gte": "18" } })
//!     .fields(doc! { "name": 1 })
//!     .all()
//!     .await?;
//! ```

use bson::{Bson, Document as Record, doc, ser::serialize_to_bson};
use serde::Serialize;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::{debug, info};

use crate::{
    backend::{DynStoreBackend, IndexSpec},
    cast::cast_query,
    document::Document,
    error::{ModelError, ModelResult},
    hooks::HookArgs,
    query::Query,
    schema::Schema,
    types::ReferenceTarget,
};

/// Every schema compiled for one connection, keyed by model name.
pub(crate) type Catalog = Arc<HashMap<String, Arc<Schema>>>;

struct ModelInner {
    schema: Arc<Schema>,
    backend: Arc<dyn DynStoreBackend>,
    catalog: Catalog,
}

/// A schema compiled against one connection.
#[derive(Clone)]
pub struct Model(Arc<ModelInner>);

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("collection", &self.collection())
            .finish()
    }
}

impl Model {
    pub(crate) fn new(
        schema: Arc<Schema>,
        backend: Arc<dyn DynStoreBackend>,
        catalog: Catalog,
    ) -> Self {
        Self(Arc::new(ModelInner {
            schema,
            backend,
            catalog,
        }))
    }

    pub fn name(&self) -> &str {
        self.0.schema.name()
    }

    pub fn collection(&self) -> &str {
        self.0.schema.collection()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.0.schema
    }

    pub(crate) fn backend(&self) -> &Arc<dyn DynStoreBackend> {
        &self.0.backend
    }

    /// Index specifications in declaration order.
    pub fn indexes(&self) -> &[IndexSpec] {
        self.0.schema.indexes()
    }

    /// Creates a new, unsaved document through the `init` pipeline.
    ///
    /// Declared defaults are applied first, then `values`.
    pub async fn create(&self, values: Record) -> ModelResult<Document> {
        let mut doc = Document::new(self.clone(), self.0.schema.clone());
        doc.run("init", HookArgs::Values(values)).await?;
        Ok(doc)
    }

    /// Creates a new, unsaved document from any serializable value.
    pub async fn create_from<T: Serialize>(&self, value: &T) -> ModelResult<Document> {
        match serialize_to_bson(value)? {
            Bson::Document(values) => self.create(values).await,
            other => Err(ModelError::Serialization(format!(
                "expected a document, got {:?}",
                other.element_type()
            ))),
        }
    }

    /// Builds a document from a stored record through the `hydrate` pipeline.
    ///
    /// With a projection, only the projected paths are marked hydrated.
    pub async fn hydrate(&self, record: Record, projection: Option<Record>) -> ModelResult<Document> {
        let mut doc = Document::stored(self.clone(), self.0.schema.clone());
        doc.run("hydrate", HookArgs::Record { record, projection })
            .await?;
        Ok(doc)
    }

    /// Starts a query with `conditions`.
    pub fn find(&self, conditions: Record) -> Query {
        Query::new(self.clone(), conditions)
    }

    /// Starts a query with `conditions` and a field projection.
    pub fn find_with_fields(&self, conditions: Record, fields: Record) -> Query {
        Query::new(self.clone(), conditions).fields(fields)
    }

    /// Starts a query matching `key` equal to `value`.
    pub fn where_eq(&self, key: &str, value: impl Into<Bson>) -> Query {
        Query::new(self.clone(), Record::new()).where_eq(key, value)
    }

    pub async fn find_by_id(&self, id: impl Into<Bson>) -> ModelResult<Option<Document>> {
        self.find(doc! { "_id": id.into() }).one().await
    }

    /// Removes every stored document matching `conditions`.
    ///
    /// Conditions are cast like query conditions. Returns the number of removed documents.
    pub async fn remove(&self, conditions: Record) -> ModelResult<u64> {
        let mut conditions = conditions;
        cast_query(&self.0.schema, &mut conditions)?;
        debug!(
            target: "docmodel::query",
            collection = self.collection(),
            conditions = %conditions,
            "removing"
        );
        Ok(self
            .0
            .backend
            .remove(self.collection(), conditions)
            .await?)
    }

    /// Calls a static function declared with `SchemaDefinition::static_fn`.
    pub async fn call_static(&self, name: &str, args: Vec<Bson>) -> ModelResult<Bson> {
        let f = self
            .0
            .schema
            .static_fn(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownMethod(name.to_string()))?;
        f(self, args).await
    }

    /// Returns another model compiled on the same connection.
    ///
    /// Works after the [`Connection`](crate::connection::Connection) handle itself is gone.
    pub fn model(&self, name: &str) -> ModelResult<Model> {
        let schema = self
            .0
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))?;
        Ok(Model::new(schema, self.0.backend.clone(), self.0.catalog.clone()))
    }

    pub(crate) fn sibling_for(&self, target: &ReferenceTarget, path: &str) -> ModelResult<Model> {
        let resolved = target.get().ok_or_else(|| {
            ModelError::SchemaDefinition(crate::error::SchemaDefinitionError::UnresolvedReference {
                path: path.to_string(),
                target: target.name().to_string(),
            })
        })?;
        self.model(&resolved.model)
    }

    /// Creates the collection.
    pub async fn create_collection(&self) -> ModelResult<()> {
        Ok(self.0.backend.create_collection(self.collection()).await?)
    }

    /// Ensures every declared index exists, returning the index names.
    pub async fn ensure_indexes(&self) -> ModelResult<Vec<String>> {
        let mut names = Vec::with_capacity(self.indexes().len());
        for spec in self.indexes() {
            let name = self
                .0
                .backend
                .ensure_index(self.collection(), spec.clone())
                .await?;
            info!(
                target: "docmodel::connection",
                collection = self.collection(),
                index = %name,
                unique = spec.unique,
                "index ensured"
            );
            names.push(name);
        }
        Ok(names)
    }
}
