//! Connections: every registered schema compiled against one storage client.
//!
//! A [`Connection`] is produced by [`Registry::connect`](crate::registry::Registry::connect).
//! Binding the same registry to several backends yields independent connections whose models
//! share nothing after compilation.

use std::{collections::HashMap, fmt, sync::Arc};
use tracing::info;

use crate::{
    backend::DynStoreBackend,
    error::{ModelError, ModelResult},
    model::{Catalog, Model},
    schema::Schema,
};

/// Options applied when a registry is bound to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Ensure every declared index exists once models are compiled.
    pub ensure_indexes: bool,
    /// Create each model's collection once models are compiled.
    pub create_collections: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            ensure_indexes: true,
            create_collections: true,
        }
    }
}

impl ConnectionOptions {
    pub fn builder() -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::default()
    }
}

/// Builder for [`ConnectionOptions`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionOptionsBuilder {
    options: ConnectionOptions,
}

impl ConnectionOptionsBuilder {
    pub fn ensure_indexes(mut self, ensure: bool) -> Self {
        self.options.ensure_indexes = ensure;
        self
    }

    pub fn create_collections(mut self, create: bool) -> Self {
        self.options.create_collections = create;
        self
    }

    pub fn build(self) -> ConnectionOptions {
        self.options
    }
}

struct ConnectionInner {
    backend: Arc<dyn DynStoreBackend>,
    models: HashMap<String, Model>,
}

impl ConnectionInner {
    fn model(&self, name: &str) -> ModelResult<Model> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownModel(name.to_string()))
    }
}

/// Models compiled against one backend.
#[derive(Clone)]
pub struct Connection(Arc<ConnectionInner>);

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("backend", &self.0.backend)
            .field("models", &self.0.models.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Connection {
    pub(crate) async fn open(
        schemas: Vec<Arc<Schema>>,
        backend: Arc<dyn DynStoreBackend>,
        options: ConnectionOptions,
    ) -> ModelResult<Self> {
        let catalog: Catalog = Arc::new(
            schemas
                .into_iter()
                .map(|schema| (schema.name().to_string(), schema))
                .collect(),
        );
        let models = catalog
            .iter()
            .map(|(name, schema)| {
                (
                    name.clone(),
                    Model::new(schema.clone(), backend.clone(), catalog.clone()),
                )
            })
            .collect();
        let connection = Self(Arc::new(ConnectionInner { backend, models }));

        for model in connection.models() {
            if options.create_collections {
                model.create_collection().await?;
            }
            if options.ensure_indexes {
                model.ensure_indexes().await?;
            }
        }

        info!(
            target: "docmodel::connection",
            models = connection.0.models.len(),
            "connection opened"
        );
        Ok(connection)
    }

    /// Returns the model compiled for the schema registered as `name`.
    pub fn model(&self, name: &str) -> ModelResult<Model> {
        self.0.model(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.0.models.values()
    }

    pub fn backend(&self) -> &Arc<dyn DynStoreBackend> {
        &self.0.backend
    }

    /// Drops every model's collection.
    pub async fn drop_collections(&self) -> ModelResult<()> {
        for model in self.models() {
            self.0.backend.drop_collection(model.collection()).await?;
        }
        Ok(())
    }

    /// Releases this handle. The storage client is released once every model and document
    /// compiled from this connection is gone.
    pub fn close(self) {
        info!(
            target: "docmodel::connection",
            handles = Arc::strong_count(&self.0),
            "connection closed"
        );
    }
}
