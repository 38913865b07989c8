//! The registry of type templates and named schemas.
//!
//! Registration happens in two phases. [`Registry::register`] compiles a schema on the spot,
//! so structural mistakes (unknown types, bad modifiers, name conflicts) surface at startup.
//! [`Registry::connect`] then compiles every schema against a backend and resolves reference
//! targets by name, which lets schemas reference each other regardless of registration order.
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let mut registry = Registry::new();
//! registry
//!     .define_type(TypeDefinition::new("email").extend("string"))?
//!     .register(SchemaDefinition::new("Owner").field("email", "email"))?
//!     .register(SchemaDefinition::new("Dog").reference("owner", "Owner"))?;
//!
//! let connection = registry
//!     .connect(InMemoryStore::new(), ConnectionOptions::default())
//!     .await?;
//! ```

use std::{collections::HashMap, sync::Arc};
use tracing::debug;

use crate::{
    backend::{DynStoreBackend, StoreBackend},
    connection::{Connection, ConnectionOptions},
    error::{ModelResult, SchemaDefinitionError},
    schema::{Schema, SchemaDefinition},
    types::{ResolvedTarget, TypeDefinition, builtin_types, resolve_parent},
};

const RESERVED_NAMES: &[&str] = &["model", "connection", "registry", "close"];

/// Type templates and named schemas of one application.
#[derive(Debug, Clone)]
pub struct Registry {
    types: HashMap<String, TypeDefinition>,
    schemas: Vec<SchemaDefinition>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates a registry holding the builtin types.
    pub fn new() -> Self {
        Self {
            types: builtin_types()
                .into_iter()
                .map(|def| (def.type_name().to_string(), def))
                .collect(),
            schemas: Vec::new(),
        }
    }

    /// Registers a custom type template.
    ///
    /// # Errors
    ///
    /// Fails with [`SchemaDefinitionError::NameConflict`] if the name is taken, or
    /// [`SchemaDefinitionError::InvalidType`] if it extends an unknown type.
    pub fn define_type(
        &mut self,
        mut def: TypeDefinition,
    ) -> Result<&mut Self, SchemaDefinitionError> {
        if self.types.contains_key(def.type_name()) {
            return Err(SchemaDefinitionError::NameConflict(def.type_name().to_string()));
        }
        resolve_parent(&mut def, |name| self.types.get(name).cloned())?;
        debug!(target: "docmodel::schema", type_name = def.type_name(), "type defined");
        self.types.insert(def.type_name().to_string(), def);
        Ok(self)
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    /// Registers a named schema, compiling it to surface definition errors immediately.
    ///
    /// # Errors
    ///
    /// Fails with [`SchemaDefinitionError::NameConflict`] for reserved or duplicate names and
    /// with any error raised while compiling the definition.
    pub fn register(
        &mut self,
        schema: SchemaDefinition,
    ) -> Result<&mut Self, SchemaDefinitionError> {
        let name = schema
            .name()
            .ok_or_else(|| {
                SchemaDefinitionError::InvalidType(
                    "<embedded>".into(),
                    "only named schemas can be registered".into(),
                )
            })?
            .to_string();

        let reserved = RESERVED_NAMES.contains(&name.to_lowercase().as_str());
        if reserved || self.schema(&name).is_some() {
            return Err(SchemaDefinitionError::NameConflict(name));
        }

        self.compile(&schema)?;
        debug!(target: "docmodel::schema", model = %name, "schema registered");
        self.schemas.push(schema);
        Ok(self)
    }

    pub fn schema(&self, name: &str) -> Option<&SchemaDefinition> {
        self.schemas.iter().find(|s| s.name() == Some(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.iter().filter_map(|s| s.name())
    }

    fn compile(&self, schema: &SchemaDefinition) -> Result<Schema, SchemaDefinitionError> {
        schema.compile(&|name: &str| self.types.get(name).cloned())
    }

    /// Compiles every registered schema and resolves reference targets.
    pub(crate) fn compile_all(&self) -> Result<Vec<Arc<Schema>>, SchemaDefinitionError> {
        let compiled = self
            .schemas
            .iter()
            .map(|s| self.compile(s).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        for schema in &compiled {
            for (path, target) in schema.references() {
                target
                    .resolve_with(|name| {
                        compiled
                            .iter()
                            .find(|candidate| candidate.name() == name)
                            .map(|candidate| ResolvedTarget {
                                model: name.to_string(),
                                collection: candidate.collection().to_string(),
                            })
                    })
                    .ok_or_else(|| SchemaDefinitionError::UnresolvedReference {
                        path: path.clone(),
                        target: target.name().to_string(),
                    })?;
            }
        }

        Ok(compiled)
    }

    /// Compiles every schema against `backend` and returns the bound connection.
    pub async fn connect<B>(&self, backend: B, options: ConnectionOptions) -> ModelResult<Connection>
    where
        B: StoreBackend + 'static,
    {
        self.connect_dyn(Arc::new(backend), options).await
    }

    /// Like [`connect`](Registry::connect), for a backend already behind dynamic dispatch.
    pub async fn connect_dyn(
        &self,
        backend: Arc<dyn DynStoreBackend>,
        options: ConnectionOptions,
    ) -> ModelResult<Connection> {
        let schemas = self.compile_all()?;
        Connection::open(schemas, backend, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coercer, ReferenceArrayStyle};
    use bson::Bson;

    #[test]
    fn reserved_and_duplicate_names_conflict() {
        let mut registry = Registry::new();
        registry.register(SchemaDefinition::new("Dog")).unwrap();

        assert_eq!(
            registry.register(SchemaDefinition::new("Dog")).unwrap_err(),
            SchemaDefinitionError::NameConflict("Dog".into())
        );
        for reserved in ["model", "Connection", "registry", "close"] {
            assert_eq!(
                registry.register(SchemaDefinition::new(reserved)).unwrap_err(),
                SchemaDefinitionError::NameConflict(reserved.into())
            );
        }
    }

    #[test]
    fn custom_types_extend_registered_ones() {
        let mut registry = Registry::new();
        registry
            .define_type(TypeDefinition::new("email").extend("string").set(Coercer::map(
                |value| match value {
                    Bson::String(s) => Bson::String(s.to_lowercase()),
                    other => other,
                },
            )))
            .unwrap();

        let def = registry.type_definition("email").unwrap();
        assert_eq!(def.cast("email", Bson::from("A@B.C")).unwrap(), Bson::from("a@b.c"));

        assert_eq!(
            registry.define_type(TypeDefinition::new("email")).unwrap_err(),
            SchemaDefinitionError::NameConflict("email".into())
        );
    }

    #[test]
    fn references_resolve_regardless_of_order() {
        let mut registry = Registry::new();
        registry
            .register(
                SchemaDefinition::new("Dog")
                    .reference("owner", "Owner")
                    .reference_array("friends", "Dog", ReferenceArrayStyle::Inline),
            )
            .unwrap()
            .register(SchemaDefinition::new("Owner").collection("people"))
            .unwrap();

        let compiled = registry.compile_all().unwrap();
        let dog = compiled.iter().find(|s| s.name() == "Dog").unwrap();
        let owner = dog.path("owner").and_then(|d| d.reference_target()).unwrap();

        assert_eq!(owner.get().map(|t| t.collection.as_str()), Some("people"));
    }

    #[test]
    fn each_registry_resolves_its_own_targets() {
        let dog = SchemaDefinition::new("Dog").reference("owner", "Owner");
        let resolved_collection = |collection: &str| {
            let mut registry = Registry::new();
            registry
                .register(dog.clone())
                .unwrap()
                .register(SchemaDefinition::new("Owner").collection(collection))
                .unwrap();
            let compiled = registry.compile_all().unwrap();
            let dog = compiled.iter().find(|s| s.name() == "Dog").unwrap();
            dog.path("owner")
                .and_then(|d| d.reference_target())
                .and_then(|t| t.get())
                .map(|t| t.collection.clone())
        };

        assert_eq!(resolved_collection("people").as_deref(), Some("people"));
        assert_eq!(resolved_collection("humans").as_deref(), Some("humans"));
    }

    #[test]
    fn unresolved_references_are_fatal() {
        let mut registry = Registry::new();
        registry
            .register(SchemaDefinition::new("Dog").reference("owner", "Ghost"))
            .unwrap();

        assert_eq!(
            registry.compile_all().unwrap_err(),
            SchemaDefinitionError::UnresolvedReference {
                path: "owner".into(),
                target: "Ghost".into()
            }
        );
    }
}
