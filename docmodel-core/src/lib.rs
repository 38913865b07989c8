//! A schema-driven mapping layer between loosely-typed stored records and declared document
//! types.
//!
//! This crate is the core of the docmodel project and provides:
//!
//! - **Field types** ([`types`]) - Coercion chains, validators, defaults and index directives
//! - **Schemas** ([`schema`]) - Declarative schema definitions and their compiled form
//! - **Registry** ([`registry`]) - Type templates and named schemas, two-phase reference resolution
//! - **Connections and models** ([`connection`], [`model`]) - Schemas compiled against a storage client
//! - **Documents** ([`document`]) - Runtime documents with partial hydration ([`hydration`])
//! - **Lifecycle pipelines** ([`hooks`]) - Serial and parallel interceptors around handlers
//! - **Query casting** ([`cast`], [`query`]) - Conditions coerced through the schema before storage
//! - **Storage client abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let mut registry = Registry::new();
//! registry.register(
//!     SchemaDefinition::new("User")
//!         .string("name").required(true)
//!         .number("age")
//!         .array("logins").atomic(true),
//! )?;
//!
//! let connection = registry
//!     .connect(InMemoryStore::new(), ConnectionOptions::default())
//!     .await?;
//! let users = connection.model("User")?;
//!
//! let mut user = users.create(doc! { "name": "Ada", "age": "36" }).await?;
//! user.save().await?;
//! ```

pub mod backend;
pub mod cast;
pub mod connection;
pub mod document;
pub mod error;
pub mod hooks;
pub mod hydration;
pub mod model;
pub mod path;
pub mod query;
pub mod registry;
pub mod schema;
pub mod types;
