//! Schema-driven document models over loosely-typed stored records.
//!
//! This crate is the primary entry point of docmodel. It re-exports the core types from
//! `docmodel-core` and the storage clients from the backend crates.
//!
//! # Features
//!
//! - **Declared field types** - Coercion chains, validators, defaults and inheritance
//! - **Partial hydration** - Documents loaded with a projection know which paths they hold
//! - **Lifecycle pipelines** - Serial and parallel pre hooks, post hooks and handler overrides
//! - **Query casting** - Conditions are coerced through the schema before reaching storage
//! - **Atomic appends** - Array pushes that persist as native `$push` operations
//! - **Multiple backends** - In-memory and MongoDB storage clients behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = Registry::new();
//!     registry
//!         .register(
//!             SchemaDefinition::new("Owner")
//!                 .string("name").required(true)
//!                 .string("email").index(IndexDirection::Asc),
//!         )?
//!         .register(
//!             SchemaDefinition::new("Dog")
//!                 .string("name")
//!                 .number("age")
//!                 .reference("owner", "Owner")
//!                 .array("tricks").atomic(true)
//!                 .pre("save", |doc, next| {
//!                     doc.set("name", "Rex");
//!                     Box::pin(async move { next.proceed() })
//!                 }),
//!         )?;
//!
//!     let connection = registry
//!         .connect(InMemoryStore::new(), ConnectionOptions::default())
//!         .await?;
//!
//!     let owners = connection.model("Owner")?;
//!     let mut ada = owners.create(doc! { "name": "Ada" }).await?;
//!     ada.save().await?;
//!
//!     let dogs = connection.model("Dog")?;
//!     let mut dog = dogs
//!         .create(doc! { "age": "4", "owner": ada.id().cloned().unwrap_or(Bson::Null) })
//!         .await?;
//!     dog.save().await?;
//!
//!     dog.push("tricks", "sit")?;
//!     dog.save().await?;
//!
//!     let found = dogs.find(doc! { "age": { "$gte": "3" } }).exec().await?;
//!     println!("{:?}", found.first().map(|d| d.to_json()));
//!
//!     connection.close();
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB storage (requires the `mongodb` feature)

pub mod prelude;

pub use docmodel_core::{
    backend, cast, connection, document, error, hooks, hydration, model, path, query, registry,
    schema, types,
};

pub use bson;

/// In-memory storage client.
pub mod memory {
    pub use docmodel_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage client.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmodel_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
