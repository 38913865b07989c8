//! In-memory storage client for docmodel.
//!
//! This crate provides a thread-safe implementation of the `StoreBackend` trait that keeps
//! every collection in process memory. It evaluates the Mongo-style filters, projections and
//! sort specifications that compiled models emit, enforces unique indexes and applies
//! `$set`/`$push` updates, which makes it suitable for tests and development.
//!
//! # Quick Start
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let mut registry = Registry::new();
//! registry.register(SchemaDefinition::new("User").string("name"))?;
//!
//! let backend = InMemoryStore::builder().build().await?;
//! let connection = registry.connect(backend, ConnectionOptions::default()).await?;
//! ```

pub mod evaluator;
pub mod store;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
