//! MongoDB storage client for docmodel.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters,
//! projections, sorting and updates produced by compiled models are passed to the server
//! unchanged, so pending array pushes are applied with the server's native `$push`.
//!
//! To use this backend, enable the `mongodb` feature:
//!
//! ```toml
//! [dependencies]
//! docmodel = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{prelude::*, backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! let backend = MongoDbStore::builder("mongodb://localhost:27017", "kennel")
//!     .build()
//!     .await?;
//! let connection = registry.connect(backend, ConnectionOptions::default()).await?;
//! ```

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
