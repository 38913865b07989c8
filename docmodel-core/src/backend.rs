//! Storage client abstraction consumed by compiled models.
//!
//! The core never talks to a database directly. Everything it needs from the backing store
//! goes through the [`StoreBackend`] trait: finding records by a Mongo-style filter, inserting
//! and updating records, removing them, and creating collections and indexes. These are
//! treated as black-box asynchronous primitives; retries, pooling and transactions are the
//! implementer's concern.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage clients
//! - [`DynStoreBackend`]: Object-safe counterpart used behind `Arc<dyn DynStoreBackend>`
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmodel::backend::{FindOptions, StoreBackend};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! let inserted = backend.insert("users", doc! { "name": "Alice", "age": 30 }).await?;
//! let found = backend
//!     .find("users", doc! { "age": { "$gte": 18 } }, None, FindOptions::default())
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::{any::Any, fmt::Debug};

use crate::error::StorageResult;

/// Cursor shaping options for [`StoreBackend::find`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort specification, `{path: 1 | -1}` in priority order.
    pub sort: Option<Document>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

/// The shape of an update sent for an existing record.
///
/// `set` carries the `$set` operand; `push` carries one append-only operation per atomic
/// field, in the order the values were pushed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Document,
    pub push: Vec<(String, Vec<Bson>)>,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.push.iter().all(|(_, values)| values.is_empty())
    }
}

/// A normalized index specification.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    /// Index keys in declaration order, each mapped to `1` or `-1`.
    pub keys: Document,
    pub unique: bool,
}

impl IndexSpec {
    /// Returns the conventional index name, `field_1_other_-1`.
    pub fn name(&self) -> String {
        self.keys
            .iter()
            .map(|(key, order)| format!("{key}_{order}"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Abstract interface for storage clients.
///
/// Implementations must be thread-safe and support concurrent access from multiple async
/// tasks. Concurrent writes to the same record are dispatched independently; any ordering
/// between them is whatever the store provides.
///
/// # Error Handling
///
/// Operations return [`StorageResult<T>`](crate::error::StorageResult). Compiled models pass
/// these errors through unchanged inside [`ModelError::Storage`](crate::error::ModelError).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Finds records in `collection` matching `query`.
    ///
    /// # Arguments
    ///
    /// * `collection` - The collection to search
    /// * `query` - A Mongo-style filter document; an empty document matches everything
    /// * `projection` - Optional `{path: 0 | 1}` projection applied to returned records
    /// * `options` - Sort, limit and skip
    async fn find(
        &self,
        collection: &str,
        query: Document,
        projection: Option<Document>,
        options: FindOptions,
    ) -> StorageResult<Vec<Document>>;

    /// Inserts a new record and returns it as stored.
    ///
    /// Implementations assign an `_id` when the record does not carry one. A record that
    /// violates a unique index fails with
    /// [`StorageError::DuplicateKey`](crate::error::StorageError::DuplicateKey).
    async fn insert(&self, collection: &str, record: Document) -> StorageResult<Document>;

    /// Applies `update` to the record whose `_id` equals `id`.
    ///
    /// Pushes are applied as native atomic appends, never as a read-modify-write.
    async fn update(&self, collection: &str, id: Bson, update: Update) -> StorageResult<()>;

    /// Removes every record matching `query`, returning how many were removed.
    async fn remove(&self, collection: &str, query: Document) -> StorageResult<u64>;

    /// Ensures an index exists, returning its name.
    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> StorageResult<String>;

    /// Creates a collection. Creating an existing collection is not an error.
    async fn create_collection(&self, name: &str) -> StorageResult<()>;

    /// Drops a collection and every record it holds.
    async fn drop_collection(&self, name: &str) -> StorageResult<()>;
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn find(
        &self,
        collection: &str,
        query: Document,
        projection: Option<Document>,
        options: FindOptions,
    ) -> StorageResult<Vec<Document>> {
        (*self)
            .find(collection, query, projection, options)
            .await
    }

    async fn insert(&self, collection: &str, record: Document) -> StorageResult<Document> {
        (*self).insert(collection, record).await
    }

    async fn update(&self, collection: &str, id: Bson, update: Update) -> StorageResult<()> {
        (*self).update(collection, id, update).await
    }

    async fn remove(&self, collection: &str, query: Document) -> StorageResult<u64> {
        (*self).remove(collection, query).await
    }

    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> StorageResult<String> {
        (*self).ensure_index(collection, index).await
    }

    async fn create_collection(&self, name: &str) -> StorageResult<()> {
        (*self).create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> StorageResult<()> {
        (*self).drop_collection(name).await
    }
}

/// Object-safe form of [`StoreBackend`], implemented for every backend.
#[async_trait]
pub trait DynStoreBackend: Send + Sync + Debug {
    async fn find(
        &self,
        collection: &str,
        query: Document,
        projection: Option<Document>,
        options: FindOptions,
    ) -> StorageResult<Vec<Document>>;
    async fn insert(&self, collection: &str, record: Document) -> StorageResult<Document>;
    async fn update(&self, collection: &str, id: Bson, update: Update) -> StorageResult<()>;
    async fn remove(&self, collection: &str, query: Document) -> StorageResult<u64>;
    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> StorageResult<String>;
    async fn create_collection(&self, name: &str) -> StorageResult<()>;
    async fn drop_collection(&self, name: &str) -> StorageResult<()>;

    fn as_any(&self) -> &dyn Any;
}

#[async_trait]
impl<B: StoreBackend + Send + Sync + 'static> DynStoreBackend for B {
    async fn find(
        &self,
        collection: &str,
        query: Document,
        projection: Option<Document>,
        options: FindOptions,
    ) -> StorageResult<Vec<Document>> {
        StoreBackend::find(self, collection, query, projection, options).await
    }

    async fn insert(&self, collection: &str, record: Document) -> StorageResult<Document> {
        StoreBackend::insert(self, collection, record).await
    }

    async fn update(&self, collection: &str, id: Bson, update: Update) -> StorageResult<()> {
        StoreBackend::update(self, collection, id, update).await
    }

    async fn remove(&self, collection: &str, query: Document) -> StorageResult<u64> {
        StoreBackend::remove(self, collection, query).await
    }

    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> StorageResult<String> {
        StoreBackend::ensure_index(self, collection, index).await
    }

    async fn create_collection(&self, name: &str) -> StorageResult<()> {
        StoreBackend::create_collection(self, name).await
    }

    async fn drop_collection(&self, name: &str) -> StorageResult<()> {
        StoreBackend::drop_collection(self, name).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory trait for creating backend instances from configuration.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> StorageResult<Self::Backend>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn index_names_follow_key_order() {
        let spec = IndexSpec {
            keys: doc! { "email": 1, "created": -1 },
            unique: false,
        };

        assert_eq!(spec.name(), "email_1_created_-1");
    }

    #[test]
    fn empty_pushes_do_not_make_an_update() {
        let update = Update {
            set: Document::new(),
            push: vec![("tags".into(), Vec::new())],
        };

        assert!(update.is_empty());
    }
}
