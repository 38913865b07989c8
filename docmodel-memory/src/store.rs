//! In-memory storage client.
//!
//! Records live in per-collection vectors behind an async-aware read-write lock, in insertion
//! order. Filters, projections and sorting are evaluated by [`crate::evaluator`]. Unique
//! indexes are enforced on insert and update; non-unique indexes are only remembered.

use std::{collections::HashMap, sync::Arc};
use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use tracing::{debug, trace};

use docmodel_core::{
    backend::{FindOptions, IndexSpec, StoreBackend, StoreBackendBuilder, Update},
    error::{StorageError, StorageResult},
    path,
};

use crate::evaluator::{self, Comparable};

#[derive(Debug, Default)]
struct Collection {
    records: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    /// Returns the name of the first unique index `candidate` collides on, ignoring the record
    /// at `skip`.
    fn duplicate_of(&self, candidate: &Document, skip: Option<usize>) -> Option<String> {
        self.indexes
            .iter()
            .filter(|index| index.unique)
            .find(|index| {
                let key = index_key(candidate, index);
                self.records
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| Some(*i) != skip)
                    .any(|(_, existing)| index_key(existing, index) == key)
            })
            .map(IndexSpec::name)
    }
}

fn index_key(record: &Document, index: &IndexSpec) -> Vec<Bson> {
    index
        .keys
        .keys()
        .map(|key| path::get(record, key).cloned().unwrap_or(Bson::Null))
        .collect()
}

fn same_id(record: &Document, id: &Bson) -> bool {
    record
        .get("_id")
        .is_some_and(|existing| Comparable::from(existing) == Comparable::from(id))
}

fn apply_update(record: &mut Document, update: Update) -> StorageResult<()> {
    for (key, value) in update.set {
        if !path::set(record, &key, value) {
            return Err(StorageError::Backend(format!(
                "cannot write {key} through an array"
            )));
        }
    }

    for (key, values) in update.push {
        match path::get_mut(record, &key) {
            Some(Bson::Array(items)) => items.extend(values),
            Some(other) => {
                return Err(StorageError::Backend(format!(
                    "cannot push onto non-array value {other} at {key}"
                )));
            }
            None => {
                path::set(record, &key, Bson::Array(values));
            }
        }
    }

    Ok(())
}

/// Thread-safe in-memory storage client.
///
/// Clones share the same underlying collections.
///
/// # Example
///
/// ```ignore
/// use docmodel::memory::InMemoryStore;
/// use docmodel::backend::{FindOptions, StoreBackend};
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let stored = store.insert("users", doc! { "name": "Alice" }).await?;
/// assert!(stored.contains_key("_id"));
///
/// let found = store
///     .find("users", doc! { "name": "Alice" }, None, FindOptions::default())
///     .await?;
/// assert_eq!(found.len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Returns the names of every collection currently held.
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names = self.collections.read().await.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Returns the indexes known for `collection`.
    pub async fn indexes(&self, collection: &str) -> Vec<IndexSpec> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find(
        &self,
        collection: &str,
        query: Document,
        projection: Option<Document>,
        options: FindOptions,
    ) -> StorageResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(records) = collections.get(collection).map(|c| &c.records) else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for record in records {
            if evaluator::matches(record, &query)? {
                found.push(record);
            }
        }

        if let Some(sort) = &options.sort {
            found.sort_by(|a, b| evaluator::sort_order(a, b, sort));
        }

        let found = found
            .into_iter()
            .skip(options.skip.unwrap_or(0) as usize)
            .take(options.limit.map_or(usize::MAX, |limit| limit as usize))
            .map(|record| match &projection {
                Some(projection) => evaluator::project(record, projection),
                None => record.clone(),
            })
            .collect::<Vec<_>>();

        trace!(
            target: "docmodel::memory",
            collection,
            query = %query,
            matched = found.len(),
            "find"
        );
        Ok(found)
    }

    async fn insert(&self, collection: &str, mut record: Document) -> StorageResult<Document> {
        if !record.contains_key("_id") {
            record.insert("_id", ObjectId::new());
        }

        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();

        if let Some(index) = target.duplicate_of(&record, None) {
            return Err(StorageError::DuplicateKey(collection.to_string(), index));
        }

        target.records.push(record.clone());
        trace!(target: "docmodel::memory", collection, id = ?record.get("_id"), "insert");
        Ok(record)
    }

    async fn update(&self, collection: &str, id: Bson, update: Update) -> StorageResult<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))?;

        let position = target
            .records
            .iter()
            .position(|record| same_id(record, &id))
            .ok_or_else(|| StorageError::DocumentNotFound(id.to_string(), collection.to_string()))?;

        let mut updated = target.records[position].clone();
        apply_update(&mut updated, update)?;

        if let Some(index) = target.duplicate_of(&updated, Some(position)) {
            return Err(StorageError::DuplicateKey(collection.to_string(), index));
        }

        target.records[position] = updated;
        trace!(target: "docmodel::memory", collection, id = %id, "update");
        Ok(())
    }

    async fn remove(&self, collection: &str, query: Document) -> StorageResult<u64> {
        let mut collections = self.collections.write().await;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let doomed = target
            .records
            .iter()
            .map(|record| evaluator::matches(record, &query))
            .collect::<StorageResult<Vec<_>>>()?;
        let removed = doomed.iter().filter(|hit| **hit).count() as u64;

        let mut verdicts = doomed.into_iter();
        target
            .records
            .retain(|_| !verdicts.next().unwrap_or(false));

        trace!(target: "docmodel::memory", collection, removed, "remove");
        Ok(removed)
    }

    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> StorageResult<String> {
        let name = index.name();
        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();

        if target.indexes.iter().any(|existing| existing.name() == name) {
            return Ok(name);
        }

        if index.unique {
            let mut seen = Vec::with_capacity(target.records.len());
            for record in &target.records {
                let key = index_key(record, &index);
                if seen.contains(&key) {
                    return Err(StorageError::DuplicateKey(collection.to_string(), name));
                }
                seen.push(key);
            }
        }

        debug!(target: "docmodel::memory", collection, index = %name, unique = index.unique, "index created");
        target.indexes.push(index);
        Ok(name)
    }

    async fn create_collection(&self, name: &str) -> StorageResult<()> {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> StorageResult<()> {
        if self.collections.write().await.remove(name).is_none() {
            return Err(StorageError::CollectionNotFound(name.to_string()));
        }

        debug!(target: "docmodel::memory", collection = name, "collection dropped");
        Ok(())
    }
}

/// Builder for [`InMemoryStore`] instances.
///
/// The in-memory store takes no configuration; the builder exists so that it can be
/// constructed the same way as the other storage clients.
#[derive(Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> StorageResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::builder().build().await.unwrap();
        for (name, age) in [("Rex", 4), ("Fido", 9), ("Bolt", 2)] {
            store.insert("dogs", doc! { "name": name, "age": age }).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn insert_assigns_object_ids() {
        let store = InMemoryStore::new();
        let stored = store.insert("dogs", doc! { "name": "Rex" }).await.unwrap();

        assert!(matches!(stored.get("_id"), Some(Bson::ObjectId(_))));

        let kept = store.insert("dogs", doc! { "_id": 5, "name": "Fido" }).await.unwrap();
        assert_eq!(kept.get("_id"), Some(&Bson::Int32(5)));
    }

    #[tokio::test]
    async fn find_sorts_skips_and_limits() {
        let store = seeded().await;

        let options = FindOptions {
            sort: Some(doc! { "age": -1 }),
            skip: Some(1),
            limit: Some(1),
        };
        let found = store
            .find("dogs", doc! {}, Some(doc! { "name": 1, "_id": 0 }), options)
            .await
            .unwrap();

        assert_eq!(found, vec![doc! { "name": "Rex" }]);
        assert!(store.find("cats", doc! {}, None, FindOptions::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_sets_and_pushes() {
        let store = InMemoryStore::new();
        let stored = store.insert("dogs", doc! { "name": "Rex", "tricks": ["sit"] }).await.unwrap();
        let id = stored.get("_id").cloned().unwrap();

        store
            .update(
                "dogs",
                id.clone(),
                Update {
                    set: doc! { "owner.name": "Ada" },
                    push: vec![
                        ("tricks".into(), vec![Bson::from("roll"), Bson::from("beg")]),
                        ("visits".into(), vec![Bson::from(1)]),
                    ],
                },
            )
            .await
            .unwrap();

        let found = store
            .find("dogs", doc! { "_id": id }, None, FindOptions::default())
            .await
            .unwrap();
        let record = &found[0];
        assert_eq!(record.get_array("tricks").unwrap().len(), 3);
        assert_eq!(path::get(record, "owner.name"), Some(&Bson::from("Ada")));
        assert_eq!(record.get_array("visits").unwrap(), &vec![Bson::from(1)]);

        let missing = store
            .update("dogs", Bson::from("nope"), Update::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, StorageError::DocumentNotFound(_, _)));
    }

    #[tokio::test]
    async fn unique_indexes_reject_duplicates() {
        let store = InMemoryStore::new();
        let index = IndexSpec { keys: doc! { "email": 1 }, unique: true };
        assert_eq!(store.ensure_index("users", index).await.unwrap(), "email_1");

        store.insert("users", doc! { "email": "a@b.c" }).await.unwrap();
        let err = store.insert("users", doc! { "email": "a@b.c" }).await.unwrap_err();

        assert_eq!(err, StorageError::DuplicateKey("users".into(), "email_1".into()));
        assert_eq!(store.indexes("users").await.len(), 1);
    }

    #[tokio::test]
    async fn remove_counts_matches() {
        let store = seeded().await;

        assert_eq!(store.remove("dogs", doc! { "age": { "$gt": 3 } }).await.unwrap(), 2);
        assert_eq!(store.find("dogs", doc! {}, None, FindOptions::default()).await.unwrap().len(), 1);
        assert_eq!(store.remove("cats", doc! {}).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn collections_are_created_and_dropped() {
        let store = InMemoryStore::new();
        store.create_collection("dogs").await.unwrap();
        store.create_collection("dogs").await.unwrap();

        assert_eq!(store.collection_names().await, vec!["dogs".to_string()]);

        store.drop_collection("dogs").await.unwrap();
        assert!(matches!(
            store.drop_collection("dogs").await.unwrap_err(),
            StorageError::CollectionNotFound(_)
        ));
    }
}
