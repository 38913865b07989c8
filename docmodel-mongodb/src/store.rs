use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Bson, Document, doc};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions as MongoFindOptions, IndexOptions},
};
use tracing::{debug, trace};

use docmodel_core::{
    backend::{FindOptions, IndexSpec, StoreBackend, StoreBackendBuilder, Update},
    error::{StorageError, StorageResult},
};

const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_EXISTS: i32 = 48;

fn error_code(error: &MongoError) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(failure)) => Some(failure.code),
        ErrorKind::Command(failure) => Some(failure.code),
        _ => None,
    }
}

fn storage_error(collection: &str, error: MongoError) -> StorageError {
    match error_code(&error) {
        Some(DUPLICATE_KEY) => StorageError::DuplicateKey(collection.to_string(), error.to_string()),
        _ => StorageError::Backend(error.to_string()),
    }
}

/// Renders an [`Update`] as a Mongo update document.
///
/// Pushes become `$push: {path: {$each: [...]}}` so that every pending value is appended
/// by the server in one atomic operation.
fn update_document(update: Update) -> Document {
    let mut rendered = Document::new();

    if !update.set.is_empty() {
        rendered.insert("$set", update.set);
    }

    let mut push = Document::new();
    for (path, values) in update.push {
        if !values.is_empty() {
            push.insert(path, doc! { "$each": values });
        }
    }
    if !push.is_empty() {
        rendered.insert("$push", push);
    }

    rendered
}

/// Storage client backed by a MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn collection(&self, name: &str) -> MongoCollection<Document> {
        self.client.database(&self.database).collection(name)
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find(
        &self,
        collection: &str,
        query: Document,
        projection: Option<Document>,
        options: FindOptions,
    ) -> StorageResult<Vec<Document>> {
        let mut find_options = MongoFindOptions::default();
        find_options.projection = projection;
        find_options.sort = options.sort;
        find_options.skip = options.skip;
        find_options.limit = options.limit.map(|limit| limit as i64);

        trace!(target: "docmodel::mongodb", collection, query = %query, "find");

        self.collection(collection)
            .find(query)
            .with_options(find_options)
            .await
            .map_err(|e| storage_error(collection, e))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| storage_error(collection, e))
    }

    async fn insert(&self, collection: &str, mut record: Document) -> StorageResult<Document> {
        let inserted = self
            .collection(collection)
            .insert_one(&record)
            .await
            .map_err(|e| storage_error(collection, e))?;

        if !record.contains_key("_id") {
            record.insert("_id", inserted.inserted_id);
        }

        trace!(target: "docmodel::mongodb", collection, id = ?record.get("_id"), "insert");
        Ok(record)
    }

    async fn update(&self, collection: &str, id: Bson, update: Update) -> StorageResult<()> {
        if update.is_empty() {
            return Ok(());
        }

        let result = self
            .collection(collection)
            .update_one(doc! { "_id": id.clone() }, update_document(update))
            .await
            .map_err(|e| storage_error(collection, e))?;

        if result.matched_count == 0 {
            return Err(StorageError::DocumentNotFound(id.to_string(), collection.to_string()));
        }

        trace!(target: "docmodel::mongodb", collection, id = %id, "update");
        Ok(())
    }

    async fn remove(&self, collection: &str, query: Document) -> StorageResult<u64> {
        let result = self
            .collection(collection)
            .delete_many(query)
            .await
            .map_err(|e| storage_error(collection, e))?;

        trace!(target: "docmodel::mongodb", collection, removed = result.deleted_count, "remove");
        Ok(result.deleted_count)
    }

    async fn ensure_index(&self, collection: &str, index: IndexSpec) -> StorageResult<String> {
        let model = IndexModel::builder()
            .keys(index.keys.clone())
            .options(
                IndexOptions::builder()
                    .unique(index.unique)
                    .name(index.name())
                    .build(),
            )
            .build();

        let created = self
            .collection(collection)
            .create_index(model)
            .await
            .map_err(|e| storage_error(collection, e))?;

        debug!(
            target: "docmodel::mongodb",
            collection,
            index = %created.index_name,
            unique = index.unique,
            "index ensured"
        );
        Ok(created.index_name)
    }

    async fn create_collection(&self, name: &str) -> StorageResult<()> {
        match self.client.database(&self.database).create_collection(name).await {
            Ok(()) => Ok(()),
            Err(e) if error_code(&e) == Some(NAMESPACE_EXISTS) => Ok(()),
            Err(e) => Err(storage_error(name, e)),
        }
    }

    async fn drop_collection(&self, name: &str) -> StorageResult<()> {
        self.collection(name)
            .drop()
            .await
            .map_err(|e| storage_error(name, e))?;

        debug!(target: "docmodel::mongodb", collection = name, "collection dropped");
        Ok(())
    }
}

/// Builder connecting a [`MongoDbStore`] from a connection string.
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
        }
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> StorageResult<Self::Backend> {
        let options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| StorageError::Initialization(e.to_string()))?;
        let client = Client::with_options(options)
            .map_err(|e| StorageError::Initialization(e.to_string()))?;

        debug!(target: "docmodel::mongodb", database = %self.database, "client configured");
        Ok(MongoDbStore::new(client, self.database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_render_set_and_each_push() {
        let update = Update {
            set: doc! { "name": "Rex" },
            push: vec![
                ("tricks".into(), vec![Bson::from("sit"), Bson::from("roll")]),
                ("visits".into(), Vec::new()),
            ],
        };

        assert_eq!(
            update_document(update),
            doc! {
                "$set": { "name": "Rex" },
                "$push": { "tricks": { "$each": ["sit", "roll"] } },
            }
        );
    }

    #[test]
    fn push_only_updates_omit_set() {
        let update = Update {
            set: Document::new(),
            push: vec![("tricks".into(), vec![Bson::from("sit")])],
        };

        assert_eq!(
            update_document(update),
            doc! { "$push": { "tricks": { "$each": ["sit"] } } }
        );
    }
}
