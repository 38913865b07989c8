#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use docmodel::prelude::*;

/// Ordered record of what ran, shared between hooks and the test body.
#[derive(Debug, Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().unwrap().iter().any(|e| e == entry)
    }

    /// Yields to the runtime until `entry` has been logged.
    pub async fn wait_for(&self, entry: &str) {
        for _ in 0..1_000 {
            if self.contains(entry) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("{entry} was never logged; log is {:?}", self.entries());
    }
}

pub fn owner_schema() -> SchemaDefinition {
    SchemaDefinition::new("Owner")
        .string("name")
        .required(true)
        .string("email")
        .reference_array(
            "dogs",
            "Dog",
            ReferenceArrayStyle::Reverse {
                foreign_key: "owner.id".into(),
            },
        )
        .add_index(doc! { "email": "asc" }, IndexOptions::unique())
        .unwrap()
}

pub fn dog_schema() -> SchemaDefinition {
    SchemaDefinition::new("Dog")
        .string("name")
        .required(true)
        .number("age")
        .index(IndexDirection::Desc)
        .object(
            "vet",
            SchemaDefinition::embedded()
                .string("name")
                .string("phone"),
        )
        .array("tricks")
        .atomic(true)
        .reference("owner", "Owner")
        .reference_array("friends", "Dog", ReferenceArrayStyle::Inline)
}

/// Connects `registry` to a fresh in-memory store, returning a handle on the store too.
pub async fn connect(registry: &Registry) -> (Connection, InMemoryStore) {
    let store = InMemoryStore::new();
    let connection = registry
        .connect(store.clone(), ConnectionOptions::default())
        .await
        .unwrap();
    (connection, store)
}

pub async fn kennel() -> (Connection, InMemoryStore) {
    let mut registry = Registry::new();
    registry
        .register(dog_schema())
        .unwrap()
        .register(owner_schema())
        .unwrap();
    connect(&registry).await
}
