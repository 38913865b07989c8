//! Query construction on a compiled model.
//!
//! A [`Query`] collects conditions, a field projection and cursor options, and is executed
//! with [`exec`](Query::exec) (or one of its shortcuts). On execution the conditions are cast
//! through the model's schema, the projection is normalized by its first entry's polarity,
//! and every returned record is hydrated into a [`Document`] under that projection.
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let page = users
//!     .find(doc! { "age": { "$gt": "21" } })
//!     .where_eq("contact.city", "Lisbon")
//!     .fields(doc! { "name": 1, "contact": 1 })
//!     .sort("age", IndexDirection::Desc)
//!     .skip(20)
//!     .limit(10)
//!     .exec()
//!     .await?;
//! ```

use bson::{Bson, Document as Record};
use tracing::debug;

use crate::{
    backend::FindOptions,
    cast::cast_query,
    document::Document,
    error::{CastError, ModelResult},
    hydration::Projection,
    model::Model,
    types::IndexDirection,
};

/// A pending query against one model.
#[derive(Debug, Clone)]
pub struct Query {
    model: Model,
    conditions: Record,
    fields: Option<Record>,
    options: FindOptions,
}

impl Query {
    pub(crate) fn new(model: Model, conditions: Record) -> Self {
        Self {
            model,
            conditions,
            fields: None,
            options: FindOptions::default(),
        }
    }

    /// Adds an equality condition on `key`, replacing any earlier condition on it.
    pub fn where_eq(mut self, key: &str, value: impl Into<Bson>) -> Self {
        self.conditions.insert(key, value.into());
        self
    }

    /// Sets the field projection, `{path: true | false}`.
    pub fn fields(mut self, fields: Record) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Appends a sort key. Earlier keys take priority.
    pub fn sort(mut self, key: &str, direction: IndexDirection) -> Self {
        self.options
            .sort
            .get_or_insert_with(Record::new)
            .insert(key, direction.as_i32());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    pub fn conditions(&self) -> &Record {
        &self.conditions
    }

    /// Returns the conditions cast through the model's schema.
    pub fn cast(&self) -> Result<Record, CastError> {
        let mut conditions = self.conditions.clone();
        cast_query(self.model.schema(), &mut conditions)?;
        Ok(conditions)
    }

    /// Runs the query and hydrates every matching record.
    pub async fn exec(self) -> ModelResult<Vec<Document>> {
        let conditions = self.cast()?;
        let schema = self.model.schema();
        let fields = self.fields.as_ref();
        let projection = Projection::parse(schema, fields).to_document(schema, fields);

        debug!(
            target: "docmodel::query",
            collection = self.model.collection(),
            conditions = %conditions,
            projection = ?projection,
            "find"
        );

        let records = self
            .model
            .backend()
            .find(
                self.model.collection(),
                conditions,
                projection.clone(),
                self.options,
            )
            .await?;

        let mut documents = Vec::with_capacity(records.len());
        for record in records {
            documents.push(self.model.hydrate(record, projection.clone()).await?);
        }
        Ok(documents)
    }

    pub async fn all(self) -> ModelResult<Vec<Document>> {
        self.exec().await
    }

    /// Runs the query for at most `n` documents.
    pub async fn first(self, n: u64) -> ModelResult<Vec<Document>> {
        self.limit(n).exec().await
    }

    /// Runs the query for a single document.
    pub async fn one(self) -> ModelResult<Option<Document>> {
        Ok(self.first(1).await?.into_iter().next())
    }
}
