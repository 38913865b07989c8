//! Runtime documents bound to a compiled schema.
//!
//! A [`Document`] owns its raw record, a [`HydrationTracker`] and the bookkeeping needed to
//! shape the next save: pending atomic pushes and atomic fields that were explicitly
//! overwritten. Documents are created by a [`Model`] either from initial values (new
//! documents) or from stored records (hydrated documents).
//!
//! Reads go through [`Document::get`], which consults the tracker first and applies the
//! field's getter chain. Writes go through [`Document::set`] and [`Document::push`], which
//! assign raw values and mark the written paths hydrated; casting and validation happen when
//! the document is saved.

use bson::{Bson, Document as Record, de::deserialize_from_bson};
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashSet, fmt, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    backend::Update,
    error::{CastError, FieldError, ModelError, ModelResult, StorageError, ValidationError},
    hooks::HookArgs,
    hydration::{HydrationTracker, Projection},
    model::Model,
    path,
    schema::{Node, Schema},
    types::{ReferenceArrayStyle, Subtype},
};

/// The result of reading a path through [`Document::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// The path was not part of the projection the document was loaded with.
    NotHydrated,
    /// The path is hydrated but holds no value.
    Missing,
    Value(Bson),
}

impl Field {
    pub fn is_hydrated(&self) -> bool {
        !matches!(self, Field::NotHydrated)
    }

    pub fn value(&self) -> Option<&Bson> {
        match self {
            Field::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Bson> {
        match self {
            Field::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// A document instance.
pub struct Document {
    model: Model,
    schema: Arc<Schema>,
    record: Record,
    hydration: HydrationTracker,
    is_new: bool,
    pushes: Vec<(String, Bson)>,
    overwritten: HashSet<String>,
    outstanding: Vec<JoinHandle<()>>,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("model", &self.schema.name())
            .field("record", &self.record)
            .field("is_new", &self.is_new)
            .field("pending_pushes", &self.pushes.len())
            .finish()
    }
}

impl Document {
    pub(crate) fn new(model: Model, schema: Arc<Schema>) -> Self {
        let hydration = HydrationTracker::full(&schema);
        Self {
            model,
            schema,
            record: Record::new(),
            hydration,
            is_new: true,
            pushes: Vec::new(),
            overwritten: HashSet::new(),
            outstanding: Vec::new(),
        }
    }

    pub(crate) fn stored(model: Model, schema: Arc<Schema>) -> Self {
        Self {
            is_new: false,
            hydration: HydrationTracker::default(),
            ..Self::new(model, schema)
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns `true` until the document has been persisted once.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn id(&self) -> Option<&Bson> {
        self.record.get("_id")
    }

    /// The raw record, exactly as it will be handed to the caster on the next save.
    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn hydration(&self) -> &HydrationTracker {
        &self.hydration
    }

    pub fn hydrated(&self, path: &str) -> bool {
        self.hydration.hydrated(path)
    }

    fn check_path(&self, path: &str) -> ModelResult<()> {
        if path == "_id" || self.schema.accepts(path) {
            Ok(())
        } else {
            Err(ModelError::UnknownPath(path.to_string()))
        }
    }

    /// Reads `path`, applying its getter chain.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownPath`] if the schema does not declare `path`.
    pub fn get(&self, path: &str) -> ModelResult<Field> {
        self.check_path(path)?;
        if path != "_id" && !self.hydration.hydrated(path) {
            return Ok(Field::NotHydrated);
        }
        Ok(match path::get(&self.record, path) {
            None | Some(Bson::Null) => Field::Missing,
            Some(value) => match self.schema.path(path) {
                Some(def) => Field::Value(def.read(value.clone())),
                None => Field::Value(value.clone()),
            },
        })
    }

    /// Reads `path`, treating an unhydrated path as an error.
    pub fn try_get(&self, path: &str) -> ModelResult<Option<Bson>> {
        match self.get(path)? {
            Field::NotHydrated => Err(ModelError::NotHydrated(path.to_string())),
            field => Ok(field.into_value()),
        }
    }

    /// Assigns a raw value to `path` and marks it (and everything under it) hydrated.
    ///
    /// Numeric segments address array elements (`tricks.0`). Overwriting an atomic field of
    /// a stored document, or one of its elements, sends the whole value on the next save and
    /// discards pushes made to it since the last save.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownPath`] if the schema does not declare `path` or if a
    /// non-numeric segment runs through an array.
    pub fn set(&mut self, path: &str, value: impl Into<Bson>) -> ModelResult<()> {
        self.check_path(path)?;
        if !path::set(&mut self.record, path, value.into()) {
            return Err(ModelError::UnknownPath(path.to_string()));
        }
        self.hydration.mark(&self.schema, path);

        let atomic = std::iter::once(path)
            .chain(path::ancestors(path))
            .find(|p| self.schema.path(p).is_some_and(|def| def.is_atomic()));
        if let (false, Some(field)) = (self.is_new, atomic) {
            self.overwritten.insert(field.to_string());
            self.pushes.retain(|(p, _)| p != field);
        }
        Ok(())
    }

    /// Appends `value` to the array at `path`.
    ///
    /// For an atomic field of a stored document the append is sent as an append-only update
    /// on the next save, so it is safe even when the array was never loaded.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotHydrated`] when appending to an unloaded non-atomic array, and
    /// a [`CastError`] when the current value is not an array.
    pub fn push(&mut self, path: &str, value: impl Into<Bson>) -> ModelResult<()> {
        let value = value.into();
        let def = self
            .schema
            .path(path)
            .ok_or_else(|| ModelError::UnknownPath(path.to_string()))?;
        let atomic = def.is_atomic() && !self.is_new && !self.overwritten.contains(path);

        if self.hydration.hydrated(path) {
            match path::get_mut(&mut self.record, path) {
                Some(Bson::Array(items)) => items.push(value.clone()),
                None | Some(Bson::Null) => {
                    path::set(&mut self.record, path, Bson::Array(vec![value.clone()]));
                }
                Some(other) => {
                    return Err(CastError::new(path, other.clone(), "array").into());
                }
            }
        } else if !atomic {
            return Err(ModelError::NotHydrated(path.to_string()));
        }

        if atomic {
            self.pushes.push((path.to_string(), value));
        }
        Ok(())
    }

    /// Returns the elements of an embedded array as independent documents.
    pub fn elements(&self, path: &str) -> ModelResult<Vec<Document>> {
        let schema = self
            .schema
            .embedded(path)
            .cloned()
            .ok_or_else(|| ModelError::UnknownPath(path.to_string()))?;

        let items = match self.try_get(path)? {
            Some(Bson::Array(items)) => items,
            None => Vec::new(),
            Some(other) => return Err(CastError::new(path, other, "array").into()),
        };

        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Bson::Document(record) => {
                    let mut element = Document::new(self.model.clone(), schema.clone());
                    element.record = record;
                    element.is_new = self.is_new;
                    Ok(element)
                }
                other => Err(CastError::new(format!("{path}.{i}"), other, "object").into()),
            })
            .collect()
    }

    /// Replaces an embedded array with the records of `elements`.
    pub fn set_elements(&mut self, path: &str, elements: Vec<Document>) -> ModelResult<()> {
        if self.schema.embedded(path).is_none() {
            return Err(ModelError::UnknownPath(path.to_string()));
        }
        let items = elements
            .into_iter()
            .map(|element| Bson::Document(element.record))
            .collect::<Vec<_>>();
        self.set(path, items)
    }

    /// Runs the lifecycle method `method` through its pipeline.
    pub async fn run(&mut self, method: &str, args: HookArgs) -> ModelResult<()> {
        let pipeline = self
            .schema
            .pipeline(method)
            .cloned()
            .ok_or_else(|| ModelError::UnknownMethod(method.to_string()))?;
        pipeline.run(self, args).await
    }

    /// Casts, validates and persists the document through the `save` pipeline.
    pub async fn save(&mut self) -> ModelResult<()> {
        self.run("save", HookArgs::None).await
    }

    /// Removes the document from storage through the `remove` pipeline.
    pub async fn remove(&mut self) -> ModelResult<()> {
        self.run("remove", HookArgs::None).await
    }

    /// Calls an instance method declared with `SchemaDefinition::method`.
    pub async fn call(&mut self, name: &str, args: Vec<Bson>) -> ModelResult<Bson> {
        let method = self
            .schema
            .method(name)
            .cloned()
            .ok_or_else(|| ModelError::UnknownMethod(name.to_string()))?;
        method(self, args).await
    }

    /// Waits for every outstanding parallel interceptor started on this document.
    pub async fn settle(&mut self) {
        for handle in self.outstanding.drain(..) {
            if let Err(err) = handle.await {
                warn!(target: "docmodel::document", error = %err, "interceptor task panicked");
            }
        }
    }

    pub(crate) fn track(&mut self, handle: JoinHandle<()>) {
        self.outstanding.retain(|h| !h.is_finished());
        self.outstanding.push(handle);
    }

    /// Fetches the document referenced at `path`.
    pub async fn resolve_reference(&self, path: &str) -> ModelResult<Option<Document>> {
        let def = self
            .schema
            .path(path)
            .ok_or_else(|| ModelError::UnknownPath(path.to_string()))?;
        let target = match def.subtype() {
            Subtype::Reference(target) => target.clone(),
            _ => return Err(ModelError::UnknownPath(path.to_string())),
        };
        let id = match self.try_get(path)? {
            Some(Bson::Document(pair)) => pair.get("id").cloned(),
            Some(id) => Some(id),
            None => None,
        };
        let Some(id) = id else {
            return Ok(None);
        };

        let model = self.model.sibling_for(&target, path)?;
        model.find_by_id(id).await
    }

    /// Fetches every document of a reference array.
    ///
    /// Inline arrays are resolved from the stored pairs and returned in array order; reverse
    /// arrays query the target collection for documents whose foreign key points here.
    pub async fn resolve_references(&self, path: &str) -> ModelResult<Vec<Document>> {
        let def = self
            .schema
            .path(path)
            .ok_or_else(|| ModelError::UnknownPath(path.to_string()))?;
        let (target, style) = match def.subtype() {
            Subtype::ReferenceArray(target, style) => (target.clone(), style.clone()),
            _ => return Err(ModelError::UnknownPath(path.to_string())),
        };
        let model = self.model.sibling_for(&target, path)?;

        match style {
            ReferenceArrayStyle::Reverse { foreign_key } => {
                let Some(id) = self.id().cloned() else {
                    return Ok(Vec::new());
                };
                let mut query = Record::new();
                query.insert(foreign_key, id);
                model.find(query).all().await
            }
            ReferenceArrayStyle::Inline => {
                let ids: Vec<Bson> = match self.try_get(path)? {
                    Some(Bson::Array(items)) => items
                        .into_iter()
                        .filter_map(|item| match item {
                            Bson::Document(pair) => pair.get("id").cloned(),
                            Bson::Null => None,
                            id => Some(id),
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                if ids.is_empty() {
                    return Ok(Vec::new());
                }

                let mut query = Record::new();
                query.insert("_id", bson::doc! { "$in": ids.clone() });
                let mut found = model.find(query).all().await?;
                found.sort_by_key(|doc| {
                    doc.id()
                        .and_then(|id| ids.iter().position(|candidate| candidate == id))
                        .unwrap_or(usize::MAX)
                });
                Ok(found)
            }
        }
    }

    /// Converts the raw record to JSON.
    pub fn to_json(&self) -> ModelResult<Value> {
        Ok(serde_json::to_value(&self.record)?)
    }

    /// Deserializes the raw record into `T`.
    pub fn to_typed<T: DeserializeOwned>(&self) -> ModelResult<T> {
        Ok(deserialize_from_bson(Bson::Document(self.record.clone()))?)
    }

    /// Default `init` handler: applies declared defaults, then the supplied values.
    pub(crate) fn apply_values(&mut self, values: Record) -> ModelResult<()> {
        if self.is_new {
            let defaults: Vec<(String, Bson)> = self
                .schema
                .defaults()
                .map(|(p, v)| (p.to_string(), v.clone()))
                .collect();
            for (path, value) in defaults {
                if path::get(&self.record, &path).is_none() {
                    path::set(&mut self.record, &path, value);
                }
            }
        }
        self.assign("", values)
    }

    fn assign(&mut self, prefix: &str, values: Record) -> ModelResult<()> {
        for (key, value) in values {
            let full = path::join(prefix, &key);
            if full == "_id" {
                self.record.insert(key, value);
                continue;
            }
            let is_object = self
                .schema
                .path(&full)
                .is_some_and(|def| matches!(def.subtype(), Subtype::Object(_)));
            match value {
                Bson::Document(nested) if is_object => self.assign(&full, nested)?,
                value => self.set(&full, value)?,
            }
        }
        Ok(())
    }

    /// Default `hydrate` handler: adopts a stored record under `projection`.
    pub(crate) fn load(&mut self, record: Record, projection: Option<&Record>) {
        let projection = Projection::parse(&self.schema, projection);
        self.hydration = HydrationTracker::from_projection(&self.schema, &projection);
        self.record = record;
        self.is_new = false;
        self.pushes.clear();
        self.overwritten.clear();
    }

    /// Default `save` handler.
    pub(crate) async fn persist(&mut self) -> ModelResult<()> {
        let mut prepared = self.record.clone();
        let hydration = self.hydration.clone();
        let mut errors =
            prepare(&self.schema, &|p: &str| hydration.hydrated(p), &mut prepared, "").await;

        let mut pushes = Vec::with_capacity(self.pushes.len());
        for (path, value) in &self.pushes {
            let mut value = value.clone();
            if let (Some(schema), Bson::Document(element)) =
                (self.schema.embedded(path), &mut value)
            {
                errors.extend(prepare(schema, &|_: &str| true, element, path).await);
            }
            pushes.push((path.clone(), value));
        }

        if !errors.is_empty() {
            debug!(
                target: "docmodel::document",
                model = self.schema.name(),
                failures = errors.len(),
                "document failed validation"
            );
            return Err(ModelError::Invalid(errors));
        }

        if self.schema.is_embedded() {
            self.record = prepared;
            return Ok(());
        }

        let collection = self.schema.collection();
        if self.is_new {
            let stored = self.model.backend().insert(collection, prepared).await?;
            debug!(target: "docmodel::document", collection, id = ?stored.get("_id"), "inserted");
            self.record = stored;
            self.is_new = false;
        } else {
            let id = self.id().cloned().ok_or_else(|| {
                StorageError::DocumentNotFound("<missing _id>".into(), collection.to_string())
            })?;
            let update = self.update_for(&prepared, pushes);
            if !update.is_empty() {
                debug!(
                    target: "docmodel::document",
                    collection,
                    %id,
                    set = update.set.len(),
                    push = update.push.len(),
                    "updating"
                );
                self.model
                    .backend()
                    .update(collection, id, update)
                    .await?;
            }
            self.record = prepared;
        }

        self.pushes.clear();
        self.overwritten.clear();
        Ok(())
    }

    /// Default `remove` handler.
    pub(crate) async fn delete(&mut self) -> ModelResult<()> {
        if self.is_new || self.schema.is_embedded() {
            return Ok(());
        }
        let Some(id) = self.id().cloned() else {
            return Ok(());
        };
        let collection = self.schema.collection();
        let removed = self
            .model
            .backend()
            .remove(collection, bson::doc! { "_id": id })
            .await?;
        debug!(target: "docmodel::document", collection, removed, "removed");
        Ok(())
    }

    fn update_for(&self, prepared: &Record, pushes: Vec<(String, Bson)>) -> Update {
        let mut update = Update::default();
        self.collect_set(self.schema.structure(), prepared, &mut update.set);

        for (path, value) in pushes {
            match update.push.iter_mut().find(|(p, _)| *p == path) {
                Some((_, values)) => values.push(value),
                None => update.push.push((path, vec![value])),
            }
        }
        update
    }

    /// Collects `$set` entries at the highest fully hydrated level of the structure tree.
    fn collect_set(&self, nodes: &[Node], prepared: &Record, set: &mut Record) {
        for node in nodes {
            match node {
                Node::Branch { path, children } => {
                    if self.hydration.hydrated(path) && !self.has_atomic(node) {
                        if let Some(value) = path::get(prepared, path) {
                            set.insert(path.clone(), value.clone());
                        }
                    } else {
                        self.collect_set(children, prepared, set);
                    }
                }
                Node::Leaf(path) => {
                    let Some(def) = self.schema.path(path) else {
                        continue;
                    };
                    let reverse = matches!(
                        def.subtype(),
                        Subtype::ReferenceArray(_, ReferenceArrayStyle::Reverse { .. })
                    );
                    let skip_atomic = def.is_atomic() && !self.overwritten.contains(path);
                    if reverse || skip_atomic || !self.hydration.hydrated(path) {
                        continue;
                    }
                    if let Some(value) = path::get(prepared, path) {
                        set.insert(path.clone(), value.clone());
                    }
                }
            }
        }
    }

    fn has_atomic(&self, node: &Node) -> bool {
        let mut leaves = Vec::new();
        node.leaves(&mut leaves);
        leaves
            .iter()
            .any(|leaf| self.schema.path(leaf).is_some_and(|def| def.is_atomic()))
    }
}

/// Casts and validates every hydrated declared path of `record` in place.
///
/// Every failure is collected; paths in errors are prefixed with `prefix`.
fn prepare<'a>(
    schema: &'a Schema,
    hydrated: &'a (dyn Fn(&str) -> bool + Sync),
    record: &'a mut Record,
    prefix: &'a str,
) -> BoxFuture<'a, Vec<FieldError>> {
    async move {
        let mut errors: Vec<FieldError> = Vec::new();

        for (field, def) in schema.paths() {
            if !hydrated(field) {
                continue;
            }
            let reported = path::join(prefix, field);

            if matches!(
                def.subtype(),
                Subtype::ReferenceArray(_, ReferenceArrayStyle::Reverse { .. })
            ) {
                path::remove(record, field);
                continue;
            }

            let value = match path::get(record, field) {
                None | Some(Bson::Null) => {
                    if def.is_required() {
                        errors.push(ValidationError::new("required", &reported).into());
                    }
                    continue;
                }
                Some(value) => value.clone(),
            };

            let value = if matches!(def.subtype(), Subtype::Object(_)) {
                value
            } else {
                match def.cast(&reported, value) {
                    Ok(cast) => {
                        path::set(record, field, cast.clone());
                        cast
                    }
                    Err(err) => {
                        errors.push(err.into());
                        continue;
                    }
                }
            };

            for (name, validator) in def.validators() {
                if !validator.check(value.clone()).await {
                    errors.push(ValidationError::new(name, &reported).into());
                }
            }

            if let Some(element_schema) = schema.embedded(field) {
                if let Some(Bson::Array(items)) = path::get_mut(record, field) {
                    for (i, item) in items.iter_mut().enumerate() {
                        if let Bson::Document(element) = item {
                            let element_prefix = format!("{reported}.{i}");
                            errors.extend(
                                prepare(element_schema, &|_: &str| true, element, &element_prefix).await,
                            );
                        }
                    }
                }
            }
        }

        errors
    }
    .boxed()
}
