//! Schema declaration and compilation.
//!
//! A [`SchemaDefinition`] is built with a declarative chain: every field declaration both
//! defines a [`TypeDefinition`] and appends to the schema's structure, and every modifier
//! (`required`, `validate`, `index`, ...) applies to the most recently declared field.
//! Schema-level calls register hooks, methods, statics and indexes.
//!
//! Registering the definition with a [`Registry`](crate::registry::Registry) compiles it into
//! a [`Schema`]: field types are resolved against the registry's type templates, nested
//! object schemas are flattened into one dotted path table, and array-of-object schemas are
//! compiled into independent embedded schemas.
//!
//! ```ignore
//! use docmodel::prelude::*;
//!
//! let contact = SchemaDefinition::embedded()
//!     .string("phone")
//!     .string("email").required(true);
//!
//! let person = SchemaDefinition::new("Person")
//!     .string("name").required(true)
//!     .number("age").index(IndexDirection::Desc)
//!     .object("contact", contact)
//!     .array("tags").atomic(true)
//!     .add_index(doc! { "name": "asc", "age": -1 }, IndexOptions::unique())?;
//! ```

use bson::{Bson, Document as Record, doc};
use futures::future::BoxFuture;
use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    backend::IndexSpec,
    document::Document,
    error::{ModelResult, SchemaDefinitionError},
    hooks::{Done, HookArgs, HookTable, Next, Override, ParallelHook, Pipeline, PreHook, SerialHook},
    model::Model,
    path,
    types::{
        Coercer, CoercionFailed, FieldKind, IndexDirection, ReferenceArrayStyle, ReferenceTarget,
        Subtype, TypeDefinition, Validator, builtin,
    },
};

/// An instance method callable through [`Document::call`](crate::document::Document::call).
pub type Method = Arc<
    dyn for<'a> Fn(&'a mut Document, Vec<Bson>) -> BoxFuture<'a, ModelResult<Bson>> + Send + Sync,
>;

/// A static function callable through [`Model::call_static`](crate::model::Model::call_static).
pub type StaticFn =
    Arc<dyn for<'a> Fn(&'a Model, Vec<Bson>) -> BoxFuture<'a, ModelResult<Bson>> + Send + Sync>;

/// Options for a schema-level index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub unique: bool,
}

impl IndexOptions {
    pub fn unique() -> Self {
        Self { unique: true }
    }
}

/// A named or embedded schema under construction.
#[derive(Clone)]
pub struct SchemaDefinition {
    pub(crate) name: Option<String>,
    pub(crate) collection: Option<String>,
    pub(crate) fields: Vec<TypeDefinition>,
    pub(crate) indexes: Vec<IndexSpec>,
    pub(crate) hooks: HookTable,
    pub(crate) methods: HashMap<String, Method>,
    pub(crate) statics: HashMap<String, StaticFn>,
    pub(crate) errors: Vec<SchemaDefinitionError>,
}

impl fmt::Debug for SchemaDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDefinition")
            .field("name", &self.name)
            .field("fields", &self.fields.iter().map(|t| &t.key).collect::<Vec<_>>())
            .field("indexes", &self.indexes)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl SchemaDefinition {
    /// Starts a named schema. The collection defaults to the lowercased name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::embedded()
        }
    }

    /// Starts an anonymous schema for use as an embedded object or array element.
    pub fn embedded() -> Self {
        Self {
            name: None,
            collection: None,
            fields: Vec::new(),
            indexes: Vec::new(),
            hooks: HookTable::with_defaults(),
            methods: HashMap::new(),
            statics: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Overrides the collection the compiled model persists to.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    fn declare(mut self, key: &str, mut def: TypeDefinition) -> Self {
        def.key = key.to_string();
        self.fields.push(def);
        self
    }

    /// Declares `key` with a registered type name.
    pub fn field(self, key: &str, type_name: &str) -> Self {
        self.declare(key, TypeDefinition::new(type_name))
    }

    pub fn string(self, key: &str) -> Self {
        self.field(key, builtin::STRING)
    }

    pub fn number(self, key: &str) -> Self {
        self.field(key, builtin::NUMBER)
    }

    pub fn boolean(self, key: &str) -> Self {
        self.field(key, builtin::BOOLEAN)
    }

    pub fn date(self, key: &str) -> Self {
        self.field(key, builtin::DATE)
    }

    pub fn oid(self, key: &str) -> Self {
        self.field(key, builtin::OID)
    }

    pub fn uuid(self, key: &str) -> Self {
        self.field(key, builtin::UUID)
    }

    /// Declares an embedded object whose paths merge into this schema's path table.
    pub fn object(self, key: &str, schema: SchemaDefinition) -> Self {
        let def = TypeDefinition::new(builtin::OBJECT).with_kind(FieldKind::Object);
        self.declare(
            key,
            TypeDefinition {
                subtype: Subtype::Object(Arc::new(schema)),
                ..def
            },
        )
    }

    /// Declares a free-form array.
    pub fn array(self, key: &str) -> Self {
        self.field(key, builtin::ARRAY)
    }

    /// Declares an array whose elements are independent documents of `schema`.
    pub fn array_of(self, key: &str, schema: SchemaDefinition) -> Self {
        let def = TypeDefinition::new(builtin::ARRAY).with_kind(FieldKind::Array);
        self.declare(
            key,
            TypeDefinition {
                subtype: Subtype::Array(Arc::new(schema)),
                ..def
            },
        )
    }

    /// Declares a reference to a document of the model registered as `target`.
    ///
    /// The target is resolved by name when the registry connects, so it may be declared
    /// after this schema.
    pub fn reference(self, key: &str, target: &str) -> Self {
        let def = TypeDefinition::new(builtin::REFERENCE).with_kind(FieldKind::Reference);
        self.declare(
            key,
            TypeDefinition {
                subtype: Subtype::Reference(Arc::new(ReferenceTarget::new(target))),
                ..def
            },
        )
    }

    /// Declares an array of references to documents of `target`.
    pub fn reference_array(self, key: &str, target: &str, style: ReferenceArrayStyle) -> Self {
        let def =
            TypeDefinition::new(builtin::REFERENCE_ARRAY).with_kind(FieldKind::ReferenceArray);
        self.declare(
            key,
            TypeDefinition {
                subtype: Subtype::ReferenceArray(Arc::new(ReferenceTarget::new(target)), style),
                ..def
            },
        )
    }

    fn modify(mut self, modifier: &str, f: impl FnOnce(&mut TypeDefinition)) -> Self {
        match self.fields.last_mut() {
            Some(def) => f(def),
            None => self
                .errors
                .push(SchemaDefinitionError::NoCurrentField(modifier.to_string())),
        }
        self
    }

    /// Appends a getter to the current field.
    pub fn get(self, coercer: Coercer) -> Self {
        self.modify("get", |def| def.getters.push(coercer))
    }

    /// Appends a setter to the current field. Setters run last-added-first.
    pub fn set(self, coercer: Coercer) -> Self {
        self.modify("set", |def| def.setters.push(coercer))
    }

    pub fn set_strict(self, coercer: Coercer) -> Self {
        self.modify("set_strict", |def| def.strict_setters.push(coercer))
    }

    pub fn cast_set(self, coercer: Coercer) -> Self {
        self.modify("cast_set", |def| def.cast_set = Some(coercer))
    }

    /// Adds a named validator to the current field, replacing one with the same name.
    pub fn validate(self, name: &str, validator: Validator) -> Self {
        self.modify("validate", |def| def.add_validator(name.to_string(), validator))
    }

    pub fn required(self, required: bool) -> Self {
        self.modify("required", |def| def.required = required)
    }

    pub fn strict(self, strict: bool) -> Self {
        self.modify("strict", |def| def.strict = strict)
    }

    pub fn index(self, direction: IndexDirection) -> Self {
        self.modify("index", |def| def.index = Some(direction))
    }

    pub fn default(self, value: impl Into<Bson>) -> Self {
        let value = value.into();
        self.modify("default", |def| def.default_value = Some(value))
    }

    /// Marks the current field for append-only updates.
    pub fn atomic(self, atomic: bool) -> Self {
        self.modify("atomic", |def| def.atomic = atomic)
    }

    /// Splices the registered type `parent` into the current field before its own chains.
    pub fn extend(self, parent: &str) -> Self {
        self.modify("extend", |def| def.parent = Some(parent.to_string()))
    }

    /// Appends a normalized index over `keys`.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaDefinitionError::InvalidIndexSpec`] if an order is not one of
    /// `asc`, `desc`, `1` or `-1`.
    pub fn add_index(
        mut self,
        keys: Record,
        options: IndexOptions,
    ) -> Result<Self, SchemaDefinitionError> {
        let mut normalized = Record::new();
        for (key, order) in keys {
            let direction = IndexDirection::parse(&order)
                .ok_or_else(|| SchemaDefinitionError::InvalidIndexSpec(key.clone()))?;
            normalized.insert(key, direction.as_i32());
        }
        self.indexes.push(IndexSpec {
            keys: normalized,
            unique: options.unique,
        });
        Ok(self)
    }

    /// Appends a serial pre interceptor for `method`.
    pub fn pre<F>(mut self, method: &str, hook: F) -> Self
    where
        F: Fn(&mut Document, Next) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let hook: SerialHook = Arc::new(hook);
        self.hooks.pre(method, PreHook::Serial(hook));
        self
    }

    /// Appends a parallel pre interceptor for `method`.
    pub fn pre_parallel<F>(mut self, method: &str, hook: F) -> Self
    where
        F: Fn(&mut Document, Next, Done) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let hook: ParallelHook = Arc::new(hook);
        self.hooks.pre(method, PreHook::Parallel(hook));
        self
    }

    /// Appends a post interceptor for `method`. Posts run in declaration order.
    pub fn post<F>(mut self, method: &str, hook: F) -> Self
    where
        F: Fn(&mut Document, Next) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.hooks.post(method, Arc::new(hook));
        self
    }

    /// Registers the handler for `method`, or an override wrapping the current one.
    ///
    /// The first argument passed to `hook` is the handler being wrapped; for a method with no
    /// handler yet it is a no-op.
    pub fn hook<F>(mut self, method: &str, hook: F) -> Self
    where
        F: for<'a> Fn(
                crate::hooks::Handler,
                &'a mut Document,
                HookArgs,
            ) -> BoxFuture<'a, ModelResult<()>>
            + Send
            + Sync
            + 'static,
    {
        let hook: Override = Arc::new(hook);
        self.hooks.hook(method, hook);
        self
    }

    /// Adds an instance method.
    pub fn method<F>(mut self, name: &str, method: F) -> Self
    where
        F: for<'a> Fn(&'a mut Document, Vec<Bson>) -> BoxFuture<'a, ModelResult<Bson>>
            + Send
            + Sync
            + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(method));
        self
    }

    /// Adds a static function on the compiled model.
    pub fn static_fn<F>(mut self, name: &str, f: F) -> Self
    where
        F: for<'a> Fn(&'a Model, Vec<Bson>) -> BoxFuture<'a, ModelResult<Bson>>
            + Send
            + Sync
            + 'static,
    {
        self.statics.insert(name.to_string(), Arc::new(f));
        self
    }

    /// Applies a plugin: a function that receives this definition and its options and
    /// returns the extended definition.
    pub fn plugin<F>(self, plugin: F, options: &Bson) -> Self
    where
        F: FnOnce(SchemaDefinition, &Bson) -> SchemaDefinition,
    {
        plugin(self, options)
    }

    /// Compiles this definition, resolving type names through `lookup`.
    pub(crate) fn compile(
        &self,
        lookup: &dyn Fn(&str) -> Option<TypeDefinition>,
    ) -> Result<Schema, SchemaDefinitionError> {
        if let Some(err) = self.errors.first() {
            return Err(err.clone());
        }

        let mut flat = Flattened::default();
        let structure = flatten(self, "", lookup, &mut flat)?;
        flat.indexes.extend(self.indexes.iter().cloned());

        let name = self.name.clone().unwrap_or_default();
        Ok(Schema {
            collection: self
                .collection
                .clone()
                .unwrap_or_else(|| name.to_lowercase()),
            name,
            paths: flat.paths,
            order: flat.order,
            structure,
            embedded: flat.embedded,
            indexes: flat.indexes,
            pipelines: self.hooks.compile(),
            methods: self.methods.clone(),
            statics: self.statics.clone(),
            is_embedded: self.name.is_none(),
        })
    }
}

/// A node of a compiled schema's structure tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(String),
    Branch { path: String, children: Vec<Node> },
}

impl Node {
    pub fn path(&self) -> &str {
        match self {
            Node::Leaf(path) => path,
            Node::Branch { path, .. } => path,
        }
    }

    /// Visits every leaf under this node in declaration order.
    pub fn leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Node::Leaf(path) => out.push(path),
            Node::Branch { children, .. } => children.iter().for_each(|c| c.leaves(out)),
        }
    }
}

#[derive(Default)]
struct Flattened {
    paths: HashMap<String, TypeDefinition>,
    order: Vec<String>,
    embedded: HashMap<String, Arc<Schema>>,
    indexes: Vec<IndexSpec>,
}

fn flatten(
    def: &SchemaDefinition,
    prefix: &str,
    lookup: &dyn Fn(&str) -> Option<TypeDefinition>,
    flat: &mut Flattened,
) -> Result<Vec<Node>, SchemaDefinitionError> {
    let mut nodes = Vec::with_capacity(def.fields.len());

    for declared in &def.fields {
        let full = path::join(prefix, &declared.key);
        let template =
            lookup(&declared.type_name).ok_or_else(|| SchemaDefinitionError::UnknownType {
                path: full.clone(),
                type_name: declared.type_name.clone(),
            })?;

        let mut field = TypeDefinition::instantiate(&template, declared);
        if let Some(parent) = &declared.parent {
            let parent = lookup(parent).ok_or_else(|| SchemaDefinitionError::UnknownType {
                path: full.clone(),
                type_name: parent.clone(),
            })?;
            field.inherit(&parent);
        }
        install_reference_setter(&mut field);

        if let Some(direction) = field.index {
            let mut keys = Record::new();
            keys.insert(full.clone(), direction.as_i32());
            flat.indexes.push(IndexSpec {
                keys,
                unique: false,
            });
        }

        flat.order.push(full.clone());

        let node = match &field.subtype {
            Subtype::Object(child) => {
                let children = flatten(child, &full, lookup, flat)?;
                flat.indexes.extend(child.indexes.iter().map(|spec| IndexSpec {
                    keys: spec
                        .keys
                        .iter()
                        .map(|(k, v)| (path::join(&full, k), v.clone()))
                        .collect(),
                    unique: spec.unique,
                }));
                Node::Branch {
                    path: full.clone(),
                    children,
                }
            }
            Subtype::Array(child) => {
                flat.embedded
                    .insert(full.clone(), Arc::new(child.compile(lookup)?));
                Node::Leaf(full.clone())
            }
            _ => Node::Leaf(full.clone()),
        };

        flat.paths.insert(full, field);
        nodes.push(node);
    }

    Ok(nodes)
}

/// Normalizes reference values into `{collection, id}` pairs once the target is resolved.
///
/// Each compilation gets its own target, so resolving it never leaks into another registry
/// compiled from the same definition. The setter sits at the front of the chain so it runs
/// after every user setter.
fn install_reference_setter(field: &mut TypeDefinition) {
    field.subtype = match std::mem::take(&mut field.subtype) {
        Subtype::Reference(target) => {
            Subtype::Reference(Arc::new(ReferenceTarget::new(target.name())))
        }
        Subtype::ReferenceArray(target, style) => {
            Subtype::ReferenceArray(Arc::new(ReferenceTarget::new(target.name())), style)
        }
        other => other,
    };

    let setter = match &field.subtype {
        Subtype::Reference(target) => {
            let target = target.clone();
            Coercer::new(move |value| reference_pair(&target, value))
        }
        Subtype::ReferenceArray(target, ReferenceArrayStyle::Inline) => {
            let target = target.clone();
            Coercer::new(move |value| match value {
                Bson::Array(items) => items
                    .into_iter()
                    .map(|item| reference_pair(&target, item))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Bson::Array),
                single => reference_pair(&target, single),
            })
        }
        _ => return,
    };
    field.setters.insert(0, setter.clone());
    field.strict_setters.insert(0, setter);
}

fn reference_pair(target: &ReferenceTarget, value: Bson) -> Result<Bson, CoercionFailed> {
    let id = match value {
        Bson::Null => return Ok(Bson::Null),
        Bson::Document(doc) => doc
            .get("id")
            .or_else(|| doc.get("_id"))
            .cloned()
            .ok_or(CoercionFailed)?,
        Bson::String(s) => bson::oid::ObjectId::parse_str(&s)
            .map(Bson::ObjectId)
            .map_err(|_| CoercionFailed)?,
        other => other,
    };
    let collection = target.get().ok_or(CoercionFailed)?.collection.clone();
    Ok(Bson::Document(doc! { "collection": collection, "id": id }))
}

/// A compiled schema.
///
/// Immutable once compiled apart from memoized reference resolution; shared by every model
/// and document built from it.
pub struct Schema {
    name: String,
    collection: String,
    paths: HashMap<String, TypeDefinition>,
    order: Vec<String>,
    structure: Vec<Node>,
    embedded: HashMap<String, Arc<Schema>>,
    indexes: Vec<IndexSpec>,
    pipelines: HashMap<String, Arc<Pipeline>>,
    methods: HashMap<String, Method>,
    statics: HashMap<String, StaticFn>,
    is_embedded: bool,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("paths", &self.order)
            .field("embedded", &self.embedded.keys().collect::<Vec<_>>())
            .field("indexes", &self.indexes)
            .finish()
    }
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns `true` for anonymous schemas compiled for array elements.
    pub fn is_embedded(&self) -> bool {
        self.is_embedded
    }

    /// Looks up the type declared at an exact dotted path.
    pub fn path(&self, path: &str) -> Option<&TypeDefinition> {
        self.paths.get(path)
    }

    /// Every declared path, in declaration order (parents before their children).
    pub fn paths(&self) -> impl Iterator<Item = (&str, &TypeDefinition)> {
        self.order
            .iter()
            .filter_map(|p| self.paths.get(p).map(|def| (p.as_str(), def)))
    }

    pub fn structure(&self) -> &[Node] {
        &self.structure
    }

    /// Every leaf path, in declaration order.
    pub fn leaves(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.structure.iter().for_each(|node| node.leaves(&mut out));
        out
    }

    /// Every branch (embedded object) node, outermost first.
    pub fn branches(&self) -> Vec<&Node> {
        fn walk<'a>(nodes: &'a [Node], out: &mut Vec<&'a Node>) {
            for node in nodes {
                if let Node::Branch { children, .. } = node {
                    out.push(node);
                    walk(children, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.structure, &mut out);
        out
    }

    pub fn embedded(&self, path: &str) -> Option<&Arc<Schema>> {
        self.embedded.get(path)
    }

    /// Resolves a path to its type, dispatching into embedded array schemas.
    ///
    /// `cast.name` and `cast.0.name` both resolve to the `name` field of the schema embedded
    /// at `cast`.
    pub fn resolve(&self, path: &str) -> Option<&TypeDefinition> {
        if let Some(def) = self.paths.get(path) {
            return Some(def);
        }
        for ancestor in path::ancestors(path) {
            if let Some(schema) = self.embedded.get(ancestor) {
                let rest = &path[ancestor.len() + 1..];
                let rest = match rest.split_once('.') {
                    Some((head, tail)) if head.parse::<usize>().is_ok() => tail,
                    _ => rest,
                };
                return schema.resolve(rest);
            }
        }
        None
    }

    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    pub fn pipeline(&self, method: &str) -> Option<&Arc<Pipeline>> {
        self.pipelines.get(method)
    }

    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn static_fn(&self, name: &str) -> Option<&StaticFn> {
        self.statics.get(name)
    }

    /// Iterates over every reference target declared here or in embedded schemas.
    pub(crate) fn references(&self) -> Vec<(String, &ReferenceTarget)> {
        let mut out: Vec<(String, &ReferenceTarget)> = self
            .paths()
            .filter_map(|(p, def)| def.reference_target().map(|t| (p.to_string(), t)))
            .collect();
        for (prefix, schema) in &self.embedded {
            out.extend(
                schema
                    .references()
                    .into_iter()
                    .map(|(p, t)| (path::join(prefix, &p), t)),
            );
        }
        out
    }

    /// Every default declared on a leaf path, in declaration order.
    pub(crate) fn defaults(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.paths()
            .filter_map(|(p, def)| def.default().map(|value| (p, value)))
    }

    /// Returns `true` if `path` names a declared path or lies under a free-form leaf.
    pub(crate) fn accepts(&self, path: &str) -> bool {
        self.paths.contains_key(path)
            || path::ancestors(path).any(|a| {
                self.paths
                    .get(a)
                    .is_some_and(|def| !matches!(def.subtype, Subtype::Object(_)))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::builtin_types;

    fn lookup(name: &str) -> Option<TypeDefinition> {
        builtin_types().into_iter().find(|t| t.type_name == name)
    }

    fn person() -> SchemaDefinition {
        SchemaDefinition::new("Person")
            .string("name")
            .number("age")
            .index(IndexDirection::Desc)
            .object(
                "contact",
                SchemaDefinition::embedded()
                    .string("phone")
                    .index(IndexDirection::Asc)
                    .string("email"),
            )
            .array_of("pets", SchemaDefinition::embedded().string("name").number("age"))
    }

    #[test]
    fn object_paths_merge_and_arrays_embed() {
        let schema = person().compile(&lookup).unwrap();

        assert!(schema.path("contact.phone").is_some());
        assert!(schema.path("contact").is_some());
        assert!(schema.path("pets.name").is_none());
        assert!(schema.embedded("pets").is_some());
        assert_eq!(
            schema.leaves(),
            vec!["name", "age", "contact.phone", "contact.email", "pets"]
        );
        assert_eq!(schema.collection(), "person");
    }

    #[test]
    fn embedded_paths_resolve_through_the_element_schema() {
        let schema = person().compile(&lookup).unwrap();

        assert_eq!(schema.resolve("pets.age").map(|d| d.type_name()), Some("number"));
        assert_eq!(schema.resolve("pets.3.name").map(|d| d.type_name()), Some("string"));
        assert!(schema.resolve("pets.color").is_none());
    }

    #[test]
    fn indexes_are_collected_with_prefixes() {
        let schema = person()
            .add_index(doc! { "name": "asc", "age": -1 }, IndexOptions::unique())
            .unwrap()
            .compile(&lookup)
            .unwrap();

        let keys: Vec<_> = schema.indexes().iter().map(|i| (i.keys.clone(), i.unique)).collect();
        assert_eq!(
            keys,
            vec![
                (doc! { "age": -1 }, false),
                (doc! { "contact.phone": 1 }, false),
                (doc! { "name": 1, "age": -1 }, true),
            ]
        );
    }

    #[test]
    fn malformed_index_orders_are_rejected() {
        let err = SchemaDefinition::new("Bad")
            .string("name")
            .add_index(doc! { "name": "sideways" }, IndexOptions::default())
            .unwrap_err();

        assert_eq!(err, SchemaDefinitionError::InvalidIndexSpec("name".into()));
    }

    #[test]
    fn modifiers_need_a_field() {
        let err = SchemaDefinition::new("Empty")
            .required(true)
            .compile(&lookup)
            .unwrap_err();

        assert_eq!(err, SchemaDefinitionError::NoCurrentField("required".into()));
    }

    #[test]
    fn unknown_type_names_fail_compilation() {
        let err = SchemaDefinition::new("Odd")
            .field("mood", "feeling")
            .compile(&lookup)
            .unwrap_err();

        assert_eq!(
            err,
            SchemaDefinitionError::UnknownType {
                path: "mood".into(),
                type_name: "feeling".into()
            }
        );
    }

    #[test]
    fn plugins_extend_the_definition() {
        fn timestamps(schema: SchemaDefinition, options: &Bson) -> SchemaDefinition {
            let key = options.as_str().unwrap_or("updated");
            schema.date(key)
        }

        let schema = SchemaDefinition::new("Post")
            .string("title")
            .plugin(timestamps, &Bson::from("touched"))
            .compile(&lookup)
            .unwrap();

        assert_eq!(schema.path("touched").map(|d| d.type_name()), Some("date"));
    }
}
