//! Field type definitions: coercion chains, validators, defaults and index directives.
//!
//! A [`TypeDefinition`] describes how one field behaves. The registry holds a template per
//! type name (`string`, `number`, ...); declaring a field clones the template and lets the
//! declaration append its own getters, setters and validators on top.
//!
//! # Chain order
//!
//! Setter chains execute last-added-first, so the most specific override runs nearest the
//! raw value. When a type extends a parent, the parent's chains are spliced *before* the
//! child's, which means the child's setters run first and the parent's last.
//!
//! ```ignore
//! use docmodel::types::{Coercer, TypeDefinition};
//!
//! let email = TypeDefinition::new("email")
//!     .extend("string")
//!     .set(Coercer::new(|value| match value {
//!         bson::Bson::String(s) => Ok(bson::Bson::String(s.to_lowercase())),
//!         other => Ok(other),
//!     }));
//! ```

use bson::{Bson, oid::ObjectId, spec::BinarySubtype};
use futures::future::{BoxFuture, FutureExt};
use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{error::SchemaDefinitionError, schema::SchemaDefinition};

/// Marker returned by a coercer that cannot convert its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionFailed;

/// A pure value transformation used in getter and setter chains.
#[derive(Clone)]
pub struct Coercer(Arc<dyn Fn(Bson) -> Result<Bson, CoercionFailed> + Send + Sync>);

impl Coercer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Bson) -> Result<Bson, CoercionFailed> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wraps an infallible transformation.
    pub fn map<F>(f: F) -> Self
    where
        F: Fn(Bson) -> Bson + Send + Sync + 'static,
    {
        Self::new(move |value| Ok(f(value)))
    }

    pub fn apply(&self, value: Bson) -> Result<Bson, CoercionFailed> {
        (self.0)(value)
    }
}

impl fmt::Debug for Coercer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Coercer")
    }
}

/// An asynchronous predicate over a field value.
#[derive(Clone)]
pub struct Validator(Arc<dyn Fn(Bson) -> BoxFuture<'static, bool> + Send + Sync>);

impl Validator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Bson) -> BoxFuture<'static, bool> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wraps a synchronous predicate.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Bson) -> bool + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |value| {
            let f = f.clone();
            async move { f(&value) }.boxed()
        })
    }

    pub async fn check(&self, value: Bson) -> bool {
        (self.0)(value).await
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator")
    }
}

/// Sort direction of an index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    Asc,
    Desc,
}

impl IndexDirection {
    /// Normalizes a raw order value. Accepts `"asc"`, `"desc"`, `1` and `-1`.
    pub fn parse(order: &Bson) -> Option<Self> {
        match order {
            Bson::String(s) if s == "asc" => Some(IndexDirection::Asc),
            Bson::String(s) if s == "desc" => Some(IndexDirection::Desc),
            Bson::Int32(1) | Bson::Int64(1) => Some(IndexDirection::Asc),
            Bson::Int32(-1) | Bson::Int64(-1) => Some(IndexDirection::Desc),
            Bson::Double(d) if *d == 1.0 => Some(IndexDirection::Asc),
            Bson::Double(d) if *d == -1.0 => Some(IndexDirection::Desc),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            IndexDirection::Asc => 1,
            IndexDirection::Desc => -1,
        }
    }
}

/// Structural tag of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    Object,
    Array,
    Reference,
    ReferenceArray,
}

/// How a reference array is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReferenceArrayStyle {
    /// An inline array of `{collection, id}` pairs on the owning record.
    #[default]
    Inline,
    /// Not stored on the owner; resolved by querying the target collection for records whose
    /// `foreign_key` reference points back at the owner.
    Reverse { foreign_key: String },
}

/// A reference target, named at declaration time and resolved once every schema is registered.
#[derive(Debug)]
pub struct ReferenceTarget {
    name: String,
    resolved: OnceLock<ResolvedTarget>,
}

/// The memoized result of resolving a [`ReferenceTarget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub model: String,
    pub collection: String,
}

impl ReferenceTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resolved: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resolved target, or `None` while resolution has not happened yet.
    pub fn get(&self) -> Option<&ResolvedTarget> {
        self.resolved.get()
    }

    /// Resolves the target at most once; later calls return the memoized value.
    pub fn resolve_with<F>(&self, f: F) -> Option<&ResolvedTarget>
    where
        F: FnOnce(&str) -> Option<ResolvedTarget>,
    {
        if let Some(target) = self.resolved.get() {
            return Some(target);
        }
        let target = f(&self.name)?;
        Some(self.resolved.get_or_init(|| target))
    }
}

/// What a field is composed of, beyond its own value.
///
/// Object and array compositions are deliberately separate variants: an object merges the
/// nested paths into the parent's flat path table, an array keeps the nested schema as an
/// independently compiled embedded type.
#[derive(Debug, Clone, Default)]
pub enum Subtype {
    #[default]
    None,
    Object(Arc<SchemaDefinition>),
    Array(Arc<SchemaDefinition>),
    Reference(Arc<ReferenceTarget>),
    ReferenceArray(Arc<ReferenceTarget>, ReferenceArrayStyle),
}

/// Describes one field's behavior.
#[derive(Debug, Clone)]
pub struct TypeDefinition {
    pub(crate) type_name: String,
    pub(crate) kind: FieldKind,
    pub(crate) key: String,
    pub(crate) subtype: Subtype,
    pub(crate) parent: Option<String>,
    pub(crate) getters: Vec<Coercer>,
    pub(crate) setters: Vec<Coercer>,
    pub(crate) strict_setters: Vec<Coercer>,
    pub(crate) cast_set: Option<Coercer>,
    pub(crate) validators: Vec<(String, Validator)>,
    pub(crate) required: bool,
    pub(crate) strict: bool,
    pub(crate) default_value: Option<Bson>,
    pub(crate) index: Option<IndexDirection>,
    pub(crate) atomic: bool,
}

impl TypeDefinition {
    /// Creates an empty scalar type template named `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            kind: FieldKind::Scalar,
            key: String::new(),
            subtype: Subtype::None,
            parent: None,
            getters: Vec::new(),
            setters: Vec::new(),
            strict_setters: Vec::new(),
            cast_set: None,
            validators: Vec::new(),
            required: false,
            strict: false,
            default_value: None,
            index: None,
            atomic: false,
        }
    }

    pub(crate) fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    /// Declares that this type inherits from the registered type `parent`.
    ///
    /// The parent's chains are spliced in when the type is registered.
    pub fn extend(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn get(mut self, coercer: Coercer) -> Self {
        self.getters.push(coercer);
        self
    }

    pub fn set(mut self, coercer: Coercer) -> Self {
        self.setters.push(coercer);
        self
    }

    pub fn set_strict(mut self, coercer: Coercer) -> Self {
        self.strict_setters.push(coercer);
        self
    }

    /// Sets the final transform applied after the setter chain.
    pub fn cast_set(mut self, coercer: Coercer) -> Self {
        self.cast_set = Some(coercer);
        self
    }

    pub fn validate(mut self, name: impl Into<String>, validator: Validator) -> Self {
        self.add_validator(name.into(), validator);
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn default_value(mut self, value: impl Into<Bson>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn index(mut self, direction: IndexDirection) -> Self {
        self.index = Some(direction);
        self
    }

    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    pub(crate) fn add_validator(&mut self, name: String, validator: Validator) {
        match self.validators.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = validator,
            None => self.validators.push((name, validator)),
        }
    }

    /// Splices `parent`'s chains in front of this type's own chains.
    ///
    /// Validators are inherited unless this type already defines one with the same name;
    /// index, default and strictness are inherited when unset here.
    pub(crate) fn inherit(&mut self, parent: &TypeDefinition) {
        self.kind = parent.kind;
        self.getters = parent.getters.iter().cloned().chain(self.getters.drain(..)).collect();
        self.setters = parent.setters.iter().cloned().chain(self.setters.drain(..)).collect();
        self.strict_setters = parent
            .strict_setters
            .iter()
            .cloned()
            .chain(self.strict_setters.drain(..))
            .collect();

        for (name, validator) in &parent.validators {
            if !self.validators.iter().any(|(n, _)| n == name) {
                self.validators.push((name.clone(), validator.clone()));
            }
        }

        if self.cast_set.is_none() {
            self.cast_set = parent.cast_set.clone();
        }
        if self.index.is_none() {
            self.index = parent.index;
        }
        if self.default_value.is_none() {
            self.default_value = parent.default_value.clone();
        }
        self.required |= parent.required;
        self.strict |= parent.strict;
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn subtype(&self) -> &Subtype {
        &self.subtype
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    pub fn default(&self) -> Option<&Bson> {
        self.default_value.as_ref()
    }

    pub fn index_direction(&self) -> Option<IndexDirection> {
        self.index
    }

    pub fn validators(&self) -> impl Iterator<Item = (&str, &Validator)> {
        self.validators.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Returns the reference target of a reference or reference-array field.
    pub fn reference_target(&self) -> Option<&ReferenceTarget> {
        match &self.subtype {
            Subtype::Reference(target) | Subtype::ReferenceArray(target, _) => Some(target),
            _ => None,
        }
    }

    /// The setter chain selected by the field's strictness.
    pub fn active_setters(&self) -> &[Coercer] {
        if self.strict {
            &self.strict_setters
        } else {
            &self.setters
        }
    }

    /// Runs the active setter chain last-declared-first, then the cast-set transform.
    ///
    /// A failing setter short-circuits the chain; the error carries the original value.
    pub fn cast(&self, path: &str, value: Bson) -> Result<Bson, crate::error::CastError> {
        let original = value.clone();
        let mut value = value;

        for setter in self.active_setters().iter().rev() {
            value = setter.apply(value).map_err(|CoercionFailed| {
                crate::error::CastError::new(path, original.clone(), self.type_name.clone())
            })?;
        }

        if let Some(cast_set) = &self.cast_set {
            value = cast_set.apply(value).map_err(|CoercionFailed| {
                crate::error::CastError::new(path, original.clone(), self.type_name.clone())
            })?;
        }

        Ok(value)
    }

    /// Runs the getter chain in declaration order.
    ///
    /// Getters that fail leave the value as the previous getter produced it.
    pub fn read(&self, value: Bson) -> Bson {
        self.getters
            .iter()
            .fold(value, |value, getter| match getter.apply(value.clone()) {
                Ok(next) => next,
                Err(CoercionFailed) => value,
            })
    }

    /// Produces the per-field definition from a registered template.
    pub(crate) fn instantiate(template: &TypeDefinition, declared: &TypeDefinition) -> Self {
        let mut field = declared.clone();
        field.parent = Some(template.type_name.clone());
        field.inherit(template);
        field.type_name = template.type_name.clone();
        field
    }
}

/// Names of the builtin types registered in every [`Registry`](crate::registry::Registry).
pub mod builtin {
    pub const STRING: &str = "string";
    pub const NUMBER: &str = "number";
    pub const BOOLEAN: &str = "boolean";
    pub const DATE: &str = "date";
    pub const OID: &str = "oid";
    pub const UUID: &str = "uuid";
    pub const OBJECT: &str = "object";
    pub const ARRAY: &str = "array";
    pub const REFERENCE: &str = "reference";
    pub const REFERENCE_ARRAY: &str = "reference_array";
}

fn cast_string(value: Bson) -> Result<Bson, CoercionFailed> {
    match value {
        Bson::String(_) | Bson::Null => Ok(value),
        Bson::Int32(n) => Ok(Bson::String(n.to_string())),
        Bson::Int64(n) => Ok(Bson::String(n.to_string())),
        Bson::Double(n) => Ok(Bson::String(n.to_string())),
        Bson::Boolean(b) => Ok(Bson::String(b.to_string())),
        Bson::ObjectId(oid) => Ok(Bson::String(oid.to_hex())),
        _ => Err(CoercionFailed),
    }
}

fn cast_number(value: Bson) -> Result<Bson, CoercionFailed> {
    match value {
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Null => Ok(value),
        Bson::Boolean(b) => Ok(Bson::Int32(b as i32)),
        Bson::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i32>() {
                Ok(Bson::Int32(n))
            } else if let Ok(n) = s.parse::<i64>() {
                Ok(Bson::Int64(n))
            } else {
                s.parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(Bson::Double)
                    .ok_or(CoercionFailed)
            }
        }
        _ => Err(CoercionFailed),
    }
}

fn cast_boolean(value: Bson) -> Result<Bson, CoercionFailed> {
    match value {
        Bson::Boolean(_) | Bson::Null => Ok(value),
        Bson::Int32(n) => Ok(Bson::Boolean(n != 0)),
        Bson::Int64(n) => Ok(Bson::Boolean(n != 0)),
        Bson::String(s) => match s.as_str() {
            "true" | "1" => Ok(Bson::Boolean(true)),
            "false" | "0" | "" => Ok(Bson::Boolean(false)),
            _ => Err(CoercionFailed),
        },
        _ => Err(CoercionFailed),
    }
}

fn cast_date(value: Bson) -> Result<Bson, CoercionFailed> {
    match value {
        Bson::DateTime(_) | Bson::Null => Ok(value),
        Bson::Int64(ms) => Ok(Bson::DateTime(bson::DateTime::from_millis(ms))),
        Bson::Int32(ms) => Ok(Bson::DateTime(bson::DateTime::from_millis(ms as i64))),
        Bson::Double(ms) if ms.is_finite() => {
            Ok(Bson::DateTime(bson::DateTime::from_millis(ms as i64)))
        }
        Bson::String(s) => match s.parse::<i64>() {
            Ok(ms) => Ok(Bson::DateTime(bson::DateTime::from_millis(ms))),
            Err(_) => chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| Bson::DateTime(bson::DateTime::from_chrono(dt)))
                .map_err(|_| CoercionFailed),
        },
        _ => Err(CoercionFailed),
    }
}

fn cast_oid(value: Bson) -> Result<Bson, CoercionFailed> {
    match value {
        Bson::ObjectId(_) | Bson::Null => Ok(value),
        Bson::String(s) => ObjectId::parse_str(&s)
            .map(Bson::ObjectId)
            .map_err(|_| CoercionFailed),
        _ => Err(CoercionFailed),
    }
}

fn cast_uuid(value: Bson) -> Result<Bson, CoercionFailed> {
    match value {
        Bson::Binary(ref binary) if binary.subtype == BinarySubtype::Uuid => Ok(value),
        Bson::Null => Ok(value),
        Bson::String(s) => uuid::Uuid::parse_str(&s)
            .map(|id| Bson::from(bson::Uuid::from(id)))
            .map_err(|_| CoercionFailed),
        _ => Err(CoercionFailed),
    }
}

/// Accepts a `{collection, id}` pair, a bare id, or a full target record carrying `_id`.
fn cast_reference(value: Bson) -> Result<Bson, CoercionFailed> {
    match value {
        Bson::Null | Bson::ObjectId(_) => Ok(value),
        Bson::String(ref s) => ObjectId::parse_str(s)
            .map(Bson::ObjectId)
            .map_err(|_| CoercionFailed),
        Bson::Document(ref doc) if doc.contains_key("id") || doc.contains_key("_id") => Ok(value),
        _ => Err(CoercionFailed),
    }
}

fn strict_kind(matches: fn(&Bson) -> bool) -> Coercer {
    Coercer::new(move |value| {
        if matches!(value, Bson::Null) || matches(&value) {
            Ok(value)
        } else {
            Err(CoercionFailed)
        }
    })
}

/// Builds the builtin type templates.
pub(crate) fn builtin_types() -> Vec<TypeDefinition> {
    vec![
        TypeDefinition::new(builtin::STRING)
            .set(Coercer::new(cast_string))
            .set_strict(strict_kind(|v| matches!(v, Bson::String(_)))),
        TypeDefinition::new(builtin::NUMBER)
            .set(Coercer::new(cast_number))
            .set_strict(strict_kind(|v| {
                matches!(v, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
            })),
        TypeDefinition::new(builtin::BOOLEAN)
            .set(Coercer::new(cast_boolean))
            .set_strict(strict_kind(|v| matches!(v, Bson::Boolean(_)))),
        TypeDefinition::new(builtin::DATE)
            .set(Coercer::new(cast_date))
            .set_strict(strict_kind(|v| matches!(v, Bson::DateTime(_)))),
        TypeDefinition::new(builtin::OID)
            .set(Coercer::new(cast_oid))
            .set_strict(strict_kind(|v| matches!(v, Bson::ObjectId(_)))),
        TypeDefinition::new(builtin::UUID)
            .set(Coercer::new(cast_uuid))
            .set_strict(strict_kind(|v| {
                matches!(v, Bson::Binary(b) if b.subtype == BinarySubtype::Uuid)
            })),
        TypeDefinition::new(builtin::OBJECT).with_kind(FieldKind::Object),
        TypeDefinition::new(builtin::ARRAY).with_kind(FieldKind::Array),
        TypeDefinition::new(builtin::REFERENCE)
            .with_kind(FieldKind::Reference)
            .set(Coercer::new(cast_reference)),
        TypeDefinition::new(builtin::REFERENCE_ARRAY).with_kind(FieldKind::ReferenceArray),
    ]
}

/// Returns an error unless `parent` exists, then splices it into `child`.
pub(crate) fn resolve_parent(
    child: &mut TypeDefinition,
    lookup: impl Fn(&str) -> Option<TypeDefinition>,
) -> Result<(), SchemaDefinitionError> {
    if let Some(parent_name) = child.parent.clone() {
        let parent = lookup(&parent_name).ok_or_else(|| {
            SchemaDefinitionError::InvalidType(
                child.type_name.clone(),
                format!("parent type {parent_name} is not registered"),
            )
        })?;
        child.inherit(&parent);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn template(name: &str) -> TypeDefinition {
        builtin_types()
            .into_iter()
            .find(|t| t.type_name == name)
            .unwrap()
    }

    #[test]
    fn setters_run_last_added_first() {
        let def = TypeDefinition::new("tagged")
            .set(Coercer::map(|v| Bson::String(format!("{}a", v.as_str().unwrap_or_default()))))
            .set(Coercer::map(|v| Bson::String(format!("{}b", v.as_str().unwrap_or_default()))));

        assert_eq!(def.cast("tag", Bson::from("")).unwrap(), Bson::from("ba"));
    }

    #[test]
    fn parent_chains_run_after_child_setters() {
        let mut child = TypeDefinition::new("shout")
            .set(Coercer::map(|v| match v {
                Bson::String(s) => Bson::String(s.to_uppercase()),
                other => other,
            }))
            .extend("string");
        resolve_parent(&mut child, |_| Some(template("string"))).unwrap();

        // child uppercases first, then the inherited string setter runs
        assert_eq!(child.cast("x", Bson::from("abc")).unwrap(), Bson::from("ABC"));
        // numbers are stringified by the parent setter after the child passes them through
        assert_eq!(child.cast("x", Bson::Int32(7)).unwrap(), Bson::from("7"));
    }

    #[test]
    fn failing_setter_short_circuits() {
        let err = template("number").cast("age", Bson::from("abc")).unwrap_err();

        assert_eq!(err.path, "age");
        assert_eq!(err.value, Bson::from("abc"));
        assert_eq!(err.target_type, "number");
    }

    #[test]
    fn strict_fields_use_the_strict_chain() {
        let strict = template("number").strict(true);

        assert!(strict.cast("age", Bson::from("33")).is_err());
        assert_eq!(strict.cast("age", Bson::Int32(33)).unwrap(), Bson::Int32(33));
    }

    #[test]
    fn cast_set_runs_after_the_chain() {
        let def = template("string").cast_set(Coercer::map(|v| match v {
            Bson::String(s) => Bson::String(s.trim().to_string()),
            other => other,
        }));

        assert_eq!(def.cast("name", Bson::from("  Ada ")).unwrap(), Bson::from("Ada"));
    }

    #[test]
    fn inherited_validators_yield_to_overrides() {
        let parent = TypeDefinition::new("base")
            .validate("short", Validator::sync(|_| true))
            .validate("nonempty", Validator::sync(|_| true))
            .index(IndexDirection::Desc)
            .default_value("x");
        let mut child = TypeDefinition::new("child")
            .validate("short", Validator::sync(|_| false))
            .extend("base");
        resolve_parent(&mut child, |_| Some(parent.clone())).unwrap();

        let names: Vec<_> = child.validators().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["short", "nonempty"]);
        assert_eq!(child.index_direction(), Some(IndexDirection::Desc));
        assert_eq!(child.default(), Some(&Bson::from("x")));
    }

    #[test]
    fn unknown_parent_is_a_definition_error() {
        let mut child = TypeDefinition::new("orphan").extend("missing");

        assert!(matches!(
            resolve_parent(&mut child, |_| None),
            Err(SchemaDefinitionError::InvalidType(..))
        ));
    }

    #[test]
    fn index_direction_accepts_the_four_spellings() {
        assert_eq!(IndexDirection::parse(&Bson::from("asc")), Some(IndexDirection::Asc));
        assert_eq!(IndexDirection::parse(&Bson::from("desc")), Some(IndexDirection::Desc));
        assert_eq!(IndexDirection::parse(&Bson::Int32(1)), Some(IndexDirection::Asc));
        assert_eq!(IndexDirection::parse(&Bson::Int32(-1)), Some(IndexDirection::Desc));
        assert_eq!(IndexDirection::parse(&Bson::Int32(2)), None);
        assert_eq!(IndexDirection::parse(&Bson::from("up")), None);
    }

    #[test]
    fn reference_target_resolves_once() {
        let target = ReferenceTarget::new("Dog");
        let first = target
            .resolve_with(|name| {
                Some(ResolvedTarget { model: name.into(), collection: "dogs".into() })
            })
            .cloned();
        let second = target.resolve_with(|_| None).cloned();

        assert_eq!(first, second);
        assert_eq!(target.get().map(|t| t.collection.as_str()), Some("dogs"));
    }

    fn arb_scalar() -> impl Strategy<Value = Bson> {
        prop_oneof![
            any::<i32>().prop_map(Bson::Int32),
            any::<i64>().prop_map(Bson::Int64),
            any::<bool>().prop_map(Bson::Boolean),
            "[a-z0-9 ]{0,8}".prop_map(Bson::String),
            "-?[0-9]{1,12}".prop_map(Bson::String),
            (-1.0e9f64..1.0e9).prop_map(Bson::Double),
            Just(Bson::Null),
        ]
    }

    proptest! {
        #[test]
        fn scalar_casts_are_idempotent(
            value in arb_scalar(),
            name in prop_oneof![
                Just(builtin::STRING),
                Just(builtin::NUMBER),
                Just(builtin::BOOLEAN),
                Just(builtin::DATE),
            ],
        ) {
            let def = template(name);
            if let Ok(once) = def.cast("p", value) {
                prop_assert_eq!(def.cast("p", once.clone()).unwrap(), once);
            }
        }
    }
}
