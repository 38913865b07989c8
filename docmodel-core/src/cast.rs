//! Query casting: coerce every leaf of a raw query through its field's setter chain.
//!
//! The walk descends into nested plain documents, accumulating a dotted path. Keys starting
//! with `$` are operators: they are leaves attached to the parent path rather than a path
//! segment of their own. A leaf whose path has no declared type is left untouched.
//!
//! Casting is leaf-atomic. The first failure aborts the walk with a [`CastError`]; the
//! failing leaf keeps its raw value, and siblings cast before it stay cast.

use bson::{Bson, Document as Record};
use tracing::trace;

use crate::{error::CastError, path, schema::Schema};

/// Operators whose operand is a list of values of the field's type.
const LIST_OPERATORS: &[&str] = &["$in", "$nin", "$all"];

/// Operators whose operand is not a value of the field's type.
const OPAQUE_OPERATORS: &[&str] = &[
    "$exists", "$size", "$type", "$regex", "$options", "$mod", "$where", "$text",
];

/// Operators whose operand is itself a query (or list of queries) on the same path.
const NESTED_OPERATORS: &[&str] = &["$not", "$elemMatch", "$and", "$or", "$nor"];

/// Casts `query` in place against `schema`.
///
/// # Errors
///
/// Returns the first [`CastError`] raised by a setter chain.
pub fn cast_query(schema: &Schema, query: &mut Record) -> Result<(), CastError> {
    walk(schema, "", query)
}

fn walk(schema: &Schema, prefix: &str, query: &mut Record) -> Result<(), CastError> {
    for (key, value) in query.iter_mut() {
        if key.starts_with('$') {
            cast_operator(schema, prefix, key, value)?;
            continue;
        }

        let full = path::join(prefix, key);
        match value {
            Bson::Document(nested) if !is_value(schema, &full, nested) => {
                walk(schema, &full, nested)?
            }
            leaf => cast_leaf(schema, &full, leaf)?,
        }
    }
    Ok(())
}

/// A nested document is cast as a whole value when the path is a typed leaf and the document
/// holds no operators; otherwise the walk descends into it.
fn is_value(schema: &Schema, path: &str, nested: &Record) -> bool {
    let has_operator = nested.keys().any(|k| k.starts_with('$'));
    !has_operator && schema.path(path).is_some_and(|def| def.reference_target().is_some())
}

fn cast_operator(
    schema: &Schema,
    prefix: &str,
    operator: &str,
    operand: &mut Bson,
) -> Result<(), CastError> {
    if OPAQUE_OPERATORS.contains(&operator) {
        return Ok(());
    }

    if NESTED_OPERATORS.contains(&operator) {
        return match operand {
            Bson::Document(nested) => walk(schema, prefix, nested),
            Bson::Array(items) => items.iter_mut().try_for_each(|item| match item {
                Bson::Document(nested) => walk(schema, prefix, nested),
                _ => Ok(()),
            }),
            _ => Ok(()),
        };
    }

    if prefix.is_empty() {
        return Ok(());
    }

    if LIST_OPERATORS.contains(&operator) {
        if let Bson::Array(items) = operand {
            return items
                .iter_mut()
                .try_for_each(|item| cast_leaf(schema, prefix, item));
        }
    }

    cast_leaf(schema, prefix, operand)
}

fn cast_leaf(schema: &Schema, path: &str, value: &mut Bson) -> Result<(), CastError> {
    let Some(def) = schema.resolve(path) else {
        trace!(target: "docmodel::query", path, "no declared type, leaving leaf as is");
        return Ok(());
    };

    *value = def.cast(path, value.clone())?;
    Ok(())
}
