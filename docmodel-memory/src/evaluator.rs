//! Filter evaluation for in-memory records.
//!
//! Filters use the Mongo query shape that compiled models produce: a document of
//! `path: value` equality conditions and `path: { $op: operand }` operator conditions,
//! combined with `$and`, `$or` and `$nor`. Dotted paths descend into embedded documents and
//! fan out across arrays, and a condition holds when any reached value satisfies it.

use std::cmp::Ordering;
use bson::{Bson, Document, DateTime, oid::ObjectId};

use docmodel_core::{
    error::{StorageError, StorageResult},
    path,
};

/// Comparable view over a BSON value.
///
/// All numeric representations collapse to `f64` so that `Int32(3)`, `Int64(3)` and
/// `Double(3.0)` compare equal. Values without a natural ordering are kept as `Other` and
/// only ever compared for equality.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(Vec<(&'a str, Comparable<'a>)>),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(items) => Comparable::Array(items.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::Other(_) => 5,
            Comparable::ObjectId(_) => 6,
            Comparable::Bool(_) => 7,
            Comparable::DateTime(_) => 8,
        }
    }

    /// Total order used for sorting: type rank first, then value.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Number(a), Comparable::Number(b)) => a.total_cmp(b),
            _ => self
                .partial_cmp(other)
                .unwrap_or_else(|| self.rank().cmp(&other.rank())),
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Collects every value reachable from `value` by following `segments`.
///
/// Arrays are traversed implicitly: a non-numeric segment applied to an array continues into
/// each of its document elements.
fn reach<'a>(value: &'a Bson, segments: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Bson::Document(doc) => {
            if let Some(child) = doc.get(*head) {
                reach(child, rest, out);
            }
        }
        Bson::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    reach(item, rest, out);
                }
            }
            for item in items {
                if matches!(item, Bson::Document(_)) {
                    reach(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

fn values_at<'a>(record: &'a Document, path: &str) -> Vec<&'a Bson> {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut out = Vec::new();

    if let Some((head, rest)) = segments.split_first() {
        if let Some(value) = record.get(*head) {
            reach(value, rest, &mut out);
        }
    }

    out
}

/// Returns `true` if `candidate`, or any element of it when it is an array, satisfies `test`.
fn any_member(candidate: &Bson, test: &impl Fn(&Comparable<'_>) -> bool) -> bool {
    let whole = Comparable::from(candidate);
    if test(&whole) {
        return true;
    }
    match whole {
        Comparable::Array(items) => items.iter().any(test),
        _ => false,
    }
}

fn equals(candidates: &[&Bson], operand: &Bson) -> bool {
    if candidates.is_empty() {
        return matches!(operand, Bson::Null);
    }
    let expected = Comparable::from(operand);
    candidates
        .iter()
        .any(|candidate| any_member(candidate, &|value| *value == expected))
}

fn compare(candidates: &[&Bson], operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let expected = Comparable::from(operand);
    candidates.iter().any(|candidate| {
        any_member(candidate, &|value| {
            value.partial_cmp(&expected).is_some_and(accept)
        })
    })
}

fn operand_array<'a>(op: &str, operand: &'a Bson) -> StorageResult<&'a Vec<Bson>> {
    operand
        .as_array()
        .ok_or_else(|| StorageError::Backend(format!("{op} requires an array, got {operand}")))
}

fn operand_document<'a>(op: &str, operand: &'a Bson) -> StorageResult<&'a Document> {
    operand
        .as_document()
        .ok_or_else(|| StorageError::Backend(format!("{op} requires a document, got {operand}")))
}

fn is_operator_document(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => doc.keys().next().is_some_and(|key| key.starts_with('$')),
        _ => false,
    }
}

/// Evaluates an operator document such as `{ $gt: 3, $lt: 9 }` against the values at a path.
fn evaluate_operators(candidates: &[&Bson], operators: &Document) -> StorageResult<bool> {
    for (op, operand) in operators {
        let holds = match op.as_str() {
            "$eq" => equals(candidates, operand),
            "$ne" => !equals(candidates, operand),
            "$gt" => compare(candidates, operand, Ordering::is_gt),
            "$gte" => compare(candidates, operand, Ordering::is_ge),
            "$lt" => compare(candidates, operand, Ordering::is_lt),
            "$lte" => compare(candidates, operand, Ordering::is_le),
            "$in" => operand_array(op, operand)?
                .iter()
                .any(|value| equals(candidates, value)),
            "$nin" => !operand_array(op, operand)?
                .iter()
                .any(|value| equals(candidates, value)),
            "$all" => {
                let values = operand_array(op, operand)?;
                !values.is_empty() && values.iter().all(|value| equals(candidates, value))
            }
            "$exists" => {
                let should_exist = match operand {
                    Bson::Boolean(b) => *b,
                    other => !matches!(Comparable::from(other), Comparable::Number(n) if n == 0.0),
                };
                candidates.is_empty() != should_exist
            }
            "$size" => {
                let expected = match Comparable::from(operand) {
                    Comparable::Number(n) => n,
                    _ => return Err(StorageError::Backend(format!("$size requires a number, got {operand}"))),
                };
                candidates.iter().any(|candidate| {
                    matches!(candidate, Bson::Array(items) if items.len() as f64 == expected)
                })
            }
            "$not" => !evaluate_operators(candidates, operand_document(op, operand)?)?,
            "$elemMatch" => {
                let condition = operand_document(op, operand)?;
                let mut found = false;
                for candidate in candidates {
                    if let Bson::Array(items) = candidate {
                        for item in items {
                            if element_matches(item, condition)? {
                                found = true;
                                break;
                            }
                        }
                    }
                    if found {
                        break;
                    }
                }
                found
            }
            other => {
                return Err(StorageError::Backend(format!(
                    "operator {other} is not supported by the in-memory store"
                )));
            }
        };

        if !holds {
            return Ok(false);
        }
    }

    Ok(true)
}

fn element_matches(item: &Bson, condition: &Document) -> StorageResult<bool> {
    if condition.keys().next().is_some_and(|key| key.starts_with('$'))
        && !condition.contains_key("$and")
        && !condition.contains_key("$or")
        && !condition.contains_key("$nor")
    {
        return evaluate_operators(&[item], condition);
    }
    match item {
        Bson::Document(doc) => matches(doc, condition),
        _ => Ok(false),
    }
}

fn each_clause<'a>(op: &str, operand: &'a Bson) -> StorageResult<Vec<&'a Document>> {
    operand_array(op, operand)?
        .iter()
        .map(|clause| operand_document(op, clause))
        .collect()
}

/// Returns `true` if `record` satisfies every condition in `filter`.
pub(crate) fn matches(record: &Document, filter: &Document) -> StorageResult<bool> {
    for (key, condition) in filter {
        let holds = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in each_clause(key, condition)? {
                    if !matches(record, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in each_clause(key, condition)? {
                    if matches(record, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in each_clause(key, condition)? {
                    if matches(record, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            field => {
                let candidates = values_at(record, field);
                match condition {
                    Bson::Document(operators) if is_operator_document(condition) => {
                        evaluate_operators(&candidates, operators)?
                    }
                    _ => equals(&candidates, condition),
                }
            }
        };

        if !holds {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Applies a `{path: 0 | 1}` projection to `record`.
///
/// Inclusive projections keep `_id` unless it is explicitly excluded.
pub(crate) fn project(record: &Document, projection: &Document) -> Document {
    let truthy = |value: &Bson| match value {
        Bson::Boolean(b) => *b,
        other => !matches!(Comparable::from(other), Comparable::Number(n) if n == 0.0),
    };

    let inclusive = projection
        .iter()
        .filter(|(key, _)| key.as_str() != "_id")
        .any(|(_, value)| truthy(value));

    if inclusive {
        let mut projected = Document::new();
        let keep_id = projection.get("_id").is_none_or(truthy);
        if keep_id {
            if let Some(id) = record.get("_id") {
                projected.insert("_id", id.clone());
            }
        }
        for (key, value) in projection {
            if key == "_id" || !truthy(value) {
                continue;
            }
            if let Some(found) = path::get(record, key) {
                path::set(&mut projected, key, found.clone());
            }
        }
        projected
    } else {
        let mut projected = record.clone();
        for (key, value) in projection {
            if !truthy(value) {
                path::remove(&mut projected, key);
            }
        }
        projected
    }
}

/// Orders two records by a `{path: 1 | -1}` sort specification.
pub(crate) fn sort_order(left: &Document, right: &Document, sort: &Document) -> Ordering {
    for (key, direction) in sort {
        let descending = matches!(Comparable::from(direction), Comparable::Number(n) if n < 0.0);
        let left_value = path::get(left, key).map(Comparable::from).unwrap_or(Comparable::Null);
        let right_value = path::get(right, key).map(Comparable::from).unwrap_or(Comparable::Null);

        let ordering = left_value.sort_cmp(&right_value);
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn dog() -> Document {
        doc! {
            "name": "Rex",
            "age": 4,
            "tags": ["loyal", "loud"],
            "owner": { "name": "Ada", "city": "Lisbon" },
            "toys": [ { "kind": "ball", "worn": true }, { "kind": "rope", "worn": false } ],
        }
    }

    #[test]
    fn equality_descends_paths_and_arrays() {
        let record = dog();

        assert!(matches(&record, &doc! { "owner.city": "Lisbon" }).unwrap());
        assert!(matches(&record, &doc! { "tags": "loud" }).unwrap());
        assert!(matches(&record, &doc! { "toys.kind": "rope" }).unwrap());
        assert!(matches(&record, &doc! { "age": 4.0 }).unwrap());
        assert!(!matches(&record, &doc! { "owner.city": "Porto" }).unwrap());
        assert!(matches(&record, &doc! { "missing": Bson::Null }).unwrap());
    }

    #[test]
    fn comparison_and_set_operators() {
        let record = dog();

        assert!(matches(&record, &doc! { "age": { "$gt": 3, "$lte": 4 } }).unwrap());
        assert!(!matches(&record, &doc! { "age": { "$lt": 4 } }).unwrap());
        assert!(matches(&record, &doc! { "name": { "$in": ["Rex", "Fido"] } }).unwrap());
        assert!(matches(&record, &doc! { "name": { "$nin": ["Fido"] } }).unwrap());
        assert!(matches(&record, &doc! { "tags": { "$all": ["loud", "loyal"] } }).unwrap());
        assert!(matches(&record, &doc! { "tags": { "$size": 2 } }).unwrap());
        assert!(matches(&record, &doc! { "vet": { "$exists": false } }).unwrap());
        assert!(matches(&record, &doc! { "age": { "$not": { "$gt": 10 } } }).unwrap());
        assert!(matches(&record, &doc! { "toys": { "$elemMatch": { "kind": "ball", "worn": true } } }).unwrap());
        assert!(!matches(&record, &doc! { "toys": { "$elemMatch": { "kind": "rope", "worn": true } } }).unwrap());
    }

    #[test]
    fn logical_combinators() {
        let record = dog();

        assert!(matches(&record, &doc! { "$or": [ { "age": 9 }, { "name": "Rex" } ] }).unwrap());
        assert!(!matches(&record, &doc! { "$and": [ { "age": 4 }, { "name": "Fido" } ] }).unwrap());
        assert!(matches(&record, &doc! { "$nor": [ { "age": 9 } ] }).unwrap());
    }

    #[test]
    fn unsupported_operators_are_reported() {
        let err = matches(&dog(), &doc! { "name": { "$regex": "^R" } }).unwrap_err();
        assert!(matches!(err, StorageError::Backend(_)));
    }

    #[test]
    fn projections_keep_or_drop_paths() {
        let record = dog();
        let record_with_id = {
            let mut r = record.clone();
            r.insert("_id", 7);
            r
        };

        assert_eq!(
            project(&record_with_id, &doc! { "name": 1, "owner.city": 1 }),
            doc! { "_id": 7, "name": "Rex", "owner": { "city": "Lisbon" } }
        );
        assert_eq!(
            project(&record_with_id, &doc! { "name": true, "_id": 0 }),
            doc! { "name": "Rex" }
        );

        let excluded = project(&record, &doc! { "toys": 0, "owner.name": 0 });
        assert!(excluded.get("toys").is_none());
        assert_eq!(excluded.get_document("owner").unwrap(), &doc! { "city": "Lisbon" });
    }

    #[test]
    fn sorting_mixes_types_by_rank() {
        let a = doc! { "v": 2 };
        let b = doc! { "v": "two" };
        let c = doc! {};

        assert_eq!(sort_order(&a, &b, &doc! { "v": 1 }), Ordering::Less);
        assert_eq!(sort_order(&c, &a, &doc! { "v": 1 }), Ordering::Less);
        assert_eq!(sort_order(&a, &b, &doc! { "v": -1 }), Ordering::Greater);
    }

    #[test]
    fn nan_sorts_after_every_other_number() {
        let mut records = vec![
            doc! { "v": 3 },
            doc! { "v": f64::NAN },
            doc! { "v": 1.5 },
            doc! { "v": f64::INFINITY },
        ];
        records.sort_by(|l, r| sort_order(l, r, &doc! { "v": 1 }));

        let values = records
            .iter()
            .map(|r| Comparable::from(r.get("v").unwrap()))
            .map(|c| match c {
                Comparable::Number(n) => n,
                other => panic!("expected a number, got {other:?}"),
            })
            .collect::<Vec<_>>();
        assert_eq!(values[..3], [1.5, 3.0, f64::INFINITY]);
        assert!(values[3].is_nan());
    }
}
