//! Partial hydration: which declared paths of a document are currently populated.
//!
//! A stored record may be fetched with a field projection. The projection decides which
//! leaves become hydrated, and a branch (embedded object) counts as hydrated only when every
//! one of its declared leaves is. Reading an unhydrated path is therefore distinguishable
//! from reading a path that is hydrated but empty.

use bson::{Bson, Document as Record};
use std::collections::HashSet;

use crate::{
    path,
    schema::{Node, Schema},
};

/// A normalized field projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Every declared path is hydrated.
    All,
    /// Only the listed paths (and everything under them) are hydrated.
    Include(Vec<String>),
    /// Everything except the listed paths (and everything under them) is hydrated.
    Exclude(Vec<String>),
}

impl Projection {
    /// Normalizes a raw `{path: bool}` projection against `schema`.
    ///
    /// The first entry's truthiness fixes the polarity of the whole projection; later
    /// entries that disagree with it are dropped. Paths the schema does not declare (such as
    /// `_id`) are ignored entirely and never decide the polarity.
    pub fn parse(schema: &Schema, fields: Option<&Record>) -> Self {
        let mut polarity = None;
        let mut listed = Vec::new();

        for (key, value) in fields.into_iter().flatten() {
            if !schema.accepts(key) {
                continue;
            }
            let include = truthy(value);
            match polarity {
                None => polarity = Some(include),
                Some(expected) if expected != include => continue,
                Some(_) => {}
            }
            listed.push(key.clone());
        }

        match polarity {
            None => Projection::All,
            Some(true) => Projection::Include(listed),
            Some(false) => Projection::Exclude(listed),
        }
    }

    /// Returns the projection to hand to the storage client, if any.
    ///
    /// Undeclared entries of `fields` follow the declared ones. Under an inclusive projection
    /// inclusions and an `_id` exclusion pass through; otherwise only exclusions do. They
    /// never change which declared paths come back.
    pub fn to_document(&self, schema: &Schema, fields: Option<&Record>) -> Option<Record> {
        let (mut projection, inclusive) = match self {
            Projection::All => (Record::new(), false),
            Projection::Include(paths) => (flagged(paths, 1), true),
            Projection::Exclude(paths) => (flagged(paths, 0), false),
        };

        for (key, value) in fields.into_iter().flatten() {
            if schema.accepts(key) || projection.contains_key(key) {
                continue;
            }
            let include = truthy(value);
            let passes = if inclusive { include || key == "_id" } else { !include };
            if passes {
                projection.insert(key.clone(), value.clone());
            }
        }

        (!projection.is_empty()).then_some(projection)
    }

    fn hydrates(&self, leaf: &str) -> bool {
        match self {
            Projection::All => true,
            Projection::Include(paths) => paths.iter().any(|p| path::is_within(leaf, p)),
            Projection::Exclude(paths) => !paths
                .iter()
                .any(|p| path::is_within(leaf, p) || path::is_within(p, leaf)),
        }
    }
}

fn flagged(paths: &[String], flag: i32) -> Record {
    paths.iter().map(|p| (p.clone(), Bson::Int32(flag))).collect()
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0,
        Bson::Null => false,
        _ => true,
    }
}

/// The set of hydrated leaf and branch paths of one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HydrationTracker {
    hydrated: HashSet<String>,
}

impl HydrationTracker {
    /// A tracker with every declared path hydrated.
    pub fn full(schema: &Schema) -> Self {
        Self::from_projection(schema, &Projection::All)
    }

    pub fn from_projection(schema: &Schema, projection: &Projection) -> Self {
        let mut tracker = Self::default();
        for leaf in schema.leaves() {
            if projection.hydrates(leaf) {
                tracker.hydrated.insert(leaf.to_string());
            }
        }
        tracker.recompute_branches(schema);
        tracker
    }

    /// Returns `true` if `path` is hydrated.
    ///
    /// Paths below a hydrated leaf (for example `tags.0` or `meta.source` under a free-form
    /// field) are hydrated along with it.
    pub fn hydrated(&self, path: &str) -> bool {
        self.hydrated.contains(path) || path::ancestors(path).any(|a| self.hydrated.contains(a))
    }

    /// Marks `path` and every declared leaf under it as hydrated.
    pub(crate) fn mark(&mut self, schema: &Schema, path: &str) {
        let mut marked = false;
        for leaf in schema.leaves() {
            if path::is_within(leaf, path) {
                self.hydrated.insert(leaf.to_string());
                marked = true;
            }
        }
        if marked {
            self.recompute_branches(schema);
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.hydrated.iter().map(String::as_str)
    }

    fn recompute_branches(&mut self, schema: &Schema) {
        for branch in schema.branches() {
            let mut leaves = Vec::new();
            branch.leaves(&mut leaves);
            let complete = leaves.iter().all(|leaf| self.hydrated.contains(*leaf));
            match branch {
                Node::Branch { path, .. } if complete => {
                    self.hydrated.insert(path.clone());
                }
                node => {
                    self.hydrated.remove(node.path());
                }
            }
        }
    }
}
