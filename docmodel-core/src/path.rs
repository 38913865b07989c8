//! Dotted-path helpers over BSON records.
//!
//! Paths use `.` as separator (`contact.phone`). Numeric segments index into arrays, so
//! `cast.0.name` addresses the first element of `cast`.

use bson::{Bson, Document};

/// Joins a parent path and a key, treating an empty parent as the root.
pub fn join(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Returns `true` if `path` equals `ancestor` or lies underneath it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    path == ancestor
        || (path.len() > ancestor.len()
            && path.starts_with(ancestor)
            && path.as_bytes()[ancestor.len()] == b'.')
}

/// Iterates over the proper ancestors of `path`, nearest first.
///
/// `a.b.c` yields `a.b` then `a`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.char_indices()
        .rev()
        .filter(|(_, c)| *c == '.')
        .map(move |(i, _)| &path[..i])
}

/// Looks up the value at a dotted path.
pub fn get<'a>(record: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Looks up a mutable reference to the value at a dotted path.
pub fn get_mut<'a>(record: &'a mut Document, path: &str) -> Option<&'a mut Bson> {
    let mut segments = path.split('.');
    let mut current = record.get_mut(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(doc) => doc.get_mut(segment)?,
            Bson::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Writes `value` at a dotted path, creating intermediate documents as needed.
///
/// Numeric segments index into existing arrays, padding with nulls past the end. Any other
/// intermediate value that is not a document is replaced by an empty one. Returns `false`,
/// leaving the record untouched, when a non-numeric segment meets an array.
pub fn set(record: &mut Document, path: &str, value: Bson) -> bool {
    match path.split_once('.') {
        None => {
            record.insert(path, value);
            true
        }
        Some((head, rest)) => {
            if !matches!(record.get(head), Some(Bson::Document(_) | Bson::Array(_))) {
                record.insert(head, Document::new());
            }
            match record.get_mut(head) {
                Some(child) => set_within(child, rest, value),
                None => false,
            }
        }
    }
}

fn set_within(target: &mut Bson, path: &str, value: Bson) -> bool {
    let items = match target {
        Bson::Document(doc) => return set(doc, path, value),
        Bson::Array(items) => items,
        _ => return false,
    };
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let Ok(index) = head.parse::<usize>() else {
        return false;
    };
    if items.len() <= index {
        items.resize(index + 1, Bson::Null);
    }
    let Some(slot) = items.get_mut(index) else {
        return false;
    };

    match rest {
        None => {
            *slot = value;
            true
        }
        Some(rest) => {
            if !matches!(slot, Bson::Document(_) | Bson::Array(_)) {
                *slot = Bson::Document(Document::new());
            }
            set_within(slot, rest, value)
        }
    }
}

/// Removes the value at a dotted path, returning it if present.
///
/// An array element is replaced by null rather than removed, so later indexes stay put.
pub fn remove(record: &mut Document, path: &str) -> Option<Bson> {
    match path.rsplit_once('.') {
        None => record.remove(path),
        Some((parent, key)) => match get_mut(record, parent)? {
            Bson::Document(doc) => doc.remove(key),
            Bson::Array(items) => {
                let slot = items.get_mut(key.parse::<usize>().ok()?)?;
                Some(std::mem::replace(slot, Bson::Null))
            }
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn nested_get_and_set() {
        let mut record = doc! { "contact": { "phone": "555" } };

        assert_eq!(get(&record, "contact.phone"), Some(&Bson::from("555")));
        assert_eq!(get(&record, "contact.email"), None);

        set(&mut record, "contact.email", Bson::from("a@b.c"));
        set(&mut record, "name.first", Bson::from("Ada"));

        assert_eq!(
            record,
            doc! {
                "contact": { "phone": "555", "email": "a@b.c" },
                "name": { "first": "Ada" },
            }
        );
    }

    #[test]
    fn array_segments_index_elements() {
        let record = doc! { "cast": [{ "name": "A" }, { "name": "B" }] };

        assert_eq!(get(&record, "cast.1.name"), Some(&Bson::from("B")));
        assert_eq!(get(&record, "cast.2.name"), None);
    }

    #[test]
    fn array_segments_write_into_elements() {
        let mut record = doc! {
            "tags": ["a", "b"],
            "cast": [{ "name": "A" }, { "name": "B" }],
        };

        assert!(set(&mut record, "tags.0", Bson::from("z")));
        assert!(set(&mut record, "tags.3", Bson::from("d")));
        assert!(set(&mut record, "cast.1.name", Bson::from("C")));
        assert!(!set(&mut record, "cast.first", Bson::from("X")));

        assert_eq!(
            record,
            doc! {
                "tags": ["z", "b", Bson::Null, "d"],
                "cast": [{ "name": "A" }, { "name": "C" }],
            }
        );

        assert_eq!(remove(&mut record, "tags.1"), Some(Bson::from("b")));
        assert_eq!(remove(&mut record, "cast.0.name"), Some(Bson::from("A")));
        assert_eq!(remove(&mut record, "tags.9"), None);
        assert_eq!(
            record,
            doc! {
                "tags": ["z", Bson::Null, Bson::Null, "d"],
                "cast": [{}, { "name": "C" }],
            }
        );
    }

    #[test]
    fn ancestry() {
        assert!(is_within("contact.phone", "contact"));
        assert!(is_within("contact", "contact"));
        assert!(!is_within("contacts", "contact"));
        assert_eq!(ancestors("a.b.c").collect::<Vec<_>>(), vec!["a.b", "a"]);
    }
}
