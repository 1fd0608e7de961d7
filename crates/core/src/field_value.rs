use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::ids::RecordId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(i64),
    Reference(RecordId),
    Bytes(Vec<u8>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Reference(a), Self::Reference(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

/// Storage class as the relational store sees it.
enum Class<'a> {
    Null,
    Numeric(f64, Option<i64>),
    Text(&'a str),
    Blob(&'a [u8]),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) | FieldValue::Timestamp(n) => Some(*n),
            FieldValue::Reference(id) => Some(id.get()),
            FieldValue::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Interprets the value as a reference to another record. `Null` is a
    /// valid "no reference" and maps to `Some(None)`.
    pub fn as_reference(&self) -> Option<Option<RecordId>> {
        match self {
            FieldValue::Null => Some(None),
            FieldValue::Reference(id) => Some(Some(*id)),
            FieldValue::Integer(n) => Some(Some(RecordId::new(*n))),
            _ => None,
        }
    }

    fn class(&self) -> Class<'_> {
        match self {
            FieldValue::Null => Class::Null,
            FieldValue::Float(f) => Class::Numeric(*f, None),
            FieldValue::Text(s) => Class::Text(s),
            FieldValue::Bytes(b) => Class::Blob(b),
            other => {
                let n = other.as_integer().unwrap_or_default();
                Class::Numeric(n as f64, Some(n))
            }
        }
    }

    /// Ordering used for sibling sort keys. Mirrors SQLite's `ORDER BY`:
    /// NULL first, then numbers, then text, then blobs.
    pub fn order_cmp(&self, other: &Self) -> Ordering {
        fn rank(c: &Class<'_>) -> u8 {
            match c {
                Class::Null => 0,
                Class::Numeric(..) => 1,
                Class::Text(_) => 2,
                Class::Blob(_) => 3,
            }
        }
        let (a, b) = (self.class(), other.class());
        match (&a, &b) {
            (Class::Numeric(_, Some(x)), Class::Numeric(_, Some(y))) => x.cmp(y),
            (Class::Numeric(x, _), Class::Numeric(y, _)) => x.total_cmp(y),
            (Class::Text(x), Class::Text(y)) => x.cmp(y),
            (Class::Blob(x), Class::Blob(y)) => x.cmp(y),
            _ => rank(&a).cmp(&rank(&b)),
        }
    }
}

impl From<RecordId> for FieldValue {
    fn from(id: RecordId) -> Self {
        FieldValue::Reference(id)
    }
}

impl From<Option<RecordId>> for FieldValue {
    fn from(id: Option<RecordId>) -> Self {
        id.map_or(FieldValue::Null, FieldValue::Reference)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_follows_storage_classes() {
        let sorted = [
            FieldValue::Null,
            FieldValue::Integer(-3),
            FieldValue::Float(2.5),
            FieldValue::Integer(3),
            FieldValue::Text("a".into()),
            FieldValue::Text("b".into()),
            FieldValue::Bytes(vec![0]),
        ];
        for pair in sorted.windows(2) {
            assert_eq!(pair[0].order_cmp(&pair[1]), Ordering::Less, "{pair:?}");
        }
    }

    #[test]
    fn null_and_integers_are_references() {
        assert_eq!(FieldValue::Null.as_reference(), Some(None));
        assert_eq!(FieldValue::Integer(7).as_reference(), Some(Some(RecordId::new(7))));
        assert_eq!(FieldValue::Text("7".into()).as_reference(), None);
    }
}
