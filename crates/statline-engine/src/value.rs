// Scalar values, result rows, and group keys shared by every engine stage.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A single cell as returned by the backing store or produced by a
/// calculator. Mirrors SQLite's storage classes minus BLOB.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value. Text is parsed leniently because per-event
    /// columns are frequently stored as strings by the ingestion pipeline.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) if r.is_nan() => None,
            Value::Real(r) => Some(*r),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Total order used for result sorting: numbers, then text, then NULL.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Integer(_) | Value::Real(_) => 0,
                Value::Text(_) => 1,
                Value::Null => 2,
            }
        }
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a, b) if rank(a) == 0 && rank(b) == 0 => {
                let (x, y) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
                x.total_cmp(&y)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<rusqlite::types::ValueRef<'_>> for Value {
    fn from(v: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

// ---------------------------------------------------------------------------
// Row
// ---------------------------------------------------------------------------

/// An ordered mapping from column name to value. Column order is the order
/// the store returned them in, followed by any fields merged in later.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_f64)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Insert or overwrite a field, keeping the original position when the
    /// column already exists.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keep exactly `columns`, in that order. Columns the row lacks come back
    /// as `Value::Null`.
    pub fn project(&self, columns: &[String]) -> Row {
        Row {
            fields: columns
                .iter()
                .map(|c| (c.clone(), self.get(c).cloned().unwrap_or_default()))
                .collect(),
        }
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// GroupKey
// ---------------------------------------------------------------------------

/// One component of a group key. Floats hash by bit pattern; integral reals
/// are normalized to integers so `2024` and `2024.0` land in the same group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Integer(i64),
    RealBits(u64),
    Text(String),
}

impl From<&Value> for KeyPart {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => KeyPart::Null,
            Value::Integer(i) => KeyPart::Integer(*i),
            Value::Real(r) if r.fract() == 0.0 && r.abs() < i64::MAX as f64 => {
                KeyPart::Integer(*r as i64)
            }
            Value::Real(r) => KeyPart::RealBits(r.to_bits()),
            Value::Text(s) => KeyPart::Text(s.clone()),
        }
    }
}

/// Ordered tuple of grouping-column values. Used as the merge key between
/// the two source result sets and as the partition key for raw rows.
///
/// NULL components compare equal to each other, so rows whose grouping
/// column is NULL still form (and join on) a single group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupKey {
    parts: Vec<KeyPart>,
}

impl GroupKey {
    /// Build the key for `row` over `columns`. A missing column contributes
    /// a NULL component.
    pub fn from_row(row: &Row, columns: &[String]) -> Self {
        GroupKey {
            parts: columns
                .iter()
                .map(|c| row.get(c).map(KeyPart::from).unwrap_or(KeyPart::Null))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.parts.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn insert_overwrites_in_place() {
        let mut r = row(&[("a", Value::Integer(1)), ("b", Value::Integer(2))]);
        r.insert("a", Value::Integer(10));
        r.insert("c", Value::Integer(3));
        assert_eq!(r.columns().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(r.get("a"), Some(&Value::Integer(10)));
    }

    #[test]
    fn project_fills_missing_with_null() {
        let r = row(&[("a", Value::Integer(1)), ("b", Value::Integer(2))]);
        let p = r.project(&["b".to_string(), "z".to_string()]);
        assert_eq!(p.columns().collect::<Vec<_>>(), vec!["b", "z"]);
        assert_eq!(p.get("z"), Some(&Value::Null));
    }

    #[test]
    fn text_numbers_parse_as_f64() {
        assert_eq!(Value::from("101.5").as_f64(), Some(101.5));
        assert_eq!(Value::from("n/a").as_f64(), None);
        assert_eq!(Value::Real(f64::NAN).as_f64(), None);
    }

    #[test]
    fn sort_puts_nulls_last() {
        let mut v = vec![
            Value::Null,
            Value::from("b"),
            Value::Real(2.5),
            Value::Integer(1),
            Value::from("a"),
        ];
        v.sort_by(Value::sort_cmp);
        assert_eq!(
            v,
            vec![
                Value::Integer(1),
                Value::Real(2.5),
                Value::from("a"),
                Value::from("b"),
                Value::Null
            ]
        );
    }

    #[test]
    fn group_key_normalizes_integral_reals() {
        let cols = vec!["season".to_string()];
        let a = GroupKey::from_row(&row(&[("season", Value::Integer(2024))]), &cols);
        let b = GroupKey::from_row(&row(&[("season", Value::Real(2024.0))]), &cols);
        assert_eq!(a, b);
    }

    #[test]
    fn group_key_nulls_match_each_other() {
        let cols = vec!["team_name".to_string()];
        let a = GroupKey::from_row(&row(&[("team_name", Value::Null)]), &cols);
        let b = GroupKey::from_row(&Row::new(), &cols);
        assert_eq!(a, b);
    }

    #[test]
    fn row_serializes_as_ordered_object() {
        let r = row(&[("name", Value::from("Ohtani")), ("hits", Value::Integer(150))]);
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, r#"{"name":"Ohtani","hits":150}"#);
    }
}
