use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A property value. Kept as an explicit tagged enum rather than a bare
/// `serde_json::Value` re-export so callers pattern-match instead of probing
/// JSON types by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<PropertyValue>),
    Object(BTreeMap<String, PropertyValue>),
    Invalid,
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, PropertyValue::Invalid)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

/// Dotted-path addressing into a property tree, e.g. `"detail.user.name"`.
/// Kept as a typed newtype (rather than raw `&str` everywhere) so rule
/// tables and schema lookups share one parsing rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyPath(String);

impl PropertyPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|s| !s.is_empty())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PropertyPath {
    fn from(s: &str) -> Self {
        PropertyPath::new(s)
    }
}

impl From<String> for PropertyPath {
    fn from(s: String) -> Self {
        PropertyPath::new(s)
    }
}

/// A flat table of top-level properties. Nested access beyond one path
/// segment is resolved by mutating/reading the `Object` variant directly;
/// this mirrors the original's "properties are one JSON document addressed
/// by dotted path" model without requiring a zipper type.
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Reads a dotted path out of a property map, descending into nested
/// `Object`/`Array` values as needed. Returns `None` if any segment is
/// missing or the value isn't a container where one is required.
pub fn get_property<'a>(map: &'a PropertyMap, path: &PropertyPath) -> Option<&'a PropertyValue> {
    let mut segments = path.segments();
    let first = segments.next()?;
    let mut current = map.get(first)?;
    for seg in segments {
        match current {
            PropertyValue::Object(obj) => current = obj.get(seg)?,
            PropertyValue::Array(arr) => {
                let idx: usize = seg.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Writes a dotted path into a property map, creating intermediate `Object`
/// nodes as needed. Array-index segments are not auto-vivified (arrays must
/// already exist at that depth).
pub fn set_property(map: &mut PropertyMap, path: &PropertyPath, value: PropertyValue) {
    let mut segments: Vec<&str> = path.segments().collect();
    if segments.is_empty() {
        return;
    }
    let first = segments.remove(0);
    if segments.is_empty() {
        map.insert(first.to_string(), value);
        return;
    }
    let entry = map
        .entry(first.to_string())
        .or_insert_with(|| PropertyValue::Object(BTreeMap::new()));
    set_nested(entry, &segments, value);
}

fn set_nested(current: &mut PropertyValue, segments: &[&str], value: PropertyValue) {
    if !matches!(current, PropertyValue::Object(_)) {
        *current = PropertyValue::Object(BTreeMap::new());
    }
    let PropertyValue::Object(obj) = current else {
        unreachable!()
    };
    let (head, rest) = (segments[0], &segments[1..]);
    if rest.is_empty() {
        obj.insert(head.to_string(), value);
        return;
    }
    let entry = obj
        .entry(head.to_string())
        .or_insert_with(|| PropertyValue::Object(BTreeMap::new()));
    set_nested(entry, rest, value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_conversions() {
        let v: PropertyValue = "hi".into();
        assert_eq!(v.as_str(), Some("hi"));
        let v: PropertyValue = 42i64.into();
        assert_eq!(v.as_int(), Some(42));
    }

    #[test]
    fn set_then_get_nested_path() {
        let mut map = PropertyMap::new();
        set_property(&mut map, &"detail.user.name".into(), "ada".into());
        let got = get_property(&map, &"detail.user.name".into());
        assert_eq!(got.and_then(|v| v.as_str()), Some("ada"));
    }

    #[test]
    fn get_missing_path_is_none() {
        let map = PropertyMap::new();
        assert!(get_property(&map, &"nope".into()).is_none());
    }

    #[test]
    fn set_overwrites_scalar_with_object_path() {
        let mut map = PropertyMap::new();
        map.insert("detail".to_string(), PropertyValue::Int(1));
        set_property(&mut map, &"detail.nested".into(), true.into());
        let got = get_property(&map, &"detail.nested".into());
        assert_eq!(got.and_then(|v| v.as_bool()), Some(true));
    }
}
