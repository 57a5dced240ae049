use super::StoreError;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Characters the Realtime Database refuses in keys.
const FORBIDDEN: [char; 5] = ['.', '$', '#', '[', ']'];

/// Slash-separated location in the snapshot tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StorePath(Vec<String>);

impl StorePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse `a/b/c`. Leading and trailing slashes are ignored.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            validate_segment(raw, segment)?;
            segments.push(segment.to_string());
        }
        Ok(Self(segments))
    }

    /// Build from a compile-time layout constant. Segments are not validated.
    pub fn from_static(raw: &'static str) -> Self {
        Self(
            raw.split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn child(&self, segment: &str) -> Result<Self, StoreError> {
        validate_segment(segment, segment)?;
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Ok(Self(segments))
    }

    pub fn join(&self, other: &StorePath) -> Self {
        let mut segments = self.0.clone();
        segments.extend(other.0.iter().cloned());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// True when one path is an ancestor of (or equal to) the other, i.e. a
    /// write at one can change the value seen at the other.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }
}

fn validate_segment(raw: &str, segment: &str) -> Result<(), StoreError> {
    if segment.is_empty() {
        return Err(StoreError::InvalidPath {
            path: raw.to_string(),
            reason: "empty segment",
        });
    }
    if segment.contains(FORBIDDEN) || segment.contains('/') {
        return Err(StoreError::InvalidPath {
            path: raw.to_string(),
            reason: "segment contains a forbidden character",
        });
    }
    Ok(())
}

impl FromStr for StorePath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// Drop nulls and empty objects the way the database does on write.
/// Returns `None` when nothing storable is left.
pub(crate) fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(Value::Object(cleaned))
            }
        }
        other => Some(other),
    }
}

/// Value stored at `path`, `None` when absent.
pub(crate) fn value_at<'a>(root: &'a Value, path: &StorePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.segments() {
        node = node.as_object()?.get(segment)?;
    }
    match node {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        other => Some(other),
    }
}

/// Write `value` at `path`, creating intermediate objects. `None` removes the
/// node and prunes parents left empty.
pub(crate) fn write_at(root: &mut Value, path: &StorePath, value: Option<Value>) {
    match value.and_then(normalize) {
        Some(value) => insert_at(root, path.segments(), value),
        None => remove_at(root, path.segments()),
    }
}

fn insert_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        insert_at(child, rest, value);
    }
}

fn remove_at(node: &mut Value, segments: &[String]) {
    let Some((head, rest)) = segments.split_first() else {
        *node = Value::Null;
        return;
    };
    if let Value::Object(map) = node {
        if rest.is_empty() {
            map.remove(head);
        } else if let Some(child) = map.get_mut(head) {
            remove_at(child, rest);
            if is_empty(child) {
                map.remove(head);
            }
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
