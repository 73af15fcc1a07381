//! Flattening of backend listings into a single JSON document.
//!
//! Consul returns a set of `path -> bytes` pairs under a prefix; Vault returns
//! one structured object. Both end up as a [`Document`]: a flat map from string
//! key to JSON value whose serialized bytes are what `get` and every watch
//! snapshot carry.

use crate::errors::Result;
use crate::store::KvPair;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Separator between segments of a hierarchical key.
pub const PATH_SEPARATOR: char = '/';
/// Separator between segments of a flattened key.
pub const KEY_SEPARATOR: &str = ".";

/// Flat key/value document produced by one successful read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wire form: one JSON object.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Parse a wire payload back into a document.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self(serde_json::from_slice(bytes)?))
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Key of `path` relative to `prefix`, with `/` replaced by `.`.
///
/// Returns `None` when `path` is not below `prefix` (including keys that only
/// share a string prefix, such as `app/dbx` under `app/db`), when nothing is
/// left once the prefix is removed, or when `path` is a folder placeholder
/// (ends with `/`) at any depth.
pub fn relative_key(prefix: &str, path: &str) -> Option<String> {
    let prefix = prefix.trim_end_matches(PATH_SEPARATOR);
    let rest = path.strip_prefix(prefix)?;

    let rest = if prefix.is_empty() {
        rest
    } else {
        rest.strip_prefix(PATH_SEPARATOR)?
    };

    if rest.is_empty() || rest.ends_with(PATH_SEPARATOR) {
        return None;
    }

    Some(rest.split(PATH_SEPARATOR).collect::<Vec<_>>().join(KEY_SEPARATOR))
}

/// Decode `raw` as JSON, falling back to its text.
pub fn decode_value(raw: &[u8]) -> Value {
    match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(raw).into_owned()),
    }
}

/// Flatten a prefix listing.
///
/// Each pair below `prefix` contributes one entry. Two paths that flatten to
/// the same key (`a/b` and `a.b`) resolve last-write-wins in listing order.
pub fn normalize_pairs<'a, I>(prefix: &str, pairs: I) -> Document
where
    I: IntoIterator<Item = &'a KvPair>,
{
    let mut document = Document::new();
    for pair in pairs {
        let Some(key) = relative_key(prefix, &pair.key) else {
            tracing::trace!(key = %pair.key, prefix = %prefix, "Skipping key outside prefix");
            continue;
        };

        if document.insert(key.clone(), decode_value(&pair.value)).is_some() {
            tracing::debug!(key = %key, "Flattened key collision, keeping last value");
        }
    }
    document
}
