use std::fmt;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

mod memory;
pub use memory::*;

mod firestore;
pub use firestore::*;

/// The field map of a document, minus its id
pub type Fields = Map<String, Value>;
pub type Result<T> = std::result::Result<T, StoreError>;

/// The collections this service reads and writes
pub mod collections {
    pub const APPS: &str = "apps";
    pub const REQUESTED_APPS: &str = "requested_apps";
    pub const USERNAMES: &str = "usernames";
    pub const USER_ROLES: &str = "user_roles";
    pub const TAGS: &str = "tags";
    pub const PLATFORMS: &str = "platforms";
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The remote store failed or was unreachable
    #[error("Remote store failure: {0}")]
    Remote(String),
    /// A document in the store doesn't exist
    #[error("{collection}:{id} doesn't exist")]
    NotFound {
        collection: &'static str,
        id: String,
    },
    /// A document could not be converted to or from its typed form
    #[error("Malformed document: {0}")]
    Malformed(String),
}

/// A raw document as stored: a store-assigned id plus a field map
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    /// Converts the document into a typed record, exposing the id as an
    /// `id` field
    pub fn decode<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));

        serde_json::from_value(Value::Object(fields)).map_err(|e| StoreError::Malformed(e.to_string()))
    }
}

/// Serializes a record into a document field map, dropping any `id` field
/// since the id lives outside the fields
pub fn encode<T>(value: &T) -> Result<Fields>
where
    T: Serialize,
{
    match serde_json::to_value(value) {
        Ok(Value::Object(mut fields)) => {
            fields.remove("id");
            Ok(fields)
        }
        Ok(_) => Err(StoreError::Malformed("expected a map-like record".to_string())),
        Err(e) => Err(StoreError::Malformed(e.to_string())),
    }
}

/// A dotted path to a field, used to address keys of nested map fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(field: &str) -> Self {
        Self(field.to_string())
    }

    /// Descends into a map field by key
    pub fn key(mut self, key: &str) -> Self {
        self.0.push('.');
        self.0.push_str(key);
        self
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single field change within an atomic document update
#[derive(Debug, Clone)]
pub enum FieldMutation {
    Set(FieldPath, Value),
    Remove(FieldPath),
}

impl FieldMutation {
    pub fn path(&self) -> &FieldPath {
        match self {
            Self::Set(path, _) => path,
            Self::Remove(path) => path,
        }
    }
}

/// A write within an atomic batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Creates or replaces a document under a caller-chosen id
    Put {
        collection: &'static str,
        id: String,
        fields: Fields,
    },
    /// Applies field mutations to an existing document
    Update {
        collection: &'static str,
        id: String,
        mutations: Vec<FieldMutation>,
    },
    Delete {
        collection: &'static str,
        id: String,
    },
}

/// An equality or membership condition on a single field
#[derive(Debug, Clone)]
pub enum Filter {
    Equal(&'static str, Value),
    ArrayContains(&'static str, Value),
}

/// Represents a type that can fetch and mutate appdex documents
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_all(&self, collection: &'static str) -> Result<Vec<Document>>;
    async fn get(&self, collection: &'static str, id: &str) -> Result<Document>;
    async fn query(&self, collection: &'static str, filter: Filter) -> Result<Vec<Document>>;
    /// Adds a document with a store-assigned id
    async fn add(&self, collection: &'static str, fields: Fields) -> Result<Document>;
    /// Applies a batch of writes atomically. Either every write lands or
    /// none do.
    async fn apply(&self, writes: Vec<WriteOp>) -> Result<()>;
    async fn delete(&self, collection: &'static str, id: &str) -> Result<()>;
}

/// Sets a dotted path within a field map, creating intermediate maps as
/// needed
pub(crate) fn set_path(fields: &mut Fields, path: &FieldPath, value: Value) {
    let segments: Vec<_> = path.segments().collect();
    let mut current = fields;

    for segment in &segments[..segments.len() - 1] {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }

        current = entry.as_object_mut().expect("entry is an object");
    }

    current.insert(segments[segments.len() - 1].to_string(), value);
}

/// Removes a dotted path from a field map, if present
pub(crate) fn remove_path(fields: &mut Fields, path: &FieldPath) {
    let segments: Vec<_> = path.segments().collect();
    let mut current = fields;

    for segment in &segments[..segments.len() - 1] {
        match current.get_mut(*segment).and_then(Value::as_object_mut) {
            Some(next) => current = next,
            None => return,
        }
    }

    current.remove(segments[segments.len() - 1]);
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::{remove_path, set_path, FieldPath, Fields};

    #[test]
    fn test_set_path_creates_nested_maps() {
        let mut fields = Fields::new();

        set_path(&mut fields, &FieldPath::new("ratings").key("u1"), json!(4));
        set_path(&mut fields, &FieldPath::new("ratings").key("u2"), json!(5));

        assert_eq!(fields["ratings"], json!({ "u1": 4, "u2": 5 }));
    }

    #[test]
    fn test_remove_path_leaves_siblings() {
        let mut fields = Fields::new();
        set_path(&mut fields, &FieldPath::new("reviews").key("u1"), json!("a"));
        set_path(&mut fields, &FieldPath::new("reviews").key("u2"), json!("b"));

        remove_path(&mut fields, &FieldPath::new("reviews").key("u1"));

        assert_eq!(fields["reviews"], json!({ "u2": "b" }));
    }

    #[test]
    fn test_remove_path_missing_is_noop() {
        let mut fields = Fields::new();
        set_path(&mut fields, &FieldPath::new("name"), json!("Foo"));

        remove_path(&mut fields, &FieldPath::new("ratings").key("u1"));

        assert_eq!(fields["name"], json!("Foo"));
    }

    #[test]
    fn test_field_path_display() {
        assert_eq!(FieldPath::new("ratings").key("u1").to_string(), "ratings.u1");
    }
}
