use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{
    remove_path, set_path, Document, FieldMutation, Fields, Filter, Result, Store, StoreError,
    WriteOp,
};
use crate::util::random_string;

type Collections = HashMap<&'static str, BTreeMap<String, Fields>>;

/// An in-memory store implementation for tests and local development.
///
/// Batches apply under a single write lock, so they are atomic the same
/// way a remote commit is.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    operations: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of store calls made so far, so tests can assert that
    /// validation failures never reach the store
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    fn record(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_all(&self, collection: &'static str) -> Result<Vec<Document>> {
        self.record();

        let collections = self.collections.read();
        let documents = collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(documents)
    }

    async fn get(&self, collection: &'static str, id: &str) -> Result<Document> {
        self.record();

        let collections = self.collections.read();
        collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            })
            .ok_or(StoreError::NotFound {
                collection,
                id: id.to_string(),
            })
    }

    async fn query(&self, collection: &'static str, filter: Filter) -> Result<Vec<Document>> {
        self.record();

        let collections = self.collections.read();
        let documents = collections
            .get(collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|(_, fields)| matches_filter(fields, &filter))
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(documents)
    }

    async fn add(&self, collection: &'static str, fields: Fields) -> Result<Document> {
        self.record();

        let id = random_string(20);
        let mut collections = self.collections.write();

        collections
            .entry(collection)
            .or_default()
            .insert(id.clone(), fields.clone());

        Ok(Document { id, fields })
    }

    async fn apply(&self, writes: Vec<WriteOp>) -> Result<()> {
        self.record();

        let mut collections = self.collections.write();

        // Updates require an existing document. Check the whole batch
        // before touching anything so a failing batch applies nothing.
        for write in &writes {
            if let WriteOp::Update { collection, id, .. } = write {
                let exists = collections
                    .get(collection)
                    .map(|documents| documents.contains_key(id))
                    .unwrap_or(false);

                if !exists {
                    return Err(StoreError::NotFound {
                        collection: *collection,
                        id: id.clone(),
                    });
                }
            }
        }

        for write in writes {
            match write {
                WriteOp::Put {
                    collection,
                    id,
                    fields,
                } => {
                    collections.entry(collection).or_default().insert(id, fields);
                }
                WriteOp::Update {
                    collection,
                    id,
                    mutations,
                } => {
                    let fields = collections
                        .get_mut(collection)
                        .and_then(|documents| documents.get_mut(&id))
                        .expect("existence checked above");

                    for mutation in mutations {
                        match mutation {
                            FieldMutation::Set(path, value) => set_path(fields, &path, value),
                            FieldMutation::Remove(path) => remove_path(fields, &path),
                        }
                    }
                }
                WriteOp::Delete { collection, id } => {
                    if let Some(documents) = collections.get_mut(collection) {
                        documents.remove(&id);
                    }
                }
            }
        }

        Ok(())
    }

    async fn delete(&self, collection: &'static str, id: &str) -> Result<()> {
        self.record();

        let mut collections = self.collections.write();

        if let Some(documents) = collections.get_mut(collection) {
            documents.remove(id);
        }

        Ok(())
    }
}

fn matches_filter(fields: &Fields, filter: &Filter) -> bool {
    match filter {
        Filter::Equal(field, value) => fields.get(*field) == Some(value),
        Filter::ArrayContains(field, value) => fields
            .get(*field)
            .and_then(Value::as_array)
            .map(|values| values.contains(value))
            .unwrap_or(false),
    }
}
