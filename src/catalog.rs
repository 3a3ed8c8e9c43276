use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::store::{collections, Document, Filter, Store, StoreError};

/// A catalog entry with descriptive fields, tags, platform links, and
/// embedded per-user ratings and reviews keyed by user id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    pub description: String,
    pub organization: String,
    pub price: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Platform name to store/download link
    #[serde(default)]
    pub platforms: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ratings: BTreeMap<String, i64>,
    #[serde(default)]
    pub reviews: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("App id must not be empty")]
    MissingId,
    /// Something else went wrong with the store
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Catalog<S> {
    store: Arc<S>,
}

impl<S> Catalog<S>
where
    S: Store,
{
    pub fn new(store: &Arc<S>) -> Self {
        Self {
            store: store.clone(),
        }
    }

    /// Returns every app in the catalog
    pub async fn apps(&self) -> Result<Vec<App>, CatalogError> {
        let documents = self.store.get_all(collections::APPS).await?;

        decode_apps(documents)
    }

    /// Returns the apps carrying the given tag
    pub async fn apps_with_tag(&self, tag: &str) -> Result<Vec<App>, CatalogError> {
        let documents = self
            .store
            .query(collections::APPS, Filter::ArrayContains("tags", json!(tag)))
            .await?;

        decode_apps(documents)
    }

    /// Point lookup by id. Returns None when no such app exists.
    pub async fn app_by_id(&self, id: &str) -> Result<Option<App>, CatalogError> {
        if id.trim().is_empty() {
            return Err(CatalogError::MissingId);
        }

        match self.store.get(collections::APPS, id).await {
            Ok(document) => Ok(Some(document.decode()?)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The known tag names, for pickers
    pub async fn tags(&self) -> Result<Vec<String>, CatalogError> {
        self.names_of(collections::TAGS).await
    }

    /// The known platform names, for pickers
    pub async fn platforms(&self) -> Result<Vec<String>, CatalogError> {
        self.names_of(collections::PLATFORMS).await
    }

    async fn names_of(&self, collection: &'static str) -> Result<Vec<String>, CatalogError> {
        let documents = self.store.get_all(collection).await?;

        Ok(documents
            .into_iter()
            .filter_map(|document| {
                document
                    .fields
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect())
    }
}

fn decode_apps(documents: Vec<Document>) -> Result<Vec<App>, CatalogError> {
    documents
        .into_iter()
        .map(|document| document.decode().map_err(Into::into))
        .collect()
}

/// Case-insensitive substring filter over app names. An empty term
/// matches everything, and input order is preserved.
pub fn filter_apps(apps: &[App], term: &str) -> Vec<App> {
    let term = term.to_lowercase();

    apps.iter()
        .filter(|app| app.name.to_lowercase().contains(&term))
        .cloned()
        .collect()
}
