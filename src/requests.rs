use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::catalog::App;
use crate::store::{self, collections, Store, StoreError, WriteOp};

/// A proposed app awaiting moderation, pending by virtue of living in the
/// requests collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRequest {
    pub id: String,
    pub name: String,
    pub description: String,
    pub organization: String,
    pub price: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub platforms: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// A submission, before the store assigns an id and a timestamp
#[derive(Debug, Clone, Serialize)]
pub struct NewAppRequest {
    pub name: String,
    pub description: String,
    pub organization: String,
    pub price: String,
    pub tags: Vec<String>,
    pub platforms: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum RequestError {
    /// Detected before any store call is made
    #[error("Invalid app data: {0} is required")]
    MissingField(&'static str),
    #[error("Request {0} doesn't exist")]
    NotFound(String),
    /// Something else went wrong with the store
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The submit-and-moderate workflow for new catalog entries
pub struct Requests<S> {
    store: Arc<S>,
}

impl<S> Requests<S>
where
    S: Store,
{
    pub fn new(store: &Arc<S>) -> Self {
        Self {
            store: store.clone(),
        }
    }

    /// Submits a candidate app for moderation
    pub async fn submit(&self, new_request: NewAppRequest) -> Result<AppRequest, RequestError> {
        validate(&new_request)?;

        let mut fields = store::encode(&new_request)?;
        fields.insert("created_at".to_string(), json!(Utc::now()));

        let document = self.store.add(collections::REQUESTED_APPS, fields).await?;

        info!("App \"{}\" was requested", new_request.name);

        document.decode().map_err(Into::into)
    }

    /// Returns every pending request
    pub async fn pending(&self) -> Result<Vec<AppRequest>, RequestError> {
        let documents = self.store.get_all(collections::REQUESTED_APPS).await?;

        documents
            .into_iter()
            .map(|document| document.decode().map_err(Into::into))
            .collect()
    }

    /// Accepts or rejects a pending request. Accepting copies the
    /// request's fields verbatim into the catalog under the request's id
    /// and deletes the request in the same atomic batch; rejecting just
    /// deletes it. Returns the new app on accept.
    pub async fn resolve(
        &self,
        request_id: &str,
        accept: bool,
    ) -> Result<Option<App>, RequestError> {
        let document = self
            .store
            .get(collections::REQUESTED_APPS, request_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => RequestError::NotFound(request_id.to_string()),
                e => e.into(),
            })?;

        if !accept {
            self.store
                .apply(vec![WriteOp::Delete {
                    collection: collections::REQUESTED_APPS,
                    id: document.id,
                }])
                .await?;

            info!("App request {request_id} was rejected");

            return Ok(None);
        }

        self.store
            .apply(vec![
                WriteOp::Put {
                    collection: collections::APPS,
                    id: document.id.clone(),
                    fields: document.fields.clone(),
                },
                WriteOp::Delete {
                    collection: collections::REQUESTED_APPS,
                    id: document.id.clone(),
                },
            ])
            .await?;

        info!("App request {request_id} was accepted");

        document.decode().map(Some).map_err(Into::into)
    }
}

fn validate(new_request: &NewAppRequest) -> Result<(), RequestError> {
    if new_request.name.is_empty() {
        return Err(RequestError::MissingField("name"));
    }

    if new_request.description.is_empty() {
        return Err(RequestError::MissingField("description"));
    }

    if new_request.organization.is_empty() {
        return Err(RequestError::MissingField("organization"));
    }

    if new_request.price.is_empty() {
        return Err(RequestError::MissingField("price"));
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::{NewAppRequest, RequestError, Requests};
    use crate::catalog::Catalog;
    use crate::store::MemoryStore;

    fn sample_request() -> NewAppRequest {
        NewAppRequest {
            name: "Foo".to_string(),
            description: "desc".to_string(),
            organization: "Org".to_string(),
            price: "9.99".to_string(),
            tags: vec!["tag1".to_string()],
            platforms: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected_before_any_store_call() {
        let store = Arc::new(MemoryStore::new());
        let requests = Requests::new(&store);

        let blank = |field: &str| {
            let mut request = sample_request();
            match field {
                "name" => request.name.clear(),
                "description" => request.description.clear(),
                "organization" => request.organization.clear(),
                _ => request.price.clear(),
            }
            request
        };

        for field in ["name", "description", "organization", "price"] {
            let result = requests.submit(blank(field)).await;
            assert!(matches!(result, Err(RequestError::MissingField(f)) if f == field));
        }

        assert_eq!(store.operations(), 0);
    }

    #[tokio::test]
    async fn test_accept_moves_the_request_into_the_catalog() {
        let store = Arc::new(MemoryStore::new());
        let requests = Requests::new(&store);
        let catalog = Catalog::new(&store);

        let submitted = requests.submit(sample_request()).await.unwrap();

        let pending = requests.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0], submitted);

        let app = requests.resolve(&submitted.id, true).await.unwrap().unwrap();

        // The app reuses the request's id and fields
        assert_eq!(app.id, submitted.id);
        assert_eq!(app.name, "Foo");
        assert_eq!(app.price, "9.99");

        assert!(requests.pending().await.unwrap().is_empty());

        let fetched = catalog.app_by_id(&submitted.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "Foo");
        assert_eq!(fetched.organization, "Org");
        assert_eq!(fetched.tags, vec!["tag1".to_string()]);
        assert!(fetched.ratings.is_empty());
    }

    #[tokio::test]
    async fn test_reject_discards_the_request() {
        let store = Arc::new(MemoryStore::new());
        let requests = Requests::new(&store);
        let catalog = Catalog::new(&store);

        let submitted = requests.submit(sample_request()).await.unwrap();

        let outcome = requests.resolve(&submitted.id, false).await.unwrap();
        assert!(outcome.is_none());

        assert!(requests.pending().await.unwrap().is_empty());
        assert!(catalog.app_by_id(&submitted.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolving_an_unknown_request_fails() {
        let store = Arc::new(MemoryStore::new());
        let requests = Requests::new(&store);

        let result = requests.resolve("nope", true).await;
        assert!(matches!(result, Err(RequestError::NotFound(_))));
    }
}
