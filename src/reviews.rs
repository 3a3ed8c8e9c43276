use std::sync::Arc;

use log::info;
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::{DEFAULT_ROLE, MODERATOR_ROLE};
use crate::store::{collections, FieldMutation, FieldPath, Store, StoreError, WriteOp};
use crate::util::strip_html;

#[derive(Debug, Error)]
pub enum ReviewError {
    /// Detected before any store call is made
    #[error("Invalid review data: {0}")]
    InvalidData(&'static str),
    /// Only moderators and the review's owner may remove it
    #[error("Not authorized to remove this review")]
    Unauthorized,
    /// Something else went wrong with the store
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Mutates the per-user rating and review maps embedded on app records.
///
/// Each user holds at most one rating and one review per app, stored
/// under the same key, and every mutation touches both fields in one
/// atomic update.
pub struct Reviews<S> {
    store: Arc<S>,
}

impl<S> Reviews<S>
where
    S: Store,
{
    pub fn new(store: &Arc<S>) -> Self {
        Self {
            store: store.clone(),
        }
    }

    /// Records a user's rating and review on an app
    pub async fn add(
        &self,
        app_id: &str,
        user_id: &str,
        rating: &str,
        text: &str,
    ) -> Result<(), ReviewError> {
        let rating = validate(app_id, user_id, rating, text)?;

        self.write(app_id, user_id, rating, text.to_string()).await
    }

    /// Replaces a user's rating and review, stripping HTML tags from the
    /// text first
    pub async fn update(
        &self,
        app_id: &str,
        user_id: &str,
        rating: &str,
        text: &str,
    ) -> Result<(), ReviewError> {
        let rating = validate(app_id, user_id, rating, text)?;

        self.write(app_id, user_id, rating, strip_html(text)).await
    }

    /// Removes a user's rating and review. Allowed when the requester is
    /// a moderator or owns the review.
    pub async fn remove(
        &self,
        app_id: &str,
        requesting_user_id: &str,
        owner_user_id: &str,
    ) -> Result<(), ReviewError> {
        if app_id.is_empty() || requesting_user_id.is_empty() || owner_user_id.is_empty() {
            return Err(ReviewError::InvalidData("app id and user ids are required"));
        }

        let role = self.role_of(requesting_user_id).await?;

        if role < MODERATOR_ROLE && requesting_user_id != owner_user_id {
            return Err(ReviewError::Unauthorized);
        }

        self.store
            .apply(vec![WriteOp::Update {
                collection: collections::APPS,
                id: app_id.to_string(),
                mutations: vec![
                    FieldMutation::Remove(FieldPath::new("ratings").key(owner_user_id)),
                    FieldMutation::Remove(FieldPath::new("reviews").key(owner_user_id)),
                ],
            }])
            .await?;

        info!("{requesting_user_id} removed the review by {owner_user_id} on app {app_id}");

        Ok(())
    }

    async fn write(
        &self,
        app_id: &str,
        user_id: &str,
        rating: i64,
        text: String,
    ) -> Result<(), ReviewError> {
        self.store
            .apply(vec![WriteOp::Update {
                collection: collections::APPS,
                id: app_id.to_string(),
                mutations: vec![
                    FieldMutation::Set(FieldPath::new("ratings").key(user_id), json!(rating)),
                    FieldMutation::Set(FieldPath::new("reviews").key(user_id), json!(text)),
                ],
            }])
            .await?;

        Ok(())
    }

    async fn role_of(&self, user_id: &str) -> Result<i64, ReviewError> {
        match self.store.get(collections::USER_ROLES, user_id).await {
            Ok(document) => Ok(document
                .fields
                .get("role")
                .and_then(Value::as_i64)
                .unwrap_or(DEFAULT_ROLE)),
            // Identities created out-of-band have no role record and no
            // moderator powers
            Err(StoreError::NotFound { .. }) => Ok(DEFAULT_ROLE),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate(
    app_id: &str,
    user_id: &str,
    rating: &str,
    text: &str,
) -> Result<i64, ReviewError> {
    if app_id.is_empty() {
        return Err(ReviewError::InvalidData("app id is required"));
    }

    if user_id.is_empty() {
        return Err(ReviewError::InvalidData("user id is required"));
    }

    if text.is_empty() {
        return Err(ReviewError::InvalidData("review text is required"));
    }

    rating
        .parse()
        .map_err(|_| ReviewError::InvalidData("rating must be a whole number"))
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use serde_json::json;

    use super::{ReviewError, Reviews};
    use crate::store::{collections, Fields, MemoryStore, Store, WriteOp};

    async fn seed_app(store: &MemoryStore, id: &str) {
        let fields: Fields = json!({ "name": "Foo", "description": "desc" })
            .as_object()
            .cloned()
            .unwrap();

        store
            .apply(vec![WriteOp::Put {
                collection: collections::APPS,
                id: id.to_string(),
                fields,
            }])
            .await
            .unwrap();
    }

    async fn seed_role(store: &MemoryStore, user_id: &str, role: i64) {
        let fields: Fields = json!({ "role": role }).as_object().cloned().unwrap();

        store
            .apply(vec![WriteOp::Put {
                collection: collections::USER_ROLES,
                id: user_id.to_string(),
                fields,
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_store_call() {
        let store = Arc::new(MemoryStore::new());
        let reviews = Reviews::new(&store);

        let cases = [
            ("", "u1", "4", "great"),
            ("app1", "", "4", "great"),
            ("app1", "u1", "", "great"),
            ("app1", "u1", "four", "great"),
            ("app1", "u1", "4", ""),
        ];

        for (app_id, user_id, rating, text) in cases {
            let added = reviews.add(app_id, user_id, rating, text).await;
            assert!(matches!(added, Err(ReviewError::InvalidData(_))));

            let updated = reviews.update(app_id, user_id, rating, text).await;
            assert!(matches!(updated, Err(ReviewError::InvalidData(_))));
        }

        assert_eq!(store.operations(), 0);
    }

    #[tokio::test]
    async fn test_add_then_update_strips_tags_and_replaces_rating() {
        let store = Arc::new(MemoryStore::new());
        let reviews = Reviews::new(&store);

        seed_app(&store, "app1").await;

        reviews.add("app1", "u1", "4", "great").await.unwrap();

        let fields = store.get(collections::APPS, "app1").await.unwrap().fields;
        assert_eq!(fields["ratings"], json!({ "u1": 4 }));
        assert_eq!(fields["reviews"], json!({ "u1": "great" }));

        reviews
            .update("app1", "u1", "5", "<b>better</b>")
            .await
            .unwrap();

        let fields = store.get(collections::APPS, "app1").await.unwrap().fields;
        assert_eq!(fields["ratings"], json!({ "u1": 5 }));
        assert_eq!(fields["reviews"], json!({ "u1": "better" }));
    }

    #[tokio::test]
    async fn test_remove_requires_ownership_or_moderator_role() {
        let store = Arc::new(MemoryStore::new());
        let reviews = Reviews::new(&store);

        seed_app(&store, "app1").await;
        seed_role(&store, "owner", 0).await;
        seed_role(&store, "stranger", 0).await;
        seed_role(&store, "mod", 1).await;

        reviews.add("app1", "owner", "4", "mine").await.unwrap();
        reviews.add("app1", "other", "2", "keep me").await.unwrap();

        // A regular user cannot remove someone else's review
        let denied = reviews.remove("app1", "stranger", "owner").await;
        assert!(matches!(denied, Err(ReviewError::Unauthorized)));

        let fields = store.get(collections::APPS, "app1").await.unwrap().fields;
        assert_eq!(fields["reviews"], json!({ "owner": "mine", "other": "keep me" }));

        // The owner can remove their own
        reviews.remove("app1", "owner", "owner").await.unwrap();

        let fields = store.get(collections::APPS, "app1").await.unwrap().fields;
        assert_eq!(fields["ratings"], json!({ "other": 2 }));
        assert_eq!(fields["reviews"], json!({ "other": "keep me" }));

        // A moderator can remove anyone's
        reviews.remove("app1", "mod", "other").await.unwrap();

        let fields = store.get(collections::APPS, "app1").await.unwrap().fields;
        assert_eq!(fields["ratings"], json!({}));
        assert_eq!(fields["reviews"], json!({}));
    }

    #[tokio::test]
    async fn test_remove_without_role_record_falls_back_to_ownership() {
        let store = Arc::new(MemoryStore::new());
        let reviews = Reviews::new(&store);

        seed_app(&store, "app1").await;
        reviews.add("app1", "u1", "3", "ok").await.unwrap();

        let denied = reviews.remove("app1", "u2", "u1").await;
        assert!(matches!(denied, Err(ReviewError::Unauthorized)));

        reviews.remove("app1", "u1", "u1").await.unwrap();

        let fields = store.get(collections::APPS, "app1").await.unwrap().fields;
        assert_eq!(fields["reviews"], json!({}));
    }
}
