use std::sync::Arc;

use serde_json::json;

use crate::store::{collections, Fields, Filter, Store, StoreError};

/// Tracks claimed usernames, separately from the auth provider's display
/// names, so uniqueness can be enforced across identities.
pub struct UsernameRegistry<S> {
    store: Arc<S>,
}

impl<S> UsernameRegistry<S>
where
    S: Store,
{
    pub fn new(store: &Arc<S>) -> Self {
        Self {
            store: store.clone(),
        }
    }

    /// True when no record matches the given name. Callers pass the
    /// lowercased form; matching happens against the lowercased field.
    pub async fn is_unique(&self, username: &str) -> Result<bool, StoreError> {
        let matches = self
            .store
            .query(
                collections::USERNAMES,
                Filter::Equal("username_lower", json!(username)),
            )
            .await?;

        Ok(matches.is_empty())
    }

    /// Appends a mapping record for the identity. Does not re-verify
    /// uniqueness; the check in `Auth::set_username` and this write are
    /// separate store calls.
    pub async fn save(&self, user_id: &str, username: &str) -> Result<(), StoreError> {
        let mut fields = Fields::new();
        fields.insert("uid".to_string(), json!(user_id));
        fields.insert("username".to_string(), json!(username));
        fields.insert("username_lower".to_string(), json!(username.to_lowercase()));

        self.store
            .add(collections::USERNAMES, fields)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::UsernameRegistry;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_uniqueness_is_case_insensitive_via_lowered_field() {
        let store = Arc::new(MemoryStore::new());
        let registry = UsernameRegistry::new(&store);

        assert!(registry.is_unique("cooluser").await.unwrap());

        registry.save("u1", "CoolUser").await.unwrap();

        assert!(!registry.is_unique("cooluser").await.unwrap());
        assert!(registry.is_unique("otheruser").await.unwrap());
    }
}
