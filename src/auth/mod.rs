use std::sync::Arc;

use async_trait::async_trait;
use log::warn;
use serde_json::{json, Value};
use thiserror::Error;

use crate::store::{collections, Fields, Store, StoreError, WriteOp};
use crate::usernames::UsernameRegistry;

mod firebase;
pub use firebase::*;

mod memory;
pub use memory::*;

/// The role every identity starts with
pub const DEFAULT_ROLE: i64 = 0;
/// The minimum role value granting moderator powers
pub const MODERATOR_ROLE: i64 = 1;

/// An authenticated end-user account, owned by the external auth provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
}

/// A signed-in identity along with its resolved role and provider token.
///
/// Sessions are explicit: `login` and `register` return one, and callers
/// pass it to every operation acting on behalf of the user. There is no
/// global "current user".
#[derive(Debug, Clone)]
pub struct Session {
    identity: Identity,
    role: i64,
    token: String,
}

impl Session {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> &str {
        &self.identity.id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.identity.display_name.as_deref()
    }

    pub fn role(&self) -> i64 {
        self.role
    }

    pub fn is_moderator(&self) -> bool {
        self.role >= MODERATOR_ROLE
    }

    /// The provider token backing this session, for callers that scope
    /// store access to the signed-in user
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// A provider-issued identity and token, before role resolution
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub identity: Identity,
    pub token: String,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Password is too weak")]
    WeakPassword,
    #[error("Email is already in use")]
    EmailInUse,
    #[error("No authenticated user")]
    NotAuthenticated,
    /// Something else went wrong with the provider
    #[error("Auth provider failure: {0}")]
    Remote(String),
}

/// Represents an external authentication provider
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> std::result::Result<ProviderSession, ProviderError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> std::result::Result<ProviderSession, ProviderError>;

    async fn sign_out(&self, token: &str) -> std::result::Result<(), ProviderError>;

    async fn update_display_name(
        &self,
        token: &str,
        display_name: &str,
    ) -> std::result::Result<Identity, ProviderError>;
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Email or password is incorrect
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Password should be at least 6 characters long")]
    WeakPassword,
    #[error("Email is already in use")]
    EmailInUse,
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),
    #[error("Sign out failed: {0}")]
    SignOutFailed(String),
    #[error("No authenticated user")]
    NotAuthenticated,
    #[error("Username is already taken")]
    UsernameTaken,
    /// A registered identity should always have a role record
    #[error("No role found for user {0}")]
    RoleNotFound(String),
    #[error("Auth provider failure: {0}")]
    Provider(String),
    /// Something else went wrong with the store
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Auth<P, S> {
    provider: Arc<P>,
    store: Arc<S>,
    usernames: UsernameRegistry<S>,
}

impl<P, S> Auth<P, S>
where
    P: AuthProvider,
    S: Store,
{
    pub fn new(provider: &Arc<P>, store: &Arc<S>) -> Self {
        Self {
            provider: provider.clone(),
            store: store.clone(),
            usernames: UsernameRegistry::new(store),
        }
    }

    /// Signs in with the provider and resolves the identity's role.
    ///
    /// Provider-specific failure causes are not distinguished to the
    /// caller.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.provider.sign_in(email, password).await.map_err(|e| {
            if let ProviderError::Remote(cause) = &e {
                warn!("Sign-in failed: {cause}");
            }

            AuthError::InvalidCredentials
        })?;

        let role = self.resolve_role(&session.identity.id).await?;

        Ok(Session {
            identity: session.identity,
            role,
            token: session.token,
        })
    }

    /// Ends the session with the provider
    pub async fn logout(&self, session: &Session) -> Result<(), AuthError> {
        self.provider
            .sign_out(&session.token)
            .await
            .map_err(|e| AuthError::SignOutFailed(e.to_string()))
    }

    /// Creates an identity with the provider and writes its default role
    /// record
    pub async fn register(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let session = self.provider.sign_up(email, password).await.map_err(|e| match e {
            ProviderError::WeakPassword => AuthError::WeakPassword,
            ProviderError::EmailInUse => AuthError::EmailInUse,
            e => AuthError::RegistrationFailed(e.to_string()),
        })?;

        let mut fields = Fields::new();
        fields.insert("role".to_string(), json!(DEFAULT_ROLE));

        self.store
            .apply(vec![WriteOp::Put {
                collection: collections::USER_ROLES,
                id: session.identity.id.clone(),
                fields,
            }])
            .await?;

        Ok(Session {
            identity: session.identity,
            role: DEFAULT_ROLE,
            token: session.token,
        })
    }

    /// Claims a username for the signed-in identity. Uniqueness is checked
    /// case-insensitively, while the stored name keeps its original case.
    ///
    /// The check and the write are separate store calls, so two
    /// simultaneous claims of the same name can race.
    pub async fn set_username(
        &self,
        session: &Session,
        username: &str,
    ) -> Result<Session, AuthError> {
        let is_unique = self.usernames.is_unique(&username.to_lowercase()).await?;

        if !is_unique {
            return Err(AuthError::UsernameTaken);
        }

        let identity = self
            .provider
            .update_display_name(&session.token, username)
            .await
            .map_err(|e| match e {
                ProviderError::NotAuthenticated => AuthError::NotAuthenticated,
                e => AuthError::Provider(e.to_string()),
            })?;

        self.usernames.save(&identity.id, username).await?;

        Ok(Session {
            identity,
            role: session.role,
            token: session.token.clone(),
        })
    }

    /// Looks up an identity's role in the role collection
    pub async fn resolve_role(&self, user_id: &str) -> Result<i64, AuthError> {
        let document = self
            .store
            .get(collections::USER_ROLES, user_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => AuthError::RoleNotFound(user_id.to_string()),
                e => AuthError::Store(e),
            })?;

        Ok(document
            .fields
            .get("role")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_ROLE))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::{Auth, AuthError, MemoryAuth};
    use crate::store::{collections, MemoryStore, Store};
    use crate::usernames::UsernameRegistry;

    fn auth() -> (Auth<MemoryAuth, MemoryStore>, Arc<MemoryStore>) {
        let provider = Arc::new(MemoryAuth::new());
        let store = Arc::new(MemoryStore::new());

        (Auth::new(&provider, &store), store)
    }

    #[tokio::test]
    async fn test_register_writes_default_role() {
        let (auth, store) = auth();

        let session = auth.register("a@b.c", "hunter22").await.unwrap();
        assert_eq!(session.role(), 0);
        assert!(!session.is_moderator());

        let document = store
            .get(collections::USER_ROLES, session.user_id())
            .await
            .unwrap();
        assert_eq!(document.fields["role"], serde_json::json!(0));
    }

    #[tokio::test]
    async fn test_register_rejects_weak_password_and_taken_email() {
        let (auth, _) = auth();

        auth.register("a@b.c", "hunter22").await.unwrap();

        assert!(matches!(
            auth.register("a@b.c", "hunter23").await,
            Err(AuthError::EmailInUse)
        ));
        assert!(matches!(
            auth.register("x@y.z", "short").await,
            Err(AuthError::WeakPassword)
        ));
    }

    #[tokio::test]
    async fn test_login_collapses_provider_failures() {
        let (auth, _) = auth();

        auth.register("a@b.c", "hunter22").await.unwrap();

        assert!(matches!(
            auth.login("a@b.c", "wrong password").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("nobody@b.c", "hunter22").await,
            Err(AuthError::InvalidCredentials)
        ));

        let session = auth.login("a@b.c", "hunter22").await.unwrap();
        assert_eq!(session.role(), 0);
    }

    #[tokio::test]
    async fn test_login_without_role_record_fails() {
        let (auth, store) = auth();

        let session = auth.register("a@b.c", "hunter22").await.unwrap();
        store
            .delete(collections::USER_ROLES, session.user_id())
            .await
            .unwrap();

        assert!(matches!(
            auth.login("a@b.c", "hunter22").await,
            Err(AuthError::RoleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_set_username_keeps_original_case() {
        let (auth, store) = auth();

        let session = auth.register("a@b.c", "hunter22").await.unwrap();
        let session = auth.set_username(&session, "CoolUser").await.unwrap();

        assert_eq!(session.display_name(), Some("CoolUser"));

        let registry = UsernameRegistry::new(&store);
        assert!(!registry.is_unique("cooluser").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_username_rejects_case_insensitive_matches() {
        let (auth, _) = auth();

        let first = auth.register("a@b.c", "hunter22").await.unwrap();
        auth.set_username(&first, "CoolUser").await.unwrap();

        let second = auth.register("x@y.z", "hunter22").await.unwrap();
        assert!(matches!(
            auth.set_username(&second, "COOLUSER").await,
            Err(AuthError::UsernameTaken)
        ));
    }

    #[tokio::test]
    async fn test_logout_invalidates_token() {
        let (auth, _) = auth();

        let session = auth.register("a@b.c", "hunter22").await.unwrap();
        auth.logout(&session).await.unwrap();

        assert!(matches!(
            auth.set_username(&session, "ghost").await,
            Err(AuthError::NotAuthenticated)
        ));
    }
}
