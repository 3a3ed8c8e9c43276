use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{AuthProvider, Identity, ProviderError, ProviderSession};
use crate::util::random_string;

/// The shortest password Firebase accepts, mirrored here so both
/// providers reject the same inputs
const MIN_PASSWORD_LENGTH: usize = 6;

struct Account {
    id: String,
    email: String,
    password: String,
    display_name: Option<String>,
}

/// An in-memory auth provider for tests and local development
#[derive(Default)]
pub struct MemoryAuth {
    accounts: RwLock<Vec<Account>>,
    tokens: RwLock<HashMap<String, String>>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue_token(&self, account_id: &str) -> String {
        let token = random_string(32);

        self.tokens
            .write()
            .insert(token.clone(), account_id.to_string());

        token
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let identity = {
            let accounts = self.accounts.read();
            let account = accounts
                .iter()
                .find(|account| account.email == email && account.password == password)
                .ok_or(ProviderError::InvalidCredentials)?;

            Identity {
                id: account.id.clone(),
                email: account.email.clone(),
                display_name: account.display_name.clone(),
            }
        };

        let token = self.issue_token(&identity.id);

        Ok(ProviderSession { identity, token })
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<ProviderSession, ProviderError> {
        if password.len() < MIN_PASSWORD_LENGTH {
            return Err(ProviderError::WeakPassword);
        }

        let identity = {
            let mut accounts = self.accounts.write();

            if accounts.iter().any(|account| account.email == email) {
                return Err(ProviderError::EmailInUse);
            }

            let account = Account {
                id: random_string(28),
                email: email.to_string(),
                password: password.to_string(),
                display_name: None,
            };

            let identity = Identity {
                id: account.id.clone(),
                email: account.email.clone(),
                display_name: None,
            };

            accounts.push(account);
            identity
        };

        let token = self.issue_token(&identity.id);

        Ok(ProviderSession { identity, token })
    }

    async fn sign_out(&self, token: &str) -> Result<(), ProviderError> {
        self.tokens.write().remove(token);
        Ok(())
    }

    async fn update_display_name(
        &self,
        token: &str,
        display_name: &str,
    ) -> Result<Identity, ProviderError> {
        let account_id = self
            .tokens
            .read()
            .get(token)
            .cloned()
            .ok_or(ProviderError::NotAuthenticated)?;

        let mut accounts = self.accounts.write();
        let account = accounts
            .iter_mut()
            .find(|account| account.id == account_id)
            .ok_or(ProviderError::NotAuthenticated)?;

        account.display_name = Some(display_name.to_string());

        Ok(Identity {
            id: account.id.clone(),
            email: account.email.clone(),
            display_name: account.display_name.clone(),
        })
    }
}
