use std::env;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;

use super::{AuthProvider, Identity, ProviderError, ProviderSession};

const API_BASE: &str = "https://identitytoolkit.googleapis.com/v1";

/// A Firebase Identity Toolkit implementation of the auth provider
pub struct FirebaseAuth {
    client: Client,
    api_key: String,
}

impl FirebaseAuth {
    pub fn new(api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
        }
    }

    /// Creates a provider from `APPDEX_FIREBASE_API_KEY`
    pub fn from_env() -> Self {
        let api_key = env::var("APPDEX_FIREBASE_API_KEY").expect("APPDEX_FIREBASE_API_KEY is set");

        Self::new(&api_key)
    }

    async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<AccountResponse, ProviderError> {
        let url = format!("{}/accounts:{}", API_BASE, endpoint);

        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Remote(e.to_string()))?;

        if !response.status().is_success() {
            return Err(handle_unsuccessful_request(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Remote(e.to_string()))
    }
}

#[async_trait]
impl AuthProvider for FirebaseAuth {
    async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let account = self
            .post(
                "signInWithPassword",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;

        account.into_session()
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<ProviderSession, ProviderError> {
        let account = self
            .post(
                "signUp",
                json!({ "email": email, "password": password, "returnSecureToken": true }),
            )
            .await?;

        account.into_session()
    }

    async fn sign_out(&self, _token: &str) -> Result<(), ProviderError> {
        // ID tokens are stateless and expire on their own. There is
        // nothing to revoke; callers discard the session.
        Ok(())
    }

    async fn update_display_name(
        &self,
        token: &str,
        display_name: &str,
    ) -> Result<Identity, ProviderError> {
        let account = self
            .post(
                "update",
                json!({ "idToken": token, "displayName": display_name, "returnSecureToken": false }),
            )
            .await?;

        Ok(account.into_identity())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    #[serde(default)]
    email: String,
    display_name: Option<String>,
    id_token: Option<String>,
}

impl AccountResponse {
    fn into_identity(self) -> Identity {
        Identity {
            id: self.local_id,
            email: self.email,
            display_name: self.display_name,
        }
    }

    fn into_session(self) -> Result<ProviderSession, ProviderError> {
        let token = self
            .id_token
            .clone()
            .ok_or_else(|| ProviderError::Remote("response carried no token".to_string()))?;

        Ok(ProviderSession {
            identity: self.into_identity(),
            token,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

async fn handle_unsuccessful_request(response: Response) -> ProviderError {
    let body = match response.text().await {
        Ok(text) => text,
        Err(e) => return ProviderError::Remote(e.to_string()),
    };

    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|parsed| parsed.error.message)
        .unwrap_or(body);

    map_error_message(&message)
}

fn map_error_message(message: &str) -> ProviderError {
    // Weak-password messages carry the reason after a colon
    if message.starts_with("WEAK_PASSWORD") {
        return ProviderError::WeakPassword;
    }

    match message {
        "EMAIL_EXISTS" => ProviderError::EmailInUse,
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "USER_DISABLED" => {
            ProviderError::InvalidCredentials
        }
        "INVALID_ID_TOKEN" | "TOKEN_EXPIRED" | "USER_NOT_FOUND" => ProviderError::NotAuthenticated,
        other => ProviderError::Remote(other.to_string()),
    }
}

#[cfg(test)]
mod test {
    use super::{map_error_message, ErrorResponse, ProviderError};

    #[test]
    fn test_error_body_parsing() {
        let parsed: ErrorResponse =
            serde_json::from_str(r#"{ "error": { "code": 400, "message": "EMAIL_EXISTS" } }"#)
                .unwrap();

        assert_eq!(parsed.error.message, "EMAIL_EXISTS");
    }

    #[test]
    fn test_error_message_mapping() {
        assert!(matches!(
            map_error_message("WEAK_PASSWORD : Password should be at least 6 characters"),
            ProviderError::WeakPassword
        ));
        assert!(matches!(
            map_error_message("EMAIL_EXISTS"),
            ProviderError::EmailInUse
        ));
        assert!(matches!(
            map_error_message("INVALID_LOGIN_CREDENTIALS"),
            ProviderError::InvalidCredentials
        ));
        assert!(matches!(
            map_error_message("TOKEN_EXPIRED"),
            ProviderError::NotAuthenticated
        ));
        assert!(matches!(
            map_error_message("QUOTA_EXCEEDED"),
            ProviderError::Remote(_)
        ));
    }
}
