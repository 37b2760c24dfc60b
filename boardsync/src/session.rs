//! Session credential handling.
//!
//! A [`SessionHandle`] is the single shared slot holding the bearer
//! token. It is constructed once at application start and injected into
//! both the api client and the sync channel, so every consumer reads the
//! same credential. The [`Authenticator`] trait is the seam to the
//! authentication collaborator: the api client calls `refresh` exactly
//! once when a request comes back 401.

use std::sync::Arc;

use parking_lot::RwLock;

/// Errors from the authentication collaborator.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The refresh request itself failed.
    #[error("token refresh failed: {0}")]
    Refresh(String),
    /// No refresh mechanism is configured for this session.
    #[error("no authenticator configured")]
    Unavailable,
}

/// Shared bearer-token slot for a single authenticated session.
///
/// Cheap to clone; all clones observe the same token.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle {
    token: Arc<RwLock<Option<String>>>,
}

impl SessionHandle {
    /// Creates an empty (signed-out) session handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a handle pre-loaded with a token.
    #[must_use]
    pub fn with_token(token: impl Into<String>) -> Self {
        let handle = Self::new();
        handle.set_token(token.into());
        handle
    }

    /// Returns a clone of the current token, if signed in.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Replaces the current token.
    pub fn set_token(&self, token: String) {
        *self.token.write() = Some(token);
    }

    /// Clears the token. Callers signing out should also disconnect the
    /// sync channel; the handle only owns the credential.
    pub fn clear(&self) {
        *self.token.write() = None;
    }

    /// Returns `true` if a token is present.
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.token.read().is_some()
    }
}

/// Seam to the authentication collaborator.
///
/// `refresh` must return a fresh bearer token; `session_expired` fires
/// when refresh fails or the replayed request is rejected again, letting
/// the application redirect to an unauthenticated state.
pub trait Authenticator: Send + Sync {
    /// Obtains a fresh session token.
    fn refresh(&self) -> impl Future<Output = Result<String, AuthError>> + Send;

    /// Called after the session has been torn down.
    fn session_expired(&self) {}
}

/// Authenticator for token-less or fixed-token operation: refresh always
/// fails, so the first 401 tears the session down.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuthenticator;

impl Authenticator for NullAuthenticator {
    async fn refresh(&self) -> Result<String, AuthError> {
        Err(AuthError::Unavailable)
    }
}

/// Authenticator that exchanges a refresh token at the server's
/// `/auth/refresh` endpoint.
#[derive(Debug, Clone)]
pub struct RefreshClient {
    http: reqwest::Client,
    refresh_url: String,
    refresh_token: String,
}

/// Response body of the refresh endpoint.
#[derive(serde::Deserialize)]
struct RefreshResponse {
    token: String,
}

impl RefreshClient {
    /// Creates a refresh client for the given base URL (the endpoint is
    /// `{base_url}/auth/refresh`) and refresh token.
    #[must_use]
    pub fn new(base_url: &str, refresh_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            refresh_url: format!("{base_url}/auth/refresh"),
            refresh_token: refresh_token.into(),
        }
    }
}

impl Authenticator for RefreshClient {
    async fn refresh(&self) -> Result<String, AuthError> {
        let response = self
            .http
            .post(&self.refresh_url)
            .json(&serde_json::json!({ "refreshToken": self.refresh_token }))
            .send()
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AuthError::Refresh(format!(
                "refresh endpoint returned {}",
                response.status()
            )));
        }
        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;
        Ok(body.token)
    }
}
