//! Request/response client for the board REST API.
//!
//! Wraps reqwest with the resilience the sync layer needs: bounded
//! retry-with-exponential-backoff for transient failures, and a one-shot
//! transparent session refresh on 401. Non-idempotent operations are
//! never retried past the point of ambiguity — only network-level
//! failures (no response) and an explicit retryable status set qualify.

pub mod tasks;

use std::time::Duration;

use reqwest::{Method, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::session::{Authenticator, SessionHandle};

/// Statuses worth retrying: timeouts, throttling, and server-side faults.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Retry budget and backoff shape for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (3 retries = 4 total attempts).
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `base_delay * 2^n` before retrying.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// The delay to sleep before retrying after failed attempt `attempt`
    /// (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Whether the status belongs to the retryable set.
    #[must_use]
    pub fn is_retryable_status(status: u16) -> bool {
        RETRYABLE_STATUSES.contains(&status)
    }
}

/// Classified request error: a message plus, when a response was
/// received, the HTTP status.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Network-level failure; no response was received.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("{message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Server-provided message, or the status reason.
        message: String,
    },
    /// Session could not be refreshed after a 401.
    #[error("session expired")]
    SessionExpired,
    /// The response body could not be decoded.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// The HTTP status, if the server produced a response.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::SessionExpired => Some(401),
            Self::Transport(_) | Self::Decode(_) => None,
        }
    }
}

/// HTTP client for the board API.
///
/// Holds the shared [`SessionHandle`] for bearer auth and an
/// [`Authenticator`] for the 401 refresh path. Cloneable; clones share
/// the underlying connection pool and session.
#[derive(Debug, Clone)]
pub struct ApiClient<A: Authenticator> {
    http: reqwest::Client,
    base_url: String,
    session: SessionHandle,
    auth: A,
    retry: RetryPolicy,
}

impl<A: Authenticator> ApiClient<A> {
    /// Creates a client for the given base URL with the default retry
    /// policy.
    #[must_use]
    pub fn new(base_url: impl Into<String>, session: SessionHandle, auth: A) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            session,
            auth,
            retry: RetryPolicy::default(),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The shared session handle.
    #[must_use]
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Issues a GET request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] after the retry budget is exhausted or on a
    /// non-retryable failure.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::GET, path, None).await
    }

    /// Issues a POST request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] after the retry budget is exhausted or on a
    /// non-retryable failure.
    pub async fn post<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(serde_json::to_value(body)?))
            .await
    }

    /// Issues a PUT request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] after the retry budget is exhausted or on a
    /// non-retryable failure.
    pub async fn put<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, path, Some(serde_json::to_value(body)?))
            .await
    }

    /// Issues a PATCH request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] after the retry budget is exhausted or on a
    /// non-retryable failure.
    pub async fn patch<B: serde::Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::PATCH, path, Some(serde_json::to_value(body)?))
            .await
    }

    /// Issues a DELETE request.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] after the retry budget is exhausted or on a
    /// non-retryable failure.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, None).await
    }

    /// Core request loop: dispatch, classify, retry or refresh.
    ///
    /// The body is kept as a JSON value so the request can be rebuilt on
    /// every attempt. The 401 refresh-and-replay path runs outside the
    /// backoff loop: it neither sleeps nor consumes a retry, and it runs
    /// at most once per logical request.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ApiError> {
        let url = format!("{}{path}", self.base_url);
        let mut attempt: u32 = 0;
        let mut refreshed = false;

        loop {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(token) = self.session.token() {
                request = request.bearer_auth(token);
            }
            if let Some(body) = &body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    // No response at all: network-level failure, retryable.
                    if attempt < self.retry.max_retries {
                        let delay = self.retry.delay_for(attempt);
                        tracing::warn!(
                            %method, path, attempt, delay_ms = delay.as_millis() as u64,
                            error = %e, "request failed at network level, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    tracing::warn!(%method, path, error = %e, "retry budget exhausted");
                    return Err(ApiError::Transport(e));
                }
            };

            let status = response.status();
            if status.is_success() {
                return decode_body(response).await;
            }

            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    tracing::warn!(%method, path, "replayed request rejected again, signing out");
                    self.tear_down_session();
                    return Err(ApiError::SessionExpired);
                }
                match self.auth.refresh().await {
                    Ok(token) => {
                        tracing::debug!(%method, path, "session refreshed, replaying request");
                        self.session.set_token(token);
                        refreshed = true;
                        continue;
                    }
                    Err(e) => {
                        tracing::warn!(%method, path, error = %e, "session refresh failed");
                        self.tear_down_session();
                        return Err(ApiError::SessionExpired);
                    }
                }
            }

            let message = error_message(response).await;
            if RetryPolicy::is_retryable_status(status.as_u16()) && attempt < self.retry.max_retries
            {
                let delay = self.retry.delay_for(attempt);
                tracing::warn!(
                    %method, path, status = status.as_u16(), attempt,
                    delay_ms = delay.as_millis() as u64, "retryable status, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
    }

    fn tear_down_session(&self) {
        self.session.clear();
        self.auth.session_expired();
    }
}

/// Decodes a successful response. A body without a JSON content type is
/// treated as an empty success payload rather than an error.
async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"));
    if is_json {
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    } else {
        Ok(serde_json::from_value(Value::Null)?)
    }
}

/// Extracts a human-readable message from an error response. Prefers the
/// server's `error`/`message` JSON field, falls back to the body text or
/// the status reason.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    if let Ok(value) = serde_json::from_str::<Value>(&text) {
        for key in ["error", "message"] {
            if let Some(message) = value.get(key).and_then(Value::as_str) {
                return message.to_string();
            }
        }
    }
    if text.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        text
    }
}
