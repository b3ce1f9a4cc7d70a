//! Remote REST API boundary.
//!
//! The sync manager talks to the server only through [`RemoteApi`], so tests
//! can swap in a recording fake. [`HttpApiClient`] is the production
//! implementation: JSON bodies, bearer auth, non-2xx mapped to
//! [`ApiError::Status`].

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

const MAX_LOG_BODY_CHARS: usize = 500;

/// HTTP verbs the sync engine issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Create
    Post,
    /// Update
    Put,
    /// Delete
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// How the engine should react to a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient; leave the operation in the queue
    Retryable,
    /// The server will never accept this request as-is
    Permanent,
    /// Credentials are missing or expired
    ReauthRequired,
}

/// Classify an HTTP status into retry behavior.
#[must_use]
pub const fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 | 403 => RetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 | 500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

/// Failure of a single remote call
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport failure: DNS, connect, timeout
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response
    #[error("HTTP {status}: {message}")]
    Status {
        /// Response status code
        status: u16,
        /// Server-provided detail, or the raw body
        message: String,
    },

    /// Response body was not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Client could not be configured (bad token characters, TLS setup)
    #[error("Client setup error: {0}")]
    Setup(String),
}

impl ApiError {
    /// Shorthand for a status error
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// HTTP status if the server answered
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    #[must_use]
    pub const fn retry_class(&self) -> RetryClass {
        match self {
            Self::Status { status, .. } => classify_http_status(*status),
            Self::Http(_) => RetryClass::Retryable,
            Self::Json(_) | Self::Setup(_) => RetryClass::Permanent,
        }
    }
}

/// Authenticated JSON request/response against the budget API
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Issues `method` against `path` (relative to the API base) and returns
    /// the decoded response body, or `Value::Null` for an empty body.
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError>;
}

/// FastAPI-style error body
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Value,
}

/// `reqwest`-backed [`RemoteApi`]
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpApiClient {
    /// Builds a client for `base_url`, e.g. `https://host/api/v1`.
    ///
    /// # Errors
    /// Returns [`ApiError::Setup`] if the token is not a valid header value
    /// or the TLS backend cannot be initialized.
    pub fn new(base_url: &str, token: Option<&str>, timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::Setup("invalid access token format".to_string()))?;
            auth.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ApiError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn error_message(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody {
                detail: Value::String(detail),
            }) => detail,
            Ok(ErrorBody { detail }) => detail.to_string(),
            Err(_) => body.chars().take(MAX_LOG_BODY_CHARS).collect(),
        }
    }
}

#[async_trait]
impl RemoteApi for HttpApiClient {
    #[instrument(skip(self, body))]
    async fn request(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let mut request = self.client.request(method.as_reqwest(), self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            debug!(status = status.as_u16(), "API request rejected");
            return Err(ApiError::status(status.as_u16(), Self::error_message(&text)));
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}
