//! `ActivityPub` HTTP client.
//!
//! Fetches remote documents (optionally signed, for authorized-fetch
//! servers) and POSTs signed activities to remote inboxes.

#![allow(missing_docs)]

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::signature::{HttpSigner, SignatureError};

const ACTIVITY_JSON: &str = "application/activity+json";
const ACCEPT_AP: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// Error type for AP client operations.
#[derive(Debug, thiserror::Error)]
pub enum ApClientError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("HTTP request failed: {0}")]
    Network(String),
    #[error("Remote returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Signing failed: {0}")]
    Signing(#[from] SignatureError),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ApClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl ApClientError {
    /// HTTP status of the failed response, if there was one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the remote asked for a signed request.
    #[must_use]
    pub const fn is_auth_required(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    /// Whether repeating the same request later could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Signing(_) | Self::InvalidUrl(_) | Self::InvalidResponse(_) => false,
        }
    }
}

/// Fetching remote `ActivityPub` documents.
#[async_trait]
pub trait ActorFetch: Send + Sync {
    /// GET a document, signing the request when a signer is given.
    async fn fetch(&self, url: &str, signer: Option<&HttpSigner>) -> Result<Value, ApClientError>;
}

/// `ActivityPub` HTTP client.
#[derive(Clone)]
pub struct ApClient {
    client: Client,
    user_agent: String,
}

impl ApClient {
    /// Create a client whose requests are cancelled after `timeout`.
    pub fn new(instance_url: &str, timeout: Duration) -> Result<Self, ApClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| ApClientError::Network(e.to_string()))?;

        let user_agent = format!("fedi/{} (+{instance_url})", env!("CARGO_PKG_VERSION"));

        Ok(Self { client, user_agent })
    }

    /// The `User-Agent` sent with every request.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// POST a serialized activity to an inbox.
    ///
    /// 410 Gone counts as delivered: the recipient no longer exists and
    /// retrying cannot change that.
    pub async fn deliver(
        &self,
        inbox_url: &str,
        body: Vec<u8>,
        signer: &HttpSigner,
    ) -> Result<(), ApClientError> {
        let url = Url::parse(inbox_url).map_err(|e| ApClientError::InvalidUrl(e.to_string()))?;
        let headers = signer.sign_request("POST", &url, Some(&body))?;

        debug!(inbox = %inbox_url, key_id = %signer.key_id(), "Posting activity");

        let response = self
            .client
            .post(url)
            .headers(headers)
            .header("User-Agent", &self.user_agent)
            .header("Content-Type", ACTIVITY_JSON)
            .header("Accept", ACTIVITY_JSON)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!(inbox = %inbox_url, status = %status, "Activity delivered");
            Ok(())
        } else if status == StatusCode::GONE {
            warn!(inbox = %inbox_url, "Remote actor is gone (410)");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApClientError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl ActorFetch for ApClient {
    async fn fetch(&self, url: &str, signer: Option<&HttpSigner>) -> Result<Value, ApClientError> {
        let parsed = Url::parse(url).map_err(|e| ApClientError::InvalidUrl(e.to_string()))?;

        let mut request = self
            .client
            .get(parsed.clone())
            .header("User-Agent", &self.user_agent)
            .header("Accept", ACCEPT_AP);
        if let Some(signer) = signer {
            request = request.headers(signer.sign_request("GET", &parsed, None)?);
        }

        debug!(url = %url, signed = signer.is_some(), "Fetching remote document");

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            response
                .json::<Value>()
                .await
                .map_err(|e| ApClientError::InvalidResponse(e.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApClientError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ApClient::new("https://example.com", Duration::from_secs(10)).unwrap();
        assert!(client.user_agent().contains("https://example.com"));
    }

    #[test]
    fn test_error_classification() {
        let gone = ApClientError::Status {
            status: 404,
            body: String::new(),
        };
        let limited = ApClientError::Status {
            status: 429,
            body: String::new(),
        };
        let forbidden = ApClientError::Status {
            status: 403,
            body: String::new(),
        };

        assert!(!gone.is_retryable());
        assert!(limited.is_retryable());
        assert!(forbidden.is_auth_required());
        assert!(ApClientError::Timeout("slow".into()).is_retryable());
    }
}
