//! Client for the control API.
//!
//! The control API owns the roster of watched authors and the workflow that
//! a new post kicks off. The [`ControlApi`] trait is the seam the rest of the
//! crate depends on; [`HttpControlApi`] is the real implementation.
//!
//! # Example
//!
//! ```rust,ignore
//! use skyrelay::control_api::HttpControlApi;
//! use std::time::Duration;
//!
//! let api = HttpControlApi::new("https://api.example.com/", "secret")
//!     .with_fetch_timeout(Duration::from_secs(10))
//!     .with_trigger_timeout(Duration::from_secs(15));
//! let authors = api.fetch_roster("bluesky").await?;
//! ```

use crate::event::TriggerPayload;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default timeout for the roster fetch
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single trigger call
const DEFAULT_TRIGGER_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors returned by the control API client.
#[derive(Error, Debug)]
pub enum ControlApiError {
    /// Request could not be sent or no response was received
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// Request did not complete within the configured timeout
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// The API rejected the credential
    #[error("authentication rejected ({status}): {body}")]
    Auth { status: StatusCode, body: String },

    /// The API answered with a non-success status
    #[error("API returned status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    /// The response body was not the expected JSON
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl ControlApiError {
    fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout.as_millis() as u64)
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error)
        }
    }
}

/// One author entry as returned by `GET authors/{platform}`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AuthorEntry {
    /// External key on the streaming platform (a DID for Bluesky)
    #[serde(default)]
    pub platform_id: Option<String>,

    /// Internal id, forwarded verbatim in trigger payloads
    #[serde(default)]
    pub id: Value,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub author_context: Value,
}

/// Operations the relay consumes from the control API.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Fetch every author watched on `platform`.
    async fn fetch_roster(&self, platform: &str) -> Result<Vec<AuthorEntry>, ControlApiError>;

    /// Start the downstream workflow for one new post.
    async fn trigger_workflow(&self, payload: &TriggerPayload) -> Result<(), ControlApiError>;
}

/// [`ControlApi`] over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpControlApi {
    /// Base URL, used verbatim as a prefix (expected to end with `/`)
    base_url: String,

    api_key: String,

    /// HTTP client (reused for connection pooling)
    client: Client,

    fetch_timeout: Duration,

    trigger_timeout: Duration,
}

impl HttpControlApi {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: Client::new(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            trigger_timeout: DEFAULT_TRIGGER_TIMEOUT,
        }
    }

    /// Set the roster fetch timeout
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the per-trigger timeout
    pub fn with_trigger_timeout(mut self, timeout: Duration) -> Self {
        self.trigger_timeout = timeout;
        self
    }

    pub fn authors_url(&self, platform: &str) -> String {
        format!("{}authors/{}", self.base_url, platform)
    }

    pub fn trigger_url(&self) -> String {
        format!("{}process-tweet/trigger-workflow", self.base_url)
    }

    /// Map a non-success response to an error, consuming the body for context.
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ControlApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ControlApiError::Auth { status, body });
        }

        Err(ControlApiError::HttpStatus { status, body })
    }
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn fetch_roster(&self, platform: &str) -> Result<Vec<AuthorEntry>, ControlApiError> {
        let url = self.authors_url(platform);
        debug!(url = %url, "Fetching roster");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| ControlApiError::from_reqwest(e, self.fetch_timeout))?;

        let response = Self::check_status(response).await?;

        let body = response
            .bytes()
            .await
            .map_err(|e| ControlApiError::from_reqwest(e, self.fetch_timeout))?;

        decode_roster(&body)
    }

    async fn trigger_workflow(&self, payload: &TriggerPayload) -> Result<(), ControlApiError> {
        let url = self.trigger_url();
        debug!(url = %url, "Sending trigger");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.trigger_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| ControlApiError::from_reqwest(e, self.trigger_timeout))?;

        Self::check_status(response).await?;
        Ok(())
    }
}

/// Decode the body of `GET authors/{platform}`.
///
/// A JSON `null` is treated as an empty roster. Only a body that is not a
/// list fails; an element that does not fit [`AuthorEntry`] is skipped.
pub fn decode_roster(body: &[u8]) -> Result<Vec<AuthorEntry>, ControlApiError> {
    let elements: Option<Vec<Value>> =
        serde_json::from_slice(body).map_err(|e| ControlApiError::Decode(e.to_string()))?;

    let entries = elements
        .unwrap_or_default()
        .into_iter()
        .enumerate()
        .filter_map(|(index, element)| match serde_json::from_value(element) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed author entry");
                None
            }
        })
        .collect();

    Ok(entries)
}
