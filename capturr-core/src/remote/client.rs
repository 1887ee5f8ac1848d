//! HTTP client for the graph append API

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;

use crate::backoff::is_auth_status;
use crate::error::{Error, Result};

use super::payload::AppendRequest;

/// A failed append, classified by HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SendError {
    /// HTTP status, or None when no response arrived
    pub status: Option<u16>,
    /// Human readable diagnostic, stored as the record's `last_error`
    pub message: String,
}

/// How the orchestrator treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// No HTTP response (connect error, timeout, reset): backoff
    Transport,
    /// 401/403: latch the hard error
    Auth,
    /// Any other non-200 status: backoff
    Server,
}

impl SendError {
    /// Failure with no HTTP response
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Failure carrying an HTTP status code
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn class(&self) -> FailureClass {
        match self.status {
            None => FailureClass::Transport,
            status if is_auth_status(status) => FailureClass::Auth,
            Some(_) => FailureClass::Server,
        }
    }

    /// Check if retries must stop until the credential changes
    pub fn is_auth(&self) -> bool {
        self.class() == FailureClass::Auth
    }
}

/// Outbound seam used by the orchestrator.
#[async_trait]
pub trait BlockSender: Send + Sync {
    /// Append one block; Ok only on HTTP 200.
    async fn append_block(&self, request: &AppendRequest) -> std::result::Result<(), SendError>;
}

/// HTTP client for the append API
pub struct GraphClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    /// Create a new client
    ///
    /// Returns an error if the base URL is blank or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(Error::Config("sync.api_base_url is required".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Remote(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    /// Endpoint for a graph
    pub fn endpoint(&self, graph: &str) -> String {
        format!(
            "{}/api/graph/{}/append-blocks",
            self.base_url,
            urlencoding::encode(graph)
        )
    }
}

#[async_trait]
impl BlockSender for GraphClient {
    async fn append_block(&self, request: &AppendRequest) -> std::result::Result<(), SendError> {
        let url = self.endpoint(&request.graph);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&request.token)
            .json(&request.body())
            .send()
            .await
            .map_err(|e| SendError::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::OK {
            return Ok(());
        }

        // Body read failures degrade to the bare status line
        let body = response.text().await.unwrap_or_default();
        Err(SendError::http(
            status.as_u16(),
            describe_failure(status.as_u16(), &body),
        ))
    }
}

/// "HTTP {code} - {message}", preferring a JSON `message` field over the raw body.
fn describe_failure(status: u16, body: &str) -> String {
    let server_message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|m| m.as_str())
                .filter(|m| !m.is_empty())
                .map(str::to_string)
        })
        .or_else(|| Some(body.to_string()).filter(|b| !b.is_empty()));

    match server_message {
        Some(message) => format!("HTTP {} - {}", status, message),
        None => format!("HTTP {}", status),
    }
}
