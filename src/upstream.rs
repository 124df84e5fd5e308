// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Upstream inference client
//
// Responsibilities:
// - Open one streaming POST per chat request against the configured endpoint
// - Forward the access credential verbatim as a bearer token
// - Hand the response body back as a byte stream; dropping it aborts the
//   connection

use async_trait::async_trait;
use axum::http::{header, StatusCode};
use bytes::Bytes;
use futures_util::stream::Stream;
use futures_util::TryStreamExt;
use std::pin::Pin;

use crate::config::UpstreamConfig;

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

/// One outbound invocation.
#[derive(Clone)]
pub struct UpstreamRequest {
    pub url: reqwest::Url,
    /// Access credential, forwarded as `Authorization: Bearer`.
    pub credential: String,
    pub prompt: String,
}

impl UpstreamRequest {
    pub fn new(
        url: &str,
        credential: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Result<Self, UpstreamError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| UpstreamError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self {
            url,
            credential: credential.into(),
            prompt: prompt.into(),
        })
    }
}

// The credential must never reach a log line.
impl std::fmt::Debug for UpstreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamRequest")
            .field("url", &self.url.as_str())
            .field("prompt_len", &self.prompt.len())
            .finish()
    }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: ByteStream,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
    #[error("invalid upstream URL {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout(e.to_string())
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Opens the streaming connection to the inference service.
///
/// Implementations must be Send + Sync so one instance can serve every
/// concurrent relay via `Arc`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn open(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

// ---------------------------------------------------------------------------
// Reqwest implementation
// ---------------------------------------------------------------------------

pub struct ReqwestUpstreamClient {
    client: reqwest::Client,
}

impl ReqwestUpstreamClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client with the configured connect timeout. No overall timeout: the
    /// relay bounds each read itself.
    pub fn from_config(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstreamClient {
    async fn open(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let body = serde_json::json!({ "prompt": request.prompt });

        let resp = self
            .client
            .post(request.url)
            .bearer_auth(&request.credential)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(UpstreamError::from_reqwest)?;

        let status = resp.status();
        let stream = resp.bytes_stream().map_err(UpstreamError::from_reqwest);

        Ok(UpstreamResponse {
            status,
            body: Box::pin(stream),
        })
    }
}
