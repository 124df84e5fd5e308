// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use jsonwebtoken::Algorithm;

use super::defaults::*;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Parsed and validated ferry config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Config format version. Always "v1".
    pub version: String,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    pub relay: RelayConfig,
    /// Environment label (e.g. "staging", "production").
    pub environment: String,
    /// SHA256 of the raw YAML: "sha256:{hex}".
    pub config_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

// ---------------------------------------------------------------------------
// Upstream inference service
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    /// Scheme + host (+ optional prefix) of the inference service.
    pub base_url: String,
    /// Identifier of the deployed endpoint to invoke.
    pub endpoint_id: String,
    /// Path template; `{endpoint_id}` is substituted by `endpoint_url`.
    pub path: String,
    pub connect_timeout: Duration,
}

impl UpstreamConfig {
    /// Full invocation URL for the configured endpoint.
    pub fn endpoint_url(&self) -> String {
        let path = self.path.replace("{endpoint_id}", &self.endpoint_id);
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}

// ---------------------------------------------------------------------------
// Identity verification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    /// JWKS document of the trusted issuer.
    pub jwks_url: String,
    /// Required `iss` claim.
    pub issuer: String,
    /// Required `aud` claim (the client identifier).
    pub audience: String,
    /// Signature algorithms accepted in the token header.
    pub algorithms: Vec<Algorithm>,
    pub leeway_secs: u64,
    /// How long a fetched key set is trusted before it is refetched.
    pub jwks_ttl: Duration,
    /// Minimum gap between forced refetches triggered by unknown key ids.
    pub jwks_min_refresh: Duration,
}

impl AuthConfig {
    /// Config with default timings, for callers that only know the issuer.
    pub fn new(
        jwks_url: impl Into<String>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            algorithms: vec![Algorithm::RS256],
            leeway_secs: DEFAULT_LEEWAY_SECS,
            jwks_ttl: Duration::from_secs(DEFAULT_JWKS_TTL_SECS),
            jwks_min_refresh: Duration::from_secs(DEFAULT_JWKS_MIN_REFRESH_SECS),
        }
    }
}

// ---------------------------------------------------------------------------
// Relay limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    pub max_line_bytes: usize,
    /// `None` waits on upstream forever.
    pub idle_timeout: Option<Duration>,
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            idle_timeout: Some(Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS)),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
