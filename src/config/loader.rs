// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use sha2::{Digest, Sha256};

use super::defaults::*;
use super::error::ConfigError;
use super::interpolation::resolve_variables;
use super::raw;
use super::source::ConfigSource;
use super::types::*;

/// Load and validate a ferry config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Compute SHA256 config hash
/// 3. Parse YAML into raw deserialization types
/// 4. Validate version
/// 5. Resolve `${VAR}` interpolation in string fields
/// 6. Check URLs and algorithms, fill defaults
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let config_hash = compute_hash(&raw_yaml);

    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.ferry != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported config version \"{}\", expected \"v1\"",
            raw.ferry
        )));
    }

    let server = ServerConfig {
        port: raw
            .server
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_PORT),
    };

    Ok(Config {
        version: raw.ferry,
        server,
        upstream: build_upstream_config(raw.upstream)?,
        auth: build_auth_config(raw.auth)?,
        relay: build_relay_config(raw.relay)?,
        environment: match raw.environment {
            Some(env) => resolve_variables(&env)?,
            None => String::new(),
        },
        config_hash,
    })
}

pub fn compute_hash(raw_yaml: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_yaml.as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

fn build_upstream_config(raw: raw::RawUpstreamConfig) -> Result<UpstreamConfig, ConfigError> {
    let base_url = resolve_variables(&raw.base_url)?;
    require_http_url("upstream.base_url", &base_url)?;

    let endpoint_id = resolve_variables(&raw.endpoint_id)?;
    if endpoint_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "upstream.endpoint_id must not be empty".to_string(),
        ));
    }
    if endpoint_id.contains('/') {
        return Err(ConfigError::Validation(format!(
            "upstream.endpoint_id \"{endpoint_id}\" must not contain '/'"
        )));
    }

    let path = match raw.path {
        Some(p) => resolve_variables(&p)?,
        None => DEFAULT_UPSTREAM_PATH.to_string(),
    };

    let upstream = UpstreamConfig {
        base_url,
        endpoint_id,
        path,
        connect_timeout: Duration::from_millis(
            raw.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        ),
    };
    require_http_url("upstream endpoint URL", &upstream.endpoint_url())?;

    Ok(upstream)
}

fn build_auth_config(raw: raw::RawAuthConfig) -> Result<AuthConfig, ConfigError> {
    let jwks_url = resolve_variables(&raw.jwks_url)?;
    require_http_url("auth.jwks_url", &jwks_url)?;

    let issuer = resolve_variables(&raw.issuer)?;
    let audience = resolve_variables(&raw.audience)?;
    for (field, value) in [("auth.issuer", &issuer), ("auth.audience", &audience)] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{field} must not be empty")));
        }
    }

    let names = if raw.algorithms.is_empty() {
        vec![DEFAULT_ALGORITHM.to_string()]
    } else {
        raw.algorithms
    };
    let algorithms = names
        .iter()
        .map(|name| {
            Algorithm::from_str(name).map_err(|_| {
                ConfigError::Validation(format!("unknown signature algorithm \"{name}\""))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(AuthConfig {
        jwks_url,
        issuer,
        audience,
        algorithms,
        leeway_secs: raw.leeway_secs.unwrap_or(DEFAULT_LEEWAY_SECS),
        jwks_ttl: Duration::from_secs(raw.jwks_ttl_secs.unwrap_or(DEFAULT_JWKS_TTL_SECS)),
        jwks_min_refresh: Duration::from_secs(
            raw.jwks_min_refresh_secs
                .unwrap_or(DEFAULT_JWKS_MIN_REFRESH_SECS),
        ),
    })
}

fn build_relay_config(raw: Option<raw::RawRelayConfig>) -> Result<RelayConfig, ConfigError> {
    let raw = match raw {
        Some(r) => r,
        None => return Ok(RelayConfig::default()),
    };

    let max_line_bytes = raw.max_line_bytes.unwrap_or(DEFAULT_MAX_LINE_BYTES);
    if max_line_bytes == 0 {
        return Err(ConfigError::Validation(
            "relay.max_line_bytes must be greater than 0".to_string(),
        ));
    }

    let channel_capacity = raw.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
    if channel_capacity == 0 {
        return Err(ConfigError::Validation(
            "relay.channel_capacity must be greater than 0".to_string(),
        ));
    }

    let idle_timeout = match raw.idle_timeout_ms.unwrap_or(DEFAULT_IDLE_TIMEOUT_MS) {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };

    Ok(RelayConfig {
        max_line_bytes,
        idle_timeout,
        channel_capacity,
    })
}

fn require_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value)
        .map_err(|e| ConfigError::Validation(format!("{field} \"{value}\" is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Validation(format!(
            "{field} must use http or https, got \"{other}\""
        ))),
    }
}
