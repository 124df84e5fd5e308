// Raw YAML deserialization types (internal)
// Kept apart from the public Config structs because interpolation, URL
// checks and algorithm parsing happen between raw and typed config.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub ferry: String,
    pub server: Option<RawServerConfig>,
    pub upstream: RawUpstreamConfig,
    pub auth: RawAuthConfig,
    pub relay: Option<RawRelayConfig>,
    pub environment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawServerConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct RawUpstreamConfig {
    pub base_url: String,
    pub endpoint_id: String,
    pub path: Option<String>,
    pub connect_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RawAuthConfig {
    pub jwks_url: String,
    pub issuer: String,
    pub audience: String,
    #[serde(default)]
    pub algorithms: Vec<String>,
    pub leeway_secs: Option<u64>,
    pub jwks_ttl_secs: Option<u64>,
    pub jwks_min_refresh_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct RawRelayConfig {
    pub max_line_bytes: Option<usize>,
    /// `0` disables the idle timeout.
    pub idle_timeout_ms: Option<u64>,
    pub channel_capacity: Option<usize>,
}
