// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Built-in defaults for optional config fields.

/// Listen port when neither config nor CLI sets one.
pub const DEFAULT_PORT: u16 = 9810;

/// Upstream path template. `{endpoint_id}` is replaced at load time.
pub const DEFAULT_UPSTREAM_PATH: &str = "/endpoints/{endpoint_id}/invocations-stream";

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

pub const DEFAULT_ALGORITHM: &str = "RS256";

pub const DEFAULT_LEEWAY_SECS: u64 = 30;

pub const DEFAULT_JWKS_TTL_SECS: u64 = 3600;

pub const DEFAULT_JWKS_MIN_REFRESH_SECS: u64 = 30;

/// Largest unterminated upstream line the reframer will hold.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576; // 1 MB

/// Longest silence tolerated between upstream chunks.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 120_000;

/// Frames buffered between the relay task and the HTTP response body.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
