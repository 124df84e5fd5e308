// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator
//
// Loads ferry.yaml, resolves variable interpolation, validates URLs and
// algorithms, and computes a deterministic config hash for start-up logs.

mod defaults;
mod error;
mod interpolation;
mod loader;
mod raw;
mod source;
mod types;

pub use defaults::*;
pub use error::ConfigError;
pub use interpolation::resolve_variables;
pub use loader::{compute_hash, load_config};
pub use source::{ConfigSource, FileSource, StringSource};
pub use types::{AuthConfig, Config, RelayConfig, ServerConfig, UpstreamConfig};
