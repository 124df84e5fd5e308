// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Streaming relay core
//
// Responsibilities:
// - Reframe arbitrary upstream byte chunks into complete lines
// - Normalize each line (SSE data, bare JSON, plain text) into one
//   canonical event shape
// - Drive the upstream read loop and write canonical SSE frames downstream
// - Close the downstream stream exactly once, whatever ends the exchange

pub mod normalize;
pub mod reframe;
pub mod relay;
pub mod sink;
pub mod types;

pub use normalize::{classify_line, normalize, UpstreamLine, SENTINEL};
pub use reframe::LineReframer;
pub use relay::{RelayController, RelayOutcome};
pub use sink::{DownstreamSink, SinkState};
pub use types::{CanonicalEvent, NormalizeError, Normalized, ReframeError};
