// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Client-side stream consumer
//
// Responsibilities:
// - Fetch fresh credentials before every attempt
// - Open the relay stream and mirror its framing on the receiving side
// - Grow one assistant message as deltas arrive, publishing whole snapshots
// - Retry the whole request on transport or HTTP failure, with exponential
//   backoff, until the retry budget is spent

mod consumer;
mod credentials;
mod state;

pub use consumer::{decode_frame, RetryPolicy, SendReport, StreamConsumer};
pub use credentials::{CredentialProvider, Credentials, FileCredentials, StaticCredentials};
pub use state::{ChatMessage, ChatStore, ChatView, Role, SendPhase};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("could not obtain credentials: {0}")]
    Credentials(String),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Error event sent by the relay inside the stream.
    #[error("{0}")]
    Upstream(String),

    #[error("invalid server URL {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Transport and HTTP failures are worth another attempt; everything
    /// else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_) | ClientError::Status { .. })
    }
}
