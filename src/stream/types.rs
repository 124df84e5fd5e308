// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// The canonical event shape shared by the relay and the client consumer,
// plus the error types of the reframing and normalizing stages.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Canonical event
// ---------------------------------------------------------------------------

/// The single wire shape downstream consumers understand.
///
/// Serialized as either
/// `{"event":{"contentBlockDelta":{"delta":{"text":"..."}}}}` or
/// `{"error":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CanonicalEvent {
    Delta { event: DeltaEnvelope },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaEnvelope {
    pub content_block_delta: ContentBlockDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlockDelta {
    pub delta: TextDelta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDelta {
    pub text: String,
}

impl CanonicalEvent {
    pub fn text(text: impl Into<String>) -> Self {
        CanonicalEvent::Delta {
            event: DeltaEnvelope {
                content_block_delta: ContentBlockDelta {
                    delta: TextDelta { text: text.into() },
                },
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        CanonicalEvent::Error {
            error: message.into(),
        }
    }

    /// The text fragment carried by a delta event.
    pub fn text_delta(&self) -> Option<&str> {
        match self {
            CanonicalEvent::Delta { event } => Some(&event.content_block_delta.delta.text),
            CanonicalEvent::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CanonicalEvent::Error { .. })
    }

    /// Encode as one SSE frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> Bytes {
        let json = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"error":"unserializable event"}"#.to_string());
        Bytes::from(format!("data: {json}\n\n"))
    }
}

// ---------------------------------------------------------------------------
// Normalizer output
// ---------------------------------------------------------------------------

/// What a single upstream line turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Event(CanonicalEvent),
    /// `data: [DONE]`: normal end of stream.
    Sentinel,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A line whose JSON carries an explicit error. Terminates the relay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("{0}")]
    Upstream(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReframeError {
    #[error("upstream line exceeded {limit} bytes without a newline")]
    LineTooLong { limit: usize },
}
