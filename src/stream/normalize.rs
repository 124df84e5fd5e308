// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Event normalizer
//
// The upstream service does not commit to one framing: sometimes proper
// SSE, sometimes bare JSON lines, sometimes plain text. Each complete line
// is classified into an `UpstreamLine` first, then its payload is turned
// into the canonical event shape.

use serde_json::error::Category;
use serde_json::Value;

use super::types::{CanonicalEvent, NormalizeError, Normalized};

/// Literal payload that marks normal end of stream.
pub const SENTINEL: &str = "[DONE]";

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

/// Shape of one upstream line, before its payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamLine<'a> {
    /// Empty or whitespace only. SSE event separator.
    Blank,
    /// SSE comment (`:`) or a non-data field (`event:`, `id:`, `retry:`)
    /// whose value fits the field.
    Control,
    /// `data: [DONE]`.
    Sentinel,
    /// Payload of a `data:` line, trimmed.
    Data(&'a str),
    /// A line without SSE framing: bare JSON or plain text.
    Bare(&'a str),
}

/// Classify a complete line. First match wins.
pub fn classify_line(line: &str) -> UpstreamLine<'_> {
    let trimmed = line.trim();

    if trimmed.is_empty() {
        return UpstreamLine::Blank;
    }

    if let Some(payload) = trimmed.strip_prefix("data:") {
        let payload = payload.trim();
        if payload == SENTINEL {
            return UpstreamLine::Sentinel;
        }
        return UpstreamLine::Data(payload);
    }

    if is_control_line(trimmed) {
        return UpstreamLine::Control;
    }

    // Keep the text as sent apart from the line terminator.
    UpstreamLine::Bare(line.trim_end_matches(['\r', '\n']))
}

/// Comments and non-data fields carry a single token (`retry:` a number).
/// Prose such as `id: 42 is the answer` does not match and stays text.
fn is_control_line(line: &str) -> bool {
    if let Some(comment) = line.strip_prefix(':') {
        return is_token(comment.trim());
    }
    let Some((field, value)) = line.split_once(':') else {
        return false;
    };
    let value = value.trim();
    match field {
        "event" => !value.is_empty() && is_token(value),
        "id" => is_token(value),
        "retry" => !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()),
        _ => false,
    }
}

fn is_token(value: &str) -> bool {
    !value.contains(char::is_whitespace)
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Convert one complete line into a canonical event, a sentinel, or nothing.
///
/// Returns `Err` only when the line's JSON carries an explicit `error`.
/// Truncated JSON fragments are dropped; plain text is never dropped.
pub fn normalize(line: &str) -> Result<Option<Normalized>, NormalizeError> {
    let payload = match classify_line(line) {
        UpstreamLine::Blank | UpstreamLine::Control => return Ok(None),
        UpstreamLine::Sentinel => return Ok(Some(Normalized::Sentinel)),
        // A sentinel that lost its `data:` framing is not a reply.
        UpstreamLine::Bare(payload) if payload.trim() == SENTINEL => return Ok(None),
        UpstreamLine::Data(payload) | UpstreamLine::Bare(payload) => payload,
    };

    if payload.trim().is_empty() {
        return Ok(None);
    }

    match serde_json::from_str::<Value>(payload.trim()) {
        Ok(value) => interpret_json(value, payload).map(|ev| ev.map(Normalized::Event)),
        Err(e) if is_truncated_json(payload, &e) => {
            tracing::debug!(error = %e, len = payload.len(), "dropping truncated JSON fragment");
            Ok(None)
        }
        Err(_) => Ok(Some(Normalized::Event(CanonicalEvent::text(payload)))),
    }
}

/// An object or array that ran out of input mid-value. `[1] See below` or
/// `{name} is a placeholder` fail with a syntax error instead and are text.
fn is_truncated_json(payload: &str, error: &serde_json::Error) -> bool {
    let start = payload.trim_start();
    (start.starts_with('{') || start.starts_with('[')) && error.classify() == Category::Eof
}

fn interpret_json(value: Value, original: &str) -> Result<Option<CanonicalEvent>, NormalizeError> {
    if let Some(message) = error_message(&value) {
        return Err(NormalizeError::Upstream(message));
    }

    if let Some(text) = extract_text(&value) {
        return Ok(Some(CanonicalEvent::text(text)));
    }

    match value {
        Value::String(s) => Ok(Some(CanonicalEvent::text(s))),
        // `42`, `true`, `null` parse as JSON but are really plain text.
        Value::Number(_) | Value::Bool(_) | Value::Null => {
            Ok(Some(CanonicalEvent::text(original)))
        }
        // Metadata, message start/stop and the like.
        Value::Object(_) | Value::Array(_) => Ok(None),
    }
}

/// `{"error":"X"}` or `{"error":{"message":"X"}}`.
fn error_message(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .map(|m| m.to_string()),
        _ => None,
    }
}

/// Locate a text delta in the shapes the upstream is known to send.
///
/// Order:
/// - `event.contentBlockDelta.delta.text` (already canonical)
/// - `contentBlockDelta.delta.text`
/// - `delta.text`
/// - `choices[0].delta.content`
/// - top-level `text`
fn extract_text(value: &Value) -> Option<String> {
    let candidates = [
        value
            .get("event")
            .and_then(|e| e.get("contentBlockDelta"))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("text")),
        value
            .get("contentBlockDelta")
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("text")),
        value.get("delta").and_then(|d| d.get("text")),
        value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
            .and_then(|d| d.get("content")),
        value.get("text"),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str())
        .map(|s| s.to_string())
}
