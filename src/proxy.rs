// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Responsibilities:
// - Gate chat requests on the identity token, then the access credential,
//   then the request body
// - Hand each accepted request to the relay controller on its own task and
//   stream its SSE frames back as the response body
// - Heartbeat endpoint
// - 404 for unknown paths

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{inspect_credential, JwtValidator, TokenValidator};
use crate::config::Config;
use crate::stream::RelayController;
use crate::upstream::{ReqwestUpstreamClient, UpstreamError, UpstreamRequest};

pub const CHAT_STREAM_PATH: &str = "/v1/chat/stream";
pub const HEARTBEAT_PATH: &str = "/v1/heartbeat";
/// Header carrying the credential forwarded to the inference service.
pub const ACCESS_TOKEN_HEADER: &str = "x-access-token";

const MAX_BODY_BYTES: usize = 1024 * 1024;
const KEY_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: Option<String>,
    pub session_id: Option<String>,
}

/// Failures answered before any stream is opened.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("prompt is required")]
    MissingPrompt,

    #[error("request body is not valid JSON: {0}")]
    MalformedBody(String),

    #[error("request body exceeds {} bytes", MAX_BODY_BYTES)]
    BodyTooLarge,

    #[error("failed to read request body: {0}")]
    BodyRead(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let (status, public_message) = match &self {
            ProxyError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ProxyError::MissingPrompt => (StatusCode::BAD_REQUEST, self.to_string()),
            ProxyError::MalformedBody(_) => (
                StatusCode::BAD_REQUEST,
                "request body is not valid JSON".to_string(),
            ),
            ProxyError::BodyTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, self.to_string()),
            ProxyError::BodyRead(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ProxyError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        (status, public_message).into_response()
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub validator: Arc<dyn TokenValidator>,
    pub relay: Arc<RelayController>,
    /// Fully resolved upstream invocation URL.
    pub upstream_url: String,
}

/// Wire the production collaborators from configuration.
pub fn build_state(config: &Config) -> Result<AppState, UpstreamError> {
    let upstream = ReqwestUpstreamClient::from_config(&config.upstream)?;

    let key_client = reqwest::Client::builder()
        .timeout(KEY_FETCH_TIMEOUT)
        .build()
        .map_err(|e| UpstreamError::Transport(format!("failed to build HTTP client: {e}")))?;
    let validator = JwtValidator::from_config(config.auth.clone(), key_client);

    Ok(AppState {
        validator: Arc::new(validator),
        relay: Arc::new(RelayController::new(Arc::new(upstream), config.relay)),
        upstream_url: config.upstream.endpoint_url(),
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Heartbeat endpoint: GET /v1/heartbeat -> 200 OK
pub async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

/// POST /v1/chat/stream
///
/// Authentication is checked before the body is read, so an
/// unauthenticated caller learns nothing about request validation.
pub async fn chat_stream(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let headers = parts.headers;

    let id_token = extract_bearer(headers.get(header::AUTHORIZATION))
        .ok_or_else(|| ProxyError::Unauthorized("missing identity token".into()))?;

    let claims = state.validator.check(&id_token).await.map_err(|e| {
        tracing::warn!(reason = %e, "identity token rejected");
        ProxyError::Unauthorized(e.to_string())
    })?;

    let credential = headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProxyError::Unauthorized("missing access token".into()))?
        .to_string();

    let body = read_body(body).await?;
    let request = parse_chat_request(&body)?;
    let prompt = request
        .prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or(ProxyError::MissingPrompt)?;

    let upstream_request = UpstreamRequest::new(&state.upstream_url, credential, prompt)
        .map_err(|e| ProxyError::Internal(e.to_string()))?;

    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!(
        "relay",
        request_id = %request_id,
        session_id = request.session_id.as_deref().unwrap_or("-"),
        sub = %claims.sub,
    );
    span.in_scope(|| {
        if let Some(summary) = inspect_credential(&upstream_request.credential) {
            tracing::debug!(
                credential_sub = summary.sub.as_deref().unwrap_or("-"),
                credential_exp = ?summary.expires_at,
                "forwarding access credential"
            );
            // Forwarded anyway; upstream has the final say.
            if summary.is_expired_at(chrono::Utc::now()) {
                tracing::warn!("access credential appears to be expired");
            }
        }
        tracing::info!(prompt_len = upstream_request.prompt.len(), "chat stream accepted");
    });

    let frames = state.relay.spawn(upstream_request, span);
    let body = Body::from_stream(frames.map(Ok::<Bytes, Infallible>));

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        body,
    )
        .into_response())
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "unknown path")
}

/// Collect the request body, refusing anything over `MAX_BODY_BYTES`.
async fn read_body(body: Body) -> Result<Bytes, ProxyError> {
    let mut frames = body.into_data_stream();
    let mut collected = Vec::new();
    while let Some(frame) = frames.next().await {
        let frame = frame.map_err(|e| ProxyError::BodyRead(e.to_string()))?;
        if collected.len() + frame.len() > MAX_BODY_BYTES {
            return Err(ProxyError::BodyTooLarge);
        }
        collected.extend_from_slice(&frame);
    }
    Ok(Bytes::from(collected))
}

fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, ProxyError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ProxyError::MissingPrompt);
    }
    serde_json::from_slice(body).map_err(|e| ProxyError::MalformedBody(e.to_string()))
}

fn extract_bearer(header: Option<&HeaderValue>) -> Option<String> {
    let value = header?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router with the chat stream and heartbeat endpoints.
///
/// All collaborators come in through the state; no hard-coded clients.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(CHAT_STREAM_PATH, post(chat_stream))
        .route(HEARTBEAT_PATH, get(heartbeat))
        .fallback(not_found)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, Claims};
    use crate::config::RelayConfig;
    use crate::upstream::{UpstreamClient, UpstreamResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tower::ServiceExt; // for oneshot

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Accepts exactly one token value.
    struct FixedValidator;

    #[async_trait]
    impl TokenValidator for FixedValidator {
        async fn check(&self, token: &str) -> Result<Claims, AuthError> {
            if token == "good-id-token" {
                Ok(Claims {
                    sub: "user-1".into(),
                    iss: "https://idp.test".into(),
                    exp: u64::MAX,
                })
            } else {
                Err(AuthError::BadSignature)
            }
        }
    }

    /// Records every upstream request and answers with canned chunks.
    struct CapturingUpstream {
        status: StatusCode,
        chunks: Vec<&'static str>,
        seen: Mutex<Vec<(String, String, String)>>,
    }

    impl CapturingUpstream {
        fn new(status: StatusCode, chunks: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                status,
                chunks,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<(String, String, String)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl UpstreamClient for CapturingUpstream {
        async fn open(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
            self.seen.lock().unwrap().push((
                request.url.to_string(),
                request.credential.clone(),
                request.prompt.clone(),
            ));
            let chunks: Vec<Result<Bytes, UpstreamError>> = self
                .chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect();
            Ok(UpstreamResponse {
                status: self.status,
                body: Box::pin(futures_util::stream::iter(chunks)),
            })
        }
    }

    fn hi_there() -> Arc<CapturingUpstream> {
        CapturingUpstream::new(
            StatusCode::OK,
            vec![
                "data: {\"contentBlockDelta\":{\"delta\":{\"text\":\"Hi\"}}}\n\n",
                "data: {\"contentBlockDelta\":{\"delta\":{\"text\":\" there\"}}}\n\n",
                "data: [DONE]\n\n",
            ],
        )
    }

    fn app_with(upstream: Arc<CapturingUpstream>, upstream_url: &str) -> Router {
        build_router(AppState {
            validator: Arc::new(FixedValidator),
            relay: Arc::new(RelayController::new(upstream, RelayConfig::default())),
            upstream_url: upstream_url.to_string(),
        })
    }

    fn app(upstream: Arc<CapturingUpstream>) -> Router {
        app_with(upstream, "http://upstream.test/endpoints/e1/invocations-stream")
    }

    fn chat_request(id_token: Option<&str>, access: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(CHAT_STREAM_PATH)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream");
        if let Some(token) = id_token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if let Some(access) = access {
            builder = builder.header(ACCESS_TOKEN_HEADER, access);
        }
        builder.body(Body::from(body.to_owned())).unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8_lossy(&body).into_owned()
    }

    // -----------------------------------------------------------------------
    // Auth gate
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn missing_authorization_returns_401_without_stream() {
        let upstream = hi_there();
        let resp = app(upstream.clone())
            .oneshot(chat_request(None, Some("access-1"), r#"{"prompt":"hello"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(
            resp.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(&b"text/event-stream"[..])
        );
        assert_eq!(body_string(resp).await, "Unauthorized: missing identity token");
        assert!(upstream.seen().is_empty());
    }

    #[tokio::test]
    async fn invalid_identity_token_returns_401_with_reason() {
        let upstream = hi_there();
        let resp = app(upstream.clone())
            .oneshot(chat_request(Some("forged"), Some("access-1"), r#"{"prompt":"hello"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(resp).await, "Unauthorized: bad signature");
        assert!(upstream.seen().is_empty());
    }

    #[tokio::test]
    async fn missing_access_token_returns_401() {
        let resp = app(hi_there())
            .oneshot(chat_request(Some("good-id-token"), None, r#"{"prompt":"hello"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_string(resp).await, "Unauthorized: missing access token");
    }

    #[tokio::test]
    async fn auth_is_checked_before_body() {
        let resp = app(hi_there())
            .oneshot(chat_request(Some("forged"), Some("access-1"), "not json {{{"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn oversized_body_from_unauthenticated_caller_returns_401() {
        let huge = format!(r#"{{"prompt":"{}"}}"#, "a".repeat(3 * 1024 * 1024));
        let resp = app(hi_there())
            .oneshot(chat_request(Some("forged"), Some("access-1"), &huge))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    // -----------------------------------------------------------------------
    // Body validation
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn malformed_json_returns_400() {
        let resp = app(hi_there())
            .oneshot(chat_request(Some("good-id-token"), Some("access-1"), "not json {{{"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_string(resp).await;
        assert!(body.contains("not valid JSON"), "got: {body}");
    }

    #[tokio::test]
    async fn oversized_body_returns_413() {
        let upstream = hi_there();
        let huge = format!(r#"{{"prompt":"{}"}}"#, "a".repeat(MAX_BODY_BYTES));
        let resp = app(upstream.clone())
            .oneshot(chat_request(Some("good-id-token"), Some("access-1"), &huge))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            body_string(resp).await,
            format!("request body exceeds {MAX_BODY_BYTES} bytes")
        );
        assert!(upstream.seen().is_empty());
    }

    #[tokio::test]
    async fn blank_or_missing_prompt_returns_400() {
        for body in [r#"{"prompt":"   "}"#, r#"{"sessionId":"s1"}"#, ""] {
            let upstream = hi_there();
            let resp = app(upstream.clone())
                .oneshot(chat_request(Some("good-id-token"), Some("access-1"), body))
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body:?}");
            assert_eq!(body_string(resp).await, "prompt is required");
            assert!(upstream.seen().is_empty());
        }
    }

    // -----------------------------------------------------------------------
    // Streaming
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn accepted_request_streams_canonical_frames() {
        let upstream = hi_there();
        let resp = app(upstream.clone())
            .oneshot(chat_request(
                Some("good-id-token"),
                Some("access-1"),
                r#"{"prompt":"hello","sessionId":"s-9"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(resp.headers().get(header::CACHE_CONTROL).unwrap(), "no-cache");

        let body = body_string(resp).await;
        assert_eq!(
            body,
            "data: {\"event\":{\"contentBlockDelta\":{\"delta\":{\"text\":\"Hi\"}}}}\n\n\
             data: {\"event\":{\"contentBlockDelta\":{\"delta\":{\"text\":\" there\"}}}}\n\n"
        );
        assert!(!body.contains("[DONE]"));

        let seen = upstream.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "http://upstream.test/endpoints/e1/invocations-stream");
        assert_eq!(seen[0].1, "access-1");
        assert_eq!(seen[0].2, "hello");
    }

    #[tokio::test]
    async fn upstream_failure_is_an_error_event_in_a_200_stream() {
        let upstream = CapturingUpstream::new(StatusCode::BAD_GATEWAY, vec![]);
        let resp = app(upstream)
            .oneshot(chat_request(Some("good-id-token"), Some("access-1"), r#"{"prompt":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_string(resp).await,
            "data: {\"error\":\"upstream returned 502 Bad Gateway\"}\n\n"
        );
    }

    #[tokio::test]
    async fn unusable_upstream_url_returns_500() {
        let resp = app_with(hi_there(), "not a url")
            .oneshot(chat_request(Some("good-id-token"), Some("access-1"), r#"{"prompt":"hi"}"#))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_string(resp).await.starts_with("Internal Server Error: "));
    }

    // -----------------------------------------------------------------------
    // Misc routes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn heartbeat_returns_200() {
        let req = Request::builder()
            .method("GET")
            .uri(HEARTBEAT_PATH)
            .body(Body::empty())
            .unwrap();
        let resp = app(hi_there()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_path_returns_404() {
        let req = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .body(Body::empty())
            .unwrap();
        let resp = app(hi_there()).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bearer_extraction() {
        let v = HeaderValue::from_static("Bearer abc.def ");
        assert_eq!(extract_bearer(Some(&v)).as_deref(), Some("abc.def"));
        let v = HeaderValue::from_static("bearer xyz");
        assert_eq!(extract_bearer(Some(&v)).as_deref(), Some("xyz"));
        let v = HeaderValue::from_static("Basic dXNlcg==");
        assert_eq!(extract_bearer(Some(&v)), None);
        let v = HeaderValue::from_static("Bearer ");
        assert_eq!(extract_bearer(Some(&v)), None);
        assert_eq!(extract_bearer(None), None);
    }
}
