// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Stream consumer
//
// One `send` drives a sequential loop: credentials, connect, stream, and on
// a retryable failure a cancellable backoff before the next attempt. Only
// one retry is ever pending per send, and nothing is retried once the reply
// has started streaming.

use axum::http::header;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::credentials::{CredentialProvider, Credentials};
use super::state::{ChatStore, Role, SendPhase};
use super::ClientError;
use crate::proxy::{ACCESS_TOKEN_HEADER, CHAT_STREAM_PATH};
use crate::stream::{CanonicalEvent, LineReframer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `attempt + 1`: `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// What one `send` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Connection attempts made.
    pub attempts: u32,
    /// Final accumulated assistant text.
    pub text: String,
    /// Every phase entered, in order. The last one is terminal.
    pub transitions: Vec<SendPhase>,
}

static IDLE: SendPhase = SendPhase::Idle;

impl SendReport {
    pub fn phase(&self) -> &SendPhase {
        self.transitions.last().unwrap_or(&IDLE)
    }
}

/// Decode one line of the relay's SSE output. Only `data:` lines carry
/// events; anything else, or an unparseable payload, yields `None`.
pub fn decode_frame(line: &str) -> Option<CanonicalEvent> {
    let payload = line.trim().strip_prefix("data:")?.trim();
    serde_json::from_str(payload).ok()
}

enum AttemptError {
    Cancelled,
    /// Failed before the reply started streaming.
    Connect(ClientError),
    /// Failed once streaming had begun. Never retried.
    Stream(ClientError),
}

impl From<ClientError> for AttemptError {
    fn from(e: ClientError) -> Self {
        AttemptError::Connect(e)
    }
}

pub struct StreamConsumer {
    http: reqwest::Client,
    endpoint: reqwest::Url,
    credentials: Arc<dyn CredentialProvider>,
    retry: RetryPolicy,
    session_id: String,
    store: ChatStore,
}

impl StreamConsumer {
    /// `server` is the relay's base URL, e.g. `http://127.0.0.1:9810`.
    pub fn new(
        server: &str,
        credentials: Arc<dyn CredentialProvider>,
        retry: RetryPolicy,
    ) -> Result<Self, ClientError> {
        let endpoint = reqwest::Url::parse(server)
            .and_then(|base| base.join(CHAT_STREAM_PATH))
            .map_err(|e| ClientError::InvalidUrl(format!("{server}: {e}")))?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
            credentials,
            retry,
            session_id: uuid::Uuid::new_v4().to_string(),
            store: ChatStore::new(),
        })
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub async fn send(&self, prompt: &str) -> SendReport {
        self.send_cancellable(prompt, CancellationToken::new()).await
    }

    /// Send one prompt and consume its reply. Cancelling the token aborts a
    /// pending retry wait or an in-flight stream.
    pub async fn send_cancellable(&self, prompt: &str, cancel: CancellationToken) -> SendReport {
        self.store.push(Role::User, prompt);
        let placeholder = self.store.push(Role::Assistant, "");

        let mut report = SendReport {
            attempts: 0,
            text: String::new(),
            transitions: Vec::new(),
        };

        let mut attempt = 0;
        let result = loop {
            match self.attempt(prompt, placeholder, attempt, &cancel, &mut report).await {
                Ok(()) => break Ok(()),
                Err(AttemptError::Cancelled) => break Err(None),
                Err(AttemptError::Stream(e)) => break Err(Some(e)),
                Err(AttemptError::Connect(e)) => {
                    if !e.is_retryable() || attempt >= self.retry.max_retries {
                        break Err(Some(e));
                    }
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "attempt failed; retrying");
                    attempt += 1;
                    self.enter(&mut report, SendPhase::Retrying { attempt, delay });
                    tokio::select! {
                        _ = cancel.cancelled() => break Err(None),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                if report.text.is_empty() {
                    self.store.remove(placeholder);
                }
                self.enter(&mut report, SendPhase::Completed);
            }
            Err(Some(e)) => {
                tracing::warn!(error = %e, attempts = report.attempts, "send failed");
                let message = e.to_string();
                self.store.show_error(placeholder, &message);
                self.enter(&mut report, SendPhase::Failed(message));
            }
            Err(None) => {
                if report.text.is_empty() {
                    self.store.remove(placeholder);
                }
                self.enter(&mut report, SendPhase::Cancelled);
            }
        }
        report
    }

    async fn attempt(
        &self,
        prompt: &str,
        placeholder: u64,
        attempt: u32,
        cancel: &CancellationToken,
        report: &mut SendReport,
    ) -> Result<(), AttemptError> {
        self.enter(report, SendPhase::TokenFetch);
        let credentials = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            c = self.credentials.credentials() => c?,
        };

        self.enter(report, SendPhase::Connecting { attempt });
        report.attempts += 1;
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
            r = self.open(prompt, &credentials) => r?,
        };

        self.enter(report, SendPhase::Streaming);
        let mut body = Box::pin(response.bytes_stream());
        let mut reframer = LineReframer::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(AttemptError::Cancelled),
                next = body.next() => next,
            };
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    return Err(AttemptError::Stream(ClientError::Transport(e.to_string())))
                }
                None => break,
            };
            // The unbounded reframer cannot fail.
            let lines = reframer.feed(&chunk).unwrap_or_default();
            for line in lines {
                self.apply(&line, placeholder, report).map_err(AttemptError::Stream)?;
            }
        }
        if let Some(line) = reframer.finish() {
            self.apply(&line, placeholder, report).map_err(AttemptError::Stream)?;
        }
        Ok(())
    }

    async fn open(
        &self,
        prompt: &str,
        credentials: &Credentials,
    ) -> Result<reqwest::Response, ClientError> {
        let body = serde_json::json!({ "prompt": prompt, "sessionId": self.session_id });
        let resp = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&credentials.id_token)
            .header(ACCESS_TOKEN_HEADER, &credentials.access_token)
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    fn apply(&self, line: &str, placeholder: u64, report: &mut SendReport) -> Result<(), ClientError> {
        match decode_frame(line) {
            Some(CanonicalEvent::Delta { event }) => {
                report.text.push_str(&event.content_block_delta.delta.text);
                self.store.replace_text(placeholder, &report.text);
                Ok(())
            }
            Some(CanonicalEvent::Error { error }) => Err(ClientError::Upstream(error)),
            None => Ok(()),
        }
    }

    fn enter(&self, report: &mut SendReport, phase: SendPhase) {
        tracing::debug!(phase = ?phase, "send phase");
        self.store.set_phase(phase.clone());
        report.transitions.push(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StaticCredentials;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HI_THERE: &str = "data: {\"event\":{\"contentBlockDelta\":{\"delta\":{\"text\":\"Hi\"}}}}\n\n\
                            data: {\"event\":{\"contentBlockDelta\":{\"delta\":{\"text\":\" there\"}}}}\n\n";

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body)
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(5),
        }
    }

    fn consumer(server: &MockServer, retry: RetryPolicy) -> StreamConsumer {
        let creds = Arc::new(StaticCredentials::new(Credentials::new("id-1", "acc-1")));
        StreamConsumer::new(&server.uri(), creds, retry).unwrap()
    }

    /// Hands out `id-1`, `id-2`, ... so each attempt is distinguishable.
    struct CountingCredentials {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CredentialProvider for CountingCredentials {
        async fn credentials(&self) -> Result<Credentials, ClientError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credentials::new(format!("id-{n}"), "acc"))
        }
    }

    struct NoCredentials;

    #[async_trait]
    impl CredentialProvider for NoCredentials {
        async fn credentials(&self) -> Result<Credentials, ClientError> {
            Err(ClientError::Credentials("signed out".into()))
        }
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(40), Duration::from_millis(100).saturating_mul(u32::MAX));
    }

    #[test]
    fn decode_frame_reads_only_data_lines() {
        assert_eq!(
            decode_frame(r#"data: {"event":{"contentBlockDelta":{"delta":{"text":"x"}}}}"#),
            Some(CanonicalEvent::text("x"))
        );
        assert_eq!(decode_frame(r#"data: {"error":"boom"}"#), Some(CanonicalEvent::error("boom")));
        assert_eq!(decode_frame(""), None);
        assert_eq!(decode_frame(": comment"), None);
        assert_eq!(decode_frame("data: {broken"), None);
    }

    #[tokio::test]
    async fn streams_reply_into_one_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_STREAM_PATH))
            .and(header("authorization", "Bearer id-1"))
            .and(header(ACCESS_TOKEN_HEADER, "acc-1"))
            .and(header("accept", "text/event-stream"))
            .and(body_partial_json(serde_json::json!({ "prompt": "hello" })))
            .respond_with(sse(HI_THERE))
            .expect(1)
            .mount(&server)
            .await;

        let consumer = consumer(&server, fast_retry(2));
        let report = consumer.send("hello").await;

        assert_eq!(report.text, "Hi there");
        assert_eq!(report.attempts, 1);
        assert_eq!(
            report.transitions,
            vec![
                SendPhase::TokenFetch,
                SendPhase::Connecting { attempt: 0 },
                SendPhase::Streaming,
                SendPhase::Completed,
            ]
        );

        let view = consumer.store().snapshot();
        assert_eq!(view.phase, SendPhase::Completed);
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[0].role, Role::User);
        assert_eq!(view.messages[0].text, "hello");
        assert_eq!(view.messages[1].role, Role::Assistant);
        assert_eq!(view.messages[1].text, "Hi there");
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHAT_STREAM_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(3)
            .mount(&server)
            .await;

        let consumer = consumer(&server, fast_retry(2));
        let report = consumer.send("hello").await;

        assert_eq!(report.attempts, 3);
        let retries: Vec<_> = report
            .transitions
            .iter()
            .filter(|p| matches!(p, SendPhase::Retrying { .. }))
            .collect();
        assert_eq!(
            retries,
            vec![
                &SendPhase::Retrying { attempt: 1, delay: Duration::from_millis(5) },
                &SendPhase::Retrying { attempt: 2, delay: Duration::from_millis(10) },
            ]
        );
        assert_eq!(
            report.phase(),
            &SendPhase::Failed("server returned 503: busy".into())
        );

        let view = consumer.store().snapshot();
        assert!(view.messages[1].is_error);
        // MockServer verifies `expect(3)` on drop: no fourth attempt.
    }

    #[tokio::test]
    async fn recovers_after_one_failure_with_fresh_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer id-1"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer id-2"))
            .respond_with(sse(HI_THERE))
            .expect(1)
            .mount(&server)
            .await;

        let creds = Arc::new(CountingCredentials {
            calls: AtomicUsize::new(0),
        });
        let consumer = StreamConsumer::new(&server.uri(), creds.clone(), fast_retry(2)).unwrap();
        let report = consumer.send("hello").await;

        assert_eq!(report.phase(), &SendPhase::Completed);
        assert_eq!(report.text, "Hi there");
        assert_eq!(report.attempts, 2);
        assert_eq!(creds.calls.load(Ordering::SeqCst), 2);
    }

    /// Serve one streaming 200 whose body stops short of its declared
    /// length, then hang up. Returns the base URL and an accept counter.
    async fn truncating_server() -> (String, Arc<AtomicUsize>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 200 OK\r\n\
                              content-type: text/event-stream\r\n\
                              content-length: 1000\r\n\r\n\
                              : keep-alive\n",
                        )
                        .await;
                    let _ = socket.shutdown().await;
                    // Drain until the client gives up so the close stays clean.
                    let _ = tokio::io::copy(&mut socket, &mut tokio::io::sink()).await;
                });
            }
        });
        (format!("http://{addr}"), accepted)
    }

    #[tokio::test]
    async fn break_after_streaming_started_is_not_retried() {
        let (server, accepted) = truncating_server().await;
        let creds = Arc::new(StaticCredentials::new(Credentials::new("id-1", "acc-1")));
        let consumer = StreamConsumer::new(&server, creds, fast_retry(2)).unwrap();

        let report = consumer.send("hello").await;

        assert_eq!(report.attempts, 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert!(report.transitions.contains(&SendPhase::Streaming));
        assert!(!report
            .transitions
            .iter()
            .any(|p| matches!(p, SendPhase::Retrying { .. })));
        assert!(matches!(report.phase(), SendPhase::Failed(m) if m.starts_with("request failed")));
    }

    #[tokio::test]
    async fn in_stream_error_is_final() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse(
                "data: {\"event\":{\"contentBlockDelta\":{\"delta\":{\"text\":\"Hal\"}}}}\n\n\
                 data: {\"error\":\"throttled\"}\n\n",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let consumer = consumer(&server, fast_retry(2));
        let report = consumer.send("hello").await;

        assert_eq!(report.attempts, 1);
        assert_eq!(report.phase(), &SendPhase::Failed("throttled".into()));
        assert!(!report
            .transitions
            .iter()
            .any(|p| matches!(p, SendPhase::Retrying { .. })));

        let view = consumer.store().snapshot();
        let texts: Vec<_> = view.messages.iter().map(|m| (m.text.as_str(), m.is_error)).collect();
        assert_eq!(texts, vec![("hello", false), ("Hal", false), ("throttled", true)]);
    }

    #[tokio::test]
    async fn empty_reply_removes_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse(""))
            .mount(&server)
            .await;

        let consumer = consumer(&server, fast_retry(0));
        let report = consumer.send("hello").await;

        assert_eq!(report.phase(), &SendPhase::Completed);
        let view = consumer.store().snapshot();
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn credential_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse(HI_THERE))
            .expect(0)
            .mount(&server)
            .await;

        let consumer =
            StreamConsumer::new(&server.uri(), Arc::new(NoCredentials), fast_retry(2)).unwrap();
        let report = consumer.send("hello").await;

        assert_eq!(report.attempts, 0);
        assert!(matches!(report.phase(), SendPhase::Failed(m) if m.contains("signed out")));
    }

    #[tokio::test]
    async fn cancel_during_backoff_stops_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let retry = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
        };
        let consumer = Arc::new(consumer(&server, retry));
        let mut view = consumer.store().subscribe();
        let cancel = CancellationToken::new();

        let task = {
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { consumer.send_cancellable("hello", cancel).await })
        };

        view.wait_for(|v| matches!(v.phase, SendPhase::Retrying { .. }))
            .await
            .unwrap();
        cancel.cancel();
        let report = task.await.unwrap();

        assert_eq!(report.phase(), &SendPhase::Cancelled);
        assert_eq!(report.attempts, 1);
        assert_eq!(consumer.store().snapshot().messages.len(), 1);
    }

    #[test]
    fn bad_server_url_is_rejected() {
        let creds = Arc::new(StaticCredentials::new(Credentials::new("a", "b")));
        assert!(matches!(
            StreamConsumer::new("not a url", creds, RetryPolicy::default()),
            Err(ClientError::InvalidUrl(_))
        ));
    }
}
