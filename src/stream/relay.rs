// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Relay controller
//
// Opens the upstream stream, drives it through the reframer and normalizer,
// and writes canonical SSE frames downstream. Every exit path funnels back
// through `relay`, which is the only caller of `DownstreamSink::close`.

use bytes::Bytes;
use futures_util::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::normalize::normalize;
use super::reframe::LineReframer;
use super::sink::DownstreamSink;
use super::types::{NormalizeError, Normalized};
use crate::config::RelayConfig;
use crate::upstream::{ByteStream, UpstreamClient, UpstreamError, UpstreamRequest};

/// Most of a non-success upstream body quoted in the error event.
const ERROR_DETAIL_LIMIT: usize = 512;

/// How a relay ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream closed its stream normally.
    Completed,
    /// `data: [DONE]` seen; anything after it was discarded.
    Sentinel,
    /// Connection failure, non-success status, broken or idle stream.
    UpstreamFailed,
    /// Upstream sent an explicit error or an unframeable line.
    ProtocolError,
    /// The downstream reader went away first.
    Disconnected,
}

impl RelayOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayOutcome::Completed => "completed",
            RelayOutcome::Sentinel => "sentinel",
            RelayOutcome::UpstreamFailed => "upstream_failed",
            RelayOutcome::ProtocolError => "protocol_error",
            RelayOutcome::Disconnected => "disconnected",
        }
    }
}

pub struct RelayController {
    upstream: Arc<dyn UpstreamClient>,
    limits: RelayConfig,
}

impl RelayController {
    pub fn new(upstream: Arc<dyn UpstreamClient>, limits: RelayConfig) -> Self {
        Self { upstream, limits }
    }

    /// Run one exchange to completion. The sink is closed exactly once,
    /// here, whichever way the exchange ended.
    pub async fn relay(&self, request: UpstreamRequest, mut sink: DownstreamSink) -> RelayOutcome {
        let started = Instant::now();

        let outcome = self.pump(request, &mut sink).await;
        sink.close();

        tracing::info!(
            outcome = outcome.as_str(),
            frames = sink.frames_written(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "relay finished"
        );
        outcome
    }

    /// Spawn the relay on its own task and return the SSE byte stream that
    /// feeds the HTTP response body.
    pub fn spawn(self: &Arc<Self>, request: UpstreamRequest, span: tracing::Span) -> ReceiverStream<Bytes> {
        let (sink, frames) = DownstreamSink::channel(self.limits.channel_capacity);
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.relay(request, sink).await }.instrument(span));
        frames
    }

    async fn pump(&self, request: UpstreamRequest, sink: &mut DownstreamSink) -> RelayOutcome {
        // Waiting for response headers is bounded like any other read.
        let opened = tokio::select! {
            biased;
            _ = sink.disconnected() => {
                tracing::info!("downstream disconnected before upstream answered");
                return RelayOutcome::Disconnected;
            }
            opened = within(self.limits.idle_timeout, self.upstream.open(request)) => opened,
        };

        let response = match opened {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "upstream connection failed");
                sink.fail(&e.to_string()).await;
                return RelayOutcome::UpstreamFailed;
            }
            Err(limit) => {
                tracing::warn!(idle_ms = limit.as_millis() as u64, "upstream never answered");
                sink.fail(&idle_message(limit)).await;
                return RelayOutcome::UpstreamFailed;
            }
        };

        if !response.status.is_success() {
            let detail = read_error_detail(response.body, self.limits.idle_timeout).await;
            tracing::warn!(status = response.status.as_u16(), "upstream returned non-success status");
            let message = if detail.is_empty() {
                format!("upstream returned {}", response.status)
            } else {
                format!("upstream returned {}: {detail}", response.status)
            };
            sink.fail(&message).await;
            return RelayOutcome::UpstreamFailed;
        }

        // The body is owned here and dropped on every return below, which
        // releases the upstream connection.
        let mut body = response.body;
        let mut reframer = LineReframer::with_limit(self.limits.max_line_bytes);

        loop {
            let read = tokio::select! {
                biased;
                _ = sink.disconnected() => {
                    tracing::info!("downstream disconnected; aborting upstream read");
                    return RelayOutcome::Disconnected;
                }
                read = next_chunk(&mut body, self.limits.idle_timeout) => read,
            };

            let chunk = match read {
                ChunkRead::Chunk(chunk) => chunk,
                ChunkRead::End => break,
                ChunkRead::Failed(e) => {
                    tracing::warn!(error = %e, "upstream stream broke");
                    sink.fail(&e.to_string()).await;
                    return RelayOutcome::UpstreamFailed;
                }
                ChunkRead::Idle(limit) => {
                    tracing::warn!(idle_ms = limit.as_millis() as u64, "upstream went idle");
                    sink.fail(&idle_message(limit)).await;
                    return RelayOutcome::UpstreamFailed;
                }
            };

            let lines = match reframer.feed(&chunk) {
                Ok(lines) => lines,
                Err(e) => {
                    tracing::warn!(error = %e, "upstream line too long");
                    sink.fail(&e.to_string()).await;
                    return RelayOutcome::ProtocolError;
                }
            };

            for line in &lines {
                if let Some(outcome) = forward_line(line, sink).await {
                    return outcome;
                }
            }
        }

        if let Some(line) = reframer.finish() {
            if let Some(outcome) = forward_line(&line, sink).await {
                return outcome;
            }
        }

        RelayOutcome::Completed
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

enum ChunkRead {
    Chunk(Bytes),
    End,
    Failed(UpstreamError),
    Idle(Duration),
}

/// Await `fut`, giving up after `limit` if one is set.
async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Result<F::Output, Duration> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| limit),
        None => Ok(fut.await),
    }
}

fn idle_message(limit: Duration) -> String {
    if limit < Duration::from_secs(1) {
        format!("upstream idle for more than {}ms", limit.as_millis())
    } else {
        format!("upstream idle for more than {}s", limit.as_secs())
    }
}

async fn next_chunk(body: &mut ByteStream, idle: Option<Duration>) -> ChunkRead {
    let next = match within(idle, body.next()).await {
        Ok(next) => next,
        Err(limit) => return ChunkRead::Idle(limit),
    };

    match next {
        Some(Ok(chunk)) => ChunkRead::Chunk(chunk),
        Some(Err(e)) => ChunkRead::Failed(e),
        None => ChunkRead::End,
    }
}

/// Normalize one line and write whatever it produced.
///
/// Returns `Some` when the relay must stop.
async fn forward_line(line: &str, sink: &mut DownstreamSink) -> Option<RelayOutcome> {
    match normalize(line) {
        Ok(None) => None,
        Ok(Some(Normalized::Sentinel)) => Some(RelayOutcome::Sentinel),
        Ok(Some(Normalized::Event(event))) => {
            if sink.send_event(&event).await {
                None
            } else {
                Some(RelayOutcome::Disconnected)
            }
        }
        Err(NormalizeError::Upstream(message)) => {
            tracing::warn!(error = %message, "upstream reported an error in-stream");
            sink.fail(&message).await;
            Some(RelayOutcome::ProtocolError)
        }
    }
}

/// Read the head of a non-success body for the error event. Best effort:
/// stops at the size limit, the first read error, or the idle limit.
async fn read_error_detail(mut body: ByteStream, idle: Option<Duration>) -> String {
    let mut collected = Vec::new();
    while collected.len() < ERROR_DETAIL_LIMIT {
        match next_chunk(&mut body, idle).await {
            ChunkRead::Chunk(chunk) => collected.extend_from_slice(&chunk),
            _ => break,
        }
    }
    collected.truncate(ERROR_DETAIL_LIMIT);
    String::from_utf8_lossy(&collected).trim().to_string()
}
