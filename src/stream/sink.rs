// Copyright 2026 The Ferry Project
// SPDX-License-Identifier: Apache-2.0

// Downstream sink
//
// Single-writer side of the channel feeding the HTTP response body. The
// relay task owns the sink outright, so every state transition goes through
// `&mut self` and there is no check-then-set race to guard against.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::types::CanonicalEvent;

/// Lifecycle of the downstream stream.
///
/// `Closing` is entered while the terminal error frame is written; only
/// that frame is accepted in this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Closing,
    Closed,
}

pub struct DownstreamSink {
    tx: Option<mpsc::Sender<Bytes>>,
    state: SinkState,
    frames_written: usize,
}

impl DownstreamSink {
    /// Create a sink and the byte stream the HTTP body reads from.
    pub fn channel(capacity: usize) -> (Self, ReceiverStream<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx: Some(tx),
            state: SinkState::Open,
            frames_written: 0,
        };
        (sink, ReceiverStream::new(rx))
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    /// Write one event as an SSE frame.
    ///
    /// Returns `false` without attempting the write when the sink is no
    /// longer open, and `false` when the reader turns out to be gone.
    pub async fn send_event(&mut self, event: &CanonicalEvent) -> bool {
        if self.state != SinkState::Open {
            return false;
        }
        self.write(event.to_sse_frame()).await
    }

    /// Write the single terminal error frame. The sink stays in `Closing`
    /// until `close` is called.
    pub async fn fail(&mut self, message: &str) -> bool {
        if self.state != SinkState::Open {
            return false;
        }
        self.state = SinkState::Closing;
        self.write(CanonicalEvent::error(message).to_sse_frame()).await
    }

    /// Close the downstream stream. Idempotent: only the first call has an
    /// effect, and it reports `true`.
    pub fn close(&mut self) -> bool {
        if self.state == SinkState::Closed {
            return false;
        }
        // Dropping the sender ends the response body.
        self.tx = None;
        self.state = SinkState::Closed;
        true
    }

    /// Resolves once the reader has gone away (client disconnect).
    pub async fn disconnected(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => {}
        }
    }

    async fn write(&mut self, frame: Bytes) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match tx.send(frame).await {
            Ok(()) => {
                self.frames_written += 1;
                true
            }
            Err(_) => {
                tracing::debug!("downstream reader gone; skipping further writes");
                self.tx = None;
                self.state = SinkState::Closed;
                false
            }
        }
    }
}
