//! Reply ingestion: turns completion output into timeline patches.
//!
//! [`StreamState`] lives for exactly one request. It feeds raw chunks through
//! the wire decoder, converts payloads into [`MessagePatch`]es, captures
//! time-to-first-token and decides how the in-flight message is finalized.

use parley_api::{CompletionBody, StreamPayload, WireDecoder, WireEvent};
use tokio::time::{Duration, Instant};

use crate::error::ExchangeFailure;
use crate::message::MessagePatch;

/// How an exchange ends: the last patches to apply before finalizing, and
/// the failure if the message becomes an error bubble.
#[derive(Debug, Clone, PartialEq)]
pub struct Termination {
    pub patches: Vec<MessagePatch>,
    pub failure: Option<ExchangeFailure>,
}

/// Per-request stream state
#[derive(Debug)]
pub struct StreamState {
    decoder: WireDecoder,
    started_at: Instant,
    ttft_captured_at: Option<Instant>,
    received_any_content: bool,
    server_latency: bool,
}

impl StreamState {
    /// Start tracking a request issued at `started_at`
    pub fn new(started_at: Instant) -> Self {
        Self {
            decoder: WireDecoder::new(),
            started_at,
            ttft_captured_at: None,
            received_any_content: false,
            server_latency: false,
        }
    }

    /// Whether any payload carried a `content` field, even an empty one
    pub fn received_any_content(&self) -> bool {
        self.received_any_content
    }

    /// Time to the first non-empty content delta
    pub fn ttft(&self) -> Option<Duration> {
        self.ttft_captured_at
            .map(|at| at.saturating_duration_since(self.started_at))
    }

    /// Whether `[DONE]` has been seen
    pub fn is_done(&self) -> bool {
        self.decoder.is_done()
    }

    /// Process one network read received at `now`
    pub fn ingest(&mut self, chunk: &[u8], now: Instant) -> Vec<MessagePatch> {
        let events = self.decoder.feed(chunk);
        self.patches_for(events, now)
    }

    /// The stream ended normally (sentinel or end of body)
    pub fn finish(&mut self, now: Instant) -> Termination {
        let events = self.decoder.finish();
        let mut patches = self.patches_for(events, now);

        if !self.received_any_content {
            let failure = ExchangeFailure::EmptyResponse;
            patches.push(self.error_patch(&failure, now));
            return Termination {
                patches,
                failure: Some(failure),
            };
        }

        if !self.server_latency {
            patches.push(MessagePatch {
                latency_ms: Some(elapsed_ms(self.started_at, now)),
                ..Default::default()
            });
        }
        Termination {
            patches,
            failure: None,
        }
    }

    /// The request or the read loop failed. Partial content survives only if
    /// some content had already arrived.
    pub fn abort(&self, failure: ExchangeFailure, now: Instant) -> Termination {
        Termination {
            patches: vec![self.error_patch(&failure, now)],
            failure: Some(failure),
        }
    }

    fn error_patch(&self, failure: &ExchangeFailure, now: Instant) -> MessagePatch {
        MessagePatch {
            replace_content: (!self.received_any_content)
                .then(|| failure.user_message().to_string()),
            latency_ms: (!self.server_latency).then(|| elapsed_ms(self.started_at, now)),
            is_error: true,
            ..Default::default()
        }
    }

    fn patches_for(
        &mut self,
        events: Vec<parley_api::Result<WireEvent>>,
        now: Instant,
    ) -> Vec<MessagePatch> {
        let mut patches = Vec::new();
        for event in events {
            match event {
                Ok(WireEvent::Payload(payload)) => {
                    if let Some(patch) = self.patch_for(payload, now) {
                        patches.push(patch);
                    }
                }
                Ok(WireEvent::Done) => {}
                Err(e) => tracing::warn!("Skipping stream record: {}", e),
            }
        }
        patches
    }

    fn patch_for(&mut self, payload: StreamPayload, now: Instant) -> Option<MessagePatch> {
        let mut patch = MessagePatch::default();

        if let Some(delta) = payload.content {
            self.received_any_content = true;
            if !delta.is_empty() && self.ttft_captured_at.is_none() {
                self.ttft_captured_at = Some(now);
                patch.ttft_ms = Some(elapsed_ms(self.started_at, now));
            }
            if !delta.is_empty() {
                patch.append = Some(delta);
            }
        }

        if let Some(metadata) = payload.metadata {
            if let Some(total) = metadata.total_latency_ms() {
                self.server_latency = true;
                patch.latency_ms = Some(total);
            }
            patch.metadata = Some(metadata);
        }

        (!patch.is_empty()).then_some(patch)
    }
}

/// Build the termination for a non-streamed reply
pub fn complete_body(body: CompletionBody, started_at: Instant, now: Instant) -> Termination {
    let Some(content) = body.content else {
        return StreamState::new(started_at).abort(ExchangeFailure::EmptyResponse, now);
    };

    let latency_ms = body
        .metadata
        .as_ref()
        .and_then(|m| m.total_latency_ms())
        .unwrap_or_else(|| elapsed_ms(started_at, now));

    Termination {
        patches: vec![MessagePatch {
            replace_content: Some(content),
            latency_ms: Some(latency_ms),
            metadata: body.metadata,
            ..Default::default()
        }],
        failure: None,
    }
}

fn elapsed_ms(from: Instant, to: Instant) -> u64 {
    to.saturating_duration_since(from).as_millis() as u64
}
