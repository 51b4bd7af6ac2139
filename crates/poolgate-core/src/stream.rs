use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use poolgate_account::{UpstreamError, UpstreamSession};
use poolgate_common::messages;

/// Reserved prefix sessions use to report an error inside an otherwise
/// healthy chunk stream.
pub const INBAND_ERROR_MARKER: &str = "[[upstream_error]]";

/// Converts the upstream's cumulative/overlapping chunk stream into clean
/// incremental deltas.
///
/// Each surviving chunk body is recorded newline-trimmed; once two bodies
/// have been recorded, the second-most-recent one is stripped from the front
/// of the newest when it is an exact prefix, compensating for the upstream's
/// habit of restating the previous event's text.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    prefixes: Vec<String>,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one raw chunk; returns the delta to forward, or `None` for
    /// empty chunks (which are skipped and not recorded).
    pub fn push(&mut self, chunk: &str) -> Option<String> {
        let body = chunk.trim_matches(|c| c == '\n' || c == '\r');
        if body.is_empty() {
            return None;
        }
        self.prefixes.push(body.to_string());
        if self.prefixes.len() >= 2 {
            let prior = &self.prefixes[self.prefixes.len() - 2];
            if let Some(delta) = body.strip_prefix(prior.as_str()) {
                return Some(delta.to_string());
            }
        }
        Some(body.to_string())
    }
}

/// Hooks invoked, in order, after a stream finishes with at least one
/// non-empty chunk: `on_response_complete` with the full concatenated text,
/// then `on_usage_recorded`.
#[async_trait]
pub trait CompletionHooks: Send + Sync {
    async fn on_response_complete(&self, text: &str);

    async fn on_usage_recorded(&self);
}

pub struct NoopHooks;

#[async_trait]
impl CompletionHooks for NoopHooks {
    async fn on_response_complete(&self, _text: &str) {}

    async fn on_usage_recorded(&self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub model: String,
    pub text: String,
    pub attachments: Vec<String>,
}

enum AttemptOutcome {
    /// Full concatenated response text.
    Complete(String),
    /// The consumer dropped the stream; stop silently, run no hooks.
    Cancelled,
    Failed(UpstreamError),
}

/// Runs the decode-and-stream operation against a session, retrying the
/// whole operation on any failure up to the policy's attempt count.
///
/// Final-attempt failure is yielded as a text value rather than an error so
/// the outer event stream can still terminate cleanly. The returned stream
/// is finite, not restartable, and safely abandonable at every yield point:
/// dropping the receiver cancels the producer before any hook runs.
pub fn stream_with_retry(
    session: Arc<dyn UpstreamSession>,
    request: StreamRequest,
    hooks: Arc<dyn CompletionHooks>,
    policy: RetryPolicy,
) -> ReceiverStream<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let attempts = policy.attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match run_attempt(session.as_ref(), &request, &tx).await {
                AttemptOutcome::Complete(text) => {
                    if !text.is_empty() {
                        hooks.on_response_complete(&text).await;
                        hooks.on_usage_recorded().await;
                    }
                    return;
                }
                AttemptOutcome::Cancelled => return,
                AttemptOutcome::Failed(err) => {
                    warn!(attempt, attempts, %err, "streaming attempt failed");
                    last_error = Some(err);
                    if attempt < attempts {
                        tokio::time::sleep(policy.delay).await;
                    }
                }
            }
        }
        if let Some(err) = last_error {
            let text = match &err {
                // In-band reasons are already user-facing text.
                UpstreamError::InBand(reason) => reason.clone(),
                other => format!("{}{other}", messages::STREAM_FAILED_PREFIX),
            };
            let _ = tx.send(text).await;
        }
    });
    ReceiverStream::new(rx)
}

async fn run_attempt(
    session: &dyn UpstreamSession,
    request: &StreamRequest,
    tx: &mpsc::Sender<String>,
) -> AttemptOutcome {
    let mut chunks = match session
        .stream(&request.model, &request.text, &request.attachments)
        .await
    {
        Ok(chunks) => chunks,
        Err(err) => return AttemptOutcome::Failed(err),
    };

    let mut decoder = DeltaDecoder::new();
    let mut full_text = String::new();
    while let Some(item) = chunks.next().await {
        let raw = match item {
            Ok(raw) => raw,
            Err(err) => return AttemptOutcome::Failed(err),
        };
        if let Some(reason) = raw.strip_prefix(INBAND_ERROR_MARKER) {
            return AttemptOutcome::Failed(UpstreamError::InBand(reason.trim().to_string()));
        }
        let Some(delta) = decoder.push(&raw) else {
            continue;
        };
        if tx.send(delta.clone()).await.is_err() {
            return AttemptOutcome::Cancelled;
        }
        full_text.push_str(&delta);
    }
    AttemptOutcome::Complete(full_text)
}
