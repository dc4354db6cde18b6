//! Per-job progress transport: push stream first, polling fallback second.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::normalize::{normalize_frame, parse_frame};
use super::types::ProgressUpdate;
use crate::api::Backend;
use crate::config::RetryPolicy;

/// How a progress subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// A terminal phase or state was delivered.
    Terminal,
    /// The subscriber cancelled.
    Cancelled,
    /// The update receiver was dropped.
    ReceiverGone,
    /// The polling fallback gave up after failed requests.
    PollFailed,
}

enum PushOutcome {
    Ended(StreamEnd),
    Fallback(String),
}

/// Delivers normalized status updates for one job at a time.
///
/// Cheap to clone; every clone shares the backend.
#[derive(Clone)]
pub struct ProgressStreamClient {
    backend: Arc<dyn Backend>,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl ProgressStreamClient {
    pub fn new(backend: Arc<dyn Backend>, poll_interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            backend,
            poll_interval,
            retry,
        }
    }

    /// Run the subscription for `job_id` until a terminal update is delivered,
    /// `cancel` fires, or the receiver goes away.
    ///
    /// The push stream is dropped before polling begins, so the two transports
    /// never overlap.
    pub async fn run(
        &self,
        job_id: &str,
        update_tx: mpsc::Sender<ProgressUpdate>,
        cancel: CancellationToken,
    ) -> StreamEnd {
        let mut phase: Option<String> = None;

        match self.run_push(job_id, &update_tx, &cancel, &mut phase).await {
            PushOutcome::Ended(end) => return end,
            PushOutcome::Fallback(reason) => {
                warn!(job_id, reason = %reason, "Push progress stream unavailable, polling instead");
            }
        }

        self.run_poll(job_id, &update_tx, &cancel, &mut phase).await
    }

    async fn run_push(
        &self,
        job_id: &str,
        update_tx: &mpsc::Sender<ProgressUpdate>,
        cancel: &CancellationToken,
        phase: &mut Option<String>,
    ) -> PushOutcome {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return PushOutcome::Ended(StreamEnd::Cancelled),
            opened = self.backend.progress_stream(job_id) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => return PushOutcome::Fallback(e.to_string()),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PushOutcome::Ended(StreamEnd::Cancelled),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(raw)) => {
                    let Some(update) = parse_frame(&raw, phase.as_deref()) else {
                        debug!(job_id, frame = %raw, "Ignoring malformed progress frame");
                        continue;
                    };
                    if let Some(end) = deliver(update, update_tx, phase).await {
                        return PushOutcome::Ended(end);
                    }
                }
                Some(Err(e)) => return PushOutcome::Fallback(e.to_string()),
                None => return PushOutcome::Fallback("stream ended".to_string()),
            }
        }
    }

    async fn run_poll(
        &self,
        job_id: &str,
        update_tx: &mpsc::Sender<ProgressUpdate>,
        cancel: &CancellationToken,
        phase: &mut Option<String>,
    ) -> StreamEnd {
        let mut failures = 0u32;
        let mut delay = self.poll_interval;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                result = self.backend.crawl_status(job_id) => result,
            };

            match result {
                Ok(value) => {
                    failures = 0;
                    delay = self.poll_interval;
                    let Some(update) = normalize_frame(&value, phase.as_deref()) else {
                        debug!(job_id, "Ignoring malformed status response");
                        continue;
                    };
                    if let Some(end) = deliver(update, update_tx, phase).await {
                        if end == StreamEnd::Terminal {
                            info!(job_id, "Polling stopped at terminal phase");
                        }
                        return end;
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.retry.max_attempts {
                        warn!(job_id, error = %e, failures, "Progress polling stopped");
                        return StreamEnd::PollFailed;
                    }
                    delay = self.retry.delay_for(failures);
                    debug!(job_id, error = %e, failures, ?delay, "Progress poll failed, retrying");
                }
            }
        }
    }
}

/// Send an update; returns how the subscription ends, if it does.
async fn deliver(
    update: ProgressUpdate,
    update_tx: &mpsc::Sender<ProgressUpdate>,
    phase: &mut Option<String>,
) -> Option<StreamEnd> {
    if update.phase.is_some() {
        *phase = update.phase.clone();
    }
    let terminal = update.is_terminal();

    if update_tx.send(update).await.is_err() {
        return Some(StreamEnd::ReceiverGone);
    }
    terminal.then_some(StreamEnd::Terminal)
}
