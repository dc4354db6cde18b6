//! Keyed store of job summaries owning one progress subscription per job.

use std::collections::HashMap;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::summary::JobStatusSummary;
use crate::events::{EventSink, Level, LogEntry, Toast, UiEvent};
use crate::progress::{JobState, ProgressStreamClient, ProgressUpdate, StreamEnd};

#[derive(Default)]
struct RegistryState {
    jobs: HashMap<String, JobStatusSummary>,
    /// Live subscriptions, removed once the job reaches a terminal state
    subscriptions: HashMap<String, CancellationToken>,
    log: Vec<LogEntry>,
}

/// Tracks every registered job and its live progress subscription.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct JobRegistry {
    state: Arc<RwLock<RegistryState>>,
    client: ProgressStreamClient,
    sink: Arc<dyn EventSink>,
    updates_tx: broadcast::Sender<JobStatusSummary>,
}

impl JobRegistry {
    pub fn new(client: ProgressStreamClient, sink: Arc<dyn EventSink>) -> Self {
        let (updates_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(RegistryState::default())),
            client,
            sink,
            updates_tx,
        }
    }

    /// Register a job returned by an enqueue call.
    ///
    /// Idempotent per `job_id`: a known job only has its description updated
    /// and no second subscription is opened. Returns `true` when a new
    /// subscription was started.
    pub async fn register_job(&self, job_id: &str, description: &str) -> bool {
        let summary = {
            let mut state = self.state.write().await;
            if let Some(existing) = state.jobs.get_mut(job_id) {
                existing.description = description.to_string();
                debug!(job_id, "Job already registered, description updated");
                return false;
            }

            let summary = JobStatusSummary::new(job_id, description);
            state.jobs.insert(job_id.to_string(), summary.clone());

            let cancel = CancellationToken::new();
            state
                .subscriptions
                .insert(job_id.to_string(), cancel.clone());
            self.spawn_subscription(job_id.to_string(), cancel);
            summary
        };

        info!(job_id, description, "Job registered");
        self.publish(summary);
        true
    }

    fn spawn_subscription(&self, job_id: String, cancel: CancellationToken) {
        let (update_tx, mut update_rx) = mpsc::channel::<ProgressUpdate>(64);

        let client = self.client.clone();
        let stream_job_id = job_id.clone();
        let stream_cancel = cancel.clone();
        let registry = self.clone();

        tokio::spawn(async move {
            let end = client
                .run(&stream_job_id, update_tx, stream_cancel)
                .await;
            match end {
                StreamEnd::PollFailed => {
                    registry.detach(&stream_job_id).await;
                }
                StreamEnd::Terminal | StreamEnd::Cancelled | StreamEnd::ReceiverGone => {}
            }
            debug!(job_id = %stream_job_id, ?end, "Progress subscription ended");
        });

        let registry = self.clone();
        tokio::spawn(async move {
            while let Some(update) = update_rx.recv().await {
                if cancel.is_cancelled() {
                    break;
                }
                if registry.apply_update(&job_id, &update).await {
                    break;
                }
            }
        });
    }

    /// Merge an update into the stored summary and republish it.
    ///
    /// Returns `true` when the job is (now or already) terminal.
    pub async fn apply_update(&self, job_id: &str, update: &ProgressUpdate) -> bool {
        let (summary, subscription, entry) = {
            let mut state = self.state.write().await;
            let Some(summary) = state.jobs.get_mut(job_id) else {
                return true;
            };
            if summary.is_terminal() {
                return true;
            }

            let became_terminal = summary.apply(update);
            let summary = summary.clone();
            if !became_terminal {
                (summary, None, None)
            } else {
                let subscription = state.subscriptions.remove(job_id);
                let entry = terminal_log_entry(&summary);
                state.log.push(entry.clone());
                (summary, subscription, Some(entry))
            }
        };

        if let Some(token) = subscription {
            token.cancel();
        }

        let terminal = summary.is_terminal();
        if let Some(entry) = entry {
            match summary.state {
                JobState::Error => {
                    warn!(job_id, description = %summary.description, error = ?summary.error, "Job failed");
                    self.sink.emit(UiEvent::Toast(Toast::new(
                        Level::Error,
                        entry.message.clone(),
                    )));
                }
                _ => info!(job_id, description = %summary.description, "Job complete"),
            }
            self.sink.emit(UiEvent::Log(entry));
        }

        self.publish(summary);
        terminal
    }

    /// Drop the subscription of a job whose transport gave up, keeping the summary.
    async fn detach(&self, job_id: &str) {
        let entry = {
            let mut state = self.state.write().await;
            if state.subscriptions.remove(job_id).is_none() {
                return;
            }
            let entry =
                LogEntry::new(Level::Warning, "Lost track of job progress").for_job(job_id);
            state.log.push(entry.clone());
            entry
        };
        warn!(job_id, "Progress subscription gave up before a terminal state");
        self.sink.emit(UiEvent::Log(entry));
    }

    fn publish(&self, summary: JobStatusSummary) {
        // No receivers is fine; the sink below is the primary consumer.
        let _ = self.updates_tx.send(summary.clone());
        self.sink.emit(UiEvent::JobUpdated { summary });
    }

    /// Latest summary for a job.
    pub async fn get(&self, job_id: &str) -> Option<JobStatusSummary> {
        self.state.read().await.jobs.get(job_id).cloned()
    }

    /// All known summaries, most recently updated first.
    pub async fn all(&self) -> Vec<JobStatusSummary> {
        let mut jobs: Vec<_> = self.state.read().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        jobs
    }

    /// Number of jobs with a live subscription.
    pub async fn active_subscriptions(&self) -> usize {
        self.state.read().await.subscriptions.len()
    }

    pub async fn is_subscribed(&self, job_id: &str) -> bool {
        self.state.read().await.subscriptions.contains_key(job_id)
    }

    /// Forget a job once the UI no longer shows it. Cancels a live subscription.
    pub async fn discard(&self, job_id: &str) -> Option<JobStatusSummary> {
        let (summary, subscription) = {
            let mut state = self.state.write().await;
            (
                state.jobs.remove(job_id),
                state.subscriptions.remove(job_id),
            )
        };
        if let Some(token) = subscription {
            token.cancel();
        }
        summary
    }

    /// Activity log entries written on terminal transitions.
    pub async fn activity_log(&self) -> Vec<LogEntry> {
        self.state.read().await.log.clone()
    }

    /// Stream of summaries as they change.
    pub fn subscribe(&self) -> impl Stream<Item = JobStatusSummary> + Send + 'static {
        BroadcastStream::new(self.updates_tx.subscribe()).filter_map(|item| async move { item.ok() })
    }

    /// Cancel every live subscription.
    pub async fn shutdown(&self) {
        let subscriptions: Vec<_> = self
            .state
            .write()
            .await
            .subscriptions
            .drain()
            .map(|(_, token)| token)
            .collect();
        let count = subscriptions.len();
        for token in subscriptions {
            token.cancel();
        }
        if count > 0 {
            info!(count, "Cancelled job subscriptions");
        }
    }
}

fn terminal_log_entry(summary: &JobStatusSummary) -> LogEntry {
    let entry = match summary.state {
        JobState::Error => {
            let mut message = format!("Job failed: {}", summary.description);
            if let Some(ref error) = summary.error {
                message.push_str(&format!(" ({})", error));
            }
            LogEntry::new(Level::Error, message)
        }
        _ => LogEntry::new(
            Level::Success,
            format!("Job complete: {}", summary.description),
        ),
    };
    entry.for_job(summary.job_id.clone())
}
