//! Shadow-mode watcher that queues the page being browsed for background
//! indexing and follows the job until it finishes.
//!
//! At most one watcher is live at a time. When the browsed URL changes the
//! previous watcher is cancelled; it checks its token after every await and
//! never notifies once superseded, even when a poll it already issued
//! resolves later.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{Backend, IndexReason, ShadowIndexRequest, ShadowState, ShadowStatus};
use crate::events::{EventSink, Level, LogEntry, Toast, UiEvent};
use crate::jobs::JobRegistry;
use crate::notify::{error_key, success_key, NotificationGuard};

/// Lifecycle of a single watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    Starting,
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl WatchState {
    /// No further transitions happen from a settled state.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

/// Snapshot of the active watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSnapshot {
    pub key: String,
    pub state: WatchState,
}

struct ActiveWatch {
    key: String,
    cancel: CancellationToken,
    state: watch::Sender<WatchState>,
}

impl ActiveWatch {
    fn stop(&self) {
        self.cancel.cancel();
        settle(&self.state, WatchState::Cancelled);
    }
}

struct Navigation {
    url: String,
    tab_id: Option<String>,
    at: Instant,
}

struct WatcherState {
    enabled: bool,
    active: Option<ActiveWatch>,
    last_navigation: Option<Navigation>,
}

/// Settings for [`ShadowWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherOptions {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub navigation_window: Duration,
}

/// Per-URL shadow indexing coordinator.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ShadowWatcher {
    state: Arc<Mutex<WatcherState>>,
    backend: Arc<dyn Backend>,
    registry: JobRegistry,
    guard: NotificationGuard,
    sink: Arc<dyn EventSink>,
    poll_interval: Duration,
    navigation_window: Duration,
}

impl ShadowWatcher {
    pub fn new(
        backend: Arc<dyn Backend>,
        registry: JobRegistry,
        guard: NotificationGuard,
        sink: Arc<dyn EventSink>,
        options: WatcherOptions,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(WatcherState {
                enabled: options.enabled,
                active: None,
                last_navigation: None,
            })),
            backend,
            registry,
            guard,
            sink,
            poll_interval: options.poll_interval,
            navigation_window: options.navigation_window,
        }
    }

    /// Toggle shadow mode. Disabling cancels the active watch.
    pub async fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().await;
        state.enabled = enabled;
        if !enabled {
            if let Some(active) = state.active.take() {
                active.stop();
                info!(url = %active.key, "Shadow mode disabled, watcher cancelled");
            }
        }
    }

    pub async fn is_enabled(&self) -> bool {
        self.state.lock().await.enabled
    }

    /// Remember a navigation event so a following [`observe`](Self::observe)
    /// of the same URL is tagged as navigation-triggered.
    pub async fn record_navigation(&self, url: &str, tab_id: Option<String>) {
        self.state.lock().await.last_navigation = Some(Navigation {
            url: url.to_string(),
            tab_id,
            at: Instant::now(),
        });
    }

    /// The active URL changed or was re-affirmed.
    ///
    /// Returns `true` when a new watch was started. Re-affirming a URL whose
    /// watch is still live is a no-op.
    pub async fn observe(&self, url: &str) -> bool {
        let mut state = self.state.lock().await;
        if !state.enabled {
            debug!(url, "Shadow mode off, not watching");
            return false;
        }

        if let Some(ref active) = state.active {
            if active.key == url && !active.state.borrow().is_settled() {
                debug!(url, "Already watching");
                return false;
            }
        }

        if let Some(previous) = state.active.take() {
            previous.stop();
            if previous.key != url {
                info!(previous = %previous.key, url, "Superseded shadow watcher");
            }
        }

        let purged = self.guard.purge_expired_for(url).await;
        if purged > 0 {
            debug!(url, purged, "Purged expired notification markers");
        }

        let reason = match state.last_navigation {
            Some(ref nav) if nav.url == url && nav.at.elapsed() <= self.navigation_window => {
                IndexReason::Navigation {
                    tab_id: nav.tab_id.clone(),
                }
            }
            _ => IndexReason::Manual,
        };

        let cancel = CancellationToken::new();
        let (state_tx, _) = watch::channel(WatchState::Starting);
        state.active = Some(ActiveWatch {
            key: url.to_string(),
            cancel: cancel.clone(),
            state: state_tx.clone(),
        });
        drop(state);

        let watcher = self.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            let end = watcher.run(&url, reason, &cancel, &state_tx).await;
            settle(&state_tx, end);
            debug!(url = %url, state = ?end, "Shadow watcher finished");
        });
        true
    }

    /// Cancel the active watch, if any.
    pub async fn cancel(&self) -> bool {
        match self.state.lock().await.active.take() {
            Some(active) => {
                active.stop();
                true
            }
            None => false,
        }
    }

    pub async fn current(&self) -> Option<WatchSnapshot> {
        let state = self.state.lock().await;
        state.active.as_ref().map(|active| WatchSnapshot {
            key: active.key.clone(),
            state: *active.state.borrow(),
        })
    }

    /// Wait until the active watch settles. Returns its final state.
    pub async fn wait_idle(&self) -> Option<WatchState> {
        let mut rx = {
            let state = self.state.lock().await;
            state.active.as_ref()?.state.subscribe()
        };
        let settled = rx.wait_for(|s| s.is_settled()).await.ok()?;
        Some(*settled)
    }

    async fn run(
        &self,
        url: &str,
        reason: IndexReason,
        cancel: &CancellationToken,
        state: &watch::Sender<WatchState>,
    ) -> WatchState {
        // Step 1: visit recording is best effort and must not hold up the rest.
        let backend = self.backend.clone();
        let visit_url = url.to_string();
        tokio::spawn(async move {
            if let Err(e) = backend.record_visit(&visit_url).await {
                warn!(url = %visit_url, error = %e, "Failed to record visit");
            }
        });

        // Step 2: queue the shadow index job.
        if cancel.is_cancelled() {
            return WatchState::Cancelled;
        }
        let request = ShadowIndexRequest::new(url, &reason);
        let queued = self.backend.queue_shadow_index(&request).await;
        if cancel.is_cancelled() {
            return WatchState::Cancelled;
        }

        let job_id = match queued {
            Ok(job_id) => job_id,
            Err(e) => {
                warn!(url, error = %e, "Failed to queue shadow index");
                return WatchState::Error;
            }
        };

        // Step 3: nothing to follow without a job id.
        let Some(job_id) = job_id else {
            info!(url, reason = reason.as_str(), "Shadow index accepted without a job id");
            return WatchState::Done;
        };

        info!(url, job_id = %job_id, reason = reason.as_str(), "Shadow index queued");
        settle(state, WatchState::Queued);
        self.registry
            .register_job(&job_id, &format!("Index {}", url))
            .await;

        // Step 4: poll until done, failed, or superseded.
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return WatchState::Cancelled,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            let polled = self.backend.shadow_status(&job_id).await;
            if cancel.is_cancelled() {
                debug!(url, job_id = %job_id, "Dropping status of superseded watcher");
                return WatchState::Cancelled;
            }

            let status = match polled {
                Ok(status) => status,
                Err(e) => {
                    warn!(url, job_id = %job_id, error = %e, "Shadow status poll failed");
                    return WatchState::Error;
                }
            };

            match status.state {
                ShadowState::Done => {
                    if !self.notify_indexed(url, &status, cancel).await {
                        return WatchState::Cancelled;
                    }
                    return WatchState::Done;
                }
                ShadowState::Error => {
                    if !self.log_failure(url, &job_id, &status, cancel).await {
                        return WatchState::Cancelled;
                    }
                    return WatchState::Error;
                }
                ShadowState::Running => settle(state, WatchState::Running),
                ShadowState::Queued | ShadowState::Unknown => {}
            }
        }
    }

    /// Returns `false` if the watch was superseded while claiming.
    async fn notify_indexed(
        &self,
        url: &str,
        status: &ShadowStatus,
        cancel: &CancellationToken,
    ) -> bool {
        let claimed = self.guard.try_claim(&success_key(url)).await;
        if cancel.is_cancelled() {
            return false;
        }
        if !claimed {
            debug!(url, "Already notified for this page");
            return true;
        }

        let title = status
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(url);
        info!(url, chunks = ?status.chunks, "Page indexed");
        self.sink.emit(UiEvent::Toast(Toast::new(
            Level::Success,
            format!("Indexed: {}", title),
        )));
        true
    }

    async fn log_failure(
        &self,
        url: &str,
        job_id: &str,
        status: &ShadowStatus,
        cancel: &CancellationToken,
    ) -> bool {
        let claimed = self.guard.try_claim(&error_key(url)).await;
        if cancel.is_cancelled() {
            return false;
        }
        if !claimed {
            debug!(url, "Failure already logged for this page");
            return true;
        }

        let detail = status.error.as_deref().unwrap_or("unknown error");
        warn!(url, job_id, error = %detail, kind = ?status.error_kind, "Shadow indexing failed");

        let message = match status.error_kind {
            Some(ref kind) => format!("Indexing failed ({}): {}", kind, detail),
            None => format!("Indexing failed: {}", detail),
        };
        self.sink.emit(UiEvent::Log(
            LogEntry::new(Level::Error, message)
                .for_job(job_id)
                .for_url(url),
        ));
        true
    }
}

/// Move to `next` unless the watch already settled.
fn settle(state: &watch::Sender<WatchState>, next: WatchState) {
    state.send_if_modified(|current| {
        if current.is_settled() || *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
}
