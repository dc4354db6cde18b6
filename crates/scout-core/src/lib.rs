//! Scout Core - Job and live-update coordination for the Scout browsing assistant
//!
//! This crate contains the client-side coordination logic, including:
//! - Backend access (crawl, shadow index, chat) over HTTP push and poll transports
//! - Per-job progress subscriptions with polling fallback
//! - Shadow-mode indexing of browsed pages with de-duplicated notifications
//! - Single-flight chat reply streaming and conversation history
//!
//! Nothing here renders UI. Front ends receive [`events::UiEvent`]s through an
//! [`events::EventSink`].

pub mod api;
pub mod chat;
pub mod config;
pub mod events;
pub mod jobs;
pub mod notify;
pub mod progress;
pub mod watcher;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

pub use api::{ApiError, Backend, CrawlRequest, HttpBackend};
pub use chat::{
    ChatMessage, Conversation, FileHistoryStore, HistoryStore, SendOptions, SendOutcome,
    SessionError, SessionManager, TransportPreference,
};
pub use config::{Config, Settings};
pub use events::{ChannelSink, EventSink, Level, LogEntry, NoOpSink, Toast, UiEvent};
pub use jobs::{JobRegistry, JobStatusSummary};
pub use notify::NotificationGuard;
pub use progress::{JobState, ProgressStreamClient};
pub use watcher::{ShadowWatcher, WatchState, WatcherOptions};

/// Everything a front end talks to, wired from one [`Config`].
pub struct Coordinator {
    pub config: Config,
    backend: Arc<dyn Backend>,
    sink: Arc<dyn EventSink>,
    pub registry: JobRegistry,
    pub guard: NotificationGuard,
    pub watcher: ShadowWatcher,
    pub chat: SessionManager,
}

impl Coordinator {
    /// Create a coordinator talking to the configured HTTP backend, with
    /// file-backed history and notification markers.
    pub fn new(config: Config, settings: &Settings, sink: Arc<dyn EventSink>) -> anyhow::Result<Self> {
        config
            .ensure_dirs()
            .context("Failed to create data directories")?;

        let backend = Arc::new(HttpBackend::new(&config.backend));
        let history = Arc::new(FileHistoryStore::new(&config.conversations_dir));
        let guard =
            NotificationGuard::persistent(&config.guard_file, config.timing.notification_ttl);

        info!(backend = %config.backend.base_url, "Coordinator ready");
        Ok(Self::with_backend(config, settings, backend, history, guard, sink))
    }

    /// Create a coordinator over explicit collaborators.
    pub fn with_backend(
        config: Config,
        settings: &Settings,
        backend: Arc<dyn Backend>,
        history: Arc<dyn HistoryStore>,
        guard: NotificationGuard,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let client = ProgressStreamClient::new(
            backend.clone(),
            config.timing.progress_poll_interval,
            config.poll_retry,
        );
        let registry = JobRegistry::new(client, sink.clone());
        let watcher = ShadowWatcher::new(
            backend.clone(),
            registry.clone(),
            guard.clone(),
            sink.clone(),
            WatcherOptions {
                enabled: settings.shadow_mode,
                poll_interval: config.timing.shadow_poll_interval,
                navigation_window: config.timing.navigation_window,
            },
        );
        let chat = SessionManager::new(
            backend.clone(),
            history,
            sink.clone(),
            config.backend.push_supported,
            settings.model.clone(),
        );

        Self {
            config,
            backend,
            sink,
            registry,
            guard,
            watcher,
            chat,
        }
    }

    /// A navigation event landed on `url`; shadow-index it if enabled.
    pub async fn navigate(&self, url: &str, tab_id: Option<String>) -> bool {
        self.watcher.record_navigation(url, tab_id).await;
        self.watcher.observe(url).await
    }

    /// The active page was re-affirmed without a navigation event.
    pub async fn observe(&self, url: &str) -> bool {
        self.watcher.observe(url).await
    }

    pub async fn set_shadow_mode(&self, enabled: bool) {
        self.watcher.set_enabled(enabled).await;
    }

    /// Crawl starting from `url`. Returns the job id, if the backend tracks one.
    pub async fn crawl(&self, url: &str) -> anyhow::Result<Option<String>> {
        self.enqueue(CrawlRequest::url(url)).await
    }

    /// Search-triggered crawl focused on `query`.
    pub async fn focused_crawl(&self, query: &str) -> anyhow::Result<Option<String>> {
        self.enqueue(CrawlRequest::focused(query)).await
    }

    async fn enqueue(&self, request: CrawlRequest) -> anyhow::Result<Option<String>> {
        let description = request.describe();
        let job_id = self
            .backend
            .enqueue_crawl(&request)
            .await
            .with_context(|| format!("Failed to enqueue: {}", description))?;

        match job_id {
            Some(ref id) => {
                info!(job_id = %id, "{}", description);
                self.registry.register_job(id, &description).await;
            }
            None => {
                warn!("{} was accepted without a job id, not tracking it", description);
                self.sink.emit(UiEvent::Log(LogEntry::new(
                    Level::Warning,
                    format!("{}: no job id returned, progress unavailable", description),
                )));
            }
        }
        Ok(job_id)
    }

    pub async fn send_message(
        &self,
        text: &str,
        options: SendOptions,
    ) -> Result<SendOutcome, SessionError> {
        self.chat.send(text, options).await
    }

    pub async fn cancel_message(&self) -> bool {
        self.chat.cancel().await
    }

    /// Cancel every watcher, stream and subscription and flush persisted state.
    pub async fn shutdown(&self) {
        self.watcher.cancel().await;
        self.chat.cancel().await;
        self.registry.shutdown().await;
        self.chat.flush().await;
        if let Err(e) = self.guard.flush().await {
            warn!("Failed to flush notification markers: {:#}", e);
        }
        info!("Coordinator shut down");
    }
}
