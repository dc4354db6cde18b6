//! Application configuration and persisted user settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";

/// Backend endpoint paths, relative to the base URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub crawl: String,
    pub progress_stream: String,
    pub crawl_status: String,
    pub visits: String,
    pub shadow_queue: String,
    pub shadow_status: String,
    pub chat_stream: String,
    pub chat: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            crawl: "/crawl".to_string(),
            progress_stream: "/progress/stream".to_string(),
            crawl_status: "/crawl/status".to_string(),
            visits: "/visits".to_string(),
            shadow_queue: "/shadow/queue".to_string(),
            shadow_status: "/shadow/status".to_string(),
            chat_stream: "/chat/stream".to_string(),
            chat: "/chat".to_string(),
        }
    }
}

/// Where the backend lives and what it supports.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub endpoints: Endpoints,
    /// Whether the chat endpoint can be consumed as a push stream.
    pub push_supported: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BACKEND_URL.to_string(),
            endpoints: Endpoints::default(),
            push_supported: true,
        }
    }
}

/// Retry policy for the progress polling fallback.
///
/// `max_attempts` counts consecutive failed requests; the loop gives up once
/// it is reached. The default of one stops on the first failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub const fn stop_on_first_failure() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(1500),
            jitter: false,
        }
    }

    /// Exponential backoff with up to 25% random jitter.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(6);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let max_jitter = delay.as_millis() as u64 / 4;
        let jitter = rand::rng().random_range(0..=max_jitter);
        delay + Duration::from_millis(jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::stop_on_first_failure()
    }
}

/// Intervals and windows used by the background coordinators.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Progress polling fallback interval
    pub progress_poll_interval: Duration,
    /// Shadow watcher status poll interval
    pub shadow_poll_interval: Duration,
    /// How recent a navigation event must be to tag a watch as navigation-triggered
    pub navigation_window: Duration,
    /// Lifetime of a notification dedup marker
    pub notification_ttl: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            progress_poll_interval: Duration::from_millis(1500),
            shadow_poll_interval: Duration::from_secs(2),
            navigation_window: Duration::from_secs(10),
            notification_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root data directory (~/.local/share/scout)
    pub data_dir: PathBuf,
    /// Conversation history directory
    pub conversations_dir: PathBuf,
    /// Persisted user settings
    pub settings_file: PathBuf,
    /// Persisted notification dedup markers
    pub guard_file: PathBuf,
    pub backend: BackendConfig,
    pub timing: Timing,
    pub poll_retry: RetryPolicy,
}

impl Config {
    /// Load configuration or use defaults
    pub fn load_or_default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("scout");
        Self::with_data_dir(data_dir)
    }

    /// Configuration rooted at an explicit data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            conversations_dir: data_dir.join("conversations"),
            settings_file: data_dir.join("settings.json"),
            guard_file: data_dir.join("notified.json"),
            data_dir,
            backend: BackendConfig::default(),
            timing: Timing::default(),
            poll_retry: RetryPolicy::default(),
        }
    }

    /// Overlay persisted settings onto this configuration.
    pub fn apply_settings(&mut self, settings: &Settings) {
        if let Some(ref url) = settings.backend_url {
            self.backend.base_url = url.trim_end_matches('/').to_string();
        }
        self.backend.push_supported = settings.push_transport;
        if let Some(attempts) = settings.poll_retry_attempts {
            self.poll_retry.max_attempts = attempts.max(1);
        }
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.conversations_dir)?;
        Ok(())
    }
}

/// User settings persisted as JSON in the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend_url: Option<String>,
    /// Queue visited pages for background indexing
    pub shadow_mode: bool,
    /// Preferred chat model
    pub model: Option<String>,
    /// Prefer push transports when the backend supports them
    pub push_transport: bool,
    /// Consecutive poll failures tolerated before the fallback poller stops
    pub poll_retry_attempts: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: None,
            shadow_mode: false,
            model: None,
            push_transport: true,
            poll_retry_attempts: None,
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("Failed to read settings {:?}: {}", path, e);
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Failed to parse settings {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, content).context("Failed to write settings file")?;
        Ok(())
    }
}
