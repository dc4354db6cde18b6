//! De-duplication of one-shot user notifications.
//!
//! Markers are keyed by URL (`"{url}"` for success, `"{url}:error"` for
//! failure) and remember when they were set. A marker suppresses repeat
//! notifications until it expires and is purged; purging only ever happens
//! for the URL a new watcher is starting on.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Dedup key for a success notification.
pub fn success_key(url: &str) -> String {
    url.to_string()
}

/// Dedup key for a failure log entry.
pub fn error_key(url: &str) -> String {
    format!("{}:error", url)
}

/// Set of notification keys that have already fired.
///
/// Cheap to clone; clones share the same markers.
#[derive(Clone)]
pub struct NotificationGuard {
    markers: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    ttl: Duration,
    path: Option<PathBuf>,
}

impl NotificationGuard {
    /// In-memory guard.
    pub fn new(ttl: Duration) -> Self {
        Self {
            markers: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            path: None,
        }
    }

    /// Guard persisted to `path`, loading existing markers.
    ///
    /// A missing or unreadable file starts empty.
    pub fn persistent(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let path = path.into();
        let markers = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable notification markers {:?}: {}", path, e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };
        Self {
            markers: Arc::new(RwLock::new(markers)),
            ttl,
            path: Some(path),
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.markers.read().await.contains_key(key)
    }

    /// Atomically check and set a marker. Returns `true` if the caller should
    /// notify, i.e. the key was not present yet.
    pub async fn try_claim(&self, key: &str) -> bool {
        let snapshot = {
            let mut markers = self.markers.write().await;
            if markers.contains_key(key) {
                return false;
            }
            markers.insert(key.to_string(), Utc::now());
            self.path.as_ref().map(|_| markers.clone())
        };

        if let (Some(path), Some(markers)) = (&self.path, snapshot) {
            if let Err(e) = write_markers(path, &markers) {
                tracing::warn!("Failed to persist notification markers: {:#}", e);
            }
        }
        true
    }

    #[cfg(test)]
    pub(crate) async fn hold(
        &self,
    ) -> tokio::sync::RwLockWriteGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.markers.write().await
    }

    /// Remove expired markers for `url` only. Returns how many were removed.
    pub async fn purge_expired_for(&self, url: &str) -> usize {
        self.purge_expired_for_at(url, Utc::now()).await
    }

    pub(crate) async fn purge_expired_for_at(&self, url: &str, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let mut markers = self.markers.write().await;
        let mut removed = 0;
        for key in [success_key(url), error_key(url)] {
            let expired = markers
                .get(&key)
                .is_some_and(|set_at| now.signed_duration_since(*set_at) >= ttl);
            if expired {
                markers.remove(&key);
                removed += 1;
            }
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.markers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.markers.read().await.is_empty()
    }

    /// Write all markers to the backing file, if any.
    pub async fn flush(&self) -> anyhow::Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let markers = self.markers.read().await.clone();
        write_markers(path, &markers)
    }
}

fn write_markers(path: &Path, markers: &HashMap<String, DateTime<Utc>>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create marker directory")?;
    }
    let content = serde_json::to_string(markers).context("Failed to serialize markers")?;
    std::fs::write(path, content).context("Failed to write marker file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[tokio::test]
    async fn test_claim_once() {
        let guard = NotificationGuard::new(DAY);
        assert!(guard.try_claim(&success_key("https://a.test")).await);
        assert!(!guard.try_claim(&success_key("https://a.test")).await);
        assert!(guard.try_claim(&error_key("https://a.test")).await);
        assert!(guard.contains("https://a.test:error").await);
        assert_eq!(guard.len().await, 2);
    }

    #[tokio::test]
    async fn test_purge_only_expired_markers_for_url() {
        let guard = NotificationGuard::new(DAY);
        guard.try_claim(&success_key("https://a.test")).await;
        guard.try_claim(&error_key("https://a.test")).await;
        guard.try_claim(&success_key("https://b.test")).await;

        // Fresh markers survive.
        assert_eq!(guard.purge_expired_for("https://a.test").await, 0);

        let later = Utc::now() + chrono::Duration::days(2);
        assert_eq!(guard.purge_expired_for_at("https://a.test", later).await, 2);
        assert!(!guard.contains("https://a.test").await);
        // Other URLs are never touched.
        assert!(guard.contains("https://b.test").await);
    }

    #[tokio::test]
    async fn test_persistent_markers_survive_restart() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("state").join("notified.json");

        let guard = NotificationGuard::persistent(&path, DAY);
        assert!(guard.is_empty().await);
        assert!(guard.try_claim("https://a.test").await);

        let reloaded = NotificationGuard::persistent(&path, DAY);
        assert!(!reloaded.try_claim("https://a.test").await);

        std::fs::write(&path, "garbage").unwrap();
        let corrupted = NotificationGuard::persistent(&path, DAY);
        assert!(corrupted.is_empty().await);
        corrupted.flush().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }
}
