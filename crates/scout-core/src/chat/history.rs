//! Conversation persistence.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::message::Conversation;

/// Summary of a conversation for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub updated_at: String,
}

/// Where finished conversations are kept.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    /// `Ok(None)` when no conversation with this id was saved.
    async fn load(&self, id: &str) -> Result<Option<Conversation>>;

    /// Summaries sorted by most recent first.
    async fn list(&self) -> Result<Vec<ConversationSummary>>;
}

/// Store that keeps nothing
pub struct NoHistory;

#[async_trait]
impl HistoryStore for NoHistory {
    async fn save(&self, _conversation: &Conversation) -> Result<()> {
        Ok(())
    }

    async fn load(&self, _id: &str) -> Result<Option<Conversation>> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>> {
        Ok(Vec::new())
    }
}

/// One JSON file per conversation in a directory.
pub struct FileHistoryStore {
    dir: PathBuf,
}

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn conversation_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

#[async_trait]
impl HistoryStore for FileHistoryStore {
    async fn save(&self, conversation: &Conversation) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .context("Failed to create conversations directory")?;
        let content = serde_json::to_string_pretty(conversation)
            .context("Failed to serialize conversation")?;
        tokio::fs::write(self.conversation_path(&conversation.id), content)
            .await
            .context("Failed to write conversation file")?;
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        let path = self.conversation_path(id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        load_conversation(&path).await.map(Some)
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>> {
        let mut summaries = Vec::new();

        if !tokio::fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(summaries);
        }

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match load_conversation(&path).await {
                Ok(conv) => summaries.push(ConversationSummary {
                    id: conv.id,
                    title: conv.title,
                    updated_at: conv.updated_at,
                }),
                Err(e) => {
                    tracing::warn!("Failed to load conversation {:?}: {:#}", path, e);
                }
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

async fn load_conversation(path: &Path) -> Result<Conversation> {
    let content = tokio::fs::read_to_string(path)
        .await
        .context("Failed to read conversation file")?;
    serde_json::from_str(&content).context("Failed to parse conversation JSON")
}
