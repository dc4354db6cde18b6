//! Backend collaborators consumed by the coordinator.
//!
//! The crawler, shadow indexer and chat services are reached through the
//! [`Backend`] trait. [`HttpBackend`] is the production implementation; tests
//! substitute in-memory fakes.

mod error;
pub mod framing;
mod http;

pub use error::{ApiError, ApiResult};
pub use framing::FrameStream;
pub use http::HttpBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Request body for `POST /crawl`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub focused: bool,
}

impl CrawlRequest {
    /// Crawl starting from a single page.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Search-triggered crawl focused on a query.
    pub fn focused(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            focused: true,
            ..Default::default()
        }
    }

    /// Human readable label for logs and job descriptions.
    pub fn describe(&self) -> String {
        match (&self.url, &self.query) {
            (Some(url), _) => format!("Crawl {}", url),
            (None, Some(query)) => format!("Focused crawl \"{}\"", query),
            (None, None) => "Crawl".to_string(),
        }
    }
}

/// Response of any enqueue call. A missing or empty `job_id` means the
/// backend accepted the work without tracking it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnqueueResponse {
    #[serde(default, alias = "jobId")]
    pub job_id: Option<String>,
}

impl EnqueueResponse {
    pub fn into_job_id(self) -> Option<String> {
        self.job_id.filter(|id| !id.trim().is_empty())
    }
}

/// Why a page was queued for shadow indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexReason {
    /// A navigation event targeted the page.
    Navigation { tab_id: Option<String> },
    /// The page was re-affirmed without a matching navigation.
    Manual,
}

impl IndexReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexReason::Navigation { .. } => "navigation",
            IndexReason::Manual => "manual",
        }
    }
}

/// Request body for the shadow-index queue endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShadowIndexRequest {
    pub url: String,
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,
}

impl ShadowIndexRequest {
    pub fn new(url: &str, reason: &IndexReason) -> Self {
        let tab_id = match reason {
            IndexReason::Navigation { tab_id } => tab_id.clone(),
            IndexReason::Manual => None,
        };
        Self {
            url: url.to_string(),
            reason: reason.as_str(),
            tab_id,
        }
    }
}

/// State reported by the shadow status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowState {
    Queued,
    Running,
    Done,
    Error,
    #[serde(other)]
    Unknown,
}

/// Response of the shadow status endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ShadowStatus {
    pub state: ShadowState,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub chunks: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
}

/// A source attached to a chat answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Role-tagged message as sent to the chat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

/// Request body for both chat transports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub request_id: String,
}

/// One frame of a chat response stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatFrame {
    Metadata {
        #[serde(default)]
        model: Option<String>,
        #[serde(default, alias = "traceId")]
        trace_id: Option<String>,
    },
    Delta {
        #[serde(default, alias = "content")]
        answer: Option<String>,
        #[serde(default)]
        reasoning: Option<String>,
        #[serde(default)]
        citations: Vec<Citation>,
    },
    #[serde(alias = "complete")]
    Done,
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default, alias = "traceId")]
        trace_id: Option<String>,
        #[serde(default)]
        status: Option<u16>,
    },
}

/// The backend services the coordinator talks to.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Enqueue a crawl. `Ok(None)` means accepted without a job id.
    async fn enqueue_crawl(&self, request: &CrawlRequest) -> ApiResult<Option<String>>;

    /// Open the push progress stream for a job; yields raw JSON frames.
    async fn progress_stream(&self, job_id: &str) -> ApiResult<FrameStream>;

    /// Fetch the current crawl status of a job (poll transport).
    async fn crawl_status(&self, job_id: &str) -> ApiResult<serde_json::Value>;

    /// Record that a page was visited.
    async fn record_visit(&self, url: &str) -> ApiResult<()>;

    /// Queue a page for background shadow indexing.
    async fn queue_shadow_index(&self, request: &ShadowIndexRequest)
        -> ApiResult<Option<String>>;

    /// Fetch the shadow indexing status of a job.
    async fn shadow_status(&self, job_id: &str) -> ApiResult<ShadowStatus>;

    /// Open a push (SSE) chat stream.
    async fn stream_chat(&self, request: &ChatRequest) -> ApiResult<FrameStream>;

    /// Issue a plain chat request whose body is newline-delimited frames.
    async fn request_chat(&self, request: &ChatRequest) -> ApiResult<FrameStream>;
}
