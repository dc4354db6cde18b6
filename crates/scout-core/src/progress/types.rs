//! Job state and progress update types.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a backend job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Error,
}

impl JobState {
    /// Parse an explicit state label.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" => Some(Self::Queued),
            "running" | "active" | "in_progress" => Some(Self::Running),
            "done" | "completed" | "complete" | "finished" | "success" => Some(Self::Done),
            "error" | "failed" | "failure" => Some(Self::Error),
            _ => None,
        }
    }

    /// Classify a free-text phase. Unknown phases mean the job is running.
    pub fn from_phase(phase: &str) -> Self {
        Self::from_label(phase).unwrap_or(Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// Whether moving from `self` to `next` respects queued → running → {done|error}.
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Queued => true,
            Self::Running => next != Self::Queued,
            Self::Done | Self::Error => false,
        }
    }
}

/// Counters reported by crawl and indexing jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pages_fetched: u64,
    pub docs_indexed: u64,
    pub skipped: u64,
    pub deduped: u64,
    pub embedded: u64,
}

impl JobStats {
    /// Merge counters so none of them ever decreases.
    pub fn merge_max(&mut self, other: &JobStats) {
        self.pages_fetched = self.pages_fetched.max(other.pages_fetched);
        self.docs_indexed = self.docs_indexed.max(other.docs_indexed);
        self.skipped = self.skipped.max(other.skipped);
        self.deduped = self.deduped.max(other.deduped);
        self.embedded = self.embedded.max(other.embedded);
    }
}

/// One normalized status update for a job, from either transport.
///
/// Every field is optional; absent fields leave the stored summary untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub phase: Option<String>,
    /// Percentage, already clamped to 0..=100 and rounded
    pub progress: Option<u8>,
    /// Explicit state, when the frame carried one
    pub state: Option<JobState>,
    pub urls_processed: Option<u64>,
    pub last_url: Option<String>,
    pub stats: Option<JobStats>,
    pub retries: Option<u32>,
    pub eta_seconds: Option<u64>,
    pub error: Option<String>,
}

impl ProgressUpdate {
    /// The state this update implies: an explicit state wins, otherwise the
    /// phase is classified.
    pub fn resolved_state(&self) -> Option<JobState> {
        self.state
            .or_else(|| self.phase.as_deref().map(JobState::from_phase))
    }

    pub fn is_terminal(&self) -> bool {
        self.resolved_state().is_some_and(JobState::is_terminal)
    }
}
