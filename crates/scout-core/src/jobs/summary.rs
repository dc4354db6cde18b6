//! Latest known status of a backend job.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::progress::{JobState, JobStats, ProgressUpdate};

/// Progress shown for a job that was just registered.
pub const INITIAL_PROGRESS: u8 = 10;

/// One per backend job, keyed by `job_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusSummary {
    pub job_id: String,
    pub description: String,
    pub state: JobState,
    pub phase: String,
    /// Always within 0..=100
    pub progress: u8,
    pub stats: JobStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls_processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Display only; never used for ordering
    pub last_updated: DateTime<Utc>,
}

impl JobStatusSummary {
    pub fn new(job_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            description: description.into(),
            state: JobState::Queued,
            phase: "queued".to_string(),
            progress: INITIAL_PROGRESS,
            stats: JobStats::default(),
            urls_processed: None,
            last_url: None,
            retries: None,
            eta_seconds: None,
            error: None,
            last_updated: Utc::now(),
        }
    }

    /// Merge an update into this summary, update wins on conflicts.
    ///
    /// Stats are max-merged and the state only moves forward. Updates to a
    /// summary that is already terminal are ignored. Returns `true` when this
    /// update moved the job into a terminal state.
    pub fn apply(&mut self, update: &ProgressUpdate) -> bool {
        if self.state.is_terminal() {
            return false;
        }

        if let Some(ref phase) = update.phase {
            self.phase = phase.clone();
        }
        if let Some(progress) = update.progress {
            self.progress = progress.min(100);
        }
        if let Some(next) = update.resolved_state() {
            if self.state.can_transition_to(next) {
                self.state = next;
            }
        }
        if let Some(ref stats) = update.stats {
            self.stats.merge_max(stats);
        }
        if update.urls_processed.is_some() {
            self.urls_processed = update.urls_processed;
        }
        if update.last_url.is_some() {
            self.last_url = update.last_url.clone();
        }
        if update.retries.is_some() {
            self.retries = update.retries;
        }
        if update.eta_seconds.is_some() {
            self.eta_seconds = update.eta_seconds;
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }
        if self.state == JobState::Done {
            self.progress = 100;
            self.eta_seconds = None;
        }
        self.last_updated = Utc::now();

        self.state.is_terminal()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
