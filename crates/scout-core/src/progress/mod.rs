//! Live job progress.
//!
//! ```text
//!   progress_stream (SSE) ──ok──► frames ──► parse_frame ──► ProgressUpdate ──► mpsc
//!          │                                                        ▲
//!        error / ended                                              │
//!          ▼                                                        │
//!   crawl_status every 1.5s ──► normalize_frame ────────────────────┘
//! ```
//!
//! Both transports share one normalization function, and the push stream is
//! always torn down before polling starts.

mod client;
mod normalize;
mod types;

pub use client::{ProgressStreamClient, StreamEnd};
pub use normalize::{clamp_percent, normalize_frame, parse_frame};
pub use types::{JobState, JobStats, ProgressUpdate};
