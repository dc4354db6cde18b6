//! Job tracking.
//!
//! Every enqueue call that returns a job id ends up in the [`JobRegistry`],
//! which owns the job's progress subscription until the job is done or
//! failed. A missing job id never reaches the registry; callers log it and
//! move on.

mod registry;
mod summary;

pub use registry::JobRegistry;
pub use summary::{JobStatusSummary, INITIAL_PROGRESS};
