//! Job registry: at most one pipeline execution per key.
//!
//! This module provides:
//! - [`Job`], the shared record of one execution
//! - [`JobRegistry`], the deduplicating map that creates jobs

mod job;
mod registry;

pub use job::{Job, JobState, JobSummary};
pub use registry::JobRegistry;
