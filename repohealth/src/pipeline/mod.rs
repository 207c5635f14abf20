//! The per-key fetch, clone and analyze pipeline.
//!
//! This module provides:
//! - The fixed [`Stage`] table
//! - The [`PipelineRunner`] that walks it against the stage cache

mod runner;
mod stage;

pub use runner::PipelineRunner;
pub use stage::{Stage, SKIP_MIRROR_STAGE};
