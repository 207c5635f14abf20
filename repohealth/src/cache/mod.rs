//! Multi-tier on-disk stage cache.
//!
//! Each key gets its own storage root. Every stage of the pipeline persists
//! its output there, so a restarted process can skip completed stages.

mod layout;
mod store;
mod tier;

pub use layout::{StorageLayout, MIRROR_DIR, STATUS_FILE};
pub use store::StageCache;
pub use tier::CacheTier;
