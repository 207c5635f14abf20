//! Utility functions for timestamps and atomic file publishing.

pub mod fs;
pub mod timestamps;

pub use fs::{publish_atomically, read_json, write_json_atomically, ReadJsonError};
pub use timestamps::{format_iso8601, iso_timestamp, now_utc, pretty_timedelta, Timestamp};
