//! Core domain model types for repohealth.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Repository keys and their storage form
//! - The opaque caller credential
//! - Submission and query state enums
//! - The assembled result payload

mod credential;
mod key;
pub mod payload;
mod status;

pub use credential::Credential;
pub use key::{RepoKey, MAX_KEY_LEN};
pub use payload::ResultPayload;
pub use status::{QueryState, SubmitStatus};
