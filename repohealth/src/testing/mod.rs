//! Testing utilities for repohealth.
//!
//! This module provides recording doubles for the collaborator ports, so a
//! full pipeline can run against a temporary storage root without network
//! access or git.

mod doubles;

pub use doubles::{FakeMirror, FetchCall, StaticAnalyzer, StaticFetcher, TestCollaborators};
