//! Shared DTOs for the bakery workspace.
//!
//! # Design constraints
//! - `Structure` and `RunReport` are serialized to disk and stdout.
//! - Be conservative with breaking changes.
//! - Prefer adding optional fields over changing semantics.

pub mod report;
pub mod structure;
pub mod tag;

pub use report::{CommittedOutput, RunFailure, RunReport, RunState};
pub use structure::Structure;
pub use tag::{FILESET_PREFIX, Tag, TagSet, join_tags, tag_set};

/// Schema identifiers.
pub mod schema {
    pub const BAKERY_RUN_V1: &str = "bakery.run.v1";
    pub const BAKERY_STRUCTURE_V1: &str = "bakery.structure.v1";
}
