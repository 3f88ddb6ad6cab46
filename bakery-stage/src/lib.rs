//! Staging engine for bakery runs.
//!
//! Responsibilities:
//! - Track the lifecycle of every file a run writes ([`FileRef`]).
//! - Own the per-run scratch directory ([`Workspace`]).
//! - Move finished files into place with a single rename.

pub mod error;
pub mod fileref;
pub mod workspace;

pub use error::{FileRefError, WorkspaceError};
pub use fileref::{Access, FileRef, FileState, parent_dir, sibling_path};
pub use workspace::Workspace;
