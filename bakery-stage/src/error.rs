//! Error types for bakery-stage.
//!
//! Every variant names the tag it concerns so that the driver can report
//! failures without carrying extra context around.

use crate::fileref::FileState;
use bakery_types::Tag;
use camino::Utf8PathBuf;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of a single [`FileRef`](crate::FileRef) operation.
#[derive(Debug, Error)]
pub enum FileRefError {
    /// The requested operation is not legal from the current state.
    #[error("file `{tag}` is {state}; cannot {action}")]
    InvalidTransition {
        tag: Tag,
        state: FileState,
        action: &'static str,
    },

    /// Sources handed in by the caller are never written.
    #[error("file `{tag}` is a read-only source; cannot {action}")]
    ReadOnly { tag: Tag, action: &'static str },

    /// `prepare`/`commit` called before a destination was bound.
    #[error("file `{tag}` has no final path")]
    Unbound { tag: Tag },

    #[error("stage `{tag}` at {path}: {source}")]
    Stage {
        tag: Tag,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The staged file and its destination live on different filesystems,
    /// so a rename cannot be atomic.
    #[error("commit `{tag}`: {from} and {to} are on different devices")]
    CrossDevice {
        tag: Tag,
        from: Utf8PathBuf,
        to: Utf8PathBuf,
    },

    #[error("commit `{tag}` to {path}: {source}")]
    Commit {
        tag: Tag,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("discard `{tag}` at {path}: {source}")]
    Discard {
        tag: Tag,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileRefError {
    pub fn tag(&self) -> &Tag {
        match self {
            FileRefError::InvalidTransition { tag, .. }
            | FileRefError::ReadOnly { tag, .. }
            | FileRefError::Unbound { tag }
            | FileRefError::Stage { tag, .. }
            | FileRefError::CrossDevice { tag, .. }
            | FileRefError::Commit { tag, .. }
            | FileRefError::Discard { tag, .. } => tag,
        }
    }

    /// Returns true for misuse of the lifecycle (as opposed to I/O failures).
    pub fn is_lifecycle_violation(&self) -> bool {
        matches!(
            self,
            FileRefError::InvalidTransition { .. }
                | FileRefError::ReadOnly { .. }
                | FileRefError::Unbound { .. }
        )
    }
}

/// Failures creating a run workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("create run workspace under {parent}: {source}")]
    Create {
        parent: String,
        #[source]
        source: std::io::Error,
    },

    #[error("run workspace path is not UTF-8: {}", path.display())]
    NonUtf8 { path: PathBuf },
}
