//! Per-run scratch directory.

use crate::error::WorkspaceError;
use crate::fileref::FileRef;
use bakery_types::Tag;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;
use tracing::debug;

const PREFIX: &str = ".bakery-run-";

/// Temporary directory owned by exactly one run.
///
/// Every intermediate and output file of the run is staged here. The
/// directory is removed when the workspace is closed or dropped, whatever the
/// outcome of the run. Allocation is thread-safe so merge branches can stage
/// files concurrently.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    root: Utf8PathBuf,
    next: AtomicU64,
}

impl Workspace {
    /// Create a workspace inside `parent`, or the system temp dir when `None`.
    pub fn create(parent: Option<&Utf8Path>) -> Result<Self, WorkspaceError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(PREFIX);

        let dir = match parent {
            Some(parent) => fs::create_dir_all(parent)
                .and_then(|()| builder.tempdir_in(parent))
                .map_err(|source| WorkspaceError::Create {
                    parent: parent.to_string(),
                    source,
                })?,
            None => builder.tempdir().map_err(|source| WorkspaceError::Create {
                parent: std::env::temp_dir().display().to_string(),
                source,
            })?,
        };

        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .map_err(|path| WorkspaceError::NonUtf8 { path })?;
        debug!(workspace = %root, "created run workspace");

        Ok(Self {
            dir,
            root,
            next: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// A fresh `Pending` file for `tag` with a unique staged path.
    pub fn allocate(&self, tag: &Tag) -> FileRef {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        FileRef::pending(
            tag.clone(),
            self.root.join(format!("{n:04}-{}", tag.base_name())),
        )
    }

    /// Number of files allocated so far.
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Remove the directory, reporting any failure instead of swallowing it.
    pub fn close(self) -> std::io::Result<()> {
        debug!(workspace = %self.root, "removing run workspace");
        self.dir.close()
    }
}
