//! Staged file handles.
//!
//! A [`FileRef`] moves through `Pending → Staged → Committed`, or ends in
//! `Discarded` from any state before `Committed`. Writers only ever touch the
//! staged path; the final path is replaced by a single rename, so readers
//! either see the previous file or the complete new one.

use crate::error::FileRefError;
use bakery_types::Tag;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::fmt;
use std::io;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Staged,
    Committed,
    Discarded,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileState::Pending => "pending",
            FileState::Staged => "staged",
            FileState::Committed => "committed",
            FileState::Discarded => "discarded",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    Writable,
}

/// One concrete file bound to a tag for the duration of a run.
///
/// Not `Clone`: exactly one owner decides whether the file is committed or
/// discarded. Dropping a `Staged` handle removes its staged file.
#[derive(Debug)]
pub struct FileRef {
    tag: Tag,
    access: Access,
    staged_path: Option<Utf8PathBuf>,
    final_path: Option<Utf8PathBuf>,
    state: FileState,
    created_dirs: Vec<Utf8PathBuf>,
}

impl FileRef {
    /// A writable file whose contents will be staged at `staged_path`.
    pub fn pending(tag: Tag, staged_path: Utf8PathBuf) -> Self {
        Self {
            tag,
            access: Access::Writable,
            staged_path: Some(staged_path),
            final_path: None,
            state: FileState::Pending,
            created_dirs: Vec::new(),
        }
    }

    /// An existing file supplied from outside the run.
    ///
    /// Sources start out `Committed`: they are readable, and every
    /// lifecycle operation on them is refused.
    pub fn source(tag: Tag, path: Utf8PathBuf) -> Self {
        Self {
            tag,
            access: Access::ReadOnly,
            staged_path: None,
            final_path: Some(path),
            state: FileState::Committed,
            created_dirs: Vec::new(),
        }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn staged_path(&self) -> Option<&Utf8Path> {
        self.staged_path.as_deref()
    }

    pub fn final_path(&self) -> Option<&Utf8Path> {
        self.final_path.as_deref()
    }

    /// Where the current contents can be read from, if anywhere.
    pub fn readable_path(&self) -> Option<&Utf8Path> {
        match self.state {
            FileState::Staged => self.staged_path(),
            FileState::Committed => self.final_path(),
            FileState::Pending | FileState::Discarded => None,
        }
    }

    /// Directories [`prepare`](Self::prepare) created for the final path,
    /// deepest first.
    pub fn created_dirs(&self) -> &[Utf8PathBuf] {
        &self.created_dirs
    }

    pub fn is_staged(&self) -> bool {
        self.state == FileState::Staged
    }

    /// Relabel the handle when it crosses a tag-renaming boundary.
    pub fn retag(&mut self, tag: Tag) {
        self.tag = tag;
    }

    /// Create (or truncate) the staged file and return a handle to write it.
    ///
    /// Valid from `Pending` and `Staged`; staging twice rewrites the same
    /// staged file from scratch.
    pub fn stage(&mut self) -> Result<fs::File, FileRefError> {
        self.ensure_writable("stage")?;
        self.ensure_state(&[FileState::Pending, FileState::Staged], "stage")?;
        let path = self.require_staged_path()?.to_path_buf();

        let file =
            fs::File::create(path.as_std_path()).map_err(|source| FileRefError::Stage {
                tag: self.tag.clone(),
                path: path.clone(),
                source,
            })?;
        if self.state == FileState::Pending {
            debug!(tag = %self.tag, path = %path, "staged");
        }
        self.state = FileState::Staged;
        Ok(file)
    }

    /// Set the destination this file will be committed to.
    pub fn bind_final(&mut self, path: Utf8PathBuf) -> Result<(), FileRefError> {
        self.ensure_writable("bind a final path")?;
        self.ensure_state(
            &[FileState::Pending, FileState::Staged],
            "bind a final path",
        )?;
        self.final_path = Some(path);
        Ok(())
    }

    /// Move the staged file next to its destination.
    ///
    /// Creates the destination's parent directories, then relocates the
    /// staged file to a hidden sibling of the final path. A rename is used
    /// when possible; across filesystems the file is copied and synced. After
    /// this, [`commit`](Self::commit) is a same-directory rename.
    pub fn prepare(&mut self) -> Result<(), FileRefError> {
        self.ensure_writable("prepare")?;
        self.ensure_state(&[FileState::Staged], "prepare")?;
        let final_path = self.require_final_path()?.to_path_buf();
        let staged = self.require_staged_path()?.to_path_buf();

        let parent = parent_dir(&final_path);
        self.created_dirs = missing_dirs(parent);
        fs::create_dir_all(parent).map_err(|source| FileRefError::Commit {
            tag: self.tag.clone(),
            path: final_path.clone(),
            source,
        })?;

        let sibling = sibling_path(&final_path, "bakery-stage");
        match fs::rename(&staged, &sibling) {
            Ok(()) => {}
            Err(err) if is_cross_device(&err) => {
                debug!(tag = %self.tag, from = %staged, to = %sibling, "copying across devices");
                copy_durably(&staged, &sibling).map_err(|source| FileRefError::Commit {
                    tag: self.tag.clone(),
                    path: final_path.clone(),
                    source,
                })?;
                if let Err(err) = fs::remove_file(&staged) {
                    warn!(tag = %self.tag, error = %err, "could not remove workspace copy");
                }
            }
            Err(source) => {
                return Err(FileRefError::Commit {
                    tag: self.tag.clone(),
                    path: final_path,
                    source,
                });
            }
        }

        self.staged_path = Some(sibling);
        Ok(())
    }

    /// Atomically move the staged file onto its final path.
    ///
    /// Only valid from `Staged`. Fails with
    /// [`FileRefError::CrossDevice`] when the rename cannot be atomic;
    /// call [`prepare`](Self::prepare) first to rule that out.
    pub fn commit(&mut self) -> Result<(), FileRefError> {
        self.ensure_writable("commit")?;
        self.ensure_state(&[FileState::Staged], "commit")?;
        let final_path = self.require_final_path()?.to_path_buf();
        let staged = self.require_staged_path()?.to_path_buf();

        match fs::rename(&staged, &final_path) {
            Ok(()) => {
                debug!(tag = %self.tag, path = %final_path, "committed");
                self.state = FileState::Committed;
                Ok(())
            }
            Err(err) => Err(rename_failure(&self.tag, staged, final_path, err)),
        }
    }

    /// Throw away the staged contents.
    ///
    /// Valid from any state except `Committed`; discarding twice is a no-op.
    pub fn discard(&mut self) -> Result<(), FileRefError> {
        self.ensure_writable("discard")?;
        match self.state {
            FileState::Committed => {
                return Err(FileRefError::InvalidTransition {
                    tag: self.tag.clone(),
                    state: self.state,
                    action: "discard",
                });
            }
            FileState::Discarded => return Ok(()),
            FileState::Pending => {}
            FileState::Staged => {
                if let Some(path) = self.staged_path.clone() {
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                        Err(source) => {
                            return Err(FileRefError::Discard {
                                tag: self.tag.clone(),
                                path,
                                source,
                            });
                        }
                    }
                }
            }
        }
        debug!(tag = %self.tag, "discarded");
        self.state = FileState::Discarded;
        Ok(())
    }

    fn ensure_writable(&self, action: &'static str) -> Result<(), FileRefError> {
        match self.access {
            Access::Writable => Ok(()),
            Access::ReadOnly => Err(FileRefError::ReadOnly {
                tag: self.tag.clone(),
                action,
            }),
        }
    }

    fn ensure_state(
        &self,
        allowed: &[FileState],
        action: &'static str,
    ) -> Result<(), FileRefError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(FileRefError::InvalidTransition {
                tag: self.tag.clone(),
                state: self.state,
                action,
            })
        }
    }

    fn require_staged_path(&self) -> Result<&Utf8Path, FileRefError> {
        // Only sources lack a staged path, and those are rejected earlier.
        self.staged_path()
            .ok_or_else(|| FileRefError::ReadOnly {
                tag: self.tag.clone(),
                action: "stage",
            })
    }

    fn require_final_path(&self) -> Result<&Utf8Path, FileRefError> {
        self.final_path().ok_or_else(|| FileRefError::Unbound {
            tag: self.tag.clone(),
        })
    }
}

impl Drop for FileRef {
    fn drop(&mut self) {
        if self.state == FileState::Staged
            && let Some(path) = &self.staged_path
        {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// A hidden, unique file next to `path`: `.<name>.<uuid>.<suffix>`.
pub fn sibling_path(path: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    let name = path.file_name().unwrap_or("output");
    parent_dir(path).join(format!(".{name}.{}.{suffix}", uuid::Uuid::new_v4().simple()))
}

/// `path.parent()`, with the empty parent of a bare file name mapped to `.`.
pub fn parent_dir(path: &Utf8Path) -> &Utf8Path {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    }
}

/// `dir` and those of its ancestors that do not exist yet, deepest first.
fn missing_dirs(dir: &Utf8Path) -> Vec<Utf8PathBuf> {
    dir.ancestors()
        .take_while(|d| !d.as_str().is_empty() && fs::symlink_metadata(d).is_err())
        .map(Utf8Path::to_path_buf)
        .collect()
}

fn is_cross_device(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::CrossesDevices
}

fn rename_failure(
    tag: &Tag,
    from: Utf8PathBuf,
    to: Utf8PathBuf,
    err: io::Error,
) -> FileRefError {
    if is_cross_device(&err) {
        FileRefError::CrossDevice {
            tag: tag.clone(),
            from,
            to,
        }
    } else {
        FileRefError::Commit {
            tag: tag.clone(),
            path: to,
            source: err,
        }
    }
}

fn copy_durably(from: &Utf8Path, to: &Utf8Path) -> io::Result<()> {
    let result = fs::copy(from, to).and_then(|_| {
        let copied = fs::File::open(to.as_std_path())?;
        copied.sync_all()
    });
    if result.is_err() {
        let _ = fs::remove_file(to);
    }
    result
}
