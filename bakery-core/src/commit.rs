//! Moving a finished run's outputs into place.
//!
//! Phase one binds and prepares every output next to its destination and
//! digests it. Phase two renames them into place in tag order (fileset
//! members in member order), keeping a backup of every file it replaces; if
//! any rename fails, the outputs already moved are put back the way they
//! were. Directories created for the destinations are removed again when the
//! commit does not go through.

use crate::binding::PathBinding;
use crate::error::CommitError;
use crate::exec::{FileTable, discard_all, discard_quietly, discard_slot};
use bakery_stage::{FileRef, FileRefError, sibling_path};
use bakery_types::{CommittedOutput, Tag};
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;
use tracing::{debug, warn};

struct Outgoing {
    file: FileRef,
    member: Option<usize>,
    path: Utf8PathBuf,
    bytes: u64,
    sha256: String,
}

/// A destination already replaced during phase two.
struct Replaced {
    path: Utf8PathBuf,
    backup: Option<Utf8PathBuf>,
}

/// Commit `produced` onto `destinations`, all or nothing.
///
/// Produced files without a destination are discarded. A fileset must have
/// produced exactly as many members as it has bound paths.
pub(crate) fn commit_outputs(
    mut produced: FileTable,
    destinations: &BTreeMap<Tag, PathBinding>,
) -> Result<Vec<CommittedOutput>, CommitError> {
    let mut outgoing = Vec::with_capacity(destinations.len());
    for (tag, binding) in destinations {
        let Some(mut slot) = produced.remove(tag) else {
            discard_all(&mut produced);
            discard_outgoing(outgoing);
            return Err(CommitError::MissingOutput { tag: tag.clone() });
        };
        let paths = binding.paths();
        if slot.files().len() != paths.len() {
            let err = CommitError::MemberCount {
                tag: tag.clone(),
                bound: paths.len(),
                produced: slot.files().len(),
            };
            discard_slot(&mut slot);
            discard_all(&mut produced);
            discard_outgoing(outgoing);
            return Err(err);
        }
        for (index, (file, path)) in slot.into_files().into_iter().zip(paths).enumerate() {
            outgoing.push(Outgoing {
                file,
                member: binding.is_set().then_some(index),
                path: path.clone(),
                bytes: 0,
                sha256: String::new(),
            });
        }
    }
    for (tag, mut extra) in produced {
        debug!(tag = %tag, "discarding output with no destination");
        discard_slot(&mut extra);
    }

    let prepared = outgoing.iter_mut().try_for_each(Outgoing::prepare);
    let created = created_dirs(&outgoing);
    if let Err(err) = prepared {
        discard_outgoing(outgoing);
        remove_created_dirs(created);
        return Err(err);
    }

    let mut replaced: Vec<Replaced> = Vec::with_capacity(outgoing.len());
    let mut committed = Vec::with_capacity(outgoing.len());
    let mut queue = outgoing.into_iter();
    while let Some(mut item) = queue.next() {
        let backup = match back_up(&item.path) {
            Ok(backup) => backup,
            Err(source) => {
                discard_quietly(&mut item.file);
                roll_back(replaced);
                discard_outgoing(queue);
                remove_created_dirs(created);
                return Err(CommitError::Backup {
                    path: item.path,
                    source,
                });
            }
        };

        if let Err(source) = item.file.commit() {
            let err = item.file_error(source);
            discard_quietly(&mut item.file);
            if let Some(backup) = backup {
                remove_backup(&backup);
            }
            roll_back(replaced);
            discard_outgoing(queue);
            remove_created_dirs(created);
            return Err(err);
        }

        committed.push(CommittedOutput {
            tag: item.file.tag().clone(),
            member: item.member,
            path: item.path.clone(),
            bytes: item.bytes,
            sha256: item.sha256,
        });
        replaced.push(Replaced {
            path: item.path,
            backup,
        });
    }

    for done in replaced {
        if let Some(backup) = done.backup {
            remove_backup(&backup);
        }
    }
    Ok(committed)
}

impl Outgoing {
    fn prepare(&mut self) -> Result<(), CommitError> {
        self.file
            .bind_final(self.path.clone())
            .map_err(|source| self.file_error(source))?;
        self.file
            .prepare()
            .map_err(|source| self.file_error(source))?;

        let Some(staged) = self.file.staged_path() else {
            return Err(CommitError::MissingOutput {
                tag: self.file.tag().clone(),
            });
        };
        let (bytes, sha256) = digest(staged).map_err(|source| CommitError::Digest {
            tag: self.file.tag().clone(),
            source,
        })?;
        self.bytes = bytes;
        self.sha256 = sha256;
        Ok(())
    }

    fn file_error(&self, source: FileRefError) -> CommitError {
        CommitError::File {
            tag: self.file.tag().clone(),
            path: self.path.clone(),
            source,
        }
    }
}

fn digest(path: &Utf8Path) -> io::Result<(u64, String)> {
    let mut file = fs::File::open(path.as_std_path())?;
    let mut hasher = Sha256::new();
    let bytes = io::copy(&mut file, &mut hasher)?;
    Ok((bytes, hex::encode(hasher.finalize())))
}

/// Keep the current contents of `path`, if any, in a hidden sibling.
fn back_up(path: &Utf8Path) -> io::Result<Option<Utf8PathBuf>> {
    match fs::symlink_metadata(path) {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    }

    let backup = sibling_path(path, "bakery-backup");
    if let Err(err) = fs::hard_link(path, &backup) {
        debug!(path = %path, error = %err, "hard link failed; copying backup");
        fs::copy(path, &backup)?;
    }
    Ok(Some(backup))
}

fn roll_back(replaced: Vec<Replaced>) {
    for done in replaced.into_iter().rev() {
        let result = match &done.backup {
            Some(backup) => fs::rename(backup, &done.path),
            None => fs::remove_file(&done.path),
        };
        match result {
            Ok(()) => debug!(path = %done.path, "restored"),
            Err(err) => warn!(path = %done.path, error = %err, "could not restore output"),
        }
    }
}

fn remove_backup(backup: &Utf8Path) {
    if let Err(err) = fs::remove_file(backup) {
        warn!(path = %backup, error = %err, "could not remove backup");
    }
}

fn discard_outgoing(outgoing: impl IntoIterator<Item = Outgoing>) {
    for mut item in outgoing {
        discard_quietly(&mut item.file);
    }
}

fn created_dirs(outgoing: &[Outgoing]) -> Vec<Utf8PathBuf> {
    outgoing
        .iter()
        .flat_map(|item| item.file.created_dirs().iter().cloned())
        .collect()
}

/// Remove directories made for a commit that did not happen, deepest first.
///
/// A directory that is no longer empty is left alone.
fn remove_created_dirs(mut dirs: Vec<Utf8PathBuf>) {
    dirs.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
    dirs.dedup();
    for dir in dirs {
        match fs::remove_dir(&dir) {
            Ok(()) => debug!(path = %dir, "removed created directory"),
            Err(err) => debug!(path = %dir, error = %err, "kept created directory"),
        }
    }
}
