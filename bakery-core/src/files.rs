//! What a leaf script sees: its declared inputs and outputs.

use crate::error::ExecutionError;
use crate::exec::{FileTable, InputView, Slot};
use bakery_stage::{FileRef, FileRefError, Workspace};
use bakery_types::{Tag, TagSet};
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

/// Read access to a leaf's declared inputs.
///
/// Asking for a tag the leaf did not declare fails with
/// [`ExecutionError::UndeclaredInput`]. Fileset tags are read member by
/// member; the plain accessors refuse them with [`ExecutionError::TagKind`].
pub struct InputFiles<'a> {
    transform: &'a str,
    files: BTreeMap<Tag, InputSlot<'a>>,
}

struct InputSlot<'a> {
    files: Slot<&'a FileRef>,
    used: AtomicBool,
}

impl<'a> InputFiles<'a> {
    pub(crate) fn new(transform: &'a str, view: &InputView<'a>) -> Self {
        let files = view
            .iter()
            .map(|(tag, files)| {
                (
                    tag.clone(),
                    InputSlot {
                        files: files.clone(),
                        used: AtomicBool::new(false),
                    },
                )
            })
            .collect();
        Self { transform, files }
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.files.keys()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.files.contains_key(tag)
    }

    /// Path of the current contents for `tag`.
    ///
    /// For root inputs this is the caller's file; for intermediates it is a
    /// staged file inside the run workspace. Treat it as read-only.
    pub fn path(&self, tag: &str) -> Result<&'a Utf8Path, ExecutionError> {
        match &self.slot(tag)?.files {
            Slot::One(file) => self.readable(tag, *file),
            Slot::Set(_) => Err(self.wrong_kind(tag)),
        }
    }

    pub fn open(&self, tag: &str) -> Result<fs::File, ExecutionError> {
        let path = self.path(tag)?;
        fs::File::open(path.as_std_path()).map_err(|source| self.unreadable(tag, path, source))
    }

    pub fn read(&self, tag: &str) -> Result<Vec<u8>, ExecutionError> {
        let path = self.path(tag)?;
        fs::read(path).map_err(|source| self.unreadable(tag, path, source))
    }

    pub fn read_to_string(&self, tag: &str) -> Result<String, ExecutionError> {
        let path = self.path(tag)?;
        fs::read_to_string(path).map_err(|source| self.unreadable(tag, path, source))
    }

    /// Number of members bound to the fileset `tag`.
    pub fn member_count(&self, tag: &str) -> Result<usize, ExecutionError> {
        Ok(self.members(tag)?.len())
    }

    /// Path of member `index` of the fileset `tag`.
    pub fn member_path(&self, tag: &str, index: usize) -> Result<&'a Utf8Path, ExecutionError> {
        let members = self.members(tag)?;
        let file = members
            .get(index)
            .ok_or_else(|| ExecutionError::MissingMember {
                transform: self.transform.to_string(),
                tag: Tag::from(tag),
                index,
                len: members.len(),
            })?;
        self.readable(tag, *file)
    }

    /// Paths of every member of the fileset `tag`, in binding order.
    pub fn member_paths(&self, tag: &str) -> Result<Vec<&'a Utf8Path>, ExecutionError> {
        self.members(tag)?
            .iter()
            .map(|file| self.readable(tag, *file))
            .collect()
    }

    pub fn open_member(&self, tag: &str, index: usize) -> Result<fs::File, ExecutionError> {
        let path = self.member_path(tag, index)?;
        fs::File::open(path.as_std_path()).map_err(|source| self.unreadable(tag, path, source))
    }

    pub fn read_member(&self, tag: &str, index: usize) -> Result<Vec<u8>, ExecutionError> {
        let path = self.member_path(tag, index)?;
        fs::read(path).map_err(|source| self.unreadable(tag, path, source))
    }

    pub fn read_member_to_string(&self, tag: &str, index: usize) -> Result<String, ExecutionError> {
        let path = self.member_path(tag, index)?;
        fs::read_to_string(path).map_err(|source| self.unreadable(tag, path, source))
    }

    /// Declared inputs the script never asked for.
    pub(crate) fn unused(&self) -> Vec<&Tag> {
        self.files
            .iter()
            .filter(|(_, slot)| !slot.used.load(Ordering::Relaxed))
            .map(|(tag, _)| tag)
            .collect()
    }

    fn slot(&self, tag: &str) -> Result<&InputSlot<'a>, ExecutionError> {
        let slot = self
            .files
            .get(tag)
            .ok_or_else(|| ExecutionError::UndeclaredInput {
                transform: self.transform.to_string(),
                tag: Tag::from(tag),
            })?;
        slot.used.store(true, Ordering::Relaxed);
        Ok(slot)
    }

    fn members(&self, tag: &str) -> Result<&[&'a FileRef], ExecutionError> {
        match &self.slot(tag)?.files {
            Slot::Set(members) => Ok(members.as_slice()),
            Slot::One(_) => Err(self.wrong_kind(tag)),
        }
    }

    fn readable(&self, tag: &str, file: &'a FileRef) -> Result<&'a Utf8Path, ExecutionError> {
        file.readable_path()
            .ok_or_else(|| ExecutionError::MissingInput {
                transform: self.transform.to_string(),
                tag: Tag::from(tag),
            })
    }

    fn wrong_kind(&self, tag: &str) -> ExecutionError {
        ExecutionError::TagKind {
            transform: self.transform.to_string(),
            tag: Tag::from(tag),
        }
    }

    fn unreadable(&self, tag: &str, path: &Utf8Path, source: std::io::Error) -> ExecutionError {
        ExecutionError::UnreadableInput {
            transform: self.transform.to_string(),
            tag: Tag::from(tag),
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write access to a leaf's declared outputs.
///
/// Every declared output must be written (via [`create`](Self::create),
/// [`write`](Self::write) or [`staged_path`](Self::staged_path)) before the
/// script returns. Writes to undeclared tags are refused and remembered, so
/// the leaf fails even if the script ignores the error.
///
/// A fileset output starts empty and grows with
/// [`create_member`](Self::create_member). Members must end up contiguous:
/// creating member 2 without members 0 and 1 leaves a gap, and the leaf fails
/// with [`ExecutionError::OutputNotWritten`].
pub struct OutputFiles<'a> {
    transform: &'a str,
    workspace: &'a Workspace,
    files: FileTable,
    undeclared: TagSet,
}

impl<'a> OutputFiles<'a> {
    pub(crate) fn new(transform: &'a str, workspace: &'a Workspace, tags: &TagSet) -> Self {
        let files = tags
            .iter()
            .map(|tag| {
                let slot = if tag.is_fileset() {
                    Slot::Set(Vec::new())
                } else {
                    Slot::One(workspace.allocate(tag))
                };
                (tag.clone(), slot)
            })
            .collect();
        Self {
            transform,
            workspace,
            files,
            undeclared: TagSet::new(),
        }
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.files.keys()
    }

    /// Whether `tag` has been written yet. A fileset counts as written when
    /// every member created so far has been.
    pub fn is_written(&self, tag: &str) -> bool {
        self.files
            .get(tag)
            .is_some_and(|slot| slot.files().iter().all(FileRef::is_staged))
    }

    /// Create (or truncate) the staged file for `tag`.
    pub fn create(&mut self, tag: &str) -> Result<fs::File, ExecutionError> {
        let transform = self.transform;
        match self.declared(tag)? {
            Slot::One(file) => file.stage().map_err(|source| ExecutionError::File {
                transform: transform.to_string(),
                source,
            }),
            Slot::Set(_) => Err(ExecutionError::TagKind {
                transform: transform.to_string(),
                tag: Tag::from(tag),
            }),
        }
    }

    /// Write `contents` as the whole of `tag`.
    pub fn write(&mut self, tag: &str, contents: impl AsRef<[u8]>) -> Result<(), ExecutionError> {
        let mut handle = self.create(tag)?;
        handle
            .write_all(contents.as_ref())
            .and_then(|()| handle.flush())
            .map_err(|source| self.stage_error(tag, 0, source))
    }

    /// Stage `tag` empty and return its path, for tools that write by path.
    pub fn staged_path(&mut self, tag: &str) -> Result<Utf8PathBuf, ExecutionError> {
        drop(self.create(tag)?);
        self.current_path(tag, 0)
    }

    /// Create (or truncate) member `index` of the fileset `tag`.
    pub fn create_member(&mut self, tag: &str, index: usize) -> Result<fs::File, ExecutionError> {
        let transform = self.transform;
        let workspace = self.workspace;
        let members = match self.declared(tag)? {
            Slot::Set(members) => members,
            Slot::One(_) => {
                return Err(ExecutionError::TagKind {
                    transform: transform.to_string(),
                    tag: Tag::from(tag),
                });
            }
        };
        while members.len() <= index {
            members.push(workspace.allocate(&Tag::from(tag)));
        }
        members[index]
            .stage()
            .map_err(|source| ExecutionError::File {
                transform: transform.to_string(),
                source,
            })
    }

    /// Write `contents` as the whole of member `index` of `tag`.
    pub fn write_member(
        &mut self,
        tag: &str,
        index: usize,
        contents: impl AsRef<[u8]>,
    ) -> Result<(), ExecutionError> {
        let mut handle = self.create_member(tag, index)?;
        handle
            .write_all(contents.as_ref())
            .and_then(|()| handle.flush())
            .map_err(|source| self.stage_error(tag, index, source))
    }

    /// Stage member `index` of `tag` empty and return its path.
    pub fn member_staged_path(
        &mut self,
        tag: &str,
        index: usize,
    ) -> Result<Utf8PathBuf, ExecutionError> {
        drop(self.create_member(tag, index)?);
        self.current_path(tag, index)
    }

    /// Hand the files back, with every undeclared tag the script tried.
    pub(crate) fn finish(self) -> (FileTable, TagSet) {
        (self.files, self.undeclared)
    }

    fn declared(&mut self, tag: &str) -> Result<&mut Slot<FileRef>, ExecutionError> {
        match self.files.get_mut(tag) {
            Some(slot) => Ok(slot),
            None => {
                self.undeclared.insert(Tag::from(tag));
                Err(ExecutionError::UndeclaredOutput {
                    transform: self.transform.to_string(),
                    tags: vec![Tag::from(tag)],
                })
            }
        }
    }

    fn staged_file(&self, tag: &str, index: usize) -> Option<&FileRef> {
        self.files.get(tag).and_then(|slot| slot.files().get(index))
    }

    fn current_path(&self, tag: &str, index: usize) -> Result<Utf8PathBuf, ExecutionError> {
        self.staged_file(tag, index)
            .and_then(FileRef::staged_path)
            .map(Utf8Path::to_path_buf)
            .ok_or_else(|| ExecutionError::OutputNotWritten {
                transform: self.transform.to_string(),
                tags: vec![Tag::from(tag)],
            })
    }

    fn stage_error(&self, tag: &str, index: usize, source: std::io::Error) -> ExecutionError {
        let path = self
            .staged_file(tag, index)
            .and_then(FileRef::staged_path)
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();
        ExecutionError::File {
            transform: self.transform.to_string(),
            source: FileRefError::Stage {
                tag: Tag::from(tag),
                path,
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bakery_types::tag_set;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let parent = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        let ws = Workspace::create(Some(&parent)).expect("workspace");
        (temp, ws)
    }

    #[test]
    fn inputs_track_what_was_read() {
        let (_temp, ws) = workspace();
        let path = ws.root().join("in.txt");
        std::fs::write(&path, "hello").unwrap();
        let a = FileRef::source(Tag::from("a"), path);
        let b = FileRef::source(Tag::from("b"), ws.root().join("unused.txt"));
        let view: InputView<'_> = [
            (Tag::from("a"), Slot::One(&a)),
            (Tag::from("b"), Slot::One(&b)),
        ]
        .into_iter()
        .collect();

        let inputs = InputFiles::new("reader", &view);
        assert_eq!(inputs.read_to_string("a").expect("read"), "hello");
        assert_eq!(inputs.unused(), vec![&Tag::from("b")]);
        assert!(inputs.contains("b"));
    }

    #[test]
    fn undeclared_input_is_refused() {
        let view = InputView::new();
        let inputs = InputFiles::new("reader", &view);
        let err = inputs.path("nope").unwrap_err();
        assert_eq!(err.kind(), "UndeclaredInputError");
    }

    #[test]
    fn outputs_stage_in_the_workspace() {
        let (_temp, ws) = workspace();
        let mut outputs = OutputFiles::new("writer", &ws, &tag_set(["y", "z"]));
        outputs.write("y", "payload").expect("write");
        assert!(outputs.is_written("y"));
        assert!(!outputs.is_written("z"));

        let path = outputs.staged_path("z").expect("staged path");
        assert!(path.starts_with(ws.root()));

        let (files, undeclared) = outputs.finish();
        assert!(undeclared.is_empty());
        let y = &files.get("y").expect("y").files()[0];
        assert_eq!(
            std::fs::read_to_string(y.staged_path().unwrap()).unwrap(),
            "payload"
        );
    }

    #[test]
    fn fileset_inputs_are_read_by_member() {
        let (_temp, ws) = workspace();
        let tag = Tag::fileset("pages");
        let members: Vec<FileRef> = ["one", "two"]
            .iter()
            .map(|text| {
                let path = ws.root().join(format!("{text}.txt"));
                std::fs::write(&path, text).unwrap();
                FileRef::source(tag.clone(), path)
            })
            .collect();
        let view: InputView<'_> = [(tag.clone(), Slot::Set(members.iter().collect()))]
            .into_iter()
            .collect();

        let inputs = InputFiles::new("pager", &view);
        assert_eq!(inputs.member_count("fileset::pages").expect("count"), 2);
        assert_eq!(
            inputs.read_member_to_string("fileset::pages", 1).expect("read"),
            "two"
        );
        assert_eq!(inputs.member_paths("fileset::pages").expect("paths").len(), 2);
        assert!(inputs.unused().is_empty());

        let err = inputs.member_path("fileset::pages", 2).unwrap_err();
        assert_eq!(err.kind(), "MissingMemberError");
        let err = inputs.read("fileset::pages").unwrap_err();
        assert_eq!(err.kind(), "TagKindError");
    }

    #[test]
    fn fileset_outputs_grow_by_member() {
        let (_temp, ws) = workspace();
        let mut outputs = OutputFiles::new("pager", &ws, &tag_set(["fileset::pages", "y"]));
        assert!(outputs.is_written("fileset::pages"));

        outputs.write_member("fileset::pages", 1, "second").expect("write");
        assert!(!outputs.is_written("fileset::pages"));
        let first = outputs
            .member_staged_path("fileset::pages", 0)
            .expect("staged path");
        assert!(first.starts_with(ws.root()));
        assert!(outputs.is_written("fileset::pages"));

        assert_eq!(
            outputs.write("fileset::pages", "x").unwrap_err().kind(),
            "TagKindError"
        );
        assert_eq!(
            outputs.write_member("y", 0, "x").unwrap_err().kind(),
            "TagKindError"
        );

        let (files, _) = outputs.finish();
        let pages = files.get("fileset::pages").expect("pages").files();
        assert_eq!(pages.len(), 2);
        assert_eq!(
            std::fs::read_to_string(pages[1].staged_path().unwrap()).unwrap(),
            "second"
        );
    }

    #[test]
    fn undeclared_output_is_remembered() {
        let (_temp, ws) = workspace();
        let mut outputs = OutputFiles::new("writer", &ws, &tag_set(["y"]));
        let err = outputs.write("rogue", "x").unwrap_err();
        assert_eq!(err.kind(), "UndeclaredOutputError");

        let (files, undeclared) = outputs.finish();
        assert_eq!(undeclared, tag_set(["rogue"]));
        assert_eq!(files.len(), 1);
    }
}
