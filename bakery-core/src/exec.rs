//! Shared plumbing for executing a transform graph.

use bakery_stage::{FileRef, Workspace};
use bakery_types::{Tag, TagSet};
use std::collections::BTreeMap;
use std::slice;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::warn;

/// What one tag holds: a single file, or the members of a fileset.
#[derive(Debug, Clone)]
pub(crate) enum Slot<F> {
    One(F),
    Set(Vec<F>),
}

impl<F> Slot<F> {
    /// Every file in the slot, in member order.
    pub(crate) fn files(&self) -> &[F] {
        match self {
            Slot::One(file) => slice::from_ref(file),
            Slot::Set(files) => files,
        }
    }

    pub(crate) fn files_mut(&mut self) -> &mut [F] {
        match self {
            Slot::One(file) => slice::from_mut(file),
            Slot::Set(files) => files,
        }
    }

    pub(crate) fn into_files(self) -> Vec<F> {
        match self {
            Slot::One(file) => vec![file],
            Slot::Set(files) => files,
        }
    }
}

impl Slot<FileRef> {
    pub(crate) fn as_refs(&self) -> Slot<&FileRef> {
        match self {
            Slot::One(file) => Slot::One(file),
            Slot::Set(files) => Slot::Set(files.iter().collect()),
        }
    }
}

/// Files a transform produced, keyed by its output tags.
pub(crate) type FileTable = BTreeMap<Tag, Slot<FileRef>>;

/// Borrowed files a transform may read, keyed by tag.
pub(crate) type InputView<'a> = BTreeMap<Tag, Slot<&'a FileRef>>;

/// What every node of a running graph shares.
pub(crate) struct ExecScope<'a> {
    pub(crate) workspace: &'a Workspace,
    pub(crate) permits: Permits,
}

impl<'a> ExecScope<'a> {
    /// A scope allowing `workers` threads to run transforms at once, the
    /// calling thread included.
    pub(crate) fn new(workspace: &'a Workspace, workers: usize) -> Self {
        Self {
            workspace,
            permits: Permits::new(workers.saturating_sub(1)),
        }
    }
}

/// Helper threads a run may still start, counted across every merge in the
/// graph.
pub(crate) struct Permits {
    free: AtomicUsize,
}

impl Permits {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            free: AtomicUsize::new(count),
        }
    }

    /// Take a permit if one is free. It is returned when the guard drops.
    pub(crate) fn try_acquire(&self) -> Option<Permit<'_>> {
        self.free
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .ok()
            .map(|_| Permit { permits: self })
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.free.load(Ordering::SeqCst)
    }
}

pub(crate) struct Permit<'a> {
    permits: &'a Permits,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.permits.free.fetch_add(1, Ordering::SeqCst);
    }
}

/// The part of `view` covering `tags`. Missing tags are left out; the leaf
/// that needs them reports the gap.
pub(crate) fn project<'a>(view: &InputView<'a>, tags: &TagSet) -> InputView<'a> {
    tags.iter()
        .filter_map(|tag| view.get(tag).map(|slot| (tag.clone(), slot.clone())))
        .collect()
}

/// Discard every file in `table`, logging instead of failing.
///
/// Used on error paths where the original error is what the caller needs.
pub(crate) fn discard_all(table: &mut FileTable) {
    for slot in table.values_mut() {
        discard_slot(slot);
    }
}

pub(crate) fn discard_slot(slot: &mut Slot<FileRef>) {
    for file in slot.files_mut() {
        discard_quietly(file);
    }
}

pub(crate) fn discard_quietly(file: &mut FileRef) {
    if let Err(err) = file.discard() {
        warn!(tag = %file.tag(), error = %err, "could not discard staged file");
    }
}
