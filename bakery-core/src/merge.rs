//! Fan-in composition: branches share inputs and write disjoint outputs.

use crate::error::{CompositionError, ExecutionError};
use crate::exec::{ExecScope, FileTable, InputView, discard_all, project};
use crate::transform::{Node, Transform, composite_name};
use bakery_types::{Tag, TagSet};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use tracing::{debug, warn};

/// Run `branches` against the same inputs and combine their outputs.
///
/// No two branches may declare the same output tag. Inputs and outputs are
/// the unions of the branches'. Branches run on up to
/// [`DriverSettings::parallelism`](crate::DriverSettings) threads, counted
/// across every merge in the run: a nested merge that finds no free thread
/// runs its branches on the thread that reached it.
pub fn merge<I>(branches: I) -> Result<Transform, CompositionError>
where
    I: IntoIterator<Item = Transform>,
{
    let branches: Vec<Transform> = branches.into_iter().collect();
    if branches.is_empty() {
        return Err(CompositionError::EmptyComposite { kind: "merge" });
    }

    let mut owners: BTreeMap<&Tag, usize> = BTreeMap::new();
    let mut inputs = TagSet::new();
    let mut outputs = TagSet::new();
    for (index, branch) in branches.iter().enumerate() {
        for tag in branch.output_tags() {
            if let Some(&first) = owners.get(tag) {
                return Err(CompositionError::OutputCollision {
                    tag: tag.clone(),
                    first,
                    first_name: branches[first].name().to_string(),
                    second: index,
                    second_name: branch.name().to_string(),
                });
            }
            owners.insert(tag, index);
        }
        inputs.extend(branch.input_tags().iter().cloned());
        outputs.extend(branch.output_tags().iter().cloned());
    }

    Ok(Transform::from_parts(
        composite_name("merge", &branches),
        inputs,
        outputs,
        Node::Merge(branches),
    ))
}

pub(crate) fn run_merge(
    transform: &Transform,
    branches: &[Transform],
    scope: &ExecScope<'_>,
    inputs: &InputView<'_>,
) -> Result<FileTable, ExecutionError> {
    let pool = BranchPool {
        branches,
        scope,
        inputs,
        cursor: AtomicUsize::new(0),
        failure: Mutex::new(None),
        finished: Mutex::new(Vec::new()),
    };

    thread::scope(|s| {
        let pool = &pool;
        let mut helpers = 0;
        for worker in 1..branches.len() {
            let Some(permit) = scope.permits.try_acquire() else {
                break;
            };
            let spawned = thread::Builder::new()
                .name(format!("bakery-merge-{worker}"))
                .spawn_scoped(s, move || {
                    let _permit = permit;
                    pool.work();
                });
            match spawned {
                Ok(_) => helpers += 1,
                Err(err) => warn!(worker, error = %err, "could not spawn merge worker"),
            }
        }
        debug!(
            transform = transform.name(),
            branches = branches.len(),
            helpers,
            "merge"
        );
        pool.work();
    });

    pool.into_result()
}

/// Branch queue shared by the merge workers.
struct BranchPool<'p, 'a> {
    branches: &'p [Transform],
    scope: &'p ExecScope<'a>,
    inputs: &'p InputView<'a>,
    cursor: AtomicUsize,
    failure: Mutex<Option<ExecutionError>>,
    finished: Mutex<Vec<FileTable>>,
}

impl BranchPool<'_, '_> {
    /// Pull branches until the queue is empty or a branch has failed.
    fn work(&self) {
        loop {
            if self.failed() {
                return;
            }
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(branch) = self.branches.get(index) else {
                return;
            };

            let view = project(self.inputs, branch.input_tags());
            match branch.execute(self.scope, &view) {
                Ok(files) => self
                    .finished
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(files),
                Err(err) => {
                    let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
                    if failure.is_none() {
                        debug!(branch = index, name = branch.name(), "merge branch failed");
                        *failure = Some(err);
                    }
                }
            }
        }
    }

    fn failed(&self) -> bool {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn into_result(self) -> Result<FileTable, ExecutionError> {
        let finished = self
            .finished
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        let failure = self
            .failure
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        let mut combined = FileTable::new();
        for files in finished {
            combined.extend(files);
        }
        match failure {
            Some(err) => {
                discard_all(&mut combined);
                Err(err)
            }
            None => Ok(combined),
        }
    }
}
