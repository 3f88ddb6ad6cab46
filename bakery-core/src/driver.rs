//! One run of a transform against concrete paths.

use crate::binding::PathBinding;
use crate::commit::commit_outputs;
use crate::error::{BakeError, Direction, ResolutionError};
use crate::exec::{ExecScope, FileTable, InputView, Slot};
use crate::leaf::check_readable;
use crate::settings::DriverSettings;
use crate::transform::Transform;
use bakery_stage::{FileRef, Workspace, parent_dir};
use bakery_types::{CommittedOutput, RunFailure, RunReport, RunState, Tag, TagSet};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use chrono::Utc;
use fs_err as fs;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Binds a transform's tags to paths and runs it with all-or-nothing
/// commits.
///
/// A context is good for exactly one [`run`](Self::run): it moves through
/// `Initialized → Resolving → Executing → Committing` and ends in
/// `Completed` or `RolledBack`. On `RolledBack` no output path has changed.
///
/// Plain tags bind to one path; `fileset::` tags bind to a list of paths
/// (see [`PathBinding`]).
#[derive(Debug)]
pub struct BakerDriverContext {
    settings: DriverSettings,
    inputs: BTreeMap<Tag, PathBinding>,
    outputs: BTreeMap<Tag, PathBinding>,
    state: RunState,
    run_id: Uuid,
    report: Option<RunReport>,
}

impl BakerDriverContext {
    pub fn new<I, O, A, B, C, D>(settings: DriverSettings, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        O: IntoIterator<Item = (C, D)>,
        A: Into<Tag>,
        B: Into<PathBinding>,
        C: Into<Tag>,
        D: Into<PathBinding>,
    {
        Self {
            settings,
            inputs: inputs
                .into_iter()
                .map(|(tag, path)| (tag.into(), path.into()))
                .collect(),
            outputs: outputs
                .into_iter()
                .map(|(tag, path)| (tag.into(), path.into()))
                .collect(),
            state: RunState::Initialized,
            run_id: Uuid::new_v4(),
            report: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn inputs(&self) -> &BTreeMap<Tag, PathBinding> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<Tag, PathBinding> {
        &self.outputs
    }

    /// Report of the run, once it has finished (either way).
    pub fn report(&self) -> Option<&RunReport> {
        self.report.as_ref()
    }

    /// Resolve, execute and commit `transform`.
    ///
    /// The per-run workspace is removed before this returns, whatever the
    /// outcome.
    pub fn run(&mut self, transform: &Transform) -> Result<RunReport, BakeError> {
        if self.state != RunState::Initialized {
            return Err(ResolutionError::ContextReused.into());
        }

        let span = info_span!("run", run_id = %self.run_id, transform = transform.name());
        let _entered = span.enter();
        let started = Instant::now();
        let mut report = RunReport::new(self.run_id.to_string(), transform.name());
        info!("starting run");

        let outcome = match self.drive(transform) {
            Ok(committed) => {
                self.enter(RunState::Completed);
                info!(outputs = committed.len(), "run completed");
                report.outputs = committed;
                Ok(())
            }
            Err(err) => {
                self.enter(RunState::RolledBack);
                warn!(error = %err, "run rolled back");
                report.error = Some(RunFailure {
                    category: err.category().to_string(),
                    kind: err.kind().to_string(),
                    message: err.to_string(),
                });
                Err(err)
            }
        };

        report.state = self.state;
        report.ended_at = Some(Utc::now());
        report.duration_ms = Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        self.report = Some(report.clone());
        outcome.map(|()| report)
    }

    fn drive(&mut self, transform: &Transform) -> Result<Vec<CommittedOutput>, BakeError> {
        self.enter(RunState::Resolving);
        let sources = self.resolve(transform)?;
        let workspace = Workspace::create(self.settings.workspace_dir.as_deref())
            .map_err(ResolutionError::from)?;

        let result = self.execute_and_commit(transform, &sources, &workspace);

        if let Err(err) = workspace.close() {
            warn!(error = %err, "could not remove run workspace");
        }
        result
    }

    fn execute_and_commit(
        &mut self,
        transform: &Transform,
        sources: &FileTable,
        workspace: &Workspace,
    ) -> Result<Vec<CommittedOutput>, BakeError> {
        self.enter(RunState::Executing);
        let view: InputView<'_> = sources
            .iter()
            .map(|(tag, slot)| (tag.clone(), slot.as_refs()))
            .collect();
        let scope = ExecScope::new(workspace, self.settings.workers());
        let produced = transform.execute(&scope, &view)?;

        self.enter(RunState::Committing);
        Ok(commit_outputs(produced, &self.outputs)?)
    }

    /// Check the bindings and build the source files, before any I/O that
    /// writes.
    fn resolve(&self, transform: &Transform) -> Result<FileTable, ResolutionError> {
        check_binding(transform, Direction::Input, transform.input_tags(), &self.inputs)?;
        check_binding(
            transform,
            Direction::Output,
            transform.output_tags(),
            &self.outputs,
        )?;
        check_kinds(Direction::Input, &self.inputs)?;
        check_kinds(Direction::Output, &self.outputs)?;

        let mut input_ids: BTreeMap<PathBuf, &Tag> = BTreeMap::new();
        for (tag, path) in bound_paths(&self.inputs) {
            check_readable(path).map_err(|source| ResolutionError::MissingInputPath {
                tag: tag.clone(),
                path: path.clone(),
                source,
            })?;
            input_ids.insert(identity(path), tag);
        }

        let mut output_ids: BTreeMap<PathBuf, &Tag> = BTreeMap::new();
        for (tag, path) in bound_paths(&self.outputs) {
            let id = identity(path);
            if let Some(input) = input_ids.get(&id) {
                return Err(ResolutionError::CircularPath {
                    input: (*input).clone(),
                    output: tag.clone(),
                    path: path.clone(),
                });
            }
            if let Some(first) = output_ids.get(&id) {
                return Err(ResolutionError::DuplicateOutputPath {
                    first: (*first).clone(),
                    second: tag.clone(),
                    path: path.clone(),
                });
            }
            if !self.settings.overwrite && fs::symlink_metadata(path).is_ok() {
                return Err(ResolutionError::OutputExists {
                    tag: tag.clone(),
                    path: path.clone(),
                });
            }
            output_ids.insert(id, tag);
        }

        Ok(self
            .inputs
            .iter()
            .map(|(tag, binding)| {
                let source = |path: &Utf8PathBuf| FileRef::source(tag.clone(), path.clone());
                let slot = match binding {
                    PathBinding::File(path) => Slot::One(source(path)),
                    PathBinding::Set(paths) => Slot::Set(paths.iter().map(source).collect()),
                };
                (tag.clone(), slot)
            })
            .collect())
    }

    fn enter(&mut self, state: RunState) {
        debug!(from = %self.state, to = %state, "state");
        self.state = state;
    }
}

fn check_binding(
    transform: &Transform,
    direction: Direction,
    declared: &TagSet,
    supplied: &BTreeMap<Tag, PathBinding>,
) -> Result<(), ResolutionError> {
    let missing: Vec<Tag> = declared
        .iter()
        .filter(|tag| !supplied.contains_key(*tag))
        .cloned()
        .collect();
    let unexpected: Vec<Tag> = supplied
        .keys()
        .filter(|tag| !declared.contains(*tag))
        .cloned()
        .collect();
    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }
    Err(ResolutionError::TagBinding {
        transform: transform.name().to_string(),
        direction,
        missing,
        unexpected,
    })
}

/// Fileset tags take a list of paths; every other tag takes one.
fn check_kinds(
    direction: Direction,
    supplied: &BTreeMap<Tag, PathBinding>,
) -> Result<(), ResolutionError> {
    match supplied
        .iter()
        .find(|(tag, binding)| tag.is_fileset() != binding.is_set())
    {
        Some((tag, _)) => Err(ResolutionError::FilesetBinding {
            tag: tag.clone(),
            direction,
            fileset: tag.is_fileset(),
        }),
        None => Ok(()),
    }
}

/// Every `(tag, path)` pair, fileset members included.
fn bound_paths(
    bindings: &BTreeMap<Tag, PathBinding>,
) -> impl Iterator<Item = (&Tag, &Utf8PathBuf)> {
    bindings
        .iter()
        .flat_map(|(tag, binding)| binding.paths().iter().map(move |path| (tag, path)))
}

/// A comparable name for the file `path` refers to, whether or not it exists.
///
/// Existing files are canonicalized. Otherwise `.` and `..` are resolved
/// lexically and the nearest existing parent is canonicalized.
fn identity(path: &Utf8Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }
    let normal = lexically_normal(path);
    match normal.file_name() {
        Some(name) => fs::canonicalize(parent_dir(&normal))
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| normal.clone().into_std_path_buf()),
        None => normal.into_std_path_buf(),
    }
}

fn lexically_normal(path: &Utf8Path) -> Utf8PathBuf {
    let absolute = std::path::absolute(path)
        .ok()
        .and_then(|absolute| Utf8PathBuf::from_path_buf(absolute).ok())
        .unwrap_or_else(|| path.to_path_buf());
    let mut normal = Utf8PathBuf::new();
    for component in absolute.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other.as_str()),
        }
    }
    normal
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, Utf8PathBuf) {
        let temp = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        (temp, root)
    }

    fn copy() -> Transform {
        Transform::from_fn("copy", ["x"], ["y"], |inputs, outputs| {
            outputs.write("y", inputs.read("x")?)?;
            Ok(())
        })
        .expect("valid leaf")
    }

    fn context(root: &Utf8Path, settings: DriverSettings) -> BakerDriverContext {
        BakerDriverContext::new(
            settings.with_workspace_dir(root.join("ws")),
            [("x", root.join("in.txt"))],
            [("y", root.join("out.txt"))],
        )
    }

    #[test]
    fn completed_run_reports_outputs() {
        let (_temp, root) = sandbox();
        std::fs::write(root.join("in.txt"), "data").unwrap();
        let mut ctx = context(&root, DriverSettings::default());
        assert_eq!(ctx.state(), RunState::Initialized);

        let report = ctx.run(&copy()).expect("run");
        assert_eq!(ctx.state(), RunState::Completed);
        assert!(report.succeeded());
        assert_eq!(report.run_id, ctx.run_id().to_string());
        assert_eq!(report.outputs.len(), 1);
        assert_eq!(report.outputs[0].bytes, 4);
        assert!(report.duration_ms.is_some());
        assert_eq!(std::fs::read_to_string(root.join("out.txt")).unwrap(), "data");
        assert!(std::fs::read_dir(root.join("ws")).unwrap().next().is_none());
    }

    #[test]
    fn context_runs_once() {
        let (_temp, root) = sandbox();
        std::fs::write(root.join("in.txt"), "data").unwrap();
        let mut ctx = context(&root, DriverSettings::default());
        ctx.run(&copy()).expect("first run");

        let err = ctx.run(&copy()).unwrap_err();
        assert_eq!(err.kind(), "ContextReusedError");
        assert_eq!(ctx.state(), RunState::Completed);
    }

    #[test]
    fn missing_input_path_rolls_back() {
        let (_temp, root) = sandbox();
        let mut ctx = context(&root, DriverSettings::default());

        let err = ctx.run(&copy()).unwrap_err();
        assert_eq!(err.kind(), "MissingInputPathError");
        assert_eq!(err.exit_code(), 2);
        assert_eq!(ctx.state(), RunState::RolledBack);
        let report = ctx.report().expect("report");
        assert_eq!(report.state, RunState::RolledBack);
        assert_eq!(report.error.as_ref().unwrap().category, "resolution");
    }

    #[test]
    fn tag_sets_must_match() {
        let (_temp, root) = sandbox();
        std::fs::write(root.join("in.txt"), "data").unwrap();
        let mut ctx = BakerDriverContext::new(
            DriverSettings::default(),
            [("x", root.join("in.txt")), ("faux", root.join("in.txt"))],
            [("y", root.join("out.txt"))],
        );

        let err = ctx.run(&copy()).unwrap_err();
        match err {
            BakeError::Resolution(ResolutionError::TagBinding {
                direction,
                missing,
                unexpected,
                ..
            }) => {
                assert_eq!(direction, Direction::Input);
                assert!(missing.is_empty());
                assert_eq!(unexpected, vec![Tag::from("faux")]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn output_may_not_overwrite_input() {
        let (_temp, root) = sandbox();
        std::fs::write(root.join("in.txt"), "data").unwrap();
        let mut ctx = BakerDriverContext::new(
            DriverSettings::default().with_overwrite(true),
            [("x", root.join("in.txt"))],
            [("y", root.join(".").join("in.txt"))],
        );

        let err = ctx.run(&copy()).unwrap_err();
        assert_eq!(err.kind(), "CircularPathError");
        assert_eq!(std::fs::read_to_string(root.join("in.txt")).unwrap(), "data");
    }

    #[test]
    fn outputs_may_not_share_a_path() {
        let (_temp, root) = sandbox();
        std::fs::write(root.join("in.txt"), "data").unwrap();
        let fanout = Transform::from_fn("fanout", ["x"], ["a", "b"], |_, outputs| {
            outputs.write("a", "1")?;
            outputs.write("b", "2")?;
            Ok(())
        })
        .unwrap();
        let mut ctx = BakerDriverContext::new(
            DriverSettings::default(),
            [("x", root.join("in.txt"))],
            [("a", root.join("same.txt")), ("b", root.join("same.txt"))],
        );

        let err = ctx.run(&fanout).unwrap_err();
        assert_eq!(err.kind(), "DuplicateOutputPathError");
    }

    #[test]
    fn existing_output_needs_overwrite() {
        let (_temp, root) = sandbox();
        std::fs::write(root.join("in.txt"), "new").unwrap();
        std::fs::write(root.join("out.txt"), "old").unwrap();

        let mut refused = context(&root, DriverSettings::default());
        let err = refused.run(&copy()).unwrap_err();
        assert_eq!(err.kind(), "OutputExistsError");
        assert_eq!(std::fs::read_to_string(root.join("out.txt")).unwrap(), "old");

        let mut allowed = context(&root, DriverSettings::default().with_overwrite(true));
        allowed.run(&copy()).expect("overwrite run");
        assert_eq!(std::fs::read_to_string(root.join("out.txt")).unwrap(), "new");
    }

    #[test]
    fn dot_dot_through_a_missing_directory_is_the_same_output() {
        let (_temp, root) = sandbox();
        std::fs::write(root.join("in.txt"), "data").unwrap();
        let fanout = Transform::from_fn("fanout", ["x"], ["a", "b"], |_, outputs| {
            outputs.write("a", "1")?;
            outputs.write("b", "2")?;
            Ok(())
        })
        .unwrap();
        let mut ctx = BakerDriverContext::new(
            DriverSettings::default(),
            [("x", root.join("in.txt"))],
            [
                ("a", root.join("a").join("..").join("b").join("x.txt")),
                ("b", root.join("b").join("x.txt")),
            ],
        );

        let err = ctx.run(&fanout).unwrap_err();
        assert_eq!(err.kind(), "DuplicateOutputPathError");
        assert!(!root.join("b").exists());
    }

    #[test]
    fn lexical_normalization_drops_dots() {
        assert_eq!(
            lexically_normal(Utf8Path::new("/data/./a/../b/x.txt")),
            Utf8PathBuf::from("/data/b/x.txt")
        );
    }

    #[test]
    fn fileset_tags_need_path_lists() {
        let (_temp, root) = sandbox();
        std::fs::write(root.join("in.txt"), "data").unwrap();
        let pager = Transform::from_fn("pager", ["fileset::pages"], ["y"], |_, outputs| {
            outputs.write("y", "")?;
            Ok(())
        })
        .unwrap();
        let mut ctx = BakerDriverContext::new(
            DriverSettings::default(),
            [("fileset::pages", root.join("in.txt"))],
            [("y", root.join("out.txt"))],
        );

        let err = ctx.run(&pager).unwrap_err();
        match err {
            BakeError::Resolution(ResolutionError::FilesetBinding {
                tag,
                direction,
                fileset,
            }) => {
                assert_eq!(tag, Tag::fileset("pages"));
                assert_eq!(direction, Direction::Input);
                assert!(fileset);
            }
            other => panic!("unexpected error: {other}"),
        }

        let mut listed = BakerDriverContext::new(
            DriverSettings::default(),
            [("x", vec![root.join("in.txt")])],
            [("y", root.join("out.txt"))],
        );
        let err = listed.run(&copy()).unwrap_err();
        assert_eq!(err.kind(), "FilesetBindingError");
    }

    #[test]
    fn fileset_members_may_not_share_a_path() {
        let (_temp, root) = sandbox();
        std::fs::write(root.join("in.txt"), "data").unwrap();
        let split = Transform::from_fn("split", ["x"], ["fileset::parts"], |_, outputs| {
            outputs.write_member("fileset::parts", 0, "1")?;
            outputs.write_member("fileset::parts", 1, "2")?;
            Ok(())
        })
        .unwrap();
        let mut ctx = BakerDriverContext::new(
            DriverSettings::default(),
            [("x", root.join("in.txt"))],
            [(
                "fileset::parts",
                vec![root.join("part.txt"), root.join("part.txt")],
            )],
        );

        let err = ctx.run(&split).unwrap_err();
        assert_eq!(err.kind(), "DuplicateOutputPathError");
    }

    #[test]
    fn bare_file_names_resolve_against_cwd() {
        let id = identity(Utf8Path::new("definitely-not-here.txt"));
        assert!(id.is_absolute());
        assert!(id.ends_with("definitely-not-here.txt"));
    }
}
