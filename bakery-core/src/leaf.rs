//! Running a single script against staged files.

use crate::error::ExecutionError;
use crate::exec::{ExecScope, FileTable, InputView, Slot, discard_all};
use crate::files::{InputFiles, OutputFiles};
use crate::transform::Transform;
use bakery_stage::FileRef;
use bakery_types::Tag;
use camino::Utf8Path;
use fs_err as fs;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// The body of a leaf transform.
///
/// `run` reads from `inputs` and must write every declared output in
/// `outputs` before returning `Ok`. Returning an error (or panicking) fails
/// the run; whatever the script staged is discarded.
pub trait Script: Send + Sync {
    fn run(&self, inputs: &InputFiles<'_>, outputs: &mut OutputFiles<'_>) -> anyhow::Result<()>;
}

pub(crate) struct FnScript<F>(pub(crate) F);

impl<F> Script for FnScript<F>
where
    F: Fn(&InputFiles<'_>, &mut OutputFiles<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn run(&self, inputs: &InputFiles<'_>, outputs: &mut OutputFiles<'_>) -> anyhow::Result<()> {
        (self.0)(inputs, outputs)
    }
}

pub(crate) fn run_leaf(
    transform: &Transform,
    script: &dyn Script,
    scope: &ExecScope<'_>,
    inputs: &InputView<'_>,
) -> Result<FileTable, ExecutionError> {
    let name = transform.name();
    let view = check_inputs(transform, inputs)?;
    let input_files = InputFiles::new(name, &view);
    let mut output_files = OutputFiles::new(name, scope.workspace, transform.output_tags());

    debug!(transform = name, "running script");
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        script.run(&input_files, &mut output_files)
    }))
    .unwrap_or_else(|payload| Err(anyhow::anyhow!("panicked: {}", panic_message(&*payload))));

    for tag in input_files.unused() {
        warn!(transform = name, tag = %tag, "input was declared but never read");
    }

    let (mut files, undeclared) = output_files.finish();
    if !undeclared.is_empty() {
        discard_all(&mut files);
        return Err(ExecutionError::UndeclaredOutput {
            transform: name.to_string(),
            tags: undeclared.into_iter().collect(),
        });
    }
    if let Err(source) = result {
        discard_all(&mut files);
        return Err(ExecutionError::ScriptFailed {
            transform: name.to_string(),
            inputs: transform.input_tags().iter().cloned().collect(),
            outputs: transform.output_tags().iter().cloned().collect(),
            source,
        });
    }

    let missing: Vec<Tag> = files
        .iter()
        .filter(|(_, slot)| !slot.files().iter().all(FileRef::is_staged))
        .map(|(tag, _)| tag.clone())
        .collect();
    if !missing.is_empty() {
        discard_all(&mut files);
        return Err(ExecutionError::OutputNotWritten {
            transform: name.to_string(),
            tags: missing,
        });
    }

    Ok(files)
}

/// Every declared input is present and readable, each fileset member
/// included.
fn check_inputs<'a>(
    transform: &Transform,
    inputs: &InputView<'a>,
) -> Result<InputView<'a>, ExecutionError> {
    let mut view = InputView::new();
    for tag in transform.input_tags() {
        let slot: &Slot<&FileRef> = inputs
            .get(tag)
            .ok_or_else(|| missing_input(transform, tag))?;
        for file in slot.files() {
            let path = file
                .readable_path()
                .ok_or_else(|| missing_input(transform, tag))?;
            check_readable(path).map_err(|source| ExecutionError::UnreadableInput {
                transform: transform.name().to_string(),
                tag: tag.clone(),
                path: path.to_path_buf(),
                source,
            })?;
        }
        view.insert(tag.clone(), slot.clone());
    }
    Ok(view)
}

fn missing_input(transform: &Transform, tag: &Tag) -> ExecutionError {
    ExecutionError::MissingInput {
        transform: transform.name().to_string(),
        tag: tag.clone(),
    }
}

pub(crate) fn check_readable(path: &Utf8Path) -> io::Result<()> {
    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    fs::File::open(path.as_std_path()).map(drop)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bakery_stage::Workspace;
    use camino::Utf8PathBuf;

    struct Sandbox {
        _temp: tempfile::TempDir,
        root: Utf8PathBuf,
        workspace: Workspace,
    }

    fn sandbox() -> Sandbox {
        let temp = tempfile::TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
        let workspace = Workspace::create(Some(&root)).expect("workspace");
        Sandbox {
            _temp: temp,
            root,
            workspace,
        }
    }

    fn run(
        sandbox: &Sandbox,
        transform: &Transform,
        sources: &[(&str, &str)],
    ) -> Result<FileTable, ExecutionError> {
        let files: Vec<FileRef> = sources
            .iter()
            .map(|(tag, contents)| {
                let path = sandbox.root.join(format!("{tag}.src"));
                std::fs::write(&path, contents).expect("write source");
                FileRef::source(Tag::from(*tag), path)
            })
            .collect();
        let view: InputView<'_> = files
            .iter()
            .map(|f| (f.tag().clone(), Slot::One(f)))
            .collect();
        let scope = ExecScope::new(&sandbox.workspace, 1);
        transform.execute(&scope, &view)
    }

    fn staged_files(sandbox: &Sandbox) -> usize {
        std::fs::read_dir(sandbox.workspace.root()).unwrap().count()
    }

    #[test]
    fn writes_declared_outputs() {
        let sandbox = sandbox();
        let upper = Transform::from_fn("upper", ["x"], ["y"], |inputs, outputs| {
            let text = inputs.read_to_string("x")?;
            outputs.write("y", text.to_uppercase())?;
            Ok(())
        })
        .unwrap();

        let files = run(&sandbox, &upper, &[("x", "hello")]).expect("run");
        let Some(Slot::One(y)) = files.get("y") else {
            panic!("expected a single file for y");
        };
        assert!(y.is_staged());
        assert_eq!(std::fs::read_to_string(y.readable_path().unwrap()).unwrap(), "HELLO");
    }

    #[test]
    fn unwritten_output_fails_and_discards_the_rest() {
        let sandbox = sandbox();
        let half = Transform::from_fn("half", ["x"], ["y", "z"], |inputs, outputs| {
            inputs.path("x")?;
            outputs.write("y", "only one")?;
            Ok(())
        })
        .unwrap();

        let err = run(&sandbox, &half, &[("x", "")]).unwrap_err();
        match err {
            ExecutionError::OutputNotWritten { transform, tags } => {
                assert_eq!(transform, "half");
                assert_eq!(tags, vec![Tag::from("z")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(staged_files(&sandbox), 0);
    }

    #[test]
    fn swallowed_undeclared_write_still_fails() {
        let sandbox = sandbox();
        let sneaky = Transform::from_fn("sneaky", ["x"], ["y"], |_, outputs| {
            let _ = outputs.write("elsewhere", "x");
            outputs.write("y", "fine")?;
            Ok(())
        })
        .unwrap();

        let err = run(&sandbox, &sneaky, &[("x", "")]).unwrap_err();
        assert_eq!(err.kind(), "UndeclaredOutputError");
        assert_eq!(staged_files(&sandbox), 0);
    }

    #[test]
    fn script_error_carries_tag_context() {
        let sandbox = sandbox();
        let failing = Transform::from_fn("failing", ["x"], ["y"], |_, outputs| {
            outputs.write("y", "partial")?;
            anyhow::bail!("boom")
        })
        .unwrap();

        let err = run(&sandbox, &failing, &[("x", "")]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "failing (inputs [x], outputs [y]) failed: boom"
        );
        assert_eq!(staged_files(&sandbox), 0);
    }

    #[test]
    fn panics_become_script_failures() {
        let sandbox = sandbox();
        let panicking = Transform::from_fn("panicking", ["x"], ["y"], |_, _| {
            panic!("kaboom");
        })
        .unwrap();

        let err = run(&sandbox, &panicking, &[("x", "")]).unwrap_err();
        assert_eq!(err.kind(), "ScriptError");
        assert!(err.to_string().contains("panicked: kaboom"));
    }

    #[test]
    fn missing_input_is_reported_before_running() {
        let sandbox = sandbox();
        let reader = Transform::from_fn("reader", ["x"], ["y"], |_, _| {
            panic!("must not run");
        })
        .unwrap();

        let err = run(&sandbox, &reader, &[]).unwrap_err();
        assert_eq!(err.kind(), "MissingInputError");
    }

    #[test]
    fn directory_input_is_unreadable() {
        let sandbox = sandbox();
        let dir = sandbox.root.join("a-dir");
        std::fs::create_dir(&dir).unwrap();
        let source = FileRef::source(Tag::from("x"), dir);
        let view: InputView<'_> = [(Tag::from("x"), Slot::One(&source))].into_iter().collect();
        let reader = Transform::from_fn("reader", ["x"], ["y"], |_, outputs| {
            outputs.write("y", "")?;
            Ok(())
        })
        .unwrap();

        let scope = ExecScope::new(&sandbox.workspace, 1);
        let err = reader.execute(&scope, &view).unwrap_err();
        assert_eq!(err.kind(), "UnreadableInputError");
    }

    #[test]
    fn fileset_leaf_writes_one_member_per_input_member() {
        let sandbox = sandbox();
        let members: Vec<FileRef> = ["a", "b", "c"]
            .iter()
            .map(|text| {
                let path = sandbox.root.join(format!("{text}.src"));
                std::fs::write(&path, text).expect("write source");
                FileRef::source(Tag::fileset("pages"), path)
            })
            .collect();
        let view: InputView<'_> = [(Tag::fileset("pages"), Slot::Set(members.iter().collect()))]
            .into_iter()
            .collect();
        let upper = Transform::from_fn(
            "upper-pages",
            ["fileset::pages"],
            ["fileset::loud"],
            |inputs, outputs| {
                for index in 0..inputs.member_count("fileset::pages")? {
                    let text = inputs.read_member_to_string("fileset::pages", index)?;
                    outputs.write_member("fileset::loud", index, text.to_uppercase())?;
                }
                Ok(())
            },
        )
        .unwrap();

        let scope = ExecScope::new(&sandbox.workspace, 1);
        let files = upper.execute(&scope, &view).expect("run");
        let Some(Slot::Set(loud)) = files.get("fileset::loud") else {
            panic!("expected a fileset for loud");
        };
        let written: Vec<String> = loud
            .iter()
            .map(|file| std::fs::read_to_string(file.readable_path().unwrap()).unwrap())
            .collect();
        assert_eq!(written, vec!["A", "B", "C"]);
    }

    #[test]
    fn gap_in_fileset_output_fails() {
        let sandbox = sandbox();
        let gappy = Transform::from_fn("gappy", ["x"], ["fileset::out"], |inputs, outputs| {
            inputs.path("x")?;
            outputs.write_member("fileset::out", 1, "second only")?;
            Ok(())
        })
        .unwrap();

        let err = run(&sandbox, &gappy, &[("x", "")]).unwrap_err();
        match err {
            ExecutionError::OutputNotWritten { tags, .. } => {
                assert_eq!(tags, vec![Tag::fileset("out")]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(staged_files(&sandbox), 0);
    }
}
