//! Linear composition: stage outputs feed later stages.

use crate::error::{CompositionError, Direction, ExecutionError};
use crate::exec::{ExecScope, FileTable, InputView, discard_all, discard_slot, project};
use crate::transform::{Node, Transform, composite_name, declared_tags};
use bakery_types::{Tag, TagSet};
use tracing::debug;

/// Chain `stages` so each one can read what earlier ones wrote.
///
/// The composite reads the first stage's inputs plus any later input no
/// earlier stage produces, and exposes every output no later stage consumes
/// together with the last stage's outputs.
///
/// ```
/// use bakery_core::{Transform, sequence};
///
/// let upper = Transform::from_fn("upper", ["x"], ["y"], |i, o| {
///     o.write("y", i.read_to_string("x")?.to_uppercase())?;
///     Ok(())
/// })?;
/// let exclaim = Transform::from_fn("exclaim", ["y"], ["z"], |i, o| {
///     o.write("z", format!("{}!", i.read_to_string("y")?))?;
///     Ok(())
/// })?;
/// let shout = sequence([upper, exclaim])?;
/// assert_eq!(shout.name(), "sequence[upper, exclaim]");
/// assert!(shout.input_tags().contains("x"));
/// assert!(shout.output_tags().contains("z"));
/// assert!(!shout.output_tags().contains("y"));
/// # Ok::<(), bakery_core::CompositionError>(())
/// ```
pub fn sequence<I>(stages: I) -> Result<Transform, CompositionError>
where
    I: IntoIterator<Item = Transform>,
{
    let stages = non_empty(stages)?;
    let mut inputs = TagSet::new();
    let mut produced = TagSet::new();
    for stage in &stages {
        inputs.extend(stage.input_tags().difference(&produced).cloned());
        produced.extend(stage.output_tags().iter().cloned());
    }
    Ok(build(stages, inputs))
}

/// Like [`sequence`], but the composite's inputs are exactly `declared`.
///
/// Every stage input must come from `declared` or an earlier stage
/// ([`CompositionError::UnresolvedInput`]), and every declared input must be
/// read by some stage ([`CompositionError::UnusedInput`]).
pub fn sequence_with_inputs<D, I>(declared: D, stages: I) -> Result<Transform, CompositionError>
where
    D: IntoIterator,
    D::Item: Into<Tag>,
    I: IntoIterator<Item = Transform>,
{
    let stages = non_empty(stages)?;
    let declared = declared_tags(
        &composite_name("sequence", &stages),
        Direction::Input,
        declared,
    )?;

    let mut produced = TagSet::new();
    let mut read = TagSet::new();
    for (index, stage) in stages.iter().enumerate() {
        for tag in stage.input_tags() {
            if produced.contains(tag) {
                continue;
            }
            if !declared.contains(tag) {
                return Err(CompositionError::UnresolvedInput {
                    tag: tag.clone(),
                    stage: index,
                    transform: stage.name().to_string(),
                });
            }
            read.insert(tag.clone());
        }
        produced.extend(stage.output_tags().iter().cloned());
    }

    let unused: Vec<Tag> = declared.difference(&read).cloned().collect();
    if !unused.is_empty() {
        return Err(CompositionError::UnusedInput { tags: unused });
    }
    Ok(build(stages, declared))
}

fn non_empty<I>(stages: I) -> Result<Vec<Transform>, CompositionError>
where
    I: IntoIterator<Item = Transform>,
{
    let stages: Vec<Transform> = stages.into_iter().collect();
    if stages.is_empty() {
        return Err(CompositionError::EmptyComposite { kind: "sequence" });
    }
    Ok(stages)
}

fn build(stages: Vec<Transform>, inputs: TagSet) -> Transform {
    let last = stages.len() - 1;
    let mut outputs = TagSet::new();
    for (index, stage) in stages.iter().enumerate() {
        for tag in stage.output_tags() {
            let consumed_later = stages[index + 1..]
                .iter()
                .any(|later| later.input_tags().contains(tag));
            if index == last || !consumed_later {
                outputs.insert(tag.clone());
            }
        }
    }
    Transform::from_parts(
        composite_name("sequence", &stages),
        inputs,
        outputs,
        Node::Sequence(stages),
    )
}

pub(crate) fn run_sequence(
    transform: &Transform,
    stages: &[Transform],
    scope: &ExecScope<'_>,
    inputs: &InputView<'_>,
) -> Result<FileTable, ExecutionError> {
    let mut produced = FileTable::new();
    for (index, stage) in stages.iter().enumerate() {
        debug!(stage = index, name = stage.name(), "sequence stage");
        let result = {
            let mut view = project(inputs, stage.input_tags());
            for tag in stage.input_tags() {
                if let Some(slot) = produced.get(tag) {
                    view.insert(tag.clone(), slot.as_refs());
                }
            }
            stage.execute(scope, &view)
        };

        match result {
            Ok(files) => {
                for (tag, slot) in files {
                    if let Some(mut replaced) = produced.insert(tag, slot) {
                        discard_slot(&mut replaced);
                    }
                }
            }
            Err(err) => {
                discard_all(&mut produced);
                return Err(err);
            }
        }
    }

    let mut outputs = FileTable::new();
    for (tag, mut slot) in produced {
        if transform.output_tags().contains(&tag) {
            outputs.insert(tag, slot);
        } else {
            discard_slot(&mut slot);
        }
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bakery_types::tag_set;

    fn noop(name: &str, inputs: &[&str], outputs: &[&str]) -> Transform {
        Transform::from_fn(name, inputs.iter().copied(), outputs.iter().copied(), |_, _| {
            Ok(())
        })
        .expect("valid leaf")
    }

    #[test]
    fn chains_outputs_into_inputs() {
        let seq = sequence([noop("a", &["x"], &["y"]), noop("b", &["y"], &["z"])]).unwrap();
        assert_eq!(seq.input_tags(), &tag_set(["x"]));
        assert_eq!(seq.output_tags(), &tag_set(["z"]));
        assert_eq!(seq.kind(), "sequence");
    }

    #[test]
    fn later_inputs_pass_through() {
        let seq = sequence([noop("a", &["x"], &["y"]), noop("b", &["y", "w"], &["z"])]).unwrap();
        assert_eq!(seq.input_tags(), &tag_set(["w", "x"]));
    }

    #[test]
    fn unconsumed_intermediate_outputs_are_exposed() {
        let seq = sequence([
            noop("a", &["x"], &["y", "log"]),
            noop("b", &["y"], &["z"]),
        ])
        .unwrap();
        assert_eq!(seq.output_tags(), &tag_set(["log", "z"]));
    }

    #[test]
    fn empty_sequence_is_rejected() {
        let err = sequence(Vec::new()).unwrap_err();
        assert!(matches!(
            err,
            CompositionError::EmptyComposite { kind: "sequence" }
        ));
    }

    #[test]
    fn strict_form_reports_unresolved_input() {
        let err = sequence_with_inputs(
            ["x"],
            [noop("a", &["x"], &["y"]), noop("b", &["q"], &["z"])],
        )
        .unwrap_err();
        match err {
            CompositionError::UnresolvedInput {
                tag,
                stage,
                transform,
            } => {
                assert_eq!(tag, Tag::from("q"));
                assert_eq!(stage, 1);
                assert_eq!(transform, "b");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn strict_form_reports_unused_declared_input() {
        let err = sequence_with_inputs(["x", "extra"], [noop("a", &["x"], &["y"])]).unwrap_err();
        assert!(matches!(err, CompositionError::UnusedInput { ref tags } if tags == &[Tag::from("extra")]));
    }

    #[test]
    fn strict_form_accepts_exact_inputs() {
        let seq = sequence_with_inputs(
            ["x", "w"],
            [noop("a", &["x"], &["y"]), noop("b", &["y", "w"], &["z"])],
        )
        .unwrap();
        assert_eq!(seq.input_tags(), &tag_set(["w", "x"]));
    }

    #[test]
    fn validation_is_repeatable() {
        let a = noop("a", &["x"], &["y"]);
        let b = noop("b", &["q"], &["z"]);
        let first = sequence_with_inputs(["x"], [a.clone(), b.clone()]).unwrap_err();
        let second = sequence_with_inputs(["x"], [a, b]).unwrap_err();
        assert_eq!(first.to_string(), second.to_string());
    }
}
