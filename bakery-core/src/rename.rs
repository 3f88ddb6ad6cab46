//! `map_tags`: expose a transform under different tag names.

use crate::error::{CompositionError, Direction, ExecutionError, MappingProblem};
use crate::exec::{ExecScope, FileTable, InputView};
use crate::transform::{Node, Transform};
use bakery_types::{Tag, TagSet};
use std::collections::BTreeMap;

#[derive(Clone)]
pub(crate) struct Renamed {
    pub(crate) base: Transform,
    /// Wrapped tag → exposed tag.
    pub(crate) input_mapping: BTreeMap<Tag, Tag>,
    /// Wrapped tag → exposed tag.
    pub(crate) output_mapping: BTreeMap<Tag, Tag>,
}

/// Wrap `transform` so its tags are renamed.
///
/// Each mapping goes from the wrapped transform's tag to the exposed one and
/// must cover exactly the wrapped tags of that direction, one-to-one.
/// Anything else fails with [`CompositionError::TagMapping`].
///
/// ```
/// use bakery_core::{Transform, map_tags};
///
/// let upper = Transform::from_fn("upper", ["x"], ["y"], |i, o| {
///     o.write("y", i.read_to_string("x")?.to_uppercase())?;
///     Ok(())
/// })?;
/// let renamed = map_tags(upper, [("x", "source")], [("y", "loud")])?;
/// assert!(renamed.input_tags().contains("source"));
/// assert!(renamed.output_tags().contains("loud"));
/// # Ok::<(), bakery_core::CompositionError>(())
/// ```
pub fn map_tags<I, O, A, B, C, D>(
    transform: Transform,
    input_mapping: I,
    output_mapping: O,
) -> Result<Transform, CompositionError>
where
    I: IntoIterator<Item = (A, B)>,
    O: IntoIterator<Item = (C, D)>,
    A: Into<Tag>,
    B: Into<Tag>,
    C: Into<Tag>,
    D: Into<Tag>,
{
    let input_mapping = checked_mapping(
        &transform,
        Direction::Input,
        transform.input_tags(),
        input_mapping
            .into_iter()
            .map(|(from, to)| (from.into(), to.into())),
    )?;
    let output_mapping = checked_mapping(
        &transform,
        Direction::Output,
        transform.output_tags(),
        output_mapping
            .into_iter()
            .map(|(from, to)| (from.into(), to.into())),
    )?;

    let inputs: TagSet = input_mapping.values().cloned().collect();
    let outputs: TagSet = output_mapping.values().cloned().collect();
    Ok(Transform::from_parts(
        transform.name().to_string(),
        inputs,
        outputs,
        Node::Renamed(Renamed {
            base: transform,
            input_mapping,
            output_mapping,
        }),
    ))
}

fn checked_mapping(
    transform: &Transform,
    direction: Direction,
    declared: &TagSet,
    pairs: impl Iterator<Item = (Tag, Tag)>,
) -> Result<BTreeMap<Tag, Tag>, CompositionError> {
    let invalid = |problem| CompositionError::TagMapping {
        transform: transform.name().to_string(),
        direction,
        problem,
    };

    let mut mapping: BTreeMap<Tag, Tag> = BTreeMap::new();
    let mut sources_by_target: BTreeMap<Tag, Tag> = BTreeMap::new();
    for (from, to) in pairs {
        if !to.is_valid() {
            return Err(CompositionError::InvalidTag {
                transform: transform.name().to_string(),
                tag: to.as_str().to_string(),
            });
        }
        if from.is_fileset() != to.is_fileset() {
            return Err(invalid(MappingProblem::KindMismatch { from, to }));
        }
        if mapping.contains_key(&from) {
            return Err(invalid(MappingProblem::DuplicateSource(from)));
        }
        if let Some(earlier) = sources_by_target.get(&to) {
            return Err(invalid(MappingProblem::Collision {
                target: to.clone(),
                sources: (earlier.clone(), from),
            }));
        }
        sources_by_target.insert(to.clone(), from.clone());
        mapping.insert(from, to);
    }

    let unexpected: Vec<Tag> = mapping
        .keys()
        .filter(|tag| !declared.contains(*tag))
        .cloned()
        .collect();
    if !unexpected.is_empty() {
        return Err(invalid(MappingProblem::Unexpected(unexpected)));
    }
    let missing: Vec<Tag> = declared
        .iter()
        .filter(|tag| !mapping.contains_key(*tag))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(invalid(MappingProblem::Missing(missing)));
    }
    Ok(mapping)
}

pub(crate) fn run_renamed(
    renamed: &Renamed,
    scope: &ExecScope<'_>,
    inputs: &InputView<'_>,
) -> Result<FileTable, ExecutionError> {
    let view: InputView<'_> = renamed
        .input_mapping
        .iter()
        .filter_map(|(internal, external)| {
            inputs
                .get(external)
                .map(|slot| (internal.clone(), slot.clone()))
        })
        .collect();

    let files = renamed.base.execute(scope, &view)?;
    Ok(files
        .into_iter()
        .map(|(internal, mut slot)| {
            let external = renamed
                .output_mapping
                .get(&internal)
                .cloned()
                .unwrap_or(internal);
            for file in slot.files_mut() {
                file.retag(external.clone());
            }
            (external, slot)
        })
        .collect())
}
