//! The `Transform` handle shared by leaves and composites.

use crate::error::{CompositionError, Direction, ExecutionError};
use crate::exec::{ExecScope, FileTable, InputView};
use crate::files::{InputFiles, OutputFiles};
use crate::leaf::{self, FnScript, Script};
use crate::merge;
use crate::rename::{self, Renamed};
use crate::sequence;
use bakery_types::{Structure, Tag, TagSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug_span;

/// A unit of work with declared input and output tags.
///
/// Leaves wrap a [`Script`]; [`sequence`](crate::sequence()),
/// [`merge`](crate::merge()) and [`map_tags`](crate::map_tags()) wrap other
/// transforms and expose the same contract, so pipelines nest freely.
/// Cloning is cheap: the graph is shared and immutable.
#[derive(Clone)]
pub struct Transform {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    input_tags: TagSet,
    output_tags: TagSet,
    node: Node,
}

#[derive(Clone)]
pub(crate) enum Node {
    Leaf(Arc<dyn Script>),
    Sequence(Vec<Transform>),
    Merge(Vec<Transform>),
    Renamed(Renamed),
}

impl Transform {
    /// A leaf transform running `script`.
    ///
    /// Tags must be valid (see [`Tag::is_valid`]) and unique per direction;
    /// the same tag may appear as both input and output for in-place edits.
    pub fn new<S, I, O>(
        name: impl Into<String>,
        inputs: I,
        outputs: O,
        script: S,
    ) -> Result<Self, CompositionError>
    where
        S: Script + 'static,
        I: IntoIterator,
        I::Item: Into<Tag>,
        O: IntoIterator,
        O::Item: Into<Tag>,
    {
        let name = name.into();
        let input_tags = declared_tags(&name, Direction::Input, inputs)?;
        let output_tags = declared_tags(&name, Direction::Output, outputs)?;
        Ok(Self::from_parts(
            name,
            input_tags,
            output_tags,
            Node::Leaf(Arc::new(script)),
        ))
    }

    /// A leaf transform from a closure.
    pub fn from_fn<F, I, O>(
        name: impl Into<String>,
        inputs: I,
        outputs: O,
        script: F,
    ) -> Result<Self, CompositionError>
    where
        F: Fn(&InputFiles<'_>, &mut OutputFiles<'_>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
        I: IntoIterator,
        I::Item: Into<Tag>,
        O: IntoIterator,
        O::Item: Into<Tag>,
    {
        Self::new(name, inputs, outputs, FnScript(script))
    }

    pub(crate) fn from_parts(
        name: String,
        input_tags: TagSet,
        output_tags: TagSet,
        node: Node,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                input_tags,
                output_tags,
                node,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn input_tags(&self) -> &TagSet {
        &self.inner.input_tags
    }

    pub fn output_tags(&self) -> &TagSet {
        &self.inner.output_tags
    }

    /// `leaf`, `sequence`, `merge` or `map`.
    pub fn kind(&self) -> &'static str {
        match &self.inner.node {
            Node::Leaf(_) => "leaf",
            Node::Sequence(_) => "sequence",
            Node::Merge(_) => "merge",
            Node::Renamed(_) => "map",
        }
    }

    /// The same transform under another name.
    pub fn named(&self, name: impl Into<String>) -> Transform {
        Self::from_parts(
            name.into(),
            self.inner.input_tags.clone(),
            self.inner.output_tags.clone(),
            self.inner.node.clone(),
        )
    }

    /// JSON-serializable description of the nested graph.
    pub fn structure(&self) -> Structure {
        let name = self.name().to_string();
        let input_tags = self.input_tags().iter().cloned().collect();
        let output_tags = self.output_tags().iter().cloned().collect();
        match &self.inner.node {
            Node::Leaf(_) => Structure::Leaf {
                name,
                input_tags,
                output_tags,
            },
            Node::Sequence(stages) => Structure::Sequence {
                name,
                input_tags,
                output_tags,
                steps: stages.iter().map(Transform::structure).collect(),
            },
            Node::Merge(branches) => Structure::Merge {
                name,
                input_tags,
                output_tags,
                steps: branches.iter().map(Transform::structure).collect(),
            },
            Node::Renamed(renamed) => Structure::Map {
                name,
                input_tags,
                output_tags,
                input_mapping: renamed.input_mapping.clone(),
                output_mapping: renamed.output_mapping.clone(),
                base_step: Box::new(renamed.base.structure()),
            },
        }
    }

    /// Run against `inputs`, returning the staged files for every output tag.
    ///
    /// On error nothing this call staged survives.
    pub(crate) fn execute(
        &self,
        scope: &ExecScope<'_>,
        inputs: &InputView<'_>,
    ) -> Result<FileTable, ExecutionError> {
        let span = debug_span!("transform", name = %self.name(), kind = self.kind());
        let _entered = span.enter();
        match &self.inner.node {
            Node::Leaf(script) => leaf::run_leaf(self, script.as_ref(), scope, inputs),
            Node::Sequence(stages) => sequence::run_sequence(self, stages, scope, inputs),
            Node::Merge(branches) => merge::run_merge(self, branches, scope, inputs),
            Node::Renamed(renamed) => rename::run_renamed(renamed, scope, inputs),
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.inner.name)
            .field("kind", &self.kind())
            .field("input_tags", &self.inner.input_tags)
            .field("output_tags", &self.inner.output_tags)
            .finish()
    }
}

/// Default composite name, e.g. `sequence[upper, exclaim]`.
pub(crate) fn composite_name(kind: &str, parts: &[Transform]) -> String {
    let names: Vec<&str> = parts.iter().map(Transform::name).collect();
    format!("{kind}[{}]", names.join(", "))
}

/// Validate and collect one direction of a leaf's declaration.
pub(crate) fn declared_tags<I>(
    transform: &str,
    direction: Direction,
    tags: I,
) -> Result<TagSet, CompositionError>
where
    I: IntoIterator,
    I::Item: Into<Tag>,
{
    let mut set = TagSet::new();
    for tag in tags {
        let tag = tag.into();
        if !tag.is_valid() {
            return Err(CompositionError::InvalidTag {
                transform: transform.to_string(),
                tag: tag.as_str().to_string(),
            });
        }
        if set.contains(&tag) {
            return Err(CompositionError::DuplicateTag {
                transform: transform.to_string(),
                direction,
                tag,
            });
        }
        set.insert(tag);
    }
    Ok(set)
}
