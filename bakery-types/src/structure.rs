use crate::tag::Tag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Nested description of a transform tree.
///
/// Hopefully only useful for tooling built on top of bakery (the CLI's
/// `--describe`, graph viewers). Tag lists are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Structure {
    Leaf {
        name: String,
        input_tags: Vec<Tag>,
        output_tags: Vec<Tag>,
    },
    Sequence {
        name: String,
        input_tags: Vec<Tag>,
        output_tags: Vec<Tag>,
        steps: Vec<Structure>,
    },
    Merge {
        name: String,
        input_tags: Vec<Tag>,
        output_tags: Vec<Tag>,
        steps: Vec<Structure>,
    },
    Map {
        name: String,
        input_tags: Vec<Tag>,
        output_tags: Vec<Tag>,
        /// Wrapped (internal) tag → exposed tag.
        input_mapping: BTreeMap<Tag, Tag>,
        /// Wrapped (internal) tag → exposed tag.
        output_mapping: BTreeMap<Tag, Tag>,
        base_step: Box<Structure>,
    },
}

impl Structure {
    pub fn name(&self) -> &str {
        match self {
            Structure::Leaf { name, .. }
            | Structure::Sequence { name, .. }
            | Structure::Merge { name, .. }
            | Structure::Map { name, .. } => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Structure::Leaf { .. } => "leaf",
            Structure::Sequence { .. } => "sequence",
            Structure::Merge { .. } => "merge",
            Structure::Map { .. } => "map",
        }
    }

    pub fn input_tags(&self) -> &[Tag] {
        match self {
            Structure::Leaf { input_tags, .. }
            | Structure::Sequence { input_tags, .. }
            | Structure::Merge { input_tags, .. }
            | Structure::Map { input_tags, .. } => input_tags,
        }
    }

    pub fn output_tags(&self) -> &[Tag] {
        match self {
            Structure::Leaf { output_tags, .. }
            | Structure::Sequence { output_tags, .. }
            | Structure::Merge { output_tags, .. }
            | Structure::Map { output_tags, .. } => output_tags,
        }
    }

    /// Direct children, in execution order.
    pub fn children(&self) -> Vec<&Structure> {
        match self {
            Structure::Leaf { .. } => vec![],
            Structure::Sequence { steps, .. } | Structure::Merge { steps, .. } => {
                steps.iter().collect()
            }
            Structure::Map { base_step, .. } => vec![base_step.as_ref()],
        }
    }

    /// Number of leaf transforms in the tree.
    pub fn leaf_count(&self) -> usize {
        match self {
            Structure::Leaf { .. } => 1,
            _ => self.children().iter().map(|c| c.leaf_count()).sum(),
        }
    }
}
