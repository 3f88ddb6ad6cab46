//! Error taxonomy for bakery runs.
//!
//! Errors are grouped by the phase that raises them:
//! - Composition (exit code 2): building a transform graph, before any I/O.
//! - Resolution (exit code 2): binding a graph to concrete paths.
//! - Execution (exit code 1): running transforms inside the workspace.
//! - Commit (exit code 1): moving outputs into place.

use bakery_stage::{FileRefError, WorkspaceError};
use bakery_types::{Tag, join_tags};
use camino::Utf8PathBuf;
use std::fmt;
use thiserror::Error;

/// The top-level error type for bakery operations.
#[derive(Debug, Error)]
pub enum BakeError {
    #[error("composition error: {0}")]
    Composition(#[from] CompositionError),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("commit error: {0}")]
    Commit(#[from] CommitError),
}

impl BakeError {
    pub fn category(&self) -> &'static str {
        match self {
            BakeError::Composition(_) => "composition",
            BakeError::Resolution(_) => "resolution",
            BakeError::Execution(_) => "execution",
            BakeError::Commit(_) => "commit",
        }
    }

    /// Taxonomy name of the underlying error, e.g. `OutputNotWrittenError`.
    pub fn kind(&self) -> &'static str {
        match self {
            BakeError::Composition(e) => e.kind(),
            BakeError::Resolution(e) => e.kind(),
            BakeError::Execution(e) => e.kind(),
            BakeError::Commit(_) => "CommitError",
        }
    }

    /// Returns true for configuration mistakes that re-running cannot fix.
    pub fn is_configuration(&self) -> bool {
        matches!(self, BakeError::Composition(_) | BakeError::Resolution(_))
    }

    /// Returns the recommended exit code for this error.
    pub fn exit_code(&self) -> u8 {
        if self.is_configuration() { 2 } else { 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

/// What is wrong with a `map_tags` mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingProblem {
    /// Declared tags the mapping does not cover.
    Missing(Vec<Tag>),
    /// Mapped tags the wrapped transform does not declare.
    Unexpected(Vec<Tag>),
    /// The same tag mapped twice.
    DuplicateSource(Tag),
    /// Two tags mapped onto the same new name.
    Collision { target: Tag, sources: (Tag, Tag) },
    /// A fileset tag renamed to a single-file tag, or the reverse.
    KindMismatch { from: Tag, to: Tag },
}

impl fmt::Display for MappingProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingProblem::Missing(tags) => write!(f, "no mapping for {}", join_tags(tags)),
            MappingProblem::Unexpected(tags) => {
                write!(f, "unexpected key(s) {}", join_tags(tags))
            }
            MappingProblem::DuplicateSource(tag) => write!(f, "`{tag}` is mapped twice"),
            MappingProblem::Collision { target, sources } => write!(
                f,
                "`{}` and `{}` both map to `{target}`",
                sources.0, sources.1
            ),
            MappingProblem::KindMismatch { from, to } => {
                write!(f, "`{from}` cannot become `{to}`: filesets only map to filesets")
            }
        }
    }
}

/// Raised while building a transform graph. No I/O has happened yet.
#[derive(Debug, Clone, Error)]
pub enum CompositionError {
    #[error(
        "{transform}: invalid tag {tag:?} (use ASCII letters, digits, `_` or `-`, optionally after `fileset::`)"
    )]
    InvalidTag { transform: String, tag: String },

    #[error("{transform}: {direction} tag `{tag}` declared twice")]
    DuplicateTag {
        transform: String,
        direction: Direction,
        tag: Tag,
    },

    #[error("{kind} needs at least one transform")]
    EmptyComposite { kind: &'static str },

    #[error("map_tags over {transform}: {direction} mapping: {problem}")]
    TagMapping {
        transform: String,
        direction: Direction,
        problem: MappingProblem,
    },

    #[error(
        "output `{tag}` is produced by both branch {first} ({first_name}) and branch {second} ({second_name})"
    )]
    OutputCollision {
        tag: Tag,
        first: usize,
        first_name: String,
        second: usize,
        second_name: String,
    },

    #[error("stage {stage} ({transform}) needs `{tag}`, which no earlier stage or declared input provides")]
    UnresolvedInput {
        tag: Tag,
        stage: usize,
        transform: String,
    },

    #[error("declared input(s) {} are not read by any stage", join_tags(.tags))]
    UnusedInput { tags: Vec<Tag> },
}

impl CompositionError {
    pub fn kind(&self) -> &'static str {
        match self {
            CompositionError::InvalidTag { .. } => "InvalidTagError",
            CompositionError::DuplicateTag { .. } => "DuplicateTagError",
            CompositionError::EmptyComposite { .. } => "EmptyCompositeError",
            CompositionError::TagMapping { .. } => "TagMappingError",
            CompositionError::OutputCollision { .. } => "OutputCollisionError",
            CompositionError::UnresolvedInput { .. } => "UnresolvedInputError",
            CompositionError::UnusedInput { .. } => "UnusedInputError",
        }
    }
}

/// Raised while binding a graph to paths, before anything is staged.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("a driver context runs once; create a new one for each run")]
    ContextReused,

    #[error(
        "{direction} tags do not match {transform}: missing [{}], unexpected [{}]",
        join_tags(.missing),
        join_tags(.unexpected)
    )]
    TagBinding {
        transform: String,
        direction: Direction,
        missing: Vec<Tag>,
        unexpected: Vec<Tag>,
    },

    #[error("input `{tag}`: {path} is missing or unreadable: {source}")]
    MissingInputPath {
        tag: Tag,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is both input `{input}` and output `{output}`")]
    CircularPath {
        input: Tag,
        output: Tag,
        path: Utf8PathBuf,
    },

    #[error("outputs `{first}` and `{second}` both point at {path}")]
    DuplicateOutputPath {
        first: Tag,
        second: Tag,
        path: Utf8PathBuf,
    },

    #[error("output `{tag}`: {path} already exists and overwrite is not enabled")]
    OutputExists { tag: Tag, path: Utf8PathBuf },

    #[error("{direction} `{tag}`: {}", binding_hint(.fileset))]
    FilesetBinding {
        tag: Tag,
        direction: Direction,
        fileset: bool,
    },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl ResolutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ResolutionError::ContextReused => "ContextReusedError",
            ResolutionError::TagBinding { .. } => "TagBindingError",
            ResolutionError::MissingInputPath { .. } => "MissingInputPathError",
            ResolutionError::CircularPath { .. } => "CircularPathError",
            ResolutionError::DuplicateOutputPath { .. } => "DuplicateOutputPathError",
            ResolutionError::OutputExists { .. } => "OutputExistsError",
            ResolutionError::FilesetBinding { .. } => "FilesetBindingError",
            ResolutionError::Workspace(_) => "WorkspaceError",
        }
    }
}

/// Raised while transforms run. Every variant names the failing transform.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{transform}: did not write output(s) {}", join_tags(.tags))]
    OutputNotWritten { transform: String, tags: Vec<Tag> },

    #[error("{transform}: wrote undeclared output(s) {}", join_tags(.tags))]
    UndeclaredOutput { transform: String, tags: Vec<Tag> },

    #[error("{transform}: read undeclared input `{tag}`")]
    UndeclaredInput { transform: String, tag: Tag },

    #[error("{transform}: input `{tag}` was not provided")]
    MissingInput { transform: String, tag: Tag },

    #[error("{transform}: input `{tag}` has {len} member(s), none at index {index}")]
    MissingMember {
        transform: String,
        tag: Tag,
        index: usize,
        len: usize,
    },

    #[error("{transform}: {}", accessor_hint(.tag))]
    TagKind { transform: String, tag: Tag },

    #[error("{transform}: input `{tag}` at {path} is unreadable: {source}")]
    UnreadableInput {
        transform: String,
        tag: Tag,
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{transform}: {source}")]
    File {
        transform: String,
        #[source]
        source: FileRefError,
    },

    #[error(
        "{transform} (inputs [{}], outputs [{}]) failed: {source:#}",
        join_tags(.inputs),
        join_tags(.outputs)
    )]
    ScriptFailed {
        transform: String,
        inputs: Vec<Tag>,
        outputs: Vec<Tag>,
        #[source]
        source: anyhow::Error,
    },
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::OutputNotWritten { .. } => "OutputNotWrittenError",
            ExecutionError::UndeclaredOutput { .. } => "UndeclaredOutputError",
            ExecutionError::UndeclaredInput { .. } => "UndeclaredInputError",
            ExecutionError::MissingInput { .. } => "MissingInputError",
            ExecutionError::MissingMember { .. } => "MissingMemberError",
            ExecutionError::TagKind { .. } => "TagKindError",
            ExecutionError::UnreadableInput { .. } => "UnreadableInputError",
            ExecutionError::File { .. } => "FileError",
            ExecutionError::ScriptFailed { .. } => "ScriptError",
        }
    }

    /// Name of the transform that failed.
    pub fn transform(&self) -> &str {
        match self {
            ExecutionError::OutputNotWritten { transform, .. }
            | ExecutionError::UndeclaredOutput { transform, .. }
            | ExecutionError::UndeclaredInput { transform, .. }
            | ExecutionError::MissingInput { transform, .. }
            | ExecutionError::MissingMember { transform, .. }
            | ExecutionError::TagKind { transform, .. }
            | ExecutionError::UnreadableInput { transform, .. }
            | ExecutionError::File { transform, .. }
            | ExecutionError::ScriptFailed { transform, .. } => transform,
        }
    }
}

/// Raised while moving outputs into place. Nothing stays half-committed.
#[derive(Debug, Error)]
pub enum CommitError {
    #[error("output `{tag}` to {path}: {source}")]
    File {
        tag: Tag,
        path: Utf8PathBuf,
        #[source]
        source: FileRefError,
    },

    #[error("back up {path} before replacing it: {source}")]
    Backup {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("digest staged output `{tag}`: {source}")]
    Digest {
        tag: Tag,
        #[source]
        source: std::io::Error,
    },

    #[error("no staged file was produced for output `{tag}`")]
    MissingOutput { tag: Tag },

    #[error("output `{tag}` is bound to {bound} path(s) but {produced} file(s) were produced")]
    MemberCount {
        tag: Tag,
        bound: usize,
        produced: usize,
    },
}

fn binding_hint(fileset: &bool) -> &'static str {
    if *fileset {
        "a fileset needs a list of paths"
    } else {
        "a single-file tag needs exactly one path"
    }
}

fn accessor_hint(tag: &Tag) -> String {
    if tag.is_fileset() {
        format!("`{tag}` is a fileset; use the member accessors")
    } else {
        format!("`{tag}` is a single file; member accessors need a fileset")
    }
}

/// Result type alias using BakeError.
pub type BakeResult<T> = Result<T, BakeError>;
