//! Composable file transforms with staged, all-or-nothing commits.
//!
//! A [`Transform`] declares the tags it reads and writes. Leaves run a
//! [`Script`]; [`sequence`], [`merge`] and [`map_tags`] build bigger
//! transforms out of smaller ones. A [`BakerDriverContext`] binds the tags of
//! the outermost transform to paths, runs it inside a private workspace and
//! moves the outputs into place only if every step succeeded.
//!
//! Tags starting with `fileset::` name a list of files rather than one; they
//! bind to a list of paths and are read and written member by member.
//!
//! ```no_run
//! use bakery_core::{BakerDriverContext, DriverSettings, Transform, sequence};
//!
//! let upper = Transform::from_fn("upper", ["x"], ["y"], |i, o| {
//!     o.write("y", i.read_to_string("x")?.to_uppercase())?;
//!     Ok(())
//! })?;
//! let exclaim = Transform::from_fn("exclaim", ["y"], ["z"], |i, o| {
//!     o.write("z", format!("{}!", i.read_to_string("y")?))?;
//!     Ok(())
//! })?;
//! let shout = sequence([upper, exclaim])?;
//!
//! let mut ctx = BakerDriverContext::new(
//!     DriverSettings::default(),
//!     [("x", "in.txt")],
//!     [("z", "out.txt")],
//! );
//! let report = ctx.run(&shout)?;
//! assert!(report.succeeded());
//! # Ok::<(), bakery_core::BakeError>(())
//! ```

mod binding;
mod commit;
mod driver;
pub mod error;
mod exec;
mod files;
mod leaf;
mod merge;
mod rename;
mod sequence;
pub mod settings;
mod transform;

pub use binding::PathBinding;
pub use driver::BakerDriverContext;
pub use error::{
    BakeError, BakeResult, CommitError, CompositionError, Direction, ExecutionError,
    MappingProblem, ResolutionError,
};
pub use files::{InputFiles, OutputFiles};
pub use leaf::Script;
pub use merge::merge;
pub use rename::map_tags;
pub use sequence::{sequence, sequence_with_inputs};
pub use settings::DriverSettings;
pub use transform::Transform;

pub use bakery_types::{FILESET_PREFIX, RunReport, RunState, Structure, Tag, TagSet};
