//! Command-line drivers for bakery transforms.
//!
//! [`cli`] turns a [`Transform`] into a command with one path flag per tag:
//!
//! ```no_run
//! use bakery_core::Transform;
//! use std::process::ExitCode;
//!
//! fn main() -> ExitCode {
//!     let copy = Transform::from_fn("copy", ["src"], ["dst"], |i, o| {
//!         o.write("dst", i.read("src")?)?;
//!         Ok(())
//!     });
//!     match copy.map_err(bakery_cli::CliError::from).and_then(bakery_cli::cli) {
//!         Ok(cli) => cli.with_name("copy").run(),
//!         Err(err) => err.report(),
//!     }
//! }
//! ```
//!
//! Invoked as `copy --src a.txt --dst b.txt`. A tag that is both an input
//! and an output, or that shadows a built-in flag, is split into
//! `--in-<tag>` and `--out-<tag>`. A `fileset::<name>` tag becomes `--<name>`
//! and takes one or more paths.

pub mod config;

use anyhow::Context;
use bakery_core::{
    BakeError, BakerDriverContext, CompositionError, Direction, PathBinding, RunReport, Tag,
    Transform,
};
use bakery_render::{render_report_md, render_structure_md};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use config::{ConfigMerger, FlagOverrides};
use fs_err as fs;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::process::ExitCode;
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const OVERWRITE: &str = "overwrite";
const PARALLELISM: &str = "parallelism";
const WORKSPACE_DIR: &str = "workspace-dir";
const REPORT: &str = "report";
const CONFIG: &str = "config";
const DESCRIBE: &str = "describe";
const SUMMARY: &str = "summary";

/// Flag names a tag may not take over.
const RESERVED: &[&str] = &[
    OVERWRITE,
    PARALLELISM,
    WORKSPACE_DIR,
    REPORT,
    CONFIG,
    DESCRIBE,
    SUMMARY,
    "help",
    "version",
];

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Bake(#[from] BakeError),

    #[error("{0:#}")]
    Config(anyhow::Error),

    #[error("flag --{flag} would be used by both {first} and {second}")]
    AmbiguousFlag {
        flag: String,
        first: String,
        second: String,
    },

    #[error("{0:#}")]
    Internal(anyhow::Error),
}

impl From<CompositionError> for CliError {
    fn from(err: CompositionError) -> Self {
        CliError::Bake(err.into())
    }
}

impl CliError {
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Bake(err) => err.kind(),
            CliError::Config(_) => "ConfigError",
            CliError::AmbiguousFlag { .. } => "AmbiguousFlagError",
            CliError::Internal(_) => "InternalError",
        }
    }

    /// 2 for configuration mistakes, 1 for runtime failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Bake(err) => err.exit_code(),
            CliError::Config(_) | CliError::AmbiguousFlag { .. } => 2,
            CliError::Internal(_) => 1,
        }
    }

    /// Print to stderr and return the matching exit code.
    pub fn report(&self) -> ExitCode {
        eprintln!("error[{}]: {self}", self.kind());
        ExitCode::from(self.exit_code())
    }
}

/// One generated path flag.
#[derive(Debug, Clone)]
struct TagFlag {
    id: String,
    long: String,
    tag: Tag,
    direction: Direction,
}

impl TagFlag {
    fn is_fileset(&self) -> bool {
        self.tag.is_fileset()
    }
}

/// Build a command-line driver for `transform`.
///
/// Fails if two tags would end up with the same flag name.
pub fn cli(transform: Transform) -> Result<BakerCli, CliError> {
    let flags = tag_flags(&transform)?;
    Ok(BakerCli {
        name: transform.name().to_string(),
        about: None,
        transform,
        flags,
    })
}

/// A command generated from a transform's tags.
#[derive(Debug)]
pub struct BakerCli {
    transform: Transform,
    name: String,
    about: Option<String>,
    flags: Vec<TagFlag>,
}

impl BakerCli {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = Some(about.into());
        self
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Long flag names for the transform's tags, as `(direction, tag, flag)`.
    pub fn tag_flag_names(&self) -> Vec<(Direction, &str, &str)> {
        self.flags
            .iter()
            .map(|flag| (flag.direction, flag.tag.as_str(), flag.long.as_str()))
            .collect()
    }

    /// The clap command: built-in flags plus one path flag per tag.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(self.name.clone())
            .arg(
                Arg::new(OVERWRITE)
                    .long(OVERWRITE)
                    .action(ArgAction::SetTrue)
                    .help("Replace output files that already exist"),
            )
            .arg(
                Arg::new(PARALLELISM)
                    .long(PARALLELISM)
                    .value_name("N")
                    .value_parser(value_parser!(usize))
                    .help("Maximum number of merge branches running at once"),
            )
            .arg(
                Arg::new(WORKSPACE_DIR)
                    .long(WORKSPACE_DIR)
                    .value_name("DIR")
                    .value_parser(value_parser!(Utf8PathBuf))
                    .help("Directory for the per-run workspace (default: system temp dir)"),
            )
            .arg(
                Arg::new(REPORT)
                    .long(REPORT)
                    .value_name("FILE")
                    .value_parser(value_parser!(Utf8PathBuf))
                    .help("Write the run report as JSON"),
            )
            .arg(
                Arg::new(CONFIG)
                    .long(CONFIG)
                    .value_name("FILE")
                    .value_parser(value_parser!(Utf8PathBuf))
                    .help("Config file (default: ./bakery.toml if present)"),
            )
            .arg(
                Arg::new(DESCRIBE)
                    .long(DESCRIBE)
                    .action(ArgAction::SetTrue)
                    .help("Print the transform structure as markdown and exit"),
            )
            .arg(
                Arg::new(SUMMARY)
                    .long(SUMMARY)
                    .action(ArgAction::SetTrue)
                    .help("Print a markdown summary of the run"),
            );
        if let Some(about) = &self.about {
            cmd = cmd.about(about.clone());
        }

        for flag in &self.flags {
            let arg = Arg::new(flag.id.clone())
                .long(flag.long.clone())
                .value_name("PATH")
                .value_parser(value_parser!(Utf8PathBuf))
                .required_unless_present(DESCRIBE);
            cmd = cmd.arg(if flag.is_fileset() {
                arg.num_args(1..)
                    .action(ArgAction::Append)
                    .help(format!("{} files for fileset `{}`", flag.direction, flag.tag))
            } else {
                arg.help(format!("{} file for tag `{}`", flag.direction, flag.tag))
            });
        }
        cmd
    }

    /// Parse the process arguments and run.
    pub fn run(&self) -> ExitCode {
        self.run_from(std::env::args_os())
    }

    /// Parse `args` (including the program name) and run.
    pub fn run_from<I, T>(&self, args: I) -> ExitCode
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = match self.command().try_get_matches_from(args) {
            Ok(matches) => matches,
            Err(err) => {
                let _ = err.print();
                return ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(2));
            }
        };

        init_logging();
        match self.execute(&matches) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => err.report(),
        }
    }

    fn execute(&self, matches: &ArgMatches) -> Result<(), CliError> {
        if matches.get_flag(DESCRIBE) {
            print!("{}", render_structure_md(&self.transform.structure()));
            return Ok(());
        }

        let config = match matches.get_one::<Utf8PathBuf>(CONFIG) {
            Some(path) => config::load_config(path),
            None => config::load_or_default(Utf8Path::new(".")),
        }
        .map_err(CliError::Config)?;
        let settings = ConfigMerger::new(config).merge_flags(FlagOverrides {
            overwrite: matches.get_flag(OVERWRITE),
            parallelism: matches.get_one::<usize>(PARALLELISM).copied(),
            workspace_dir: matches.get_one::<Utf8PathBuf>(WORKSPACE_DIR).cloned(),
        });
        debug!(?settings, "driver settings");

        let inputs = self.bound_paths(matches, Direction::Input);
        let outputs = self.bound_paths(matches, Direction::Output);
        let mut ctx = BakerDriverContext::new(settings, inputs, outputs);
        let result = ctx.run(&self.transform);

        if let Some(report) = ctx.report() {
            if let Some(path) = matches.get_one::<Utf8PathBuf>(REPORT) {
                match write_report(path, report) {
                    Ok(()) => {}
                    Err(err) if result.is_ok() => return Err(CliError::Internal(err)),
                    Err(err) => warn!(error = %err, "could not write run report"),
                }
            }
            if matches.get_flag(SUMMARY) {
                print!("{}", render_report_md(report));
            }
        }

        result.map(drop).map_err(CliError::Bake)
    }

    fn bound_paths(
        &self,
        matches: &ArgMatches,
        direction: Direction,
    ) -> BTreeMap<Tag, PathBinding> {
        self.flags
            .iter()
            .filter(|flag| flag.direction == direction)
            .filter_map(|flag| {
                let binding = if flag.is_fileset() {
                    matches
                        .get_many::<Utf8PathBuf>(&flag.id)
                        .map(|paths| PathBinding::Set(paths.cloned().collect()))
                } else {
                    matches
                        .get_one::<Utf8PathBuf>(&flag.id)
                        .map(|path| PathBinding::File(path.clone()))
                };
                binding.map(|binding| (flag.tag.clone(), binding))
            })
            .collect()
    }
}

fn tag_flags(transform: &Transform) -> Result<Vec<TagFlag>, CliError> {
    let inputs = transform.input_tags();
    let outputs = transform.output_tags();
    let mut flags = Vec::with_capacity(inputs.len() + outputs.len());

    for (direction, own, other, prefix) in [
        (Direction::Input, inputs, outputs, "in"),
        (Direction::Output, outputs, inputs, "out"),
    ] {
        for tag in own {
            let name = tag.base_name();
            let split = other.contains(tag) || RESERVED.contains(&name);
            let long = if split {
                format!("{prefix}-{name}")
            } else {
                name.to_string()
            };
            flags.push(TagFlag {
                id: format!("{prefix}:{tag}"),
                long,
                tag: tag.clone(),
                direction,
            });
        }
    }

    let mut taken: BTreeMap<&str, &TagFlag> = BTreeMap::new();
    for flag in &flags {
        if let Some(first) = taken.insert(flag.long.as_str(), flag) {
            return Err(CliError::AmbiguousFlag {
                flag: flag.long.clone(),
                first: describe(first),
                second: describe(flag),
            });
        }
    }
    Ok(flags)
}

fn describe(flag: &TagFlag) -> String {
    format!("{} tag `{}`", flag.direction, flag.tag)
}

fn write_report(path: &Utf8Path, report: &RunReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("serialize run report")?;
    if let Some(parent) = path.parent()
        && !parent.as_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent))?;
    }
    fs::write(path, json).with_context(|| format!("write {}", path))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
