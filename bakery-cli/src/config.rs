//! Configuration file loading for bakery drivers.
//!
//! Discovers and loads `bakery.toml` from the current directory.
//! Merges config file settings with flags (flags take precedence).

use anyhow::Context;
use bakery_core::DriverSettings;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use serde::Deserialize;
use tracing::debug;

/// The config file name to search for.
pub const CONFIG_FILE_NAME: &str = "bakery.toml";

/// Top-level configuration from bakery.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BakeryConfig {
    pub driver: DriverConfig,
}

/// `[driver]` section. Unset keys fall back to [`DriverSettings::default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Replace existing output files.
    pub overwrite: Option<bool>,

    /// Maximum number of merge branches running at once.
    pub parallelism: Option<usize>,

    /// Directory for per-run workspaces.
    pub workspace_dir: Option<Utf8PathBuf>,
}

/// Discover the bakery.toml config file in `dir`.
pub fn discover_config(dir: &Utf8Path) -> Option<Utf8PathBuf> {
    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.is_file() {
        debug!("found config file at {}", config_path);
        Some(config_path)
    } else {
        debug!("no config file found at {}", config_path);
        None
    }
}

/// Load and parse a bakery.toml config file.
pub fn load_config(path: &Utf8Path) -> anyhow::Result<BakeryConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config file {}", path))?;
    parse_config(&contents).with_context(|| format!("parse config file {}", path))
}

pub fn parse_config(contents: &str) -> anyhow::Result<BakeryConfig> {
    let config: BakeryConfig = toml::from_str(contents).context("invalid TOML")?;
    Ok(config)
}

/// Load config from `dir`, or return the default if there is none.
pub fn load_or_default(dir: &Utf8Path) -> anyhow::Result<BakeryConfig> {
    match discover_config(dir) {
        Some(path) => load_config(&path),
        None => Ok(BakeryConfig::default()),
    }
}

/// Driver-related flags as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    /// `--overwrite` was passed.
    pub overwrite: bool,
    pub parallelism: Option<usize>,
    pub workspace_dir: Option<Utf8PathBuf>,
}

/// Builder for merging config file with flags.
pub struct ConfigMerger {
    config: BakeryConfig,
}

impl ConfigMerger {
    pub fn new(config: BakeryConfig) -> Self {
        Self { config }
    }

    /// Flags override the config file; the config file overrides defaults.
    ///
    /// `--overwrite` can only switch overwriting on.
    pub fn merge_flags(self, flags: FlagOverrides) -> DriverSettings {
        let defaults = DriverSettings::default();
        let driver = self.config.driver;
        DriverSettings {
            overwrite: flags.overwrite || driver.overwrite.unwrap_or(defaults.overwrite),
            parallelism: flags
                .parallelism
                .or(driver.parallelism)
                .unwrap_or(defaults.parallelism),
            workspace_dir: flags.workspace_dir.or(driver.workspace_dir),
        }
    }
}
