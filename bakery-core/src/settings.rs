//! Clap-free settings for a driver run.

use camino::Utf8PathBuf;

/// Knobs for one [`BakerDriverContext`](crate::BakerDriverContext) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverSettings {
    /// Replace output files that already exist. Off by default so that a
    /// mistyped output path cannot clobber an unrelated file.
    pub overwrite: bool,

    /// Upper bound on merge branches running at once.
    pub parallelism: usize,

    /// Where the per-run workspace is created (default: system temp dir).
    /// Pointing this at the output filesystem keeps commits to plain renames.
    pub workspace_dir: Option<Utf8PathBuf>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            overwrite: false,
            parallelism: 1,
            workspace_dir: None,
        }
    }
}

impl DriverSettings {
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.workspace_dir = Some(dir.into());
        self
    }

    /// Worker count actually used; zero is treated as one.
    pub fn workers(&self) -> usize {
        self.parallelism.max(1)
    }
}
