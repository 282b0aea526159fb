//! Run configuration: a YAML file plus CLI overrides.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::Deserialize;

fn default_seed() -> u64 {
    42
}

fn default_log_every() -> usize {
    50
}

/// Runtime knobs for a training run. Unknown keys in the file are
/// rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub train_root_a: PathBuf,
    #[serde(default)]
    pub train_root_b: PathBuf,
    #[serde(default)]
    pub steps: usize,
    #[serde(default)]
    pub batch_size: usize,
    #[serde(default)]
    pub num_workers: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_log_every")]
    pub log_every: usize,
}

/// CLI-supplied values; absent fields leave the file value in place.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub train_root_a: Option<PathBuf>,
    pub train_root_b: Option<PathBuf>,
    pub steps: Option<usize>,
    pub batch_size: Option<usize>,
    pub num_workers: Option<usize>,
    pub seed: Option<u64>,
    pub log_every: Option<usize>,
}

impl Config {
    /// Reads and validates a config from YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("open config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies any set override on top of the file values.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(root) = &overrides.train_root_a {
            self.train_root_a = root.clone();
        }
        if let Some(root) = &overrides.train_root_b {
            self.train_root_b = root.clone();
        }
        if let Some(steps) = overrides.steps {
            self.steps = steps;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.batch_size = batch_size;
        }
        if let Some(num_workers) = overrides.num_workers {
            self.num_workers = num_workers;
        }
        if let Some(seed) = overrides.seed {
            self.seed = seed;
        }
        if let Some(log_every) = overrides.log_every {
            self.log_every = log_every;
        }
    }

    /// Verifies the config is runnable.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.train_root_a.as_os_str().is_empty() || !self.train_root_b.as_os_str().is_empty(),
            "at least one training root must be set"
        );
        ensure!(
            !self.train_root_a.as_os_str().is_empty() && !self.train_root_b.as_os_str().is_empty(),
            "both training roots must be provided for the multi-region demo"
        );
        ensure!(self.steps > 0, "steps must be > 0 (got {})", self.steps);
        ensure!(
            self.batch_size > 0,
            "batch_size must be > 0 (got {})",
            self.batch_size
        );
        ensure!(
            self.num_workers > 0,
            "num_workers must be > 0 (got {})",
            self.num_workers
        );
        ensure!(
            self.log_every > 0,
            "log_every must be > 0 (got {})",
            self.log_every
        );
        Ok(())
    }
}
