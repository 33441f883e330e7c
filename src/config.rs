//! Engine configuration
//!
//! Configuration is stored in `<WORKFOLDER>/config.toml`. Every value has a
//! default, and the process environment overrides the file:
//!
//!   WORKFOLDER   task root directory (required)
//!   WORKERS      width of the normal worker pool
//!   TARGETS      directory holding the allow-listed `targets/` scripts
//!   TARGETS_OUT  delivery directory for target results
//!   VERBOSE      0/1, forward pipeline stdout to the engine's stdout
//!   ANNOTATE     annotation entry point invoked by generated scripts

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

pub const CONFIG_FILE: &str = "config.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Task root directory. Not read from the file; set by the loader.
    #[serde(skip)]
    pub work_folder: PathBuf,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub targets: TargetsConfig,

    #[serde(default)]
    pub priority: PriorityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Width of the normal pool. The priority pool always has width 1.
    #[serde(default = "default_normal_workers")]
    pub normal_workers: usize,
}

fn default_normal_workers() -> usize {
    1
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            normal_workers: default_normal_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Command line of the annotation entry point. Inserted verbatim.
    #[serde(default = "default_annotate_command")]
    pub annotate_command: String,

    /// Forward the pipeline's stdout instead of discarding it
    #[serde(default = "default_verbose")]
    pub verbose: bool,
}

fn default_annotate_command() -> String {
    "annotate".to_string()
}

fn default_verbose() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            annotate_command: default_annotate_command(),
            verbose: default_verbose(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TargetsConfig {
    /// Root of the target catalog; scripts live in `<dir>/targets/`
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Where target results are handed off, one subdirectory per target
    #[serde(default)]
    pub delivery_dir: Option<PathBuf>,
}

/// Line thresholds below which an input qualifies as a priority task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityConfig {
    #[serde(default = "default_vcf_max_lines")]
    pub vcf_max_lines: usize,

    #[serde(default = "default_hgvsc_max_lines")]
    pub hgvsc_max_lines: usize,
}

fn default_vcf_max_lines() -> usize {
    1000
}

fn default_hgvsc_max_lines() -> usize {
    100
}

impl Default for PriorityConfig {
    fn default() -> Self {
        Self {
            vcf_max_lines: default_vcf_max_lines(),
            hgvsc_max_lines: default_hgvsc_max_lines(),
        }
    }
}

impl Config {
    /// A default configuration rooted at `work_folder`.
    pub fn new(work_folder: impl Into<PathBuf>) -> Self {
        Self {
            work_folder: work_folder.into(),
            ..Self::default()
        }
    }

    /// Load configuration from `<work_folder>/config.toml`.
    /// Returns defaults if the file doesn't exist.
    pub fn load(work_folder: &Path) -> Result<Self> {
        let config_path = work_folder.join(CONFIG_FILE);

        let mut config = if config_path.exists() {
            let content =
                fs::read_to_string(&config_path).map_err(|e| EngineError::io(&config_path, e))?;
            toml::from_str::<Config>(&content).map_err(|e| {
                EngineError::Configuration(format!("Failed to parse {}: {}", config_path.display(), e))
            })?
        } else {
            Self::default()
        };

        config.work_folder = work_folder.to_path_buf();
        Ok(config)
    }

    /// Resolve the full configuration from the process environment.
    ///
    /// `dir` takes precedence over `WORKFOLDER`.
    pub fn from_env(dir: Option<&Path>) -> Result<Self> {
        let work_folder = match dir {
            Some(d) => d.to_path_buf(),
            None => std::env::var_os("WORKFOLDER")
                .map(PathBuf::from)
                .ok_or_else(|| EngineError::Configuration("WORKFOLDER not specified in environment".into()))?,
        };

        let mut config = Self::load(&work_folder)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(workers) = lookup("WORKERS") {
            self.scheduler.normal_workers = workers.trim().parse().map_err(|_| {
                EngineError::Configuration(format!("WORKERS must be a positive integer, got '{}'", workers))
            })?;
        }
        if let Some(verbose) = lookup("VERBOSE") {
            let value: i64 = verbose.trim().parse().map_err(|_| {
                EngineError::Configuration(format!("VERBOSE must be 0 or 1, got '{}'", verbose))
            })?;
            self.pipeline.verbose = value != 0;
        }
        if let Some(annotate) = lookup("ANNOTATE") {
            self.pipeline.annotate_command = annotate;
        }
        if let Some(targets) = lookup("TARGETS") {
            self.targets.dir = Some(PathBuf::from(targets));
        }
        if let Some(delivery) = lookup("TARGETS_OUT") {
            self.targets.delivery_dir = Some(PathBuf::from(delivery));
        }
        Ok(())
    }

    /// Check structural requirements. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        if !self.work_folder.is_dir() {
            return Err(EngineError::Configuration(format!(
                "Work folder {} does not exist",
                self.work_folder.display()
            )));
        }
        if self.scheduler.normal_workers == 0 {
            return Err(EngineError::Configuration(
                "scheduler.normal_workers must be at least 1".into(),
            ));
        }
        if let Some(ref dir) = self.targets.dir {
            if !dir.is_dir() {
                return Err(EngineError::Configuration(format!(
                    "Targets directory {} does not exist",
                    dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Directory for daemon bookkeeping (socket, state, log)
    pub fn service_dir(&self) -> PathBuf {
        self.work_folder.join(".service")
    }
}
