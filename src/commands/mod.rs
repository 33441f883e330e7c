pub mod cancel;
pub mod delete;
pub mod list;
pub mod log;
pub mod restart;
pub mod result;
pub mod service;
pub mod status;
pub mod submit;

use anyhow::{Context, Result};
use std::path::Path;

use anno_engine::config::Config;

/// Resolve the configuration: `--dir` (else `WORKFOLDER`), its
/// `config.toml`, then environment overrides.
pub fn load_config(dir: Option<&Path>) -> Result<Config> {
    Config::from_env(dir).context("Failed to load configuration")
}
