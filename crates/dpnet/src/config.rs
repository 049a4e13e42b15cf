//! CLI configuration: a thin wrapper around `dpnet_config`.
//!
//! Resolves the config path from `--config` and loads it once per
//! invocation.

use std::path::PathBuf;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use dpnet_config::{Config, config_path};

/// The config file this invocation reads.
pub fn active_path(global: &GlobalOpts) -> PathBuf {
    config_path(global.config.as_deref())
}

/// Load and validate the active config file (defaults if it is absent).
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(dpnet_config::load(&active_path(global))?)
}
