//! Configuration loading for the standalone server binary.
//!
//! The actual `Config` type and its environment-override rules live in
//! `jukeline-core`; this module is just the file-reading glue plus CLI
//! override application, kept out of the library so the library has no
//! opinion on where configuration comes from.

use std::path::Path;

use anyhow::{Context, Result};
use jukeline_core::Config;

/// Loads configuration from a YAML file (or defaults if `path` is `None`),
/// then applies environment variable overrides.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            Config::from_yaml_str(&contents)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        }
        None => Config::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}
