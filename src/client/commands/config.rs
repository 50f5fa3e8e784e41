//! Config command: show, initialise and validate configuration files

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};

use super::load_config;
use crate::config::{ConfigPaths, NanopipeConfig};

/// Print the effective configuration after merging every layer.
pub fn show_config(explicit: Option<&Path>) -> Result<()> {
    let config = load_config(explicit)?;
    let paths = ConfigPaths::new();
    let mut sources: Vec<PathBuf> = paths.existing_paths().into_iter().cloned().collect();
    if let Some(path) = explicit {
        sources.push(path.to_path_buf());
    }
    if sources.is_empty() {
        println!("# No configuration files found, showing defaults");
    } else {
        for source in &sources {
            println!("# Loaded {}", source.display());
        }
    }
    println!("{}", config.to_toml()?);
    Ok(())
}

/// Where `config init` writes: the given path, or the user config file.
pub fn init_target(path: Option<&Path>, paths: &ConfigPaths) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path.to_path_buf()),
        None => paths
            .user
            .clone()
            .context("Could not determine the user configuration directory"),
    }
}

/// Write the default configuration. Refuses to overwrite unless `force`.
pub fn init_config(path: Option<&Path>, force: bool) -> Result<PathBuf> {
    let target = init_target(path, &ConfigPaths::new())?;
    if target.exists() && !force {
        bail!(
            "{} already exists, use --force to overwrite it",
            target.display()
        );
    }
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(&target, NanopipeConfig::generate_default_config())
        .with_context(|| format!("Failed to write {}", target.display()))?;
    println!("Wrote default configuration to {}", target.display());
    Ok(target)
}

/// Validate the merged configuration, printing every problem found.
pub fn validate_config(explicit: Option<&Path>) -> Result<()> {
    let config = load_config(explicit)?;
    match config.validate() {
        Ok(()) => {
            println!("Configuration is valid");
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                eprintln!("  - {}", error);
            }
            bail!("Configuration has {} problem(s)", errors.len())
        }
    }
}
