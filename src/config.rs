//! Layered TOML configuration
//!
//! Files are read in priority order (system, user, local, then an explicit
//! `--config` file). Later files override earlier ones key by key; anything
//! not set anywhere keeps its default.

pub mod layout;
pub mod pipeline;
pub mod run;
pub mod slurm;

pub use layout::{DirectorySpec, LayoutConfig, OutputLayout};
pub use pipeline::{PipelineConfig, StageResources};
pub use run::RunConfig;
pub use slurm::SlurmConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::client::tool_commands::variant_tag;

const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Upper bound on the pause between poll cycles
pub const MAX_POLL_INTERVAL_SECS: f64 = 86_400.0;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NanopipeConfig {
    pub run: RunConfig,
    pub slurm: SlurmConfig,
    pub pipeline: PipelineConfig,
    pub layout: LayoutConfig,
}

/// Locations searched for configuration files
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub system: PathBuf,
    pub user: Option<PathBuf>,
    pub local: PathBuf,
}

impl ConfigPaths {
    pub fn new() -> Self {
        Self {
            system: PathBuf::from("/etc/nanopipe/config.toml"),
            user: dirs::config_dir().map(|dir| dir.join("nanopipe").join("config.toml")),
            local: PathBuf::from("nanopipe.toml"),
        }
    }

    /// Paths that exist, lowest priority first.
    pub fn existing_paths(&self) -> Vec<&PathBuf> {
        let mut paths = vec![&self.system];
        if let Some(user) = &self.user {
            paths.push(user);
        }
        paths.push(&self.local);
        paths.into_iter().filter(|p| p.exists()).collect()
    }

    pub fn user_config_dir(&self) -> Option<&Path> {
        self.user.as_deref().and_then(Path::parent)
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl NanopipeConfig {
    /// Load from the standard locations.
    pub fn load() -> Result<Self> {
        Self::load_with_paths(&ConfigPaths::new())
    }

    pub fn load_with_paths(paths: &ConfigPaths) -> Result<Self> {
        let files: Vec<PathBuf> = paths.existing_paths().into_iter().cloned().collect();
        Self::load_from_files(&files)
    }

    /// Merge the given files in order. Missing files are skipped.
    pub fn load_from_files(files: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Table::new();
        for path in files {
            if !path.exists() {
                continue;
            }
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let table: toml::Table = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            merge_tables(&mut merged, table);
        }

        toml::Value::Table(merged)
            .try_into()
            .context("Invalid configuration")
    }

    /// Check every setting, returning all problems found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !LOG_LEVELS.contains(&self.run.log_level.as_str()) {
            errors.push(format!(
                "run.log_level must be one of {:?}, got '{}'",
                LOG_LEVELS, self.run.log_level
            ));
        }
        let poll_interval = self.run.poll_interval_secs;
        if !poll_interval.is_finite() || poll_interval <= 0.0 {
            errors.push("run.poll_interval_secs must be a positive number".to_string());
        } else if poll_interval > MAX_POLL_INTERVAL_SECS {
            errors.push(format!(
                "run.poll_interval_secs must not exceed {} seconds",
                MAX_POLL_INTERVAL_SECS
            ));
        }
        if self.run.command_timeout_secs == 0 {
            errors.push("run.command_timeout_secs must be positive".to_string());
        }

        if self.slurm.cpu_partition.is_empty() {
            errors.push("slurm.cpu_partition must not be empty".to_string());
        }
        if self.slurm.gpu_partition.is_empty() {
            errors.push("slurm.gpu_partition must not be empty".to_string());
        }
        if self.slurm.submit_retries == 0 {
            errors.push("slurm.submit_retries must be at least 1".to_string());
        }

        let pipeline = &self.pipeline;
        if pipeline.variants.is_empty() {
            errors.push("pipeline.variants must name at least one variant".to_string());
        }
        let mut tags: HashMap<String, &str> = HashMap::new();
        for variant in &pipeline.variants {
            let tag = variant_tag(variant);
            if let Some(previous) = tags.insert(tag.clone(), variant.as_str()) {
                errors.push(format!(
                    "pipeline.variants '{}' and '{}' both map to job and file tag '{}'",
                    previous, variant, tag
                ));
            }
        }
        if pipeline.lanes == 0 {
            errors.push("pipeline.lanes must be at least 1".to_string());
        } else if pipeline.gpu_devices.len() < pipeline.lanes {
            errors.push(format!(
                "pipeline.gpu_devices has {} devices, fewer than {} lanes",
                pipeline.gpu_devices.len(),
                pipeline.lanes
            ));
        }
        for stage in crate::models::Stage::ALL {
            let resources = pipeline.stage(stage);
            if resources.tasks_per_machine == 0 {
                errors.push(format!("pipeline.{}.tasks_per_machine must be positive", stage));
            }
            if resources.max_threads == 0 {
                errors.push(format!("pipeline.{}.max_threads must be positive", stage));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Commented default configuration for `nanopipe config init`.
    pub fn generate_default_config() -> String {
        let body = Self::default()
            .to_toml()
            .unwrap_or_else(|e| format!("# failed to render defaults: {}\n", e));
        format!(
            "# nanopipe configuration\n\
             # Searched in /etc/nanopipe/config.toml, ~/.config/nanopipe/config.toml and ./nanopipe.toml\n\n{}",
            body
        )
    }
}

/// Recursively overlay `overlay` onto `base`.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: toml::Table = toml::from_str("[run]\nlog_level = \"debug\"\npoll_interval_secs = 5.0").unwrap();
        let overlay: toml::Table = toml::from_str("[run]\npoll_interval_secs = 2.0").unwrap();
        merge_tables(&mut base, overlay);
        let run = base["run"].as_table().unwrap();
        assert_eq!(run["log_level"].as_str(), Some("debug"));
        assert_eq!(run["poll_interval_secs"].as_float(), Some(2.0));
    }
}
