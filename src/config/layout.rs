//! Output directory layout

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One named output directory and the file extensions that belong in it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirectorySpec {
    pub name: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl DirectorySpec {
    fn new(name: &str, extensions: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Names of the stage output directories below the output root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    pub pod5: DirectorySpec,
    pub ubam: DirectorySpec,
    pub bam: DirectorySpec,
    /// Where lookup stages write; swept by the final relocation pass
    pub other: DirectorySpec,
    /// Extra destinations for files relocated out of `other`
    pub relocation: Vec<DirectorySpec>,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            pod5: DirectorySpec::new("pod5", &[".pod5"]),
            ubam: DirectorySpec::new("ubam", &[".ubam"]),
            bam: DirectorySpec::new("bam", &[".bam", ".bam.bai"]),
            other: DirectorySpec::new("other", &[]),
            relocation: vec![
                DirectorySpec::new("vcf", &[".vcf", ".vcf.gz", ".vcf.gz.tbi"]),
                DirectorySpec::new("bed", &[".bed", ".bed.gz"]),
            ],
        }
    }
}

impl LayoutConfig {
    /// Resolve directory names against the output root.
    pub fn resolve(&self, out_dir: &Path) -> OutputLayout {
        let mut targets: Vec<(PathBuf, Vec<String>)> = [&self.pod5, &self.ubam, &self.bam]
            .into_iter()
            .chain(self.relocation.iter())
            .map(|spec| (out_dir.join(&spec.name), spec.extensions.clone()))
            .collect();
        targets.retain(|(_, extensions)| !extensions.is_empty());

        OutputLayout {
            pod5_dir: out_dir.join(&self.pod5.name),
            ubam_dir: out_dir.join(&self.ubam.name),
            bam_dir: out_dir.join(&self.bam.name),
            other_dir: out_dir.join(&self.other.name),
            relocation_targets: targets,
        }
    }
}

/// Absolute output directories for one run
#[derive(Debug, Clone, PartialEq)]
pub struct OutputLayout {
    pub pod5_dir: PathBuf,
    pub ubam_dir: PathBuf,
    pub bam_dir: PathBuf,
    pub other_dir: PathBuf,
    /// Destination directory and the extensions routed to it
    pub relocation_targets: Vec<(PathBuf, Vec<String>)>,
}

impl OutputLayout {
    /// Every directory that must exist before jobs are submitted.
    pub fn all_dirs(&self) -> Vec<&Path> {
        let mut dirs: Vec<&Path> = vec![
            &self.pod5_dir,
            &self.ubam_dir,
            &self.bam_dir,
            &self.other_dir,
        ];
        for (dir, _) in &self.relocation_targets {
            if !dirs.contains(&dir.as_path()) {
                dirs.push(dir);
            }
        }
        dirs
    }
}
