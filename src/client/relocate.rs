//! Final relocation of result files into their per-extension folders

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::OutputLayout;

/// Counts from one relocation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelocationSummary {
    pub moved: usize,
    pub skipped: usize,
}

/// Move files under the `other` directory into the first relocation target
/// whose extension list matches. Existing destination files are never
/// overwritten.
pub fn relocate_outputs(layout: &OutputLayout) -> Result<RelocationSummary> {
    let mut summary = RelocationSummary::default();
    if !layout.other_dir.exists() {
        debug!("Nothing to relocate, {} does not exist", layout.other_dir.display());
        return Ok(summary);
    }

    let files: Vec<PathBuf> = WalkDir::new(&layout.other_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();

    for file in files {
        let Some(target_dir) = target_for(layout, &file) else {
            continue;
        };
        let Some(file_name) = file.file_name() else {
            continue;
        };
        let destination = target_dir.join(file_name);
        if destination.exists() {
            warn!(
                "Not relocating {}: {} already exists",
                file.display(),
                destination.display()
            );
            summary.skipped += 1;
            continue;
        }

        fs::create_dir_all(target_dir)
            .with_context(|| format!("Failed to create {}", target_dir.display()))?;
        move_file(&file, &destination)?;
        debug!("Relocated {} -> {}", file.display(), destination.display());
        summary.moved += 1;
    }

    info!(
        "Relocation finished moved={} skipped={}",
        summary.moved, summary.skipped
    );
    Ok(summary)
}

/// Matches on the whole file-name suffix so multi-part extensions such as
/// `.vcf.gz` are honoured.
fn target_for<'a>(layout: &'a OutputLayout, file: &Path) -> Option<&'a Path> {
    let name = file.file_name()?.to_string_lossy().to_string();
    layout
        .relocation_targets
        .iter()
        .find(|(_, extensions)| {
            extensions
                .iter()
                .any(|ext| name.ends_with(&format!(".{}", ext.trim_start_matches('.'))))
        })
        .map(|(dir, _)| dir.as_path())
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Cross-device moves cannot be renamed.
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    fs::remove_file(from).with_context(|| format!("Failed to remove {}", from.display()))?;
    Ok(())
}
