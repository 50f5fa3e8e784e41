//! Sample discovery
//!
//! Every immediate subdirectory of the input directory is a sample. Its raw
//! file groups are the `fast5_pass` directories below it that directly hold
//! `.fast5` files.

use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::client::errors::DiscoveryError;
use crate::models::Sample;

const RAW_GROUP_DIR: &str = "fast5_pass";
const RAW_EXTENSION: &str = "fast5";

/// Find all samples under `in_dir`, sorted by name.
///
/// Samples without any raw-file group are omitted. Finding no usable sample
/// at all is an error.
pub fn discover_samples(in_dir: &Path) -> Result<Vec<Sample>, DiscoveryError> {
    let entries = fs::read_dir(in_dir).map_err(|source| DiscoveryError::Unreadable {
        path: in_dir.to_path_buf(),
        source,
    })?;

    let mut samples = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };

        let groups = find_raw_groups(&path);
        if groups.is_empty() {
            warn!("No raw data found for sample={} dir={}", name, path.display());
            continue;
        }
        debug!("Discovered sample={} raw_groups={}", name, groups.len());
        samples.push(Sample::new(name, groups));
    }

    if samples.is_empty() {
        return Err(DiscoveryError::NoSamples(in_dir.to_path_buf()));
    }

    samples.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(samples)
}

/// Raw-file groups below one sample directory, deduplicated and sorted.
pub fn find_raw_groups(sample_dir: &Path) -> Vec<PathBuf> {
    let mut groups: Vec<PathBuf> = WalkDir::new(sample_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .is_some_and(|ext| ext == RAW_EXTENSION)
        })
        .filter_map(|e| e.path().parent().map(Path::to_path_buf))
        .filter(|dir| dir.file_name().is_some_and(|n| n == RAW_GROUP_DIR))
        .collect();

    groups.sort();
    groups.dedup();
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_discover_samples() {
        let root = TempDir::new().unwrap();
        let base = root.path();
        touch(&base.join("s2/run_a/fast5_pass/a.fast5"));
        touch(&base.join("s2/run_a/fast5_pass/b.fast5"));
        touch(&base.join("s2/run_b/fast5_pass/c.fast5"));
        touch(&base.join("s1/run/fast5_pass/a.fast5"));
        // Failed reads and stray files are not raw groups
        touch(&base.join("s3/run/fast5_fail/a.fast5"));
        touch(&base.join("s3/run/fast5_pass/notes.txt"));
        touch(&base.join("readme.txt"));

        let samples = discover_samples(base).unwrap();
        let names: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["s1", "s2"]);
        assert_eq!(samples[1].raw_groups.len(), 2);
        assert!(samples[1].raw_groups[0].ends_with("run_a/fast5_pass"));
    }

    #[test]
    fn test_no_samples_is_an_error() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("empty_sample")).unwrap();
        assert!(matches!(
            discover_samples(root.path()),
            Err(DiscoveryError::NoSamples(_))
        ));
    }

    #[test]
    fn test_missing_input_dir() {
        assert!(matches!(
            discover_samples(Path::new("/nonexistent/nanopipe/input")),
            Err(DiscoveryError::Unreadable { .. })
        ));
    }
}
