//! Locations of the files a run writes logs to

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const LOG_DIR_NAME: &str = "logs";
pub const PROGRESS_LOG_NAME: &str = "progress.log";

pub fn get_log_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(LOG_DIR_NAME)
}

/// Per-run log file, e.g. `<out>/logs/nanopipe_20261019_120000.log`.
pub fn get_run_log_file(output_dir: &Path, started: DateTime<Local>) -> PathBuf {
    get_log_dir(output_dir).join(format!(
        "nanopipe_{}.log",
        started.format("%Y%m%d_%H%M%S")
    ))
}

/// Append-only copy of every progress snapshot.
pub fn get_progress_log_file(output_dir: &Path) -> PathBuf {
    get_log_dir(output_dir).join(PROGRESS_LOG_NAME)
}
