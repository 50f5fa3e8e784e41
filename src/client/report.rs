//! Progress snapshots and the end-of-run summary

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::client::job_tracker::{JobRecord, JobTracker};
use crate::models::{JobState, Stage};

const RESET: &str = "\x1b[0m";

/// Timestamp format used in progress snapshots
pub const TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

fn color_code(state: JobState, blocked: bool) -> &'static str {
    if blocked {
        return "\x1b[1;31m";
    }
    match state {
        JobState::Completed => "\x1b[32m",
        JobState::Running => "\x1b[1;36m",
        JobState::Pending => "\x1b[33m",
        JobState::Failed | JobState::NotFound => "\x1b[1;31m",
        JobState::Removed => "\x1b[90m",
        JobState::Unknown => "\x1b[35m",
    }
}

fn render_record(tracker: &JobTracker, record: &JobRecord, color: bool) -> String {
    let blocker = tracker.blocked_by(&record.job_id);
    let mut state = record.state.to_string();
    if record.state == JobState::Running
        && let Some(node) = &record.node
    {
        state = format!("{}@{}", state, node);
    }
    if let Some(blocker) = &blocker {
        state = format!("{}, blocked by {}", state, blocker);
    }
    let text = format!("{} ({})", record.job_id, state);
    if color {
        format!("{}{}{}", color_code(record.state, blocker.is_some()), text, RESET)
    } else {
        text
    }
}

/// Render one snapshot: a timestamp line, then one line per sample with every
/// stage's jobs in submission order.
pub fn render_snapshot(tracker: &JobTracker, timestamp: &str, color: bool) -> String {
    let mut out = String::new();
    out.push_str(timestamp);
    out.push('\n');

    for (sample, stages) in tracker.results() {
        let rendered: Vec<String> = Stage::ALL
            .iter()
            .map(|stage| {
                let jobs: Vec<String> = stages
                    .get(stage)
                    .map(|records| {
                        records
                            .iter()
                            .map(|r| render_record(tracker, r, color))
                            .collect()
                    })
                    .unwrap_or_default();
                format!("{}[{}]", stage.as_str().to_uppercase(), jobs.join(", "))
            })
            .collect();
        out.push_str(&format!("{}\t{}\n", sample, rendered.join("\t")));
    }
    for (sample, reason) in tracker.aborted() {
        out.push_str(&format!("{}\tABORTED: {}\n", sample, reason));
    }
    out
}

/// Prints progress snapshots and keeps a plain-text copy in a progress log
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    log_path: Option<PathBuf>,
    color: bool,
}

impl ProgressReporter {
    pub fn new(log_path: Option<PathBuf>, color: bool) -> Self {
        Self { log_path, color }
    }

    /// Print a snapshot taken at `now`, append it to the progress log and
    /// return whether all work has finished.
    pub fn report(&self, tracker: &JobTracker, now: DateTime<Local>) -> Result<bool> {
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        print!("{}", render_snapshot(tracker, &timestamp, self.color));

        if let Some(path) = &self.log_path {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open progress log {}", path.display()))?;
            file.write_all(render_snapshot(tracker, &timestamp, false).as_bytes())
                .with_context(|| format!("Failed to write progress log {}", path.display()))?;
        }

        Ok(tracker.is_finished())
    }
}

#[derive(Tabled, Debug, Default, Clone, PartialEq, Eq)]
pub struct StageSummaryRow {
    #[tabled(rename = "Stage")]
    pub stage: String,
    #[tabled(rename = "Submitted")]
    pub submitted: usize,
    #[tabled(rename = "Completed")]
    pub completed: usize,
    #[tabled(rename = "Running")]
    pub running: usize,
    #[tabled(rename = "Pending")]
    pub pending: usize,
    #[tabled(rename = "Blocked")]
    pub blocked: usize,
    #[tabled(rename = "Failed")]
    pub failed: usize,
    #[tabled(rename = "Not Found")]
    pub not_found: usize,
    #[tabled(rename = "Removed")]
    pub removed: usize,
}

/// Per-stage job counts across all samples.
pub fn summary_rows(tracker: &JobTracker) -> Vec<StageSummaryRow> {
    Stage::ALL
        .iter()
        .map(|stage| {
            let mut row = StageSummaryRow {
                stage: stage.to_string(),
                ..Default::default()
            };
            for record in tracker
                .results()
                .values()
                .filter_map(|stages| stages.get(stage))
                .flatten()
            {
                row.submitted += 1;
                match record.state {
                    JobState::Completed => row.completed += 1,
                    JobState::Running => row.running += 1,
                    JobState::Pending | JobState::Unknown => {
                        if tracker.blocked_by(&record.job_id).is_some() {
                            row.blocked += 1;
                        } else {
                            row.pending += 1;
                        }
                    }
                    JobState::Failed => row.failed += 1,
                    JobState::NotFound => row.not_found += 1,
                    JobState::Removed => row.removed += 1,
                }
            }
            row
        })
        .collect()
}

/// Table of per-stage counts followed by any aborted samples.
pub fn render_summary(tracker: &JobTracker) -> String {
    let mut table = Table::new(summary_rows(tracker));
    table.with(Style::rounded());
    let mut out = table.to_string();
    out.push('\n');
    if !tracker.aborted().is_empty() {
        out.push_str(&format!("Samples aborted during submission: {}\n", tracker.aborted().len()));
        for (sample, reason) in tracker.aborted() {
            out.push_str(&format!("  {}: {}\n", sample, reason));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::hpc::HpcJobInfo;
    use crate::models::{Dependencies, DependencyMode, JobId};
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn id(value: &str) -> JobId {
        JobId::parse(value).unwrap()
    }

    fn tracker() -> JobTracker {
        let mut tracker = JobTracker::new();
        tracker.register_sample("s1");
        tracker.record_submission("s1", Stage::Converting, id("1"), Dependencies::none());
        tracker.record_submission(
            "s1",
            Stage::Basecalling,
            id("2"),
            Dependencies::new(vec![id("1")], DependencyMode::All),
        );
        tracker
    }

    #[test]
    fn test_snapshot_shows_node_for_running_jobs() {
        let mut tracker = tracker();
        let statuses: HashMap<_, _> = [(
            id("1"),
            HpcJobInfo::new(id("1"), JobState::Running, Some("cpu07".to_string())),
        )]
        .into_iter()
        .collect();
        tracker.reconcile(&statuses);

        let text = render_snapshot(&tracker, "19.10.2026 12:00:00", false);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("19.10.2026 12:00:00"));
        let line = lines.next().unwrap();
        assert!(line.starts_with("s1\tCONVERTING[1 (RUNNING@cpu07)]\tBASECALLING[2 (PENDING)]"));
        assert!(line.ends_with("SV_LOOKUP[]"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn test_snapshot_marks_blocked_jobs() {
        let mut tracker = tracker();
        let statuses: HashMap<_, _> = [
            (id("1"), HpcJobInfo::new(id("1"), JobState::Failed, None)),
            (id("2"), HpcJobInfo::new(id("2"), JobState::Pending, None)),
        ]
        .into_iter()
        .collect();
        tracker.reconcile(&statuses);

        let text = render_snapshot(&tracker, "t", false);
        assert!(text.contains("BASECALLING[2 (PENDING, blocked by 1)]"));
        let colored = render_snapshot(&tracker, "t", true);
        assert!(colored.contains("\x1b[1;31m2 (PENDING, blocked by 1)\x1b[0m"));

        let rows = summary_rows(&tracker);
        assert_eq!(rows[0].failed, 1);
        assert_eq!(rows[1].blocked, 1);
        assert_eq!(rows[1].pending, 0);
    }

    #[test]
    fn test_report_appends_plain_copy() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("progress.log");
        let reporter = ProgressReporter::new(Some(log.clone()), true);
        let tracker = tracker();

        let finished = reporter.report(&tracker, Local::now()).unwrap();
        assert!(!finished);
        reporter.report(&tracker, Local::now()).unwrap();

        let content = std::fs::read_to_string(&log).unwrap();
        assert_eq!(content.matches("s1\tCONVERTING").count(), 2);
        assert!(!content.contains('\x1b'));
    }

    #[test]
    fn test_summary_lists_aborted_samples() {
        let mut tracker = tracker();
        tracker.record_abort("s2", "sbatch rejected basecall_s2_5mCG");
        let summary = render_summary(&tracker);
        assert!(summary.contains("Submitted"));
        assert!(summary.contains("s2: sbatch rejected basecall_s2_5mCG"));
    }
}
