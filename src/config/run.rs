//! Control-loop configuration for `nanopipe run`

use serde::{Deserialize, Serialize};

/// Configuration for the scheduling loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,

    /// Seconds to sleep between poll cycles
    pub poll_interval_secs: f64,

    /// Upper bound on any sbatch/sacct/scancel invocation
    pub command_timeout_secs: u64,

    /// Stop polling once every in-flight job is blocked behind a failure
    pub exit_when_stalled: bool,

    /// Cancel in-flight jobs when interrupted with SIGINT/SIGTERM
    pub cancel_on_interrupt: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            poll_interval_secs: 10.0,
            command_timeout_secs: 60,
            exit_when_stalled: false,
            cancel_on_interrupt: false,
        }
    }
}
