//! Slurm scheduler interface implementation

use anyhow::Result;
use log::{debug, error, info, trace, warn};
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use super::common::HpcJobInfo;
use super::hpc_interface::HpcInterface;
use crate::client::errors::{CommandError, SubmissionError};
use crate::client::utils::{CommandOutput, run_command};
use crate::config::SlurmConfig;
use crate::models::{Dependencies, JobId, JobRequest, JobState};

const SACCT_FORMAT: &str = "JobID,State,NodeList";
const INVALID_JOB_ID: &str = "Invalid job id specified";

/// Slurm scheduler implementation
pub struct SlurmInterface {
    config: SlurmConfig,
    timeout: Duration,
    sbatch_regex: Regex,
}

impl SlurmInterface {
    /// Create a new Slurm interface. Every scheduler call is killed after `timeout`.
    pub fn new(config: SlurmConfig, timeout: Duration) -> Result<Self> {
        let sbatch_regex = Regex::new(r"Submitted batch job (\d+)")?;

        Ok(Self {
            config,
            timeout,
            sbatch_regex,
        })
    }

    /// Directory holding the submission script and logs of one job.
    pub fn job_dir(&self, request: &JobRequest) -> PathBuf {
        self.config.working_dir.join(&request.name)
    }

    /// Run a command, retrying non-zero exits up to `num_retries` attempts in total
    fn run_command_with_retries(
        &self,
        cmd: &str,
        args: &[&str],
        num_retries: usize,
        ignore_errors: &[&str],
    ) -> Result<CommandOutput, CommandError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            trace!("Running command: {} {:?} (attempt {})", cmd, args, attempts);

            let output = run_command(cmd, args, self.timeout)?;

            let should_ignore = ignore_errors
                .iter()
                .any(|err| output.stderr.contains(err) || output.stdout.contains(err));

            if output.success() || should_ignore || attempts >= num_retries {
                return Ok(output);
            }

            warn!(
                "Command failed (attempt {}/{}): {} - {}",
                attempts,
                num_retries,
                output.return_code,
                output.stderr.trim()
            );
            thread::sleep(Duration::from_secs(self.config.retry_delay_secs));
        }
    }

    /// Render the sbatch script for a job.
    pub fn render_submission_script(
        &self,
        request: &JobRequest,
        dependencies: &Dependencies,
    ) -> String {
        let job_dir = self.job_dir(request);
        let resources = &request.resources;

        let mut script = format!(
            "#!/bin/bash\n\
             #SBATCH --job-name={}\n\
             #SBATCH --partition={}\n\
             #SBATCH --nodes={}\n\
             #SBATCH --ntasks={}\n\
             #SBATCH --cpus-per-task={}\n",
            request.name,
            request.partition,
            resources.nodes,
            resources.ntasks,
            resources.cpus_per_task,
        );

        if let Some(memory) = &resources.memory {
            script.push_str(&format!("#SBATCH --mem={}\n", memory));
        }
        if let Some(accelerator) = &resources.accelerator {
            script.push_str(&format!("#SBATCH --gres=gpu:{}\n", accelerator.count));
        }
        script.push_str(&format!("#SBATCH --chdir={}\n", job_dir.display()));
        script.push_str(&format!(
            "#SBATCH --output={}/%x_%j.out\n",
            job_dir.display()
        ));
        script.push_str(&format!("#SBATCH --error={}/%x_%j.err\n", job_dir.display()));
        if !resources.exclude_nodes.is_empty() {
            script.push_str(&format!(
                "#SBATCH --exclude={}\n",
                resources.exclude_nodes.join(",")
            ));
        }
        if let Some(expression) = dependencies.to_slurm_expression() {
            script.push_str(&format!("#SBATCH --dependency={}\n", expression));
        }

        script.push('\n');
        script.push_str(&request.command);
        script.push('\n');
        script
    }

    /// Write the submission script to `filename` and make it executable.
    pub fn create_submission_script(
        &self,
        request: &JobRequest,
        dependencies: &Dependencies,
        filename: &Path,
    ) -> std::io::Result<()> {
        if let Some(parent) = filename.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(filename, self.render_submission_script(request, dependencies))?;

        #[cfg(unix)]
        {
            let mut perms = fs::metadata(filename)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(filename, perms)?;
        }

        debug!("Created submission script: {:?}", filename);
        Ok(())
    }

    /// Parse `sacct -P` output (`JobID|State|NodeList` per line).
    pub fn parse_sacct_output(stdout: &str) -> HashMap<JobId, HpcJobInfo> {
        let mut statuses = HashMap::new();
        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < 2 {
                warn!("Skipping malformed sacct line: {}", line);
                continue;
            }

            let Some(job_id) = JobId::parse(fields[0]) else {
                // Job steps such as 123.batch are reported without -X; ignore them
                trace!("Skipping sacct line for non-allocation id: {}", fields[0]);
                continue;
            };
            let node = fields
                .get(2)
                .map(|n| n.trim())
                .filter(|n| !n.is_empty() && *n != "None assigned" && *n != "(null)")
                .map(|n| n.to_string());

            let info = HpcJobInfo::new(job_id.clone(), JobState::from_slurm(fields[1]), node);
            statuses.insert(job_id, info);
        }
        statuses
    }
}

impl HpcInterface for SlurmInterface {
    fn submit(
        &self,
        request: &JobRequest,
        dependencies: &Dependencies,
    ) -> Result<JobId, SubmissionError> {
        let script_path = self.job_dir(request).join(format!("{}.sh", request.name));
        self.create_submission_script(request, dependencies, &script_path)
            .map_err(|source| SubmissionError::Script {
                path: script_path.clone(),
                source,
            })?;

        let script = script_path.to_string_lossy();
        let output = self
            .run_command_with_retries(
                &self.config.sbatch,
                &[&script],
                self.config.submit_retries,
                &[],
            )
            .map_err(|source| SubmissionError::Command {
                job_name: request.name.clone(),
                source,
            })?;

        if !output.success() {
            return Err(SubmissionError::Rejected {
                job_name: request.name.clone(),
                return_code: output.return_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        let job_id = self
            .sbatch_regex
            .captures(&output.stdout)
            .and_then(|captures| captures.get(1))
            .and_then(|m| JobId::parse(m.as_str()));

        match job_id {
            Some(job_id) => {
                info!("Job {} submitted with ID {}", request.name, job_id);
                Ok(job_id)
            }
            None => {
                error!("Failed to parse sbatch output: {}", output.stdout);
                Err(SubmissionError::MissingJobId {
                    job_name: request.name.clone(),
                    output: output.stdout.trim().to_string(),
                })
            }
        }
    }

    fn get_statuses(&self, job_ids: &[JobId]) -> Result<HashMap<JobId, HpcJobInfo>> {
        if job_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let ids: Vec<&str> = job_ids.iter().map(|id| id.as_str()).collect();
        let id_list = ids.join(",");
        let format = format!("--format={}", SACCT_FORMAT);

        let output = self.run_command_with_retries(
            &self.config.sacct,
            &["-n", "-P", "-X", "-j", &id_list, &format],
            1,
            &[],
        )?;

        if !output.success() {
            return Err(anyhow::anyhow!(
                "sacct command failed: {} - {}",
                output.return_code,
                output.stderr.trim()
            ));
        }

        trace!("sacct output: [{}]", output.stdout);
        Ok(Self::parse_sacct_output(&output.stdout))
    }

    fn cancel_job(&self, job_id: &JobId) -> Result<i32> {
        let output = self.run_command_with_retries(
            &self.config.scancel,
            &[job_id.as_str()],
            1,
            &[INVALID_JOB_ID],
        )?;

        if output.stderr.contains(INVALID_JOB_ID) {
            debug!("Slurm job {} no longer known to the scheduler", job_id);
        } else if output.return_code != 0 {
            error!(
                "Failed to cancel Slurm job {}: {}",
                job_id,
                output.stderr.trim()
            );
        } else {
            info!("Canceled Slurm job {}", job_id);
        }

        Ok(output.return_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AcceleratorBinding, DependencyMode, ResourceShape};

    fn interface() -> SlurmInterface {
        let config = SlurmConfig {
            working_dir: PathBuf::from("/scratch/slurm"),
            ..Default::default()
        };
        SlurmInterface::new(config, Duration::from_secs(5)).unwrap()
    }

    fn request() -> JobRequest {
        JobRequest {
            name: "basecall_s1_5mCG".to_string(),
            partition: "gpu_nodes".to_string(),
            command: "dorado basecaller model /pod5/s1/ > /ubam/s1/s1_5mCG.ubam".to_string(),
            resources: ResourceShape {
                cpus_per_task: 8,
                memory: Some("64G".to_string()),
                accelerator: Some(AcceleratorBinding {
                    token: "cuda:0,1".to_string(),
                    count: 2,
                }),
                exclude_nodes: vec!["dgx10".to_string(), "dgx11".to_string()],
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_script_contains_all_directives() {
        let deps = Dependencies::new(
            vec![JobId::parse("10").unwrap(), JobId::parse("11").unwrap()],
            DependencyMode::All,
        );
        let script = interface().render_submission_script(&request(), &deps);

        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH --job-name=basecall_s1_5mCG\n"));
        assert!(script.contains("#SBATCH --partition=gpu_nodes\n"));
        assert!(script.contains("#SBATCH --nodes=1\n"));
        assert!(script.contains("#SBATCH --ntasks=1\n"));
        assert!(script.contains("#SBATCH --cpus-per-task=8\n"));
        assert!(script.contains("#SBATCH --mem=64G\n"));
        assert!(script.contains("#SBATCH --gres=gpu:2\n"));
        assert!(script.contains("#SBATCH --chdir=/scratch/slurm/basecall_s1_5mCG\n"));
        assert!(script.contains("#SBATCH --exclude=dgx10,dgx11\n"));
        assert!(script.contains("#SBATCH --dependency=afterok:10:11\n"));
        assert!(script.ends_with("\n\ndorado basecaller model /pod5/s1/ > /ubam/s1/s1_5mCG.ubam\n"));
    }

    #[test]
    fn test_script_without_dependencies_or_exclusions() {
        let mut req = request();
        req.resources.exclude_nodes.clear();
        req.resources.memory = None;
        let script = interface().render_submission_script(&req, &Dependencies::none());

        assert!(!script.contains("--dependency"));
        assert!(!script.contains("--exclude"));
        assert!(!script.contains("--mem"));
        assert!(script.contains("#SBATCH --chdir=/scratch/slurm/basecall_s1_5mCG\n"));
    }

    #[test]
    fn test_any_of_dependency_expression_in_script() {
        let deps = Dependencies::new(
            vec![JobId::parse("20").unwrap(), JobId::parse("21").unwrap()],
            DependencyMode::Any,
        );
        let script = interface().render_submission_script(&request(), &deps);
        assert!(script.contains("#SBATCH --dependency=afterok:20?21\n"));
    }

    #[test]
    fn test_parse_sacct_output() {
        let stdout = "101|COMPLETED|cpu01\n\
                      102|RUNNING|dgx02\n\
                      103|PENDING|None assigned\n\
                      104|CANCELLED by 1000|cpu03\n\
                      104.batch|CANCELLED|cpu03\n\
                      garbage\n\n";
        let statuses = SlurmInterface::parse_sacct_output(stdout);

        assert_eq!(statuses.len(), 4);
        let running = &statuses[&JobId::parse("102").unwrap()];
        assert_eq!(running.state, JobState::Running);
        assert_eq!(running.node.as_deref(), Some("dgx02"));
        let pending = &statuses[&JobId::parse("103").unwrap()];
        assert_eq!(pending.state, JobState::Pending);
        assert!(pending.node.is_none());
        assert_eq!(
            statuses[&JobId::parse("104").unwrap()].state,
            JobState::Removed
        );
    }

    #[test]
    fn test_get_statuses_with_no_jobs_makes_no_call() {
        let config = SlurmConfig {
            sacct: "/nonexistent/sacct".to_string(),
            ..Default::default()
        };
        let slurm = SlurmInterface::new(config, Duration::from_secs(1)).unwrap();
        assert!(slurm.get_statuses(&[]).unwrap().is_empty());
    }
}
