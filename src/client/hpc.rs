//! HPC scheduler integration
//!
//! The pipeline manager talks to the cluster only through [`HpcInterface`].
//! [`SlurmInterface`] is the production binding: it writes an sbatch script
//! per job, polls with one `sacct` call per cycle and cancels with `scancel`.

pub mod common;
pub mod hpc_interface;
pub mod slurm_interface;

pub use common::HpcJobInfo;
pub use hpc_interface::HpcInterface;
pub use slurm_interface::SlurmInterface;
