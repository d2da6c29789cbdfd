/// Scheduler environment detection and job sizing
mod manager;
pub use manager::{JobSize, ResourceManager, SchedulerKind};

/// Building launch command lines per scheduler
mod launch;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("step needs at least {min_slots} slots but only {total_cores} cores are available")]
    Unsatisfiable {
        min_slots: usize,
        total_cores: usize,
    },
    #[error("parallel launch is not permitted on a login node")]
    LaunchOnLoginNode,
    #[error("unknown scheduler '{0}' (expected single-node, login-node, slurm or pbs)")]
    UnknownScheduler(String),
    #[error("can't read scheduler allocation from {what}: {cause}")]
    BadAllocation { what: String, cause: String },
    #[error("{0} units-per-slot must be positive")]
    ZeroUnitsPerSlot(&'static str),
}
