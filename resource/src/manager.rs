use std::str::FromStr;

use anyhow::Result;

use config::ConfigStack;

use crate::Error;

/// Number of cores a login node lets us use for setup-only work.
const LOGIN_NODE_CORES: usize = 4;

/// The kind of job environment we are running under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    /// A plain host with no queue manager; direct or mpirun launch.
    SingleNode,
    /// A shared login node; no parallel launch permitted.
    LoginNode,
    Slurm,
    Pbs,
}

impl FromStr for SchedulerKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "single-node" => Ok(Self::SingleNode),
            "login-node" => Ok(Self::LoginNode),
            "slurm" => Ok(Self::Slurm),
            "pbs" => Ok(Self::Pbs),
            other => Err(Error::UnknownScheduler(other.to_owned())),
        }
    }
}

impl std::fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SingleNode => "single-node",
            Self::LoginNode => "login-node",
            Self::Slurm => "slurm",
            Self::Pbs => "pbs",
        };
        write!(f, "{s}")
    }
}

/// Slot counts computed for one step launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSize {
    /// Slots we'd like to run with.
    pub target_slots: usize,
    /// Fewest slots the step can tolerate.
    pub min_slots: usize,
}

/// Knows what scheduler we're running under and how big the allocation is,
/// and sizes step launches to fit it.
#[derive(Debug)]
pub struct ResourceManager {
    kind: SchedulerKind,
    cores_per_node: usize,
    node_count: usize,
}

impl ResourceManager {
    /// Detect the environment: an explicit `resources.scheduler` config
    /// option wins, then queue-manager environment variables, then we
    /// assume a single node.
    pub fn detect(config: &ConfigStack) -> Result<Self> {
        let kind = match config.get_opt("resources", "scheduler")? {
            Some(name) => name.parse()?,
            None if std::env::var_os("SLURM_JOB_ID").is_some() => SchedulerKind::Slurm,
            None if std::env::var_os("PBS_JOBID").is_some() => SchedulerKind::Pbs,
            None => SchedulerKind::SingleNode,
        };
        let rm = Self::from_kind(kind)?;
        log::info!(
            "detected {} environment: {} cores/node, {} nodes",
            rm.kind,
            rm.cores_per_node,
            rm.node_count
        );
        Ok(rm)
    }

    /// Read the current allocation for a known scheduler kind.
    pub fn from_kind(kind: SchedulerKind) -> Result<Self> {
        let (cores_per_node, node_count) = match kind {
            SchedulerKind::SingleNode => (host_core_count(), 1),
            SchedulerKind::LoginNode => (LOGIN_NODE_CORES, 1),
            SchedulerKind::Slurm => slurm_allocation()?,
            SchedulerKind::Pbs => pbs_allocation()?,
        };
        Ok(Self::with_resources(kind, cores_per_node, node_count))
    }

    /// Build a manager with explicit resources (used by tests and by
    /// plan replay, where we don't want to probe the host).
    pub fn with_resources(kind: SchedulerKind, cores_per_node: usize, node_count: usize) -> Self {
        Self {
            kind,
            cores_per_node,
            node_count,
        }
    }

    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }

    pub fn cores_per_node(&self) -> usize {
        self.cores_per_node
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn total_cores(&self) -> usize {
        self.cores_per_node * self.node_count
    }

    /// Size a step launch: how many slots we want
    /// (`total_units / goal_units_per_slot`, clamped to the allocation) and
    /// how few we can tolerate (`total_units / max_units_per_slot`).
    /// Fails if even the minimum doesn't fit the allocation.
    pub fn compute_job_size(
        &self,
        goal_units_per_slot: u64,
        max_units_per_slot: u64,
        total_units: u64,
    ) -> Result<JobSize, Error> {
        if goal_units_per_slot == 0 {
            return Err(Error::ZeroUnitsPerSlot("goal"));
        }
        if max_units_per_slot == 0 {
            return Err(Error::ZeroUnitsPerSlot("max"));
        }

        let total_cores = self.total_cores();
        let min_raw = div_ceil(total_units, max_units_per_slot) as usize;
        if min_raw > total_cores {
            return Err(Error::Unsatisfiable {
                min_slots: min_raw,
                total_cores,
            });
        }

        let target_raw = div_ceil(total_units, goal_units_per_slot) as usize;
        Ok(JobSize {
            target_slots: target_raw.clamp(1, total_cores),
            min_slots: min_raw.clamp(1, total_cores),
        })
    }
}

fn div_ceil(n: u64, d: u64) -> u64 {
    (n + d - 1) / d
}

fn host_core_count() -> usize {
    std::thread::available_parallelism().map(usize::from).unwrap_or(1)
}

fn slurm_allocation() -> Result<(usize, usize)> {
    let cores = read_env_count("SLURM_CPUS_ON_NODE")?;
    // single-node allocations don't always export the node count:
    let nodes = match std::env::var("SLURM_JOB_NUM_NODES") {
        Ok(v) => parse_count("SLURM_JOB_NUM_NODES", &v)?,
        Err(_) => 1,
    };
    Ok((cores, nodes))
}

fn pbs_allocation() -> Result<(usize, usize)> {
    let nodefile = std::env::var("PBS_NODEFILE").map_err(|e| Error::BadAllocation {
        what: "$PBS_NODEFILE".to_owned(),
        cause: e.to_string(),
    })?;
    let text = std::fs::read_to_string(&nodefile).map_err(|e| Error::BadAllocation {
        what: format!("nodefile {nodefile}"),
        cause: e.to_string(),
    })?;

    // one line per allocated core; distinct hosts give the node count.
    let mut cores = 0;
    let mut hosts = Vec::with_capacity(4);
    for line in text.lines() {
        let host = line.trim();
        if host.is_empty() {
            continue;
        }
        cores += 1;
        if !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_owned());
        }
    }
    if cores == 0 {
        return Err(Error::BadAllocation {
            what: format!("nodefile {nodefile}"),
            cause: "no hosts listed".to_owned(),
        }
        .into());
    }
    let nodes = hosts.len();
    Ok((cores / nodes, nodes))
}

fn read_env_count(var: &str) -> Result<usize> {
    let v = std::env::var(var).map_err(|e| Error::BadAllocation {
        what: format!("${var}"),
        cause: e.to_string(),
    })?;
    parse_count(var, &v)
}

fn parse_count(var: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| {
            Error::BadAllocation {
                what: format!("${var}"),
                cause: format!("'{value}': {e}"),
            }
            .into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_256() -> ResourceManager {
        ResourceManager::with_resources(SchedulerKind::Slurm, 64, 4)
    }

    #[test]
    fn test_job_size_within_allocation() {
        let size = manager_256().compute_job_size(200, 2000, 50_000).unwrap();
        assert_eq!(size.target_slots, 250);
        assert_eq!(size.min_slots, 25);
    }

    #[test]
    fn test_job_size_target_clamped_to_cores() {
        let size = manager_256().compute_job_size(100, 2000, 50_000).unwrap();
        assert_eq!(size.target_slots, 256);
        assert_eq!(size.min_slots, 25);
    }

    #[test]
    fn test_job_size_small_step_gets_one_slot() {
        let size = manager_256().compute_job_size(1000, 1000, 0).unwrap();
        assert_eq!(size.target_slots, 1);
        assert_eq!(size.min_slots, 1);
    }

    #[test]
    fn test_job_size_unsatisfiable() {
        match manager_256().compute_job_size(50, 100, 50_000).unwrap_err() {
            Error::Unsatisfiable {
                min_slots,
                total_cores,
            } => {
                assert_eq!(min_slots, 500);
                assert_eq!(total_cores, 256);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_job_size_zero_units_per_slot_rejected() {
        assert!(manager_256().compute_job_size(0, 100, 10).is_err());
        assert!(manager_256().compute_job_size(100, 0, 10).is_err());
    }

    #[test]
    fn test_scheduler_kind_round_trip() {
        for name in ["single-node", "login-node", "slurm", "pbs"] {
            let kind: SchedulerKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
        assert!("sge".parse::<SchedulerKind>().is_err());
    }

    #[test]
    fn test_detect_honors_explicit_config() {
        let mut config = ConfigStack::default();
        config
            .add_layer("cli", "resources.scheduler = login-node\n")
            .unwrap();
        let rm = ResourceManager::detect(&config).unwrap();
        assert_eq!(rm.kind(), SchedulerKind::LoginNode);
        assert_eq!(rm.total_cores(), LOGIN_NODE_CORES);
    }
}
