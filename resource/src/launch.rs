use std::process::Command;

use crate::{Error, ResourceManager, SchedulerKind};

impl ResourceManager {
    /// Argv prefix that launches `slots` parallel ranks under the detected
    /// scheduler. Empty for a plain single-rank exec.
    pub fn launch_prefix(&self, slots: usize, threads_per_slot: usize) -> Result<Vec<String>, Error> {
        let prefix = match self.kind() {
            SchedulerKind::LoginNode if slots > 1 => return Err(Error::LaunchOnLoginNode),
            SchedulerKind::LoginNode => Vec::with_capacity(0),
            SchedulerKind::SingleNode if slots == 1 => Vec::with_capacity(0),
            SchedulerKind::SingleNode => {
                vec!["mpirun".to_owned(), "-np".to_owned(), slots.to_string()]
            }
            SchedulerKind::Slurm => vec![
                "srun".to_owned(),
                "-n".to_owned(),
                slots.to_string(),
                "--cpus-per-task".to_owned(),
                threads_per_slot.to_string(),
            ],
            SchedulerKind::Pbs => vec!["mpiexec".to_owned(), "-n".to_owned(), slots.to_string()],
        };
        Ok(prefix)
    }

    /// Build the full launch command for a step: scheduler prefix, then the
    /// step's own argv. Thread count is passed via `OMP_NUM_THREADS`.
    pub fn build_launch_command(
        &self,
        argv: &[String],
        slots: usize,
        threads_per_slot: usize,
    ) -> Result<Command, Error> {
        debug_assert!(!argv.is_empty());

        let prefix = self.launch_prefix(slots, threads_per_slot)?;
        let mut words = prefix.iter().chain(argv.iter());

        // prefix is empty for direct exec, so the program may come from argv:
        let mut cmd = Command::new(words.next().unwrap());
        for word in words {
            cmd.arg(word);
        }
        cmd.env("OMP_NUM_THREADS", threads_per_slot.to_string());
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(kind: SchedulerKind, slots: usize) -> Result<Vec<String>, Error> {
        ResourceManager::with_resources(kind, 64, 4).launch_prefix(slots, 2)
    }

    #[test]
    fn test_single_node_single_slot_is_direct_exec() {
        assert!(prefix(SchedulerKind::SingleNode, 1).unwrap().is_empty());
    }

    #[test]
    fn test_single_node_parallel_uses_mpirun() {
        assert_eq!(
            prefix(SchedulerKind::SingleNode, 8).unwrap(),
            ["mpirun", "-np", "8"]
        );
    }

    #[test]
    fn test_slurm_uses_srun() {
        assert_eq!(
            prefix(SchedulerKind::Slurm, 16).unwrap(),
            ["srun", "-n", "16", "--cpus-per-task", "2"]
        );
    }

    #[test]
    fn test_pbs_uses_mpiexec() {
        assert_eq!(
            prefix(SchedulerKind::Pbs, 16).unwrap(),
            ["mpiexec", "-n", "16"]
        );
    }

    #[test]
    fn test_login_node_refuses_parallel_launch() {
        assert!(matches!(
            prefix(SchedulerKind::LoginNode, 2),
            Err(Error::LaunchOnLoginNode)
        ));
        assert!(prefix(SchedulerKind::LoginNode, 1).unwrap().is_empty());
    }

    #[test]
    fn test_build_launch_command_appends_argv() {
        let rm = ResourceManager::with_resources(SchedulerKind::Slurm, 64, 4);
        let argv = vec!["solver".to_owned(), "--case".to_owned(), "a".to_owned()];
        let cmd = rm.build_launch_command(&argv, 4, 2).unwrap();
        assert_eq!(cmd.get_program(), "srun");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args, ["-n", "4", "--cpus-per-task", "2", "solver", "--case", "a"]);
    }
}
