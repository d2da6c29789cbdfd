use std::path::PathBuf;

use crate::Error;

/// Where a step is in its lifecycle. Runner checks these before calling
/// hooks; the hooks themselves are not expected to be reentrant.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    #[default]
    NotStarted,
    SettingUp,
    SetupComplete,
    Running,
    RunComplete,
    Failed,
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not-started",
            Self::SettingUp => "setting-up",
            Self::SetupComplete => "setup-complete",
            Self::Running => "running",
            Self::RunComplete => "run-complete",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A declared input: logical name plus the path it depends on.
/// Relative paths are resolved against the step's canonical dir.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub name: String,
    pub path: PathBuf,
}

/// A declared output: logical name, path relative to the step's canonical
/// dir, and the variables in it to validate (may be empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub name: String,
    pub path: PathBuf,
    pub variables: Vec<String>,
}

/// Scheduler-agnostic sizing declaration for a step's launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpec {
    /// Work units we'd like each slot to handle.
    pub goal_units_per_slot: u64,
    /// Most work units a slot can handle.
    pub max_units_per_slot: u64,
    /// Total work units in this step.
    pub total_units: u64,
    /// Threads each slot should run with.
    pub threads_per_slot: usize,
}

impl Default for SlotSpec {
    fn default() -> Self {
        Self {
            goal_units_per_slot: 1,
            max_units_per_slot: 1,
            total_units: 1,
            threads_per_slot: 1,
        }
    }
}

/// The smallest executable unit of work.
///
/// Construction is cheap and does no I/O; all filesystem work happens in
/// the setup/run/validate hooks driven by the runner. One `Step` exists per
/// canonical path (enforced by the `Registry`), so a step shared between
/// tasks runs at most once.
#[derive(Debug, Clone)]
pub struct Step {
    /// Canonical logical path; the registry key.
    path: String,
    /// Argv of the external unit of work.
    pub argv: Vec<String>,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    pub slots: SlotSpec,
    state: StepState,
}

impl Step {
    pub fn new(path: &str, argv: Vec<String>) -> Self {
        Self {
            path: path.to_owned(),
            argv,
            inputs: Vec::with_capacity(0),
            outputs: Vec::with_capacity(0),
            slots: SlotSpec::default(),
            state: StepState::NotStarted,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    pub fn begin_setup(&mut self) -> Result<(), Error> {
        self.transition(StepState::NotStarted, StepState::SettingUp)
    }

    pub fn finish_setup(&mut self) -> Result<(), Error> {
        self.transition(StepState::SettingUp, StepState::SetupComplete)
    }

    pub fn begin_run(&mut self) -> Result<(), Error> {
        self.transition(StepState::SetupComplete, StepState::Running)
    }

    pub fn finish_run(&mut self) -> Result<(), Error> {
        self.transition(StepState::Running, StepState::RunComplete)
    }

    /// Hook failure from any non-terminal state.
    pub fn mark_failed(&mut self) {
        log::debug!("step '{}' failed in state {}", self.path, self.state);
        self.state = StepState::Failed;
    }

    /// A prior runner invocation left a successful exit_code file, so this
    /// step is already done.
    pub fn mark_complete_from_disk(&mut self) -> Result<(), Error> {
        self.transition(StepState::NotStarted, StepState::RunComplete)
    }

    fn transition(&mut self, from: StepState, to: StepState) -> Result<(), Error> {
        if self.state != from {
            return Err(Error::BadTransition {
                path: self.path.clone(),
                from: self.state,
                to,
            });
        }
        log::trace!("step '{}': {} -> {}", self.path, from, to);
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let mut step = Step::new("mesh", vec!["genmesh".to_owned()]);
        assert_eq!(step.state(), StepState::NotStarted);
        step.begin_setup().unwrap();
        step.finish_setup().unwrap();
        step.begin_run().unwrap();
        step.finish_run().unwrap();
        assert_eq!(step.state(), StepState::RunComplete);
    }

    #[test]
    fn test_run_before_setup_rejected() {
        let mut step = Step::new("mesh", vec!["genmesh".to_owned()]);
        match step.begin_run().unwrap_err() {
            Error::BadTransition { path, from, to } => {
                assert_eq!(path, "mesh");
                assert_eq!(from, StepState::NotStarted);
                assert_eq!(to, StepState::Running);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_setup_not_repeatable() {
        let mut step = Step::new("mesh", vec!["genmesh".to_owned()]);
        step.begin_setup().unwrap();
        step.finish_setup().unwrap();
        assert!(step.begin_setup().is_err());
    }

    #[test]
    fn test_failure_from_running() {
        let mut step = Step::new("mesh", vec!["genmesh".to_owned()]);
        step.begin_setup().unwrap();
        step.finish_setup().unwrap();
        step.begin_run().unwrap();
        step.mark_failed();
        assert_eq!(step.state(), StepState::Failed);
        assert!(step.begin_run().is_err());
    }
}
