use std::path::{Path, PathBuf};

use crate::{Error, Registry, StepId};

/// One step reference inside a task. `shared` marks steps whose canonical
/// instance is also referenced by another task; a task never mutates a
/// shared step's identity.
#[derive(Debug, Clone, Copy)]
pub struct TaskStep {
    pub id: StepId,
    pub shared: bool,
}

/// A named, ordered list of step references forming one end-to-end test.
///
/// Steps execute strictly in `add_step` order; later steps are assumed to
/// consume earlier steps' outputs, so a failure aborts the rest of the task.
#[derive(Debug, Clone)]
pub struct Task {
    pub name: String,
    /// Directory of this task's subtree, relative to the work dir.
    pub dir: PathBuf,
    steps: Vec<TaskStep>,
    /// Subset of steps to actually run, or `None` for all of them.
    run_only: Option<Vec<StepId>>,
}

impl Task {
    pub fn new(name: &str, dir: &Path) -> Self {
        Self {
            name: name.to_owned(),
            dir: dir.to_path_buf(),
            steps: Vec::with_capacity(8),
            run_only: None,
        }
    }

    /// Append a step reference. Order of calls is the execution order.
    pub fn add_step(&mut self, id: StepId, shared: bool, registry: &Registry) -> Result<(), Error> {
        if self.steps.iter().any(|s| s.id == id) {
            return Err(Error::DuplicateStepInTask {
                task: self.name.clone(),
                step: registry.get(id).path().to_owned(),
            });
        }
        self.steps.push(TaskStep { id, shared });
        Ok(())
    }

    pub fn steps(&self) -> &[TaskStep] {
        &self.steps
    }

    /// Restrict the run to a subset of this task's steps. The subset keeps
    /// declaration order regardless of the order given here.
    pub fn set_steps_to_run(
        &mut self,
        ids: Vec<StepId>,
        registry: &Registry,
    ) -> Result<(), Error> {
        for id in &ids {
            if !self.steps.iter().any(|s| s.id == *id) {
                return Err(Error::RunStepNotInTask {
                    task: self.name.clone(),
                    step: registry.get(*id).path().to_owned(),
                });
            }
        }
        let ordered = self
            .steps
            .iter()
            .map(|s| s.id)
            .filter(|id| ids.contains(id))
            .collect();
        self.run_only = Some(ordered);
        Ok(())
    }

    /// Ids of the steps that will run, in declaration order.
    pub fn steps_to_run(&self) -> Vec<StepId> {
        match &self.run_only {
            Some(ids) => ids.clone(),
            None => self.steps.iter().map(|s| s.id).collect(),
        }
    }

    pub fn references(&self, id: StepId) -> bool {
        self.steps.iter().any(|s| s.id == id)
    }
}

/// A named, ordered collection of tasks, typically run together for
/// regression comparison. Tasks run strictly in list order.
#[derive(Debug, Clone, Default)]
pub struct Suite {
    pub name: String,
    pub tasks: Vec<Task>,
}

impl Suite {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            tasks: Vec::with_capacity(4),
        }
    }

    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn task(&self, name: &str) -> Result<&Task, Error> {
        self.tasks
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::TaskNotFound {
                suite: self.name.clone(),
                task: name.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Step;

    fn registry_with(paths: &[&str]) -> (Registry, Vec<StepId>) {
        let mut registry = Registry::default();
        let ids = paths
            .iter()
            .map(|p| registry.get_or_create(p, || Step::new(p, vec!["true".to_owned()])))
            .collect();
        (registry, ids)
    }

    #[test]
    fn test_steps_keep_add_order() {
        let (registry, ids) = registry_with(&["c", "a", "b"]);
        let mut task = Task::new("t", Path::new("t"));
        for id in &ids {
            task.add_step(*id, false, &registry).unwrap();
        }
        let order: Vec<StepId> = task.steps().iter().map(|s| s.id).collect();
        assert_eq!(order, ids);
        assert_eq!(task.steps_to_run(), ids);
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let (registry, ids) = registry_with(&["a"]);
        let mut task = Task::new("t", Path::new("t"));
        task.add_step(ids[0], false, &registry).unwrap();
        assert!(task.add_step(ids[0], true, &registry).is_err());
    }

    #[test]
    fn test_steps_to_run_subset_keeps_declaration_order() {
        let (registry, ids) = registry_with(&["a", "b", "c"]);
        let mut task = Task::new("t", Path::new("t"));
        for id in &ids {
            task.add_step(*id, false, &registry).unwrap();
        }
        // request out of declaration order:
        task.set_steps_to_run(vec![ids[2], ids[0]], &registry).unwrap();
        assert_eq!(task.steps_to_run(), vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_steps_to_run_rejects_foreign_step() {
        let (registry, ids) = registry_with(&["a", "b"]);
        let mut task = Task::new("t", Path::new("t"));
        task.add_step(ids[0], false, &registry).unwrap();
        assert!(task
            .set_steps_to_run(vec![ids[1]], &registry)
            .is_err());
    }
}
