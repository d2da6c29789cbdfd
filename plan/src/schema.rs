use serde::{Deserialize, Serialize};

use config::{ConfigOption, ConfigStack};
use workflow::{Registry, Step, Suite, Task};

use crate::Error;

/// Bump when the schema below changes shape.
pub const PLAN_FORMAT_VERSION: u32 = 1;

/// Name of the plan file for a suite, relative to the work dir.
pub fn plan_file_name(suite: &str) -> String {
    format!("{suite}.plan.json")
}

/// Serializable snapshot of a suite's step/task graph, written at setup
/// time and read back by a later runner invocation.
///
/// This file, not the symlinks on disk, is the canonical record of which
/// task refers to which step; materialization can always be regenerated
/// from it. All paths are stored as strings relative to the work dir so the
/// file stays portable and human-inspectable. Field order is fixed and all
/// collections are ordered, so re-deriving a plan from an unchanged graph
/// reproduces the file byte for byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub version: u32,
    pub suite: String,
    pub steps: Vec<PlanStep>,
    pub tasks: Vec<PlanTask>,
    pub aliases: Vec<AliasEdge>,
    pub config: Vec<PlanOption>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Stable id; equals this entry's index in the step table.
    pub id: u32,
    /// Canonical logical path (the registry key).
    pub path: String,
    /// Canonical directory, relative to the work dir.
    pub dir: String,
    pub argv: Vec<String>,
    pub inputs: Vec<PlanNamedPath>,
    pub outputs: Vec<PlanOutput>,
    pub slots: PlanSlots,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNamedPath {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOutput {
    pub name: String,
    pub path: String,
    pub variables: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanSlots {
    pub goal_units_per_slot: u64,
    pub max_units_per_slot: u64,
    pub total_units: u64,
    pub threads_per_slot: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTask {
    pub name: String,
    /// Task subtree, relative to the work dir.
    pub dir: String,
    pub steps: Vec<PlanTaskStep>,
    /// Ids of the steps to actually run, in declaration order.
    pub run: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlanTaskStep {
    pub id: u32,
    pub shared: bool,
}

/// A task-relative alias location pointing at a step's canonical dir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasEdge {
    pub task: String,
    /// Link location, relative to the work dir.
    pub alias: String,
    /// Canonical dir the link points at, relative to the work dir.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanOption {
    pub section: String,
    pub key: String,
    pub value: String,
    pub layer: String,
}

impl From<ConfigOption> for PlanOption {
    fn from(opt: ConfigOption) -> Self {
        Self {
            section: opt.section,
            key: opt.key,
            value: opt.value,
            layer: opt.layer,
        }
    }
}

impl ExecutionPlan {
    /// Rebuild the in-memory graph from the plan, by stable step ids.
    pub fn into_graph(&self) -> Result<(Registry, Suite), Error> {
        let mut registry = Registry::default();
        for (index, ps) in self.steps.iter().enumerate() {
            if ps.id as usize != index {
                return Err(Error::BadStepTable { index, id: ps.id });
            }
            let id = registry.get_or_create(&ps.path, || {
                let mut step = Step::new(&ps.path, ps.argv.clone());
                step.inputs = ps
                    .inputs
                    .iter()
                    .map(|i| workflow::InputSpec {
                        name: i.name.clone(),
                        path: i.path.clone().into(),
                    })
                    .collect();
                step.outputs = ps
                    .outputs
                    .iter()
                    .map(|o| workflow::OutputSpec {
                        name: o.name.clone(),
                        path: o.path.clone().into(),
                        variables: o.variables.clone(),
                    })
                    .collect();
                step.slots = workflow::SlotSpec {
                    goal_units_per_slot: ps.slots.goal_units_per_slot,
                    max_units_per_slot: ps.slots.max_units_per_slot,
                    total_units: ps.slots.total_units,
                    threads_per_slot: ps.slots.threads_per_slot,
                };
                step
            });
            debug_assert_eq!(usize::from(id), index);
        }

        let mut suite = Suite::new(&self.suite);
        for pt in &self.tasks {
            let mut task = Task::new(&pt.name, pt.dir.as_ref());
            for ts in &pt.steps {
                let id = self.check_id(&pt.name, ts.id)?;
                task.add_step(id, ts.shared, &registry)
                    .map_err(|e| Error::InvalidTask(e.to_string()))?;
            }
            if pt.run.len() != pt.steps.len() {
                let run = pt
                    .run
                    .iter()
                    .map(|id| self.check_id(&pt.name, *id))
                    .collect::<Result<_, _>>()?;
                task.set_steps_to_run(run, &registry)
                    .map_err(|e| Error::InvalidTask(e.to_string()))?;
            }
            suite.add_task(task);
        }
        Ok((registry, suite))
    }

    /// A single-layer config stack holding the plan's resolved snapshot.
    pub fn config_stack(&self) -> ConfigStack {
        let mut stack = ConfigStack::default();
        stack.add_resolved_layer(
            "plan",
            self.config
                .iter()
                .map(|o| ((o.section.clone(), o.key.clone()), o.value.clone())),
        );
        stack
    }

    /// Alias edges belonging to the named task.
    pub fn aliases_for<'a>(&'a self, task: &'a str) -> impl Iterator<Item = &'a AliasEdge> {
        self.aliases.iter().filter(move |a| a.task == task)
    }

    fn check_id(&self, task: &str, id: u32) -> Result<workflow::StepId, Error> {
        if (id as usize) < self.steps.len() {
            Ok(workflow::StepId::from(id))
        } else {
            Err(Error::UnknownStepRef {
                task: task.to_owned(),
                id,
            })
        }
    }
}
