use std::path::{Path, PathBuf};

use config::ConfigOption;
use workflow::{Registry, Suite};

use crate::schema::{
    AliasEdge, ExecutionPlan, PlanNamedPath, PlanOutput, PlanSlots, PlanStep, PlanTask,
    PlanTaskStep,
};
use crate::{Error, PLAN_FORMAT_VERSION};

/// Computes each step's canonical directory and the alias locations other
/// tasks need, and snapshots the whole graph as an `ExecutionPlan`.
pub struct Planner<'a> {
    registry: &'a Registry,
    suite: &'a Suite,
}

impl<'a> Planner<'a> {
    pub fn new(registry: &'a Registry, suite: &'a Suite) -> Self {
        Self { registry, suite }
    }

    /// Derive the plan. Deterministic: an unchanged graph and config
    /// snapshot produce an identical plan, down to the serialized bytes.
    pub fn plan(&self, config: Vec<ConfigOption>) -> Result<ExecutionPlan, Error> {
        let mut steps = Vec::with_capacity(self.registry.len());
        let mut aliases = Vec::with_capacity(4);

        for (id, step) in self.registry.iter() {
            let referencing: Vec<_> = self
                .suite
                .tasks
                .iter()
                .filter(|t| t.references(id))
                .collect();

            // the canonical dir is the shallowest dir common to every
            // referencing task, with the step's own name appended:
            let common = common_prefix(referencing.iter().map(|t| t.dir.as_path()));
            let canonical = common.join(step.path());
            log::debug!(
                "step '{}' canonical dir {:?} ({} referencing tasks)",
                step.path(),
                canonical,
                referencing.len()
            );

            for task in &referencing {
                if canonical.starts_with(&task.dir) {
                    continue;
                }
                aliases.push(AliasEdge {
                    task: task.name.clone(),
                    alias: path_str(&task.dir.join(step.path()))?,
                    target: path_str(&canonical)?,
                });
            }

            steps.push(PlanStep {
                id: u32::from(id),
                path: step.path().to_owned(),
                dir: path_str(&canonical)?,
                argv: step.argv.clone(),
                inputs: step
                    .inputs
                    .iter()
                    .map(|i| {
                        Ok(PlanNamedPath {
                            name: i.name.clone(),
                            path: path_str(&i.path)?,
                        })
                    })
                    .collect::<Result<_, Error>>()?,
                outputs: step
                    .outputs
                    .iter()
                    .map(|o| {
                        Ok(PlanOutput {
                            name: o.name.clone(),
                            path: path_str(&o.path)?,
                            variables: o.variables.clone(),
                        })
                    })
                    .collect::<Result<_, Error>>()?,
                slots: PlanSlots {
                    goal_units_per_slot: step.slots.goal_units_per_slot,
                    max_units_per_slot: step.slots.max_units_per_slot,
                    total_units: step.slots.total_units,
                    threads_per_slot: step.slots.threads_per_slot,
                },
            });
        }

        let tasks = self
            .suite
            .tasks
            .iter()
            .map(|task| {
                Ok(PlanTask {
                    name: task.name.clone(),
                    dir: path_str(&task.dir)?,
                    steps: task
                        .steps()
                        .iter()
                        .map(|s| PlanTaskStep {
                            id: u32::from(s.id),
                            shared: s.shared,
                        })
                        .collect(),
                    run: task.steps_to_run().iter().map(|id| u32::from(*id)).collect(),
                })
            })
            .collect::<Result<_, Error>>()?;

        Ok(ExecutionPlan {
            version: PLAN_FORMAT_VERSION,
            suite: self.suite.name.clone(),
            steps,
            tasks,
            aliases,
            config: config.into_iter().map(Into::into).collect(),
        })
    }
}

/// Longest directory prefix shared by all given paths; empty when they
/// share nothing (or there are no paths).
fn common_prefix<'p>(mut paths: impl Iterator<Item = &'p Path>) -> PathBuf {
    let mut common: PathBuf = match paths.next() {
        Some(first) => first.to_path_buf(),
        None => return PathBuf::new(),
    };
    for path in paths {
        while !path.starts_with(&common) {
            if !common.pop() {
                return PathBuf::new();
            }
        }
    }
    common
}

fn path_str(path: &Path) -> Result<String, Error> {
    Ok(path.to_str().ok_or(Error::PathEncoding)?.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow::{Step, Task};

    fn graph() -> (Registry, Suite) {
        let mut registry = Registry::default();
        let mesh = registry.get_or_create("mesh", || Step::new("mesh", vec!["genmesh".to_owned()]));
        let diffuse =
            registry.get_or_create("diffuse", || Step::new("diffuse", vec!["solver".to_owned()]));
        let advect =
            registry.get_or_create("advect", || Step::new("advect", vec!["solver".to_owned()]));

        let mut diffusion = Task::new("diffusion", Path::new("regression/diffusion"));
        diffusion.add_step(mesh, false, &registry).unwrap();
        diffusion.add_step(diffuse, false, &registry).unwrap();

        let mut advection = Task::new("advection", Path::new("regression/advection"));
        advection.add_step(mesh, true, &registry).unwrap();
        advection.add_step(advect, false, &registry).unwrap();

        let mut suite = Suite::new("regression");
        suite.add_task(diffusion);
        suite.add_task(advection);
        (registry, suite)
    }

    #[test]
    fn test_shared_step_hoisted_to_common_dir() {
        let (registry, suite) = graph();
        let plan = Planner::new(&registry, &suite).plan(Vec::new()).unwrap();

        let mesh = &plan.steps[0];
        assert_eq!(mesh.path, "mesh");
        assert_eq!(mesh.dir, "regression/mesh");

        // both tasks need an alias, since the canonical dir is outside
        // both subtrees:
        let aliases: Vec<_> = plan.aliases_for("diffusion").collect();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].alias, "regression/diffusion/mesh");
        assert_eq!(aliases[0].target, "regression/mesh");
        assert_eq!(plan.aliases_for("advection").count(), 1);
    }

    #[test]
    fn test_unshared_step_lives_in_task_dir() {
        let (registry, suite) = graph();
        let plan = Planner::new(&registry, &suite).plan(Vec::new()).unwrap();

        let diffuse = &plan.steps[1];
        assert_eq!(diffuse.dir, "regression/diffusion/diffuse");
        assert_eq!(
            plan.aliases.iter().filter(|a| a.target == diffuse.dir).count(),
            0
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let (registry, suite) = graph();
        let planner = Planner::new(&registry, &suite);
        let a = planner.plan(Vec::new()).unwrap();
        let b = planner.plan(Vec::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string_pretty(&a).unwrap(),
            serde_json::to_string_pretty(&b).unwrap()
        );
    }

    #[test]
    fn test_graph_round_trips_through_plan() {
        let (registry, suite) = graph();
        let plan = Planner::new(&registry, &suite).plan(Vec::new()).unwrap();

        let (registry2, suite2) = plan.into_graph().unwrap();
        let plan2 = Planner::new(&registry2, &suite2).plan(Vec::new()).unwrap();
        assert_eq!(plan, plan2);
    }

    #[test]
    fn test_common_prefix() {
        let paths = [Path::new("a/b/c"), Path::new("a/b/d"), Path::new("a/b")];
        assert_eq!(common_prefix(paths.into_iter()), PathBuf::from("a/b"));

        let disjoint = [Path::new("a/b"), Path::new("c/d")];
        assert_eq!(common_prefix(disjoint.into_iter()), PathBuf::new());
    }
}
