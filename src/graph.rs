use std::path::PathBuf;

use anyhow::{Context, Result};

use config::ConfigStack;
use workflow::{
    InputSpec, OutputSpec, Registry, SlotSpec, Step, StepId, Suite, Task, NAME_PATH_DELIM,
    OUTPUT_VARS_DELIM, VARS_DELIM,
};

const SUITE_PREFIX: &str = "suite.";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no suites defined in config (need a 'suite.<name>.tasks' option)")]
    NoSuites,
    #[error("suite '{0}' is not defined in config")]
    SuiteNotFound(String),
    #[error("step '{step}': expected 'name:path', got '{text}'")]
    BadSpec { step: String, text: String },
    #[error("step '{0}' has an empty command")]
    EmptyCommand(String),
    #[error("task '{task}' run list names unknown step '{step}'")]
    UnknownRunStep { task: String, step: String },
}

/// Builds the suite/task/step object graph from resolved config.
///
/// Steps are never discovered by scanning the filesystem; the config stack
/// is the single explicit source of graph structure. All step construction
/// goes through the registry, so a step named by several tasks exists once.
pub struct GraphBuilder<'a> {
    config: &'a ConfigStack,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(config: &'a ConfigStack) -> Self {
        Self { config }
    }

    /// Names of every suite the config defines, sorted.
    pub fn suite_names(&self) -> Vec<String> {
        self.config
            .sections()
            .iter()
            .filter_map(|s| s.strip_prefix(SUITE_PREFIX))
            .map(str::to_owned)
            .collect()
    }

    /// Build every configured suite into one registry.
    pub fn build_all(&self) -> Result<(Registry, Vec<Suite>)> {
        let names = self.suite_names();
        if names.is_empty() {
            return Err(Error::NoSuites.into());
        }
        let mut registry = Registry::default();
        let suites = names
            .iter()
            .map(|name| self.build_suite(name, &mut registry))
            .collect::<Result<_>>()?;
        Ok((registry, suites))
    }

    /// Build one named suite and the registry scoped to this pass.
    pub fn build(&self, suite: &str) -> Result<(Registry, Suite)> {
        let mut registry = Registry::default();
        let suite = self.build_suite(suite, &mut registry)?;
        Ok((registry, suite))
    }

    fn build_suite(&self, name: &str, registry: &mut Registry) -> Result<Suite> {
        let section = format!("{SUITE_PREFIX}{name}");
        let tasks: Vec<String> = match self.config.get_list(&section, "tasks") {
            Ok(tasks) => tasks,
            Err(config::Error::Missing { .. }) => {
                return Err(Error::SuiteNotFound(name.to_owned()).into())
            }
            Err(e) => return Err(e.into()),
        };

        let mut suite = Suite::new(name);
        for task in &tasks {
            suite.add_task(
                self.build_task(task, registry)
                    .with_context(|| format!("while building task '{task}'"))?,
            );
        }
        log::info!(
            "built suite '{name}' with {} tasks and {} steps",
            suite.tasks.len(),
            registry.len()
        );
        Ok(suite)
    }

    fn build_task(&self, name: &str, registry: &mut Registry) -> Result<Task> {
        let section = format!("task.{name}");
        let dir = self.config.get_or(&section, "dir", name)?;
        let steps: Vec<String> = self.config.get_list(&section, "steps")?;

        let mut task = Task::new(name, &PathBuf::from(dir));
        for step in &steps {
            // a step already constructed for an earlier task is shared:
            let shared = registry.lookup(step).is_some();
            let id = self
                .build_step(step, registry)
                .with_context(|| format!("while building step '{step}'"))?;
            task.add_step(id, shared, registry)?;
        }

        let run: Vec<String> = self.config.get_list_or_empty(&section, "run")?;
        if !run.is_empty() {
            let ids = run
                .iter()
                .map(|step| {
                    registry.lookup(step).ok_or_else(|| Error::UnknownRunStep {
                        task: name.to_owned(),
                        step: step.clone(),
                    })
                })
                .collect::<Result<Vec<StepId>, _>>()?;
            task.set_steps_to_run(ids, registry)?;
        }
        Ok(task)
    }

    fn build_step(&self, path: &str, registry: &mut Registry) -> Result<StepId> {
        if let Some(id) = registry.lookup(path) {
            return Ok(id);
        }

        let section = format!("step.{path}");
        let argv: Vec<String> = self
            .config
            .get(&section, "command")?
            .split_whitespace()
            .map(str::to_owned)
            .collect();
        if argv.is_empty() {
            return Err(Error::EmptyCommand(path.to_owned()).into());
        }

        let mut step = Step::new(path, argv);
        for text in self.config.get_list_or_empty::<String>(&section, "inputs")? {
            let (name, file) = split_spec(path, &text)?;
            step.inputs.push(InputSpec {
                name: name.to_owned(),
                path: PathBuf::from(file),
            });
        }
        for text in self.config.get_list_or_empty::<String>(&section, "outputs")? {
            let (name, rest) = split_spec(path, &text)?;
            let (file, variables) = match rest.split_once(OUTPUT_VARS_DELIM) {
                Some((file, vars)) => (
                    file,
                    vars.split(VARS_DELIM).map(str::to_owned).collect(),
                ),
                None => (rest, Vec::with_capacity(0)),
            };
            step.outputs.push(OutputSpec {
                name: name.to_owned(),
                path: PathBuf::from(file),
                variables,
            });
        }
        step.slots = SlotSpec {
            goal_units_per_slot: self.config.get_parse_or(&section, "goal-units-per-slot", 1)?,
            max_units_per_slot: self.config.get_parse_or(&section, "max-units-per-slot", 1)?,
            total_units: self.config.get_parse_or(&section, "units", 1)?,
            threads_per_slot: self.config.get_parse_or(&section, "threads-per-slot", 1)?,
        };

        Ok(registry.get_or_create(path, || step))
    }
}

fn split_spec<'t>(step: &str, text: &'t str) -> Result<(&'t str, &'t str), Error> {
    text.split_once(NAME_PATH_DELIM).ok_or_else(|| Error::BadSpec {
        step: step.to_owned(),
        text: text.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = "\
suite.nightly.tasks = diffusion, advection

task.diffusion.steps = mesh, diffuse
task.advection.dir = adv
task.advection.steps = mesh, advect
task.advection.run = advect

step.mesh.command = genmesh --out mesh.dat
step.mesh.outputs = mesh:mesh.dat
step.mesh.units = 1000
step.mesh.goal-units-per-slot = 200
step.mesh.max-units-per-slot = 2000

step.diffuse.command = solver --model diffusion
step.diffuse.inputs = mesh:../mesh/mesh.dat
step.diffuse.outputs = result:result.dat@temperature+pressure

step.advect.command = solver --model advection
step.advect.inputs = mesh:../../mesh/mesh.dat
step.advect.outputs = result:result.dat@density
";

    fn config() -> ConfigStack {
        let mut config = ConfigStack::default();
        config.add_layer("test", CONF).unwrap();
        config
    }

    #[test]
    fn test_shared_step_built_once() {
        let config = config();
        let (registry, suite) = GraphBuilder::new(&config).build("nightly").unwrap();

        assert_eq!(registry.len(), 3);
        let mesh = registry.lookup("mesh").unwrap();
        assert!(suite.tasks[0].references(mesh));
        assert!(suite.tasks[1].references(mesh));

        // first referencing task owns it, second sees it as shared:
        assert!(!suite.tasks[0].steps()[0].shared);
        assert!(suite.tasks[1].steps()[0].shared);
    }

    #[test]
    fn test_step_specs_parsed() {
        let config = config();
        let (registry, _) = GraphBuilder::new(&config).build("nightly").unwrap();

        let mesh = registry.get(registry.lookup("mesh").unwrap());
        assert_eq!(mesh.argv, ["genmesh", "--out", "mesh.dat"]);
        assert_eq!(mesh.slots.total_units, 1000);
        assert_eq!(mesh.slots.goal_units_per_slot, 200);

        let diffuse = registry.get(registry.lookup("diffuse").unwrap());
        assert_eq!(diffuse.inputs[0].name, "mesh");
        assert_eq!(diffuse.outputs[0].variables, ["temperature", "pressure"]);
    }

    #[test]
    fn test_run_subset_and_default_dir() {
        let config = config();
        let (registry, suite) = GraphBuilder::new(&config).build("nightly").unwrap();

        assert_eq!(suite.tasks[0].dir, PathBuf::from("diffusion"));
        assert_eq!(suite.tasks[1].dir, PathBuf::from("adv"));

        let advect = registry.lookup("advect").unwrap();
        assert_eq!(suite.tasks[1].steps_to_run(), vec![advect]);
        // full step list is untouched by the run subset:
        assert_eq!(suite.tasks[1].steps().len(), 2);
    }

    #[test]
    fn test_unknown_suite() {
        let config = config();
        let err = GraphBuilder::new(&config).build("weekly").unwrap_err();
        assert!(err.to_string().contains("weekly"));
    }

    #[test]
    fn test_suite_names() {
        let config = config();
        assert_eq!(GraphBuilder::new(&config).suite_names(), ["nightly"]);
    }
}
