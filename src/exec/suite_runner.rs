use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;

use config::ConfigStack;
use plan::ExecutionPlan;
use resource::ResourceManager;
use workflow::{
    compare_series, parse_series, Registry, Step, StepId, StepState, Suite, Task, Tolerance,
    ValidationResult,
};

use crate::fs::Fs;
use crate::ui::Ui;

use super::{run_cmd::run_cmd, Error};

/// What happened to one step in this invocation.
#[derive(Debug)]
pub struct StepOutcome {
    pub path: String,
    pub state: StepState,
    /// Hook failure, when one occurred.
    pub error: Option<String>,
    pub results: Vec<ValidationResult>,
    /// True when the step had already run (shared step, or a previous
    /// invocation left a successful exit_code file).
    pub already_complete: bool,
}

impl StepOutcome {
    pub fn passed(&self) -> bool {
        self.state == StepState::RunComplete
            && self.error.is_none()
            && self.results.iter().all(|r| r.passed)
    }
}

#[derive(Debug)]
pub struct TaskReport {
    pub name: String,
    pub steps: Vec<StepOutcome>,
    /// True when a step failure aborted the rest of this task.
    pub aborted: bool,
}

impl TaskReport {
    pub fn passed(&self) -> bool {
        !self.aborted && self.steps.iter().all(|s| s.passed())
    }
}

#[derive(Debug)]
pub struct SuiteReport {
    pub suite: String,
    pub tasks: Vec<TaskReport>,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.tasks.iter().all(|t| t.passed())
    }

    /// Print the per-step, per-task and final status lines.
    pub fn print(&self) {
        eprintln!();
        for task in &self.tasks {
            for step in &task.steps {
                let status = if step.passed() {
                    "PASS".green()
                } else {
                    "FAIL".red()
                };
                match (&step.error, step.already_complete) {
                    (Some(e), _) => eprintln!("{status} {} ({e})", step.path),
                    (None, true) => eprintln!("{status} {} (already complete)", step.path),
                    (None, false) => eprintln!("{status} {}", step.path),
                }
                for result in &step.results {
                    eprintln!("  {}", result.summary());
                }
            }
            let status = if task.passed() {
                "PASS".green()
            } else {
                "FAIL".red()
            };
            let aborted = if task.aborted { " (aborted)" } else { "" };
            eprintln!("{status} task {}{aborted}", task.name);
        }

        let status = if self.passed() {
            "PASS".green()
        } else {
            "FAIL".red()
        };
        eprintln!("\n{status} suite {}", self.suite);
    }
}

/// `SuiteRunner` walks a persisted plan and actually runs it.
///
/// Tasks run in suite order and steps in task order, strictly
/// sequentially; the only parallelism is inside a step's launched
/// subprocess. Step states live on the rebuilt graph, so a step shared
/// between tasks sets up and runs at most once per invocation, and a step
/// left complete on disk by an earlier invocation is not run again.
pub struct SuiteRunner<'p> {
    plan: &'p ExecutionPlan,
    registry: Registry,
    suite: Suite,
    config: ConfigStack,
    resources: ResourceManager,
    tol: Tolerance,
    baseline: Option<PathBuf>,
    fs: Fs,
    ui: Ui,
    pathbuf: PathBuf,
    strbuf: String,
}

impl<'p> SuiteRunner<'p> {
    /// Rebuild the graph from `plan` and detect the environment we'll
    /// launch steps into.
    pub fn new(plan: &'p ExecutionPlan, fs: Fs, ui: Ui) -> Result<Self> {
        let (registry, suite) = plan.into_graph()?;
        let config = plan.config_stack();

        let resources = ResourceManager::detect(&config)?;
        let tol = Tolerance {
            norm: config.get_or("validate", "norm", "l2")?.parse()?,
            threshold: config.get_parse_or("validate", "threshold", 0.0)?,
        };
        let baseline = config.get_opt("validate", "baseline")?.map(PathBuf::from);

        Ok(Self {
            plan,
            registry,
            suite,
            config,
            resources,
            tol,
            baseline,
            fs,
            ui,
            pathbuf: PathBuf::with_capacity(256),
            strbuf: String::with_capacity(1024),
        })
    }

    /// Run every task in the plan (or just `only_task`), in declaration
    /// order. A task failure doesn't stop later tasks; the report's
    /// aggregate status reflects it.
    pub fn run(mut self, only_task: Option<&str>) -> Result<SuiteReport> {
        if let Some(name) = only_task {
            // fail early if the plan doesn't know this task:
            self.suite.task(name)?;
        }

        let tasks: Vec<Task> = self
            .suite
            .tasks
            .iter()
            .filter(|t| only_task.map_or(true, |name| t.name == name))
            .cloned()
            .collect();

        let mut report = SuiteReport {
            suite: self.plan.suite.clone(),
            tasks: Vec::with_capacity(tasks.len()),
        };
        for task in &tasks {
            report.tasks.push(self.run_task(task)?);
        }
        report.print();
        Ok(report)
    }

    fn run_task(&mut self, task: &Task) -> Result<TaskReport> {
        eprintln!("\n{} task {}", "RUN".green(), task.name);

        let mut report = TaskReport {
            name: task.name.clone(),
            steps: Vec::with_capacity(task.steps().len()),
            aborted: false,
        };

        for id in task.steps_to_run() {
            match self.registry.get(id).state() {
                StepState::RunComplete => {
                    // shared step that already ran under an earlier task:
                    let path = self.registry.get(id).path().to_owned();
                    log::info!("step '{path}' already completed; skipping");
                    eprintln!("{} {path} (already completed)", "SKIP".green());
                    report.steps.push(StepOutcome {
                        path,
                        state: StepState::RunComplete,
                        error: None,
                        results: Vec::with_capacity(0),
                        already_complete: true,
                    });
                    continue;
                }
                StepState::Failed => {
                    // shared step that failed under an earlier task; the
                    // rest of this task depends on it:
                    let path = self.registry.get(id).path().to_owned();
                    eprintln!("{} {path} (failed in an earlier task)", "FAIL".red());
                    report.steps.push(StepOutcome {
                        path,
                        state: StepState::Failed,
                        error: Some("failed in an earlier task".to_owned()),
                        results: Vec::with_capacity(0),
                        already_complete: false,
                    });
                    report.aborted = true;
                    break;
                }
                _ => {}
            }

            let (outcome, abort_task) = self.run_step(id)?;
            report.steps.push(outcome);
            if abort_task {
                // later steps consume this one's outputs; skip them:
                report.aborted = true;
                break;
            }
        }
        Ok(report)
    }

    /// Drive one step through setup/run/validate. The second return value
    /// says whether the rest of the task must be skipped: setup and run
    /// failures abort the task, resource and validation failures are
    /// confined to this step.
    fn run_step(&mut self, id: StepId) -> Result<(StepOutcome, bool)> {
        let step = self.registry.get(id).clone();
        let dir_relative = self.plan.steps[usize::from(id)].dir.clone();
        let step_dir = self.fs.step_dir(&dir_relative, &mut self.pathbuf).to_path_buf();

        self.ui.start_timer();
        eprintln!("{} {}\nin {:?}\n", "RUN".green(), step.path(), step_dir);

        // a successful exit_code file from an earlier invocation means
        // this step is already done; anything else means not-yet-run.
        if self.exit_code_success(&step_dir)? {
            log::info!("step '{}' completed in an earlier run", step.path());
            self.registry.get_mut(id).mark_complete_from_disk()?;
            let results = self.validate_step(&step, &dir_relative, &step_dir)?;
            return Ok((
                StepOutcome {
                    path: step.path().to_owned(),
                    state: StepState::RunComplete,
                    error: None,
                    results,
                    already_complete: true,
                },
                false,
            ));
        }

        // SETUP ////////////////////
        self.registry.get_mut(id).begin_setup()?;
        if let Err(e) = self.setup_step(&step, &step_dir) {
            return Ok((self.fail_step(id, "setup", e), true));
        }
        self.registry.get_mut(id).finish_setup()?;

        // RUN //////////////////////
        let size = match self.resources.compute_job_size(
            step.slots.goal_units_per_slot,
            step.slots.max_units_per_slot,
            step.slots.total_units,
        ) {
            Ok(size) => size,
            // the environment can't satisfy this step under any
            // circumstance, but its siblings may be fine:
            Err(e) => return Ok((self.fail_step(id, "sizing", e.into()), false)),
        };
        log::debug!(
            "step '{}': target {} slots, min {}",
            step.path(),
            size.target_slots,
            size.min_slots
        );

        self.registry.get_mut(id).begin_run()?;
        let mut cmd = match self.resources.build_launch_command(
            &step.argv,
            size.target_slots,
            step.slots.threads_per_slot,
        ) {
            Ok(cmd) => cmd,
            Err(e) => return Ok((self.fail_step(id, "launch", e.into()), false)),
        };
        cmd.current_dir(&step_dir);

        let success = run_cmd(&mut cmd, &step_dir, &self.fs, &mut self.pathbuf, self.ui.verbose)
            .with_context(|| format!("while running step '{}'", step.path()))?;
        if !success {
            return Ok((self.fail_step(id, "run", Error::SubprocessFailed.into()), true));
        }
        self.registry.get_mut(id).finish_run()?;
        self.ui.print_elapsed("Step execution");

        eprintln!("{} {}. Writing exit_code file.\n", "COMPLETED".green(), step.path());
        let exit_code = self.fs.exit_code(&step_dir, &mut self.pathbuf);
        self.fs
            .write_file(exit_code, "0")
            .context("while writing exit_code file for successful step.")?;

        // VALIDATE /////////////////
        let results = self.validate_step(&step, &dir_relative, &step_dir)?;
        Ok((
            StepOutcome {
                path: step.path().to_owned(),
                state: StepState::RunComplete,
                error: None,
                results,
                already_complete: false,
            },
            false,
        ))
    }

    fn fail_step(&mut self, id: StepId, hook: &str, e: anyhow::Error) -> StepOutcome {
        let step = self.registry.get_mut(id);
        step.mark_failed();
        let path = step.path().to_owned();
        eprintln!("{} {path} ({hook} failed: {e:#})", "FAIL".red());
        StepOutcome {
            path,
            state: StepState::Failed,
            error: Some(format!("{hook} failed: {e:#}")),
            results: Vec::with_capacity(0),
            already_complete: false,
        }
    }

    /// Idempotent preparation: the canonical dir, plus staged inputs.
    /// Every declared input must exist; absolute inputs are symlinked into
    /// the step dir under their logical name.
    fn setup_step(&mut self, step: &Step, step_dir: &Path) -> Result<()> {
        self.fs.create_dir(step_dir)?;

        for input in &step.inputs {
            if input.path.is_absolute() {
                if !self.fs.exists(&input.path) {
                    return Err(Error::ExpectedFileNotFound(
                        input.path.to_string_lossy().into_owned(),
                    )
                    .into());
                }
                let link = step_dir.join(&input.name);
                if !self.fs.exists(&link) {
                    self.ui
                        .verbose_msg(&format!("Staging input {} -> {:?}", input.name, input.path));
                    self.fs.symlink(&input.path, &link)?;
                }
            } else {
                // relative inputs reach through the alias links laid down
                // at materialize time:
                let path = step_dir.join(&input.path);
                if !self.fs.exists(&path) {
                    return Err(
                        Error::ExpectedFileNotFound(path.to_string_lossy().into_owned()).into(),
                    );
                }
            }
        }
        Ok(())
    }

    /// Check every declared output, comparing declared variables against
    /// the configured references. A missing output is a recorded failure,
    /// never a silent pass.
    fn validate_step(
        &mut self,
        step: &Step,
        dir_relative: &str,
        step_dir: &Path,
    ) -> Result<Vec<ValidationResult>> {
        let mut results = Vec::with_capacity(step.outputs.len());
        let references = self.reference_dirs(step, dir_relative)?;

        for output in &step.outputs {
            let file = step_dir.join(&output.path);
            if !self.fs.exists(&file) {
                results.push(ValidationResult::fail(
                    step.path(),
                    &output.name,
                    self.tol,
                    format!("declared output {:?} missing", output.path),
                ));
                continue;
            }
            if output.variables.is_empty() {
                continue;
            }

            self.fs.read_to_buf(&file, &mut self.strbuf)?;
            let ours = match parse_series(&output.path.to_string_lossy(), &self.strbuf) {
                Ok(series) => series,
                Err(e) => {
                    results.push(ValidationResult::fail(
                        step.path(),
                        &output.name,
                        self.tol,
                        format!("unparseable output: {e}"),
                    ));
                    continue;
                }
            };

            for variable in &output.variables {
                let Some(our) = lookup(&ours, variable) else {
                    results.push(ValidationResult::fail(
                        step.path(),
                        variable,
                        self.tol,
                        "variable missing from output".to_owned(),
                    ));
                    continue;
                };

                if references.is_empty() {
                    // nothing to compare against; presence is the check.
                    results.push(ValidationResult {
                        step: step.path().to_owned(),
                        variable: variable.clone(),
                        norm: self.tol.norm,
                        threshold: self.tol.threshold,
                        value: None,
                        passed: true,
                        detail: Some("present (no reference configured)".to_owned()),
                    });
                    continue;
                }

                for (label, base) in &references {
                    let ref_file = base.join(&output.path);
                    if !self.fs.exists(&ref_file) {
                        results.push(ValidationResult::fail(
                            step.path(),
                            variable,
                            self.tol,
                            format!("{label} output {ref_file:?} missing"),
                        ));
                        continue;
                    }
                    self.fs.read_to_buf(&ref_file, &mut self.strbuf)?;
                    let theirs = match parse_series(&ref_file.to_string_lossy(), &self.strbuf) {
                        Ok(series) => series,
                        Err(e) => {
                            results.push(ValidationResult::fail(
                                step.path(),
                                variable,
                                self.tol,
                                format!("unparseable {label}: {e}"),
                            ));
                            continue;
                        }
                    };
                    match lookup(&theirs, variable) {
                        Some(reference) => results.push(compare_series(
                            step.path(),
                            variable,
                            our,
                            reference,
                            self.tol,
                        )),
                        None => results.push(ValidationResult::fail(
                            step.path(),
                            variable,
                            self.tol,
                            format!("variable missing from {label}"),
                        )),
                    }
                }
            }
        }
        Ok(results)
    }

    /// Directories holding reference outputs for this step: another step's
    /// canonical dir (`step.<path>.validate-against`) and/or the baseline
    /// dir, which mirrors the work-dir layout.
    fn reference_dirs(
        &self,
        step: &Step,
        dir_relative: &str,
    ) -> Result<Vec<(&'static str, PathBuf)>> {
        let mut dirs = Vec::with_capacity(2);

        let section = format!("step.{}", step.path());
        if let Some(other) = self.config.get_opt(&section, "validate-against")? {
            let other_dir = self
                .plan
                .steps
                .iter()
                .find(|s| s.path == other)
                .map(|s| self.fs.work_dir().join(&s.dir))
                .with_context(|| format!("validate-against step '{other}' is not in the plan"))?;
            dirs.push(("reference step", other_dir));
        }
        if let Some(baseline) = &self.baseline {
            dirs.push(("baseline", baseline.join(dir_relative)));
        }
        Ok(dirs)
    }

    fn exit_code_success(&mut self, step_dir: &Path) -> Result<bool> {
        let exit_code = self.fs.exit_code(step_dir, &mut self.pathbuf);
        if self.fs.exists(exit_code) {
            self.fs.read_to_buf(exit_code, &mut self.strbuf)?;
            if self.strbuf.trim() == "0" {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn lookup<'s>(series: &'s [(String, Vec<f64>)], name: &str) -> Option<&'s [f64]> {
    series
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, values)| values.as_slice())
}
