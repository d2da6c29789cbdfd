use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;

use config::ConfigStack;
use plan::{ExecutionPlan, Planner};

use crate::args::Command;
use crate::exec::SuiteRunner;
use crate::fs::Fs;
use crate::graph::GraphBuilder;
use crate::settings::Settings;
use crate::ui::Ui;

/// Top-level app. Owns the settings, the whitelisted filesystem handle, and
/// the text UI, and dispatches one subcommand per invocation.
pub struct App {
    settings: Settings,
    fs: Fs,
    ui: Ui,
}

impl App {
    pub fn new(settings: Settings) -> Self {
        let fs = Fs::new(&settings.work_dir, settings.dry_run);
        let ui = Ui::new(&settings);
        Self { settings, fs, ui }
    }

    /// Returns whether everything in scope passed; commands that don't run
    /// anything report `true` unless they fail outright.
    pub fn run(mut self) -> Result<bool> {
        match self.settings.command.clone() {
            Command::List => self.list().map(|()| true),
            Command::Setup { suite } => self.setup(&suite).map(|()| true),
            Command::Run { suite, task } => self.exec(&suite, task.as_deref()),
            Command::Clean { suite, task } => self.clean(&suite, &task).map(|()| true),
        }
    }

    /// Parse the configured layer files into a stack, lowest priority first.
    fn load_config(&self) -> Result<ConfigStack> {
        let mut stack = ConfigStack::default();
        let mut text = String::with_capacity(4096);
        for path in &self.settings.config_files {
            self.ui.verbose_progress(&format!("Reading config layer {path:?}"));
            self.fs
                .read_to_buf(path, &mut text)
                .with_context(|| format!("reading config file {path:?}"))?;
            let name = path.to_str().ok_or(crate::fs::Error::PathEncoding)?;
            stack
                .add_layer(name, &text)
                .with_context(|| format!("parsing config file {path:?}"))?;
            self.ui.done();
        }
        Ok(stack)
    }

    /// Print every configured suite, task and step without touching disk.
    fn list(&self) -> Result<()> {
        let config = self.load_config()?;
        let (registry, suites) = GraphBuilder::new(&config).build_all()?;

        for suite in &suites {
            println!("suite {}", suite.name.cyan());
            for task in &suite.tasks {
                println!("  task {} (dir {:?})", task.name, task.dir);
                let run = task.steps_to_run();
                for ts in task.steps() {
                    let step = registry.get(ts.id);
                    let shared = if ts.shared { " [shared]" } else { "" };
                    let skipped = if run.contains(&ts.id) { "" } else { " [not run]" };
                    println!("    step {}{shared}{skipped}", step.path());
                }
            }
        }
        Ok(())
    }

    /// Build the graph from config, derive the plan, and materialize it:
    /// canonical dirs, alias links, and the persisted plan file.
    fn setup(&mut self, suite_name: &str) -> Result<()> {
        let config = self.load_config()?;
        let (registry, suite) = GraphBuilder::new(&config).build(suite_name)?;
        let plan = Planner::new(&registry, &suite)
            .plan(config.snapshot()?)
            .context("deriving execution plan")?;

        eprintln!(
            "{} suite '{suite_name}': {} steps, {} tasks, {} aliases under {:?}",
            "PLAN".cyan(),
            plan.steps.len(),
            plan.tasks.len(),
            plan.aliases.len(),
            self.settings.work_dir,
        );
        if self.ui.verbose {
            for step in &plan.steps {
                eprintln!("  dir {}", step.dir);
            }
            for edge in &plan.aliases {
                eprintln!("  alias {} -> {}", edge.alias, edge.target);
            }
        }

        if self.settings.dry_run {
            eprintln!("Dry run. Not materializing.");
            return Ok(());
        }
        if !self.ui.confirm("Materialize?")? {
            eprintln!("Not confirmed. Exiting.");
            return Ok(());
        }

        self.fs.ensure_work_dir_exists(self.ui.verbose)?;
        let stats = plan.materialize(self.fs.work_dir())?;
        if stats.changed_nothing() {
            eprintln!("{}. Everything was already in place.", "DONE".green());
        } else {
            eprintln!(
                "{}. Created {} dirs, {} links ({} replaced); plan file {}.",
                "DONE".green(),
                stats.dirs_created,
                stats.links_created,
                stats.links_replaced,
                if stats.plan_written { "written" } else { "unchanged" },
            );
        }
        Ok(())
    }

    /// Load the persisted plan and run it.
    fn exec(mut self, suite: &str, only_task: Option<&str>) -> Result<bool> {
        self.fs.ensure_work_dir_exists(self.ui.verbose)?;
        let plan = ExecutionPlan::load(self.fs.work_dir(), suite)?;

        if self.settings.dry_run {
            for task in &plan.tasks {
                if only_task.is_some_and(|name| name != task.name) {
                    continue;
                }
                eprintln!("Dry run. Would run task {}:", task.name);
                for id in &task.run {
                    eprintln!("  step {}", plan.steps[*id as usize].path);
                }
            }
            return Ok(true);
        }

        let runner = SuiteRunner::new(&plan, self.fs, self.ui)?;
        let report = runner.run(only_task)?;
        Ok(report.passed())
    }

    /// Delete a task's materialized step dirs and its alias links. Dirs
    /// shared with another task are kept.
    fn clean(&mut self, suite: &str, task_name: &str) -> Result<()> {
        self.fs.ensure_work_dir_exists(self.ui.verbose)?;
        let plan = ExecutionPlan::load(self.fs.work_dir(), suite)?;
        let task = plan
            .tasks
            .iter()
            .find(|t| t.name == task_name)
            .with_context(|| format!("plan for suite '{suite}' has no task '{task_name}'"))?;

        let mut dirs: Vec<PathBuf> = Vec::with_capacity(task.steps.len());
        for ts in &task.steps {
            let step = &plan.steps[ts.id as usize];
            let referencing = plan
                .tasks
                .iter()
                .filter(|t| t.steps.iter().any(|s| s.id == ts.id))
                .count();
            if referencing > 1 || !Path::new(&step.dir).starts_with(&task.dir) {
                log::info!("keeping shared step dir {}", step.dir);
                continue;
            }
            let dir = self.fs.work_dir().join(&step.dir);
            if self.fs.exists(&dir) {
                dirs.push(dir);
            }
        }
        let links: Vec<PathBuf> = plan
            .aliases_for(task_name)
            .map(|edge| self.fs.work_dir().join(&edge.alias))
            .filter(|link| self.fs.exists(link))
            .collect();

        if dirs.is_empty() && links.is_empty() {
            eprintln!("Nothing to clean for task '{task_name}'.");
            return Ok(());
        }
        for dir in &dirs {
            eprintln!("will delete dir  {dir:?}");
        }
        for link in &links {
            eprintln!("will delete link {link:?}");
        }

        if self.settings.dry_run {
            eprintln!("Dry run. Not deleting.");
            return Ok(());
        }
        if !self.ui.confirm("Delete?")? {
            eprintln!("Not confirmed. Exiting.");
            return Ok(());
        }

        for link in &links {
            self.fs.delete_file(link)?;
        }
        for dir in &dirs {
            self.fs.delete_dir(dir)?;
        }
        eprintln!(
            "{}. Deleted {} dirs and {} links.",
            "DONE".green(),
            dirs.len(),
            links.len(),
        );
        Ok(())
    }
}
