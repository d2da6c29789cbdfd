use clap::{Parser, Subcommand};

const CMD_NAME: &str = "rig";
const DEFAULT_CONFIG: &str = "testrig.conf";
const DEFAULT_WORK: &str = "work";

/// Stores our command-line args format.
#[derive(Parser)]
#[command(name = CMD_NAME, version, about = None, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config layer file; may be repeated, later files override earlier ones
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG)]
    #[arg(env = "TESTRIG_CONFIG", global = true)]
    pub config: Vec<String>,

    /// Work directory
    #[arg(short, long, value_name = "DIR", default_value = DEFAULT_WORK)]
    #[arg(env = "TESTRIG_WORK", global = true)]
    pub work_dir: String,

    /// Print additional debugging info (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Bypass user confirmation
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Dry run; print info but don't modify anything.
    #[arg(short = 'n', long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// List suites, tasks and steps without executing anything
    List,
    /// Build the graph, plan the work directory, and persist the plan
    Setup {
        /// Name of target suite
        #[arg(short, long, value_name = "SUITE")]
        suite: String,
    },
    /// Load a persisted plan and run it
    Run {
        /// Name of target suite
        #[arg(short, long, value_name = "SUITE")]
        suite: String,
        /// Run only this task from the plan
        #[arg(short, long, value_name = "TASK")]
        task: Option<String>,
    },
    /// Delete a task's materialized dirs and the aliases referencing them
    Clean {
        /// Name of the suite whose plan records the task
        #[arg(short, long, value_name = "SUITE")]
        suite: String,
        /// Name of target task
        #[arg(short, long, value_name = "TASK")]
        task: String,
    },
}
