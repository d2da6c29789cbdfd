/// The versioned on-disk plan schema
mod schema;
pub use schema::{
    plan_file_name, AliasEdge, ExecutionPlan, PlanOption, PlanStep, PlanTask, PlanTaskStep,
    PLAN_FORMAT_VERSION,
};

/// Deriving a plan from a suite graph
mod planner;
pub use planner::Planner;

/// Filesystem effects: dirs, alias links, plan file
mod materialize;
pub use materialize::Materialized;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("plan file is format version {found}, but this build reads version {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("no plan named '{0}' in the work dir (run setup first?)")]
    PlanNotFound(String),
    #[error("alias path '{0}' exists but is not a symlink; refusing to replace it")]
    AliasObstructed(String),
    #[error("plan step table is not densely numbered (entry {index} has id {id})")]
    BadStepTable { index: usize, id: u32 },
    #[error("task '{task}' references unknown step id {id}")]
    UnknownStepRef { task: String, id: u32 },
    #[error("plan task table is invalid: {0}")]
    InvalidTask(String),
    #[error("filesystem path is not valid UTF-8")]
    PathEncoding,
}
