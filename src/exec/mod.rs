/// Run a subprocess with output teed to log files
mod run_cmd;

/// The sequential suite runner and its reports
mod suite_runner;

pub use suite_runner::{StepOutcome, SuiteReport, SuiteRunner, TaskReport};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("subprocess exited with failure")]
    SubprocessFailed,
    #[error("expected file not found: {0}")]
    ExpectedFileNotFound(String),
}
