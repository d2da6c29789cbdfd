mod id;
pub use id::StepId;

mod step;
pub use step::{InputSpec, OutputSpec, SlotSpec, Step, StepState};

mod registry;
pub use registry::Registry;

mod task;
pub use task::{Suite, Task, TaskStep};

mod validate;
pub use validate::{compare_series, parse_series, Norm, Tolerance, ValidationResult};

// separates a logical name from its path in input/output declarations,
// e.g. "mesh:mesh.dat"
pub const NAME_PATH_DELIM: char = ':';
// separates an output path from its validated variables,
// e.g. "result.dat@temperature+pressure"
pub const OUTPUT_VARS_DELIM: char = '@';
// separates variable names in an output declaration
pub const VARS_DELIM: char = '+';

pub type Hasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, Hasher>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("step '{path}' can't move from {from} to {to}")]
    BadTransition {
        path: String,
        from: StepState,
        to: StepState,
    },
    #[error("task '{task}' lists step '{step}' more than once")]
    DuplicateStepInTask { task: String, step: String },
    #[error("task '{task}' run list names step '{step}', which is not in its step list")]
    RunStepNotInTask { task: String, step: String },
    #[error("suite '{suite}' has no task named '{task}'")]
    TaskNotFound { suite: String, task: String },
    #[error("{path} line {line}: expected 'name = v1 v2 ...', got '{text}'")]
    InvalidSeries {
        path: String,
        line: usize,
        text: String,
    },
    #[error("unknown norm '{0}' (expected l1, l2 or linf)")]
    UnknownNorm(String),
}
