use std::path::PathBuf;

use anyhow::Result;

use crate::args::{Args, Command};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no config layer files specified")]
    NoConfigFiles,
}

/// Settings are like Args, except all the logic has
/// been applied so e.g. defaults are added in.
#[derive(Debug)]
pub struct Settings {
    pub command: Command,
    /// Config layer files, lowest priority first.
    pub config_files: Vec<PathBuf>,
    pub work_dir: PathBuf,
    pub verbose: u8,
    pub yes: bool,
    pub dry_run: bool,
}

impl TryFrom<Args> for Settings {
    type Error = anyhow::Error;
    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.config.is_empty() {
            return Err(Error::NoConfigFiles.into());
        }

        // config files aren't opened here; `run` and `clean` work from a
        // persisted plan and never read them.
        let config_files = args.config.iter().map(PathBuf::from).collect();

        Ok(Self {
            command: args.command,
            config_files,
            work_dir: PathBuf::from(&args.work_dir),
            verbose: args.verbose,
            yes: args.yes,
            dry_run: args.dry_run,
        })
    }
}
