use std::cell::RefCell;
use std::time::Instant;

use anyhow::Result;
use colored::Colorize;

use crate::settings::Settings;

/// All interactions with the text UI go through this struct.
///
/// Reports and progress go to stderr; stdout is reserved for `list` output
/// and the raw subprocess tee.
pub struct Ui {
    /// -v setting; shows per-step progress and timings
    pub verbose: bool,
    /// -y setting; answers every confirmation prompt with yes
    override_confirmation: bool,
    /// started when a step begins, reported when it completes
    timer: Instant,
    /// buffer for reading confirmation input
    strbuf: RefCell<String>,
}

impl Ui {
    pub fn new(settings: &Settings) -> Self {
        Self {
            verbose: settings.verbose > 0,
            override_confirmation: settings.yes,
            timer: Instant::now(),
            // RefCell so confirm() doesn't need a unique reference:
            strbuf: RefCell::new(String::with_capacity(16)),
        }
    }

    pub fn confirm(&self, prompt: &str) -> Result<bool> {
        if self.override_confirmation {
            return Ok(true);
        }
        eprintln!("{prompt} (y/N)");

        let mut strbuf = self.strbuf.borrow_mut();
        strbuf.clear();
        std::io::stdin().read_line(&mut strbuf)?;
        Ok(matches!(strbuf.chars().next(), Some('y' | 'Y')))
    }

    pub fn start_timer(&mut self) {
        if self.verbose {
            self.timer = Instant::now();
        }
    }

    pub fn print_elapsed(&self, what: &str) {
        if self.verbose {
            eprintln!("{what} took {:.1}s", self.timer.elapsed().as_secs_f64());
        }
    }

    pub fn verbose_msg(&self, msg: &str) {
        if self.verbose {
            eprintln!("{msg}");
        }
    }

    pub fn verbose_progress(&self, msg: &str) {
        if self.verbose {
            eprint!("{}... ", msg.magenta());
        }
    }

    pub fn done(&self) {
        if self.verbose {
            eprintln!("{}.", "done".green());
        }
    }
}
