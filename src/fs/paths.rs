use std::path::{Path, PathBuf};

use super::Fs;

/// Utility fns for making common types of paths.
/// These fns are based on their callsite use pattern,
/// so sometimes a prefix will be included
/// and sometimes it's assumed that we'll add it here.
impl Fs {
    /// $WORK/step_dir (from a plan-relative dir)
    pub fn step_dir<'a>(&self, dir_relative: &str, buf: &'a mut PathBuf) -> &'a Path {
        self.parts2(self.work_dir(), dir_relative, buf)
    }

    /// $WORK/step_dir/exit_code
    pub fn exit_code<'a>(&self, step_dir: &Path, buf: &'a mut PathBuf) -> &'a Path {
        self.parts2(step_dir, "exit_code", buf)
    }

    /// $WORK/step_dir/stdout.txt
    pub fn stdout<'a>(&self, step_dir: &Path, buf: &'a mut PathBuf) -> &'a Path {
        self.parts2(step_dir, "stdout.txt", buf)
    }

    /// $WORK/step_dir/stderr.txt
    pub fn stderr<'a>(&self, step_dir: &Path, buf: &'a mut PathBuf) -> &'a Path {
        self.parts2(step_dir, "stderr.txt", buf)
    }

    fn parts2<'a, T, U>(&self, p1: T, p2: U, buf: &'a mut PathBuf) -> &'a Path
    where
        T: AsRef<Path>,
        U: AsRef<Path>,
    {
        buf.clear();
        buf.push(p1);
        buf.push(p2);
        &*buf
    }
}
