use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Defines fns for creating common paths in the work directory
mod paths;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Specified work directory \"{0}\" is not a directory")]
    NotDirectory(String),
    #[error("Can't perform IO operation: \"{0}\" is not whitelisted")]
    NotWhitelisted(String),
    #[error("Filesystem path is not valid UTF-8")]
    PathEncoding,
}

/// All file operations in the root crate go through this struct.
///
/// All destructive operations check that the path in question is a child of
/// the single whitelisted prefix (the work dir), otherwise they will not be
/// performed. Step subprocesses can of course break this rule; it is up to
/// the user to make sure the model executables behave.
#[derive(Debug)]
pub struct Fs {
    /// The directory we are allowed to modify
    work_prefix: PathBuf,
    /// if true, prevents all destructive operations
    dry_run: bool,
}

impl Fs {
    /// Create a new `Fs` with the given work directory.
    pub fn new(work_prefix: &Path, dry_run: bool) -> Self {
        Self {
            work_prefix: work_prefix.to_path_buf(),
            dry_run,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_prefix
    }

    /// Check whether work dir exists, and create it if not.
    pub fn ensure_work_dir_exists(&mut self, verbose: bool) -> Result<()> {
        if !self.work_prefix.exists() {
            if self.dry_run {
                eprintln!("Dry run. Not creating work directory {:?}", self.work_prefix);
                return Ok(());
            }
            eprintln!(
                "Work directory {:?} doesn't exist. Creating.",
                self.work_prefix
            );
            fs::create_dir_all(&self.work_prefix).context("creating work directory")?;
        } else if !self.work_prefix.is_dir() {
            return Err(Error::NotDirectory(
                self.work_prefix
                    .to_str()
                    .ok_or(Error::PathEncoding)?
                    .to_string(),
            )
            .into());
        } else if verbose {
            eprintln!(
                "Work directory {:?} already exists. Not creating.",
                self.work_prefix
            );
        }

        self.work_prefix = self.work_prefix.canonicalize()?;
        Ok(())
    }

    /// Check if path exists on disk.
    pub fn exists<T: AsRef<Path>>(&self, path: T) -> bool {
        let path = path.as_ref();
        path.exists() || path.is_symlink()
    }

    /// Create a directory (uses `std::fs::create_dir_all`, so an entire tree of dirs can be created).
    pub fn create_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::create_dir_all(path).context("creating dir")?;
        Ok(())
    }

    /// Create a file, and return a writable `File` handle.
    pub fn create_file<T: AsRef<Path>>(&self, path: T) -> Result<fs::File> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        let f = fs::File::create(path).context("creating file")?;
        Ok(f)
    }

    /// Write entire str to a file.
    pub fn write_file<T: AsRef<Path>>(&self, path: T, text: &str) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::write(path, text).context("writing file")?;
        Ok(())
    }

    /// Delete a file or symlink.
    pub fn delete_file<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_file(path).context("deleting file")?;
        Ok(())
    }

    /// Recursively delete a directory.
    pub fn delete_dir<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        let path = path.as_ref();
        self.check_whitelist(path)?;
        fs::remove_dir_all(path).context("deleting dir")?;
        Ok(())
    }

    /// Symlink `link` to `tgt`.
    pub fn symlink<T: AsRef<Path>, U: AsRef<Path>>(&self, tgt: T, link: U) -> Result<()> {
        let (tgt, link) = (tgt.as_ref(), link.as_ref());
        self.check_whitelist(link)?;
        symlink(tgt, link).with_context(|| format!("symlinking {:?} to {:?}", link, tgt))?;
        Ok(())
    }

    /// Read entire file into a String.
    pub fn read_to_buf<T: AsRef<Path>>(&self, path: T, strbuf: &mut String) -> Result<()> {
        use std::io::Read;
        let path = path.as_ref();
        strbuf.clear();
        let cap = fs::metadata(path)?.len() as usize;
        if cap > strbuf.len() {
            strbuf.reserve(cap - strbuf.len());
        }
        let mut f = fs::File::open(path)?;
        f.read_to_string(strbuf)?;
        Ok(())
    }

    fn is_whitelisted<T: AsRef<Path>>(&self, path: T) -> bool {
        path.as_ref().starts_with(&self.work_prefix)
    }

    fn check_whitelist(&self, path: &Path) -> Result<()> {
        if self.dry_run || !self.is_whitelisted(path) {
            Err(Error::NotWhitelisted(path.to_str().ok_or(Error::PathEncoding)?.to_owned()).into())
        } else {
            Ok(())
        }
    }
}

/// Symlink the given `link` to `tgt`; works for unix and windows.
fn symlink(tgt: &Path, link: &Path) -> Result<()> {
    #[cfg(unix)]
    std::os::unix::fs::symlink(tgt, link)?;

    #[cfg(windows)]
    if tgt.is_dir() {
        std::os::windows::fs::symlink_dir(tgt, link)?;
    } else {
        std::os::windows::fs::symlink_file(tgt, link)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_whitelist_blocks_writes_outside_work_dir() -> Result<()> {
        let work = tempdir()?;
        let other = tempdir()?;
        let fs = Fs::new(work.path(), false);

        assert!(fs.write_file(work.path().join("ok.txt"), "fine").is_ok());
        assert!(fs.write_file(other.path().join("no.txt"), "nope").is_err());
        Ok(())
    }

    #[test]
    fn test_dry_run_blocks_all_writes() -> Result<()> {
        let work = tempdir()?;
        let fs = Fs::new(work.path(), true);
        assert!(fs.write_file(work.path().join("no.txt"), "nope").is_err());
        Ok(())
    }
}
