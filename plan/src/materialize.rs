use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::{plan_file_name, Error, ExecutionPlan, PLAN_FORMAT_VERSION};

/// What `materialize` actually changed on disk. A second materialize of an
/// unchanged plan reports nothing changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Materialized {
    pub dirs_created: usize,
    pub links_created: usize,
    pub links_replaced: usize,
    pub plan_written: bool,
}

impl Materialized {
    pub fn changed_nothing(&self) -> bool {
        *self == Self::default()
    }
}

impl ExecutionPlan {
    /// Create every step's canonical dir, the alias symlinks tasks use to
    /// reach steps outside their subtree, and the plan file itself.
    /// Idempotent: existing dirs are left alone, correct links are kept,
    /// and the plan file is only rewritten when its bytes change.
    pub fn materialize(&self, work_dir: &Path) -> Result<Materialized> {
        let mut stats = Materialized::default();

        for step in &self.steps {
            let dir = work_dir.join(&step.dir);
            if !dir.is_dir() {
                fs::create_dir_all(&dir)
                    .with_context(|| format!("creating canonical dir {dir:?}"))?;
                stats.dirs_created += 1;
            }
        }

        for edge in &self.aliases {
            let link = work_dir.join(&edge.alias);
            let target = work_dir.join(&edge.target);

            if link.is_symlink() {
                if fs::read_link(&link)? == target {
                    continue;
                }
                log::info!("alias {link:?} points elsewhere; relinking");
                fs::remove_file(&link)?;
                symlink(&target, &link)?;
                stats.links_replaced += 1;
            } else if link.exists() {
                return Err(Error::AliasObstructed(edge.alias.clone()).into());
            } else {
                if let Some(parent) = link.parent() {
                    fs::create_dir_all(parent)?;
                }
                symlink(&target, &link)?;
                stats.links_created += 1;
            }
        }

        stats.plan_written = self.save(work_dir)?;
        Ok(stats)
    }

    /// Write the plan file, unless it already holds exactly these bytes.
    /// Returns whether a write happened.
    pub fn save(&self, work_dir: &Path) -> Result<bool> {
        let path = work_dir.join(plan_file_name(&self.suite));
        let mut text = serde_json::to_string_pretty(self).context("serializing plan")?;
        text.push('\n');

        if let Ok(existing) = fs::read_to_string(&path) {
            if existing == text {
                log::info!("plan file {path:?} is unchanged");
                return Ok(false);
            }
        }
        fs::write(&path, text).with_context(|| format!("writing plan file {path:?}"))?;
        Ok(true)
    }

    /// Read a suite's plan back from the work dir.
    pub fn load(work_dir: &Path, suite: &str) -> Result<Self> {
        let path = work_dir.join(plan_file_name(suite));
        if !path.exists() {
            return Err(Error::PlanNotFound(suite.to_owned()).into());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading plan file {path:?}"))?;
        let plan: ExecutionPlan = serde_json::from_str(&text)
            .with_context(|| format!("parsing plan file {path:?}"))?;
        if plan.version != PLAN_FORMAT_VERSION {
            return Err(Error::UnsupportedVersion {
                found: plan.version,
                expected: PLAN_FORMAT_VERSION,
            }
            .into());
        }
        Ok(plan)
    }
}

/// Symlink the given `link` to `tgt`; works for unix and windows.
fn symlink(tgt: &Path, link: &Path) -> Result<()> {
    #[cfg(unix)]
    std::os::unix::fs::symlink(tgt, link)
        .with_context(|| format!("symlinking {link:?} to {tgt:?}"))?;

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
    use crate::Planner;
    use tempfile::tempdir;
    use workflow::{Registry, Step, Suite, Task};

    fn plan() -> ExecutionPlan {
        let mut registry = Registry::default();
        let mesh = registry.get_or_create("mesh", || Step::new("mesh", vec!["genmesh".to_owned()]));
        let solve = registry.get_or_create("solve", || Step::new("solve", vec!["solver".to_owned()]));

        let mut a = Task::new("a", Path::new("suite/a"));
        a.add_step(mesh, false, &registry).unwrap();
        a.add_step(solve, false, &registry).unwrap();
        let mut b = Task::new("b", Path::new("suite/b"));
        b.add_step(mesh, true, &registry).unwrap();

        let mut suite = Suite::new("nightly");
        suite.add_task(a);
        suite.add_task(b);
        Planner::new(&registry, &suite).plan(Vec::new()).unwrap()
    }

    #[test]
    fn test_materialize_creates_dirs_links_and_plan_file() -> Result<()> {
        let work = tempdir()?;
        let stats = plan().materialize(work.path())?;

        assert_eq!(stats.dirs_created, 2);
        assert_eq!(stats.links_created, 2);
        assert!(stats.plan_written);

        assert!(work.path().join("suite/mesh").is_dir());
        assert!(work.path().join("suite/a/solve").is_dir());

        let link = work.path().join("suite/a/mesh");
        assert!(link.is_symlink());
        assert_eq!(fs::read_link(&link)?, work.path().join("suite/mesh"));

        assert!(work.path().join("nightly.plan.json").is_file());
        Ok(())
    }

    #[test]
    fn test_second_materialize_changes_nothing() -> Result<()> {
        let work = tempdir()?;
        let plan = plan();
        plan.materialize(work.path())?;

        let stats = plan.materialize(work.path())?;
        assert!(stats.changed_nothing(), "second run did: {stats:?}");
        Ok(())
    }

    #[test]
    fn test_wrong_symlink_is_replaced() -> Result<()> {
        let work = tempdir()?;
        let plan = plan();
        plan.materialize(work.path())?;

        let link = work.path().join("suite/a/mesh");
        fs::remove_file(&link)?;
        symlink(Path::new("/nonexistent"), &link)?;

        let stats = plan.materialize(work.path())?;
        assert_eq!(stats.links_replaced, 1);
        assert_eq!(fs::read_link(&link)?, work.path().join("suite/mesh"));
        Ok(())
    }

    #[test]
    fn test_obstructed_alias_is_an_error() -> Result<()> {
        let work = tempdir()?;
        let plan = plan();
        fs::create_dir_all(work.path().join("suite/a/mesh"))?;
        assert!(plan.materialize(work.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_load_round_trip() -> Result<()> {
        let work = tempdir()?;
        let plan = plan();
        plan.save(work.path())?;

        let loaded = ExecutionPlan::load(work.path(), "nightly")?;
        assert_eq!(loaded, plan);
        Ok(())
    }

    #[test]
    fn test_load_missing_plan() {
        let work = tempdir().unwrap();
        let err = ExecutionPlan::load(work.path(), "nightly").unwrap_err();
        assert!(err.to_string().contains("no plan named 'nightly'"));
    }

    #[test]
    fn test_load_rejects_unknown_version() -> Result<()> {
        let work = tempdir()?;
        let mut plan = plan();
        plan.version = 99;
        plan.save(work.path())?;

        let err = ExecutionPlan::load(work.path(), "nightly").unwrap_err();
        assert!(err.to_string().contains("version 99"));
        Ok(())
    }
}
