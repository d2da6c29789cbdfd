use crate::{HashMap, Step, StepId};

/// Owns the one canonical `Step` instance per logical path.
///
/// Every task goes through `get_or_create` instead of constructing steps
/// directly, so two tasks naming the same path share one step. Scoped to a
/// single graph-construction pass; no locking, since construction and
/// execution are single-threaded.
#[derive(Debug, Default)]
pub struct Registry {
    ids: HashMap<String, StepId>,
    steps: Vec<Step>,
}

impl Registry {
    /// Return the id of the step at `path`, constructing it with `factory`
    /// only if no step with that path exists yet. Idempotent: two calls
    /// with the same path return the same id.
    pub fn get_or_create(&mut self, path: &str, factory: impl FnOnce() -> Step) -> StepId {
        if let Some(id) = self.ids.get(path) {
            log::trace!("registry hit for step '{path}'");
            return *id;
        }
        let step = factory();
        debug_assert_eq!(step.path(), path);
        let id = StepId::from(self.steps.len());
        self.steps.push(step);
        self.ids.insert(path.to_owned(), id);
        id
    }

    pub fn lookup(&self, path: &str) -> Option<StepId> {
        self.ids.get(path).copied()
    }

    pub fn get(&self, id: StepId) -> &Step {
        &self.steps[usize::from(id)]
    }

    pub fn get_mut(&mut self, id: StepId) -> &mut Step {
        &mut self.steps[usize::from(id)]
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StepId, &Step)> {
        self.steps.iter().enumerate().map(|(i, s)| (StepId::from(i), s))
    }
}
