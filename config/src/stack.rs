use std::cell::RefCell;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::{parse_layer, Error, HashMap};

/// Matches a `${section:key}` cross-reference inside an option value.
static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_.-]+):([A-Za-z0-9_.-]+)\}").unwrap());

/// One named layer of options. Within a layer, a repeated `(section, key)`
/// keeps the last definition in the file.
#[derive(Debug)]
pub struct Layer {
    name: String,
    options: HashMap<(String, String), String>,
}

/// A fully-resolved option, with the layer it came from for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOption {
    pub section: String,
    pub key: String,
    pub value: String,
    pub layer: String,
}

/// Ordered stack of configuration layers.
///
/// Later-added layers take priority over earlier ones for the same
/// `(section, key)`. Lookups expand `${section:key}` references
/// recursively, with cycle detection, and memoize resolved values.
/// Adding a layer invalidates the memo.
#[derive(Debug, Default)]
pub struct ConfigStack {
    layers: Vec<Layer>,
    memo: RefCell<HashMap<(String, String), String>>,
}

impl ConfigStack {
    /// Parse `text` and push it as the highest-priority layer.
    pub fn add_layer(&mut self, name: &str, text: &str) -> Result<(), Error> {
        let parsed = parse_layer(name, text)?;
        log::debug!("adding config layer '{name}' with {} options", parsed.len());

        let mut options = HashMap::default();
        for (section_key, value) in parsed {
            options.insert(section_key, value);
        }
        self.layers.push(Layer {
            name: name.to_owned(),
            options,
        });

        // resolved values may now be stale:
        self.memo.borrow_mut().clear();
        Ok(())
    }

    /// Push a layer of already-resolved options (e.g. a snapshot read back
    /// from a persisted plan) without going through the file parser.
    pub fn add_resolved_layer(
        &mut self,
        name: &str,
        options: impl IntoIterator<Item = ((String, String), String)>,
    ) {
        let options = options.into_iter().collect();
        self.layers.push(Layer {
            name: name.to_owned(),
            options,
        });
        self.memo.borrow_mut().clear();
    }

    /// Number of layers in the stack.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Resolve `(section, key)` from the highest-priority layer that defines
    /// it, expanding `${section:key}` references.
    pub fn get(&self, section: &str, key: &str) -> Result<String, Error> {
        let mut visiting = Vec::with_capacity(4);
        self.resolve(section, key, &mut visiting)
    }

    /// Like `get`, but a missing option is `None` rather than an error.
    pub fn get_opt(&self, section: &str, key: &str) -> Result<Option<String>, Error> {
        match self.get(section, key) {
            Ok(v) => Ok(Some(v)),
            Err(Error::Missing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Like `get`, but a missing option falls back to `default`.
    pub fn get_or(&self, section: &str, key: &str, default: &str) -> Result<String, Error> {
        Ok(self.get_opt(section, key)?.unwrap_or_else(|| default.to_owned()))
    }

    /// Resolve and parse a scalar option.
    pub fn get_parse<T>(&self, section: &str, key: &str) -> Result<T, Error>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.get(section, key)?;
        parse_value(section, key, &value)
    }

    /// Resolve and parse a scalar option, falling back to `default` when
    /// the option is missing.
    pub fn get_parse_or<T>(&self, section: &str, key: &str, default: T) -> Result<T, Error>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_opt(section, key)? {
            Some(v) => parse_value(section, key, &v),
            None => Ok(default),
        }
    }

    /// Resolve a comma-separated option into typed elements.
    pub fn get_list<T>(&self, section: &str, key: &str) -> Result<Vec<T>, Error>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let value = self.get(section, key)?;
        value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_value(section, key, s))
            .collect()
    }

    /// Like `get_list`, but a missing option is an empty list.
    pub fn get_list_or_empty<T>(&self, section: &str, key: &str) -> Result<Vec<T>, Error>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_list(section, key) {
            Ok(v) => Ok(v),
            Err(Error::Missing { .. }) => Ok(Vec::with_capacity(0)),
            Err(e) => Err(e),
        }
    }

    /// All section names visible in the stack, sorted.
    pub fn sections(&self) -> Vec<String> {
        let mut sections = BTreeSet::new();
        for layer in &self.layers {
            for (section, _) in layer.options.keys() {
                sections.insert(section.clone());
            }
        }
        sections.into_iter().collect()
    }

    /// Flatten every visible option, fully resolved, in deterministic
    /// (section, key) order. Used to embed a config snapshot in a plan.
    pub fn snapshot(&self) -> Result<Vec<ConfigOption>, Error> {
        let mut keys = BTreeSet::new();
        for layer in &self.layers {
            for section_key in layer.options.keys() {
                keys.insert(section_key.clone());
            }
        }

        let mut options = Vec::with_capacity(keys.len());
        for (section, key) in keys {
            let value = self.get(&section, &key)?;
            // raw() can't fail for a key we just enumerated:
            let (_, layer) = self.raw(&section, &key).unwrap();
            options.push(ConfigOption {
                section,
                key,
                value,
                layer: layer.to_owned(),
            });
        }
        Ok(options)
    }

    fn resolve(
        &self,
        section: &str,
        key: &str,
        visiting: &mut Vec<(String, String)>,
    ) -> Result<String, Error> {
        if let Some(v) = self.memo.borrow().get(&(section.to_owned(), key.to_owned())) {
            return Ok(v.clone());
        }

        if visiting.iter().any(|(s, k)| s == section && k == key) {
            let mut chain = visiting
                .iter()
                .map(|(s, k)| format!("{s}.{k}"))
                .collect::<Vec<_>>()
                .join(" -> ");
            chain.push_str(&format!(" -> {section}.{key}"));
            return Err(Error::Cycle(section.to_owned(), key.to_owned(), chain));
        }
        visiting.push((section.to_owned(), key.to_owned()));

        let (raw, layer) = self.raw(section, key).ok_or_else(|| Error::Missing {
            section: section.to_owned(),
            key: key.to_owned(),
            layers: self.layer_list(),
        })?;
        log::trace!("resolving '{section}.{key}' from layer '{layer}'");

        let mut resolved = String::with_capacity(raw.len());
        let mut last = 0;
        for caps in REFERENCE.captures_iter(raw) {
            let whole = caps.get(0).unwrap();
            resolved.push_str(&raw[last..whole.start()]);
            resolved.push_str(&self.resolve(&caps[1], &caps[2], visiting)?);
            last = whole.end();
        }
        resolved.push_str(&raw[last..]);

        visiting.pop();
        self.memo
            .borrow_mut()
            .insert((section.to_owned(), key.to_owned()), resolved.clone());
        Ok(resolved)
    }

    /// Unexpanded value + defining layer name, highest priority first.
    fn raw(&self, section: &str, key: &str) -> Option<(&str, &str)> {
        for layer in self.layers.iter().rev() {
            if let Some(v) = layer.options.get(&(section.to_owned(), key.to_owned())) {
                return Some((v, &layer.name));
            }
        }
        None
    }

    fn layer_list(&self) -> String {
        if self.layers.is_empty() {
            return "none".to_owned();
        }
        self.layers
            .iter()
            .rev()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn parse_value<T>(section: &str, key: &str, value: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| Error::BadValue {
        section: section.to_owned(),
        key: key.to_owned(),
        value: value.to_owned(),
        cause: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(layers: &[(&str, &str)]) -> ConfigStack {
        let mut stack = ConfigStack::default();
        for (name, text) in layers {
            stack.add_layer(name, text).unwrap();
        }
        stack
    }

    #[test]
    fn test_later_layer_wins() {
        let s = stack(&[("l1", "run.x = 1\n"), ("l2", "run.x = 2\n")]);
        assert_eq!(s.get("run", "x").unwrap(), "2");

        let s = stack(&[("l2", "run.x = 2\n"), ("l1", "run.x = 1\n")]);
        assert_eq!(s.get("run", "x").unwrap(), "1");
    }

    #[test]
    fn test_interpolation_across_layers() {
        let s = stack(&[
            ("base", "paths.root = /data\npaths.mesh = ${paths:root}/mesh\n"),
            ("site", "paths.root = /scratch\n"),
        ]);
        assert_eq!(s.get("paths", "mesh").unwrap(), "/scratch/mesh");
    }

    #[test]
    fn test_nested_interpolation() {
        let s = stack(&[(
            "base",
            "a.x = 1\na.y = ${a:x}2\na.z = ${a:y}3\n",
        )]);
        assert_eq!(s.get("a", "z").unwrap(), "123");
    }

    #[test]
    fn test_cycle_detected() {
        let s = stack(&[("base", "a.x = ${a:y}\na.y = ${a:x}\n")]);
        match s.get("a", "x").unwrap_err() {
            Error::Cycle(section, key, chain) => {
                assert_eq!(section, "a");
                assert_eq!(key, "x");
                assert!(chain.contains("a.x -> a.y -> a.x"), "chain was: {chain}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_lists_layers() {
        let s = stack(&[("base", "run.x = 1\n"), ("site", "run.y = 2\n")]);
        match s.get("run", "z").unwrap_err() {
            Error::Missing { layers, .. } => assert_eq!(layers, "site, base"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_get_list_typed() {
        let s = stack(&[("base", "step.mesh.sizes = 8, 16,32\n")]);
        let sizes: Vec<u32> = s.get_list("step.mesh", "sizes").unwrap();
        assert_eq!(sizes, vec![8, 16, 32]);
    }

    #[test]
    fn test_memo_invalidated_by_add_layer() {
        let mut s = stack(&[("base", "run.x = 1\n")]);
        assert_eq!(s.get("run", "x").unwrap(), "1");
        s.add_layer("override", "run.x = 2\n").unwrap();
        assert_eq!(s.get("run", "x").unwrap(), "2");
    }

    #[test]
    fn test_snapshot_deterministic_with_provenance() {
        let s = stack(&[
            ("base", "run.x = 1\nrun.y = ${run:x}0\n"),
            ("site", "run.x = 3\n"),
        ]);
        let snap = s.snapshot().unwrap();
        assert_eq!(snap, s.snapshot().unwrap());

        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].key, "x");
        assert_eq!(snap[0].value, "3");
        assert_eq!(snap[0].layer, "site");
        assert_eq!(snap[1].key, "y");
        assert_eq!(snap[1].value, "30");
        assert_eq!(snap[1].layer, "base");
    }
}
