/// Parsing of `section.key = value` layer files
mod parse;
pub use parse::parse_layer;

/// The layered option stack itself
mod stack;
pub use stack::{ConfigOption, ConfigStack};

pub type Hasher = std::hash::BuildHasherDefault<rustc_hash::FxHasher>;
pub type HashMap<K, V> = std::collections::HashMap<K, V, Hasher>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("option '{section}.{key}' not found (layers consulted: {layers})")]
    Missing {
        section: String,
        key: String,
        layers: String,
    },
    #[error("interpolation cycle while resolving '{0}.{1}': {2}")]
    Cycle(String, String, String),
    #[error("layer '{layer}' line {line}: expected 'section.key = value', got '{text}'")]
    Parse {
        layer: String,
        line: usize,
        text: String,
    },
    #[error("option '{section}.{key}': can't parse '{value}': {cause}")]
    BadValue {
        section: String,
        key: String,
        value: String,
        cause: String,
    },
}
