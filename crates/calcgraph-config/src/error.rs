//! Errors produced while loading a YAML configuration file.

use std::fmt;

/// Errors produced by [`crate::parse_config`], wrapping the underlying I/O,
/// YAML, or engine failure and pinning down which top-level section it
/// happened in (spec.md §7's `configure` "escalates per the per-section
/// handler").
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    Io(std::io::Error),
    /// The file's contents are not valid YAML, or don't match the expected
    /// shape for a recognized section.
    Yaml(serde_yaml::Error),
    /// A recognized section failed to apply to the `Computer`.
    Section {
        name: &'static str,
        source: Box<calcgraph::Error>,
    },
    /// A section referenced a key string that doesn't parse, or held a YAML
    /// value shape `calcgraph::Value` has no equivalent for (e.g. a YAML
    /// `null` passed as a `general:` comp argument).
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "error reading configuration file: {e}"),
            ConfigError::Yaml(e) => write!(f, "invalid configuration YAML: {e}"),
            ConfigError::Section { name, source } => write!(f, "error applying '{name}' section: {source}"),
            ConfigError::InvalidValue(msg) => write!(f, "invalid configuration value: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Yaml(e) => Some(e),
            ConfigError::Section { source, .. } => Some(source.as_ref()),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
