//! Error types shared across the computation graph engine.

use std::fmt;

use crate::key::Key;

/// Errors produced by the core engine.
#[derive(Debug)]
pub enum Error {
    /// A key string did not match the `name[:dims][:tag]` grammar.
    KeyParse(String),
    /// A strict `add` targeted a key that already exists.
    KeyExists(Key),
    /// One or more keys referenced by a task are not present in the graph.
    MissingKey(Vec<Key>),
    /// An argument had the wrong shape or type for the operator invoked.
    TypeMismatch(String),
    /// A binary operation was attempted between quantities with
    /// non-convertible units.
    IncompatibleUnits(String),
    /// Dimensions were inconsistent: duplicate coordinates, a cycle in the
    /// task graph, or a `concat`/`combine` across unrelated dims.
    Dimension(String),
    /// A name used as an operator or config comp is not recognized.
    Name(String),
    /// An I/O error while loading or writing tabular data.
    Io(std::io::Error),
    /// A CSV parsing/writing error from `load_file`/`write_report`.
    Csv(csv::Error),
    /// Wraps any error raised while evaluating a task during `get`, pinning
    /// down the failing key and the task's printable form.
    Computation {
        key: Key,
        task_repr: String,
        source: Box<Error>,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KeyParse(s) => write!(f, "invalid key expression: {s:?}"),
            Error::KeyExists(k) => write!(f, "key {k} already exists"),
            Error::MissingKey(ks) => {
                write!(f, "missing key(s): ")?;
                for (i, k) in ks.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}")?;
                }
                Ok(())
            }
            Error::TypeMismatch(s) => write!(f, "type mismatch: {s}"),
            Error::IncompatibleUnits(s) => write!(f, "incompatible units: {s}"),
            Error::Dimension(s) => write!(f, "dimension error: {s}"),
            Error::Name(s) => write!(f, "no such operator: {s}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Csv(e) => write!(f, "CSV error: {e}"),
            Error::Computation {
                key,
                task_repr,
                source,
            } => write!(
                f,
                "error computing key {key}: task {task_repr} raised: {source}"
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Computation { source, .. } => Some(source.as_ref()),
            Error::Io(e) => Some(e),
            Error::Csv(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Csv(e)
    }
}

impl Error {
    /// Whether this error is the retryable `MissingKey` class (§4.7 / §4.6).
    pub fn is_missing_key(&self) -> bool {
        matches!(self, Error::MissingKey(_))
    }

    pub fn computation(key: Key, task_repr: String, source: Error) -> Self {
        Error::Computation {
            key,
            task_repr,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
