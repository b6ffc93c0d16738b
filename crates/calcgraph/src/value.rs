//! The `Value` sum type: the heterogeneous payload that can flow as a task
//! argument or be held in the `config` sub-dict. Mirrors spec.md §9's design
//! note that, since operators are resolved by name at task-build time and
//! may take heterogeneous arguments, a typed reimplementation needs a sum
//! type: `Key | Quantity | Scalar | Mapping | Sequence`.

use std::collections::BTreeMap;

use crate::key::Key;
use crate::quantity::Quantity;

/// A task argument or config value.
#[derive(Debug, Clone)]
pub enum Value {
    Key(Key),
    Quantity(Quantity),
    Scalar(f64),
    Str(String),
    Mapping(BTreeMap<String, Value>),
    Sequence(Vec<Value>),
}

impl Value {
    pub fn as_quantity(&self) -> Option<&Quantity> {
        match self {
            Value::Quantity(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Value::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&Key> {
        match self {
            Value::Key(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Scalar(v)
    }
}

impl From<Quantity> for Value {
    fn from(v: Quantity) -> Self {
        Value::Quantity(v)
    }
}

impl From<Key> for Value {
    fn from(v: Key) -> Self {
        Value::Key(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
