//! Task variants stored in the [`crate::graph::Graph`]: spec.md §3.3 / §4.3.
//!
//! A task is one of a literal value, an `(operator, args...)` application, an
//! alias to another key, or a gather over a list of keys.

use std::fmt;

use crate::key::Key;
use crate::value::Value;

/// One argument to an operator application: either a literal [`Value`] or a
/// reference to another key, resolved by the graph before the operator runs.
#[derive(Debug, Clone)]
pub enum TaskArg {
    Ref(Key),
    Literal(Value),
}

impl TaskArg {
    pub fn as_key(&self) -> Option<&Key> {
        match self {
            TaskArg::Ref(k) => Some(k),
            TaskArg::Literal(_) => None,
        }
    }
}

impl From<Key> for TaskArg {
    fn from(k: Key) -> Self {
        TaskArg::Ref(k)
    }
}
impl From<Value> for TaskArg {
    fn from(v: Value) -> Self {
        TaskArg::Literal(v)
    }
}
impl From<f64> for TaskArg {
    fn from(v: f64) -> Self {
        TaskArg::Literal(Value::Scalar(v))
    }
}

/// A unit of work stored at a key in the graph.
#[derive(Debug, Clone)]
pub enum Task {
    /// A fixed value, no dependencies.
    Literal(Value),
    /// `(operator_name, args...)`, mirroring the original's bare Python
    /// tuple-of-callable-and-args convention (spec.md §3.3).
    Apply { op: String, args: Vec<TaskArg> },
    /// An alias: evaluating this key evaluates `target` instead.
    Alias(Key),
    /// A list of keys, evaluated and collected into a `Value::Sequence`.
    Gather(Vec<Key>),
}

impl Task {
    /// The keys this task directly depends on, in argument order.
    pub fn dependencies(&self) -> Vec<Key> {
        match self {
            Task::Literal(_) => Vec::new(),
            Task::Apply { args, .. } => args.iter().filter_map(|a| a.as_key().cloned()).collect(),
            Task::Alias(k) => vec![k.clone()],
            Task::Gather(ks) => ks.clone(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Literal(v) => write!(f, "{v:?}"),
            Task::Apply { op, args } => {
                write!(f, "{op}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    match a {
                        TaskArg::Ref(k) => write!(f, "{k}")?,
                        TaskArg::Literal(v) => write!(f, "{v:?}")?,
                    }
                }
                write!(f, ")")
            }
            Task::Alias(k) => write!(f, "alias({k})"),
            Task::Gather(ks) => {
                write!(f, "[")?;
                for (i, k) in ks.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}")?;
                }
                write!(f, "]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_dependencies_skip_literals() {
        let k1 = Key::bare("a");
        let k2 = Key::bare("b");
        let task = Task::Apply {
            op: "add".into(),
            args: vec![TaskArg::Ref(k1.clone()), TaskArg::Literal(Value::Scalar(1.0)), TaskArg::Ref(k2.clone())],
        };
        assert_eq!(task.dependencies(), vec![k1, k2]);
    }

    #[test]
    fn gather_dependencies_are_all_keys() {
        let ks = vec![Key::bare("a"), Key::bare("b"), Key::bare("c")];
        let task = Task::Gather(ks.clone());
        assert_eq!(task.dependencies(), ks);
    }
}
