//! The `Computer` facade: task graph assembly plus culled, memoized
//! evaluation (spec.md §3.4 / §4.5–§4.7), mirroring
//! `genno/core/computer.py:Computer`.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::key::Key;
use crate::ops::OperatorRegistry;
use crate::task::{Task, TaskArg};
use crate::units::EnvConfig;
use crate::value::Value;

/// What to store at a key, as given to [`Computer::add`] — the Rust
/// equivalent of the original's "a task is whatever you hand `add`"
/// dispatch (spec.md §4.5): a plain value, an alias to another key, a
/// gather over several keys, or an operator application.
#[derive(Debug, Clone)]
pub enum AddSpec {
    Literal(Value),
    Alias(Key),
    Gather(Vec<Key>),
    Apply(String, Vec<TaskArg>),
}

impl From<Value> for AddSpec {
    fn from(v: Value) -> Self {
        AddSpec::Literal(v)
    }
}
impl From<f64> for AddSpec {
    fn from(v: f64) -> Self {
        AddSpec::Literal(Value::Scalar(v))
    }
}
impl From<Key> for AddSpec {
    fn from(k: Key) -> Self {
        AddSpec::Alias(k)
    }
}

fn spec_to_task(spec: AddSpec) -> Task {
    match spec {
        AddSpec::Literal(v) => Task::Literal(v),
        AddSpec::Alias(k) => Task::Alias(k),
        AddSpec::Gather(ks) => Task::Gather(ks),
        AddSpec::Apply(op, args) => Task::Apply { op, args },
    }
}

/// What `add_queue` does once an item has exhausted `max_tries` (spec.md
/// §4.6 `add_queue(queue, max_tries, fail)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fail {
    /// Raise the accumulated `MissingKey` error (the default).
    Raise,
    /// Log the exhausted item at the configured level and move on, leaving
    /// it permanently un-added.
    Log,
}

#[derive(Debug)]
pub struct Computer {
    graph: Graph,
    ops: OperatorRegistry,
    env: EnvConfig,
    config: std::collections::BTreeMap<String, Value>,
}

impl Computer {
    pub fn new(env: EnvConfig) -> Self {
        Computer {
            graph: Graph::new(),
            ops: OperatorRegistry::default(),
            env,
            config: std::collections::BTreeMap::new(),
        }
    }

    pub fn env(&self) -> &EnvConfig {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut EnvConfig {
        &mut self.env
    }

    pub fn config(&self) -> &std::collections::BTreeMap<String, Value> {
        &self.config
    }

    pub fn set_config(&mut self, name: impl Into<String>, value: Value) {
        self.config.insert(name.into(), value);
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Register `f` under `name`, making it resolvable by later [`Computer::add`]
    /// calls — the Rust equivalent of extending the original's module search
    /// path (spec.md §4.4, `require_compat`).
    pub fn require_compat(&mut self, name: impl Into<String>, f: crate::ops::OpFn) {
        self.ops.register(name, f);
    }

    /// Whether `name` resolves to a registered operator (built-in or
    /// `require_compat`-added). Used by `calcgraph-expr` to raise a
    /// `NameError`-equivalent as soon as an expression calls an unknown
    /// operator, rather than deferring to `get` time (spec.md §4.5 `eval`).
    pub fn has_operator(&self, name: &str) -> bool {
        self.ops.contains(name)
    }

    /// Add a single task at `key`. If `sums` is set, also queues a `sum`
    /// task at every strict dim-subset of `key` (spec.md §4.5 `add`'s `sums`
    /// kwarg, built from [`Key::iter_sums`]).
    ///
    /// `strict` checks before indexing, per spec.md §9's note on the
    /// `strict`/`sums` interaction: the target-exists check and the
    /// input-key resolution both run in `add_single` *before* any of the
    /// `sums`-derived partial-sum keys are queued, so a strict failure on
    /// the primary key never leaves partial sums half-added.
    pub fn add(&mut self, key: Key, spec: AddSpec, strict: bool, sums: bool) -> Result<Key> {
        self.add_single(key.clone(), spec, strict)?;
        if sums {
            for (partial, dropped) in key.iter_sums() {
                let op_args = vec![
                    TaskArg::Ref(key.clone()),
                    TaskArg::Literal(Value::Sequence(dropped.iter().cloned().map(Value::Str).collect())),
                ];
                // Non-strict: an explicitly-added partial sum at the same key
                // takes precedence over one inferred here.
                let _ = self.add_single(partial, AddSpec::Apply("sum".into(), op_args), false);
            }
        }
        Ok(key)
    }

    /// Insert `task` at `key`, applying the `strict` contract from spec.md
    /// §4.5: the target must not already exist, and every key referenced by
    /// the task must resolve via `unsorted_key`/`full_key`, with the task's
    /// key arguments rewritten to the canonical stored form so later
    /// evaluator lookups hit directly instead of re-running `infer_or_unique`.
    fn add_single(&mut self, key: Key, spec: AddSpec, strict: bool) -> Result<Key> {
        let mut task = spec_to_task(spec);
        if strict {
            if self.graph.contains(&key) {
                return Err(Error::KeyExists(key));
            }
            self.resolve_task_refs(&mut task)?;
        }
        self.graph.insert(key.clone(), task, strict)?;
        Ok(key)
    }

    /// Rewrite every [`TaskArg::Ref`]/[`Task::Alias`]/[`Task::Gather`] key in
    /// `task` to the canonical key actually stored in the graph, collecting
    /// *all* unresolvable references into a single `MissingKey` (spec.md §4.5:
    /// "Missing references → MissingKey listing all absentees").
    fn resolve_task_refs(&self, task: &mut Task) -> Result<()> {
        let mut missing = Vec::new();
        let mut resolve = |k: &mut Key| {
            if let Some(full) = self.graph.infer_or_unique(k) {
                *k = full.clone();
            } else {
                missing.push(k.clone());
            }
        };
        match task {
            Task::Literal(_) => {}
            Task::Alias(k) => resolve(k),
            Task::Gather(ks) => {
                for k in ks {
                    resolve(k);
                }
            }
            Task::Apply { args, .. } => {
                for a in args {
                    if let TaskArg::Ref(k) = a {
                        resolve(k);
                    }
                }
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingKey(missing))
        }
    }

    /// Add several tasks as a batch with `max_tries = 2` and `fail =
    /// Raise`, the defaults `calcgraph-config` uses for config-file sections
    /// (spec.md §4.6). See [`Computer::add_queue_with`] for the full
    /// cooperative retry contract.
    pub fn add_queue(&mut self, items: Vec<(Key, AddSpec)>) -> Result<Vec<Key>> {
        self.add_queue_with(items, 2, Fail::Raise)
    }

    /// Add several tasks as a FIFO retry queue, tolerating forward
    /// references among them (spec.md §4.6). Each item is popped in turn;
    /// if its task references a key not yet in the graph, the add raises
    /// *MissingKey* and the item is re-appended to the back of the queue
    /// with its try count incremented, up to `max_tries`. An item that
    /// exceeds `max_tries` either raises the accumulated `MissingKey` error
    /// (`fail = Raise`) or is logged and discarded (`fail = Log`), per the
    /// queue-item state machine new → trying(count≤max_tries) →
    /// (added | discarded | raised). Any non-`MissingKey` error from an
    /// attempt raises immediately, unretried. Returns the keys actually
    /// added, in the order they were added.
    pub fn add_queue_with(
        &mut self,
        items: Vec<(Key, AddSpec)>,
        max_tries: usize,
        fail: Fail,
    ) -> Result<Vec<Key>> {
        let mut queue: std::collections::VecDeque<(Key, AddSpec, usize)> =
            items.into_iter().map(|(k, s)| (k, s, 0)).collect();
        let mut added = Vec::new();

        while let Some((key, spec, tries)) = queue.pop_front() {
            let task = spec_to_task(spec.clone());
            match self.check_deps(&task) {
                Ok(()) => {
                    self.graph.insert(key.clone(), task, false)?;
                    added.push(key);
                }
                Err(e) if e.is_missing_key() => {
                    if tries + 1 < max_tries {
                        queue.push_back((key, spec, tries + 1));
                    } else {
                        match fail {
                            Fail::Raise => return Err(e),
                            Fail::Log => log::warn!(
                                "add_queue: discarding {key} after {max_tries} tries: {e}"
                            ),
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(added)
    }

    fn check_deps(&self, task: &Task) -> Result<()> {
        let missing: Vec<Key> = task
            .dependencies()
            .into_iter()
            .filter(|d| self.graph.infer_or_unique(d).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::MissingKey(missing))
        }
    }

    /// Resolve `key` to the full key actually stored in the graph, if any.
    pub fn full_key(&self, key: &Key) -> Option<Key> {
        self.graph.infer_or_unique(key).cloned()
    }

    /// Collect the transitive closure of `key`'s dependencies that must be
    /// evaluated to compute it, and a topological order over that set
    /// (spec.md §4.7 `get`'s culling step). Errors with `MissingKey` if any
    /// reachable dependency is not present in the graph.
    fn cull(&self, root: &Key) -> Result<Vec<Key>> {
        let root = self
            .graph
            .infer_or_unique(root)
            .cloned()
            .ok_or_else(|| Error::MissingKey(vec![root.clone()]))?;

        let mut visiting: HashSet<Key> = HashSet::new();
        let mut visited: HashSet<Key> = HashSet::new();
        let mut order = Vec::new();

        fn visit(
            graph: &Graph,
            key: &Key,
            visiting: &mut HashSet<Key>,
            visited: &mut HashSet<Key>,
            order: &mut Vec<Key>,
        ) -> Result<()> {
            if visited.contains(key) {
                return Ok(());
            }
            if !visiting.insert(key.clone()) {
                return Err(Error::Dimension(format!("cycle detected at key {key}")));
            }
            let task = graph.get(key).ok_or_else(|| Error::MissingKey(vec![key.clone()]))?;
            for dep in task.dependencies() {
                let full = graph
                    .infer_or_unique(&dep)
                    .cloned()
                    .ok_or_else(|| Error::MissingKey(vec![dep.clone()]))?;
                visit(graph, &full, visiting, visited, order)?;
            }
            visiting.remove(key);
            visited.insert(key.clone());
            order.push(key.clone());
            Ok(())
        }

        visit(&self.graph, &root, &mut visiting, &mut visited, &mut order)?;
        log::debug!("cull({root}): {} task(s) to evaluate", order.len());
        Ok(order)
    }

    /// Evaluate `key`, culling to its dependency closure, evaluating in
    /// topological order, and memoizing intermediate results for the
    /// duration of this call only (spec.md §4.7 `get`; no cross-call cache).
    pub fn get(&self, key: &Key) -> Result<Value> {
        let order = self.cull(key)?;
        let mut memo: HashMap<Key, Value> = HashMap::new();

        for k in &order {
            let task = self
                .graph
                .get(k)
                .expect("culled key must be present in graph");
            let value = self
                .eval_task(k, task, &memo)
                .map_err(|e| Error::computation(k.clone(), task.to_string(), e))?;
            memo.insert(k.clone(), value);
        }

        let full = self.graph.infer_or_unique(key).cloned().unwrap_or_else(|| key.clone());
        memo.remove(&full)
            .ok_or_else(|| Error::MissingKey(vec![full]))
    }

    fn eval_task(&self, key: &Key, task: &Task, memo: &HashMap<Key, Value>) -> Result<Value> {
        match task {
            Task::Literal(v) => Ok(v.clone()),
            Task::Alias(target) => {
                let full = self
                    .graph
                    .infer_or_unique(target)
                    .ok_or_else(|| Error::MissingKey(vec![target.clone()]))?;
                memo.get(full)
                    .cloned()
                    .ok_or_else(|| Error::MissingKey(vec![full.clone()]))
            }
            Task::Gather(keys) => {
                let mut out = Vec::with_capacity(keys.len());
                for k in keys {
                    let full = self
                        .graph
                        .infer_or_unique(k)
                        .ok_or_else(|| Error::MissingKey(vec![k.clone()]))?;
                    out.push(
                        memo.get(full)
                            .cloned()
                            .ok_or_else(|| Error::MissingKey(vec![full.clone()]))?,
                    );
                }
                Ok(Value::Sequence(out))
            }
            Task::Apply { op, args } => {
                let f = self.ops.get(op)?;
                let mut resolved = Vec::with_capacity(args.len());
                for a in args {
                    match a {
                        TaskArg::Literal(v) => resolved.push(v.clone()),
                        TaskArg::Ref(k) => {
                            let full = self
                                .graph
                                .infer_or_unique(k)
                                .ok_or_else(|| Error::MissingKey(vec![k.clone()]))?;
                            resolved.push(
                                memo.get(full)
                                    .cloned()
                                    .ok_or_else(|| Error::MissingKey(vec![full.clone()]))?,
                            );
                        }
                    }
                }
                let _ = key;
                f(&resolved, &self.env)
            }
        }
    }

    /// Render `key`'s task tree, one line per dependency, indented by
    /// depth — the Rust equivalent of `genno/core/describe.py`'s textual
    /// tree (spec.md §4.7 `describe`).
    pub fn describe(&self, key: &Key) -> Result<String> {
        let full = self
            .graph
            .infer_or_unique(key)
            .cloned()
            .ok_or_else(|| Error::MissingKey(vec![key.clone()]))?;
        let mut out = String::new();
        let mut seen = HashSet::new();
        self.describe_into(&full, 0, &mut out, &mut seen);
        Ok(out)
    }

    fn describe_into(&self, key: &Key, depth: usize, out: &mut String, seen: &mut HashSet<Key>) {
        out.push_str(&"  ".repeat(depth));
        let task = self.graph.get(key);
        match task {
            Some(t) => out.push_str(&format!("{key}: {t}\n")),
            None => {
                out.push_str(&format!("{key}: <missing>\n"));
                return;
            }
        }
        if !seen.insert(key.clone()) {
            return;
        }
        if let Some(t) = task {
            for dep in t.dependencies() {
                if let Some(full) = self.graph.infer_or_unique(&dep) {
                    self.describe_into(&full.clone(), depth + 1, out, seen);
                } else {
                    out.push_str(&"  ".repeat(depth + 1));
                    out.push_str(&format!("{dep}: <missing>\n"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::{Label, Quantity};

    fn new_computer() -> Computer {
        Computer::new(EnvConfig::default())
    }

    #[test]
    fn literal_add_and_get_round_trips() {
        let mut c = new_computer();
        let k = Key::bare("x");
        c.add(k.clone(), AddSpec::Literal(Value::Scalar(42.0)), true, false).unwrap();
        assert_eq!(c.get(&k).unwrap().as_scalar(), Some(42.0));
    }

    #[test]
    fn apply_task_resolves_dependencies() {
        let mut c = new_computer();
        let a = Key::bare("a");
        let b = Key::bare("b");
        let sum = Key::bare("sum");
        let qa = Quantity::series("x", vec![Label::from("i")], vec![1.0]).unwrap();
        let qb = Quantity::series("x", vec![Label::from("i")], vec![2.0]).unwrap();
        c.add(a.clone(), AddSpec::Literal(Value::Quantity(qa)), true, false).unwrap();
        c.add(b.clone(), AddSpec::Literal(Value::Quantity(qb)), true, false).unwrap();
        c.add(
            sum.clone(),
            AddSpec::Apply("add".into(), vec![TaskArg::Ref(a), TaskArg::Ref(b)]),
            true,
            false,
        )
        .unwrap();

        let result = c.get(&sum).unwrap();
        let q = result.as_quantity().unwrap();
        assert_eq!(q.get(&[Label::from("i")]), Some(3.0));
    }

    #[test]
    fn add_queue_tolerates_forward_references() {
        let mut c = new_computer();
        let a = Key::bare("a");
        let b = Key::bare("b");
        let items = vec![
            (
                b.clone(),
                AddSpec::Apply("add".into(), vec![TaskArg::Ref(a.clone()), TaskArg::Literal(Value::Scalar(1.0))]),
            ),
            (a.clone(), AddSpec::Literal(Value::Scalar(10.0))),
        ];
        // `b` references `a` before `a` is added in this same batch; must
        // not fail, and must retry `b` after `a` lands.
        let added = c.add_queue(items).unwrap();
        assert_eq!(added.len(), 2);
    }

    #[test]
    fn add_queue_retry_budget_determines_success_or_failure() {
        // spec.md §8 scenario 6: the same out-of-order batch succeeds with
        // enough retries and fails once `max_tries` is too tight to let the
        // first item survive being requeued.
        let a = Key::bare("a");
        let b = Key::bare("b");
        let items = |a: &Key, b: &Key| {
            vec![
                (
                    b.clone(),
                    AddSpec::Apply(
                        "add".into(),
                        vec![TaskArg::Ref(a.clone()), TaskArg::Literal(Value::Scalar(0.0))],
                    ),
                ),
                (
                    a.clone(),
                    AddSpec::Apply(
                        "add".into(),
                        vec![TaskArg::Ref(Key::bare("source")), TaskArg::Literal(Value::Scalar(0.0))],
                    ),
                ),
            ]
        };

        let mut with_retries = new_computer();
        with_retries.add(Key::bare("source"), AddSpec::Literal(Value::Scalar(1.0)), true, false).unwrap();
        let added = with_retries.add_queue_with(items(&a, &b), 2, Fail::Raise).unwrap();
        assert_eq!(added.len(), 2);

        let mut tight_budget = new_computer();
        tight_budget.add(Key::bare("source"), AddSpec::Literal(Value::Scalar(1.0)), true, false).unwrap();
        let err = tight_budget.add_queue_with(items(&a, &b), 1, Fail::Raise).unwrap_err();
        match err {
            Error::MissingKey(ks) => assert_eq!(ks, vec![a.clone()]),
            other => panic!("expected MissingKey, got {other:?}"),
        }
    }

    #[test]
    fn get_errors_on_missing_key() {
        let c = new_computer();
        let err = c.get(&Key::bare("nope")).unwrap_err();
        assert!(err.is_missing_key());
    }

    #[test]
    fn cull_only_evaluates_reachable_subgraph() {
        let mut c = new_computer();
        let unrelated = Key::bare("unrelated");
        c.add(unrelated, AddSpec::Literal(Value::Scalar(999.0)), true, false).unwrap();
        let k = Key::bare("k");
        c.add(k.clone(), AddSpec::Literal(Value::Scalar(1.0)), true, false).unwrap();
        // Evaluating `k` must succeed even though `unrelated`'s task is
        // never touched by `eval_task` (there is nothing that would make
        // that observable here beyond `get` succeeding quickly).
        assert_eq!(c.get(&k).unwrap().as_scalar(), Some(1.0));
    }

    #[test]
    fn describe_renders_nested_dependencies() {
        let mut c = new_computer();
        let a = Key::bare("a");
        let b = Key::bare("b");
        c.add(a.clone(), AddSpec::Literal(Value::Scalar(1.0)), true, false).unwrap();
        c.add(b.clone(), AddSpec::Alias(a), true, false).unwrap();
        let text = c.describe(&b).unwrap();
        assert!(text.contains("b: alias(a)"));
        assert!(text.contains("  a:"));
    }
}
