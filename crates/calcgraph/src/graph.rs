//! The task store: a [`Key`]-addressed map of [`Task`]s plus the two lookup
//! indexes `Computer::add`/`infer_keys` need to resolve a *partial* key
//! (bare name, or name+dims with no tag) to the full [`Key`] it was added
//! under (spec.md §4.1 `full_key`, `genno/core/key.py:Key.iter_sums` callers
//! in `computer.py`).

use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::key::Key;
use crate::task::Task;

/// The set of dims (order-independent) and optional tag of a key, used as
/// the lookup index that lets `infer` resolve `"foo"` or `"foo:a-b"` to the
/// full key actually stored, regardless of the stored key's dim order.
type UnsortedIndex = BTreeMap<(String, Vec<String>, Option<String>), Key>;

#[derive(Debug, Default)]
pub struct Graph {
    tasks: HashMap<Key, Task>,
    /// name -> every full key stored under that name, insertion order.
    by_name: HashMap<String, Vec<Key>>,
    /// (name, sorted dims, tag) -> the full key stored for that canonical
    /// identity, independent of the stored key's dim ordering.
    unsorted: UnsortedIndex,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn get(&self, key: &Key) -> Option<&Task> {
        self.tasks.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.tasks.keys()
    }

    /// Insert `task` at `key`. If `strict`, errors when `key` already
    /// exists; otherwise silently replaces it (spec.md §4.5 `add` `strict`
    /// kwarg).
    pub fn insert(&mut self, key: Key, task: Task, strict: bool) -> Result<()> {
        if strict && self.tasks.contains_key(&key) {
            return Err(Error::KeyExists(key));
        }
        self.index(&key);
        self.tasks.insert(key, task);
        Ok(())
    }

    fn index(&mut self, key: &Key) {
        let names = self.by_name.entry(key.name().to_string()).or_default();
        if !names.contains(key) {
            names.push(key.clone());
        }
        let canon = unsorted_identity(key);
        self.unsorted.insert(canon, key.clone());
    }

    /// Remove the task at `key`, clearing it from both indexes (spec.md
    /// §4.3 `remove`). A thin wrapper over [`Graph::pop`] that discards the
    /// removed task, for callers that only care that the key is gone.
    pub fn remove(&mut self, key: &Key) {
        self.pop(key);
    }

    /// Remove and return the task at `key`, clearing it from both indexes.
    pub fn pop(&mut self, key: &Key) -> Option<Task> {
        let task = self.tasks.remove(key)?;
        if let Some(names) = self.by_name.get_mut(key.name()) {
            names.retain(|k| k != key);
        }
        self.unsorted.remove(&unsorted_identity(key));
        Some(task)
    }

    /// All full keys stored under a bare name, in insertion order.
    pub fn full_keys(&self, name: &str) -> &[Key] {
        self.by_name.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The canonical full-dimensionality [`Key`] most recently inserted for
    /// `name`, or `None` (spec.md §4.3 `full_key`).
    pub fn full_key(&self, name: &str) -> Option<&Key> {
        self.by_name.get(name).and_then(|v| v.last())
    }

    /// Resolve a (possibly partial, possibly dim-reordered) key to the exact
    /// [`Key`] stored in the graph with the same name/dim-set/tag, if any
    /// (spec.md §4.1 / §4.5 `infer_keys`).
    pub fn infer(&self, key: &Key) -> Option<&Key> {
        self.unsorted.get(&unsorted_identity(key))
    }

    /// Alias for [`Graph::infer`] under the name spec.md §4.3 uses:
    /// `unsorted_key(key_with_dims) -> Key?`.
    pub fn unsorted_key(&self, key: &Key) -> Option<&Key> {
        self.infer(key)
    }

    /// Like [`Graph::infer`], but falls back to a bare-name lookup when no
    /// exact dim-set/tag match exists and exactly one key is stored under
    /// that name (the common case of `add("foo", ...)` referencing a
    /// previously-added `"foo:a-b"`).
    pub fn infer_or_unique(&self, key: &Key) -> Option<&Key> {
        if let Some(k) = self.infer(key) {
            return Some(k);
        }
        if key.dims().is_empty() && key.tag().is_none() {
            let names = self.by_name.get(key.name())?;
            if names.len() == 1 {
                return names.first();
            }
        }
        None
    }
}

fn unsorted_identity(key: &Key) -> (String, Vec<String>, Option<String>) {
    let mut dims: Vec<String> = key.dims().to_vec();
    dims.sort();
    (key.name().to_string(), dims, key.tag().map(str::to_string))
}
