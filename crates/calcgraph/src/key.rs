//! Structured key names: `name[:dim1-dim2-…][:tag]`.
//!
//! See spec.md §3.1 / §4.1 and `genno/core/key.py` (original_source) for the
//! semantics this mirrors: equality and ordering ignore dimension order, but
//! the canonical textual form (and therefore `Hash`) does not — see
//! `hash_vs_eq` below.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::{Error, Result};

/// A structured identifier for a computation output.
///
/// Two keys are [`Eq`] iff `name`, `tag`, and the *set* of `dims` agree, but
/// [`Hash`] is computed from the canonical rendered string with `dims` in
/// their given order. This means two equal keys with differently-ordered
/// dims hash differently — this is deliberate (spec.md §9 "Key hashing vs
/// equality") so that the two orderings can coexist as distinct entries in
/// [`crate::graph::Graph`], with resolution between them delegated to the
/// unsorted-key index.
#[derive(Debug, Clone)]
pub struct Key {
    name: String,
    dims: Vec<String>,
    tag: Option<String>,
}

fn valid_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn valid_tag(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '+')
}

impl Key {
    /// Construct a key directly from parts, without the bounds/grammar
    /// checks `parse` applies to a textual form. Panics if `name` is empty.
    pub fn new<I, S>(name: impl Into<String>, dims: I, tag: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        assert!(!name.is_empty(), "Key name must not be empty");
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for d in dims {
            let d = d.into();
            if seen.insert(d.clone()) {
                out.push(d);
            }
        }
        Key {
            name,
            dims: out,
            tag,
        }
    }

    /// A key with no dimensions and no tag.
    pub fn bare(name: impl Into<String>) -> Self {
        Key::new::<_, String>(name, [], None)
    }

    /// Parse a textual key. Grammar (spec.md §4.1):
    /// `key = name [":" dims] [":" tag]`, `dims = [dim ("-" dim)*]`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let name = parts.next().unwrap_or("");
        if !valid_ident(name) {
            return Err(Error::KeyParse(s.to_string()));
        }

        let dims_part = parts.next();
        let tag_part = parts.next();

        let dims: Vec<String> = match dims_part {
            None | Some("") => Vec::new(),
            Some(d) => {
                if d.ends_with('-') || d.starts_with('-') || d.contains("--") {
                    return Err(Error::KeyParse(s.to_string()));
                }
                let mut seen = BTreeSet::new();
                let mut out = Vec::new();
                for piece in d.split('-') {
                    if !valid_ident(piece) {
                        return Err(Error::KeyParse(s.to_string()));
                    }
                    if seen.insert(piece.to_string()) {
                        out.push(piece.to_string());
                    }
                }
                out
            }
        };

        let tag = match tag_part {
            None | Some("") => None,
            Some(t) => {
                if !valid_tag(t) {
                    return Err(Error::KeyParse(s.to_string()));
                }
                Some(t.to_string())
            }
        };

        Ok(Key { name: name.to_string(), dims, tag })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Dims sorted lexicographically, for canonical (order-independent)
    /// comparisons.
    fn sorted_dims(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.dims.iter().map(|s| s.as_str()).collect();
        v.sort_unstable();
        v
    }

    /// A key equal to `self` but with dims sorted lexicographically.
    pub fn sorted(&self) -> Key {
        let mut dims = self.dims.clone();
        dims.sort();
        Key {
            name: self.name.clone(),
            dims,
            tag: self.tag.clone(),
        }
    }

    /// Append a tag; joins with `+` if a tag is already present.
    pub fn add_tag(&self, tag: impl AsRef<str>) -> Key {
        let tag = tag.as_ref();
        let new_tag = match &self.tag {
            Some(existing) => format!("{existing}+{tag}"),
            None => tag.to_string(),
        };
        Key {
            name: self.name.clone(),
            dims: self.dims.clone(),
            tag: Some(new_tag),
        }
    }

    /// Add one dimension if not already present (no-op otherwise).
    pub fn append(&self, dim: impl AsRef<str>) -> Key {
        self.append_all([dim.as_ref()])
    }

    /// Add several dimensions, skipping any already present.
    pub fn append_all<'a, I: IntoIterator<Item = &'a str>>(&self, dims: I) -> Key {
        let mut out = self.dims.clone();
        for d in dims {
            if !out.iter().any(|x| x == d) {
                out.push(d.to_string());
            }
        }
        Key {
            name: self.name.clone(),
            dims: out,
            tag: self.tag.clone(),
        }
    }

    /// Drop dimensions; unknown dims are silently ignored.
    pub fn drop<'a, I: IntoIterator<Item = &'a str>>(&self, dims: I) -> Key {
        let drop: BTreeSet<&str> = dims.into_iter().collect();
        let out: Vec<String> = self
            .dims
            .iter()
            .filter(|d| !drop.contains(d.as_str()))
            .cloned()
            .collect();
        Key {
            name: self.name.clone(),
            dims: out,
            tag: self.tag.clone(),
        }
    }

    /// Enumerate every non-empty strict subset of `dims`, paired with the
    /// set of dims that would need to be dropped (summed over) to reach it
    /// from `self`. Used by `Computer::add` with `sums=true` to queue
    /// partial-sum keys (spec.md §4.1 `iter_sums`).
    pub fn iter_sums(&self) -> Vec<(Key, Vec<String>)> {
        let n = self.dims.len();
        if n == 0 {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        // Enumerate all subsets via bitmasks, skipping the empty and full sets.
        for mask in 1..(1u32 << n) - 1 {
            let mut kept = Vec::new();
            let mut dropped = Vec::new();
            for (i, d) in self.dims.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    kept.push(d.clone());
                } else {
                    dropped.push(d.clone());
                }
            }
            let mut canon = kept.clone();
            canon.sort();
            if !seen.insert(canon) {
                continue;
            }
            let partial = Key {
                name: self.name.clone(),
                dims: kept,
                tag: self.tag.clone(),
            };
            out.push((partial, dropped));
        }
        out
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.dims.is_empty() || self.tag.is_some() {
            write!(f, ":{}", self.dims.join("-"))?;
        }
        if let Some(t) = &self.tag {
            write!(f, ":{t}")?;
        }
        Ok(())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.tag == other.tag
            && self.sorted_dims() == other.sorted_dims()
    }
}
impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Deliberately hashes the canonical *rendered* form (dims in given
        // order), which is inconsistent with `Eq` by design — see module docs.
        self.to_string().hash(state);
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.name.as_str(), self.sorted_dims(), self.tag.as_deref()).cmp(&(
            other.name.as_str(),
            other.sorted_dims(),
            other.tag.as_deref(),
        ))
    }
}

impl TryFrom<&str> for Key {
    type Error = Error;
    fn try_from(s: &str) -> Result<Self> {
        Key::parse(s)
    }
}

impl TryFrom<String> for Key {
    type Error = Error;
    fn try_from(s: String) -> Result<Self> {
        Key::parse(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_and_parse_roundtrip() {
        let k = Key::new("foo", ["a", "b", "c"], None);
        assert_eq!(k.to_string(), "foo:a-b-c");
        assert_eq!(Key::parse(&k.to_string()).unwrap(), k);
    }

    #[test]
    fn parse_cases() {
        assert_eq!(Key::parse("foo").unwrap(), Key::bare("foo"));
        assert_eq!(Key::parse("foo:").unwrap(), Key::bare("foo"));
        assert_eq!(Key::parse("foo::").unwrap(), Key::bare("foo"));
        assert_eq!(
            Key::parse("foo::bar").unwrap(),
            Key::new::<_, String>("foo", [], Some("bar".into()))
        );
        assert_eq!(
            Key::parse("foo::bar+baz").unwrap(),
            Key::new::<_, String>("foo", [], Some("bar+baz".into()))
        );
        assert_eq!(Key::parse("foo:a-b").unwrap(), Key::new("foo", ["a", "b"], None));
        assert!(Key::parse(":").is_err());
        assert!(Key::parse("::").is_err());
        assert!(Key::parse("::bar").is_err());
        assert!(Key::parse(":a-b:bar").is_err());
        assert!(Key::parse("foo:a-b-").is_err());
    }

    #[test]
    fn add_tag_joins_with_plus() {
        let k = Key::new("x", ["a", "b", "c"], None);
        assert_eq!((k.add_tag("foo")).add_tag("bar").to_string(), "x:a-b-c:foo+bar");
    }

    #[test]
    fn append_and_drop() {
        let k = Key::new("x", ["a", "b", "c"], None);
        assert_eq!(k.append("d").to_string(), "x:a-b-c-d");
        assert_eq!(k.append_all(["d", "e"]).to_string(), "x:a-b-c-d-e");
        // existing dim -> no-op
        assert_eq!(k.append("c"), k);
        assert_eq!(k.drop(["b"]).to_string(), "x:a-c");
        assert_eq!(k.drop(["a", "c"]).to_string(), "x:b");
    }

    #[test]
    fn equal_but_different_dim_order_hash_differently() {
        let k1 = Key::new("foo", ["a", "b", "c"], None);
        let k2 = Key::new("foo", ["c", "b", "a"], None);
        assert_eq!(k1, k2);
        assert_eq!(k1.dims(), k2.sorted().dims());

        use std::collections::hash_map::DefaultHasher;
        fn h(k: &Key) -> u64 {
            let mut s = DefaultHasher::new();
            k.hash(&mut s);
            s.finish()
        }
        assert_ne!(h(&k1), h(&k2));
    }

    #[test]
    fn ordering() {
        let k = Key::new("foo", ["a", "b", "d"], None);
        assert!(k > Key::parse("foo:a-b-c").unwrap());
        assert!(k < Key::parse("foo:a-b-e").unwrap());
    }

    #[test]
    fn iter_sums_counts_strict_subsets() {
        let k = Key::new("foo", ["a", "b", "c"], None);
        // 2^3 - 2 = 6 non-empty strict subsets
        assert_eq!(k.iter_sums().len(), 6);
    }
}
