//! Prometheus-style label sets and relabeling.

mod relabel;

pub use relabel::{Action, RelabelConfig, RelabelConfigList};

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// A sorted set of `name → value` labels.
///
/// Order is guaranteed by construction, which keeps [`Labels::hash`] and any
/// serialized form stable across runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Labels {
    inner: BTreeMap<String, String>,
}

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value for `name`, or the empty string — absent and empty labels are
    /// equivalent in relabel semantics.
    pub fn get(&self, name: &str) -> &str {
        self.inner.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.insert(name.into(), value.into());
    }

    pub fn del(&mut self, name: &str) {
        self.inner.remove(name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Visit every label; mutations during the walk are not visible to it.
    pub fn range(&self, mut f: impl FnMut(&str, &str)) {
        for (k, v) in &self.inner {
            f(k, v);
        }
    }

    /// Stable hash over the sorted `(name, value)` pairs.
    pub fn hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for (k, v) in &self.inner {
            k.hash(&mut hasher);
            v.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Labels {
            inner: iter.into_iter().collect(),
        }
    }
}

/// Stages add/delete edits on top of a base set; `labels()` materializes a
/// new [`Labels`] with the edits applied.
#[derive(Clone, Debug, Default)]
pub struct LabelsBuilder {
    base: Labels,
    add: Vec<(String, String)>,
    del: Vec<String>,
}

impl LabelsBuilder {
    pub fn new(base: Labels) -> Self {
        LabelsBuilder {
            base,
            add: Vec::new(),
            del: Vec::new(),
        }
    }

    pub fn reset(&mut self, base: Labels) {
        self.base = base;
        self.add.clear();
        self.del.clear();
    }

    pub fn get(&self, name: &str) -> &str {
        if let Some((_, v)) = self.add.iter().rev().find(|(k, _)| k == name) {
            return v;
        }
        if self.del.iter().any(|k| k == name) {
            return "";
        }
        self.base.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if value.is_empty() {
            self.delete(name);
            return;
        }
        self.del.retain(|k| *k != name);
        self.add.retain(|(k, _)| *k != name);
        self.add.push((name, value));
    }

    pub fn delete(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.add.retain(|(k, _)| *k != name);
        if !self.del.contains(&name) {
            self.del.push(name);
        }
    }

    pub fn labels(&self) -> Labels {
        let mut out = self.base.clone();
        for name in &self.del {
            out.del(name);
        }
        for (name, value) in &self.add {
            out.set(name.clone(), value.clone());
        }
        out
    }
}
