//! Opaque credential sets and their canonical pool keys.

use std::collections::BTreeMap;

/// An opaque set of credential fields (user name, password, domain, ...).
///
/// The bridge never interprets the fields; they are passed to the remote
/// shell's login command verbatim and identify the pool bucket a session
/// belongs to. Fields are kept sorted by name so the pool key is canonical.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    fields: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Canonical string identifying this credential set for pooling.
    ///
    /// Sorted `name=value` pairs joined with `/`; two credential sets are
    /// pool-equivalent iff their keys are equal.
    pub fn pool_key(&self) -> String {
        let pairs: Vec<String> = self
            .fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        pairs.join("/")
    }
}

impl FromIterator<(String, String)> for Credentials {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
