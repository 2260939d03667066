//! Object metadata shared by every stored resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A `namespace/name` pair identifying a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata carried by every stored object.
///
/// `resource_version` is assigned by the store and increases monotonically
/// on every write; stale writes are rejected with a conflict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Store-assigned write version. `0` means "never persisted".
    #[serde(default)]
    pub resource_version: u64,
    /// When the object was first persisted.
    #[serde(default)]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            resource_version: 0,
            creation_timestamp: None,
        }
    }

    pub fn key(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.name.clone())
    }
}

/// Sanitize a free-form identifier (e.g. a tool name like `kubectl.delete`)
/// into a store-safe object name: lowercase, dots and slashes become dashes,
/// truncated to the 63-byte name limit.
pub fn sanitize_name(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect();
    out.truncate(63);
    // Names must not end with a dash after truncation.
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_name_display() {
        let key = NamespacedName::new("infra", "watchman");
        assert_eq!(key.to_string(), "infra/watchman");
    }

    #[test]
    fn sanitize_replaces_dots_and_slashes() {
        assert_eq!(sanitize_name("kubectl.get"), "kubectl-get");
        assert_eq!(sanitize_name("ssh.exec"), "ssh-exec");
        assert_eq!(sanitize_name("simple"), "simple");
        assert_eq!(sanitize_name("a/b/c.d"), "a-b-c-d");
    }

    #[test]
    fn sanitize_truncates_to_63_bytes() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_name(&long).len(), 63);
    }

    #[test]
    fn sanitize_strips_trailing_dash_after_truncation() {
        let mut raw = "a".repeat(62);
        raw.push('.');
        raw.push_str("tail");
        let got = sanitize_name(&raw);
        assert!(!got.ends_with('-'));
    }
}
