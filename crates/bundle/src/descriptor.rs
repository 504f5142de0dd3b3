//! Bundle descriptors

use serde::{Deserialize, Serialize};

/// Immutable description of a loadable bundle.
///
/// Supplied by a [`Resolver`](crate::Resolver); the cache never mutates it.
/// `dependencies` are loaded in the listed order before the bundle itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Unique bundle name.
    pub name: String,
    /// Names of the bundles this one needs loaded first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Backend-specific location (a relative path for [`FsStorage`](crate::FsStorage)).
    pub locator: String,
    /// Expected size in bytes, checked by `verify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Expected lowercase hex SHA-256 digest, checked by `verify`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Descriptor {
    /// Create a descriptor without dependencies or integrity hints.
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            locator: locator.into(),
            size: None,
            hash: None,
        }
    }

    /// Replace the dependency list.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Set the expected size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the expected SHA-256 digest.
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal() {
        let d: Descriptor = serde_json::from_str(r#"{"name":"ui","locator":"ui.bundle"}"#).unwrap();
        assert_eq!(d, Descriptor::new("ui", "ui.bundle"));
    }

    #[test]
    fn serialize_skips_empty_fields() {
        let json = serde_json::to_string(&Descriptor::new("ui", "ui.bundle")).unwrap();
        assert_eq!(json, r#"{"name":"ui","locator":"ui.bundle"}"#);
    }

    #[test]
    fn builder_keeps_dependency_order() {
        let d = Descriptor::new("level", "level.bundle").with_dependencies(["textures", "audio", "shaders"]);
        assert_eq!(d.dependencies, vec!["textures", "audio", "shaders"]);
    }
}
