//! JSON manifest resolver.
//!
//! A manifest lists install groups, each holding bundle descriptors:
//!
//! ```json
//! {
//!   "groups": [
//!     { "name": "core", "bundles": [
//!         { "name": "shaders", "locator": "core/shaders.bundle" },
//!         { "name": "ui", "locator": "core/ui.bundle", "dependencies": ["shaders"] }
//!     ] }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::resolver::Resolver;

/// Serialized manifest layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Install groups, in order.
    #[serde(default)]
    pub groups: Vec<GroupManifest>,
}

/// One group inside a [`Manifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupManifest {
    /// Group name.
    pub name: String,
    /// Bundles in the group.
    #[serde(default)]
    pub bundles: Vec<Descriptor>,
}

/// Read-only resolver over a validated [`Manifest`].
#[derive(Debug)]
pub struct ManifestResolver {
    bundles: IndexMap<String, Arc<Descriptor>>,
    groups: IndexMap<String, Vec<Arc<Descriptor>>>,
    graph: DependencyGraph,
}

impl ManifestResolver {
    /// Validate a manifest and index it.
    ///
    /// # Errors
    /// `Manifest` for duplicate bundle or group names, `CyclicDependency` if
    /// the dependency graph has a cycle.
    pub fn new(manifest: Manifest) -> Result<Self> {
        let mut bundles: IndexMap<String, Arc<Descriptor>> = IndexMap::new();
        let mut groups: IndexMap<String, Vec<Arc<Descriptor>>> = IndexMap::new();

        for group in manifest.groups {
            if groups.contains_key(&group.name) {
                return Err(Error::manifest(format!("duplicate group '{}'", group.name)));
            }
            let mut members = Vec::with_capacity(group.bundles.len());
            for descriptor in group.bundles {
                if bundles.contains_key(&descriptor.name) {
                    return Err(Error::manifest(format!(
                        "bundle '{}' is declared more than once",
                        descriptor.name
                    )));
                }
                let descriptor = Arc::new(descriptor);
                bundles.insert(descriptor.name.clone(), Arc::clone(&descriptor));
                members.push(descriptor);
            }
            groups.insert(group.name, members);
        }

        let graph = DependencyGraph::from_descriptors(bundles.values().map(|d| &**d))?;

        let known: HashSet<&str> = bundles.keys().map(String::as_str).collect();
        for descriptor in bundles.values() {
            for dependency in &descriptor.dependencies {
                if !known.contains(dependency.as_str()) {
                    tracing::warn!(
                        bundle = %descriptor.name,
                        dependency = %dependency,
                        "Manifest references an undeclared dependency"
                    );
                }
            }
        }

        tracing::debug!(bundles = bundles.len(), groups = groups.len(), "Manifest indexed");

        Ok(Self {
            bundles,
            groups,
            graph,
        })
    }

    /// Parse and validate a manifest from JSON text.
    ///
    /// # Errors
    /// `Manifest` if the text is not a valid manifest, plus anything
    /// [`new`](Self::new) rejects.
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_str(json).map_err(|e| Error::manifest(format!("invalid manifest: {e}")))?;
        Self::new(manifest)
    }

    /// Read, parse and validate a manifest file.
    ///
    /// # Errors
    /// `Storage` if the file cannot be read, plus anything
    /// [`from_json`](Self::from_json) rejects.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::storage(path.display().to_string(), "read manifest", e))?;
        Self::from_json(&json)
    }

    /// Dependency graph of every declared bundle.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// All descriptors in manifest order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<Descriptor>> {
        self.bundles.values()
    }

    /// Look up a descriptor without going through the async trait.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<Descriptor>> {
        self.bundles.get(name)
    }
}

#[async_trait]
impl Resolver for ManifestResolver {
    async fn resolve(&self, name: &str) -> Result<Arc<Descriptor>> {
        self.bundles.get(name).cloned().ok_or_else(|| Error::not_found(name))
    }

    async fn groups(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    async fn resolve_group(&self, group: &str) -> Result<Vec<Arc<Descriptor>>> {
        self.groups
            .get(group)
            .cloned()
            .ok_or_else(|| Error::manifest(format!("unknown group '{group}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "groups": [
            { "name": "core", "bundles": [
                { "name": "shaders", "locator": "core/shaders.bundle", "size": 4 },
                { "name": "ui", "locator": "core/ui.bundle", "dependencies": ["shaders"] }
            ] },
            { "name": "levels", "bundles": [
                { "name": "level-1", "locator": "levels/1.bundle", "dependencies": ["ui", "audio"] }
            ] }
        ]
    }"#;

    #[tokio::test]
    async fn parses_groups_in_order() {
        let resolver = ManifestResolver::from_json(MANIFEST).unwrap();

        assert_eq!(resolver.groups().await, vec!["core", "levels"]);
        let core: Vec<_> = resolver
            .resolve_group("core")
            .await
            .unwrap()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(core, vec!["shaders", "ui"]);
        assert_eq!(resolver.resolve("shaders").await.unwrap().size, Some(4));
    }

    #[tokio::test]
    async fn dangling_dependency_is_resolved_lazily() {
        let resolver = ManifestResolver::from_json(MANIFEST).unwrap();
        assert!(resolver.resolve("level-1").await.is_ok());
        assert!(matches!(
            resolver.resolve("audio").await,
            Err(Error::DependencyNotFound { .. })
        ));
    }

    #[test]
    fn graph_gives_load_plan() {
        let resolver = ManifestResolver::from_json(MANIFEST).unwrap();
        assert_eq!(resolver.graph().load_order("level-1"), vec!["shaders", "ui", "audio", "level-1"]);
    }

    #[test]
    fn duplicate_bundle_rejected() {
        let json = r#"{"groups":[
            {"name":"a","bundles":[{"name":"x","locator":"x"}]},
            {"name":"b","bundles":[{"name":"x","locator":"y"}]}
        ]}"#;
        assert!(matches!(ManifestResolver::from_json(json), Err(Error::Manifest { .. })));
    }

    #[test]
    fn cycle_rejected() {
        let json = r#"{"groups":[{"name":"g","bundles":[
            {"name":"a","locator":"a","dependencies":["b"]},
            {"name":"b","locator":"b","dependencies":["a"]}
        ]}]}"#;
        assert!(matches!(
            ManifestResolver::from_json(json),
            Err(Error::CyclicDependency { .. })
        ));
    }

    #[test]
    fn malformed_json_is_manifest_error() {
        assert!(matches!(ManifestResolver::from_json("{"), Err(Error::Manifest { .. })));
    }

    #[tokio::test]
    async fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        tokio::fs::write(&path, MANIFEST).await.unwrap();

        let resolver = ManifestResolver::load(&path).await.unwrap();
        assert_eq!(resolver.descriptors().count(), 3);

        let missing = ManifestResolver::load(dir.path().join("none.json")).await.unwrap_err();
        assert!(matches!(missing, Error::Storage { operation: "read manifest", .. }));
    }
}
