//! Descriptor resolution seam.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};

/// Maps bundle names to descriptors and lists install groups.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Descriptor for `name`.
    ///
    /// # Errors
    /// `DependencyNotFound` if the name is unknown.
    async fn resolve(&self, name: &str) -> Result<Arc<Descriptor>>;

    /// Names of all groups, in catalog order.
    async fn groups(&self) -> Vec<String>;

    /// Descriptors belonging to `group`, in catalog order.
    ///
    /// # Errors
    /// `Manifest` if the group is unknown.
    async fn resolve_group(&self, group: &str) -> Result<Vec<Arc<Descriptor>>>;
}

#[derive(Default)]
struct Catalog {
    bundles: IndexMap<String, Arc<Descriptor>>,
    groups: IndexMap<String, Vec<String>>,
}

/// Resolver backed by an in-memory catalog that can be edited at any time.
#[derive(Default)]
pub struct StaticResolver {
    catalog: RwLock<Catalog>,
}

impl StaticResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver holding `descriptors`, without any groups.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = Descriptor>) -> Self {
        let resolver = Self::new();
        for descriptor in descriptors {
            resolver.insert(descriptor);
        }
        resolver
    }

    /// Add or replace a descriptor, returning the shared copy.
    pub fn insert(&self, descriptor: Descriptor) -> Arc<Descriptor> {
        let descriptor = Arc::new(descriptor);
        self.catalog
            .write()
            .bundles
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        descriptor
    }

    /// Add descriptors and record them under `group`.
    pub fn insert_group(&self, group: impl Into<String>, descriptors: impl IntoIterator<Item = Descriptor>) {
        let mut catalog = self.catalog.write();
        let members = descriptors
            .into_iter()
            .map(|descriptor| {
                let name = descriptor.name.clone();
                catalog.bundles.insert(name.clone(), Arc::new(descriptor));
                name
            })
            .collect();
        catalog.groups.insert(group.into(), members);
    }

    /// Forget a descriptor. Group membership is left alone.
    pub fn remove(&self, name: &str) -> Option<Arc<Descriptor>> {
        self.catalog.write().bundles.shift_remove(name)
    }

    /// Number of known descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.catalog.read().bundles.len()
    }

    /// Whether no descriptors are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.catalog.read().bundles.is_empty()
    }
}

impl std::fmt::Debug for StaticResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let catalog = self.catalog.read();
        f.debug_struct("StaticResolver")
            .field("bundles", &catalog.bundles.len())
            .field("groups", &catalog.groups.len())
            .finish()
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, name: &str) -> Result<Arc<Descriptor>> {
        self.catalog
            .read()
            .bundles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(name))
    }

    async fn groups(&self) -> Vec<String> {
        self.catalog.read().groups.keys().cloned().collect()
    }

    async fn resolve_group(&self, group: &str) -> Result<Vec<Arc<Descriptor>>> {
        let catalog = self.catalog.read();
        let members = catalog
            .groups
            .get(group)
            .ok_or_else(|| Error::manifest(format!("unknown group '{group}'")))?;
        members
            .iter()
            .map(|name| {
                catalog
                    .bundles
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::not_found(name.as_str()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_known_and_unknown() {
        let resolver = StaticResolver::from_descriptors([Descriptor::new("a", "a.bundle")]);

        assert_eq!(resolver.resolve("a").await.unwrap().locator, "a.bundle");
        let err = resolver.resolve("zzz").await.unwrap_err();
        assert!(matches!(err, Error::DependencyNotFound { ref name, required_by: None } if name == "zzz"));
    }

    #[tokio::test]
    async fn groups_keep_insertion_order() {
        let resolver = StaticResolver::new();
        resolver.insert_group("core", [Descriptor::new("b", "b"), Descriptor::new("a", "a")]);
        resolver.insert_group("extra", [Descriptor::new("c", "c")]);

        assert_eq!(resolver.groups().await, vec!["core", "extra"]);
        let names: Vec<_> = resolver
            .resolve_group("core")
            .await
            .unwrap()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(matches!(resolver.resolve_group("nope").await, Err(Error::Manifest { .. })));
    }

    #[tokio::test]
    async fn edits_are_visible_immediately() {
        let resolver = StaticResolver::new();
        assert!(resolver.is_empty());
        resolver.insert(Descriptor::new("a", "a"));
        assert!(resolver.resolve("a").await.is_ok());
        resolver.remove("a");
        assert!(resolver.resolve("a").await.is_err());
    }
}
