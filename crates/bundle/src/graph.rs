//! Dependency graph over bundle names.
//!
//! Used to validate a catalog before any bundle is loaded and to compute load
//! plans. Traversals use explicit stacks so deep catalogs cannot overflow.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};

/// Dependency graph keyed by bundle name.
///
/// Edge order follows the order dependencies were added, which for
/// [`from_descriptors`](Self::from_descriptors) is the descriptor's listed order.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// bundle -> what it depends on
    dependencies: IndexMap<String, Vec<String>>,
    /// bundle -> what depends on it
    dependents: IndexMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create a new empty dependency graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from descriptors, rejecting cycles.
    pub fn from_descriptors<'a, I>(descriptors: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Descriptor>,
    {
        let mut graph = Self::new();
        for descriptor in descriptors {
            graph.add_node(&descriptor.name);
            for dependency in &descriptor.dependencies {
                graph.add_dependency(&descriptor.name, dependency)?;
            }
        }
        Ok(graph)
    }

    /// Make `name` known to the graph even if it has no edges.
    pub fn add_node(&mut self, name: &str) {
        if !self.dependencies.contains_key(name) {
            self.dependencies.insert(name.to_string(), Vec::new());
        }
    }

    /// Add a dependency relationship: `bundle` depends on `depends_on`
    ///
    /// # Errors
    /// Returns `CyclicDependency` if the edge would close a cycle; the graph is
    /// left as it was.
    pub fn add_dependency(&mut self, bundle: &str, depends_on: &str) -> Result<()> {
        if bundle == depends_on {
            return Err(Error::CyclicDependency {
                cycle: format!("{bundle} -> {bundle}"),
            });
        }

        self.add_node(bundle);
        let deps = self.dependencies.entry(bundle.to_string()).or_default();
        if deps.iter().any(|d| d == depends_on) {
            return Ok(());
        }
        deps.push(depends_on.to_string());
        self.dependents
            .entry(depends_on.to_string())
            .or_default()
            .push(bundle.to_string());

        if let Some(cycle) = self.detect_cycle() {
            self.remove_dependency(bundle, depends_on);
            return Err(Error::CyclicDependency {
                cycle: cycle.join(" -> "),
            });
        }

        Ok(())
    }

    fn remove_dependency(&mut self, bundle: &str, depends_on: &str) {
        if let Some(deps) = self.dependencies.get_mut(bundle) {
            deps.retain(|d| d != depends_on);
        }
        if let Some(deps) = self.dependents.get_mut(depends_on) {
            deps.retain(|d| d != bundle);
        }
    }

    /// Direct dependencies of `bundle`, in listed order.
    #[must_use]
    pub fn dependencies(&self, bundle: &str) -> &[String] {
        self.dependencies.get(bundle).map_or(&[], Vec::as_slice)
    }

    /// Bundles that list `bundle` as a direct dependency.
    #[must_use]
    pub fn dependents(&self, bundle: &str) -> &[String] {
        self.dependents.get(bundle).map_or(&[], Vec::as_slice)
    }

    /// Number of bundles with an entry in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the graph has no bundles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Detect if there's a cycle in the dependency graph
    ///
    /// # Returns
    /// `Some(path)` where the last element repeats the first, `None` otherwise
    #[must_use]
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut finished: HashSet<&str> = HashSet::new();

        for start in self.dependencies.keys() {
            if finished.contains(start.as_str()) {
                continue;
            }

            let mut path: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            let mut on_path: HashSet<&str> = HashSet::from([start.as_str()]);

            while let Some((node, next)) = path.last_mut() {
                let node: &str = *node;
                let index = *next;
                *next += 1;

                let Some(dep) = self.dependencies(node).get(index).map(String::as_str) else {
                    path.pop();
                    on_path.remove(node);
                    finished.insert(node);
                    continue;
                };

                if on_path.contains(dep) {
                    let begin = path.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[begin..].iter().map(|(n, _)| (*n).to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
                if !finished.contains(dep) {
                    on_path.insert(dep);
                    path.push((dep, 0));
                }
            }
        }

        None
    }

    /// Order in which `bundle` and everything it needs would be opened.
    ///
    /// Dependencies come before dependents and each name appears once.
    #[must_use]
    pub fn load_order(&self, bundle: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::from([bundle]);
        let mut order = Vec::new();
        let mut stack: Vec<(&str, usize)> = vec![(bundle, 0)];

        while let Some((node, next)) = stack.last_mut() {
            let node: &str = *node;
            let index = *next;
            *next += 1;

            match self.dependencies(node).get(index) {
                Some(dep) => {
                    if visited.insert(dep.as_str()) {
                        stack.push((dep.as_str(), 0));
                    }
                }
                None => {
                    stack.pop();
                    order.push(node.to_string());
                }
            }
        }

        order
    }

    /// Get all transitive dependencies of a bundle
    #[must_use]
    pub fn all_dependencies(&self, bundle: &str) -> HashSet<String> {
        let mut collected = HashSet::new();
        let mut pending: Vec<&str> = vec![bundle];

        while let Some(node) = pending.pop() {
            for dep in self.dependencies(node) {
                if collected.insert(dep.clone()) {
                    pending.push(dep);
                }
            }
        }

        collected
    }

    /// Check if `bundle` depends on `depends_on` (directly or transitively)
    #[must_use]
    pub fn depends_on(&self, bundle: &str, depends_on: &str) -> bool {
        self.all_dependencies(bundle).contains(depends_on)
    }
}
