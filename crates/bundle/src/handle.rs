//! Handles to loaded bundles

use std::fmt;
use std::sync::Arc;

/// Identity of one management context.
///
/// Every handle produced by the same live context carries the same id; a
/// bundle that is closed and loaded again gets a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A reference to a loaded bundle, handed out by
/// [`BundleManager::acquire`](crate::BundleManager::acquire).
///
/// Holding a handle does not keep the bundle loaded by itself: the reference
/// it represents is given back with
/// [`BundleManager::release`](crate::BundleManager::release). Clones share
/// the same identity and count as the same reference.
pub struct BundleHandle<B> {
    id: HandleId,
    name: Arc<str>,
    bundle: Arc<B>,
}

impl<B> BundleHandle<B> {
    pub(crate) fn new(id: HandleId, name: Arc<str>, bundle: Arc<B>) -> Self {
        Self { id, name, bundle }
    }

    /// Identity of the context backing this handle.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Name of the bundle.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared pointer to the loaded bundle.
    #[must_use]
    pub fn bundle(&self) -> &Arc<B> {
        &self.bundle
    }
}

impl<B> Clone for BundleHandle<B> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: Arc::clone(&self.name),
            bundle: Arc::clone(&self.bundle),
        }
    }
}

impl<B> std::ops::Deref for BundleHandle<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.bundle
    }
}

impl<B> PartialEq for BundleHandle<B> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<B> Eq for BundleHandle<B> {}

impl<B> fmt::Debug for BundleHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BundleHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
