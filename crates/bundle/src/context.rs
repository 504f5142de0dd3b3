//! Management context: one loaded bundle plus its reference count

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::handle::{BundleHandle, HandleId};

/// Owns exactly one loaded bundle and counts the live references to it.
///
/// Created the first time a descriptor's load completes, with a count of 1
/// for the caller that started the load. The count is only mutated while the
/// dedup table lock is held; reaching 0 is what triggers close and eviction.
pub(crate) struct ManagementContext<B> {
    id: HandleId,
    descriptor: Arc<Descriptor>,
    name: Arc<str>,
    bundle: Arc<B>,
    refs: AtomicUsize,
}

impl<B> ManagementContext<B> {
    pub(crate) fn new(id: HandleId, descriptor: Arc<Descriptor>, bundle: B) -> Self {
        Self {
            id,
            name: Arc::from(descriptor.name.as_str()),
            descriptor,
            bundle: Arc::new(bundle),
            refs: AtomicUsize::new(1),
        }
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn bundle(&self) -> &Arc<B> {
        &self.bundle
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Hand out a handle without touching the count.
    pub(crate) fn handle(&self) -> BundleHandle<B> {
        BundleHandle::new(self.id, Arc::clone(&self.name), Arc::clone(&self.bundle))
    }

    /// Add one reference, returning the new count.
    pub(crate) fn retain(&self) -> usize {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop the reference held through `id`, returning the remaining count.
    ///
    /// # Errors
    /// `HandleMismatch` if `id` belongs to a different context and
    /// `OverRelease` if the count is already zero. Both are invariant
    /// violations; the count is left unchanged.
    pub(crate) fn release_ref(&self, id: HandleId) -> Result<usize> {
        if id != self.id {
            return Err(Error::HandleMismatch {
                name: self.name.to_string(),
                expected: self.id,
                actual: id,
            });
        }

        self.refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1))
            .map(|previous| previous - 1)
            .map_err(|_| Error::OverRelease {
                name: self.name.to_string(),
            })
    }
}

impl<B> std::fmt::Debug for ManagementContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("refs", &self.ref_count())
            .finish_non_exhaustive()
    }
}
