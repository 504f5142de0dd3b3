//! Load deduplication table.
//!
//! One slot per bundle name holding the single in-flight or completed load
//! outcome for that name, plus a reverse index from context id to name. A
//! slot whose count reached zero stays in the table as closing until the
//! backend has closed it, so the name cannot be reopened in the meantime. The
//! table is plain data: the manager guards it with one mutex and never awaits
//! while holding that lock.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};

use crate::context::ManagementContext;
use crate::error::Result;
use crate::handle::HandleId;

/// Result of one physical load, shared by every awaiter.
pub(crate) type LoadResult<B> = Result<Arc<ManagementContext<B>>>;

/// Memoized load computation published into the table before it is awaited.
pub(crate) type Outcome<B> = Shared<BoxFuture<'static, LoadResult<B>>>;

/// Backend close of a slot whose count reached zero, shared with anyone
/// waiting to reuse the name.
pub(crate) type Closing = Shared<BoxFuture<'static, Result<()>>>;

/// What a slot currently holds.
pub(crate) enum State<B> {
    Loading(Outcome<B>),
    Closing(Closing),
}

/// State of a slot as seen without awaiting it.
pub(crate) enum Peek<B> {
    /// The load completed and its context is live.
    Ready(Arc<ManagementContext<B>>),
    /// The load has not settled yet.
    Pending(HandleId, Outcome<B>),
    /// The load failed and the slot is waiting to be evicted.
    Failed(HandleId),
    /// The count reached zero and the backend close has not finished.
    Closing(HandleId, Closing),
}

struct Slot<B> {
    id: HandleId,
    state: State<B>,
}

pub(crate) struct Table<B> {
    slots: HashMap<String, Slot<B>>,
    owners: HashMap<HandleId, String>,
}

impl<B> Table<B> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: HashMap::with_capacity(capacity),
            owners: HashMap::with_capacity(capacity),
        }
    }

    pub(crate) fn peek(&self, name: &str) -> Option<Peek<B>> {
        let slot = self.slots.get(name)?;
        let outcome = match &slot.state {
            State::Loading(outcome) => outcome,
            State::Closing(closing) => return Some(Peek::Closing(slot.id, closing.clone())),
        };
        Some(match outcome.peek() {
            Some(Ok(context)) => Peek::Ready(Arc::clone(context)),
            Some(Err(_)) => Peek::Failed(slot.id),
            None => Peek::Pending(slot.id, outcome.clone()),
        })
    }

    /// Live context for `name`, if its load has completed successfully.
    pub(crate) fn ready(&self, name: &str) -> Option<Arc<ManagementContext<B>>> {
        match self.peek(name)? {
            Peek::Ready(context) => Some(context),
            Peek::Pending(..) | Peek::Failed(_) | Peek::Closing(..) => None,
        }
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Whether `name` is still owned by the slot created with `id` and that
    /// slot has not started closing.
    pub(crate) fn is_current(&self, name: &str, id: HandleId) -> bool {
        self.slots
            .get(name)
            .is_some_and(|slot| slot.id == id && matches!(slot.state, State::Loading(_)))
    }

    fn owns(&self, name: &str, id: HandleId) -> bool {
        self.slots.get(name).is_some_and(|slot| slot.id == id)
    }

    /// Name of the slot created with `id`.
    pub(crate) fn owner(&self, id: HandleId) -> Option<&str> {
        self.owners.get(&id).map(String::as_str)
    }

    /// Publish `outcome` under `name` unless a slot already exists.
    ///
    /// Returns `false` and leaves the table untouched if the name is taken.
    pub(crate) fn insert_if_absent(&mut self, name: &str, id: HandleId, outcome: Outcome<B>) -> bool {
        if self.slots.contains_key(name) {
            return false;
        }
        self.slots.insert(
            name.to_string(),
            Slot {
                id,
                state: State::Loading(outcome),
            },
        );
        self.owners.insert(id, name.to_string());
        true
    }

    /// Mark the loaded slot created with `id` as closing.
    ///
    /// Returns `false` if the slot is gone, was replaced, or is already closing.
    pub(crate) fn begin_close(&mut self, name: &str, id: HandleId, closing: Closing) -> bool {
        match self.slots.get_mut(name) {
            Some(slot) if slot.id == id && matches!(slot.state, State::Loading(_)) => {
                slot.state = State::Closing(closing);
                true
            }
            _ => false,
        }
    }

    /// Remove the slot for `name` if it is still the one created with `id`,
    /// whatever state it is in.
    pub(crate) fn evict(&mut self, name: &str, id: HandleId) -> bool {
        if !self.owns(name, id) {
            return false;
        }
        self.slots.remove(name);
        self.owners.remove(&id);
        true
    }

    /// Remove every slot, returning their states in creation order.
    pub(crate) fn drain(&mut self) -> Vec<(String, State<B>)> {
        self.owners.clear();
        let mut slots: Vec<_> = self.slots.drain().collect();
        slots.sort_by_key(|(_, slot)| slot.id);
        slots.into_iter().map(|(name, slot)| (name, slot.state)).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }
}
