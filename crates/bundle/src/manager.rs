//! Bundle manager: dependency-aware acquire and cascading release.
//!
//! The manager owns the deduplication table and drives the resolver and the
//! storage backend. Every traversal of the dependency graph uses an explicit
//! work-list, so catalog depth is bounded by memory rather than by the stack.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::CacheConfig;
use crate::context::ManagementContext;
use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::events::{CacheEvent, EventBus};
use crate::handle::{BundleHandle, HandleId};
use crate::resolver::Resolver;
use crate::storage::Storage;
use crate::table::{Closing, Outcome, Peek, State, Table};

type Context<S> = ManagementContext<<S as Storage>::Bundle>;

/// One descriptor on the acquire work-list.
struct Frame<B> {
    descriptor: Arc<Descriptor>,
    next_dependency: usize,
    /// Dependency references taken on behalf of this descriptor so far.
    pinned: Vec<BundleHandle<B>>,
}

impl<B> Frame<B> {
    fn new(descriptor: Arc<Descriptor>) -> Self {
        Self {
            descriptor,
            next_dependency: 0,
            pinned: Vec::new(),
        }
    }
}

/// A slot `load_or_join` has to wait on before it can go on.
enum Settle<B> {
    /// Another caller's load is in flight.
    Load(HandleId, Outcome<B>),
    /// The previous instance is still being closed.
    Close(HandleId, Closing),
}

/// What a release has to do, decided while holding the table lock.
enum ReleasePlan<B> {
    /// The handle has no live owner.
    Untracked,
    /// A dependency is still loading; wait for it and plan again.
    Wait(Outcome<B>),
    /// Decrements to apply, dependencies before dependents.
    Apply(Vec<Arc<ManagementContext<B>>>),
}

/// Reference-counted, dependency-aware, load-deduplicating bundle cache.
///
/// Each bundle name is physically opened at most once no matter how many
/// callers acquire it concurrently. Acquiring a bundle first acquires its
/// dependencies and keeps them pinned for as long as the bundle is loaded;
/// releasing it gives those pins back and closes whatever nothing else needs.
pub struct BundleManager<S: Storage> {
    table: Mutex<Table<S::Bundle>>,
    resolver: Arc<dyn Resolver>,
    storage: Arc<S>,
    events: EventBus,
    next_id: AtomicU64,
    /// Bumped by every shutdown while it holds the table lock.
    generation: AtomicU64,
    config: CacheConfig,
}

impl<S: Storage> BundleManager<S> {
    /// Create a manager with the default [`CacheConfig`].
    pub fn new(resolver: Arc<dyn Resolver>, storage: Arc<S>) -> Self {
        let config = CacheConfig::default();
        Self::build(resolver, storage, config)
    }

    /// Create a manager with a custom configuration.
    ///
    /// # Errors
    /// `Configuration` if the configuration does not validate.
    pub fn with_config(resolver: Arc<dyn Resolver>, storage: Arc<S>, config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(resolver, storage, config))
    }

    fn build(resolver: Arc<dyn Resolver>, storage: Arc<S>, config: CacheConfig) -> Self {
        Self {
            table: Mutex::new(Table::with_capacity(config.initial_capacity)),
            resolver,
            storage,
            events: EventBus::new(config.event_buffer),
            next_id: AtomicU64::new(1),
            generation: AtomicU64::new(0),
            config,
        }
    }

    /// Acquire `name`, loading it and its dependencies as needed.
    ///
    /// Dependencies are acquired depth-first in listed order before the
    /// bundle itself, and each keeps the reference taken here until the
    /// bundle is released. If any step fails, references taken earlier in
    /// the same call are released before the error is returned.
    ///
    /// # Errors
    /// - `DependencyNotFound` if `name` or a transitive dependency is unknown
    /// - `CyclicDependency` if the bundle transitively depends on itself
    /// - `NotInstalled` if storage does not hold a bundle that must be opened
    /// - `LoadFailure` if the backend failed to open a bundle
    pub async fn acquire(&self, name: &str) -> Result<BundleHandle<S::Bundle>> {
        let root = self.resolver.resolve(name).await?;
        let mut stack = vec![Frame::new(root)];

        loop {
            let Some(frame) = stack.last_mut() else {
                return Err(Error::not_found(name));
            };

            if let Some(dependency) = frame.descriptor.dependencies.get(frame.next_dependency) {
                frame.next_dependency += 1;
                let dependency = dependency.clone();
                let dependent = frame.descriptor.name.clone();

                if let Some(start) = stack.iter().position(|f| f.descriptor.name == dependency) {
                    let mut cycle: Vec<&str> = stack[start..].iter().map(|f| f.descriptor.name.as_str()).collect();
                    cycle.push(&dependency);
                    let err = Error::CyclicDependency {
                        cycle: cycle.join(" -> "),
                    };
                    self.roll_back(stack, Vec::new()).await;
                    return Err(err);
                }

                match self.resolver.resolve(&dependency).await {
                    Ok(descriptor) => stack.push(Frame::new(descriptor)),
                    Err(err) => {
                        self.roll_back(stack, Vec::new()).await;
                        return Err(err.required_by(&dependent));
                    }
                }
                continue;
            }

            let Some(frame) = stack.pop() else {
                return Err(Error::not_found(name));
            };
            match self.load_or_join(&frame.descriptor).await {
                Ok(handle) => match stack.last_mut() {
                    Some(parent) => parent.pinned.push(handle),
                    None => return Ok(handle),
                },
                Err(err) => {
                    self.roll_back(stack, frame.pinned).await;
                    return Err(err);
                }
            }
        }
    }

    /// Give back the references pinned by an acquire that failed part way.
    async fn roll_back(&self, stack: Vec<Frame<S::Bundle>>, pinned: Vec<BundleHandle<S::Bundle>>) {
        let mut handles: Vec<_> = stack.into_iter().flat_map(|frame| frame.pinned).collect();
        handles.extend(pinned);

        for handle in handles.iter().rev() {
            if let Err(err) = self.release(handle).await {
                tracing::warn!(bundle = %handle.name(), error = %err, "Rollback release failed");
            }
        }
    }

    /// Join the table slot for `descriptor`, publishing a new load if there is none.
    async fn load_or_join(&self, descriptor: &Arc<Descriptor>) -> Result<BundleHandle<S::Bundle>> {
        let name = descriptor.name.as_str();

        loop {
            let (settle, generation) = {
                let mut table = self.table.lock();
                let generation = self.generation.load(Ordering::Acquire);
                let settle = match table.peek(name) {
                    Some(Peek::Ready(context)) => {
                        let refs = context.retain();
                        drop(table);
                        return Ok(self.joined(&context, refs));
                    }
                    Some(Peek::Failed(id)) => {
                        table.evict(name, id);
                        continue;
                    }
                    Some(Peek::Pending(id, outcome)) => Some(Settle::Load(id, outcome)),
                    Some(Peek::Closing(id, closing)) => Some(Settle::Close(id, closing)),
                    None => None,
                };
                (settle, generation)
            };

            match settle {
                Some(Settle::Close(id, closing)) => {
                    tracing::trace!(bundle = %name, "Waiting for the previous instance to close");
                    let _ = closing.await;
                    self.table.lock().evict(name, id);
                    continue;
                }
                Some(Settle::Load(id, outcome)) => match outcome.await {
                    Ok(context) => {
                        let refs = {
                            let table = self.table.lock();
                            table.is_current(name, context.id()).then(|| context.retain())
                        };
                        match refs {
                            Some(refs) => return Ok(self.joined(&context, refs)),
                            None if self.shut_down_since(generation) => return Err(Error::shut_down(name)),
                            // Closed again before we could take a reference.
                            None => continue,
                        }
                    }
                    Err(err) => {
                        self.table.lock().evict(name, id);
                        return Err(err);
                    }
                },
                None => {}
            }

            if !self.storage.exists(descriptor).await? {
                tracing::debug!(bundle = %name, "Bundle not installed");
                return Err(Error::not_installed(name));
            }

            let id = HandleId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            let outcome = self.load(id, Arc::clone(descriptor));
            let generation = {
                let mut table = self.table.lock();
                if !table.insert_if_absent(name, id, outcome.clone()) {
                    continue;
                }
                self.generation.load(Ordering::Acquire)
            };

            return match outcome.await {
                Ok(_) if self.shut_down_since(generation) => {
                    tracing::debug!(bundle = %name, id = %id, "Bundle closed by shutdown while loading");
                    Err(Error::shut_down(name))
                }
                Ok(context) => {
                    tracing::debug!(bundle = %name, id = %id, "Bundle loaded");
                    self.events.emit(CacheEvent::Loaded { name: name.to_string() });
                    Ok(context.handle())
                }
                Err(err) => {
                    self.table.lock().evict(name, id);
                    tracing::debug!(bundle = %name, error = %err, "Bundle load failed");
                    self.events.emit(CacheEvent::LoadFailed {
                        name: name.to_string(),
                        error: err.to_string(),
                    });
                    Err(err)
                }
            };
        }
    }

    /// Whether a shutdown drained the table after `generation` was read.
    fn shut_down_since(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) != generation
    }

    fn joined(&self, context: &Context<S>, refs: usize) -> BundleHandle<S::Bundle> {
        tracing::trace!(bundle = %context.name(), refs, "Joined loaded bundle");
        self.events.emit(CacheEvent::Joined {
            name: context.name().to_string(),
            refs,
        });
        context.handle()
    }

    /// Build the shared outcome that opens `descriptor` and wraps it in a
    /// fresh context with one reference.
    fn load(&self, id: HandleId, descriptor: Arc<Descriptor>) -> Outcome<S::Bundle> {
        let storage = Arc::clone(&self.storage);
        async move {
            let bundle = storage
                .open(&descriptor)
                .await
                .map_err(|err| Error::load_failure(descriptor.name.as_str(), err))?;
            Ok(Arc::new(ManagementContext::new(id, descriptor, bundle)))
        }
        .boxed()
        .shared()
    }

    /// Close `context` in the backend, shared with callers waiting to reopen it.
    fn close(&self, context: Arc<Context<S>>) -> Closing {
        let storage = Arc::clone(&self.storage);
        async move { storage.close(context.bundle()).await }.boxed().shared()
    }

    /// Release one reference held through `handle`.
    ///
    /// Also releases the reference the bundle holds on each of its listed
    /// dependencies, cascading through the graph. Contexts whose count
    /// reaches zero are closed, dependencies first, and only then removed
    /// from the table; an acquire of the same name meanwhile waits for the
    /// close. Releasing a handle whose bundle is no longer tracked does
    /// nothing.
    ///
    /// # Errors
    /// - `OverRelease` if the cascade would drop any count below zero; no
    ///   count is changed in that case
    /// - `Storage` (or whatever the backend returns) if a close failed; the
    ///   bookkeeping has already been applied
    pub async fn release(&self, handle: &BundleHandle<S::Bundle>) -> Result<()> {
        let closed = loop {
            let outcome = {
                let mut table = self.table.lock();
                match Self::plan_release(&table, handle) {
                    ReleasePlan::Untracked => {
                        tracing::trace!(bundle = %handle.name(), id = %handle.id(), "Release of untracked handle ignored");
                        return Ok(());
                    }
                    ReleasePlan::Wait(outcome) => outcome,
                    ReleasePlan::Apply(steps) => break self.apply_release(&mut table, handle.id(), steps)?,
                }
            };
            tracing::trace!(bundle = %handle.name(), "Release waiting for a dependency load to settle");
            let _ = outcome.await;
        };

        let mut first_error = None;
        for (context, closing) in closed {
            let result = closing.await;
            self.table.lock().evict(context.name(), context.id());
            if let Err(err) = result {
                tracing::warn!(bundle = %context.name(), error = %err, "Failed to close bundle");
                first_error.get_or_insert(err);
            } else {
                tracing::debug!(bundle = %context.name(), "Bundle closed");
            }
            self.events.emit(CacheEvent::Closed {
                name: context.name().to_string(),
            });
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Expand the release of `handle` into one decrement per pinned
    /// reference, in post-order.
    fn plan_release(table: &Table<S::Bundle>, handle: &BundleHandle<S::Bundle>) -> ReleasePlan<S::Bundle> {
        let root = match table.owner(handle.id()).and_then(|name| table.ready(name)) {
            Some(context) if context.id() == handle.id() => context,
            _ => return ReleasePlan::Untracked,
        };

        let mut steps = Vec::new();
        let mut stack: Vec<(Arc<Context<S>>, usize)> = vec![(root, 0)];

        while let Some((context, next)) = stack.last_mut() {
            let context = Arc::clone(context);
            let index = *next;
            *next += 1;

            let Some(dependency) = context.descriptor().dependencies.get(index) else {
                stack.pop();
                steps.push(context);
                continue;
            };

            match table.peek(dependency) {
                None | Some(Peek::Failed(_) | Peek::Closing(..)) => {}
                Some(Peek::Pending(_, outcome)) => return ReleasePlan::Wait(outcome),
                Some(Peek::Ready(dependency)) => {
                    if stack.iter().any(|(c, _)| c.id() == dependency.id()) {
                        tracing::warn!(bundle = %dependency.name(), "Dependency cycle found during release; skipping edge");
                    } else {
                        stack.push((dependency, 0));
                    }
                }
            }
        }

        ReleasePlan::Apply(steps)
    }

    /// Apply planned decrements atomically, marking contexts that reached
    /// zero as closing and returning them with their close.
    fn apply_release(
        &self,
        table: &mut Table<S::Bundle>,
        root: HandleId,
        steps: Vec<Arc<Context<S>>>,
    ) -> Result<Vec<(Arc<Context<S>>, Closing)>> {
        let mut tally: HashMap<HandleId, usize> = HashMap::new();
        for context in &steps {
            let wanted = tally.entry(context.id()).or_default();
            *wanted += 1;
            if *wanted > context.ref_count() {
                let err = Error::OverRelease {
                    name: context.name().to_string(),
                };
                tracing::error!(bundle = %context.name(), refs = context.ref_count(), "Release would drop reference count below zero");
                return Err(err);
            }
        }

        let last = steps.len().saturating_sub(1);
        let mut closed = Vec::new();
        for (index, context) in steps.into_iter().enumerate() {
            // The root is decremented through the caller's handle, so a stale
            // or foreign handle trips the mismatch check.
            let id = if index == last { root } else { context.id() };
            let refs = context.release_ref(id).inspect_err(|err| {
                tracing::error!(bundle = %context.name(), error = %err, "Reference count invariant violated");
            })?;
            tracing::trace!(bundle = %context.name(), refs, "Released reference");
            self.events.emit(CacheEvent::Released {
                name: context.name().to_string(),
                refs,
            });
            if refs == 0 {
                let closing = self.close(Arc::clone(&context));
                if table.begin_close(context.name(), context.id(), closing.clone()) {
                    closed.push((context, closing));
                }
            }
        }

        Ok(closed)
    }

    /// Close every loaded bundle regardless of its count and empty the table.
    ///
    /// Loads still in flight are awaited first; their callers get
    /// `ShutDown`. Closes already started by a release are awaited and left
    /// to that release to report. Handles handed out earlier become
    /// untracked; releasing them is a no-op.
    ///
    /// # Errors
    /// The first close error; every bundle is still attempted.
    pub async fn shutdown(&self) -> Result<()> {
        let slots = {
            let mut table = self.table.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            table.drain()
        };
        tracing::debug!(bundles = slots.len(), "Shutting down bundle cache");

        let mut first_error = None;
        for (name, state) in slots {
            let outcome = match state {
                State::Loading(outcome) => outcome,
                State::Closing(closing) => {
                    let _ = closing.await;
                    continue;
                }
            };
            let Ok(context) = outcome.await else {
                continue;
            };
            if let Err(err) = self.storage.close(context.bundle()).await {
                tracing::warn!(bundle = %name, error = %err, "Failed to close bundle during shutdown");
                first_error.get_or_insert(err);
            }
            self.events.emit(CacheEvent::Closed { name });
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Current reference count of a loaded bundle.
    #[must_use]
    pub fn ref_count(&self, name: &str) -> Option<usize> {
        self.table.lock().ready(name).map(|context| context.ref_count())
    }

    /// Whether `name` is loaded and live.
    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.table.lock().ready(name).is_some()
    }

    /// Number of table slots, including loads still in flight and bundles
    /// still being closed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether the table has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of loaded bundles, sorted.
    #[must_use]
    pub fn loaded_names(&self) -> Vec<String> {
        let table = self.table.lock();
        let mut names: Vec<String> = table
            .names()
            .filter(|name| table.ready(name).is_some())
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Whether storage holds the bundle.
    ///
    /// # Errors
    /// Whatever the backend returns.
    pub async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        self.storage.exists(descriptor).await
    }

    /// Subscribe to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// The resolver descriptors are looked up in.
    #[must_use]
    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    /// The storage backend.
    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl<S: Storage> std::fmt::Debug for BundleManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleManager")
            .field("slots", &self.table.lock().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use crate::resolver::StaticResolver;

    fn setup(descriptors: Vec<Descriptor>) -> (BundleManager<MemoryStorage>, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        for descriptor in &descriptors {
            storage.insert(descriptor, descriptor.name.as_bytes().to_vec());
        }
        let resolver = Arc::new(StaticResolver::from_descriptors(descriptors));
        (BundleManager::new(resolver, Arc::clone(&storage)), storage)
    }

    #[tokio::test]
    async fn acquire_release_single() {
        let (manager, storage) = setup(vec![Descriptor::new("a", "a")]);

        let handle = manager.acquire("a").await.unwrap();
        assert_eq!(handle.data.as_ref(), b"a");
        assert_eq!(manager.ref_count("a"), Some(1));

        manager.release(&handle).await.unwrap();
        assert!(manager.is_empty());
        assert_eq!(storage.close_count("a"), 1);
    }

    #[tokio::test]
    async fn second_acquire_joins() {
        let (manager, storage) = setup(vec![Descriptor::new("a", "a")]);

        let first = manager.acquire("a").await.unwrap();
        let second = manager.acquire("a").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.ref_count("a"), Some(2));
        assert_eq!(storage.open_count("a"), 1);

        manager.release(&first).await.unwrap();
        assert_eq!(manager.ref_count("a"), Some(1));
        manager.release(&second).await.unwrap();
        assert!(!manager.is_loaded("a"));
    }

    #[tokio::test]
    async fn release_after_close_is_noop() {
        let (manager, storage) = setup(vec![Descriptor::new("a", "a")]);

        let handle = manager.acquire("a").await.unwrap();
        manager.release(&handle).await.unwrap();
        manager.release(&handle).await.unwrap();
        assert_eq!(storage.close_count("a"), 1);
    }

    #[tokio::test]
    async fn reload_gets_fresh_identity() {
        let (manager, _storage) = setup(vec![Descriptor::new("a", "a")]);

        let first = manager.acquire("a").await.unwrap();
        manager.release(&first).await.unwrap();
        let second = manager.acquire("a").await.unwrap();
        assert_ne!(first.id(), second.id());

        // The stale handle must not release the new context.
        manager.release(&first).await.unwrap();
        assert_eq!(manager.ref_count("a"), Some(1));
    }

    #[tokio::test]
    async fn over_release_is_fatal_and_leaves_counts() {
        // a -> [b, c], b -> [d], c -> [d]: d carries two pins from a.
        let (manager, _storage) = setup(vec![
            Descriptor::new("a", "a").with_dependencies(["b", "c"]),
            Descriptor::new("b", "b").with_dependencies(["d"]),
            Descriptor::new("c", "c").with_dependencies(["d"]),
            Descriptor::new("d", "d"),
        ]);

        let a = manager.acquire("a").await.unwrap();
        assert_eq!(manager.ref_count("d"), Some(2));

        // Steal one of a's pins on d.
        let d = manager.acquire("d").await.unwrap();
        manager.release(&d).await.unwrap();
        manager.release(&d).await.unwrap();
        assert_eq!(manager.ref_count("d"), Some(1));

        let err = manager.release(&a).await.unwrap_err();
        assert!(matches!(err, Error::OverRelease { ref name } if name == "d"));
        assert!(err.is_fatal());
        for name in ["a", "b", "c", "d"] {
            assert_eq!(manager.ref_count(name), Some(1), "{name} must be untouched");
        }
    }

    #[tokio::test]
    async fn dependency_released_out_of_band_is_skipped() {
        let (manager, _storage) = setup(vec![
            Descriptor::new("a", "a").with_dependencies(["b"]),
            Descriptor::new("b", "b"),
        ]);

        let a = manager.acquire("a").await.unwrap();
        let b = manager.acquire("b").await.unwrap();
        manager.release(&b).await.unwrap();
        manager.release(&b).await.unwrap();
        assert!(!manager.is_loaded("b"));

        manager.release(&a).await.unwrap();
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn events_follow_lifecycle() {
        let (manager, _storage) = setup(vec![Descriptor::new("a", "a")]);
        let mut rx = manager.subscribe();

        let h1 = manager.acquire("a").await.unwrap();
        let h2 = manager.acquire("a").await.unwrap();
        manager.release(&h2).await.unwrap();
        manager.release(&h1).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), CacheEvent::Loaded { name: "a".into() });
        assert_eq!(rx.recv().await.unwrap(), CacheEvent::Joined { name: "a".into(), refs: 2 });
        assert_eq!(rx.recv().await.unwrap(), CacheEvent::Released { name: "a".into(), refs: 1 });
        assert_eq!(rx.recv().await.unwrap(), CacheEvent::Released { name: "a".into(), refs: 0 });
        assert_eq!(rx.recv().await.unwrap(), CacheEvent::Closed { name: "a".into() });
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let (manager, storage) = setup(vec![
            Descriptor::new("a", "a").with_dependencies(["b"]),
            Descriptor::new("b", "b"),
        ]);

        let a = manager.acquire("a").await.unwrap();
        let _again = manager.acquire("a").await.unwrap();
        manager.shutdown().await.unwrap();

        assert!(manager.is_empty());
        assert_eq!(storage.closed(), vec!["b", "a"]);
        manager.release(&a).await.unwrap();
        assert_eq!(storage.close_count("a"), 1);
    }

    #[test]
    fn invalid_config_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let resolver = Arc::new(StaticResolver::new());
        let config = CacheConfig {
            event_buffer: 0,
            ..CacheConfig::default()
        };
        assert!(BundleManager::with_config(resolver, storage, config).is_err());
    }
}
