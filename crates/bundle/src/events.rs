//! Event broadcasting for bundle lifecycle observability.
//!
//! Provides [`CacheEvent`] variants emitted by the
//! [`BundleManager`](crate::BundleManager) and an [`EventBus`] backed by
//! `tokio::sync::broadcast`.

use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// CacheEvent
// ---------------------------------------------------------------------------

/// Events emitted while bundles are acquired and released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    /// The backend opened a bundle and a new context was published.
    Loaded {
        /// The bundle name.
        name: String,
    },
    /// A caller joined an existing load and took another reference.
    Joined {
        /// The bundle name.
        name: String,
        /// Reference count after joining.
        refs: usize,
    },
    /// A reference was given back.
    Released {
        /// The bundle name.
        name: String,
        /// Reference count after the release.
        refs: usize,
    },
    /// The bundle lost its last reference and was closed.
    Closed {
        /// The bundle name.
        name: String,
    },
    /// Opening a bundle failed; every waiter received the same error.
    LoadFailed {
        /// The bundle name.
        name: String,
        /// Human-readable error description.
        error: String,
    },
}

impl CacheEvent {
    /// The bundle this event is about.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Loaded { name }
            | Self::Joined { name, .. }
            | Self::Released { name, .. }
            | Self::Closed { name }
            | Self::LoadFailed { name, .. } => name,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for cache events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are dropped (no backpressure on the emitter).
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    ///
    /// # Panics
    /// Panics if `buffer_size` is zero; [`CacheConfig::validate`](crate::CacheConfig::validate)
    /// rejects that before a bus is built.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: CacheEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
