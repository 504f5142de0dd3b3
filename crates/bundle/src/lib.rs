//! # Stowage Bundle Cache
//!
//! Reference-counted, dependency-aware, load-deduplicating cache for named
//! bundles. A [`BundleManager`] opens each bundle at most once, pins its
//! dependencies for as long as it is loaded, and closes whatever nothing
//! needs any more when handles are released.
//!
//! Bundles are described by a [`Resolver`] and physically handled by a
//! [`Storage`] backend. [`FsStorage`] and [`MemoryStorage`] are provided, as
//! are [`ManifestResolver`] and [`StaticResolver`]. A [`Reconciler`] installs
//! and removes bundle data ahead of time.
//!
//! ```no_run
//! use std::sync::Arc;
//! use stowage_bundle::{BundleManager, FsStorage, ManifestResolver};
//!
//! # async fn run() -> stowage_bundle::Result<()> {
//! let resolver = Arc::new(ManifestResolver::load("manifest.json").await?);
//! let manager = BundleManager::new(resolver, Arc::new(FsStorage::new("bundles")));
//!
//! let level = manager.acquire("level-1").await?;
//! println!("{} bytes", level.data().len());
//! manager.release(&level).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
mod context;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod fs;
pub mod graph;
pub mod handle;
pub mod install;
pub mod manager;
pub mod manifest;
pub mod memory;
pub mod progress;
pub mod reconcile;
pub mod resolver;
pub mod storage;
mod table;

pub use config::CacheConfig;
pub use descriptor::Descriptor;
pub use error::{Error, Result};
pub use events::{CacheEvent, EventBus};
pub use fs::{FileBundle, FsStorage};
pub use graph::DependencyGraph;
pub use handle::{BundleHandle, HandleId};
pub use install::{Installer, MirrorInstaller};
pub use manager::BundleManager;
pub use manifest::{GroupManifest, Manifest, ManifestResolver};
pub use memory::{MemoryBundle, MemoryStorage, StorageCall};
pub use progress::{InstallProgress, InstallStage, NoProgress, Progress};
pub use reconcile::{InstallOutcome, ReconcileReport, Reconciler, Update, UpdateKind};
pub use resolver::{Resolver, StaticResolver};
pub use storage::{InstallWriter, Storage};
