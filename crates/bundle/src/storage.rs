//! Storage backend seam.
//!
//! A [`Storage`] performs the physical work: checking presence, opening and
//! closing bundles, and providing the install stream an
//! [`Installer`](crate::Installer) writes into. The cache never touches bundle
//! bytes itself.

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::progress::Progress;

/// Writable stream that receives a bundle's data during installation.
pub type InstallWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Physical storage for bundles.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// The loaded form of a bundle.
    type Bundle: Send + Sync + 'static;

    /// Whether the bundle is present in storage.
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool>;

    /// Physically open the bundle.
    async fn open(&self, descriptor: &Descriptor) -> Result<Self::Bundle>;

    /// Physically close a bundle previously returned by [`open`](Self::open).
    async fn close(&self, bundle: &Self::Bundle) -> Result<()>;

    /// Delete the bundle's data. Deleting an absent bundle succeeds.
    async fn remove(&self, descriptor: &Descriptor) -> Result<()>;

    /// Delete every bundle held by this storage.
    async fn remove_all(&self, progress: &dyn Progress) -> Result<()>;

    /// Check stored data against the descriptor's integrity hints.
    async fn verify(&self, descriptor: &Descriptor, progress: &dyn Progress) -> Result<bool>;

    /// Open a stream that replaces the bundle's data with whatever is written.
    async fn install_writer(&self, descriptor: &Descriptor) -> Result<InstallWriter>;
}
