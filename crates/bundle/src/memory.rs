//! In-memory storage backend.
//!
//! Keeps bundle bytes in a map and records every backend call, which makes it
//! the backend of choice for tests and for embedding pre-baked bundles.

use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWrite;

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::progress::{InstallProgress, InstallStage, Progress};
use crate::storage::{InstallWriter, Storage};

/// A bundle opened from [`MemoryStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBundle {
    /// Bundle name.
    pub name: String,
    /// Bundle contents at the time it was opened.
    pub data: Bytes,
}

/// Record of backend calls for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    /// `exists` was called for the bundle.
    Exists(String),
    /// `open` was called for the bundle.
    Open(String),
    /// `close` was called for the bundle.
    Close(String),
    /// `remove` was called for the bundle.
    Remove(String),
    /// `remove_all` was called.
    RemoveAll,
    /// `install_writer` was called for the bundle.
    Install(String),
}

type Blobs = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Storage that keeps bundle data in memory, keyed by locator.
#[derive(Default)]
pub struct MemoryStorage {
    blobs: Blobs,
    calls: Mutex<Vec<StorageCall>>,
    failing: Mutex<HashSet<String>>,
    /// Per name: instances open right now and the most ever open at once.
    live: Mutex<HashMap<String, (usize, usize)>>,
    open_delay: Option<Duration>,
    close_delay: Option<Duration>,
}

impl MemoryStorage {
    /// Create an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every `open` by `delay`, widening race windows in tests.
    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    /// Delay every `close` by `delay`.
    #[must_use]
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    /// Store data for a descriptor.
    pub fn insert(&self, descriptor: &Descriptor, data: impl Into<Vec<u8>>) {
        self.blobs.lock().insert(descriptor.locator.clone(), data.into());
    }

    /// Make `open` fail for the named bundle until [`heal`](Self::heal) is called.
    pub fn fail_open(&self, name: impl Into<String>) {
        self.failing.lock().insert(name.into());
    }

    /// Undo [`fail_open`](Self::fail_open).
    pub fn heal(&self, name: &str) {
        self.failing.lock().remove(name);
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// How many times the named bundle was opened.
    #[must_use]
    pub fn open_count(&self, name: &str) -> usize {
        self.count(|call| matches!(call, StorageCall::Open(n) if n == name))
    }

    /// How many times the named bundle was closed.
    #[must_use]
    pub fn close_count(&self, name: &str) -> usize {
        self.count(|call| matches!(call, StorageCall::Close(n) if n == name))
    }

    /// Instances of the named bundle that are open and not yet closed.
    #[must_use]
    pub fn live_count(&self, name: &str) -> usize {
        self.live.lock().get(name).map_or(0, |(live, _)| *live)
    }

    /// The most instances of the named bundle that were ever open at once.
    #[must_use]
    pub fn peak_live_count(&self, name: &str) -> usize {
        self.live.lock().get(name).map_or(0, |(_, peak)| *peak)
    }

    /// Names of closed bundles in close order.
    #[must_use]
    pub fn closed(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                StorageCall::Close(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Stored bytes for a descriptor.
    #[must_use]
    pub fn data(&self, descriptor: &Descriptor) -> Option<Vec<u8>> {
        self.blobs.lock().get(&descriptor.locator).cloned()
    }

    fn count(&self, pred: impl Fn(&StorageCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| pred(call)).count()
    }

    fn record(&self, call: StorageCall) {
        self.calls.lock().push(call);
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("bundles", &self.blobs.lock().len())
            .field("calls", &self.calls.lock().len())
            .finish()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Bundle = MemoryBundle;

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        self.record(StorageCall::Exists(descriptor.name.clone()));
        Ok(self.blobs.lock().contains_key(&descriptor.locator))
    }

    async fn open(&self, descriptor: &Descriptor) -> Result<MemoryBundle> {
        self.record(StorageCall::Open(descriptor.name.clone()));
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(&descriptor.name) {
            return Err(Error::storage(
                &descriptor.name,
                "open",
                io::Error::other("injected open failure"),
            ));
        }

        let data = self
            .blobs
            .lock()
            .get(&descriptor.locator)
            .cloned()
            .ok_or_else(|| {
                Error::storage(&descriptor.name, "open", io::Error::from(io::ErrorKind::NotFound))
            })?;

        let mut live = self.live.lock();
        let (open, peak) = live.entry(descriptor.name.clone()).or_default();
        *open += 1;
        *peak = (*peak).max(*open);
        drop(live);

        Ok(MemoryBundle {
            name: descriptor.name.clone(),
            data: Bytes::from(data),
        })
    }

    async fn close(&self, bundle: &MemoryBundle) -> Result<()> {
        self.record(StorageCall::Close(bundle.name.clone()));
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((open, _)) = self.live.lock().get_mut(&bundle.name) {
            *open = open.saturating_sub(1);
        }
        Ok(())
    }

    async fn remove(&self, descriptor: &Descriptor) -> Result<()> {
        self.record(StorageCall::Remove(descriptor.name.clone()));
        self.blobs.lock().remove(&descriptor.locator);
        Ok(())
    }

    async fn remove_all(&self, progress: &dyn Progress) -> Result<()> {
        self.record(StorageCall::RemoveAll);
        let removed: Vec<String> = self.blobs.lock().drain().map(|(locator, _)| locator).collect();
        let total = removed.len();
        for (done, locator) in removed.into_iter().enumerate() {
            progress.report(InstallProgress::new(
                InstallStage::Remove,
                locator,
                (done + 1) as f64 / total as f64,
            ));
        }
        Ok(())
    }

    async fn verify(&self, descriptor: &Descriptor, progress: &dyn Progress) -> Result<bool> {
        let ok = match self.blobs.lock().get(&descriptor.locator) {
            None => false,
            Some(data) => descriptor.size.is_none_or(|size| size == data.len() as u64),
        };
        progress.report(InstallProgress::new(InstallStage::Verify, &descriptor.name, 1.0));
        Ok(ok)
    }

    async fn install_writer(&self, descriptor: &Descriptor) -> Result<InstallWriter> {
        self.record(StorageCall::Install(descriptor.name.clone()));
        self.blobs.lock().insert(descriptor.locator.clone(), Vec::new());
        Ok(Box::pin(BlobWriter {
            blobs: Arc::clone(&self.blobs),
            locator: descriptor.locator.clone(),
        }))
    }
}

/// Appends written bytes straight into the shared blob map.
struct BlobWriter {
    blobs: Blobs,
    locator: String,
}

impl AsyncWrite for BlobWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.blobs
            .lock()
            .entry(self.locator.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn records_calls_in_order() {
        let storage = MemoryStorage::new();
        let d = Descriptor::new("a", "a.bundle");
        storage.insert(&d, b"x".to_vec());

        assert!(storage.exists(&d).await.unwrap());
        let bundle = storage.open(&d).await.unwrap();
        storage.close(&bundle).await.unwrap();

        assert_eq!(
            storage.calls(),
            vec![
                StorageCall::Exists("a".into()),
                StorageCall::Open("a".into()),
                StorageCall::Close("a".into()),
            ]
        );
        assert_eq!(storage.open_count("a"), 1);
        assert_eq!(storage.closed(), vec!["a".to_string()]);
        assert_eq!(storage.live_count("a"), 0);
        assert_eq!(storage.peak_live_count("a"), 1);
    }

    #[tokio::test]
    async fn injected_failure_until_healed() {
        let storage = MemoryStorage::new();
        let d = Descriptor::new("a", "a.bundle");
        storage.insert(&d, b"x".to_vec());
        storage.fail_open("a");

        assert!(storage.open(&d).await.is_err());
        storage.heal("a");
        assert!(storage.open(&d).await.is_ok());
    }

    #[tokio::test]
    async fn install_writer_replaces_data() {
        let storage = MemoryStorage::new();
        let d = Descriptor::new("a", "a.bundle").with_size(3);
        storage.insert(&d, b"old-data".to_vec());
        assert!(!storage.verify(&d, &NoProgress).await.unwrap());

        let mut writer = storage.install_writer(&d).await.unwrap();
        writer.write_all(b"new").await.unwrap();
        writer.shutdown().await.unwrap();

        assert_eq!(storage.data(&d).unwrap(), b"new");
        assert!(storage.verify(&d, &NoProgress).await.unwrap());
    }
}
