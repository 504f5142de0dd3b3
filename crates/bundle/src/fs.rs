//! Directory-backed storage.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::progress::{InstallProgress, InstallStage, Progress};
use crate::storage::{InstallWriter, Storage};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Join a descriptor's locator onto `root`, refusing locators that are
/// empty, absolute or climb out with `..`.
pub(crate) fn locator_path(root: &Path, descriptor: &Descriptor) -> Result<PathBuf> {
    let locator = Path::new(&descriptor.locator);
    let contained = !descriptor.locator.is_empty()
        && locator
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !contained {
        return Err(Error::storage(
            &descriptor.name,
            "resolve path",
            std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("locator '{}' escapes the storage root", descriptor.locator),
            ),
        ));
    }
    Ok(root.join(locator))
}

/// A bundle read from disk.
#[derive(Debug, Clone)]
pub struct FileBundle {
    name: String,
    path: PathBuf,
    data: Bytes,
}

impl FileBundle {
    /// Bundle name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File the bundle was read from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bundle contents.
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Stores each bundle as a file at `root/<locator>`.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    chunk_size: usize,
}

impl FsStorage {
    /// Create a storage rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Read size used while hashing during `verify`.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Storage root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path for a descriptor.
    ///
    /// # Errors
    /// Locators must be relative and stay inside the root.
    pub fn path_of(&self, descriptor: &Descriptor) -> Result<PathBuf> {
        locator_path(&self.root, descriptor)
    }

    async fn digest(&self, descriptor: &Descriptor, path: &Path, len: u64, progress: &dyn Progress) -> Result<String> {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| Error::storage(&descriptor.name, "verify", e))?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; self.chunk_size];
        let mut read_total = 0u64;

        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| Error::storage(&descriptor.name, "verify", e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            read_total += n as u64;
            let fraction = if len == 0 { 1.0 } else { read_total as f64 / len as f64 };
            progress.report(InstallProgress::new(InstallStage::Verify, &descriptor.name, fraction));
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl Storage for FsStorage {
    type Bundle = FileBundle;

    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        let path = self.path_of(descriptor)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::storage(&descriptor.name, "exists", e)),
        }
    }

    async fn open(&self, descriptor: &Descriptor) -> Result<FileBundle> {
        let path = self.path_of(descriptor)?;
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::storage(&descriptor.name, "open", e))?;

        tracing::debug!(bundle = %descriptor.name, path = %path.display(), bytes = data.len(), "Opened bundle file");

        Ok(FileBundle {
            name: descriptor.name.clone(),
            path,
            data: Bytes::from(data),
        })
    }

    async fn close(&self, bundle: &FileBundle) -> Result<()> {
        tracing::trace!(bundle = %bundle.name, "Closed bundle file");
        Ok(())
    }

    async fn remove(&self, descriptor: &Descriptor) -> Result<()> {
        let path = self.path_of(descriptor)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(&descriptor.name, "remove", e)),
        }
    }

    async fn remove_all(&self, progress: &dyn Progress) -> Result<()> {
        let root = self.root.display().to_string();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::storage(root, "remove all", e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage(&root, "remove all", e))?
        {
            paths.push(entry.path());
        }

        let total = paths.len();
        for (done, path) in paths.into_iter().enumerate() {
            let name = path.display().to_string();
            let result = if path.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            result.map_err(|e| Error::storage(&name, "remove all", e))?;
            progress.report(InstallProgress::new(
                InstallStage::Remove,
                name,
                (done + 1) as f64 / total as f64,
            ));
        }

        Ok(())
    }

    async fn verify(&self, descriptor: &Descriptor, progress: &dyn Progress) -> Result<bool> {
        let path = self.path_of(descriptor)?;
        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::storage(&descriptor.name, "verify", e)),
        };

        if let Some(size) = descriptor.size
            && size != meta.len()
        {
            tracing::debug!(bundle = %descriptor.name, expected = size, actual = meta.len(), "Size mismatch");
            return Ok(false);
        }

        let Some(expected) = descriptor.hash.as_deref() else {
            progress.report(InstallProgress::new(InstallStage::Verify, &descriptor.name, 1.0));
            return Ok(true);
        };

        let actual = self.digest(descriptor, &path, meta.len(), progress).await?;
        let matches = actual.eq_ignore_ascii_case(expected);
        if !matches {
            tracing::debug!(bundle = %descriptor.name, expected, actual, "Hash mismatch");
        }
        Ok(matches)
    }

    async fn install_writer(&self, descriptor: &Descriptor) -> Result<InstallWriter> {
        let path = self.path_of(descriptor)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(&descriptor.name, "install", e))?;
        }
        let file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| Error::storage(&descriptor.name, "install", e))?;
        Ok(Box::pin(file))
    }
}
