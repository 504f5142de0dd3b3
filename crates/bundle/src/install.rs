//! Installers fill a storage install stream with bundle data.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::descriptor::Descriptor;
use crate::error::{Error, Result};
use crate::fs::locator_path;
use crate::progress::{InstallProgress, InstallStage, Progress};
use crate::storage::InstallWriter;

/// Source of bundle data for installation.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Write the bundle's data into `writer`, returning the bytes written.
    ///
    /// Implementations report progress over `[0, 1]` and leave the writer
    /// flushed and shut down on success.
    async fn install(
        &self,
        descriptor: &Descriptor,
        writer: &mut InstallWriter,
        progress: &dyn Progress,
    ) -> Result<u64>;
}

/// Copies bundles from a local mirror directory laid out like the store.
#[derive(Debug, Clone)]
pub struct MirrorInstaller {
    root: PathBuf,
    chunk_size: usize,
}

impl MirrorInstaller {
    /// Install from files under `root/<locator>`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chunk_size: 64 * 1024,
        }
    }

    /// Copy granularity, which is also the progress granularity.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

#[async_trait]
impl Installer for MirrorInstaller {
    async fn install(
        &self,
        descriptor: &Descriptor,
        writer: &mut InstallWriter,
        progress: &dyn Progress,
    ) -> Result<u64> {
        let name = descriptor.name.as_str();
        let source = locator_path(&self.root, descriptor)?;
        let mut file = tokio::fs::File::open(&source)
            .await
            .map_err(|e| Error::install(name, format!("cannot open {}: {e}", source.display())))?;
        let total = file
            .metadata()
            .await
            .map_err(|e| Error::install(name, e.to_string()))?
            .len();

        if let Some(expected) = descriptor.size
            && expected != total
        {
            return Err(Error::install(
                name,
                format!("mirror copy is {total} bytes, expected {expected}"),
            ));
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        progress.report(InstallProgress::new(InstallStage::Install, name, 0.0));

        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| Error::install(name, e.to_string()))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| Error::install(name, e.to_string()))?;
            written += n as u64;
            let fraction = if total == 0 { 1.0 } else { written as f64 / total as f64 };
            progress.report(InstallProgress::new(InstallStage::Install, name, fraction));
        }

        writer.flush().await.map_err(|e| Error::install(name, e.to_string()))?;
        writer.shutdown().await.map_err(|e| Error::install(name, e.to_string()))?;
        progress.report(InstallProgress::new(InstallStage::Install, name, 1.0));

        Ok(written)
    }
}
