//! Reconciliation driver: brings storage in line with a catalog.
//!
//! Work is applied sequentially, one bundle at a time. The driver talks to
//! storage directly and does not coordinate with a [`BundleManager`]; callers
//! should not remove bundles that are currently acquired.
//!
//! [`BundleManager`]: crate::BundleManager

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::descriptor::Descriptor;
use crate::error::Result;
use crate::install::Installer;
use crate::progress::{InstallProgress, InstallStage, Progress, Scaled};
use crate::resolver::Resolver;
use crate::storage::Storage;

/// What happened when a bundle was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Data was written.
    Installed {
        /// Bytes written by the installer.
        bytes: u64,
    },
    /// Storage already held a verified copy.
    AlreadyInstalled,
}

/// Operation requested for one bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// Install or repair the bundle.
    Install,
    /// Delete the bundle from storage.
    Remove,
}

/// One entry of an update plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    /// What to do.
    pub kind: UpdateKind,
    /// The bundle to do it to.
    pub descriptor: Descriptor,
}

impl Update {
    /// Plan an install.
    #[must_use]
    pub fn install(descriptor: Descriptor) -> Self {
        Self {
            kind: UpdateKind::Install,
            descriptor,
        }
    }

    /// Plan a removal.
    #[must_use]
    pub fn remove(descriptor: Descriptor) -> Self {
        Self {
            kind: UpdateKind::Remove,
            descriptor,
        }
    }
}

/// Summary of a reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Bundles whose data was written.
    pub installed: Vec<String>,
    /// Bundles that were already present and verified.
    pub already_installed: Vec<String>,
    /// Bundles deleted from storage.
    pub removed: Vec<String>,
    /// Bytes written across all installs.
    pub bytes_written: u64,
}

impl ReconcileReport {
    fn record(&mut self, name: &str, outcome: InstallOutcome) {
        match outcome {
            InstallOutcome::Installed { bytes } => {
                self.installed.push(name.to_string());
                self.bytes_written += bytes;
            }
            InstallOutcome::AlreadyInstalled => self.already_installed.push(name.to_string()),
        }
    }

    fn merge(&mut self, other: Self) {
        self.installed.extend(other.installed);
        self.already_installed.extend(other.already_installed);
        self.removed.extend(other.removed);
        self.bytes_written += other.bytes_written;
    }

    /// Whether nothing was touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.installed.is_empty() && self.already_installed.is_empty() && self.removed.is_empty()
    }
}

/// Drives an [`Installer`] and a [`Storage`] through install and remove work.
pub struct Reconciler<S: Storage, I: Installer> {
    storage: Arc<S>,
    installer: Arc<I>,
    verify: bool,
}

impl<S: Storage, I: Installer> Reconciler<S, I> {
    /// Create a reconciler that verifies existing data before skipping it.
    pub fn new(storage: Arc<S>, installer: Arc<I>) -> Self {
        Self {
            storage,
            installer,
            verify: true,
        }
    }

    /// Whether present bundles must pass `verify` to be skipped.
    ///
    /// With verification off, presence alone is enough.
    #[must_use]
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Install one bundle unless storage already holds a good copy.
    ///
    /// Verification is reported over `[0, 0.5]` and installation over
    /// `[0.5, 1]`. A bundle that is already installed reports `Install 1.0`.
    ///
    /// # Errors
    /// Backend or installer failures. A failed install removes the partial data.
    pub async fn install(&self, descriptor: &Descriptor, progress: &dyn Progress) -> Result<InstallOutcome> {
        let name = descriptor.name.as_str();
        let verify_progress = Scaled::new(progress, InstallStage::Verify, 0.0, 0.5);

        if self.storage.exists(descriptor).await?
            && (!self.verify || self.storage.verify(descriptor, &verify_progress).await?)
        {
            tracing::debug!(bundle = %name, "Bundle already installed");
            progress.report(InstallProgress::new(InstallStage::Install, name, 1.0));
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        let install_progress = Scaled::new(progress, InstallStage::Install, 0.5, 0.5);
        let mut writer = self.storage.install_writer(descriptor).await?;
        let result = self.installer.install(descriptor, &mut writer, &install_progress).await;
        drop(writer);

        match result {
            Ok(bytes) => {
                tracing::info!(bundle = %name, bytes, "Bundle installed");
                Ok(InstallOutcome::Installed { bytes })
            }
            Err(err) => {
                tracing::warn!(bundle = %name, error = %err, "Install failed; discarding partial data");
                if let Err(cleanup) = self.storage.remove(descriptor).await {
                    tracing::warn!(bundle = %name, error = %cleanup, "Failed to discard partial data");
                }
                Err(err)
            }
        }
    }

    /// Install every bundle of `group`, in catalog order.
    ///
    /// # Errors
    /// Stops at the first failure.
    pub async fn install_group(
        &self,
        resolver: &dyn Resolver,
        group: &str,
        progress: &dyn Progress,
    ) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for descriptor in resolver.resolve_group(group).await? {
            let outcome = self.install(&descriptor, progress).await?;
            report.record(&descriptor.name, outcome);
        }
        tracing::debug!(group, installed = report.installed.len(), "Group reconciled");
        Ok(report)
    }

    /// Install every group the resolver knows.
    ///
    /// # Errors
    /// Stops at the first failure.
    pub async fn install_all(&self, resolver: &dyn Resolver, progress: &dyn Progress) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for group in resolver.groups().await {
            report.merge(self.install_group(resolver, &group, progress).await?);
        }
        Ok(report)
    }

    /// Apply an update plan in order.
    ///
    /// # Errors
    /// Stops at the first failure; earlier entries stay applied.
    pub async fn apply(&self, updates: &[Update], progress: &dyn Progress) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for update in updates {
            match update.kind {
                UpdateKind::Install => {
                    let outcome = self.install(&update.descriptor, progress).await?;
                    report.record(&update.descriptor.name, outcome);
                }
                UpdateKind::Remove => {
                    self.remove(&update.descriptor, progress).await?;
                    report.removed.push(update.descriptor.name.clone());
                }
            }
        }
        Ok(report)
    }

    /// Delete one bundle from storage.
    ///
    /// # Errors
    /// Whatever the backend returns.
    pub async fn remove(&self, descriptor: &Descriptor, progress: &dyn Progress) -> Result<()> {
        self.storage.remove(descriptor).await?;
        tracing::info!(bundle = %descriptor.name, "Bundle removed");
        progress.report(InstallProgress::new(InstallStage::Remove, &descriptor.name, 1.0));
        Ok(())
    }

    /// Delete everything from storage.
    ///
    /// # Errors
    /// Whatever the backend returns.
    pub async fn remove_all(&self, progress: &dyn Progress) -> Result<()> {
        self.storage.remove_all(progress).await?;
        tracing::info!("All bundles removed");
        Ok(())
    }
}

impl<S: Storage, I: Installer> std::fmt::Debug for Reconciler<S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("verify", &self.verify)
            .finish_non_exhaustive()
    }
}
