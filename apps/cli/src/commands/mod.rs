//! Subcommand implementations.

mod catalog;
mod install;
mod open;

use std::sync::Arc;

use anyhow::Context as _;
use stowage_bundle::{
    BundleManager, Descriptor, FsStorage, InstallProgress, ManifestResolver, MirrorInstaller, Reconciler, Resolver,
};

use crate::cli::Command;
use crate::config::CliConfig;

/// Everything a subcommand needs, built once from configuration.
pub struct App {
    config: CliConfig,
    resolver: Arc<ManifestResolver>,
    storage: Arc<FsStorage>,
}

impl App {
    pub async fn new(config: CliConfig) -> anyhow::Result<Self> {
        let resolver = ManifestResolver::load(&config.manifest)
            .await
            .with_context(|| format!("failed to load manifest {}", config.manifest.display()))?;
        let storage = FsStorage::new(&config.root);

        tracing::debug!(
            manifest = %config.manifest.display(),
            root = %config.root.display(),
            bundles = resolver.descriptors().count(),
            "Catalog loaded"
        );

        Ok(Self {
            config,
            resolver: Arc::new(resolver),
            storage: Arc::new(storage),
        })
    }

    pub async fn run(&self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::Groups => catalog::groups(self).await,
            Command::Status { group } => catalog::status(self, group.as_deref()).await,
            Command::Plan { name } => catalog::plan(self, &name),
            Command::Install {
                selection,
                no_verify,
                json,
            } => install::install(self, &selection, !no_verify, json).await,
            Command::Apply { plan, json } => install::apply(self, &plan, json).await,
            Command::Remove { names } => install::remove(self, &names).await,
            Command::Purge => install::purge(self).await,
            Command::Open { name } => open::open(self, &name).await,
        }
    }

    fn manager(&self) -> anyhow::Result<BundleManager<FsStorage>> {
        let resolver: Arc<dyn Resolver> = Arc::clone(&self.resolver) as Arc<dyn Resolver>;
        Ok(BundleManager::with_config(
            resolver,
            Arc::clone(&self.storage),
            self.config.cache.clone(),
        )?)
    }

    fn reconciler(&self, verify: bool) -> anyhow::Result<Reconciler<FsStorage, MirrorInstaller>> {
        let mirror = self
            .config
            .mirror
            .as_ref()
            .context("no mirror configured; set `mirror` in stowage.toml or pass --mirror")?;
        Ok(Reconciler::new(Arc::clone(&self.storage), Arc::new(MirrorInstaller::new(mirror))).with_verification(verify))
    }

    fn descriptor(&self, name: &str) -> anyhow::Result<&Arc<Descriptor>> {
        self.resolver
            .get(name)
            .with_context(|| format!("bundle '{name}' is not in the manifest"))
    }
}

/// Progress sink that forwards notifications to the log.
fn log_progress(progress: InstallProgress) {
    tracing::debug!(
        stage = %progress.stage,
        bundle = %progress.name,
        fraction = progress.fraction,
        "Progress"
    );
}
