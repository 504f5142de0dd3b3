//! End-to-end: manifest, mirror installer, directory storage and the cache.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use stowage_bundle::{
    BundleManager, Error, FsStorage, InstallProgress, InstallStage, ManifestResolver, MirrorInstaller, NoProgress,
    Reconciler, Resolver, Storage, Update,
};

struct World {
    _dirs: (tempfile::TempDir, tempfile::TempDir),
    store: std::path::PathBuf,
    mirror: std::path::PathBuf,
    resolver: Arc<ManifestResolver>,
    storage: Arc<FsStorage>,
    reconciler: Reconciler<FsStorage, MirrorInstaller>,
}

async fn write(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(path, data).await.unwrap();
}

async fn world() -> World {
    let store_dir = tempfile::tempdir().unwrap();
    let mirror_dir = tempfile::tempdir().unwrap();
    let mirror = mirror_dir.path().to_path_buf();

    write(&mirror.join("core/shaders.bundle"), b"shaders").await;
    write(&mirror.join("core/ui.bundle"), b"ui-data").await;
    write(&mirror.join("levels/1.bundle"), b"level-one").await;

    let manifest = serde_json::json!({
        "groups": [
            { "name": "core", "bundles": [
                { "name": "shaders", "locator": "core/shaders.bundle", "size": 7,
                  "hash": hex::encode(Sha256::digest(b"shaders")) },
                { "name": "ui", "locator": "core/ui.bundle", "dependencies": ["shaders"] }
            ] },
            { "name": "levels", "bundles": [
                { "name": "level-1", "locator": "levels/1.bundle", "dependencies": ["ui"] }
            ] }
        ]
    });
    let resolver = Arc::new(ManifestResolver::from_json(&manifest.to_string()).unwrap());
    let storage = Arc::new(FsStorage::new(store_dir.path()));
    let reconciler = Reconciler::new(Arc::clone(&storage), Arc::new(MirrorInstaller::new(&mirror)));

    World {
        store: store_dir.path().to_path_buf(),
        mirror,
        _dirs: (store_dir, mirror_dir),
        resolver,
        storage,
        reconciler,
    }
}

#[tokio::test]
async fn install_all_then_acquire_chain() {
    let w = world().await;

    let report = w.reconciler.install_all(w.resolver.as_ref(), &NoProgress).await.unwrap();
    assert_eq!(report.installed, vec!["shaders", "ui", "level-1"]);
    assert_eq!(report.bytes_written, 7 + 7 + 9);

    let manager = BundleManager::new(Arc::clone(&w.resolver) as Arc<dyn Resolver>, Arc::clone(&w.storage));
    let level = manager.acquire("level-1").await.unwrap();
    assert_eq!(level.data().as_ref(), b"level-one");
    assert_eq!(manager.loaded_names(), vec!["level-1", "shaders", "ui"]);

    manager.release(&level).await.unwrap();
    assert!(manager.is_empty());
}

#[tokio::test]
async fn second_install_is_skipped_after_verification() {
    let w = world().await;
    w.reconciler.install_group(w.resolver.as_ref(), "core", &NoProgress).await.unwrap();

    let report = w.reconciler.install_group(w.resolver.as_ref(), "core", &NoProgress).await.unwrap();
    assert!(report.installed.is_empty());
    assert_eq!(report.already_installed, vec!["shaders", "ui"]);
}

#[tokio::test]
async fn corrupted_bundle_is_repaired() {
    let w = world().await;
    w.reconciler.install_group(w.resolver.as_ref(), "core", &NoProgress).await.unwrap();
    write(&w.store.join("core/shaders.bundle"), b"SHADERS").await;

    let report = w.reconciler.install_group(w.resolver.as_ref(), "core", &NoProgress).await.unwrap();
    assert_eq!(report.installed, vec!["shaders"]);
    assert_eq!(tokio::fs::read(w.store.join("core/shaders.bundle")).await.unwrap(), b"shaders");
}

#[tokio::test]
async fn install_progress_covers_both_stages() {
    let w = world().await;
    let shaders = w.resolver.resolve("shaders").await.unwrap();
    write(&w.store.join("core/shaders.bundle"), b"stale!!").await;

    let seen = Mutex::new(Vec::new());
    let sink = |p: InstallProgress| seen.lock().push((p.stage, p.fraction));
    w.reconciler.install(&shaders, &sink).await.unwrap();

    let seen = seen.lock();
    assert!(seen.iter().any(|(stage, _)| *stage == InstallStage::Verify));
    assert!(seen.iter().filter(|(stage, _)| *stage == InstallStage::Verify).all(|(_, f)| *f <= 0.5));
    assert!(seen.iter().filter(|(stage, _)| *stage == InstallStage::Install).all(|(_, f)| *f >= 0.5));
    assert_eq!(seen.last().copied(), Some((InstallStage::Install, 1.0)));
}

#[tokio::test]
async fn acquire_before_install_is_not_installed() {
    let w = world().await;
    let manager = BundleManager::new(Arc::clone(&w.resolver) as Arc<dyn Resolver>, Arc::clone(&w.storage));

    let err = manager.acquire("ui").await.unwrap_err();
    assert!(matches!(err, Error::NotInstalled { ref name } if name == "shaders"));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn apply_plan_and_purge() {
    let w = world().await;
    let ui = (*w.resolver.resolve("ui").await.unwrap()).clone();
    let shaders = (*w.resolver.resolve("shaders").await.unwrap()).clone();

    let plan = vec![Update::install(shaders.clone()), Update::install(ui.clone()), Update::remove(shaders.clone())];
    let report = w.reconciler.apply(&plan, &NoProgress).await.unwrap();
    assert_eq!(report.installed, vec!["shaders", "ui"]);
    assert_eq!(report.removed, vec!["shaders"]);
    assert!(!w.storage.exists(&shaders).await.unwrap());
    assert!(w.storage.exists(&ui).await.unwrap());

    w.reconciler.remove_all(&NoProgress).await.unwrap();
    assert!(!w.storage.exists(&ui).await.unwrap());
    assert!(w.mirror.join("core/ui.bundle").exists(), "mirror is never touched");
}
