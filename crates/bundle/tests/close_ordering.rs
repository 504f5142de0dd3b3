//! Ordering between a release's backend close and acquires racing it.
//!
//! Both tests run on paused time, so backend delays elapse only when every
//! task is waiting and the interleaving is the same on every run.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use stowage_bundle::{BundleManager, Descriptor, MemoryStorage, Resolver, StaticResolver, StorageCall};

fn manager(storage: MemoryStorage) -> (Arc<BundleManager<MemoryStorage>>, Arc<MemoryStorage>) {
    let descriptors = vec![
        Descriptor::new("a", "a.bundle").with_dependencies(["b"]),
        Descriptor::new("b", "b.bundle"),
    ];
    let storage = Arc::new(storage);
    for descriptor in &descriptors {
        storage.insert(descriptor, descriptor.name.as_bytes().to_vec());
    }
    let resolver: Arc<dyn Resolver> = Arc::new(StaticResolver::from_descriptors(descriptors));
    (Arc::new(BundleManager::new(resolver, Arc::clone(&storage))), storage)
}

fn opens_and_closes(storage: &MemoryStorage, name: &str) -> Vec<StorageCall> {
    storage
        .calls()
        .into_iter()
        .filter(|call| matches!(call, StorageCall::Open(n) | StorageCall::Close(n) if n == name))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn reacquire_waits_for_slow_close() {
    let (manager, storage) = manager(MemoryStorage::new().with_close_delay(Duration::from_millis(100)));
    let first = manager.acquire("b").await.unwrap();

    let releaser = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.release(&first).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The close has started but not finished; the name is still taken.
    assert_eq!(storage.close_count("b"), 1);
    assert_eq!(storage.live_count("b"), 1);
    assert!(!manager.is_loaded("b"));
    assert_eq!(manager.len(), 1);

    let second = manager.acquire("b").await.unwrap();
    releaser.await.unwrap().unwrap();

    assert_eq!(storage.peak_live_count("b"), 1);
    assert_eq!(
        opens_and_closes(&storage, "b"),
        vec![
            StorageCall::Open("b".into()),
            StorageCall::Close("b".into()),
            StorageCall::Open("b".into()),
        ]
    );
    assert_eq!(manager.ref_count("b"), Some(1));

    manager.release(&second).await.unwrap();
    assert!(manager.is_empty());
    assert_eq!(storage.live_count("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn dependent_reacquire_waits_for_dependency_close() {
    let (manager, storage) = manager(MemoryStorage::new().with_close_delay(Duration::from_millis(100)));
    let first = manager.acquire("a").await.unwrap();

    let releaser = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.release(&first).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = manager.acquire("a").await.unwrap();
    releaser.await.unwrap().unwrap();

    assert_eq!(storage.peak_live_count("a"), 1);
    assert_eq!(storage.peak_live_count("b"), 1);
    assert_eq!(manager.loaded_names(), vec!["a", "b"]);

    manager.release(&second).await.unwrap();
    assert!(manager.is_empty());
    assert_eq!(storage.close_count("a"), 2);
    assert_eq!(storage.close_count("b"), 2);
}

#[tokio::test(start_paused = true)]
async fn release_waits_for_dependency_reload() {
    let open_delay = Duration::from_millis(50);
    let (manager, storage) = manager(MemoryStorage::new().with_open_delay(open_delay));

    let a = manager.acquire("a").await.unwrap();
    // Drop b's pinned reference behind a's back so its slot goes away.
    let b = manager.acquire("b").await.unwrap();
    manager.release(&b).await.unwrap();
    manager.release(&b).await.unwrap();
    assert!(!manager.is_loaded("b"));
    assert_eq!(storage.close_count("b"), 1);

    let reloader = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.acquire("b").await })
    };
    while manager.len() < 2 {
        tokio::task::yield_now().await;
    }
    assert!(!manager.is_loaded("b"));

    let started = tokio::time::Instant::now();
    manager.release(&a).await.unwrap();
    assert!(started.elapsed() >= open_delay);
    assert_eq!(storage.open_count("b"), 2);

    // The cascade took the one reference the reloaded instance had.
    assert_eq!(storage.close_count("a"), 1);
    assert_eq!(storage.close_count("b"), 2);
    assert!(manager.is_empty());

    let reloaded = reloader.await.unwrap().unwrap();
    manager.release(&reloaded).await.unwrap();
    assert_eq!(storage.close_count("b"), 2);
}
