//! Shutdown drains the cache, closing every loaded bundle exactly once.

use std::sync::Arc;
use std::time::Duration;

use stowage_bundle::{BundleManager, CacheEvent, Descriptor, Error, MemoryStorage, Resolver, StaticResolver};

fn setup(open_delay: Duration) -> (Arc<BundleManager<MemoryStorage>>, Arc<MemoryStorage>) {
    let descriptors = vec![
        Descriptor::new("a", "a.bundle").with_dependencies(["b"]),
        Descriptor::new("b", "b.bundle"),
        Descriptor::new("slow", "slow.bundle"),
    ];
    let storage = Arc::new(MemoryStorage::new().with_open_delay(open_delay));
    for descriptor in &descriptors {
        storage.insert(descriptor, descriptor.name.as_bytes().to_vec());
    }
    let resolver: Arc<dyn Resolver> = Arc::new(StaticResolver::from_descriptors(descriptors));
    (Arc::new(BundleManager::new(resolver, Arc::clone(&storage))), storage)
}

#[tokio::test]
async fn shutdown_closes_everything_in_load_order() {
    let (manager, storage) = setup(Duration::ZERO);
    let _a = manager.acquire("a").await.unwrap();
    let _b = manager.acquire("b").await.unwrap();

    manager.shutdown().await.unwrap();

    assert!(manager.is_empty());
    assert_eq!(storage.closed(), vec!["b", "a"]);
}

#[tokio::test]
async fn handles_outstanding_at_shutdown_release_as_noop() {
    let (manager, storage) = setup(Duration::ZERO);
    let a = manager.acquire("a").await.unwrap();
    manager.shutdown().await.unwrap();
    storage.clear_calls();

    manager.release(&a).await.unwrap();

    assert!(storage.calls().is_empty());
    assert!(manager.is_empty());
}

#[tokio::test]
async fn cache_is_usable_after_shutdown() {
    let (manager, storage) = setup(Duration::ZERO);
    let first = manager.acquire("b").await.unwrap();
    manager.shutdown().await.unwrap();

    let second = manager.acquire("b").await.unwrap();
    assert_ne!(first, second);
    assert_eq!(storage.open_count("b"), 2);
    manager.release(&second).await.unwrap();
    assert_eq!(storage.close_count("b"), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_loads() {
    let (manager, storage) = setup(Duration::from_millis(50));
    let mut events = manager.subscribe();

    let loaders: Vec<_> = (0..2)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.acquire("slow").await })
        })
        .collect();
    // Both loaders are parked on the open by the time paused time moves.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.len(), 1);

    manager.shutdown().await.unwrap();

    // Neither the caller that started the load nor the one that joined it
    // gets a handle to the instance shutdown closed.
    for loader in loaders {
        let err = loader.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ShutDown { ref name } if name == "slow"));
        assert!(err.is_retryable());
    }

    assert_eq!(storage.open_count("slow"), 1);
    assert_eq!(storage.close_count("slow"), 1);
    assert_eq!(storage.live_count("slow"), 0);
    assert!(manager.is_empty());

    let mut closed = false;
    while let Ok(event) = events.try_recv() {
        closed |= event == CacheEvent::Closed { name: "slow".into() };
    }
    assert!(closed);

    // A retry after shutdown loads afresh.
    let handle = manager.acquire("slow").await.unwrap();
    assert_eq!(storage.open_count("slow"), 2);
    manager.release(&handle).await.unwrap();
    assert_eq!(storage.close_count("slow"), 2);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_closes_in_progress() {
    let storage = Arc::new(MemoryStorage::new().with_close_delay(Duration::from_millis(100)));
    let descriptor = Descriptor::new("b", "b.bundle");
    storage.insert(&descriptor, b"b".to_vec());
    let resolver: Arc<dyn Resolver> = Arc::new(StaticResolver::from_descriptors(vec![descriptor]));
    let manager = Arc::new(BundleManager::new(resolver, Arc::clone(&storage)));

    let handle = manager.acquire("b").await.unwrap();
    let releaser = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.release(&handle).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    manager.shutdown().await.unwrap();
    assert_eq!(storage.live_count("b"), 0);
    assert_eq!(storage.close_count("b"), 1);

    releaser.await.unwrap().unwrap();
    assert!(manager.is_empty());
}
