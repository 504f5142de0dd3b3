//! `open`: exercise the cache against the install root.

use stowage_bundle::CacheEvent;

use super::App;

pub(super) async fn open(app: &App, name: &str) -> anyhow::Result<()> {
    let manager = app.manager()?;
    let mut events = manager.subscribe();

    let handle = manager.acquire(name).await?;
    println!("opened {} ({} bytes)", handle.name(), handle.data().len());
    for loaded in manager.loaded_names() {
        let refs = manager.ref_count(&loaded).unwrap_or_default();
        println!("  {loaded}\trefs={refs}");
    }

    manager.release(&handle).await?;
    while let Ok(event) = events.try_recv() {
        if let CacheEvent::Closed { name } = event {
            println!("closed {name}");
        }
    }

    anyhow::ensure!(manager.is_empty(), "bundles still loaded after release: {:?}", manager.loaded_names());
    Ok(())
}
