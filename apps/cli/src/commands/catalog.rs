//! Read-only views of the manifest and the install root.

use stowage_bundle::{Descriptor, NoProgress, Resolver, Storage};

use super::App;

pub(super) async fn groups(app: &App) -> anyhow::Result<()> {
    for group in app.resolver.groups().await {
        let bundles = app.resolver.resolve_group(&group).await?;
        println!("{group}\t{}", bundles.len());
    }
    Ok(())
}

pub(super) async fn status(app: &App, group: Option<&str>) -> anyhow::Result<()> {
    let descriptors: Vec<_> = match group {
        Some(group) => app.resolver.resolve_group(group).await?,
        None => app.resolver.descriptors().cloned().collect(),
    };

    for descriptor in descriptors {
        println!("{}\t{}", descriptor.name, state(app, &descriptor).await?);
    }
    Ok(())
}

async fn state(app: &App, descriptor: &Descriptor) -> anyhow::Result<&'static str> {
    if !app.storage.exists(descriptor).await? {
        return Ok("missing");
    }
    if app.storage.verify(descriptor, &NoProgress).await? {
        Ok("installed")
    } else {
        Ok("corrupt")
    }
}

pub(super) fn plan(app: &App, name: &str) -> anyhow::Result<()> {
    app.descriptor(name)?;
    for bundle in app.resolver.graph().load_order(name) {
        println!("{bundle}");
    }
    Ok(())
}
