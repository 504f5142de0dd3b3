//! Commands that change the install root.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use stowage_bundle::{Descriptor, ReconcileReport, Storage, Update};

use super::{App, log_progress};
use crate::cli::Selection;

pub(super) async fn install(app: &App, selection: &Selection, verify: bool, json: bool) -> anyhow::Result<()> {
    let reconciler = app.reconciler(verify)?;
    let resolver = app.resolver.as_ref();

    let report = if selection.all {
        reconciler.install_all(resolver, &log_progress).await?
    } else if let Some(group) = &selection.group {
        reconciler.install_group(resolver, group, &log_progress).await?
    } else {
        let updates = selection
            .names
            .iter()
            .map(|name| Ok(Update::install(Descriptor::clone(app.descriptor(name)?))))
            .collect::<anyhow::Result<Vec<_>>>()?;
        reconciler.apply(&updates, &log_progress).await?
    };

    print_report(&report, json)
}

pub(super) async fn apply(app: &App, plan: &Path, json: bool) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(plan)
        .await
        .with_context(|| format!("failed to read plan {}", plan.display()))?;
    let updates: Vec<Update> =
        serde_json::from_str(&text).with_context(|| format!("failed to parse plan {}", plan.display()))?;

    let report = app.reconciler(true)?.apply(&updates, &log_progress).await?;
    print_report(&report, json)
}

pub(super) async fn remove(app: &App, names: &[String]) -> anyhow::Result<()> {
    let descriptors: Vec<Arc<Descriptor>> = names
        .iter()
        .map(|name| app.descriptor(name).cloned())
        .collect::<anyhow::Result<_>>()?;

    for descriptor in descriptors {
        app.storage.remove(&descriptor).await?;
        println!("removed {}", descriptor.name);
    }
    Ok(())
}

pub(super) async fn purge(app: &App) -> anyhow::Result<()> {
    app.storage.remove_all(&log_progress).await?;
    println!("purged {}", app.storage.root().display());
    Ok(())
}

fn print_report(report: &ReconcileReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    for name in &report.installed {
        println!("installed {name}");
    }
    for name in &report.already_installed {
        println!("up to date {name}");
    }
    for name in &report.removed {
        println!("removed {name}");
    }
    if report.is_empty() {
        println!("nothing to do");
    } else {
        println!("{} bytes written", report.bytes_written);
    }
    Ok(())
}
