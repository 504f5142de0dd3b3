//! `stowage`: install, inspect and load content bundles.

mod cli;
mod commands;
mod config;

use clap::Parser;

use crate::cli::Cli;
use crate::commands::App;
use crate::config::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref(), &cli.overrides)?;

    match cli.verbose {
        0 => {}
        1 => config.log.level = "info".to_string(),
        2 => config.log.level = "debug".to_string(),
        _ => config.log.level = "trace".to_string(),
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    let _log = stowage_log::init_with(config.log.clone())?;

    tracing::debug!(command = ?cli.command, "Starting");
    let app = App::new(config).await?;
    app.run(cli.command).await
}
