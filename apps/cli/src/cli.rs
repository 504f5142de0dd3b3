//! Command-line arguments.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use stowage_log::Format;

#[derive(Parser, Debug)]
#[command(name = "stowage")]
#[command(version, about = "Install, inspect and load dependency-aware content bundles")]
pub struct Cli {
    /// Configuration file (defaults to ./stowage.toml when present)
    #[arg(long, short = 'c', global = true, env = "STOWAGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log output format
    #[arg(long, global = true, value_parser = parse_format)]
    pub log_format: Option<Format>,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags that override configuration keys of the same name.
#[derive(Args, Debug, Default, Clone, serde::Serialize)]
pub struct Overrides {
    /// Directory bundles are installed into
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// JSON manifest describing groups and bundles
    #[arg(long, short = 'm', global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,

    /// Directory bundles are installed from
    #[arg(long, global = true)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirror: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the groups in the manifest
    Groups,

    /// Show whether each bundle is installed and intact
    Status {
        /// Only bundles of this group
        #[arg(long, short = 'g')]
        group: Option<String>,
    },

    /// Print the order bundles would be opened in to load NAME
    Plan {
        /// Bundle to plan for
        name: String,
    },

    /// Install bundles from the mirror
    Install {
        #[command(flatten)]
        selection: Selection,

        /// Skip hashing bundles that are already present
        #[arg(long)]
        no_verify: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply a JSON update plan (a list of {"kind", "descriptor"} entries)
    Apply {
        /// Plan file
        plan: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete bundles from the install root
    Remove {
        /// Bundles to delete
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Delete everything under the install root
    Purge,

    /// Load a bundle with its dependencies, report counts, then release it
    Open {
        /// Bundle to load
        name: String,
    },
}

/// Which bundles `install` works on.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct Selection {
    /// Every bundle of this group
    #[arg(long, short = 'g')]
    pub group: Option<String>,

    /// Every bundle in the manifest
    #[arg(long)]
    pub all: bool,

    /// Individual bundles
    pub names: Vec<String>,
}

fn parse_format(value: &str) -> Result<Format, String> {
    value.parse().map_err(|e: stowage_log::LogError| e.to_string())
}
