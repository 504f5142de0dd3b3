//! Layered configuration: defaults, then `stowage.toml`, then `STOWAGE_*`
//! environment variables, then command-line flags.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use figment::Figment;
use figment::providers::{Env, Format as _, Serialized, Toml};
use serde::{Deserialize, Serialize};
use stowage_bundle::CacheConfig;

use crate::cli::Overrides;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_FILE: &str = "stowage.toml";

/// Environment keys consumed by `stowage_log::Config::from_env` rather than
/// by the layered loader.
const LOG_ENV: &[&str] = &["LOG", "LOG_FORMAT", "LOG_TIME", "LOG_SOURCE", "LOG_COLORS", "CONFIG"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Install root.
    pub root: PathBuf,
    /// Manifest file.
    pub manifest: PathBuf,
    /// Install source; `install` and `apply` need one.
    pub mirror: Option<PathBuf>,
    pub cache: CacheConfig,
    pub log: stowage_log::Config,
}

impl Default for CliConfig {
    fn default() -> Self {
        let mut log = stowage_log::Config::from_env();
        if std::env::var_os("STOWAGE_LOG").is_none() && std::env::var_os("RUST_LOG").is_none() {
            log.level = "warn".to_string();
        }

        Self {
            root: PathBuf::from("bundles"),
            manifest: PathBuf::from("manifest.json"),
            mirror: None,
            cache: CacheConfig::default(),
            log,
        }
    }
}

impl CliConfig {
    /// Build the layered configuration.
    ///
    /// An explicit `file` must exist; the default file is optional.
    pub fn load(file: Option<&Path>, overrides: &Overrides) -> anyhow::Result<Self> {
        let toml = match file {
            Some(path) => {
                anyhow::ensure!(path.is_file(), "config file {} does not exist", path.display());
                Toml::file(path)
            }
            None => Toml::file(DEFAULT_FILE),
        };

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(toml)
            .merge(Env::prefixed("STOWAGE_").ignore(LOG_ENV).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()
            .context("invalid configuration")?;

        config.cache.validate().context("invalid cache configuration")?;
        Ok(config)
    }
}
