//! Logger configuration

mod presets;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::LogError;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filter directive (e.g. "info", "debug,stowage_bundle=trace")
    pub level: String,

    /// Output format
    pub format: Format,

    /// Where events are written
    pub writer: WriterConfig,

    /// Display configuration
    pub display: DisplayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Compact,
            writer: WriterConfig::Stderr,
            display: DisplayConfig::default(),
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Human-readable, multi-line
    Pretty,
    /// Single-line
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for Format {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LogError::Config(format!("unknown log format '{other}'"))),
        }
    }
}

/// Output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterConfig {
    /// Standard error
    Stderr,
    /// Standard output
    Stdout,
}

/// Display configuration
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Show timestamps
    pub time: bool,
    /// Show source location (`file:line`)
    pub source: bool,
    /// Show target module
    pub target: bool,
    /// Show thread IDs
    pub thread_ids: bool,
    /// Use ANSI colors
    pub colors: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            time: true,
            source: cfg!(debug_assertions),
            target: true,
            thread_ids: false,
            colors: cfg!(feature = "ansi") && std::io::IsTerminal::is_terminal(&std::io::stderr()),
        }
    }
}

impl DisplayConfig {
    /// Apply `STOWAGE_LOG_*` toggles found through `lookup`.
    pub(super) fn parse_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let flag = |key: &str| lookup(key).map(|v| v != "0" && !v.eq_ignore_ascii_case("false"));

        if let Some(time) = flag("STOWAGE_LOG_TIME") {
            self.time = time;
        }
        if let Some(source) = flag("STOWAGE_LOG_SOURCE") {
            self.source = source;
        }
        if let Some(colors) = flag("STOWAGE_LOG_COLORS") {
            self.colors = colors;
        }
    }
}
