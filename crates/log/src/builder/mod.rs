//! Logger builder implementation

mod format;

// External dependencies
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

// Internal crates
use crate::config::Config;
use crate::core::{LogError, LogResult};

/// Logger builder
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
    writer: Option<BoxMakeWriter>,
}

/// Guard that keeps the logger alive
///
/// A guard from [`LoggerBuilder::build_scoped`] restores the previous
/// subscriber when dropped. A guard from [`LoggerBuilder::build`] holds
/// nothing; the global subscriber lives for the rest of the process.
#[derive(Debug)]
#[must_use = "dropping a scoped guard uninstalls its subscriber"]
pub struct LoggerGuard {
    _scope: Option<tracing::subscriber::DefaultGuard>,
}

impl LoggerBuilder {
    /// Create builder from config
    #[must_use]
    pub fn from_config(config: Config) -> Self {
        Self { config, writer: None }
    }

    /// Send output to `writer` instead of the configured stream.
    #[must_use]
    pub fn with_writer<W>(mut self, writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        self.writer = Some(BoxMakeWriter::new(writer));
        self
    }

    fn subscriber(self) -> LogResult<impl tracing::Subscriber + Send + Sync + 'static> {
        let filter = EnvFilter::try_new(&self.config.level)
            .map_err(|e| LogError::Filter(format!("{}: {}", &self.config.level, e)))?;

        let writer = self
            .writer
            .unwrap_or_else(|| format::make_writer(self.config.writer));
        let fmt_layer = format::fmt_layer(self.config.format, &self.config.display, writer);

        Ok(Registry::default().with(filter).with(fmt_layer))
    }

    /// Build and install the logger as the global default
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Filter string cannot be parsed
    /// - A global subscriber is already installed
    pub fn build(self) -> LogResult<LoggerGuard> {
        self.subscriber()?
            .try_init()
            .map_err(|_| LogError::AlreadyInitialized)?;
        Ok(LoggerGuard { _scope: None })
    }

    /// Build the logger and install it for the current thread only
    ///
    /// # Errors
    ///
    /// Returns error if the filter string cannot be parsed.
    pub fn build_scoped(self) -> LogResult<LoggerGuard> {
        let guard = tracing::subscriber::set_default(self.subscriber()?);
        Ok(LoggerGuard { _scope: Some(guard) })
    }
}
