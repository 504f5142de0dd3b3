//! Error types for bundle management
use std::sync::Arc;

use thiserror::Error;

use crate::handle::HandleId;

/// Result type for bundle operations
pub type Result<T> = std::result::Result<T, Error>;

/// Shared, clonable error source.
pub type Source = Arc<dyn std::error::Error + Send + Sync>;

/// Comprehensive error type for bundle management operations.
///
/// The type is `Clone` so that one failed load can be observed identically
/// by every caller awaiting the same outcome.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The resolver has no descriptor for a requested name
    #[error("Bundle '{name}' could not be resolved{}", dependent_suffix(.required_by))]
    DependencyNotFound {
        /// The unresolved bundle name
        name: String,
        /// The dependent that listed the missing name, if any
        required_by: Option<String>,
    },

    /// The storage backend does not hold the bundle
    #[error("Bundle '{name}' is not installed in storage")]
    NotInstalled {
        /// The bundle name
        name: String,
    },

    /// The backend failed to open the bundle
    #[error("Failed to load bundle '{name}': {reason}")]
    LoadFailure {
        /// The bundle name
        name: String,
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<Source>,
    },

    /// The cache was shut down while the bundle was loading
    #[error("Bundle '{name}' was closed by shutdown before its load completed")]
    ShutDown {
        /// The bundle name
        name: String,
    },

    /// A bundle transitively depends on itself
    #[error("Cyclic dependency detected: {cycle}")]
    CyclicDependency {
        /// The dependency cycle as a string
        cycle: String,
    },

    /// A reference count would drop below zero
    #[error("Bundle '{name}' was released more times than it was acquired")]
    OverRelease {
        /// The bundle name
        name: String,
    },

    /// A context was asked to release a handle it does not own
    #[error("Handle mismatch for bundle '{name}': context owns {expected}, release requested for {actual}")]
    HandleMismatch {
        /// The bundle name
        name: String,
        /// The id owned by the context
        expected: HandleId,
        /// The id passed to the release
        actual: HandleId,
    },

    /// Backend I/O failed
    #[error("Storage {operation} failed for '{name}': {source}")]
    Storage {
        /// The bundle name or path the operation targeted
        name: String,
        /// The operation that failed
        operation: &'static str,
        /// The underlying error
        #[source]
        source: Source,
    },

    /// Installing a bundle failed
    #[error("Install failed for bundle '{name}': {reason}")]
    Install {
        /// The bundle name
        name: String,
        /// The failure reason
        reason: String,
    },

    /// The manifest is malformed or inconsistent
    #[error("Manifest error: {message}")]
    Manifest {
        /// The error message
        message: String,
    },

    /// Configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },
}

fn dependent_suffix(required_by: &Option<String>) -> String {
    required_by
        .as_deref()
        .map(|dependent| format!(" (required by '{dependent}')"))
        .unwrap_or_default()
}

impl Error {
    /// Create a dependency-not-found error for a top-level name
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::DependencyNotFound {
            name: name.into(),
            required_by: None,
        }
    }

    /// Create a not-installed error
    pub fn not_installed(name: impl Into<String>) -> Self {
        Self::NotInstalled { name: name.into() }
    }

    /// Create a shut-down error for a load cut short by shutdown
    pub fn shut_down(name: impl Into<String>) -> Self {
        Self::ShutDown { name: name.into() }
    }

    /// Wrap a backend failure observed while opening `name`
    pub fn load_failure(name: impl Into<String>, cause: Self) -> Self {
        Self::LoadFailure {
            name: name.into(),
            reason: cause.to_string(),
            source: Some(Arc::new(cause)),
        }
    }

    /// Create a storage error from an I/O error
    pub fn storage(name: impl Into<String>, operation: &'static str, source: std::io::Error) -> Self {
        Self::Storage {
            name: name.into(),
            operation,
            source: Arc::new(source),
        }
    }

    /// Create an install error
    pub fn install(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Install {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a manifest error
    pub fn manifest<S: Into<String>>(message: S) -> Self {
        Self::Manifest {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Attach the dependent that listed an unresolved name.
    ///
    /// Other variants pass through unchanged.
    #[must_use]
    pub fn required_by(self, dependent: &str) -> Self {
        match self {
            Self::DependencyNotFound {
                name,
                required_by: None,
            } => Self::DependencyNotFound {
                name,
                required_by: Some(dependent.to_string()),
            },
            other => other,
        }
    }

    /// Whether this error is a broken reference-count invariant.
    ///
    /// Fatal errors indicate a bug in the caller or in the cache itself and
    /// must not be retried or papered over.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OverRelease { .. } | Self::HandleMismatch { .. })
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LoadFailure { .. } | Self::Storage { .. } | Self::NotInstalled { .. } | Self::ShutDown { .. }
        )
    }

    /// Get the bundle name associated with this error (if any)
    #[must_use]
    pub fn bundle_name(&self) -> Option<&str> {
        match self {
            Self::CyclicDependency { .. } | Self::Manifest { .. } | Self::Configuration { .. } => {
                None
            }
            Self::DependencyNotFound { name, .. }
            | Self::NotInstalled { name }
            | Self::LoadFailure { name, .. }
            | Self::ShutDown { name }
            | Self::OverRelease { name }
            | Self::HandleMismatch { name, .. }
            | Self::Storage { name, .. }
            | Self::Install { name, .. } => Some(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_by_fills_missing_dependent() {
        let err = Error::not_found("shaders").required_by("level-1");
        assert!(matches!(
            &err,
            Error::DependencyNotFound { name, required_by: Some(dep) } if name == "shaders" && dep == "level-1"
        ));
        assert_eq!(
            err.to_string(),
            "Bundle 'shaders' could not be resolved (required by 'level-1')"
        );
    }

    #[test]
    fn required_by_keeps_innermost_dependent() {
        let err = Error::not_found("x").required_by("b").required_by("a");
        assert!(matches!(err, Error::DependencyNotFound { required_by: Some(ref d), .. } if d == "b"));
    }

    #[test]
    fn load_failure_keeps_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::load_failure("ui", Error::storage("ui", "open", io));
        let source = std::error::Error::source(&err).expect("load failure has a source");
        assert!(source.to_string().contains("gone"));
        assert_eq!(err.bundle_name(), Some("ui"));
    }

    #[test]
    fn only_invariant_violations_are_fatal() {
        assert!(Error::OverRelease { name: "a".into() }.is_fatal());
        assert!(
            Error::HandleMismatch {
                name: "a".into(),
                expected: HandleId::new(1),
                actual: HandleId::new(2),
            }
            .is_fatal()
        );
        assert!(!Error::not_installed("a").is_fatal());
        assert!(!Error::not_found("a").is_retryable());
    }
}
