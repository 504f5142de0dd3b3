//! Progress reporting for install, verify and remove operations.
//!
//! Progress is observational only: sinks never influence control flow.

use std::fmt;

/// Phase an operation is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallStage {
    /// Checking what is already in storage.
    Verify,
    /// Writing bundle data into storage.
    Install,
    /// Deleting bundle data.
    Remove,
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verify => write!(f, "verify"),
            Self::Install => write!(f, "install"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallProgress {
    /// Current phase.
    pub stage: InstallStage,
    /// Bundle the notification is about.
    pub name: String,
    /// Completion in `[0, 1]`.
    pub fraction: f64,
}

impl InstallProgress {
    /// Build a notification, clamping `fraction` into `[0, 1]`.
    pub fn new(stage: InstallStage, name: impl Into<String>, fraction: f64) -> Self {
        Self {
            stage,
            name: name.into(),
            fraction: if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) },
        }
    }
}

/// Receiver of progress notifications.
pub trait Progress: Send + Sync {
    /// Handle one notification.
    fn report(&self, progress: InstallProgress);
}

impl<F> Progress for F
where
    F: Fn(InstallProgress) + Send + Sync,
{
    fn report(&self, progress: InstallProgress) {
        self(progress);
    }
}

/// Sink that discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _progress: InstallProgress) {}
}

/// Maps a sub-task's `[0, 1]` onto `[offset, offset + scale]` of the
/// overall operation and pins the reported stage.
pub(crate) struct Scaled<'a> {
    inner: &'a dyn Progress,
    stage: InstallStage,
    offset: f64,
    scale: f64,
}

impl<'a> Scaled<'a> {
    pub(crate) fn new(inner: &'a dyn Progress, stage: InstallStage, offset: f64, scale: f64) -> Self {
        Self {
            inner,
            stage,
            offset,
            scale,
        }
    }
}

impl Progress for Scaled<'_> {
    fn report(&self, progress: InstallProgress) {
        self.inner.report(InstallProgress::new(
            self.stage,
            progress.name,
            self.offset + progress.fraction * self.scale,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(InstallProgress::new(InstallStage::Install, "a", 1.5).fraction, 1.0);
        assert_eq!(InstallProgress::new(InstallStage::Install, "a", -0.1).fraction, 0.0);
        assert_eq!(InstallProgress::new(InstallStage::Install, "a", f64::NAN).fraction, 0.0);
    }

    #[test]
    fn scaled_maps_into_slice() {
        let seen = Mutex::new(Vec::new());
        let sink = |p: InstallProgress| seen.lock().push((p.stage, p.fraction));
        let scaled = Scaled::new(&sink, InstallStage::Install, 0.5, 0.5);

        scaled.report(InstallProgress::new(InstallStage::Verify, "a", 0.0));
        scaled.report(InstallProgress::new(InstallStage::Verify, "a", 0.5));
        scaled.report(InstallProgress::new(InstallStage::Verify, "a", 1.0));

        assert_eq!(
            *seen.lock(),
            vec![
                (InstallStage::Install, 0.5),
                (InstallStage::Install, 0.75),
                (InstallStage::Install, 1.0),
            ]
        );
    }
}
