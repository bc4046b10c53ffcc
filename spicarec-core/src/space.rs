//! Pre-flight free-space checks.
//!
//! A guard rejects an operation before any destructive step has run, so a
//! failed check never leaves state to clean up. Backups are guarded against
//! the destination's available space; artifact size estimates come from the
//! source's used space.

use crate::errors::{RecoveryError, Result};
use anyhow::Context;
use spicarec_hal::RecoveryHal;
use std::path::Path;

pub struct SpaceGuard<'a> {
    hal: &'a dyn RecoveryHal,
}

impl<'a> SpaceGuard<'a> {
    pub fn new(hal: &'a dyn RecoveryHal) -> Self {
        Self { hal }
    }

    pub fn free_mb(&self, path: &Path) -> Result<u64> {
        let usage = self
            .hal
            .usage(path)
            .with_context(|| format!("Unable to stat {}", path.display()))?;
        Ok(usage.free_mb())
    }

    pub fn used_mb(&self, path: &Path) -> Result<u64> {
        let usage = self
            .hal
            .usage(path)
            .with_context(|| format!("Unable to stat {}", path.display()))?;
        Ok(usage.used_mb())
    }

    /// Reject up front when the filesystem holding `path` has less than
    /// `required_mb` available.
    pub fn check_free(&self, path: &Path, required_mb: u64) -> Result<()> {
        let available_mb = self.free_mb(path)?;
        log::debug!(
            "space check on {}: {available_mb}MB free, {required_mb}MB required",
            path.display()
        );
        if available_mb < required_mb {
            return Err(RecoveryError::InsufficientSpace {
                path: path.to_path_buf(),
                available_mb,
                required_mb,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spicarec_hal::FakeHal;

    #[test]
    fn sufficient_space_passes() {
        let hal = FakeHal::new();
        hal.set_usage_mb("/sdcard", 1000, 300);

        let guard = SpaceGuard::new(&hal);
        guard.check_free(Path::new("/sdcard"), 220).unwrap();
    }

    #[test]
    fn insufficient_space_is_rejected_with_the_available_amount() {
        let hal = FakeHal::new();
        hal.set_usage_mb("/sdcard", 1000, 100);

        let guard = SpaceGuard::new(&hal);
        let err = guard.check_free(Path::new("/sdcard"), 220).unwrap_err();
        match err.downcast_ref::<RecoveryError>() {
            Some(RecoveryError::InsufficientSpace {
                available_mb,
                required_mb,
                ..
            }) => {
                assert_eq!(*available_mb, 100);
                assert_eq!(*required_mb, 220);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Nothing was spawned by a failed guard.
        assert!(hal.spawned_programs().is_empty());
    }

    #[test]
    fn nested_paths_resolve_to_the_containing_filesystem() {
        let hal = FakeHal::new();
        hal.set_usage_mb("/sdcard", 1000, 50);

        let guard = SpaceGuard::new(&hal);
        assert_eq!(guard.free_mb(Path::new("/sdcard/samdroid")).unwrap(), 50);
        assert_eq!(guard.used_mb(Path::new("/sdcard/samdroid")).unwrap(), 950);
    }
}
