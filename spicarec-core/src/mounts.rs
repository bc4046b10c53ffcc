//! Idempotent mount state transitions for roots.

use crate::errors::{RecoveryError, Result};
use crate::roots::{mount_fstype, RootName, RootTable};
use anyhow::Context;
use spicarec_hal::{MountOptions, RecoveryHal};

pub struct MountController<'a> {
    hal: &'a dyn RecoveryHal,
    dry_run: bool,
}

impl<'a> MountController<'a> {
    pub fn new(hal: &'a dyn RecoveryHal, dry_run: bool) -> Self {
        Self { hal, dry_run }
    }

    /// Whether the root is currently mounted. Raw roots without a mount
    /// point are never mounted.
    pub fn is_mounted(&self, table: &RootTable, name: RootName) -> Result<bool> {
        let info = table.get(name);
        let Some(mount_point) = &info.mount_point else {
            return Ok(false);
        };
        self.hal
            .is_mounted(mount_point)
            .with_context(|| format!("Failed to query mount state of {name}"))
    }

    /// Mount a root if it is not already mounted. Calling this twice in a
    /// row performs exactly one mount action.
    pub fn ensure_mounted(&self, table: &RootTable, name: RootName) -> Result<()> {
        let info = table.get(name);
        let Some(mount_point) = &info.mount_point else {
            return Err(RecoveryError::NotMountable(name).into());
        };

        if self.is_mounted(table, name)? {
            return Ok(());
        }

        self.hal
            .mount_device(
                &info.device,
                mount_point,
                mount_fstype(&info.filesystem),
                MountOptions::with_options(info.filesystem_options.clone()),
                self.dry_run,
            )
            .map_err(|cause| RecoveryError::Mount { root: name, cause })?;
        Ok(())
    }

    /// Unmount a root if it is mounted; no-op otherwise.
    pub fn ensure_unmounted(&self, table: &RootTable, name: RootName) -> Result<()> {
        let info = table.get(name);
        let Some(mount_point) = &info.mount_point else {
            return Ok(());
        };

        if !self.is_mounted(table, name)? {
            return Ok(());
        }

        self.hal
            .unmount(mount_point, self.dry_run)
            .map_err(|cause| RecoveryError::Unmount { root: name, cause })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spicarec_hal::{FakeHal, Operation};

    #[test]
    fn ensure_mounted_is_idempotent() {
        let hal = FakeHal::new();
        let table = RootTable::with_defaults();
        let mounts = MountController::new(&hal, false);

        mounts.ensure_mounted(&table, RootName::Data).unwrap();
        mounts.ensure_mounted(&table, RootName::Data).unwrap();

        let mount_ops = hal
            .operations()
            .iter()
            .filter(|op| matches!(op, Operation::Mount { .. }))
            .count();
        assert_eq!(mount_ops, 1);
        assert!(mounts.is_mounted(&table, RootName::Data).unwrap());
    }

    #[test]
    fn ensure_unmounted_is_idempotent() {
        let hal = FakeHal::new();
        let table = RootTable::with_defaults();
        let mounts = MountController::new(&hal, false);

        mounts.ensure_mounted(&table, RootName::Data).unwrap();
        mounts.ensure_unmounted(&table, RootName::Data).unwrap();
        mounts.ensure_unmounted(&table, RootName::Data).unwrap();

        let unmount_ops = hal
            .operations()
            .iter()
            .filter(|op| matches!(op, Operation::Unmount { .. }))
            .count();
        assert_eq!(unmount_ops, 1);
        assert!(!mounts.is_mounted(&table, RootName::Data).unwrap());
    }

    #[test]
    fn mount_passes_filesystem_and_device_through() {
        let hal = FakeHal::new();
        let table = RootTable::with_defaults();
        let mounts = MountController::new(&hal, false);

        mounts.ensure_mounted(&table, RootName::System).unwrap();

        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Mount { device, target, fstype }
                if device.to_str() == Some("/dev/stl6")
                    && target.to_str() == Some("/system")
                    && fstype.as_deref() == Some("rfs")
        )));
    }

    #[test]
    fn raw_roots_cannot_be_mounted() {
        let hal = FakeHal::new();
        let table = RootTable::with_defaults();
        let mounts = MountController::new(&hal, false);

        let err = mounts.ensure_mounted(&table, RootName::Boot).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecoveryError>(),
            Some(RecoveryError::NotMountable(RootName::Boot))
        ));
        // Unmounting one is a harmless no-op.
        mounts.ensure_unmounted(&table, RootName::Boot).unwrap();
    }

    #[test]
    fn mount_failure_is_surfaced_with_the_root_name() {
        let hal = FakeHal::new();
        let table = RootTable::with_defaults();
        let mounts = MountController::new(&hal, false);
        hal.fail_mount("/cache");

        let err = mounts.ensure_mounted(&table, RootName::Cache).unwrap_err();
        assert!(err.to_string().contains("CACHE"));
    }
}
