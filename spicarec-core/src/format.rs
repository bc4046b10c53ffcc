//! Format dispatch.
//!
//! A format only ever runs against an unmounted root. Roots whose
//! filesystem has no mkfs tool are wiped in place instead; roots whose
//! backing device does not exist on this particular device (optional
//! partitions like SDEXT) skip with success.

use crate::arming::ArmToken;
use crate::errors::{RecoveryError, Result};
use crate::mounts::MountController;
use crate::process::ProcessSupervisor;
use crate::report::Reporter;
use crate::roots::{Filesystem, RootName, RootTable};
use anyhow::Context;
use spicarec_hal::{CommandSpec, RecoveryHal};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatResult {
    Formatted,
    /// Backing device absent; optional-partition semantics.
    SkippedAbsent,
    /// No mkfs tool for the filesystem; contents were deleted instead.
    Wiped,
}

/// The mkfs invocation for a filesystem, or `None` when the root has to be
/// wiped in place.
pub fn mkfs_command(filesystem: &Filesystem, device: &Path) -> Option<CommandSpec> {
    let device = device.display().to_string();
    match filesystem {
        // Vendor tool for the FAT-derived stock filesystem.
        Filesystem::Rfs => Some(CommandSpec::new("fat.format").arg("-F").arg("32").arg(device)),
        Filesystem::Ext2 => Some(CommandSpec::new("mkfs.ext2").arg("-q").arg(device)),
        Filesystem::Ext4 => Some(CommandSpec::new("mkfs.ext4").arg("-q").arg(device)),
        Filesystem::Auto | Filesystem::Other(_) => None,
    }
}

/// Format a root to the filesystem currently recorded in the table.
///
/// The caller owns metadata updates and the post-format recheck; this
/// function only realises the recorded filesystem on disk.
#[allow(clippy::too_many_arguments)]
pub fn format_root(
    hal: &dyn RecoveryHal,
    supervisor: &ProcessSupervisor,
    mounts: &MountController,
    table: &RootTable,
    name: RootName,
    _token: &ArmToken,
    reporter: &dyn Reporter,
    dry_run: bool,
) -> Result<FormatResult> {
    let info = table.get(name);

    if let Some(mount_point) = &info.mount_point {
        let mounted = hal
            .is_mounted(mount_point)
            .with_context(|| format!("Failed to query mount state of {name}"))?;
        if mounted {
            return Err(RecoveryError::StillMounted(name).into());
        }
    }

    if !hal
        .device_present(&info.device)
        .with_context(|| format!("Failed to probe {}", info.device.display()))?
    {
        reporter.print(&format!("{name}: no backing device, skipping format."));
        return Ok(FormatResult::SkippedAbsent);
    }

    match mkfs_command(&info.filesystem, &info.device) {
        Some(spec) => {
            reporter.print(&format!(
                "Formatting {} as {}..",
                name, info.filesystem
            ));
            supervisor.run_checked(&spec, None, reporter)?;
            Ok(FormatResult::Formatted)
        }
        None => {
            // No tool to recreate this filesystem; empty it instead. The
            // path comes from the root table, never from the operator.
            let Some(mount_point) = &info.mount_point else {
                return Err(RecoveryError::NotMountable(name).into());
            };
            reporter.print(&format!("Wiping contents of {name}.."));
            mounts.ensure_mounted(table, name)?;
            hal.shell_status(&format!("rm -rf {}/*", mount_point.display()), dry_run)
                .with_context(|| format!("Failed to wipe {name}"))?;
            mounts.ensure_unmounted(table, name)?;
            Ok(FormatResult::Wiped)
        }
    }
}
