//! The root table: one entry per logical storage root.
//!
//! Roots are a closed set; strings appear only at the boundaries (backup
//! filename tokens, fstab rendering, CLI arguments). The table is the single
//! shared mutable structure of the engine and is only ever mutated by the
//! orchestrating thread between child-process launches.

use crate::errors::{RecoveryError, Result};
use anyhow::Context;
use spicarec_hal::RecoveryHal;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RootName {
    System,
    Data,
    Cache,
    Sdcard,
    Sdext,
    Efs,
    Boot,
}

impl RootName {
    pub const ALL: [RootName; 7] = [
        RootName::System,
        RootName::Data,
        RootName::Cache,
        RootName::Sdcard,
        RootName::Sdext,
        RootName::Efs,
        RootName::Boot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RootName::System => "SYSTEM",
            RootName::Data => "DATA",
            RootName::Cache => "CACHE",
            RootName::Sdcard => "SDCARD",
            RootName::Sdext => "SDEXT",
            RootName::Efs => "EFS",
            RootName::Boot => "BOOT",
        }
    }

    /// Short label embedded in backup filenames (`Backup_<ts>_Sys.tar`).
    pub fn label(&self) -> &'static str {
        match self {
            RootName::System => "Sys",
            RootName::Data => "Data",
            RootName::Cache => "Cache",
            RootName::Sdcard => "Sdcard",
            RootName::Sdext => "SdExt",
            RootName::Efs => "Efs",
            RootName::Boot => "Boot",
        }
    }

    /// Resolve a filename token back to a root. Accepts both the short
    /// label and the full name, case-insensitively.
    pub fn from_label(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|root| {
            token.eq_ignore_ascii_case(root.label()) || token.eq_ignore_ascii_case(root.as_str())
        })
    }
}

impl fmt::Display for RootName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RootName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_label(s).ok_or_else(|| format!("unknown root: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filesystem {
    Rfs,
    Ext2,
    Ext4,
    /// Unprobed; mount lets the kernel decide.
    Auto,
    /// Anything else observed on disk (e.g. `vfat` on the sdcard).
    Other(String),
}

impl Filesystem {
    pub fn as_str(&self) -> &str {
        match self {
            Filesystem::Rfs => "rfs",
            Filesystem::Ext2 => "ext2",
            Filesystem::Ext4 => "ext4",
            Filesystem::Auto => "auto",
            Filesystem::Other(name) => name,
        }
    }

    /// Map a probed on-disk signature to a filesystem tag.
    pub fn from_signature(signature: &str) -> Self {
        match signature {
            "rfs" => Filesystem::Rfs,
            "ext2" => Filesystem::Ext2,
            "ext4" => Filesystem::Ext4,
            other => Filesystem::Other(other.to_string()),
        }
    }

    /// Mount options associated with each filesystem tag. Fixed lookup,
    /// never user input.
    pub fn default_options(&self) -> &'static str {
        match self {
            Filesystem::Rfs => "nodev,nosuid,codepage=utf8,xattr,check=no",
            Filesystem::Ext2 => "nodev,nosuid,noatime,nodiratime",
            Filesystem::Ext4 => "nodev,nosuid,noatime,nodiratime,data=ordered",
            Filesystem::Auto | Filesystem::Other(_) => "",
        }
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Filesystem {
    type Err = String;

    // Only the filesystems we can create are accepted here; probed tags go
    // through `from_signature` instead.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rfs" => Ok(Filesystem::Rfs),
            "ext2" => Ok(Filesystem::Ext2),
            "ext4" => Ok(Filesystem::Ext4),
            other => Err(format!("unsupported target filesystem: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RootInfo {
    pub name: RootName,
    /// Physical device, or a backing image file when an alternate OS is
    /// active.
    pub device: PathBuf,
    /// `None` for raw roots that are never mounted (BOOT).
    pub mount_point: Option<PathBuf>,
    pub filesystem: Filesystem,
    pub filesystem_options: String,
}

impl RootInfo {
    fn new(
        name: RootName,
        device: &str,
        mount_point: Option<&str>,
        filesystem: Filesystem,
    ) -> Self {
        let filesystem_options = filesystem.default_options().to_string();
        Self {
            name,
            device: PathBuf::from(device),
            mount_point: mount_point.map(PathBuf::from),
            filesystem,
            filesystem_options,
        }
    }
}

/// Registry of all roots. Every `RootName` always has an entry; lookups
/// cannot fail.
#[derive(Debug, Clone)]
pub struct RootTable {
    entries: Vec<RootInfo>,
}

impl RootTable {
    /// Device layout for the supported device family.
    pub fn with_defaults() -> Self {
        Self {
            entries: vec![
                RootInfo::new(RootName::System, "/dev/stl6", Some("/system"), Filesystem::Rfs),
                RootInfo::new(RootName::Data, "/dev/stl5", Some("/data"), Filesystem::Rfs),
                RootInfo::new(RootName::Cache, "/dev/stl7", Some("/cache"), Filesystem::Rfs),
                RootInfo::new(
                    RootName::Sdcard,
                    "/dev/block/mmcblk0p1",
                    Some("/sdcard"),
                    Filesystem::Other("vfat".to_string()),
                ),
                RootInfo::new(
                    RootName::Sdext,
                    "/dev/block/mmcblk0p2",
                    Some("/sd-ext"),
                    Filesystem::Auto,
                ),
                RootInfo::new(RootName::Efs, "/dev/stl4", Some("/efs"), Filesystem::Rfs),
                RootInfo::new(RootName::Boot, "/dev/bml5", None, Filesystem::Auto),
            ],
        }
    }

    pub fn get(&self, name: RootName) -> &RootInfo {
        self.entries
            .iter()
            .find(|info| info.name == name)
            .expect("every root has an entry")
    }

    fn get_mut(&mut self, name: RootName) -> &mut RootInfo {
        self.entries
            .iter_mut()
            .find(|info| info.name == name)
            .expect("every root has an entry")
    }

    pub fn iter(&self) -> impl Iterator<Item = &RootInfo> {
        self.entries.iter()
    }

    /// Record a new filesystem for a root, deriving its option string.
    ///
    /// This only updates metadata; it is not atomic with the format that
    /// realises it on disk. A crash in between leaves the table and the
    /// device inconsistent until the next [`RootTable::recheck`].
    pub fn set_filesystem(&mut self, name: RootName, filesystem: Filesystem) {
        let info = self.get_mut(name);
        info.filesystem_options = filesystem.default_options().to_string();
        info.filesystem = filesystem;
    }

    /// Point a root at a different backing device (alternate-OS images).
    /// Refused while the root is mounted.
    pub fn reassign_device(
        &mut self,
        hal: &dyn RecoveryHal,
        name: RootName,
        device: PathBuf,
        filesystem: Filesystem,
        options: &str,
    ) -> Result<()> {
        let info = self.get(name);
        if let Some(mount_point) = &info.mount_point {
            let mounted = hal
                .is_mounted(mount_point)
                .with_context(|| format!("Failed to query mount state of {name}"))?;
            if mounted {
                return Err(RecoveryError::StillMounted(name).into());
            }
        }

        let info = self.get_mut(name);
        log::info!(
            "{}: device {} -> {}",
            name,
            info.device.display(),
            device.display()
        );
        info.device = device;
        info.filesystem = filesystem;
        info.filesystem_options = options.to_string();
        Ok(())
    }

    /// Re-probe every root's on-disk signature and resynchronise the table
    /// with observed truth, discarding speculative filesystem values. This
    /// is the main consistency-recovery mechanism after a failed or
    /// interrupted format.
    ///
    /// Roots whose device is absent or carries no signature keep their
    /// current entry. The option string is only re-derived when the probed
    /// filesystem differs, so explicit options (loopback images) survive
    /// routine rechecks.
    pub fn recheck(&mut self, hal: &dyn RecoveryHal) -> Result<()> {
        for info in &mut self.entries {
            if !hal
                .device_present(&info.device)
                .with_context(|| format!("Failed to probe {}", info.device.display()))?
            {
                log::debug!("{}: device {} absent", info.name, info.device.display());
                continue;
            }

            let signature = hal
                .probe_filesystem(&info.device)
                .with_context(|| format!("Failed to probe {}", info.device.display()))?;
            let Some(signature) = signature else {
                log::debug!("{}: no filesystem signature", info.name);
                continue;
            };

            let observed = Filesystem::from_signature(&signature);
            if observed != info.filesystem {
                log::info!(
                    "{}: filesystem {} -> {}",
                    info.name,
                    info.filesystem,
                    observed
                );
                info.filesystem_options = observed.default_options().to_string();
                info.filesystem = observed;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl RootTable {
    /// Relocate a root's mount point into a tempdir-owned path.
    pub(crate) fn set_mount_point_for_tests(&mut self, name: RootName, mount_point: PathBuf) {
        self.get_mut(name).mount_point = Some(mount_point);
    }
}

/// Convenience for mount calls: `Auto` lets the kernel pick the type.
pub fn mount_fstype(filesystem: &Filesystem) -> Option<&str> {
    match filesystem {
        Filesystem::Auto => None,
        other => Some(other.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spicarec_hal::FakeHal;

    #[test]
    fn every_root_has_an_entry() {
        let table = RootTable::with_defaults();
        for name in RootName::ALL {
            assert_eq!(table.get(name).name, name);
        }
    }

    #[test]
    fn option_strings_follow_the_filesystem() {
        assert_eq!(
            Filesystem::Rfs.default_options(),
            "nodev,nosuid,codepage=utf8,xattr,check=no"
        );
        assert_eq!(
            Filesystem::Ext4.default_options(),
            "nodev,nosuid,noatime,nodiratime,data=ordered"
        );

        let mut table = RootTable::with_defaults();
        table.set_filesystem(RootName::Data, Filesystem::Ext2);
        let info = table.get(RootName::Data);
        assert_eq!(info.filesystem, Filesystem::Ext2);
        assert_eq!(info.filesystem_options, "nodev,nosuid,noatime,nodiratime");
    }

    #[test]
    fn labels_round_trip() {
        for root in RootName::ALL {
            assert_eq!(RootName::from_label(root.label()), Some(root));
            assert_eq!(RootName::from_label(root.as_str()), Some(root));
        }
        assert_eq!(RootName::from_label("20230101-120000"), None);
    }

    #[test]
    fn recheck_adopts_the_probed_signature() {
        let hal = FakeHal::new();
        let mut table = RootTable::with_defaults();
        hal.set_fstype("/dev/stl5", "ext4");

        // Speculative value that was never realised on disk.
        table.set_filesystem(RootName::Data, Filesystem::Ext2);

        table.recheck(&hal).unwrap();
        let info = table.get(RootName::Data);
        assert_eq!(info.filesystem, Filesystem::Ext4);
        assert_eq!(
            info.filesystem_options,
            "nodev,nosuid,noatime,nodiratime,data=ordered"
        );
    }

    #[test]
    fn recheck_skips_absent_and_unsigned_devices() {
        let hal = FakeHal::new();
        let mut table = RootTable::with_defaults();
        hal.set_device_absent("/dev/block/mmcblk0p2");
        // No signature configured for /dev/stl6 either.

        table.recheck(&hal).unwrap();
        assert_eq!(table.get(RootName::Sdext).filesystem, Filesystem::Auto);
        assert_eq!(table.get(RootName::System).filesystem, Filesystem::Rfs);
    }

    #[test]
    fn recheck_preserves_custom_options_when_filesystem_is_unchanged() {
        let hal = FakeHal::new();
        let mut table = RootTable::with_defaults();
        let image = PathBuf::from("/sdcard/froyo/system.img");
        hal.set_fstype(image.clone(), "ext4");

        table
            .reassign_device(
                &hal,
                RootName::System,
                image,
                Filesystem::Ext4,
                "loop,nodev,nosuid,noatime,nodiratime,data=ordered",
            )
            .unwrap();
        table.recheck(&hal).unwrap();

        let info = table.get(RootName::System);
        assert_eq!(info.filesystem, Filesystem::Ext4);
        assert!(info.filesystem_options.starts_with("loop,"));
    }

    #[test]
    fn reassign_refuses_a_mounted_root() {
        let hal = FakeHal::new();
        let mut table = RootTable::with_defaults();
        hal.mark_mounted("/system");

        let err = table
            .reassign_device(
                &hal,
                RootName::System,
                PathBuf::from("/sdcard/os/system.img"),
                Filesystem::Ext4,
                "loop",
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::errors::RecoveryError>(),
            Some(crate::errors::RecoveryError::StillMounted(RootName::System))
        ));
    }
}
