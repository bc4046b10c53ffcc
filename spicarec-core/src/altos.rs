//! Alternate-OS image provisioning and activation.
//!
//! An alternate OS lives in loopback image files on the sdcard. SYSTEM and
//! DATA are pointed at those images instead of the physical partitions;
//! deactivation points them back. The boot list file records which OS
//! names have been provisioned.

use crate::arming::ArmToken;
use crate::config::RecoveryConfig;
use crate::errors::{RecoveryError, Result};
use crate::format::format_root;
use crate::mounts::MountController;
use crate::process::ProcessSupervisor;
use crate::report::Reporter;
use crate::roots::{Filesystem, RootName, RootTable};
use crate::space::SpaceGuard;
use anyhow::Context;
use spicarec_hal::{CommandSpec, RecoveryHal};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Mount options for image-backed roots; the loop flag must survive
/// rechecks, which is why these are set explicitly at reassignment.
pub const LOOP_IMAGE_OPTIONS: &str = "loop,nodev,nosuid,noatime,nodiratime,data=ordered";

/// Size of a freshly provisioned system or data image.
const IMAGE_SIZE_MB: u64 = 180;

pub struct AltOsProvisioner<'a> {
    hal: &'a dyn RecoveryHal,
    config: &'a RecoveryConfig,
    reporter: &'a dyn Reporter,
    mounts: MountController<'a>,
    guard: SpaceGuard<'a>,
    supervisor: ProcessSupervisor<'a>,
    dry_run: bool,
}

impl<'a> AltOsProvisioner<'a> {
    pub fn new(
        hal: &'a dyn RecoveryHal,
        config: &'a RecoveryConfig,
        reporter: &'a dyn Reporter,
        dry_run: bool,
    ) -> Self {
        Self {
            hal,
            config,
            reporter,
            mounts: MountController::new(hal, dry_run),
            guard: SpaceGuard::new(hal),
            supervisor: ProcessSupervisor::new(hal, config, dry_run),
            dry_run,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.supervisor = self.supervisor.with_poll_interval(poll_interval);
        self
    }

    /// Create loopback images for a new OS under `<sdcard>/<name>/`,
    /// unpack the system payload from `zip_path` into them and register
    /// the name in the boot list.
    pub fn provision(
        &self,
        table: &mut RootTable,
        name: &str,
        zip_path: &Path,
        token: &ArmToken,
    ) -> Result<()> {
        self.mounts.ensure_mounted(table, RootName::Sdcard)?;

        let sdcard = self.sdcard_mount_point(table)?;
        self.guard
            .check_free(&sdcard, self.config.thresholds.image_convert_floor_mb)?;

        let os_dir = sdcard.join(name);
        if !self.dry_run {
            std::fs::create_dir_all(&os_dir)
                .with_context(|| format!("Can't create directory {}", os_dir.display()))?;
        }

        let system_img = os_dir.join("system.img");
        let data_img = os_dir.join("data.img");

        self.reporter.print("Making system image..");
        self.make_image(&system_img)?;
        table.reassign_device(
            self.hal,
            RootName::System,
            system_img,
            Filesystem::Ext4,
            LOOP_IMAGE_OPTIONS,
        )?;
        self.reporter.print("Formatting system image..");
        self.format(table, RootName::System, token)?;

        // A data image from an earlier provisioning run is kept.
        if !data_img.exists() {
            self.reporter.print("Making data image..");
            self.make_image(&data_img)?;
            table.reassign_device(
                self.hal,
                RootName::Data,
                data_img,
                Filesystem::Ext4,
                LOOP_IMAGE_OPTIONS,
            )?;
            self.reporter.print("Formatting data image..");
            self.format(table, RootName::Data, token)?;
        }

        self.reporter.print("Setting up system..");
        self.mounts.ensure_mounted(table, RootName::System)?;
        let spec = CommandSpec::new("unzip")
            .arg("-o")
            .arg(zip_path.display().to_string())
            .arg("system/*")
            .arg("-d")
            .arg("/");
        self.supervisor.run_checked(&spec, None, self.reporter)?;

        self.register_in_boot_list(name)?;
        self.reporter
            .print(&format!("{name} provisioned. Reboot to use it."));
        Ok(())
    }

    /// Point SYSTEM and DATA at the images of a provisioned OS.
    pub fn activate(&self, table: &mut RootTable, name: &str) -> Result<()> {
        self.mounts.ensure_unmounted(table, RootName::System)?;
        self.mounts.ensure_unmounted(table, RootName::Data)?;
        self.mounts.ensure_mounted(table, RootName::Sdcard)?;

        let os_dir = self.sdcard_mount_point(table)?.join(name);
        table.reassign_device(
            self.hal,
            RootName::System,
            os_dir.join("system.img"),
            Filesystem::Ext4,
            LOOP_IMAGE_OPTIONS,
        )?;
        table.reassign_device(
            self.hal,
            RootName::Data,
            os_dir.join("data.img"),
            Filesystem::Ext4,
            LOOP_IMAGE_OPTIONS,
        )?;
        table.recheck(self.hal)?;
        self.reporter.print(&format!("{name} active."));
        Ok(())
    }

    /// Point SYSTEM and DATA back at the physical partitions.
    pub fn deactivate(&self, table: &mut RootTable) -> Result<()> {
        self.mounts.ensure_unmounted(table, RootName::System)?;
        self.mounts.ensure_unmounted(table, RootName::Data)?;

        let defaults = RootTable::with_defaults();
        for root in [RootName::System, RootName::Data] {
            let stock = defaults.get(root);
            table.reassign_device(
                self.hal,
                root,
                stock.device.clone(),
                Filesystem::Auto,
                "",
            )?;
        }
        // Pick the real filesystems back up from disk.
        table.recheck(self.hal)?;
        self.reporter.print("Internal OS active.");
        Ok(())
    }

    fn format(&self, table: &RootTable, root: RootName, token: &ArmToken) -> Result<()> {
        format_root(
            self.hal,
            &self.supervisor,
            &self.mounts,
            table,
            root,
            token,
            self.reporter,
            self.dry_run,
        )?;
        Ok(())
    }

    fn make_image(&self, path: &Path) -> Result<()> {
        let spec = CommandSpec::new("dd")
            .arg("if=/dev/zero")
            .arg(format!("of={}", path.display()))
            .arg("bs=1M")
            .arg(format!("count={IMAGE_SIZE_MB}"));
        self.supervisor.run_checked(&spec, None, self.reporter)
    }

    fn sdcard_mount_point(&self, table: &RootTable) -> Result<PathBuf> {
        table
            .get(RootName::Sdcard)
            .mount_point
            .clone()
            .ok_or_else(|| RecoveryError::NotMountable(RootName::Sdcard).into())
    }

    fn register_in_boot_list(&self, name: &str) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        let path = &self.config.boot_list_path;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Can't open boot list {}", path.display()))?;
        writeln!(file, "{name}").with_context(|| format!("Can't write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;
    use spicarec_hal::FakeHal;
    use tempfile::tempdir;

    struct Fixture {
        hal: FakeHal,
        config: RecoveryConfig,
        reporter: MemoryReporter,
        sdcard: PathBuf,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let config = RecoveryConfig {
                boot_list_path: dir.path().join(".bootlst"),
                ..Default::default()
            };
            let sdcard = dir.path().join("sdcard");
            std::fs::create_dir_all(&sdcard).unwrap();
            Self {
                hal: FakeHal::new(),
                config,
                reporter: MemoryReporter::new(),
                sdcard,
                _dir: dir,
            }
        }

        /// Root table whose sdcard mount point lives in the tempdir, so
        /// image and boot-list writes stay on disk we own.
        fn table(&self) -> RootTable {
            let mut table = RootTable::with_defaults();
            table.set_mount_point_for_tests(RootName::Sdcard, self.sdcard.clone());
            table
        }

        fn provisioner(&self) -> AltOsProvisioner<'_> {
            AltOsProvisioner::new(&self.hal, &self.config, &self.reporter, false)
                .with_poll_interval(Duration::from_millis(1))
        }
    }

    #[test]
    fn provision_builds_formats_and_unpacks() {
        let fx = Fixture::new();
        let mut table = fx.table();
        let token = ArmToken::try_new(true).unwrap();

        fx.provisioner()
            .provision(&mut table, "froyo", Path::new("/sdcard/froyo.zip"), &token)
            .unwrap();

        let programs = fx.hal.spawned_programs();
        // Two dd image creations, two ext4 formats, one unzip.
        assert_eq!(programs.iter().filter(|p| *p == "dd").count(), 2);
        assert_eq!(programs.iter().filter(|p| *p == "mkfs.ext4").count(), 2);
        assert!(programs.iter().any(|p| p == "unzip"));

        // SYSTEM now points at the image with loop options.
        let info = table.get(RootName::System);
        assert!(info.device.ends_with("froyo/system.img"));
        assert_eq!(info.filesystem, Filesystem::Ext4);
        assert!(info.filesystem_options.starts_with("loop,"));

        // The OS landed in the boot list.
        let list = std::fs::read_to_string(&fx.config.boot_list_path).unwrap();
        assert_eq!(list.trim(), "froyo");
    }

    #[test]
    fn provision_is_guarded_by_the_image_floor() {
        let fx = Fixture::new();
        let mut table = fx.table();
        let token = ArmToken::try_new(true).unwrap();
        fx.hal.set_usage_mb(fx.sdcard.clone(), 1000, 100); // < 400MB floor

        let err = fx
            .provisioner()
            .provision(&mut table, "froyo", Path::new("/sdcard/froyo.zip"), &token)
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RecoveryError>(),
            Some(RecoveryError::InsufficientSpace { .. })
        ));
        assert!(fx.hal.spawned_programs().is_empty());
    }

    #[test]
    fn activate_and_deactivate_swap_the_devices() {
        let fx = Fixture::new();
        let mut table = fx.table();
        fx.hal
            .set_fstype(fx.sdcard.join("froyo/system.img"), "ext4");
        fx.hal.set_fstype(fx.sdcard.join("froyo/data.img"), "ext4");
        fx.hal.set_fstype("/dev/stl6", "rfs");
        fx.hal.set_fstype("/dev/stl5", "rfs");

        fx.provisioner().activate(&mut table, "froyo").unwrap();
        let info = table.get(RootName::System);
        assert!(info.device.ends_with("froyo/system.img"));
        assert_eq!(info.filesystem, Filesystem::Ext4);
        assert!(info.filesystem_options.starts_with("loop,"));

        fx.provisioner().deactivate(&mut table).unwrap();
        let info = table.get(RootName::System);
        assert_eq!(info.device, PathBuf::from("/dev/stl6"));
        assert_eq!(info.filesystem, Filesystem::Rfs);
    }

    #[test]
    fn activate_refuses_while_system_is_wedged_mounted() {
        let fx = Fixture::new();
        let mut table = fx.table();
        fx.hal.mark_mounted("/system");
        fx.hal.fail_unmount("/system");

        let err = fx.provisioner().activate(&mut table, "froyo").unwrap_err();
        assert!(err.to_string().contains("SYSTEM"));
    }
}
