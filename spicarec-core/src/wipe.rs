//! Wipe operations: factory reset, cache wipe, dalvik-cache wipe.
//!
//! Wiping a root is a format with its current filesystem; the dalvik-cache
//! wipe deletes one directory tree inside a mounted DATA instead.

use crate::arming::ArmToken;
use crate::config::RecoveryConfig;
use crate::errors::Result;
use crate::format::format_root;
use crate::mounts::MountController;
use crate::process::ProcessSupervisor;
use crate::report::Reporter;
use crate::roots::{RootName, RootTable};
use spicarec_hal::{CommandSpec, RecoveryHal};
use std::time::Duration;

pub struct WipeController<'a> {
    hal: &'a dyn RecoveryHal,
    reporter: &'a dyn Reporter,
    mounts: MountController<'a>,
    supervisor: ProcessSupervisor<'a>,
    dry_run: bool,
}

impl<'a> WipeController<'a> {
    pub fn new(
        hal: &'a dyn RecoveryHal,
        config: &'a RecoveryConfig,
        reporter: &'a dyn Reporter,
        dry_run: bool,
    ) -> Self {
        Self {
            hal,
            reporter,
            mounts: MountController::new(hal, dry_run),
            supervisor: ProcessSupervisor::new(hal, config, dry_run),
            dry_run,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.supervisor = self.supervisor.with_poll_interval(poll_interval);
        self
    }

    /// Factory reset: erase DATA, then CACHE.
    pub fn wipe_data(&self, table: &RootTable, token: &ArmToken) -> Result<()> {
        self.reporter.print("Wiping data..");
        self.erase(table, RootName::Data, token)?;
        self.erase(table, RootName::Cache, token)?;
        self.reporter.print("Data wipe complete.");
        Ok(())
    }

    pub fn wipe_cache(&self, table: &RootTable, token: &ArmToken) -> Result<()> {
        self.reporter.print("Wiping cache..");
        self.erase(table, RootName::Cache, token)?;
        self.reporter.print("Cache wipe complete.");
        Ok(())
    }

    /// Delete the dalvik-cache tree inside DATA without touching the rest
    /// of the partition.
    pub fn wipe_dalvik_cache(&self, table: &RootTable, _token: &ArmToken) -> Result<()> {
        self.mounts.ensure_mounted(table, RootName::Data)?;

        let info = table.get(RootName::Data);
        let mount_point = info.mount_point.as_ref().expect("DATA has a mount point");
        let target = mount_point.join("dalvik-cache");

        self.reporter.print("Wiping dalvik-cache..");
        let spec = CommandSpec::new("rm")
            .arg("-r")
            .arg(target.display().to_string());
        self.supervisor.run_checked(&spec, None, self.reporter)?;
        self.reporter.print("Dalvik-cache wipe complete.");
        Ok(())
    }

    fn erase(&self, table: &RootTable, root: RootName, token: &ArmToken) -> Result<()> {
        self.mounts.ensure_unmounted(table, root)?;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;
    use spicarec_hal::{FakeHal, Operation};

    struct Fixture {
        hal: FakeHal,
        config: RecoveryConfig,
        reporter: MemoryReporter,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                hal: FakeHal::new(),
                config: RecoveryConfig::default(),
                reporter: MemoryReporter::new(),
            }
        }

        fn wiper(&self) -> WipeController<'_> {
            WipeController::new(&self.hal, &self.config, &self.reporter, false)
                .with_poll_interval(Duration::from_millis(1))
        }
    }

    #[test]
    fn factory_reset_erases_data_then_cache() {
        let fx = Fixture::new();
        let table = RootTable::with_defaults();
        let token = ArmToken::try_new(true).unwrap();

        fx.wiper().wipe_data(&table, &token).unwrap();

        // Both stock roots were reformatted, DATA first.
        let formats: Vec<_> = fx
            .hal
            .operations()
            .iter()
            .filter_map(|op| match op {
                Operation::Spawn { program, args, .. } if program == "fat.format" => {
                    args.last().cloned()
                }
                _ => None,
            })
            .collect();
        assert_eq!(formats, ["/dev/stl5", "/dev/stl7"]);
        assert!(fx.reporter.contains("Data wipe complete."));
    }

    #[test]
    fn mounted_data_is_unmounted_before_the_erase() {
        let fx = Fixture::new();
        let table = RootTable::with_defaults();
        let token = ArmToken::try_new(true).unwrap();
        fx.hal.mark_mounted("/data");

        fx.wiper().wipe_data(&table, &token).unwrap();

        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Unmount { target } if target.to_str() == Some("/data")
        )));
    }

    #[test]
    fn dalvik_wipe_removes_one_tree_inside_data() {
        let fx = Fixture::new();
        let table = RootTable::with_defaults();
        let token = ArmToken::try_new(true).unwrap();

        fx.wiper().wipe_dalvik_cache(&table, &token).unwrap();

        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Mount { target, .. } if target.to_str() == Some("/data")
        )));
        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Spawn { program, args, .. }
                if program == "rm" && args.last().map(String::as_str) == Some("/data/dalvik-cache")
        )));
        // The partition itself was not reformatted.
        assert!(!fx.hal.spawned_programs().iter().any(|p| p == "fat.format"));
    }
}
