//! In-place filesystem conversion: backup, format, restore.
//!
//! The most dangerous workflow in the environment. Once the format step
//! has started there is no way back: a failure from that point on leaves
//! the root without its previous contents and the pre-format backup is the
//! only recovery path. Nothing here attempts a rollback; partial-failure
//! states are reported exactly as they are so the operator can intervene.

use crate::arming::ArmToken;
use crate::artifact::{conversion_backup_artifact, timestamp_now, BackupArtifact};
use crate::backup::TAR_EXCLUDE_PATTERN;
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
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStep {
    SpaceCheck,
    MountSource,
    BackupInPlace,
    UnmountSource,
    Format,
    Recheck,
    RemountTarget,
    RestoreInPlace,
    Done,
}

impl fmt::Display for ConversionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversionStep::SpaceCheck => "space check",
            ConversionStep::MountSource => "mount",
            ConversionStep::BackupInPlace => "backup",
            ConversionStep::UnmountSource => "unmount",
            ConversionStep::Format => "format",
            ConversionStep::Recheck => "recheck",
            ConversionStep::RemountTarget => "remount",
            ConversionStep::RestoreInPlace => "restore",
            ConversionStep::Done => "done",
        };
        f.write_str(name)
    }
}

/// Record of one conversion attempt.
#[derive(Debug, Clone)]
pub struct ConversionRun {
    pub root: RootName,
    pub from: Filesystem,
    pub to: Filesystem,
    pub backup: Option<BackupArtifact>,
    pub step: ConversionStep,
}

pub struct FilesystemConverter<'a> {
    hal: &'a dyn RecoveryHal,
    config: &'a RecoveryConfig,
    reporter: &'a dyn Reporter,
    mounts: MountController<'a>,
    guard: SpaceGuard<'a>,
    supervisor: ProcessSupervisor<'a>,
    dry_run: bool,
}

impl<'a> FilesystemConverter<'a> {
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

    /// Convert `root` to `to` in place via backup, format and restore.
    ///
    /// CACHE skips the backup and restore steps; its contents are
    /// regenerated by the main system anyway.
    pub fn convert(
        &self,
        table: &mut RootTable,
        root: RootName,
        to: Filesystem,
        token: &ArmToken,
    ) -> Result<ConversionRun> {
        let from = table.get(root).filesystem.clone();
        let mut run = ConversionRun {
            root,
            from: from.clone(),
            to: to.clone(),
            backup: None,
            step: ConversionStep::SpaceCheck,
        };

        self.reporter
            .print(&format!("-- {from} to {to} on {root}"));

        // Nothing destructive has happened yet; any failure up to the
        // format step leaves the root exactly as it was.
        self.mounts.ensure_mounted(table, RootName::Sdcard)?;
        if !self.dry_run {
            fs::create_dir_all(&self.config.backup_dir).with_context(|| {
                format!("Can't create directory {}", self.config.backup_dir.display())
            })?;
        }
        self.guard.check_free(
            &self.config.backup_dir,
            self.config.thresholds.tar_backup_floor_mb,
        )?;

        let exempt = root == RootName::Cache;

        if !exempt {
            run.step = ConversionStep::MountSource;
            self.mounts.ensure_mounted(table, root)?;

            run.step = ConversionStep::BackupInPlace;
            let artifact =
                conversion_backup_artifact(&self.config.backup_dir, &timestamp_now(), root, &to);
            self.remove_stale(&artifact.path)?;
            self.reporter
                .print(&format!("Backing up to {}..", artifact.path.display()));

            let info = table.get(root);
            let mount_point = info
                .mount_point
                .as_ref()
                .ok_or(RecoveryError::NotMountable(root))?;
            let spec = CommandSpec::new("tar")
                .arg("-c")
                .arg(TAR_EXCLUDE_PATTERN)
                .arg("-f")
                .arg(artifact.path.display().to_string())
                .arg(mount_point.display().to_string());
            let outcome = self.supervisor.run(&spec, None, self.reporter);
            if !outcome.success() {
                self.reporter
                    .print(&format!("Backup failed ({outcome}). Conversion aborted."));
                return Err(self.failed(&run, ConversionStep::BackupInPlace));
            }
            run.backup = Some(artifact);
        }

        run.step = ConversionStep::UnmountSource;
        self.mounts.ensure_unmounted(table, root)?;

        run.step = ConversionStep::Format;
        // Metadata first; the recheck below resynchronises with whatever
        // actually ended up on disk.
        table.set_filesystem(root, to.clone());
        let format_result = format_root(
            self.hal,
            &self.supervisor,
            &self.mounts,
            table,
            root,
            token,
            self.reporter,
            self.dry_run,
        );

        // On-disk signatures are authoritative after a format attempt,
        // whether it worked or not.
        run.step = ConversionStep::Recheck;
        self.reporter.print("Checking new filesystem..");
        table.recheck(self.hal)?;

        if let Err(err) = format_result {
            self.reporter.print(&format!("Can't format {root}: {err}"));
            self.report_manual_recovery(&run);
            return Err(self.failed(&run, ConversionStep::Format));
        }

        run.step = ConversionStep::RemountTarget;
        if let Err(err) = self.mounts.ensure_mounted(table, root) {
            self.reporter
                .print(&format!("Can't remount {root}: {err}"));
            self.report_manual_recovery(&run);
            return Err(self.failed(&run, ConversionStep::RemountTarget));
        }

        if !exempt {
            run.step = ConversionStep::RestoreInPlace;
            let backup = run.backup.as_ref().expect("backup exists for non-cache roots");
            self.reporter.print("Restoring..");
            let spec = CommandSpec::new("tar")
                .arg("-x")
                .arg("-f")
                .arg(backup.path.display().to_string());
            let outcome = self.supervisor.run(&spec, Some(Path::new("/")), self.reporter);
            if !outcome.success() {
                // The root is correctly formatted but empty or partially
                // populated. That is not a success and must not read like
                // one.
                self.reporter.print(&format!(
                    "Restoring failed ({outcome}). {root} was formatted to {to} but its contents were not restored.",
                ));
                self.report_manual_recovery(&run);
                return Err(self.failed(&run, ConversionStep::RestoreInPlace));
            }
        }

        run.step = ConversionStep::Done;
        self.reporter.print("Conversion was successful.");
        Ok(run)
    }

    fn failed(&self, run: &ConversionRun, step: ConversionStep) -> anyhow::Error {
        RecoveryError::Conversion {
            root: run.root,
            step,
            backup: run.backup.as_ref().map(|artifact| artifact.path.clone()),
        }
        .into()
    }

    fn report_manual_recovery(&self, run: &ConversionRun) {
        match &run.backup {
            Some(artifact) => self.reporter.print(&format!(
                "Automatic recovery is not possible. Backup at {}.",
                artifact.path.display()
            )),
            None => self
                .reporter
                .print("Automatic recovery is not possible and no backup was taken."),
        }
    }

    // A conversion re-run would otherwise append to last time's snapshot.
    fn remove_stale(&self, path: &Path) -> Result<()> {
        if self.dry_run || !path.exists() {
            return Ok(());
        }
        fs::remove_file(path)
            .with_context(|| format!("Can't remove stale backup {}", path.display()))?;
        Ok(())
    }
}
