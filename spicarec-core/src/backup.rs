//! Whole-partition backup and restore.
//!
//! Tar backups capture the contents of mounted roots; image backups dd the
//! raw device while it is unmounted. Either way the flow is the same:
//! mount prerequisites, guard space, run exactly one child, verify its
//! exit. A failed tar run leaves the partial file on disk for the operator
//! to inspect; nothing is deleted behind their back.

use crate::arming::ArmToken;
use crate::artifact::{
    image_backup_artifact, parse_image_artifact, parse_tar_artifact, tar_backup_artifact,
    timestamp_now, BackupArtifact,
};
use crate::config::RecoveryConfig;
use crate::errors::{RecoveryError, Result};
use crate::format::format_root;
use crate::mounts::MountController;
use crate::process::ProcessSupervisor;
use crate::report::Reporter;
use crate::roots::{RootName, RootTable};
use crate::space::SpaceGuard;
use anyhow::Context;
use spicarec_hal::{CommandSpec, RecoveryHal};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Log files the stock filesystem rewrites constantly; backing them up
/// only produces archives that never verify.
pub const TAR_EXCLUDE_PATTERN: &str = "--exclude=*RFS_LOG.LO*";

/// Phases of one backup or restore run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    MountingPrereqs,
    Guarding,
    Running,
    Verifying,
    Committed,
    Failed,
}

#[derive(Debug)]
struct RunTracker {
    phase: RunPhase,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
        }
    }

    fn advance(&mut self, phase: RunPhase) {
        log::debug!("backup run: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }
}

pub struct BackupEngine<'a> {
    hal: &'a dyn RecoveryHal,
    config: &'a RecoveryConfig,
    reporter: &'a dyn Reporter,
    mounts: MountController<'a>,
    guard: SpaceGuard<'a>,
    supervisor: ProcessSupervisor<'a>,
    dry_run: bool,
}

impl<'a> BackupEngine<'a> {
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

    /// Tar up the contents of one or more roots into a single archive on
    /// the sdcard.
    pub fn tar_backup(&self, table: &RootTable, roots: &[RootName]) -> Result<BackupArtifact> {
        let mut run = RunTracker::new();

        run.advance(RunPhase::MountingPrereqs);
        self.mounts.ensure_mounted(table, RootName::Sdcard)?;
        self.create_dir(&self.config.backup_dir)?;
        for &root in roots {
            self.mounts.ensure_mounted(table, root)?;
        }

        run.advance(RunPhase::Guarding);
        let floor = if roots == [RootName::Efs] {
            self.config.thresholds.efs_backup_floor_mb
        } else {
            self.config.thresholds.tar_backup_floor_mb
        };
        self.guard.check_free(&self.config.backup_dir, floor)?;

        run.advance(RunPhase::Running);
        let artifact = tar_backup_artifact(&self.config.backup_dir, &timestamp_now(), roots);
        self.report_backup_start(table, roots, &artifact);

        let mut spec = CommandSpec::new("tar")
            .arg("-c")
            .arg(TAR_EXCLUDE_PATTERN)
            .arg("-f")
            .arg(artifact.path.display().to_string());
        for &root in roots {
            let info = table.get(root);
            let mount_point = info
                .mount_point
                .as_ref()
                .ok_or(RecoveryError::NotMountable(root))?;
            spec = spec.arg(mount_point.display().to_string());
        }

        let outcome = self.supervisor.run(&spec, None, self.reporter);

        run.advance(RunPhase::Verifying);
        if !outcome.success() {
            run.advance(RunPhase::Failed);
            self.reporter.print(&format!(
                "Backup failed ({outcome}). Partial file left at {} for inspection.",
                artifact.path.display()
            ));
            return Err(RecoveryError::Process {
                program: "tar".to_string(),
                outcome,
            }
            .into());
        }

        run.advance(RunPhase::Committed);
        self.reporter.print("Backup complete.");
        Ok(artifact)
    }

    /// Extract a tar backup over the roots named in its filename.
    pub fn tar_restore(&self, table: &RootTable, artifact_path: &Path) -> Result<()> {
        let artifact = parse_tar_artifact(artifact_path)?;
        let mut run = RunTracker::new();

        run.advance(RunPhase::MountingPrereqs);
        self.mounts.ensure_mounted(table, RootName::Sdcard)?;
        for &root in &artifact.source_roots {
            self.reporter.print(&format!("Mounting {root}"));
            self.mounts.ensure_mounted(table, root)?;
        }

        run.advance(RunPhase::Running);
        self.reporter.print("Restoring..");
        let spec = CommandSpec::new("tar")
            .arg("-x")
            .arg("-f")
            .arg(artifact.path.display().to_string());
        // Archive members carry absolute-rooted paths (/system, /data).
        let outcome = self.supervisor.run(&spec, Some(Path::new("/")), self.reporter);

        run.advance(RunPhase::Verifying);
        if !outcome.success() {
            run.advance(RunPhase::Failed);
            self.reporter.print(&format!(
                "Can't extract {} ({outcome}).",
                artifact.path.display()
            ));
            return Err(RecoveryError::Process {
                program: "tar".to_string(),
                outcome,
            }
            .into());
        }

        run.advance(RunPhase::Committed);
        self.reporter.print("Restore complete.");
        Ok(())
    }

    /// Restore, but format each target root first. Strictly more
    /// destructive than a plain restore, hence the separate armed entry
    /// point.
    pub fn tar_restore_with_format(
        &self,
        table: &RootTable,
        artifact_path: &Path,
        token: &ArmToken,
    ) -> Result<()> {
        let artifact = parse_tar_artifact(artifact_path)?;

        for &root in &artifact.source_roots {
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
        }

        self.tar_restore(table, artifact_path)
    }

    /// dd a root's raw device into an image file on the sdcard.
    pub fn image_backup(&self, table: &RootTable, root: RootName) -> Result<BackupArtifact> {
        let mut run = RunTracker::new();

        run.advance(RunPhase::MountingPrereqs);
        self.mounts.ensure_mounted(table, RootName::Sdcard)?;
        self.create_dir(&self.config.image_dir)?;

        // Estimate the artifact from the source's used space; the root has
        // to be mounted to observe it, and unmounted again before the dd.
        let used_mb = match &table.get(root).mount_point {
            Some(mount_point) => {
                self.mounts.ensure_mounted(table, root)?;
                let used_mb = self.guard.used_mb(mount_point)?;
                self.reporter.print(&format!("{root} used: {used_mb}MB"));
                used_mb
            }
            None => 0,
        };
        self.mounts.ensure_unmounted(table, root)?;

        run.advance(RunPhase::Guarding);
        self.guard.check_free(&self.config.image_dir, used_mb)?;

        run.advance(RunPhase::Running);
        let artifact = image_backup_artifact(&self.config.image_dir, &timestamp_now(), root);
        self.reporter.print(&format!(
            "Backing up {} to {}..",
            root,
            artifact.path.display()
        ));
        let info = table.get(root);
        let spec = CommandSpec::new("dd")
            .arg(format!("if={}", info.device.display()))
            .arg(format!("of={}", artifact.path.display()));
        let outcome = self.supervisor.run(&spec, None, self.reporter);

        run.advance(RunPhase::Verifying);
        if !outcome.success() {
            run.advance(RunPhase::Failed);
            self.reporter.print(&format!("Backup failed ({outcome})."));
            return Err(RecoveryError::Process {
                program: "dd".to_string(),
                outcome,
            }
            .into());
        }

        run.advance(RunPhase::Committed);
        self.reporter.print("Backup finished.");
        Ok(artifact)
    }

    /// dd an image backup back onto the raw device named in its filename.
    pub fn image_restore(
        &self,
        table: &RootTable,
        artifact_path: &Path,
        _token: &ArmToken,
    ) -> Result<()> {
        let artifact = parse_image_artifact(artifact_path)?;
        let root = artifact.source_roots[0];
        let mut run = RunTracker::new();

        run.advance(RunPhase::MountingPrereqs);
        self.mounts.ensure_mounted(table, RootName::Sdcard)?;
        self.mounts.ensure_unmounted(table, root)?;

        run.advance(RunPhase::Running);
        self.reporter.print(&format!("Restoring {root}.."));
        let info = table.get(root);
        let spec = CommandSpec::new("dd")
            .arg(format!("if={}", artifact.path.display()))
            .arg(format!("of={}", info.device.display()));
        let outcome = self.supervisor.run(&spec, None, self.reporter);

        run.advance(RunPhase::Verifying);
        if !outcome.success() {
            run.advance(RunPhase::Failed);
            self.reporter.print(&format!("Restoring failed ({outcome})."));
            return Err(RecoveryError::Process {
                program: "dd".to_string(),
                outcome,
            }
            .into());
        }

        run.advance(RunPhase::Committed);
        self.reporter.print("Restore finished.");
        Ok(())
    }

    fn create_dir(&self, dir: &Path) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        fs::create_dir_all(dir)
            .with_context(|| format!("Can't create directory {}", dir.display()))?;
        Ok(())
    }

    fn report_backup_start(
        &self,
        table: &RootTable,
        roots: &[RootName],
        artifact: &BackupArtifact,
    ) {
        let sources = roots
            .iter()
            .map(|&root| {
                table
                    .get(root)
                    .mount_point
                    .as_ref()
                    .map(|mp| mp.display().to_string())
                    .unwrap_or_else(|| root.to_string())
            })
            .collect::<Vec<_>>()
            .join(" ");
        self.reporter.print(&format!(
            "Backing up {sources} to {}..",
            artifact.path.display()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;
    use spicarec_hal::{ChildStatus, FakeHal, Operation};
    use tempfile::tempdir;

    struct Fixture {
        hal: FakeHal,
        config: RecoveryConfig,
        reporter: MemoryReporter,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let config = RecoveryConfig {
                backup_dir: dir.path().join("samdroid"),
                image_dir: dir.path().join("samdroid/image"),
                ..Default::default()
            };
            Self {
                hal: FakeHal::new(),
                config,
                reporter: MemoryReporter::new(),
                _dir: dir,
            }
        }

        fn engine(&self) -> BackupEngine<'_> {
            BackupEngine::new(&self.hal, &self.config, &self.reporter, false)
                .with_poll_interval(Duration::from_millis(1))
        }
    }

    #[test]
    fn tar_backup_mounts_guards_and_runs_tar() {
        let fx = Fixture::new();
        let table = RootTable::with_defaults();

        let artifact = fx
            .engine()
            .tar_backup(&table, &[RootName::System])
            .unwrap();

        assert!(artifact
            .path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("_Sys.tar"));
        assert_eq!(artifact.source_roots, vec![RootName::System]);

        // sdcard and the source were mounted before tar ran.
        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Mount { target, .. } if target.to_str() == Some("/sdcard")
        )));
        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Spawn { program, args, .. }
                if program == "tar"
                    && args.first().map(String::as_str) == Some("-c")
                    && args.contains(&TAR_EXCLUDE_PATTERN.to_string())
                    && args.last().map(String::as_str) == Some("/system")
        )));
        assert!(fx.reporter.contains("Backup complete."));
    }

    #[test]
    fn tar_backup_failure_reports_the_partial_file() {
        let fx = Fixture::new();
        fx.hal.plan_command("tar", ChildStatus::Exited(1));
        let table = RootTable::with_defaults();

        let err = fx
            .engine()
            .tar_backup(&table, &[RootName::Data])
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RecoveryError>(),
            Some(RecoveryError::Process { .. })
        ));
        assert!(fx.reporter.contains("Partial file left at"));
    }

    #[test]
    fn efs_only_backup_uses_the_smaller_floor() {
        let fx = Fixture::new();
        // 50MB free: enough for the 20MB EFS floor, not the 220MB default.
        fx.hal
            .set_usage_mb(fx.config.backup_dir.clone(), 1000, 50);
        let table = RootTable::with_defaults();

        fx.engine().tar_backup(&table, &[RootName::Efs]).unwrap();
        let err = fx
            .engine()
            .tar_backup(&table, &[RootName::System])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecoveryError>(),
            Some(RecoveryError::InsufficientSpace { .. })
        ));
    }

    #[test]
    fn tar_restore_mounts_only_the_named_roots() {
        // E2E: Backup_20230101-120000_Sys.tar restores SYSTEM alone.
        let fx = Fixture::new();
        let table = RootTable::with_defaults();
        let artifact = fx.config.backup_dir.join("Backup_20230101-120000_Sys.tar");

        fx.engine().tar_restore(&table, &artifact).unwrap();

        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Mount { target, .. } if target.to_str() == Some("/system")
        )));
        assert!(!fx.hal.has_operation(|op| matches!(
            op,
            Operation::Mount { target, .. } if target.to_str() == Some("/data")
        )));
        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Spawn { program, args, cwd }
                if program == "tar"
                    && args.first().map(String::as_str) == Some("-x")
                    && cwd.as_deref() == Some(Path::new("/"))
        )));
        assert!(fx.reporter.contains("Restore complete."));
    }

    #[test]
    fn tar_restore_rejects_foreign_names() {
        let fx = Fixture::new();
        let table = RootTable::with_defaults();

        let err = fx
            .engine()
            .tar_restore(&table, Path::new("/sdcard/not-a-backup.tar"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RecoveryError>(),
            Some(RecoveryError::BadArtifactName(_))
        ));
        assert!(fx.hal.spawned_programs().is_empty());
    }

    #[test]
    fn restore_with_format_formats_before_extracting() {
        let fx = Fixture::new();
        let table = RootTable::with_defaults();
        let token = ArmToken::try_new(true).unwrap();
        let artifact = fx.config.backup_dir.join("Backup_20230101-120000_Sys.tar");

        fx.engine()
            .tar_restore_with_format(&table, &artifact, &token)
            .unwrap();

        let programs = fx.hal.spawned_programs();
        let format_at = programs.iter().position(|p| p == "fat.format").unwrap();
        let tar_at = programs.iter().position(|p| p == "tar").unwrap();
        assert!(format_at < tar_at);
    }

    #[test]
    fn image_backup_guards_against_destination_space() {
        // E2E D: SDEXT uses 50MB, destination has 40MB free -> no dd.
        let fx = Fixture::new();
        fx.hal.set_usage_mb("/sd-ext", 60, 10); // 50MB used
        fx.hal
            .set_usage_mb(fx.config.image_dir.clone(), 1000, 40);
        let table = RootTable::with_defaults();

        let err = fx
            .engine()
            .image_backup(&table, RootName::Sdext)
            .unwrap_err();

        match err.downcast_ref::<RecoveryError>() {
            Some(RecoveryError::InsufficientSpace { available_mb, .. }) => {
                assert_eq!(*available_mb, 40)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(fx.hal.spawned_programs().is_empty());
    }

    #[test]
    fn image_backup_dds_the_unmounted_device() {
        let fx = Fixture::new();
        let table = RootTable::with_defaults();

        let artifact = fx.engine().image_backup(&table, RootName::Data).unwrap();

        assert!(artifact
            .path
            .file_name()
            .unwrap()
            .to_str()
            .unwrap()
            .ends_with("_DATA.img"));
        // The source was unmounted again before the dd.
        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Unmount { target } if target.to_str() == Some("/data")
        )));
        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Spawn { program, args, .. }
                if program == "dd" && args.first().map(|a| a.starts_with("if=/dev/stl5")) == Some(true)
        )));
    }

    #[test]
    fn image_restore_targets_the_root_from_the_filename() {
        let fx = Fixture::new();
        let table = RootTable::with_defaults();
        let token = ArmToken::try_new(true).unwrap();
        fx.hal.mark_mounted("/data");
        let artifact = fx.config.image_dir.join("IMG_20230101-120000_DATA.img");

        fx.engine()
            .image_restore(&table, &artifact, &token)
            .unwrap();

        // The mounted target was unmounted before the dd onto its device.
        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Unmount { target } if target.to_str() == Some("/data")
        )));
        assert!(fx.hal.has_operation(|op| matches!(
            op,
            Operation::Spawn { program, args, .. }
                if program == "dd" && args.last().map(|a| a.ends_with("of=/dev/stl5")) == Some(true)
        )));
        assert!(fx.reporter.contains("Restore finished."));
    }
}
