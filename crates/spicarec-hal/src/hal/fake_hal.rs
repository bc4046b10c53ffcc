//! Fake HAL implementation for testing.
//!
//! Records every operation without executing it, so orchestration flows can
//! be asserted on in CI without root privileges or real block devices.

use super::{
    ChildHandle, ChildStatus, CommandSpec, FsUsage, MountOps, MountOptions, NullChild, ProbeOps,
    ProcessOps, StatfsOps,
};
use crate::{HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const MIB: u64 = 1024 * 1024;

/// Operation records for verification in tests.
#[derive(Debug, Clone)]
pub enum Operation {
    Mount {
        device: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
    },
    Unmount {
        target: PathBuf,
    },
    Spawn {
        program: String,
        args: Vec<String>,
        cwd: Option<PathBuf>,
    },
    Shell {
        command: String,
    },
    Probe {
        device: PathBuf,
    },
}

#[derive(Debug, Clone)]
enum CommandPlan {
    Status(ChildStatus),
    SpawnError,
}

#[derive(Debug, Default)]
struct FakeHalState {
    operations: Vec<Operation>,
    mounted_paths: HashSet<PathBuf>,
    failing_mounts: HashSet<PathBuf>,
    failing_unmounts: HashSet<PathBuf>,
    usage: HashMap<PathBuf, FsUsage>,
    fs_types: HashMap<PathBuf, String>,
    absent_devices: HashSet<PathBuf>,
    command_plans: HashMap<String, CommandPlan>,
    polls_before_exit: u32,
}

/// Fake HAL that records operations instead of executing them.
///
/// Children exit according to [`FakeHal::plan_command`] (clean exit by
/// default). Successful `mkfs.*` / `fat.format` spawns update the simulated
/// on-disk signature so recheck flows observe the new filesystem.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    /// Programs spawned so far, in order.
    pub fn spawned_programs(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter_map(|op| match op {
                Operation::Spawn { program, .. } => Some(program.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.operations.clear();
        state.mounted_paths.clear();
    }

    pub fn mark_mounted(&self, target: impl Into<PathBuf>) {
        self.state.lock().unwrap().mounted_paths.insert(target.into());
    }

    pub fn fail_mount(&self, target: impl Into<PathBuf>) {
        self.state.lock().unwrap().failing_mounts.insert(target.into());
    }

    pub fn fail_unmount(&self, target: impl Into<PathBuf>) {
        self.state
            .lock()
            .unwrap()
            .failing_unmounts
            .insert(target.into());
    }

    /// Set total/free space for the filesystem at `path` (1 MiB blocks).
    pub fn set_usage_mb(&self, path: impl Into<PathBuf>, total_mb: u64, free_mb: u64) {
        self.state.lock().unwrap().usage.insert(
            path.into(),
            FsUsage {
                block_size: MIB,
                blocks: total_mb,
                blocks_available: free_mb,
            },
        );
    }

    /// Set the simulated on-disk filesystem signature for a device.
    pub fn set_fstype(&self, device: impl Into<PathBuf>, fstype: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .fs_types
            .insert(device.into(), fstype.into());
    }

    pub fn set_device_absent(&self, device: impl Into<PathBuf>) {
        self.state
            .lock()
            .unwrap()
            .absent_devices
            .insert(device.into());
    }

    /// Make spawns of `program` report the given exit state. The key may
    /// also be `"program first-arg"` to target one mode of a tool (e.g.
    /// `"tar -x"` without affecting `tar -c`).
    pub fn plan_command(&self, program: impl Into<String>, status: ChildStatus) {
        self.state
            .lock()
            .unwrap()
            .command_plans
            .insert(program.into(), CommandPlan::Status(status));
    }

    /// Make spawns of `program` fail as if the binary were missing.
    pub fn fail_spawn(&self, program: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .command_plans
            .insert(program.into(), CommandPlan::SpawnError);
    }

    /// Children report "still running" for this many polls before exiting.
    pub fn set_polls_before_exit(&self, polls: u32) {
        self.state.lock().unwrap().polls_before_exit = polls;
    }

    fn record(&self, op: Operation) {
        self.state.lock().unwrap().operations.push(op);
    }

    // A successful format run changes the signature the next probe sees.
    fn apply_format_side_effect(&self, spec: &CommandSpec) {
        let new_type = match spec.program.as_str() {
            "fat.format" => Some("rfs"),
            program => program.strip_prefix("mkfs."),
        };
        let (Some(new_type), Some(device)) = (new_type, spec.args.last()) else {
            return;
        };
        self.state
            .lock()
            .unwrap()
            .fs_types
            .insert(PathBuf::from(device), new_type.to_string());
    }
}

#[derive(Debug)]
struct FakeChild {
    status: ChildStatus,
    polls_remaining: u32,
}

impl ChildHandle for FakeChild {
    fn try_wait(&mut self) -> HalResult<Option<ChildStatus>> {
        if self.polls_remaining > 0 {
            self.polls_remaining -= 1;
            return Ok(None);
        }
        Ok(Some(self.status))
    }

    fn kill(&mut self) -> HalResult<()> {
        self.polls_remaining = 0;
        self.status = ChildStatus::Signaled(9);
        Ok(())
    }
}

impl MountOps for FakeHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        _options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "FAKE HAL DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }

        if self.state.lock().unwrap().failing_mounts.contains(target) {
            return Err(HalError::DeviceBusy);
        }

        self.record(Operation::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fstype: fstype.map(String::from),
        });
        self.state
            .lock()
            .unwrap()
            .mounted_paths
            .insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: unmount {}", target.display());
            return Ok(());
        }

        if self.state.lock().unwrap().failing_unmounts.contains(target) {
            return Err(HalError::DeviceBusy);
        }

        self.record(Operation::Unmount {
            target: target.to_path_buf(),
        });
        self.state.lock().unwrap().mounted_paths.remove(target);
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        Ok(self.state.lock().unwrap().mounted_paths.contains(path))
    }
}

impl StatfsOps for FakeHal {
    fn usage(&self, path: &Path) -> HalResult<FsUsage> {
        let state = self.state.lock().unwrap();
        // Exact path first, then ancestors, mirroring "filesystem containing
        // path" semantics.
        let mut probe = Some(path);
        while let Some(p) = probe {
            if let Some(usage) = state.usage.get(p) {
                return Ok(*usage);
            }
            probe = p.parent();
        }
        // Default: a comfortably roomy 4 GiB filesystem.
        Ok(FsUsage {
            block_size: MIB,
            blocks: 4096,
            blocks_available: 2048,
        })
    }
}

impl ProbeOps for FakeHal {
    fn device_present(&self, device: &Path) -> HalResult<bool> {
        Ok(!self.state.lock().unwrap().absent_devices.contains(device))
    }

    fn probe_filesystem(&self, device: &Path) -> HalResult<Option<String>> {
        self.record(Operation::Probe {
            device: device.to_path_buf(),
        });
        let state = self.state.lock().unwrap();
        if state.absent_devices.contains(device) {
            return Ok(None);
        }
        Ok(state.fs_types.get(device).cloned())
    }
}

impl ProcessOps for FakeHal {
    fn spawn(
        &self,
        spec: &CommandSpec,
        cwd: Option<&Path>,
        dry_run: bool,
    ) -> HalResult<Box<dyn ChildHandle>> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: {} {}", spec.program, spec.args.join(" "));
            return Ok(Box::new(NullChild));
        }

        self.record(Operation::Spawn {
            program: spec.program.clone(),
            args: spec.args.clone(),
            cwd: cwd.map(Path::to_path_buf),
        });

        let (plan, polls) = {
            let state = self.state.lock().unwrap();
            let keyed = spec
                .args
                .first()
                .map(|arg| format!("{} {arg}", spec.program));
            let plan = keyed
                .and_then(|key| state.command_plans.get(&key).cloned())
                .or_else(|| state.command_plans.get(&spec.program).cloned());
            (plan, state.polls_before_exit)
        };

        let status = match plan {
            Some(CommandPlan::SpawnError) => {
                return Err(HalError::CommandNotFound(spec.program.clone()));
            }
            Some(CommandPlan::Status(status)) => status,
            None => ChildStatus::Exited(0),
        };

        if status == ChildStatus::Exited(0) {
            self.apply_format_side_effect(spec);
        }

        Ok(Box::new(FakeChild {
            status,
            polls_remaining: polls,
        }))
    }

    fn shell_status(&self, command: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("FAKE HAL DRY RUN: sh -c {command}");
            return Ok(());
        }
        self.record(Operation::Shell {
            command: command.to_string(),
        });
        Ok(())
    }
}
