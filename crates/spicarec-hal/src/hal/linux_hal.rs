//! Linux HAL implementation using real system calls.

use super::{
    ChildHandle, ChildStatus, CommandSpec, FsUsage, MountOps, MountOptions, NullChild, ProbeOps,
    ProcessOps, StatfsOps,
};
use crate::{HalError, HalResult};
use std::fs;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const SHELL_TIMEOUT: Duration = Duration::from_secs(10 * 60);

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            use std::io::Read;
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            use std::io::Read;
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DeviceBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

impl MountOps for LinuxHal {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()> {
        if dry_run {
            log::info!(
                "DRY RUN: mount {} -> {}",
                device.display(),
                target.display()
            );
            return Ok(());
        }

        let flags = nix::mount::MsFlags::empty();
        let data = options.options.as_deref();

        nix::mount::mount(Some(device), target, fstype, flags, data).map_err(map_nix_err)?;

        Ok(())
    }

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: unmount {}", target.display());
            return Ok(());
        }

        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(map_nix_err)?;

        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let content = fs::read_to_string("/proc/self/mountinfo")?;
        let entries = crate::procfs::mountinfo::parse_mountinfo(&content);
        Ok(crate::procfs::mountinfo::is_mount_point(path, &entries))
    }
}

impl StatfsOps for LinuxHal {
    fn usage(&self, path: &Path) -> HalResult<FsUsage> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(map_nix_err)?;
        Ok(FsUsage {
            block_size: stat.block_size() as u64,
            blocks: stat.blocks() as u64,
            blocks_available: stat.blocks_available() as u64,
        })
    }
}

impl ProbeOps for LinuxHal {
    fn device_present(&self, device: &Path) -> HalResult<bool> {
        Ok(device.exists())
    }

    fn probe_filesystem(&self, device: &Path) -> HalResult<Option<String>> {
        let mut cmd = Command::new("blkid");
        cmd.args(["-s", "TYPE", "-o", "value"]).arg(device);
        let output = output_with_timeout("blkid", &mut cmd, PROBE_TIMEOUT)?;

        // blkid exits 2 when the device carries no recognisable signature.
        if !output.status.success() {
            return Ok(None);
        }

        let fstype = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!fstype.is_empty()).then_some(fstype))
    }
}

#[derive(Debug)]
struct LinuxChild {
    child: Child,
}

impl ChildHandle for LinuxChild {
    fn try_wait(&mut self) -> HalResult<Option<ChildStatus>> {
        match self.child.try_wait().map_err(HalError::Io)? {
            None => Ok(None),
            Some(status) => match status.code() {
                Some(code) => Ok(Some(ChildStatus::Exited(code))),
                None => Ok(Some(ChildStatus::Signaled(status.signal().unwrap_or(0)))),
            },
        }
    }

    fn kill(&mut self) -> HalResult<()> {
        self.child.kill().map_err(HalError::Io)?;
        let _ = self.child.wait();
        Ok(())
    }
}

impl ProcessOps for LinuxHal {
    fn spawn(
        &self,
        spec: &CommandSpec,
        cwd: Option<&Path>,
        dry_run: bool,
    ) -> HalResult<Box<dyn ChildHandle>> {
        if dry_run {
            log::info!("DRY RUN: {} {}", spec.program, spec.args.join(" "));
            return Ok(Box::new(NullChild));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        // Never let a child hang waiting for input.
        cmd.stdin(Stdio::null());

        let child = cmd
            .spawn()
            .map_err(|e| map_command_err(&spec.program, e))?;
        Ok(Box::new(LinuxChild { child }))
    }

    fn shell_status(&self, command: &str, dry_run: bool) -> HalResult<()> {
        if dry_run {
            log::info!("DRY RUN: sh -c {command}");
            return Ok(());
        }

        let mut cmd = Command::new("/bin/sh");
        cmd.args(["-c", command]);
        let output = output_with_timeout("sh", &mut cmd, SHELL_TIMEOUT)?;
        if !output.status.success() {
            return Err(output_failed("sh", &output));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn usage_reports_nonzero_block_size() {
        let dir = tempdir().unwrap();
        let hal = LinuxHal::new();
        let usage = hal.usage(dir.path()).unwrap();
        assert!(usage.block_size > 0);
    }

    #[test]
    fn device_present_follows_path_existence() {
        let dir = tempdir().unwrap();
        let hal = LinuxHal::new();
        let file = dir.path().join("backing.img");
        assert!(!hal.device_present(&file).unwrap());
        std::fs::write(&file, b"x").unwrap();
        assert!(hal.device_present(&file).unwrap());
    }

    #[test]
    fn spawn_classifies_exit_codes() {
        let hal = LinuxHal::new();
        let spec = CommandSpec::new("false");
        let mut child = hal.spawn(&spec, None, false).unwrap();
        let status = loop {
            if let Some(status) = child.try_wait().unwrap() {
                break status;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(status, ChildStatus::Exited(1));
    }

    #[test]
    fn spawn_reports_missing_program() {
        let hal = LinuxHal::new();
        let spec = CommandSpec::new("definitely-not-a-real-binary");
        let err = hal.spawn(&spec, None, false).unwrap_err();
        assert!(matches!(err, HalError::CommandNotFound(_)));
    }

    #[test]
    fn dry_run_spawn_succeeds_immediately() {
        let hal = LinuxHal::new();
        let spec = CommandSpec::new("mkfs.ext4").arg("/dev/null");
        let mut child = hal.spawn(&spec, None, true).unwrap();
        assert_eq!(child.try_wait().unwrap(), Some(ChildStatus::Exited(0)));
    }
}
