//! HAL trait definitions and implementations.

mod fake_hal;
mod linux_hal;
mod mount_ops;
mod probe_ops;
mod process_ops;
mod statfs_ops;

pub use fake_hal::{FakeHal, Operation};
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use probe_ops::ProbeOps;
pub use process_ops::{ChildHandle, ChildStatus, CommandSpec, NullChild, ProcessOps};
pub use statfs_ops::{FsUsage, StatfsOps};

/// The full set of world-touching operations the recovery engine needs.
pub trait RecoveryHal: MountOps + StatfsOps + ProbeOps + ProcessOps {}

impl<T: MountOps + StatfsOps + ProbeOps + ProcessOps> RecoveryHal for T {}
