//! Hardware abstraction layer for the recovery engine.
//!
//! Everything that touches the machine — mounts, statfs, filesystem
//! probing, child processes — goes through the traits in [`hal`] so the
//! orchestration crate can be tested against a recording fake.

mod error;
pub mod hal;
pub mod procfs;

pub use error::{HalError, HalResult};
pub use hal::{
    ChildHandle, ChildStatus, CommandSpec, FakeHal, FsUsage, LinuxHal, MountOps, MountOptions,
    NullChild, Operation, ProbeOps, ProcessOps, RecoveryHal, StatfsOps,
};
