//! Recovery orchestration core.
//!
//! `spicarec-core` models the device's logical storage roots and drives
//! the destructive operations of the recovery environment — format,
//! backup, restore, filesystem conversion — as supervised child processes.
//! Everything world-touching goes through `spicarec-hal`; the menu shell
//! and CLI sit on top of this crate.

pub mod altos;
pub mod arming;
pub mod artifact;
pub mod backup;
pub mod config;
pub mod convert;
pub mod errors;
pub mod format;
pub mod fstab;
pub mod logging;
pub mod mounts;
pub mod process;
pub mod report;
pub mod roots;
pub mod space;
pub mod wipe;
