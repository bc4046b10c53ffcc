//! CLI argument parsing.
//!
//! The on-device menu shell drives the same engine interactively; these
//! subcommands exist for scripting and for driving operations over adb.

use clap::{Parser, Subcommand};
use spicarec_core::roots::{Filesystem, RootName};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "spicarec")]
#[command(about = "Partition backup, restore and conversion for the recovery environment")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log every operation without touching the device
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Configuration file overriding the built-in policy constants
    #[arg(long, default_value = spicarec_core::config::DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,
}

#[derive(Subcommand)]
pub enum Command {
    /// Re-probe all partitions and print the resulting root table
    Recheck,

    /// Render /etc/fstab from the current root table
    Fstab {
        /// Print to stdout instead of writing the file
        #[arg(long)]
        print: bool,
    },

    /// Tar up the contents of one or more roots onto the sdcard
    Backup {
        /// Roots to capture (e.g. SYSTEM DATA)
        #[arg(required = true)]
        roots: Vec<RootName>,
    },

    /// Extract a tar backup over the roots named in its filename
    Restore {
        artifact: PathBuf,

        /// Format each target root before extracting (destructive)
        #[arg(long)]
        format: bool,

        /// Confirm the destructive format variant
        #[arg(long)]
        yes_i_know: bool,
    },

    /// dd a root's raw device into an image file on the sdcard
    ImageBackup { root: RootName },

    /// dd an image backup back onto its device (destructive)
    ImageRestore {
        artifact: PathBuf,

        /// Confirm the destructive operation
        #[arg(long)]
        yes_i_know: bool,
    },

    /// Convert a root to another filesystem via backup, format, restore
    Convert {
        root: RootName,

        /// Target filesystem: rfs, ext2 or ext4
        to: Filesystem,

        /// Confirm the destructive operation
        #[arg(long)]
        yes_i_know: bool,
    },

    /// Wipe disposable state (destructive)
    Wipe {
        #[command(subcommand)]
        target: WipeTarget,
    },

    /// Provision or select an alternate OS in loopback images
    AltOs {
        #[command(subcommand)]
        action: AltOsAction,
    },
}

#[derive(Subcommand)]
pub enum WipeTarget {
    /// Factory reset: erase DATA, then CACHE
    Data {
        #[arg(long)]
        yes_i_know: bool,
    },
    /// Erase CACHE only
    Cache {
        #[arg(long)]
        yes_i_know: bool,
    },
    /// Delete the dalvik-cache tree inside DATA
    DalvikCache {
        #[arg(long)]
        yes_i_know: bool,
    },
}

#[derive(Subcommand)]
pub enum AltOsAction {
    /// Create images for a new OS from a zip payload
    Provision {
        name: String,
        zip: PathBuf,
        #[arg(long)]
        yes_i_know: bool,
    },
    /// Point SYSTEM and DATA at a provisioned OS's images
    Activate { name: String },
    /// Point SYSTEM and DATA back at the physical partitions
    Deactivate,
}
