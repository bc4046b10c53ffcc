//! `/etc/fstab` rendering from the root table.

use crate::errors::Result;
use crate::roots::{RootName, RootTable};
use anyhow::Context;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

// BOOT is raw and EFS is deliberately kept out of reach of accidental
// mounts; neither gets an fstab line.
const FSTAB_ROOTS: [RootName; 5] = [
    RootName::Cache,
    RootName::Data,
    RootName::System,
    RootName::Sdcard,
    RootName::Sdext,
];

pub fn render_fstab(table: &RootTable) -> String {
    let mut out = String::new();
    for root in FSTAB_ROOTS {
        let info = table.get(root);
        let Some(mount_point) = &info.mount_point else {
            continue;
        };
        let options = if info.filesystem_options.is_empty() {
            "rw"
        } else {
            &info.filesystem_options
        };
        let _ = writeln!(
            out,
            "{} {} {} {}",
            info.device.display(),
            mount_point.display(),
            info.filesystem,
            options
        );
    }
    out
}

pub fn write_fstab(table: &RootTable, path: &Path) -> Result<()> {
    fs::write(path, render_fstab(table))
        .with_context(|| format!("Unable to write {}", path.display()))?;
    Ok(())
}
