//! `/proc/self/mountinfo` parsing.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
}

/// Extract the mount point of each mountinfo line. Malformed lines are
/// skipped.
pub fn parse_mountinfo(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut halves = line.split(" - ");
            let pre = halves.next()?;
            halves.next()?;

            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mount_point = unescape_mount_path(pre_fields[4]);

            Some(MountEntry {
                mount_point: PathBuf::from(mount_point),
            })
        })
        .collect()
}

pub fn is_mount_point(path: &Path, entries: &[MountEntry]) -> bool {
    let target = normalize(path);
    entries
        .iter()
        .any(|entry| normalize(&entry.mount_point) == target)
}

fn normalize(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}

// mountinfo escapes space, tab, newline and backslash as octal sequences.
fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}
