//! Backup artifact naming and parsing.
//!
//! There is no separate backup catalogue: the filename is the database.
//! Root labels and the creation timestamp are embedded in the name and
//! parsed back out at restore time. All of that grammar lives here so a
//! real index could be added later without touching the engines.
//!
//! Timestamps have one-second granularity; two backups started within the
//! same second produce the same name and the second overwrites the first.
//! Known limitation, kept for compatibility.

use crate::errors::{RecoveryError, Result};
use crate::roots::{Filesystem, RootName};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    /// Roots captured in this artifact. One for images, one or more for
    /// tars.
    pub source_roots: Vec<RootName>,
    /// `%Y%m%d-%H%M%S`; lexicographic order is chronological order.
    pub created_at: String,
}

pub fn timestamp_now() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// `Backup_<ts>_<Label>[_<Label>...].tar`
pub fn tar_backup_artifact(dir: &Path, stamp: &str, roots: &[RootName]) -> BackupArtifact {
    let labels = roots
        .iter()
        .map(|root| root.label())
        .collect::<Vec<_>>()
        .join("_");
    BackupArtifact {
        path: dir.join(format!("Backup_{stamp}_{labels}.tar")),
        source_roots: roots.to_vec(),
        created_at: stamp.to_string(),
    }
}

/// `Backup_<ts>_<Label>TO<newFs>.tar` — the pre-format snapshot taken by a
/// filesystem conversion.
pub fn conversion_backup_artifact(
    dir: &Path,
    stamp: &str,
    root: RootName,
    to: &Filesystem,
) -> BackupArtifact {
    BackupArtifact {
        path: dir.join(format!("Backup_{stamp}_{}TO{}.tar", root.label(), to)),
        source_roots: vec![root],
        created_at: stamp.to_string(),
    }
}

/// `IMG_<ts>_<ROOT>.img`
pub fn image_backup_artifact(dir: &Path, stamp: &str, root: RootName) -> BackupArtifact {
    BackupArtifact {
        path: dir.join(format!("IMG_{stamp}_{}.img", root.as_str())),
        source_roots: vec![root],
        created_at: stamp.to_string(),
    }
}

/// Recover the roots and timestamp embedded in a tar backup name.
pub fn parse_tar_artifact(path: &Path) -> Result<BackupArtifact> {
    let name = file_name(path)?;
    let stem = name
        .strip_suffix(".tar")
        .ok_or_else(|| RecoveryError::BadArtifactName(name.to_string()))?;

    let mut tokens = stem.split('_');
    if tokens.next() != Some("Backup") {
        return Err(RecoveryError::BadArtifactName(name.to_string()).into());
    }
    let stamp = tokens
        .next()
        .ok_or_else(|| RecoveryError::BadArtifactName(name.to_string()))?;

    let mut source_roots = Vec::new();
    for token in tokens {
        // Conversion snapshots carry a `TO<newFs>` suffix on the label.
        let label = token.split("TO").next().unwrap_or(token);
        if let Some(root) = RootName::from_label(label) {
            if !source_roots.contains(&root) {
                source_roots.push(root);
            }
        }
    }

    if source_roots.is_empty() {
        return Err(RecoveryError::BadArtifactName(name.to_string()).into());
    }

    Ok(BackupArtifact {
        path: path.to_path_buf(),
        source_roots,
        created_at: stamp.to_string(),
    })
}

/// Recover the target root from an image backup name (the trailing token).
pub fn parse_image_artifact(path: &Path) -> Result<BackupArtifact> {
    let name = file_name(path)?;
    let stem = name
        .strip_suffix(".img")
        .ok_or_else(|| RecoveryError::BadArtifactName(name.to_string()))?;

    let mut tokens = stem.split('_');
    if tokens.next() != Some("IMG") {
        return Err(RecoveryError::BadArtifactName(name.to_string()).into());
    }
    let stamp = tokens
        .next()
        .ok_or_else(|| RecoveryError::BadArtifactName(name.to_string()))?;

    let root = stem
        .rsplit('_')
        .next()
        .and_then(RootName::from_label)
        .ok_or_else(|| RecoveryError::BadArtifactName(name.to_string()))?;

    Ok(BackupArtifact {
        path: path.to_path_buf(),
        source_roots: vec![root],
        created_at: stamp.to_string(),
    })
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| RecoveryError::BadArtifactName(path.display().to_string()).into())
}
