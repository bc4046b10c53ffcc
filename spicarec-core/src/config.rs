//! Deployment configuration.
//!
//! The space floors are policy constants, not values computed from the data
//! being moved; deployments override them via a TOML file when a device
//! family needs different numbers.

use crate::errors::Result;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/spicarec.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpaceThresholds {
    /// Minimum free space on the backup destination before a whole-root tar
    /// backup is allowed to start.
    pub tar_backup_floor_mb: u64,
    /// Floor for EFS-only tar backups (the partition is tiny).
    pub efs_backup_floor_mb: u64,
    /// Floor for provisioning loopback OS images on the sdcard.
    pub image_convert_floor_mb: u64,
}

impl Default for SpaceThresholds {
    fn default() -> Self {
        Self {
            tar_backup_floor_mb: 220,
            efs_backup_floor_mb: 20,
            image_convert_floor_mb: 400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Destination directory for tar backups.
    pub backup_dir: PathBuf,
    /// Destination directory for raw image backups.
    pub image_dir: PathBuf,
    pub fstab_path: PathBuf,
    /// Registry of provisioned alternate OS images, one name per line.
    pub boot_list_path: PathBuf,
    /// Child-process poll cadence; one progress tick is emitted per poll.
    pub poll_interval_ms: u64,
    /// Upper bound on any single child process. Zero disables the bound.
    pub process_timeout_secs: u64,
    pub thresholds: SpaceThresholds,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("/sdcard/samdroid"),
            image_dir: PathBuf::from("/sdcard/samdroid/image"),
            fstab_path: PathBuf::from("/etc/fstab"),
            boot_list_path: PathBuf::from("/sdcard/.bootlst"),
            poll_interval_ms: 1000,
            process_timeout_secs: 6 * 60 * 60,
            thresholds: SpaceThresholds::default(),
        }
    }
}

impl RecoveryConfig {
    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        (self.process_timeout_secs > 0).then(|| Duration::from_secs(self.process_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_carry_the_policy_floors() {
        let config = RecoveryConfig::default();
        assert_eq!(config.thresholds.tar_backup_floor_mb, 220);
        assert_eq!(config.thresholds.efs_backup_floor_mb, 20);
        assert_eq!(config.thresholds.image_convert_floor_mb, 400);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = RecoveryConfig::load(Path::new("/nonexistent/spicarec.toml")).unwrap();
        assert_eq!(config, RecoveryConfig::default());
    }

    #[test]
    fn file_overrides_selected_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spicarec.toml");
        fs::write(
            &path,
            "backup_dir = \"/mnt/sd/backups\"\n\n[thresholds]\ntar_backup_floor_mb = 512\n",
        )
        .unwrap();

        let config = RecoveryConfig::load(&path).unwrap();
        assert_eq!(config.backup_dir, PathBuf::from("/mnt/sd/backups"));
        assert_eq!(config.thresholds.tar_backup_floor_mb, 512);
        // Untouched fields keep their defaults.
        assert_eq!(config.thresholds.efs_backup_floor_mb, 20);
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn zero_timeout_disables_the_bound() {
        let config = RecoveryConfig {
            process_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.process_timeout(), None);
    }
}
