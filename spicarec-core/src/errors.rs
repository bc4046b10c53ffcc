use crate::convert::ConversionStep;
use crate::process::ExitOutcome;
use crate::roots::RootName;
use spicarec_hal::HalError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for recovery operations
pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Can't mount {root}: {cause}")]
    Mount { root: RootName, cause: HalError },

    #[error("Can't unmount {root}: {cause}")]
    Unmount { root: RootName, cause: HalError },

    #[error("{0} has no mount point")]
    NotMountable(RootName),

    #[error("{0} must be unmounted first")]
    StillMounted(RootName),

    #[error("Not enough free space on {path}: {available_mb}MB free, {required_mb}MB required")]
    InsufficientSpace {
        path: PathBuf,
        available_mb: u64,
        required_mb: u64,
    },

    #[error("{program} failed: {outcome}")]
    Process {
        program: String,
        outcome: ExitOutcome,
    },

    #[error("Conversion of {root} failed during {step}; manual recovery required")]
    Conversion {
        root: RootName,
        step: ConversionStep,
        backup: Option<PathBuf>,
    },

    #[error("Safety lock engaged. This operation is destructive and must be confirmed explicitly.")]
    SafetyLock,

    #[error("Unrecognised backup name: {0}")]
    BadArtifactName(String),
}
