//! On-disk filesystem signature probing.

use crate::HalResult;
use std::path::Path;

/// Probing is the authoritative source of filesystem truth after any
/// format; in-memory metadata is only a guess until confirmed here.
pub trait ProbeOps {
    /// Whether the backing device (or image file) exists at all.
    fn device_present(&self, device: &Path) -> HalResult<bool>;

    /// Probe the filesystem signature on `device`. Returns `None` when the
    /// device carries no recognisable signature.
    fn probe_filesystem(&self, device: &Path) -> HalResult<Option<String>>;
}
