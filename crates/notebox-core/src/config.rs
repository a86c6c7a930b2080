//! Board configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default path handed to `ftok`.
pub const DEFAULT_KEY_PATH: &str = "/tmp";

/// Default `ftok` project id.
pub const DEFAULT_PROJECT_ID: u8 = b'L';

/// Default segment permissions.
pub const DEFAULT_PERMISSIONS: u32 = 0o666;

/// How long an attacher waits for the creator to publish the segment.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for acquiring the shared board.
///
/// Every cooperating process must agree on `key_path` and `project_id`;
/// together they determine the segment key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    /// Existing filesystem path used for key derivation.
    pub key_path: PathBuf,
    /// Project token used for key derivation. Must be non-zero.
    pub project_id: u8,
    /// Permission bits for a newly created segment.
    pub permissions: u32,
    /// Request owner-death recovery for the lock (Linux only).
    pub robust_lock: bool,
    /// Upper bound on waiting for a concurrent creator to finish.
    pub ready_timeout: Duration,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from(DEFAULT_KEY_PATH),
            project_id: DEFAULT_PROJECT_ID,
            permissions: DEFAULT_PERMISSIONS,
            robust_lock: true,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

impl BoardConfig {
    pub fn with_key(mut self, key_path: impl AsRef<Path>, project_id: u8) -> Self {
        self.key_path = key_path.as_ref().to_path_buf();
        self.project_id = project_id;
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_robust_lock(mut self, robust_lock: bool) -> Self {
        self.robust_lock = robust_lock;
        self
    }

    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_well_known_key() {
        let config = BoardConfig::default();
        assert_eq!(config.key_path, Path::new("/tmp"));
        assert_eq!(config.project_id, b'L');
        assert_eq!(config.permissions, 0o666);
        assert!(config.robust_lock);
    }

    #[test]
    fn builders_override_fields() {
        let config = BoardConfig::default()
            .with_key("/var/tmp", b'N')
            .with_permissions(0o600)
            .with_robust_lock(false)
            .with_ready_timeout(Duration::from_millis(50));
        assert_eq!(config.key_path, Path::new("/var/tmp"));
        assert_eq!(config.project_id, b'N');
        assert_eq!(config.permissions, 0o600);
        assert!(!config.robust_lock);
        assert_eq!(config.ready_timeout, Duration::from_millis(50));
    }
}
