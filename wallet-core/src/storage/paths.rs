use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{WalletError, WalletResult};

/// Filesystem layout used by the client core.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    /// Root directory for wallet data.
    root_dir: PathBuf,
    /// Persisted authenticated session.
    session_file: PathBuf,
    /// Directory for cache/state data.
    cache_dir: PathBuf,
    /// Path to persisted client configuration.
    config_file: PathBuf,
}

impl WalletPaths {
    /// Default session file name used on disk.
    pub const DEFAULT_SESSION_FILENAME: &'static str = "session.json";
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "wallet.config";

    /// Create a new path manager rooted at the provided directory.
    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::Storage(
                "Wallet root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            session_file: root_dir.join(Self::DEFAULT_SESSION_FILENAME),
            cache_dir: root_dir.join("cache"),
            config_file: root_dir.join(Self::DEFAULT_CONFIG_FILENAME),
            root_dir,
        })
    }

    /// Ensure the directory structure exists, creating missing folders.
    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.cache_dir)?;
        Ok(())
    }

    pub fn session_file(&self) -> &Path {
        &self.session_file
    }

    /// Directory for cache/state artifacts (quarantined session files among them).
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Root directory for all wallet-managed data.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_wallet_paths_creation() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path()).unwrap();

        assert_eq!(
            paths.session_file(),
            temp_dir.path().join(WalletPaths::DEFAULT_SESSION_FILENAME)
        );
        assert_eq!(paths.cache_dir(), temp_dir.path().join("cache"));
        assert_eq!(paths.config_file(), temp_dir.path().join("wallet.config"));
    }

    #[test]
    fn test_empty_root_directory_rejected() {
        let result = WalletPaths::new("");
        match result {
            Err(WalletError::Storage(msg)) => {
                assert!(msg.contains("cannot be empty"));
            }
            _ => panic!("Expected Storage error for empty root"),
        }
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = WalletPaths::new(temp_dir.path().join("nested")).unwrap();

        paths.ensure_directories().unwrap();

        assert!(paths.root_dir().exists());
        assert!(paths.cache_dir().exists());
    }
}
