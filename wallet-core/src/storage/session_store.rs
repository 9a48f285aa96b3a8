use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use blake3::Hasher as Blake3;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::WalletPaths;
use crate::errors::{WalletError, WalletResult};
use crate::session::{Session, SessionStore};

const SESSION_MAGIC: &[u8; 8] = b"ANTSESSN";
const SESSION_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct SessionEnvelope {
    magic: [u8; 8],
    version: u16,
    checksum: [u8; 32],
    payload: Session,
}

/// Session slot persisted as a checksummed JSON envelope.
///
/// Writes go through a sibling `.new` file and a rename so readers never see
/// a half-written session. An envelope that fails verification is moved into
/// the cache directory and reported once as a storage error.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
    quarantine_dir: Option<PathBuf>,
}

impl FileSessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            quarantine_dir: None,
        }
    }

    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self {
            path: paths.session_file().to_path_buf(),
            quarantine_dir: Some(paths.cache_dir().to_path_buf()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_envelope(&self) -> WalletResult<SessionEnvelope> {
        let bytes = fs::read(&self.path)?;
        let envelope: SessionEnvelope = serde_json::from_slice(&bytes)
            .map_err(|e| WalletError::Storage(format!("Unreadable session file: {}", e)))?;

        if &envelope.magic != SESSION_MAGIC {
            return Err(WalletError::Storage(
                "Invalid session magic marker".to_string(),
            ));
        }
        if envelope.version != SESSION_VERSION {
            return Err(WalletError::Storage(format!(
                "Unsupported session version {}",
                envelope.version
            )));
        }
        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::Storage(
                "Session integrity verification failed".to_string(),
            ));
        }

        Ok(envelope)
    }

    fn quarantine(&self) {
        let target = match &self.quarantine_dir {
            Some(dir) => dir.join(format!(
                "session_{}.rejected",
                Utc::now().format("%Y%m%d_%H%M%S_%6f")
            )),
            None => self.path.with_extension("rejected"),
        };
        if let Some(parent) = target.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::rename(&self.path, &target) {
            log::warn!(
                "Failed to quarantine session file {}: {}",
                self.path.display(),
                err
            );
        }
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> WalletResult<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }

        match self.read_envelope() {
            Ok(envelope) => Ok(Some(envelope.payload)),
            Err(err) => {
                self.quarantine();
                Err(err)
            }
        }
    }

    fn save(&self, session: &Session) -> WalletResult<()> {
        let envelope = SessionEnvelope {
            magic: *SESSION_MAGIC,
            version: SESSION_VERSION,
            checksum: checksum(session)?,
            payload: session.clone(),
        };

        let serialized = serde_json::to_vec(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> WalletResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn checksum(session: &Session) -> WalletResult<[u8; 32]> {
    let encoded = serde_json::to_vec(session)?;
    let mut hasher = Blake3::new();
    hasher.update(&encoded);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    Ok(output)
}
