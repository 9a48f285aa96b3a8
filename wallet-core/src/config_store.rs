use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::storage::WalletPaths;

const CONFIG_VERSION: u16 = 1;

pub const DEFAULT_API_BASE_URL: &str = "https://app.antarcticwallet.com/api/v2";
pub const ENV_API_BASE_URL: &str = "ANTARCTIC_API_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Intervals for the three poll loops, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollingConfig {
    pub login_interval_ms: u64,
    pub quote_refresh_interval_ms: u64,
    pub settlement_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            login_interval_ms: 5_000,
            quote_refresh_interval_ms: 10_000,
            settlement_interval_ms: 3_000,
        }
    }
}

impl PollingConfig {
    pub fn login_interval(&self) -> Duration {
        interval_from_millis(self.login_interval_ms)
    }

    pub fn quote_refresh_interval(&self) -> Duration {
        interval_from_millis(self.quote_refresh_interval_ms)
    }

    pub fn settlement_interval(&self) -> Duration {
        interval_from_millis(self.settlement_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub api: ApiConfig,
    pub polling: PollingConfig,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl ClientConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            api: ApiConfig::default(),
            polling: PollingConfig::default(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Apply process environment overrides on top of the persisted values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_BASE_URL) {
            let url = url.trim();
            if url.is_empty() {
                log::warn!("Environment variable {} is empty", ENV_API_BASE_URL);
            } else {
                log::debug!("API base URL overridden from {}", ENV_API_BASE_URL);
                self.api.base_url = url.to_string();
            }
        }
    }

    pub fn validate(&self) -> WalletResult<()> {
        let base = self.api.base_url.trim();
        if !(base.starts_with("https://") || base.starts_with("http://")) {
            return Err(WalletError::Config(format!(
                "API base URL must be http(s): '{}'",
                self.api.base_url
            )));
        }
        let polling = &self.polling;
        if polling.login_interval_ms == 0
            || polling.quote_refresh_interval_ms == 0
            || polling.settlement_interval_ms == 0
        {
            return Err(WalletError::Config(
                "Polling intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: ClientConfig,
    modified_at_unix: i64,
}

/// Handles persistence of client configuration with integrity checks.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> WalletResult<ClientConfig> {
        if !self.path.exists() {
            let config = ClientConfig::new(environment);
            self.save(&config)?;
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::Config(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(WalletError::Config(
                "Config integrity verification failed".to_string(),
            ));
        }

        Ok(envelope.payload)
    }

    pub fn save(&self, config: &ClientConfig) -> WalletResult<()> {
        config.validate()?;
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| WalletError::Storage(e.to_string()))?
                .as_secs() as i64,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
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

    pub fn update<F>(
        &self,
        environment: impl Into<String>,
        updater: F,
    ) -> WalletResult<ClientConfig>
    where
        F: FnOnce(&mut ClientConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        config.touch();
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &ClientConfig) -> WalletResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    let encoded = serde_json::to_vec(config)?;
    hasher.update(&encoded);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    Ok(output)
}

fn interval_from_millis(millis: u64) -> Duration {
    Duration::from_millis(millis.max(1))
}
