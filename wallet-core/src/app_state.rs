use std::path::PathBuf;
use std::sync::Arc;

use crate::api::ApiClient;
use crate::auth_events::AuthEvents;
use crate::config_store::{ClientConfig, ConfigStore};
use crate::errors::WalletResult;
use crate::handshake::LoginHandshakeController;
use crate::lifecycle::LifecycleHub;
use crate::payment::PaymentFlowController;
use crate::session::{Session, SessionStore};
use crate::storage::{FileSessionStore, WalletPaths};

pub const ENV_WALLET_ENVIRONMENT: &str = "ANTARCTIC_WALLET_ENV";
const DEFAULT_ENVIRONMENT: &str = "production";

/// Everything a host shell needs to run the wallet flows.
pub struct WalletContext {
    paths: WalletPaths,
    config_store: ConfigStore,
    config: ClientConfig,
    environment: String,
    sessions: Arc<FileSessionStore>,
    auth_events: AuthEvents,
    api: Arc<ApiClient>,
    lifecycle: Arc<LifecycleHub>,
}

impl WalletContext {
    pub fn initialize(root_dir: PathBuf) -> WalletResult<Self> {
        let environment = std::env::var(ENV_WALLET_ENVIRONMENT)
            .unwrap_or_else(|_| DEFAULT_ENVIRONMENT.to_string());
        let paths = WalletPaths::new(&root_dir)?;
        paths.ensure_directories()?;

        let config_store = ConfigStore::from_paths(&paths);
        let config = effective_config(config_store.load_or_default(environment.clone())?)?;

        let sessions = Arc::new(FileSessionStore::from_paths(&paths));
        let auth_events = AuthEvents::new();
        let api = Arc::new(ApiClient::new(
            &config.api,
            sessions.clone(),
            auth_events.clone(),
        )?);
        log::info!(
            "Wallet context ready ({}, {})",
            environment,
            api.base_url()
        );

        Ok(Self {
            paths,
            config_store,
            config,
            environment,
            sessions,
            auth_events,
            api,
            lifecycle: Arc::new(LifecycleHub::new()),
        })
    }

    /// A fresh login handshake following the app lifecycle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn login_controller(&self) -> LoginHandshakeController {
        let controller = LoginHandshakeController::new(
            self.api.clone(),
            self.sessions.clone(),
            self.config.polling.login_interval(),
        );
        controller.attach_lifecycle(self.lifecycle.as_ref());
        controller
    }

    pub fn payment_controller(&self) -> PaymentFlowController {
        PaymentFlowController::new(self.api.clone(), &self.config.polling)
    }

    pub fn current_session(&self) -> WalletResult<Option<Session>> {
        self.sessions.get()
    }

    pub fn logout(&self) -> WalletResult<()> {
        log::info!("Signing out");
        self.sessions.clear()
    }

    pub fn api(&self) -> &Arc<ApiClient> {
        &self.api
    }

    pub fn auth_events(&self) -> &AuthEvents {
        &self.auth_events
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleHub> {
        &self.lifecycle
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    /// Persist a config change and rebuild the API client from it.
    ///
    /// Controllers handed out earlier keep the settings they were built with.
    pub fn update_config<F>(&mut self, updater: F) -> WalletResult<ClientConfig>
    where
        F: FnOnce(&mut ClientConfig) -> WalletResult<()>,
    {
        let updated = self
            .config_store
            .update(self.environment.clone(), updater)?;
        let config = effective_config(updated.clone())?;
        self.api = Arc::new(ApiClient::new(
            &config.api,
            self.sessions.clone(),
            self.auth_events.clone(),
        )?);
        self.config = config;
        Ok(updated)
    }
}

impl std::fmt::Debug for WalletContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletContext")
            .field("environment", &self.environment)
            .field("root", &self.paths.root_dir())
            .field("base_url", &self.api.base_url())
            .finish_non_exhaustive()
    }
}

fn effective_config(mut config: ClientConfig) -> WalletResult<ClientConfig> {
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
