//! HTTP binding of the wallet backend API.
//!
//! Every call goes through [`ApiClient::call`], which attaches the stored
//! bearer credential, unwraps the response envelope, and handles a rejected
//! credential globally: the session is cleared and `AuthEvent::Unauthorized`
//! is broadcast. The login endpoint is exempt, since a 401 there only means
//! the bot has not confirmed the token yet.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::remote::RemoteApi;
use super::types::{
    AccountsData, ApiEnvelope, Coin, CoinRate, CreatePaymentData, CreatePaymentRequest,
    LoginAuthData, LoginTokenPayload, PrepareAuthData, PrepareQuoteData, PrepareQuoteRequest,
    RatesData, TransactionData, UserAddress, UserMeData,
};
use crate::auth_events::{AuthEvent, AuthEvents};
use crate::config_store::ApiConfig;
use crate::errors::{WalletError, WalletResult};
use crate::session::{run_blocking, SessionStore};

const PREPARE_PATH: &[&str] = &["auth", "prepare"];
const LOGIN_PATH: &[&str] = &["auth", "login"];
const QUOTE_PATH: &[&str] = &["pay", "sbp", "prepare"];
const CREATE_PAYMENT_PATH: &[&str] = &["pay", "sbp", "create"];

/// Why a call failed, before the operation maps it onto `WalletError`.
#[derive(Debug)]
enum CallFailure {
    Transport(String),
    Http(StatusCode),
    Rejected(String),
    Unauthorized,
}

impl CallFailure {
    fn describe(&self) -> String {
        match self {
            CallFailure::Transport(msg) => msg.clone(),
            CallFailure::Http(status) => format!("HTTP error: {}", status),
            CallFailure::Rejected(msg) => msg.clone(),
            CallFailure::Unauthorized => "unauthorized".to_string(),
        }
    }

    fn into_network(self) -> WalletError {
        match self {
            CallFailure::Unauthorized => WalletError::Unauthorized,
            other => WalletError::Network(other.describe()),
        }
    }
}

pub struct ApiClient {
    client: Client,
    base_url: Url,
    sessions: Arc<dyn SessionStore>,
    auth_events: AuthEvents,
}

impl ApiClient {
    pub fn new(
        config: &ApiConfig,
        sessions: Arc<dyn SessionStore>,
        auth_events: AuthEvents,
    ) -> WalletResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        let base_url = Url::parse(&config.base_url).map_err(|e| {
            WalletError::Config(format!("invalid API base URL {}: {}", config.base_url, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(WalletError::Config(format!(
                "API base URL {} cannot carry a path",
                base_url
            )));
        }

        Ok(ApiClient {
            client,
            base_url,
            sessions,
            auth_events,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    pub fn auth_events(&self) -> &AuthEvents {
        &self.auth_events
    }

    /// Profile of the signed-in user.
    pub async fn get_user_me(&self) -> WalletResult<UserMeData> {
        self.call::<(), _>(Method::GET, &["user", "me"], None)
            .await
            .map_err(CallFailure::into_network)
    }

    pub async fn get_coins(&self) -> WalletResult<Vec<Coin>> {
        self.call::<(), _>(Method::GET, &["coins", "all"], None)
            .await
            .map_err(CallFailure::into_network)
    }

    pub async fn get_rates(&self) -> WalletResult<Vec<CoinRate>> {
        let rates: RatesData = self
            .call::<(), _>(Method::GET, &["coins", "rates"], None)
            .await
            .map_err(CallFailure::into_network)?;
        Ok(rates.items)
    }

    /// Balances across every coin and network, with the fiat total.
    pub async fn get_accounts(&self) -> WalletResult<AccountsData> {
        self.call::<(), _>(Method::GET, &["accounts", "all"], None)
            .await
            .map_err(CallFailure::into_network)
    }

    /// Deposit addresses issued to the user, one per coin and network.
    pub async fn get_user_addresses(&self) -> WalletResult<Vec<UserAddress>> {
        self.call::<(), _>(Method::GET, &["user", "addresses"], None)
            .await
            .map_err(CallFailure::into_network)
    }

    async fn bearer(&self) -> Option<String> {
        match run_blocking(&self.sessions, |store| store.get()).await {
            Ok(Some(session)) => Some(format!("Bearer {}", session.access_token)),
            Ok(None) => None,
            Err(err) => {
                log::warn!("Session read failed, sending request without credentials: {}", err);
                None
            }
        }
    }

    async fn handle_unauthorized(&self, path: &str) {
        log::warn!("Backend rejected credentials on /{}; clearing session", path);
        if let Err(err) = run_blocking(&self.sessions, |store| store.clear()).await {
            log::warn!("Failed to clear session after 401: {}", err);
        }
        self.auth_events.emit(AuthEvent::Unauthorized);
    }

    /// Append `segments` to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, CallFailure> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CallFailure::Transport(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Issue one request and unwrap the `{data, status, ...}` envelope.
    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<T, CallFailure> {
        let url = self.endpoint(segments)?;
        let mut request = self.client.request(method, url);
        if let Some(bearer) = self.bearer().await {
            request = request.header(reqwest::header::AUTHORIZATION, bearer);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CallFailure::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            if segments != LOGIN_PATH {
                self.handle_unauthorized(&segments.join("/")).await;
                return Err(CallFailure::Unauthorized);
            }
            return Err(CallFailure::Http(status));
        }
        if !status.is_success() {
            return Err(CallFailure::Http(status));
        }

        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| CallFailure::Transport(format!("Failed to parse response: {}", e)))?;

        envelope.into_data().map_err(CallFailure::Rejected)
    }
}

#[async_trait]
impl RemoteApi for ApiClient {
    async fn prepare(&self) -> WalletResult<PrepareAuthData> {
        self.call::<(), _>(Method::POST, PREPARE_PATH, None)
            .await
            .map_err(|failure| match failure {
                CallFailure::Unauthorized => WalletError::Unauthorized,
                other => WalletError::Prepare(other.describe()),
            })
    }

    async fn login(&self, login_token: &str) -> WalletResult<LoginAuthData> {
        let payload = LoginTokenPayload {
            login_token: login_token.to_string(),
        };
        self.call(Method::POST, LOGIN_PATH, Some(&payload))
            .await
            .map_err(|failure| match failure {
                CallFailure::Rejected(_) => WalletError::NotConfirmed,
                CallFailure::Http(status) if status.is_client_error() => WalletError::NotConfirmed,
                other => other.into_network(),
            })
    }

    async fn prepare_quote(&self, request: &PrepareQuoteRequest) -> WalletResult<PrepareQuoteData> {
        self.call(Method::POST, QUOTE_PATH, Some(request))
            .await
            .map_err(CallFailure::into_network)
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> WalletResult<CreatePaymentData> {
        self.call(Method::POST, CREATE_PAYMENT_PATH, Some(request))
            .await
            .map_err(|failure| match failure {
                CallFailure::Unauthorized => WalletError::Unauthorized,
                other => WalletError::Creation(other.describe()),
            })
    }

    async fn get_transaction_status(&self, tx_id: &str) -> WalletResult<TransactionData> {
        self.call::<(), _>(Method::GET, &["transactions", tx_id], None)
            .await
            .map_err(CallFailure::into_network)
    }
}
