//! Scripted backend used by the controller tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::remote::RemoteApi;
use crate::api::types::{
    CreatePaymentData, CreatePaymentRequest, LoginAuthData, PrepareAuthData, PrepareQuoteData,
    PrepareQuoteRequest, TransactionData,
};
use crate::errors::{WalletError, WalletResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Prepare,
    Login(String),
    PrepareQuote(PrepareQuoteRequest),
    CreatePayment(CreatePaymentRequest),
    TransactionStatus(String),
}

/// Replies are consumed front to back; an exhausted queue falls back to the
/// "nothing happened yet" answer of each endpoint.
#[derive(Default)]
pub struct ScriptedApi {
    prepare: Mutex<VecDeque<WalletResult<PrepareAuthData>>>,
    login: Mutex<VecDeque<WalletResult<LoginAuthData>>>,
    quotes: Mutex<VecDeque<WalletResult<PrepareQuoteData>>>,
    creates: Mutex<VecDeque<WalletResult<CreatePaymentData>>>,
    statuses: Mutex<VecDeque<WalletResult<TransactionData>>>,
    calls: Mutex<Vec<Call>>,
    latency: Mutex<Duration>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every reply.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn push_prepare(&self, reply: WalletResult<PrepareAuthData>) {
        self.prepare.lock().push_back(reply);
    }

    pub fn push_login(&self, reply: WalletResult<LoginAuthData>) {
        self.login.lock().push_back(reply);
    }

    pub fn push_quote(&self, reply: WalletResult<PrepareQuoteData>) {
        self.quotes.lock().push_back(reply);
    }

    pub fn push_create(&self, reply: WalletResult<CreatePaymentData>) {
        self.creates.lock().push_back(reply);
    }

    pub fn push_status(&self, reply: WalletResult<TransactionData>) {
        self.statuses.lock().push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, matcher: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|call| matcher(call)).count()
    }

    async fn record(&self, call: Call) {
        self.calls.lock().push(call);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

pub fn prepared(login_token: &str, bot_name: &str) -> PrepareAuthData {
    PrepareAuthData {
        login_token: login_token.to_string(),
        bot_name: bot_name.to_string(),
        expired_at: 1_900_000_000,
    }
}

pub fn grant(access_token: &str) -> LoginAuthData {
    LoginAuthData {
        access_token: access_token.to_string(),
        refresh_token: "r1".to_string(),
        expired_at: 1_900_000_600,
        id: 7,
    }
}

pub fn quote(idempotency: &str) -> PrepareQuoteData {
    PrepareQuoteData {
        fiat_amount: "1000.00".to_string(),
        value: "10.52".to_string(),
        updated_at: 1_700_000_000,
        valid_time: 30,
        rate: "95.05".to_string(),
        idempotency: idempotency.to_string(),
    }
}

pub fn created(tx_id: &str, state: &str) -> CreatePaymentData {
    CreatePaymentData {
        tx_id: tx_id.to_string(),
        fiat_amount: "1000.00".to_string(),
        value: "10.52".to_string(),
        state: state.to_string(),
        created_at: 1_700_000_005,
        shop_name: Some("Coffee Point".to_string()),
        mcc: Some("5814".to_string()),
    }
}

pub fn transaction(status: &str) -> TransactionData {
    TransactionData {
        status: status.to_string(),
        tx_hash: Some("0xabc".to_string()),
        value: "10.52".to_string(),
        fiat_value: "1000.00".to_string(),
        shop_name: Some("Coffee Point".to_string()),
        mcc: Some("5814".to_string()),
        coin: Some("USDT".to_string()),
        kind: Some("sbp".to_string()),
        created_at: Some(1_700_000_005),
    }
}

#[async_trait]
impl RemoteApi for ScriptedApi {
    async fn prepare(&self) -> WalletResult<PrepareAuthData> {
        self.record(Call::Prepare).await;
        self.prepare
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(WalletError::Prepare("unscripted".to_string())))
    }

    async fn login(&self, login_token: &str) -> WalletResult<LoginAuthData> {
        self.record(Call::Login(login_token.to_string())).await;
        self.login
            .lock()
            .pop_front()
            .unwrap_or(Err(WalletError::NotConfirmed))
    }

    async fn prepare_quote(&self, request: &PrepareQuoteRequest) -> WalletResult<PrepareQuoteData> {
        self.record(Call::PrepareQuote(request.clone())).await;
        self.quotes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(WalletError::Network("unscripted".to_string())))
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> WalletResult<CreatePaymentData> {
        self.record(Call::CreatePayment(request.clone())).await;
        self.creates
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(WalletError::Creation("unscripted".to_string())))
    }

    async fn get_transaction_status(&self, tx_id: &str) -> WalletResult<TransactionData> {
        self.record(Call::TransactionStatus(tx_id.to_string())).await;
        self.statuses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(transaction("pending")))
    }
}
