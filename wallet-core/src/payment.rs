//! SBP payment flow: quote, create, settle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::api::remote::RemoteApi;
use crate::api::types::{
    timestamp_from_wire, CreatePaymentData, CreatePaymentRequest, PrepareQuoteData,
    PrepareQuoteRequest, TransactionData,
};
use crate::config_store::PollingConfig;
use crate::errors::{ErrorKind, WalletError, WalletResult};
use crate::poll::{PollControl, PollHandle, PollTimer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Idle,
    QuotePending,
    QuoteReady,
    Creating,
    AwaitingSettlement,
    Settled,
    Rejected,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Settled | PaymentStatus::Rejected)
    }

    fn accepts_quotes(self) -> bool {
        matches!(
            self,
            PaymentStatus::Idle | PaymentStatus::QuotePending | PaymentStatus::QuoteReady
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TxStatus {
    /// Unknown statuses are treated as still pending.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => TxStatus::Completed,
            "failed" => TxStatus::Failed,
            "cancelled" | "canceled" => TxStatus::Cancelled,
            "pending" => TxStatus::Pending,
            other => {
                log::debug!("Unrecognised transaction status '{}'", other);
                TxStatus::Pending
            }
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TxStatus::Pending)
    }
}

/// A priced offer for paying one SBP QR code with one coin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentQuote {
    /// Distinguishes successive quotes fetched by the same flow.
    pub instance: u64,
    pub qr_url: String,
    pub coin: String,
    pub fiat_amount: String,
    pub value: String,
    pub rate: String,
    pub idempotency_key: String,
    pub updated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl PaymentQuote {
    fn from_wire(
        instance: u64,
        qr_url: &str,
        coin: &str,
        data: PrepareQuoteData,
    ) -> WalletResult<Self> {
        let updated_at = timestamp_from_wire(data.updated_at);
        let valid_until = TimeDelta::try_seconds(data.valid_time.max(0))
            .and_then(|validity| updated_at.checked_add_signed(validity))
            .ok_or_else(|| {
                WalletError::InvalidResponse(format!(
                    "quote validity of {}s is out of range",
                    data.valid_time
                ))
            })?;
        Ok(Self {
            instance,
            qr_url: qr_url.to_string(),
            coin: coin.to_string(),
            fiat_amount: data.fiat_amount,
            value: data.value,
            rate: data.rate,
            idempotency_key: data.idempotency,
            updated_at,
            valid_until,
        })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentTransaction {
    pub tx_id: String,
    pub status: TxStatus,
    pub value: String,
    pub fiat_value: String,
    pub shop_name: Option<String>,
    pub tx_hash: Option<String>,
    pub mcc: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PaymentTransaction {
    fn from_created(data: CreatePaymentData) -> Self {
        Self {
            status: TxStatus::parse(&data.state),
            tx_id: data.tx_id,
            value: data.value,
            fiat_value: data.fiat_amount,
            shop_name: data.shop_name,
            tx_hash: None,
            mcc: data.mcc,
            created_at: Some(timestamp_from_wire(data.created_at)),
        }
    }

    fn absorb(&mut self, data: TransactionData) {
        self.status = TxStatus::parse(&data.status);
        self.value = data.value;
        self.fiat_value = data.fiat_value;
        if data.tx_hash.is_some() {
            self.tx_hash = data.tx_hash;
        }
        if data.shop_name.is_some() {
            self.shop_name = data.shop_name;
        }
        if data.mcc.is_some() {
            self.mcc = data.mcc;
        }
        if let Some(created_at) = data.created_at {
            self.created_at = Some(timestamp_from_wire(created_at));
        }
    }
}

#[derive(Debug)]
struct PaymentState {
    status: PaymentStatus,
    target: Option<(String, String)>,
    quote: Option<PaymentQuote>,
    transaction: Option<PaymentTransaction>,
    quote_seq: u64,
    next_instance: u64,
    refresh_wanted: bool,
    closed: bool,
    last_error: Option<WalletError>,
}

struct PaymentInner {
    api: Arc<dyn RemoteApi>,
    refresh_interval: Duration,
    settlement_interval: Duration,
    timer: PollTimer,
    state: Mutex<PaymentState>,
    status_tx: watch::Sender<PaymentStatus>,
    transient_failures: AtomicU64,
}

impl PaymentInner {
    fn set_status(&self, state: &mut PaymentState, status: PaymentStatus) {
        if state.status == status {
            return;
        }
        log::debug!("Payment flow {:?} -> {:?}", state.status, status);
        state.status = status;
        self.status_tx.send_replace(status);
    }

    fn record_transient(&self, state: &mut PaymentState, context: &str, err: WalletError) {
        let count = self.transient_failures.fetch_add(1, Ordering::Relaxed) + 1;
        log::debug!("{} failed ({} so far): {}", context, count, err);
        state.last_error = Some(err);
    }

    async fn fetch_quote(&self, qr_url: &str, coin: &str) -> WalletResult<Option<PaymentQuote>> {
        let seq = {
            let mut state = self.state.lock();
            if state.closed || !state.status.accepts_quotes() {
                return Err(WalletError::InvalidState(format!(
                    "cannot quote while {:?}",
                    state.status
                )));
            }
            let same_target = state
                .target
                .as_ref()
                .map(|(qr, c)| qr == qr_url && c == coin)
                .unwrap_or(false);
            if !same_target {
                state.target = Some((qr_url.to_string(), coin.to_string()));
                state.quote = None;
                self.set_status(&mut state, PaymentStatus::QuotePending);
            }
            if state.status == PaymentStatus::Idle {
                self.set_status(&mut state, PaymentStatus::QuotePending);
            }
            state.quote_seq += 1;
            state.quote_seq
        };

        let request = PrepareQuoteRequest {
            coin: coin.to_string(),
            qr_url: qr_url.to_string(),
        };
        let result = self.api.prepare_quote(&request).await;

        let mut state = self.state.lock();
        if state.quote_seq != seq || state.closed || !state.status.accepts_quotes() {
            log::debug!("Discarding stale quote response");
            return Ok(None);
        }

        let instance = state.next_instance + 1;
        match result.and_then(|data| PaymentQuote::from_wire(instance, qr_url, coin, data)) {
            Ok(quote) => {
                state.next_instance = instance;
                log::debug!(
                    "Quote #{} ready: {} {} for {}",
                    quote.instance,
                    quote.value,
                    quote.coin,
                    quote.fiat_amount
                );
                state.quote = Some(quote.clone());
                state.last_error = None;
                self.set_status(&mut state, PaymentStatus::QuoteReady);
                Ok(Some(quote))
            }
            Err(err) => {
                self.record_transient(&mut state, "Quote request", err);
                Ok(None)
            }
        }
    }

    /// Caller holds the state lock.
    fn schedule_refresh(self: &Arc<Self>) -> PollHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.timer.start(self.refresh_interval, move |handle| {
            let weak = weak.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return PollControl::Stop;
                };
                let target = {
                    let state = inner.state.lock();
                    if !inner.timer.is_current(handle) || !state.refresh_wanted {
                        return PollControl::Stop;
                    }
                    state.target.clone()
                };
                let Some((qr_url, coin)) = target else {
                    return PollControl::Stop;
                };
                match inner.fetch_quote(&qr_url, &coin).await {
                    Ok(_) if inner.state.lock().status.accepts_quotes() => PollControl::Continue,
                    _ => PollControl::Stop,
                }
            }
        })
    }

    /// Caller holds the state lock.
    fn schedule_settlement(self: &Arc<Self>, tx_id: &str) -> PollHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let tx_id = tx_id.to_string();
        self.timer.start(self.settlement_interval, move |handle| {
            let weak = weak.clone();
            let tx_id = tx_id.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return PollControl::Stop;
                };
                let outcome = inner.api.get_transaction_status(&tx_id).await;
                inner.apply_settlement(handle, &tx_id, outcome)
            }
        })
    }

    fn apply_settlement(
        &self,
        handle: PollHandle,
        tx_id: &str,
        outcome: WalletResult<TransactionData>,
    ) -> PollControl {
        let mut state = self.state.lock();
        if !self.timer.is_current(handle) {
            log::debug!(
                "Discarding status of {} from cancelled poll #{}",
                tx_id,
                handle.generation()
            );
            return PollControl::Stop;
        }
        if state.status != PaymentStatus::AwaitingSettlement {
            return PollControl::Stop;
        }

        match outcome {
            Ok(data) => {
                let status = match state.transaction.as_mut() {
                    Some(tx) if tx.tx_id == tx_id => {
                        tx.absorb(data);
                        tx.status
                    }
                    _ => return PollControl::Stop,
                };
                if !status.is_terminal() {
                    return PollControl::Continue;
                }
                self.timer.stop(handle);
                self.settle(&mut state, status);
                PollControl::Stop
            }
            Err(err) => {
                self.record_transient(&mut state, "Settlement poll", err);
                PollControl::Continue
            }
        }
    }

    fn settle(&self, state: &mut PaymentState, status: TxStatus) {
        let outcome = if status == TxStatus::Completed {
            PaymentStatus::Settled
        } else {
            PaymentStatus::Rejected
        };
        if let Some(tx) = state.transaction.as_ref() {
            log::info!("Payment {} finished as {:?}", tx.tx_id, status);
        }
        self.set_status(state, outcome);
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.refresh_wanted = false;
        state.quote_seq += 1;
        self.timer.stop_active();
    }
}

/// Drives one QR payment from quote to settlement.
pub struct PaymentFlowController {
    inner: Arc<PaymentInner>,
}

impl PaymentFlowController {
    pub fn new(api: Arc<dyn RemoteApi>, polling: &PollingConfig) -> Self {
        let (status_tx, _) = watch::channel(PaymentStatus::Idle);
        Self {
            inner: Arc::new(PaymentInner {
                api,
                refresh_interval: polling.quote_refresh_interval(),
                settlement_interval: polling.settlement_interval(),
                timer: PollTimer::new("payment"),
                state: Mutex::new(PaymentState {
                    status: PaymentStatus::Idle,
                    target: None,
                    quote: None,
                    transaction: None,
                    quote_seq: 0,
                    next_instance: 0,
                    refresh_wanted: false,
                    closed: false,
                    last_error: None,
                }),
                status_tx,
                transient_failures: AtomicU64::new(0),
            }),
        }
    }

    /// Fetch a fresh quote for `qr_url` paid in `coin`.
    ///
    /// Fetch failures are absorbed and reported as `Ok(None)`, as is a
    /// response overtaken by a newer request or by payment creation.
    pub async fn request_quote(
        &self,
        qr_url: &str,
        coin: &str,
    ) -> WalletResult<Option<PaymentQuote>> {
        self.inner.fetch_quote(qr_url, coin).await
    }

    /// Fetch a quote now and keep refreshing it until a payment is created.
    pub async fn start_quote_refresh(
        &self,
        qr_url: &str,
        coin: &str,
    ) -> WalletResult<Option<PaymentQuote>> {
        {
            let mut state = self.inner.state.lock();
            if state.closed || !state.status.accepts_quotes() {
                return Err(WalletError::InvalidState(format!(
                    "cannot refresh quotes while {:?}",
                    state.status
                )));
            }
            state.refresh_wanted = true;
            self.inner.schedule_refresh();
        }
        self.inner.fetch_quote(qr_url, coin).await
    }

    pub fn stop_quote_refresh(&self) {
        let mut state = self.inner.state.lock();
        state.refresh_wanted = false;
        if state.status.accepts_quotes() {
            self.inner.timer.stop_active();
        }
    }

    /// Create the payment for the current quote and start settlement polling.
    ///
    /// Only one creation may be in flight. On failure the flow returns to
    /// `QuoteReady` with the same quote so the caller may try again.
    pub async fn create_payment(&self) -> WalletResult<PaymentTransaction> {
        let (request, resume_refresh) = {
            let mut state = self.inner.state.lock();
            if state.closed || state.status != PaymentStatus::QuoteReady {
                return Err(WalletError::InvalidState(format!(
                    "cannot create a payment while {:?}",
                    state.status
                )));
            }
            let request = match state.quote.as_ref() {
                Some(quote) => CreatePaymentRequest {
                    idempotency: quote.idempotency_key.clone(),
                    qr_url: quote.qr_url.clone(),
                    coin: quote.coin.clone(),
                },
                None => return Err(crate::wallet_error!(InvalidState, "no quote")),
            };
            let resume_refresh = state.refresh_wanted;
            self.inner.timer.stop_active();
            state.quote_seq += 1;
            self.inner.set_status(&mut state, PaymentStatus::Creating);
            (request, resume_refresh)
        };

        log::info!("Creating payment for {} in {}", request.qr_url, request.coin);
        let result = self.inner.api.create_payment(&request).await;

        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(crate::wallet_error!(InvalidState, "payment flow was closed"));
        }

        match result {
            Ok(data) => {
                let tx = PaymentTransaction::from_created(data);
                state.refresh_wanted = false;
                state.last_error = None;
                state.transaction = Some(tx.clone());
                if tx.status.is_terminal() {
                    self.inner.settle(&mut state, tx.status);
                } else {
                    self.inner
                        .set_status(&mut state, PaymentStatus::AwaitingSettlement);
                    self.inner.schedule_settlement(&tx.tx_id);
                }
                Ok(tx)
            }
            Err(err) => {
                let err = match err.kind() {
                    ErrorKind::Creation => err,
                    _ => WalletError::Creation(err.to_string()),
                };
                log::warn!("{}", err);
                state.last_error = Some(err.clone());
                self.inner.set_status(&mut state, PaymentStatus::QuoteReady);
                if resume_refresh {
                    self.inner.schedule_refresh();
                }
                Err(err)
            }
        }
    }

    /// (Re)start settlement polling for the transaction being settled.
    pub fn poll_settlement(&self, tx_id: &str) -> WalletResult<PollHandle> {
        let state = self.inner.state.lock();
        if state.status != PaymentStatus::AwaitingSettlement {
            return Err(WalletError::InvalidState(format!(
                "cannot poll settlement while {:?}",
                state.status
            )));
        }
        match state.transaction.as_ref() {
            Some(tx) if tx.tx_id == tx_id => Ok(self.inner.schedule_settlement(tx_id)),
            _ => Err(WalletError::InvalidState(format!(
                "{} is not the current transaction",
                tx_id
            ))),
        }
    }

    pub fn teardown(&self) {
        self.inner.shutdown();
    }

    pub fn status(&self) -> PaymentStatus {
        self.inner.state.lock().status
    }

    pub fn watch_status(&self) -> watch::Receiver<PaymentStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn quote(&self) -> Option<PaymentQuote> {
        self.inner.state.lock().quote.clone()
    }

    pub fn transaction(&self) -> Option<PaymentTransaction> {
        self.inner.state.lock().transaction.clone()
    }

    pub fn transient_failures(&self) -> u64 {
        self.inner.transient_failures.load(Ordering::Relaxed)
    }

    pub fn is_polling(&self) -> bool {
        self.inner.timer.is_active()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.state.lock().refresh_wanted
    }

    pub fn last_error(&self) -> Option<WalletError> {
        self.inner.state.lock().last_error.clone()
    }
}

impl Drop for PaymentFlowController {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for PaymentFlowController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentFlowController")
            .field("status", &self.status())
            .field("timer", &self.inner.timer)
            .finish_non_exhaustive()
    }
}
