use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::watch;

use antarctic_wallet_lib::{
    AppLifecycle, CreatePaymentData, CreatePaymentRequest, HandshakeStatus, LifecycleHub,
    LoginAuthData, LoginHandshakeController, MemorySessionStore, PaymentFlowController,
    PaymentStatus, PollingConfig, PrepareAuthData, PrepareQuoteData, PrepareQuoteRequest,
    RemoteApi, SessionStore, TransactionData, WalletContext, WalletError, WalletResult,
};

// Scripted backend for the controller-level scenarios

#[derive(Default)]
struct FakeBackend {
    logins: Mutex<VecDeque<WalletResult<LoginAuthData>>>,
    statuses: Mutex<VecDeque<&'static str>>,
    login_tokens: Mutex<Vec<String>>,
    create_requests: Mutex<Vec<CreatePaymentRequest>>,
    status_requests: AtomicUsize,
}

#[async_trait]
impl RemoteApi for FakeBackend {
    async fn prepare(&self) -> WalletResult<PrepareAuthData> {
        Ok(PrepareAuthData {
            login_token: "abc".into(),
            bot_name: "walletbot".into(),
            expired_at: 1_900_000_000,
        })
    }

    async fn login(&self, login_token: &str) -> WalletResult<LoginAuthData> {
        self.login_tokens.lock().push(login_token.to_string());
        self.logins
            .lock()
            .pop_front()
            .unwrap_or(Err(WalletError::NotConfirmed))
    }

    async fn prepare_quote(&self, request: &PrepareQuoteRequest) -> WalletResult<PrepareQuoteData> {
        assert_eq!(request.qr_url, "qr1");
        Ok(PrepareQuoteData {
            fiat_amount: "1000.00".into(),
            value: "10.52".into(),
            updated_at: 1_700_000_000,
            valid_time: 30,
            rate: "95.05".into(),
            idempotency: "idem1".into(),
        })
    }

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> WalletResult<CreatePaymentData> {
        self.create_requests.lock().push(request.clone());
        Ok(CreatePaymentData {
            tx_id: "tx1".into(),
            fiat_amount: "1000.00".into(),
            value: "10.52".into(),
            state: "pending".into(),
            created_at: 1_700_000_005,
            shop_name: Some("Coffee Point".into()),
            mcc: None,
        })
    }

    async fn get_transaction_status(&self, tx_id: &str) -> WalletResult<TransactionData> {
        assert_eq!(tx_id, "tx1");
        self.status_requests.fetch_add(1, Ordering::SeqCst);
        let status = self.statuses.lock().pop_front().unwrap_or("pending");
        Ok(TransactionData {
            status: status.into(),
            tx_hash: None,
            value: "10.52".into(),
            fiat_value: "1000.00".into(),
            shop_name: Some("Coffee Point".into()),
            mcc: None,
            coin: None,
            kind: None,
            created_at: None,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn login_survives_background_and_confirms_once() {
    let backend = Arc::new(FakeBackend::default());
    for _ in 0..3 {
        backend.logins.lock().push_back(Err(WalletError::NotConfirmed));
    }
    backend.logins.lock().push_back(Ok(LoginAuthData {
        access_token: "tok1".into(),
        refresh_token: "r1".into(),
        expired_at: 1_900_000_600,
        id: 7,
    }));
    let store = Arc::new(MemorySessionStore::new());
    let hub = LifecycleHub::new();

    let login =
        LoginHandshakeController::new(backend.clone(), store.clone(), Duration::from_secs(5));
    login.attach_lifecycle(&hub);
    login.prepare_handshake().await.unwrap();
    login.start_polling().unwrap();

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(backend.login_tokens.lock().len(), 2);

    hub.emit(AppLifecycle::Background);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.login_tokens.lock().len(), 2);
    assert_eq!(login.status(), HandshakeStatus::AwaitingConfirmation);

    hub.emit(AppLifecycle::Foreground);
    tokio::time::sleep(Duration::from_millis(10_500)).await;

    assert_eq!(login.status(), HandshakeStatus::Confirmed);
    assert_eq!(*backend.login_tokens.lock(), vec!["abc"; 4]);
    assert_eq!(store.writes(), 1);
    assert_eq!(store.get().unwrap().unwrap().access_token, "tok1");
    assert!(!login.is_polling());
}

#[tokio::test(start_paused = true)]
async fn payment_settles_after_pending_status() {
    let backend = Arc::new(FakeBackend::default());
    backend.statuses.lock().extend(["pending", "completed"]);
    let flow = PaymentFlowController::new(backend.clone(), &PollingConfig::default());

    let quote = flow.request_quote("qr1", "USDT").await.unwrap().unwrap();
    assert_eq!(quote.idempotency_key, "idem1");

    let (first, second) = tokio::join!(flow.create_payment(), flow.create_payment());
    assert!(first.is_ok() != second.is_ok());
    let sent = backend.create_requests.lock().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].idempotency, "idem1");

    let mut status = flow.watch_status();
    tokio::time::timeout(Duration::from_secs(60), async {
        while !status.borrow_and_update().is_terminal() {
            status.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(flow.status(), PaymentStatus::Settled);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.status_requests.load(Ordering::SeqCst), 2);
}

// HTTP stub backend for the end-to-end run

#[derive(Default)]
struct StubState {
    login_calls: AtomicUsize,
    status_calls: AtomicUsize,
    idempotency_seen: Mutex<Vec<String>>,
}

fn ok(data: Value) -> Response {
    Json(json!({"data": data, "errors": {}, "message": null, "status": "ok", "meta": {}}))
        .into_response()
}

fn bearer_is(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        == Some(format!("Bearer {}", token).as_str())
}

async fn stub_prepare() -> Response {
    ok(json!({"loginToken": "login_abc", "botName": "walletbot", "expiredAt": 1_900_000_000}))
}

async fn stub_login(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    assert_eq!(body["loginToken"], "abc");
    if state.login_calls.fetch_add(1, Ordering::SeqCst) < 2 {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ok(json!({"accessToken": "tok1", "refreshToken": "r1", "expiredAt": 1_900_000_600, "id": 7}))
}

async fn stub_quote(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !bearer_is(&headers, "tok1") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert_eq!(body["qr_url"], "qr1");
    ok(json!({"fiatAmount": "1000.00", "value": "10.52", "updatedAt": 1_700_000_000,
              "validTime": 30, "rate": "95.05", "idempotency": "idem1"}))
}

async fn stub_create(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !bearer_is(&headers, "tok1") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(key) = body["idempotency"].as_str() {
        state.idempotency_seen.lock().push(key.to_string());
    }
    ok(json!({"txId": "tx1", "fiatAmount": "1000.00", "value": "10.52",
              "state": "pending", "createdAt": 1_700_000_005, "shopName": "Coffee Point"}))
}

async fn stub_status(
    State(state): State<Arc<StubState>>,
    Path(tx_id): Path<String>,
) -> Response {
    assert_eq!(tx_id, "tx1");
    let status = if state.status_calls.fetch_add(1, Ordering::SeqCst) == 0 {
        "pending"
    } else {
        "completed"
    };
    ok(json!({"status": status, "txHash": "0xabc", "value": "10.52",
              "fiatValue": "1000.00", "shopName": "Coffee Point"}))
}

async fn spawn_stub(state: Arc<StubState>) -> String {
    let app = Router::new()
        .route("/auth/prepare", post(stub_prepare))
        .route("/auth/login", post(stub_login))
        .route("/pay/sbp/prepare", post(stub_quote))
        .route("/pay/sbp/create", post(stub_create))
        .route("/transactions/:tx_id", get(stub_status))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn wait_until<S: Copy>(mut status: watch::Receiver<S>, done: impl Fn(S) -> bool) -> S {
    tokio::time::timeout(Duration::from_secs(10), async move {
        loop {
            let current = *status.borrow_and_update();
            if done(current) {
                return current;
            }
            status.changed().await.unwrap();
        }
    })
    .await
    .expect("flow did not finish in time")
}

#[tokio::test]
async fn login_then_pay_over_http() -> WalletResult<()> {
    let stub = Arc::new(StubState::default());
    let base_url = spawn_stub(stub.clone()).await;
    std::env::set_var("ANTARCTIC_WALLET_ENV", "test");
    let temp_dir = TempDir::new().expect("create temp dir");

    let mut context = WalletContext::initialize(temp_dir.path().to_path_buf())?;
    context.update_config(|config| {
        config.api.base_url = base_url.clone();
        config.polling.login_interval_ms = 50;
        config.polling.settlement_interval_ms = 50;
        Ok(())
    })?;
    assert_eq!(context.environment(), "test");

    let login = context.login_controller();
    let handshake = login.prepare_handshake().await?;
    assert_eq!(
        handshake.deep_link(),
        "https://t.me/walletbot?start=login_abc"
    );
    login.start_polling()?;
    let outcome = wait_until(login.watch_status(), HandshakeStatus::is_terminal).await;
    assert_eq!(outcome, HandshakeStatus::Confirmed);
    assert_eq!(stub.login_calls.load(Ordering::SeqCst), 3);

    let reopened = WalletContext::initialize(temp_dir.path().to_path_buf())?;
    let session = reopened.current_session()?.expect("session persisted");
    assert_eq!(session.user_id, 7);

    let flow = context.payment_controller();
    let quote = flow.request_quote("qr1", "USDT").await?.expect("quote");
    assert_eq!(quote.idempotency_key, "idem1");
    let tx = flow.create_payment().await?;
    assert_eq!(tx.tx_id, "tx1");

    let outcome = wait_until(flow.watch_status(), PaymentStatus::is_terminal).await;
    assert_eq!(outcome, PaymentStatus::Settled);
    assert_eq!(
        flow.transaction().and_then(|tx| tx.tx_hash).as_deref(),
        Some("0xabc")
    );
    assert_eq!(*stub.idempotency_seen.lock(), vec!["idem1".to_string()]);
    assert_eq!(stub.status_calls.load(Ordering::SeqCst), 2);

    context.logout()?;
    assert!(context.current_session()?.is_none());

    std::env::remove_var("ANTARCTIC_WALLET_ENV");
    Ok(())
}
