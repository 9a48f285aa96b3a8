//! Telegram bot login handshake.
//!
//! `prepare` issues a one-time login token; the user confirms it by opening
//! the bot deep link in Telegram while this controller polls `login` until the
//! backend hands out a session. Polling pauses while the app is in the
//! background and resumes on return if it was wanted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::remote::RemoteApi;
use crate::api::types::{timestamp_from_wire, LoginAuthData};
use crate::errors::{ErrorKind, WalletError, WalletResult};
use crate::lifecycle::{AppLifecycle, LifecycleSignal};
use crate::poll::{PollControl, PollHandle, PollTimer};
use crate::session::{run_blocking, Session, SessionStore};

pub const TELEGRAM_LINK_BASE: &str = "https://t.me";
const LOGIN_TOKEN_PREFIX: &str = "login_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    Preparing,
    AwaitingConfirmation,
    Confirmed,
    Failed,
}

impl HandshakeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeStatus::Confirmed | HandshakeStatus::Failed)
    }
}

/// A login token issued by the backend, waiting for confirmation in Telegram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginHandshake {
    pub login_token: String,
    pub bot_name: String,
    pub expires_at: DateTime<Utc>,
    pub status: HandshakeStatus,
}

impl LoginHandshake {
    pub fn deep_link(&self) -> String {
        format!(
            "{}/{}?start={}",
            TELEGRAM_LINK_BASE, self.bot_name, self.login_token
        )
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Token as the login endpoint expects it.
fn confirmation_token(login_token: &str) -> &str {
    login_token
        .strip_prefix(LOGIN_TOKEN_PREFIX)
        .unwrap_or(login_token)
}

/// What the poll loop does with one `login` response.
enum LoginStep {
    Poll(PollControl),
    Persist(Session),
}

#[derive(Debug)]
struct HandshakeState {
    status: HandshakeStatus,
    handshake: Option<LoginHandshake>,
    session: Option<Session>,
    should_be_polling: bool,
    prepare_epoch: u64,
    last_error: Option<WalletError>,
}

struct HandshakeInner {
    api: Arc<dyn RemoteApi>,
    sessions: Arc<dyn SessionStore>,
    interval: Duration,
    timer: PollTimer,
    state: Mutex<HandshakeState>,
    status_tx: watch::Sender<HandshakeStatus>,
    transient_failures: AtomicU64,
    pending_polls: AtomicU64,
    lifecycle_task: Mutex<Option<JoinHandle<()>>>,
}

impl HandshakeInner {
    fn set_status(&self, state: &mut HandshakeState, status: HandshakeStatus) {
        if state.status == status {
            return;
        }
        log::debug!("Login handshake {:?} -> {:?}", state.status, status);
        state.status = status;
        if let Some(handshake) = state.handshake.as_mut() {
            handshake.status = status;
        }
        self.status_tx.send_replace(status);
    }

    /// Start the login poll. Caller holds the state lock and has checked
    /// that the handshake is awaiting confirmation.
    fn schedule(self: &Arc<Self>, login_token: &str) -> PollHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = confirmation_token(login_token).to_string();
        self.timer.start(self.interval, move |handle| {
            let weak = weak.clone();
            let token = token.clone();
            async move {
                let Some(inner) = weak.upgrade() else {
                    return PollControl::Stop;
                };
                let outcome = inner.api.login(&token).await;
                match inner.apply_login(handle, outcome) {
                    LoginStep::Poll(control) => control,
                    LoginStep::Persist(session) => {
                        inner.confirm(session).await;
                        PollControl::Stop
                    }
                }
            }
        })
    }

    /// Accepting a grant stops the poll and keeps the session in memory;
    /// the status only turns `Confirmed` once [`Self::confirm`] has persisted it.
    fn apply_login(&self, handle: PollHandle, outcome: WalletResult<LoginAuthData>) -> LoginStep {
        let mut state = self.state.lock();
        if !self.timer.is_current(handle) {
            log::debug!(
                "Discarding login response from cancelled poll #{}",
                handle.generation()
            );
            return LoginStep::Poll(PollControl::Stop);
        }
        if state.status != HandshakeStatus::AwaitingConfirmation || state.session.is_some() {
            return LoginStep::Poll(PollControl::Stop);
        }

        match outcome {
            Ok(grant) => {
                let session = Session::from_login(&grant);
                state.session = Some(session.clone());
                state.should_be_polling = false;
                state.last_error = None;
                self.timer.stop(handle);
                LoginStep::Persist(session)
            }
            Err(err) => match err.kind() {
                ErrorKind::NotConfirmed => {
                    self.pending_polls.fetch_add(1, Ordering::Relaxed);
                    LoginStep::Poll(PollControl::Continue)
                }
                _ => {
                    let count = self.transient_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    log::debug!("Login poll failed ({} so far): {}", count, err);
                    state.last_error = Some(err);
                    LoginStep::Poll(PollControl::Continue)
                }
            },
        }
    }

    async fn confirm(&self, session: Session) {
        let user_id = session.user_id;
        if let Err(err) = run_blocking(&self.sessions, move |store| store.save(&session)).await {
            log::warn!("Login confirmed but the session was not persisted: {}", err);
        }
        log::info!("Login confirmed for user {}", user_id);
        let mut state = self.state.lock();
        self.set_status(&mut state, HandshakeStatus::Confirmed);
    }

    fn on_lifecycle(self: &Arc<Self>, event: AppLifecycle) {
        let state = self.state.lock();
        match event {
            AppLifecycle::Background => {
                if self.timer.stop_active() {
                    log::debug!("Login polling paused in background");
                }
            }
            AppLifecycle::Foreground => {
                if !state.should_be_polling
                    || self.timer.is_active()
                    || state.status != HandshakeStatus::AwaitingConfirmation
                    || state.session.is_some()
                {
                    return;
                }
                if let Some(handshake) = state.handshake.as_ref() {
                    log::debug!("Login polling resumed in foreground");
                    self.schedule(&handshake.login_token);
                }
            }
        }
    }

    fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.should_be_polling = false;
            state.prepare_epoch += 1;
            self.timer.stop_active();
        }
        if let Some(task) = self.lifecycle_task.lock().take() {
            task.abort();
        }
    }
}

/// Drives one login handshake from `prepare` to a confirmed session.
pub struct LoginHandshakeController {
    inner: Arc<HandshakeInner>,
}

impl LoginHandshakeController {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        sessions: Arc<dyn SessionStore>,
        poll_interval: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(HandshakeStatus::Preparing);
        Self {
            inner: Arc::new(HandshakeInner {
                api,
                sessions,
                interval: poll_interval,
                timer: PollTimer::new("login"),
                state: Mutex::new(HandshakeState {
                    status: HandshakeStatus::Preparing,
                    handshake: None,
                    session: None,
                    should_be_polling: false,
                    prepare_epoch: 0,
                    last_error: None,
                }),
                status_tx,
                transient_failures: AtomicU64::new(0),
                pending_polls: AtomicU64::new(0),
                lifecycle_task: Mutex::new(None),
            }),
        }
    }

    /// Ask the backend for a login token.
    ///
    /// Calling this again restarts the handshake: polling stops and the
    /// previous token is forgotten. Once the handshake is confirmed or has
    /// failed a new controller is needed.
    pub async fn prepare_handshake(&self) -> WalletResult<LoginHandshake> {
        let epoch = {
            let mut state = self.inner.state.lock();
            if state.status.is_terminal() {
                return Err(WalletError::InvalidState(format!(
                    "handshake already {:?}",
                    state.status
                )));
            }
            if state.session.is_some() {
                return Err(crate::wallet_error!(InvalidState, "login already granted"));
            }
            state.should_be_polling = false;
            self.inner.timer.stop_active();
            state.handshake = None;
            state.prepare_epoch += 1;
            self.inner.set_status(&mut state, HandshakeStatus::Preparing);
            state.prepare_epoch
        };

        let result = self.inner.api.prepare().await;

        let mut state = self.inner.state.lock();
        if state.prepare_epoch != epoch {
            log::debug!("Discarding superseded prepare response");
            return Err(crate::wallet_error!(InvalidState, "handshake was restarted"));
        }

        match result {
            Ok(data) => {
                let handshake = LoginHandshake {
                    login_token: data.login_token,
                    bot_name: data.bot_name,
                    expires_at: timestamp_from_wire(data.expired_at),
                    status: HandshakeStatus::AwaitingConfirmation,
                };
                log::info!("Login token issued for bot {}", handshake.bot_name);
                state.handshake = Some(handshake.clone());
                state.last_error = None;
                self.inner
                    .set_status(&mut state, HandshakeStatus::AwaitingConfirmation);
                Ok(handshake)
            }
            Err(err) => {
                let err = match err {
                    WalletError::Prepare(_) => err,
                    other => WalletError::Prepare(other.to_string()),
                };
                log::warn!("{}", err);
                state.last_error = Some(err.clone());
                self.inner.set_status(&mut state, HandshakeStatus::Failed);
                Err(err)
            }
        }
    }

    /// Poll `login` until the user confirms in Telegram.
    pub fn start_polling(&self) -> WalletResult<PollHandle> {
        let mut state = self.inner.state.lock();
        if state.status != HandshakeStatus::AwaitingConfirmation {
            return Err(WalletError::InvalidState(format!(
                "cannot poll login while {:?}",
                state.status
            )));
        }
        if state.session.is_some() {
            return Err(crate::wallet_error!(InvalidState, "login already granted"));
        }
        let login_token = match state.handshake.as_ref() {
            Some(handshake) => handshake.login_token.clone(),
            None => {
                return Err(crate::wallet_error!(InvalidState, "no login token issued"))
            }
        };
        state.should_be_polling = true;
        Ok(self.inner.schedule(&login_token))
    }

    pub fn stop_polling(&self) {
        let mut state = self.inner.state.lock();
        state.should_be_polling = false;
        self.inner.timer.stop_active();
    }

    pub fn handle_lifecycle(&self, event: AppLifecycle) {
        self.inner.on_lifecycle(event);
    }

    /// Follow `signal` until teardown. Replaces any earlier subscription.
    pub fn attach_lifecycle(&self, signal: &dyn LifecycleSignal) {
        let mut subscription = signal.subscribe();
        let weak = Arc::downgrade(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_lifecycle(event);
            }
        });
        if let Some(prior) = self.inner.lifecycle_task.lock().replace(task) {
            prior.abort();
        }
    }

    /// Stop polling and drop the lifecycle subscription.
    pub fn teardown(&self) {
        self.inner.shutdown();
    }

    pub fn status(&self) -> HandshakeStatus {
        self.inner.state.lock().status
    }

    pub fn watch_status(&self) -> watch::Receiver<HandshakeStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn handshake(&self) -> Option<LoginHandshake> {
        self.inner.state.lock().handshake.clone()
    }

    pub fn deep_link(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .handshake
            .as_ref()
            .map(LoginHandshake::deep_link)
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.lock().session.clone()
    }

    pub fn should_be_polling(&self) -> bool {
        self.inner.state.lock().should_be_polling
    }

    pub fn is_polling(&self) -> bool {
        self.inner.timer.is_active()
    }

    pub fn active_poll(&self) -> Option<PollHandle> {
        self.inner.timer.active_handle()
    }

    /// Poll responses that were neither a confirmation nor "not yet".
    pub fn transient_failures(&self) -> u64 {
        self.inner.transient_failures.load(Ordering::Relaxed)
    }

    pub fn pending_polls(&self) -> u64 {
        self.inner.pending_polls.load(Ordering::Relaxed)
    }

    pub fn last_error(&self) -> Option<WalletError> {
        self.inner.state.lock().last_error.clone()
    }
}

impl Drop for LoginHandshakeController {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for LoginHandshakeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginHandshakeController")
            .field("status", &self.status())
            .field("timer", &self.inner.timer)
            .finish_non_exhaustive()
    }
}
