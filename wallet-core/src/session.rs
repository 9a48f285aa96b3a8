use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::api::types::{timestamp_from_wire, LoginAuthData};
use crate::errors::{WalletError, WalletResult};

/// Authenticated session issued once the Telegram bot confirms a login.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Zeroize)]
#[zeroize(drop)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
    pub user_id: i64,
}

impl Session {
    pub fn from_login(grant: &LoginAuthData) -> Self {
        Self {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            expires_at: timestamp_from_wire(grant.expired_at),
            user_id: grant.id,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Persisted key-value slot holding the authenticated session.
///
/// Failures surface as `WalletError::Storage`; callers log them and carry on
/// as if nothing was persisted.
pub trait SessionStore: Send + Sync {
    fn get(&self) -> WalletResult<Option<Session>>;
    fn save(&self, session: &Session) -> WalletResult<()>;
    fn clear(&self) -> WalletResult<()>;
}

/// Run `op` against `store` on the blocking pool.
///
/// File-backed stores do synchronous I/O, which must stay off the async
/// worker threads.
pub(crate) async fn run_blocking<T, F>(store: &Arc<dyn SessionStore>, op: F) -> WalletResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn SessionStore) -> WalletResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || op(store.as_ref()))
        .await
        .map_err(|err| WalletError::Storage(format!("session store task failed: {}", err)))?
}

/// In-memory session slot for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: RwLock<Option<Session>>,
    writes: AtomicU64,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            slot: RwLock::new(Some(session)),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of successful `save` calls since construction.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> WalletResult<Option<Session>> {
        Ok(self.slot.read().clone())
    }

    fn save(&self, session: &Session) -> WalletResult<()> {
        *self.slot.write() = Some(session.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> WalletResult<()> {
        self.slot.write().take();
        Ok(())
    }
}
