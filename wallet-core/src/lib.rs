// lib.rs - Client core for the Antarctic Wallet app

pub mod api;
pub mod app_state;
pub mod auth_events;
pub mod config_store;
pub mod errors;
pub mod handshake;
pub mod lifecycle;
pub mod payment;
pub mod poll;
pub mod session;
pub mod storage;

#[cfg(test)]
mod testing;

// Re-export common types
pub use api::types::*;
pub use api::{ApiClient, RemoteApi};
pub use app_state::WalletContext;
pub use auth_events::{AuthEvent, AuthEvents};
pub use config_store::{ApiConfig, ClientConfig, ConfigStore, PollingConfig};
pub use errors::{ErrorKind, WalletError, WalletResult};
pub use handshake::{HandshakeStatus, LoginHandshake, LoginHandshakeController};
pub use lifecycle::{AppLifecycle, LifecycleHub, LifecycleSignal, LifecycleSubscription};
pub use payment::{
    PaymentFlowController, PaymentQuote, PaymentStatus, PaymentTransaction, TxStatus,
};
pub use poll::{PollControl, PollHandle, PollTimer};
pub use session::{MemorySessionStore, Session, SessionStore};
pub use storage::{FileSessionStore, WalletPaths};
