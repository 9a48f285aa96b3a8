use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, Error, PartialEq, Eq)]
pub enum WalletError {
    // Login handshake
    #[error("Failed to prepare login: {0}")]
    Prepare(String),
    #[error("Login not confirmed yet")]
    NotConfirmed,

    // Payment flow
    #[error("Failed to create payment: {0}")]
    Creation(String),

    // Transport
    #[error("Network error: {0}")]
    Network(String),
    #[error("Session expired, sign in again")]
    Unauthorized,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // Persistence
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Controller misuse
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl WalletError {
    /// Coarse classification used by the controllers before they touch state.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::Prepare(_) => ErrorKind::Prepare,
            WalletError::NotConfirmed => ErrorKind::NotConfirmed,
            WalletError::Creation(_) => ErrorKind::Creation,
            WalletError::Unauthorized => ErrorKind::Unauthorized,
            WalletError::Storage(_) | WalletError::Config(_) => ErrorKind::Storage,
            WalletError::InvalidState(_) => ErrorKind::InvalidState,
            WalletError::Network(_)
            | WalletError::InvalidResponse(_)
            | WalletError::Serialization(_) => ErrorKind::Network,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Network)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Prepare,
    NotConfirmed,
    Creation,
    Network,
    Unauthorized,
    Storage,
    InvalidState,
}

pub type WalletResult<T> = Result<T, WalletError>;

#[macro_export]
macro_rules! wallet_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::WalletError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::WalletError::$variant
    };
}

impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => {
                WalletError::Storage(format!("File not found: {}", error))
            }
            std::io::ErrorKind::PermissionDenied => {
                WalletError::Storage(format!("Permission denied: {}", error))
            }
            _ => WalletError::Storage(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::Serialization(format!("JSON error: {}", error))
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            WalletError::Network("request timed out".to_string())
        } else if error.is_decode() {
            WalletError::InvalidResponse(error.to_string())
        } else {
            WalletError::Network(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_storage() {
        let err: WalletError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked").into();
        assert!(matches!(err, WalletError::Storage(ref msg) if msg.contains("Permission denied")));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[test]
    fn malformed_payloads_are_transient() {
        let err: WalletError = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(err.is_transient());
        assert!(!WalletError::NotConfirmed.is_transient());
        assert!(!wallet_error!(Creation, "declined").is_transient());
    }
}
