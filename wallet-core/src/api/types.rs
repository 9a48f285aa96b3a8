use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Wire timestamps above this are milliseconds rather than seconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Convert a backend timestamp (Unix seconds, occasionally milliseconds).
pub fn timestamp_from_wire(value: i64) -> DateTime<Utc> {
    let seconds = if value.unsigned_abs() >= MILLIS_THRESHOLD as u64 {
        value / 1_000
    } else {
        value
    };
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_default()
}

/// Envelope wrapping every backend response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: serde_json::Value,
    #[serde(default)]
    pub message: Option<String>,
    pub status: String,
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data: Some(data),
            errors: serde_json::Value::Object(Default::default()),
            message: None,
            status: "ok".to_string(),
            meta: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Unwrap the payload, yielding the server's message on failure.
    pub fn into_data(self) -> Result<T, String> {
        if !self.is_ok() {
            return Err(self
                .message
                .unwrap_or_else(|| format!("status '{}'", self.status)));
        }
        self.data
            .ok_or_else(|| "response carried no data".to_string())
    }
}

// Login handshake

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrepareAuthData {
    pub login_token: String,
    pub bot_name: String,
    pub expired_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginTokenPayload {
    pub login_token: String,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginAuthData {
    pub access_token: String,
    pub refresh_token: String,
    pub expired_at: i64,
    pub id: i64,
}

impl std::fmt::Debug for LoginAuthData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginAuthData")
            .field("expired_at", &self.expired_at)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

// SBP payments

/// Body of `/pay/sbp/prepare`; the backend expects `qr_url` in snake case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrepareQuoteRequest {
    pub coin: String,
    pub qr_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrepareQuoteData {
    pub fiat_amount: String,
    pub value: String,
    pub updated_at: i64,
    /// Seconds the quote stays valid after `updated_at`.
    pub valid_time: i64,
    pub rate: String,
    pub idempotency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatePaymentRequest {
    pub idempotency: String,
    pub qr_url: String,
    pub coin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentData {
    pub tx_id: String,
    pub fiat_amount: String,
    pub value: String,
    pub state: String,
    pub created_at: i64,
    #[serde(default)]
    pub shop_name: Option<String>,
    #[serde(default)]
    pub mcc: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
    pub status: String,
    #[serde(default)]
    pub tx_hash: Option<String>,
    pub value: String,
    pub fiat_value: String,
    #[serde(default)]
    pub shop_name: Option<String>,
    #[serde(default)]
    pub mcc: Option<String>,
    #[serde(default)]
    pub coin: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

// Read-only account data used by the home and settings screens

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub language_code: String,
    pub hide_balance: bool,
    pub main_currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserMeData {
    pub login: String,
    #[serde(default)]
    pub user_img: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub need_kyc: bool,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default)]
    pub settings: Option<UserSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CoinNetwork {
    pub network: String,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Coin {
    pub name: String,
    pub code: String,
    pub is_available: bool,
    #[serde(default)]
    pub networks: Vec<CoinNetwork>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoinRate {
    pub coin: String,
    pub buy_rate: String,
    pub sell_rate: f64,
    pub ttl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RatesData {
    pub items: Vec<CoinRate>,
}

/// Deposit address issued to the user for one coin on one network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserAddress {
    pub address: String,
    pub network: String,
    pub coin: String,
    pub commission_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountItem {
    pub coin: String,
    pub balance: String,
    pub balance_fiat: String,
    pub network: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountsData {
    pub total_fiat: String,
    pub currency: String,
    pub items: Vec<AccountItem>,
}
