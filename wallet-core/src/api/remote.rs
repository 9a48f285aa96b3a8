use async_trait::async_trait;

use super::types::{
    CreatePaymentData, CreatePaymentRequest, LoginAuthData, PrepareAuthData, PrepareQuoteData,
    PrepareQuoteRequest, TransactionData,
};
use crate::errors::WalletResult;

/// The five backend operations the orchestration layer depends on.
///
/// Implementations classify their own failures: `prepare` fails with
/// `Prepare`, `login` reports an unconfirmed token as `NotConfirmed`,
/// `create_payment` fails with `Creation`, and the quote and status calls
/// fail with `Network`. Any call may also yield `Unauthorized`.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn prepare(&self) -> WalletResult<PrepareAuthData>;

    async fn login(&self, login_token: &str) -> WalletResult<LoginAuthData>;

    async fn prepare_quote(&self, request: &PrepareQuoteRequest) -> WalletResult<PrepareQuoteData>;

    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> WalletResult<CreatePaymentData>;

    async fn get_transaction_status(&self, tx_id: &str) -> WalletResult<TransactionData>;
}
