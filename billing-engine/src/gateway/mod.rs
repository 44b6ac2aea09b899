//! Payment gateway port.
//!
//! Automatic payments leave the engine through this trait. A gateway failure
//! never settles an invoice; the processor records the failed attempt and
//! surfaces the error to the caller.

use async_trait::async_trait;
use engine_core::error::AppError;
use rust_decimal::Decimal;

mod http;

pub use http::{GatewayConfig, HttpGateway};

/// Successful charge acknowledgement from the gateway.
#[derive(Debug, Clone)]
pub struct GatewayCharge {
    /// Gateway-side transaction identifier.
    pub transaction_id: String,
}

/// External payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge the customer for `amount` against the given invoice.
    ///
    /// Returns `AppError::Gateway` on decline, transport failure, or any
    /// response the gateway cannot vouch for.
    async fn charge(
        &self,
        invoice_number: &str,
        amount: Decimal,
        currency: &str,
    ) -> Result<GatewayCharge, AppError>;
}
