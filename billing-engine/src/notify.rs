//! Outbound billing notifications.
//!
//! Invoice issuance and full settlement emit events through this trait.
//! Delivery is best-effort; the ledger ignores notifier failures so a flaky
//! mail relay cannot roll back a committed settlement.

use async_trait::async_trait;
use engine_core::error::AppError;

/// Sink for customer-facing billing events.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(&self, event: &str, payload: serde_json::Value) -> Result<(), AppError>;
}

/// Notifier that writes events to the structured log.
///
/// Default wiring for environments without a delivery channel.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn notify(&self, event: &str, payload: serde_json::Value) -> Result<(), AppError> {
        tracing::info!(event = %event, payload = %payload, "Billing notification");
        Ok(())
    }
}
