//! Audit trail access.
//!
//! State-changing services write their audit rows atomically through the
//! store's compound methods; this component covers standalone entries and
//! trail reads.

use crate::models::{AuditEntityType, AuditEntry};
use crate::store::BillingStore;
use engine_core::error::AppError;
use std::sync::Arc;
use tracing::instrument;

#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn BillingStore>,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Append one immutable audit row.
    #[instrument(skip(self, details))]
    pub async fn record(
        &self,
        entity_type: AuditEntityType,
        entity_id: &str,
        action: &str,
        details: String,
        performed_by: &str,
    ) -> Result<AuditEntry, AppError> {
        let entry = AuditEntry::new(entity_type, entity_id, action, details, performed_by);
        self.store.append_audit(&entry).await?;
        Ok(entry)
    }

    /// Full audit history for an entity, oldest first.
    pub async fn trail(&self, entity_id: &str) -> Result<Vec<AuditEntry>, AppError> {
        self.store.audit_trail(entity_id).await
    }
}
