//! Immutable audit trail model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Entity kinds referenced by audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntityType {
    Invoice,
    Payment,
    Dispute,
    Credit,
    Subscription,
}

impl AuditEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntityType::Invoice => "invoice",
            AuditEntityType::Payment => "payment",
            AuditEntityType::Dispute => "dispute",
            AuditEntityType::Credit => "credit",
            AuditEntityType::Subscription => "subscription",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "payment" => AuditEntityType::Payment,
            "dispute" => AuditEntityType::Dispute,
            "credit" => AuditEntityType::Credit,
            "subscription" => AuditEntityType::Subscription,
            _ => AuditEntityType::Invoice,
        }
    }
}

/// Append-only audit row; never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub audit_id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub details: String,
    pub performed_by: String,
    pub created_utc: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_type: AuditEntityType,
        entity_id: impl Into<String>,
        action: &str,
        details: impl Into<String>,
        performed_by: &str,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            entity_type: entity_type.as_str().to_string(),
            entity_id: entity_id.into(),
            action: action.to_string(),
            details: details.into(),
            performed_by: performed_by.to_string(),
            created_utc: Utc::now(),
        }
    }
}
