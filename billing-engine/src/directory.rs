//! Customer directory port.
//!
//! Invoice creation enriches the stored customer snapshot from this lookup
//! when the request omits a name or billing address.

use async_trait::async_trait;
use engine_core::error::AppError;
use std::collections::HashMap;
use uuid::Uuid;

/// Customer contact and billing details as known to the directory.
#[derive(Debug, Clone)]
pub struct CustomerProfile {
    pub customer_id: Uuid,
    pub name: String,
    pub email: String,
    pub billing_line1: String,
    pub billing_city: String,
    pub billing_postal_code: String,
    pub billing_country: String,
}

/// Read-only customer lookup.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn lookup(&self, customer_id: Uuid) -> Result<Option<CustomerProfile>, AppError>;
}

/// Fixed in-process directory, used in tests and single-tenant deployments.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    profiles: HashMap<Uuid, CustomerProfile>,
}

impl StaticDirectory {
    pub fn new(profiles: Vec<CustomerProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.customer_id, p)).collect(),
        }
    }
}

#[async_trait]
impl CustomerDirectory for StaticDirectory {
    async fn lookup(&self, customer_id: Uuid) -> Result<Option<CustomerProfile>, AppError> {
        Ok(self.profiles.get(&customer_id).cloned())
    }
}
