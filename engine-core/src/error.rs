use thiserror::Error;

/// Error taxonomy for the billing engine.
///
/// Every rejected operation leaves all entities in their pre-call state;
/// callers may retry only where `is_retryable` says so.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid input: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Invalid state: {0}")]
    InvalidState(anyhow::Error),

    #[error("Overpayment: {0}")]
    Overpayment(anyhow::Error),

    #[error("No pricing tier found: {0}")]
    NoTierFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Payment gateway error: {0}")]
    Gateway(anyhow::Error),

    #[error("Audit persistence failed: {0}")]
    AuditPersistence(anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the caller may retry the operation (with backoff).
    ///
    /// Gateway failures are transient; a `Conflict` means an optimistic
    /// version check lost a race and the read-compute-write can be redone.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Gateway(_) | AppError::Conflict(_))
    }

    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Overpayment(_) => "overpayment",
            AppError::NoTierFound(_) => "no_tier_found",
            AppError::Conflict(_) => "conflict",
            AppError::Gateway(_) => "gateway",
            AppError::AuditPersistence(_) => "audit_persistence",
            AppError::DatabaseError(_) => "database",
            AppError::ConfigError(_) => "config",
            AppError::InternalError(_) => "internal",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}
