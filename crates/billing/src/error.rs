//! Billing error types

use serde::Serialize;
use thiserror::Error;

use crate::branch::Branch;

/// Result alias used across the billing crate
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors raised by the attach pipeline and its collaborators
#[derive(Debug, Error)]
pub enum BillingError {
    /// Requested product/options are identical to what is already attached
    #[error("Customer already has product {product_id}, can't attach again")]
    AlreadyAttached { product_id: String },

    /// Requested product is already queued to start at the next cycle
    #[error("Product {product_id} is already scheduled")]
    AlreadyScheduled { product_id: String },

    #[error("Cannot attach product {product_id}: {reason}")]
    MultiProductConflict { product_id: String, reason: String },

    #[error("Invalid options for feature {feature_id}: {reason}")]
    InvalidOptions { feature_id: String, reason: String },

    #[error("Action not allowed ({branch}): {reason}")]
    RestrictedCallerAction { branch: Branch, reason: String },

    #[error("Customer is billed through {processor}, attach is not supported")]
    ExternalBillingConflict { processor: String },

    /// Another attach holds the customer lock; safe to retry after backoff
    #[error("Attach already in progress for {lock_key}, please retry")]
    LockContention { lock_key: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Lock backend error: {0}")]
    LockBackend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Execution failed: {0}")]
    Execution(String),
}

impl BillingError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::AlreadyAttached { .. } => "customer_already_has_product",
            BillingError::AlreadyScheduled { .. } => "product_already_scheduled",
            BillingError::MultiProductConflict { .. } => "multi_product_conflict",
            BillingError::InvalidOptions { .. } => "invalid_options",
            BillingError::RestrictedCallerAction { .. } => "restricted_caller_action",
            BillingError::ExternalBillingConflict { .. } => "external_billing_conflict",
            BillingError::LockContention { .. } => "attach_in_progress",
            BillingError::InvalidRequest(_) => "invalid_request",
            BillingError::NotFound(_) => "not_found",
            BillingError::Database(_) => "database_error",
            BillingError::LockBackend(_) => "lock_backend_error",
            BillingError::Config(_) => "config_error",
            BillingError::Execution(_) => "execution_failed",
        }
    }

    /// The request field the error is about, when there is one
    pub fn field(&self) -> Option<String> {
        match self {
            BillingError::AlreadyAttached { product_id }
            | BillingError::AlreadyScheduled { product_id }
            | BillingError::MultiProductConflict { product_id, .. } => {
                Some(format!("product_id:{}", product_id))
            }
            BillingError::InvalidOptions { feature_id, .. } => {
                Some(format!("options.{}", feature_id))
            }
            BillingError::RestrictedCallerAction { branch, .. } => {
                Some(format!("branch:{}", branch))
            }
            BillingError::ExternalBillingConflict { processor } => {
                Some(format!("processor:{}", processor))
            }
            BillingError::LockContention { lock_key } => Some(lock_key.clone()),
            _ => None,
        }
    }

    /// Only lock contention is worth retrying; everything else needs a changed request
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::LockContention { .. })
    }

    /// HTTP-style status a handler should map this error to
    pub fn status_code(&self) -> u16 {
        match self {
            BillingError::LockContention { .. } => 409,
            BillingError::NotFound(_) => 404,
            BillingError::Database(_)
            | BillingError::LockBackend(_)
            | BillingError::Config(_)
            | BillingError::Execution(_) => 500,
            _ => 400,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
            field: self.field(),
            retryable: self.is_retryable(),
        }
    }
}

/// Serializable error shape for rendering to callers
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub retryable: bool,
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for BillingError {
    fn from(err: redis::RedisError) -> Self {
        BillingError::LockBackend(err.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(err: serde_json::Error) -> Self {
        BillingError::Database(format!("Invalid stored JSON: {}", err))
    }
}
