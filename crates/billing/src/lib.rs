// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError::RestrictedCallerAction carries the branch and a reason
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tollgate Billing Module
//!
//! Attach resolution for recurring billing: given a customer's attached
//! products and a candidate product, decide what kind of transition the
//! request is and which execution function carries it out.
//!
//! ## Pipeline
//!
//! - **Snapshot**: current main, same, and scheduled products for the candidate
//! - **Classification**: one [`Branch`] per request, first matching rule wins
//! - **Config**: checkout routing, proration, trial and usage carry-over
//! - **Dispatch**: exhaustive branch to [`ExecutionFunction`] table
//! - **Validation**: caller restrictions, external billing, option rules
//! - **Locking**: one attach per customer at a time, in memory or on Redis

pub mod branch;
pub mod comparator;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod invariants;
pub mod lock;
pub mod options;
pub mod postgres;
pub mod redis_lock;
pub mod request;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod validation;

#[cfg(test)]
mod test_support;

// Classification
pub use branch::{check_multi_product, resolve_branch, Branch};
pub use comparator::{IntervalPriceComparator, PriceComparator};
pub use snapshot::ProductSnapshot;

// Request
pub use options::normalize_options;
pub use request::{AttachFlags, AttachRequest, CandidateRequest};

// Config and dispatch
pub use dispatch::{dispatch_function, ExecutionFunction};
pub use execution::{derive_config, BillingPolicy, ExecutionConfig, ProrationMode};
pub use validation::validate;

// Errors
pub use error::{BillingError, BillingResult, ErrorBody};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Locking
pub use lock::{
    CustomerLock, InMemoryLockStore, LockKey, LockStore, DEFAULT_LOCK_TTL, LOCAL_LOCK_TTL,
};
pub use redis_lock::RedisLockStore;

// Stores
pub use postgres::PgCustomerStore;
pub use store::{BillingPolicyProvider, CustomerProductReader, InMemoryCustomerStore, StaticBillingPolicy};

// Service
pub use config::{AttachConfig, DeployEnv};
pub use service::{
    AttachDecision, AttachExecutor, AttachPlan, AttachResponse, AttachService, ExecutionOutcome,
};

use std::sync::Arc;

/// Attach engine wired from configuration
///
/// Uses Postgres for customer reads and billing policy, and the configured
/// lock backend. Callers supply the executor that talks to the processor.
pub struct BillingEngine {
    pub config: AttachConfig,
    pub attach: AttachService,
}

impl BillingEngine {
    pub async fn from_config(
        config: AttachConfig,
        executor: Arc<dyn AttachExecutor>,
    ) -> BillingResult<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| BillingError::Config("DATABASE_URL must be set".to_string()))?;

        let store = Arc::new(PgCustomerStore::connect(database_url).await?);
        let lock = CustomerLock::new(config.lock_store().await?, config.lock_ttl);
        let attach = AttachService::new(store.clone(), store, executor, lock);

        tracing::info!(
            deploy_env = ?config.deploy_env,
            lock_ttl_ms = config.lock_ttl.as_millis() as u64,
            shared_locks = config.redis_url.is_some(),
            "Billing engine initialized"
        );

        Ok(Self { config, attach })
    }
}
