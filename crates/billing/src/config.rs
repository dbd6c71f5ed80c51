//! Attach engine configuration
//!
//! Read once from the environment (`.env` honored). Everything has a
//! default, so an empty environment yields a working in-memory setup.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{BillingError, BillingResult};
use crate::lock::{InMemoryLockStore, LockStore, DEFAULT_LOCK_TTL, LOCAL_LOCK_TTL};
use crate::redis_lock::RedisLockStore;

/// Deployment tier the service runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployEnv {
    Local,
    Development,
    Staging,
    #[default]
    Production,
}

impl DeployEnv {
    pub fn is_local_or_dev(&self) -> bool {
        matches!(self, DeployEnv::Local | DeployEnv::Development)
    }

    /// Lock TTL used when none is configured explicitly
    pub fn default_lock_ttl(&self) -> Duration {
        if self.is_local_or_dev() {
            LOCAL_LOCK_TTL
        } else {
            DEFAULT_LOCK_TTL
        }
    }
}

impl FromStr for DeployEnv {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(DeployEnv::Local),
            "dev" | "development" => Ok(DeployEnv::Development),
            "staging" => Ok(DeployEnv::Staging),
            "prod" | "production" => Ok(DeployEnv::Production),
            other => Err(BillingError::Config(format!("unknown DEPLOY_ENV '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttachConfig {
    pub deploy_env: DeployEnv,
    pub lock_ttl: Duration,
    /// Shared lock backend; in-memory locks when unset
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
}

impl Default for AttachConfig {
    fn default() -> Self {
        Self {
            deploy_env: DeployEnv::default(),
            lock_ttl: DeployEnv::default().default_lock_ttl(),
            redis_url: None,
            database_url: None,
        }
    }
}

impl AttachConfig {
    /// Load from process environment, after applying `.env` if present
    pub fn from_env() -> BillingResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> BillingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let deploy_env = match non_empty("DEPLOY_ENV") {
            Some(value) => value.parse()?,
            None => DeployEnv::default(),
        };

        let lock_ttl = match non_empty("ATTACH_LOCK_TTL_MS") {
            Some(value) => {
                let ms: u64 = value.parse().map_err(|_| {
                    BillingError::Config(format!("ATTACH_LOCK_TTL_MS must be milliseconds, got '{}'", value))
                })?;
                if ms == 0 {
                    return Err(BillingError::Config(
                        "ATTACH_LOCK_TTL_MS must be greater than zero".to_string(),
                    ));
                }
                Duration::from_millis(ms)
            }
            None => deploy_env.default_lock_ttl(),
        };

        Ok(Self {
            deploy_env,
            lock_ttl,
            redis_url: non_empty("REDIS_URL"),
            database_url: non_empty("DATABASE_URL"),
        })
    }

    /// Build the configured lock backend
    pub async fn lock_store(&self) -> BillingResult<Arc<dyn LockStore>> {
        match &self.redis_url {
            Some(url) => {
                let store = RedisLockStore::connect(url).await?;
                Ok(Arc::new(store))
            }
            None => {
                if !self.deploy_env.is_local_or_dev() {
                    tracing::warn!("REDIS_URL not set, attach locks are process-local");
                }
                Ok(Arc::new(InMemoryLockStore::new()))
            }
        }
    }
}
