//! Per-customer attach lock
//!
//! At most one attach pipeline runs per (org, env, customer) at a time.
//! Holders are identified by a random token so a holder whose TTL lapsed
//! cannot release a lock that someone else has since taken. A second
//! request fails fast with [`BillingError::LockContention`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tollgate_shared::AppEnv;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Lock TTL outside local/dev deployments
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(60);

/// Lock TTL for local/dev deployments
pub const LOCAL_LOCK_TTL: Duration = Duration::from_secs(10);

/// Key identifying one customer's attach lock
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey(String);

impl LockKey {
    /// Ids are escaped so a `:` inside one can never line up with a separator
    pub fn for_customer(org_id: &str, env: AppEnv, customer_id: &str) -> Self {
        Self(format!(
            "attach:{}:{}:{}",
            escape_component(org_id),
            env,
            escape_component(customer_id)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn escape_component(id: &str) -> String {
    id.replace('%', "%25").replace(':', "%3A")
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend holding lock entries
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take the lock for `ttl` unless someone else holds it. Returns whether it was taken.
    async fn acquire(&self, key: &LockKey, token: &str, ttl: Duration) -> BillingResult<bool>;

    /// Remove the lock if (and only if) it is still held with `token`
    async fn release(&self, key: &LockKey, token: &str) -> BillingResult<()>;
}

/// Process-local lock store; expired entries are pruned on every acquire
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries
    pub async fn held_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn acquire(&self, key: &LockKey, token: &str, ttl: Duration) -> BillingResult<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);

        if entries.contains_key(key.as_str()) {
            return Ok(false);
        }

        entries.insert(key.as_str().to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &LockKey, token: &str) -> BillingResult<()> {
        let mut entries = self.entries.lock().await;
        if entries
            .get(key.as_str())
            .map(|(holder, _)| holder == token)
            .unwrap_or(false)
        {
            entries.remove(key.as_str());
        }
        Ok(())
    }
}

/// Scoped per-customer lock
#[derive(Clone)]
pub struct CustomerLock {
    store: Arc<dyn LockStore>,
    ttl: Duration,
}

impl CustomerLock {
    pub fn new(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// In-memory lock with the default TTL
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLockStore::new()), DEFAULT_LOCK_TTL)
    }

    /// TTL used by callers that do not pick one
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Run `f` while holding the customer's lock
    ///
    /// The lock is released when `f` completes, whether it succeeded or not.
    /// If the returned future is dropped early (or `f` panics) the release is
    /// spawned on the current runtime; otherwise the TTL reclaims it.
    pub async fn with_customer_lock<F, Fut, T>(
        &self,
        org_id: &str,
        env: AppEnv,
        customer_id: &str,
        ttl: Duration,
        f: F,
    ) -> BillingResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BillingResult<T>>,
    {
        let key = LockKey::for_customer(org_id, env, customer_id);
        let token = Uuid::new_v4().to_string();

        if !self.store.acquire(&key, &token, ttl).await? {
            tracing::warn!(
                org_id = %org_id,
                customer_id = %customer_id,
                lock_key = %key,
                "Attach already in progress for customer"
            );
            return Err(BillingError::LockContention {
                lock_key: key.to_string(),
            });
        }

        tracing::debug!(lock_key = %key, ttl_ms = ttl.as_millis() as u64, "Acquired attach lock");

        let mut guard = LockGuard {
            store: Arc::clone(&self.store),
            key,
            token,
            released: false,
        };

        let result = f().await;
        guard.release().await;
        result
    }
}

/// Releases the lock if the holder never got to do it
struct LockGuard {
    store: Arc<dyn LockStore>,
    key: LockKey,
    token: String,
    released: bool,
}

impl LockGuard {
    async fn release(&mut self) {
        if let Err(e) = self.store.release(&self.key, &self.token).await {
            tracing::warn!(
                lock_key = %self.key,
                error = %e,
                "Failed to release attach lock, it will expire after its TTL"
            );
        }
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let token = std::mem::take(&mut self.token);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.release(&key, &token).await {
                        tracing::warn!(lock_key = %key, error = %e, "Deferred attach lock release failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(lock_key = %key, "No runtime to release attach lock, waiting for TTL");
            }
        }
    }
}
