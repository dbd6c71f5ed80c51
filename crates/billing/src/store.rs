//! Read-side collaborators of the attach pipeline
//!
//! The pipeline never writes customer state itself; it reads a fresh
//! [`Customer`] after taking the lock and hands mutations to the executor.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tollgate_shared::{AppEnv, Customer};

use crate::error::{BillingError, BillingResult};
use crate::execution::BillingPolicy;

/// Loads a customer and its attached products
#[async_trait]
pub trait CustomerProductReader: Send + Sync {
    /// When `entity_id` is given only customer-level products and that
    /// entity's products are returned.
    async fn read_customer(
        &self,
        org_id: &str,
        env: AppEnv,
        customer_id: &str,
        entity_id: Option<&str>,
    ) -> BillingResult<Customer>;
}

/// Per-organization billing behavior
#[async_trait]
pub trait BillingPolicyProvider: Send + Sync {
    async fn billing_policy(&self, org_id: &str) -> BillingResult<BillingPolicy>;
}

type CustomerKey = (String, AppEnv, String);

/// Customer store held in memory, used by tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryCustomerStore {
    customers: RwLock<HashMap<CustomerKey, Customer>>,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, customer: Customer) {
        let key = (customer.org_id.clone(), customer.env, customer.id.clone());
        self.customers.write().await.insert(key, customer);
    }
}

#[async_trait]
impl CustomerProductReader for InMemoryCustomerStore {
    async fn read_customer(
        &self,
        org_id: &str,
        env: AppEnv,
        customer_id: &str,
        entity_id: Option<&str>,
    ) -> BillingResult<Customer> {
        let key = (org_id.to_string(), env, customer_id.to_string());
        let customer = self
            .customers
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(format!("Customer {}", customer_id)))?;

        Ok(customer.scope_to_entity(entity_id))
    }
}

/// Fixed policy, optionally overridden per organization
#[derive(Debug, Clone, Default)]
pub struct StaticBillingPolicy {
    default: BillingPolicy,
    overrides: HashMap<String, BillingPolicy>,
}

impl StaticBillingPolicy {
    pub fn new(default: BillingPolicy) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn with_override(mut self, org_id: impl Into<String>, policy: BillingPolicy) -> Self {
        self.overrides.insert(org_id.into(), policy);
        self
    }
}

#[async_trait]
impl BillingPolicyProvider for StaticBillingPolicy {
    async fn billing_policy(&self, org_id: &str) -> BillingResult<BillingPolicy> {
        Ok(self.overrides.get(org_id).copied().unwrap_or(self.default))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use tollgate_shared::{CusProductStatus, ProcessorType};

    #[tokio::test]
    async fn test_in_memory_read() {
        let store = InMemoryCustomerStore::new();
        let pro = product("pro", vec![monthly_price("pro", 2000)]);
        store
            .insert(customer(vec![attached(&pro, CusProductStatus::Active, 1)]))
            .await;

        let found = store
            .read_customer("org_1", AppEnv::Live, "cus_1", None)
            .await
            .unwrap();
        assert_eq!(found.products.len(), 1);

        let err = store
            .read_customer("org_1", AppEnv::Sandbox, "cus_1", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_entity_scoping() {
        let store = InMemoryCustomerStore::new();
        let pro = product("pro", vec![monthly_price("pro", 2000)]);
        let customer_level = attached(&pro, CusProductStatus::Active, 1);
        let mut seat_a = attached(&pro, CusProductStatus::Active, 2);
        seat_a.entity_id = Some("seat_a".to_string());
        let mut seat_b = attached(&pro, CusProductStatus::Active, 3);
        seat_b.entity_id = Some("seat_b".to_string());
        seat_b.processor = ProcessorType::RevenueCat;
        store.insert(customer(vec![customer_level, seat_a, seat_b])).await;

        let all = store
            .read_customer("org_1", AppEnv::Live, "cus_1", None)
            .await
            .unwrap();
        assert_eq!(all.products.len(), 3);

        let scoped = store
            .read_customer("org_1", AppEnv::Live, "cus_1", Some("seat_a"))
            .await
            .unwrap();
        let ids: Vec<&str> = scoped.products.iter().map(|cp| cp.id.as_str()).collect();
        assert_eq!(ids, vec!["cp_pro_1", "cp_pro_2"]);
        // Scoped out, but still billed elsewhere for the whole customer
        assert_eq!(scoped.external_processor, Some(ProcessorType::RevenueCat));
    }

    #[tokio::test]
    async fn test_static_policy_overrides() {
        let policy = StaticBillingPolicy::default().with_override(
            "org_2",
            BillingPolicy {
                bill_immediately: false,
                prorate: true,
            },
        );
        assert!(policy.billing_policy("org_1").await.unwrap().bill_immediately);
        assert!(!policy.billing_policy("org_2").await.unwrap().bill_immediately);
    }
}
