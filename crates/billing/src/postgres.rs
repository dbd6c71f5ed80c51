//! Postgres adapters for customer reads and billing policy
//!
//! Product snapshots are stored as JSONB on each customer product row, so
//! a customer product always describes the prices it was attached with even
//! after the catalog moves on.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tollgate_shared::{
    AppEnv, CusProductStatus, Customer, CustomerProduct, FeatureOptions, FreeTrial,
    ProcessorType, Product,
};

use crate::error::{BillingError, BillingResult};
use crate::execution::BillingPolicy;
use crate::store::{BillingPolicyProvider, CustomerProductReader};

#[derive(Debug, Clone)]
pub struct PgCustomerStore {
    pool: PgPool,
}

impl PgCustomerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> BillingResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Apply the crate's schema migrations
    pub async fn migrate(&self) -> BillingResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BillingError::Database(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct CustomerRow {
    id: String,
    internal_id: String,
    org_id: String,
    billing_managed_externally: bool,
}

#[derive(Debug, FromRow)]
struct CustomerProductRow {
    id: String,
    product: Json<Product>,
    entity_id: Option<String>,
    status: String,
    canceled: bool,
    processor: String,
    subscription_ids: Vec<String>,
    scheduled_ids: Vec<String>,
    options: Json<Vec<FeatureOptions>>,
    free_trial: Option<Json<FreeTrial>>,
    starts_at: OffsetDateTime,
    created_at: OffsetDateTime,
}

impl TryFrom<CustomerProductRow> for CustomerProduct {
    type Error = BillingError;

    fn try_from(row: CustomerProductRow) -> Result<Self, Self::Error> {
        let status: CusProductStatus = row
            .status
            .parse()
            .map_err(|e: tollgate_shared::ParseEnumError| BillingError::Database(e.to_string()))?;
        let processor: ProcessorType = row
            .processor
            .parse()
            .map_err(|e: tollgate_shared::ParseEnumError| BillingError::Database(e.to_string()))?;

        Ok(CustomerProduct {
            id: row.id,
            product: row.product.0,
            entity_id: row.entity_id,
            status,
            canceled: row.canceled,
            processor,
            subscription_ids: row.subscription_ids,
            scheduled_ids: row.scheduled_ids,
            options: row.options.0,
            free_trial: row.free_trial.map(|t| t.0),
            starts_at: row.starts_at,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl CustomerProductReader for PgCustomerStore {
    async fn read_customer(
        &self,
        org_id: &str,
        env: AppEnv,
        customer_id: &str,
        entity_id: Option<&str>,
    ) -> BillingResult<Customer> {
        let row: Option<CustomerRow> = sqlx::query_as(
            r#"
            SELECT id, internal_id, org_id, billing_managed_externally
            FROM customers
            WHERE org_id = $1 AND env = $2 AND id = $3
            "#,
        )
        .bind(org_id)
        .bind(env.as_str())
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        let customer =
            row.ok_or_else(|| BillingError::NotFound(format!("Customer {}", customer_id)))?;

        // Expired instances never take part in an attach decision. Every
        // entity is loaded so customer-wide checks see all live products.
        let product_rows: Vec<CustomerProductRow> = sqlx::query_as(
            r#"
            SELECT id, product, entity_id, status, canceled, processor,
                   subscription_ids, scheduled_ids, options, free_trial,
                   starts_at, created_at
            FROM customer_products
            WHERE internal_customer_id = $1
              AND status <> 'expired'
            ORDER BY created_at DESC
            "#,
        )
        .bind(&customer.internal_id)
        .fetch_all(&self.pool)
        .await?;

        let products = product_rows
            .into_iter()
            .map(CustomerProduct::try_from)
            .collect::<BillingResult<Vec<_>>>()?;

        tracing::debug!(
            org_id = %org_id,
            customer_id = %customer_id,
            product_count = products.len(),
            "Loaded customer products"
        );

        Ok(Customer {
            id: customer.id,
            internal_id: customer.internal_id,
            org_id: customer.org_id,
            env,
            billing_managed_externally: customer.billing_managed_externally,
            external_processor: None,
            products,
        }
        .scope_to_entity(entity_id))
    }
}

#[async_trait]
impl BillingPolicyProvider for PgCustomerStore {
    async fn billing_policy(&self, org_id: &str) -> BillingResult<BillingPolicy> {
        let row: Option<(bool, bool)> = sqlx::query_as(
            "SELECT bill_immediately, prorate FROM org_billing_policies WHERE org_id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|(bill_immediately, prorate)| BillingPolicy {
                bill_immediately,
                prorate,
            })
            .unwrap_or_default())
    }
}
