//! Attach service
//!
//! Runs the whole attach pipeline for one request:
//!
//! 1. Take the per-customer lock
//! 2. Read a fresh customer snapshot and check its invariants
//! 3. Normalize options, classify, derive config, validate
//! 4. Dispatch to the execution function and hand off to the executor
//!
//! Everything before step 4 is read-only, so a rejected request leaves no
//! trace. `preview` runs steps 2-3 without the lock or the executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_shared::{AppEnv, Customer};

use crate::branch::{resolve_branch, Branch};
use crate::comparator::{IntervalPriceComparator, PriceComparator};
use crate::dispatch::{dispatch_function, ExecutionFunction};
use crate::error::BillingResult;
use crate::execution::{derive_config, ExecutionConfig};
use crate::invariants::InvariantChecker;
use crate::lock::CustomerLock;
use crate::options::normalize_options;
use crate::request::{AttachFlags, AttachRequest, CandidateRequest};
use crate::store::{BillingPolicyProvider, CustomerProductReader};
use crate::validation::validate;

/// Everything an execution function needs to carry out an attach
#[derive(Debug, Clone, Serialize)]
pub struct AttachPlan {
    pub org_id: String,
    pub env: AppEnv,
    pub customer: Customer,
    /// Candidate with options converted to billing-unit packs
    pub candidate: CandidateRequest,
    pub flags: AttachFlags,
    pub branch: Branch,
    pub config: ExecutionConfig,
    pub function: ExecutionFunction,
}

impl AttachPlan {
    pub fn decision(&self) -> AttachDecision {
        AttachDecision {
            branch: self.branch,
            config: self.config,
            function: self.function,
        }
    }
}

/// What the pipeline decided for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachDecision {
    pub branch: Branch,
    pub config: ExecutionConfig,
    pub function: ExecutionFunction,
}

/// Result reported by an execution function
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Hosted checkout to redirect the customer to, for `CreateCheckout`
    pub checkout_url: Option<String>,
    /// Customer product instances created or modified
    pub customer_product_ids: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachResponse {
    pub decision: AttachDecision,
    pub outcome: ExecutionOutcome,
}

/// Side-effecting execution functions (processor calls, product writes)
#[async_trait]
pub trait AttachExecutor: Send + Sync {
    async fn execute(
        &self,
        function: ExecutionFunction,
        plan: &AttachPlan,
    ) -> BillingResult<ExecutionOutcome>;
}

/// Attach pipeline with its collaborators
#[derive(Clone)]
pub struct AttachService {
    customers: Arc<dyn CustomerProductReader>,
    policies: Arc<dyn BillingPolicyProvider>,
    comparator: Arc<dyn PriceComparator>,
    executor: Arc<dyn AttachExecutor>,
    lock: CustomerLock,
    invariants: InvariantChecker,
}

impl AttachService {
    pub fn new(
        customers: Arc<dyn CustomerProductReader>,
        policies: Arc<dyn BillingPolicyProvider>,
        executor: Arc<dyn AttachExecutor>,
        lock: CustomerLock,
    ) -> Self {
        Self {
            customers,
            policies,
            comparator: Arc::new(IntervalPriceComparator::default()),
            executor,
            lock,
            invariants: InvariantChecker::new(),
        }
    }

    /// Replace the default interval comparator
    pub fn with_comparator(mut self, comparator: Arc<dyn PriceComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    /// Attach the candidate to the customer
    pub async fn attach(&self, request: AttachRequest) -> BillingResult<AttachResponse> {
        tracing::info!(
            org_id = %request.org_id,
            env = %request.env,
            customer_id = %request.customer_id,
            product_ids = ?request.candidate.product_ids(),
            "Attach requested"
        );

        self.lock
            .with_customer_lock(
                &request.org_id,
                request.env,
                &request.customer_id,
                self.lock.ttl(),
                || async {
                    let plan = self.plan(&request, false).await?;

                    let outcome = match self.executor.execute(plan.function, &plan).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            tracing::error!(
                                org_id = %plan.org_id,
                                customer_id = %plan.customer.id,
                                branch = %plan.branch,
                                function = %plan.function,
                                error = %e,
                                "Attach execution failed"
                            );
                            return Err(e);
                        }
                    };

                    tracing::info!(
                        org_id = %plan.org_id,
                        customer_id = %plan.customer.id,
                        branch = %plan.branch,
                        function = %plan.function,
                        "Attach completed"
                    );

                    Ok(AttachResponse {
                        decision: plan.decision(),
                        outcome,
                    })
                },
            )
            .await
    }

    /// Decide what an attach would do, without locking or executing
    pub async fn preview(&self, request: &AttachRequest) -> BillingResult<AttachDecision> {
        let plan = self.plan(request, true).await?;
        Ok(plan.decision())
    }

    async fn plan(&self, request: &AttachRequest, from_preview: bool) -> BillingResult<AttachPlan> {
        let customer = self
            .customers
            .read_customer(
                &request.org_id,
                request.env,
                &request.customer_id,
                request.candidate.entity_id.as_deref(),
            )
            .await?;

        let summary = self.invariants.check_customer_products(&customer.products);
        if !summary.healthy {
            self.invariants
                .log_violations(&request.org_id, &customer.id, &summary);
        }

        let options = normalize_options(&request.candidate.options, &request.candidate.prices)?;
        let candidate = request.candidate.clone().with_options(options);

        let branch = resolve_branch(
            &customer.products,
            &candidate,
            self.comparator.as_ref(),
            from_preview,
        )?;
        let policy = self.policies.billing_policy(&request.org_id).await?;
        let config = derive_config(&request.flags, branch, &policy);

        validate(branch, &config, &request.flags, &customer, &candidate)?;

        let function = dispatch_function(branch, &config);

        tracing::info!(
            org_id = %request.org_id,
            customer_id = %customer.id,
            branch = %branch,
            function = %function,
            only_checkout = config.only_checkout,
            from_preview,
            "Resolved attach branch"
        );

        Ok(AttachPlan {
            org_id: request.org_id.clone(),
            env: request.env,
            customer,
            candidate,
            flags: request.flags,
            branch,
            config,
            function,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BillingError;
    use crate::execution::BillingPolicy;
    use crate::lock::InMemoryLockStore;
    use crate::store::{InMemoryCustomerStore, StaticBillingPolicy};
    use crate::test_support::*;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use tollgate_shared::{CusProductStatus, CustomerProduct, FeatureOptions, ProcessorType, Product};

    /// Records every call; optionally fails or stalls
    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(ExecutionFunction, AttachPlan)>>,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl AttachExecutor for RecordingExecutor {
        async fn execute(
            &self,
            function: ExecutionFunction,
            plan: &AttachPlan,
        ) -> BillingResult<ExecutionOutcome> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().await.push((function, plan.clone()));
            if self.fail {
                return Err(BillingError::Execution("processor unavailable".to_string()));
            }
            Ok(ExecutionOutcome {
                checkout_url: (function == ExecutionFunction::CreateCheckout)
                    .then(|| "https://checkout.test/session".to_string()),
                customer_product_ids: vec!["cp_new".to_string()],
                message: function.to_string(),
            })
        }
    }

    async fn service_with(
        products: Vec<CustomerProduct>,
        executor: Arc<RecordingExecutor>,
    ) -> AttachService {
        let store = InMemoryCustomerStore::new();
        store.insert(customer(products)).await;
        AttachService::new(
            Arc::new(store),
            Arc::new(StaticBillingPolicy::new(BillingPolicy::default())),
            executor,
            CustomerLock::new(Arc::new(InMemoryLockStore::new()), Duration::from_secs(60)),
        )
    }

    fn request(candidate: CandidateRequest) -> AttachRequest {
        AttachRequest::new("org_1", AppEnv::Live, "cus_1", candidate)
    }

    fn pro() -> Product {
        product("pro", vec![monthly_price("pro", 2000)])
    }

    fn basic() -> Product {
        product("basic", vec![monthly_price("basic", 900)])
    }

    #[tokio::test]
    async fn test_pro_to_basic_schedules_downgrade() {
        let executor = Arc::new(RecordingExecutor::default());
        let service =
            service_with(vec![attached(&pro(), CusProductStatus::Active, 1)], executor.clone()).await;

        let response = service
            .attach(request(CandidateRequest::for_product(basic())))
            .await
            .unwrap();
        assert_eq!(response.decision.branch, Branch::Downgrade);
        assert_eq!(response.decision.function, ExecutionFunction::ScheduleProduct);
        assert_eq!(executor.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_new_plan_without_payment_method_goes_to_checkout() {
        let executor = Arc::new(RecordingExecutor::default());
        let service = service_with(vec![], executor.clone()).await;

        let response = service
            .attach(request(CandidateRequest::for_product(pro())).with_flags(AttachFlags {
                no_payment_method: true,
                ..AttachFlags::default()
            }))
            .await
            .unwrap();
        assert_eq!(response.decision.branch, Branch::New);
        assert!(response.decision.config.only_checkout);
        assert_eq!(response.decision.function, ExecutionFunction::CreateCheckout);
        assert!(response.outcome.checkout_url.is_some());
    }

    #[tokio::test]
    async fn test_new_version_updates_product_without_trial() {
        let executor = Arc::new(RecordingExecutor::default());
        let service =
            service_with(vec![attached(&pro(), CusProductStatus::Active, 1)], executor).await;

        let mut pro_v2 = pro();
        pro_v2.version = 2;
        let response = service
            .attach(request(CandidateRequest::for_product(pro_v2)))
            .await
            .unwrap();
        assert_eq!(response.decision.branch, Branch::NewVersion);
        assert_eq!(response.decision.function, ExecutionFunction::UpdateProduct);
        assert!(response.decision.config.disable_trial);
    }

    #[tokio::test]
    async fn test_prepaid_quantity_is_normalized_and_updated() {
        let plan_product = product("usage_plan", vec![prepaid_price("credits", 1000, 100)]);
        let mut current = attached(&plan_product, CusProductStatus::Active, 1);
        current.options = vec![FeatureOptions::quantity("credits", 5)];

        let executor = Arc::new(RecordingExecutor::default());
        let service = service_with(vec![current], executor.clone()).await;

        // 1000 units at 100 per pack = 10 packs
        let candidate = CandidateRequest::for_product(plan_product)
            .with_options(vec![FeatureOptions::quantity("credits", 1000)]);
        let response = service.attach(request(candidate)).await.unwrap();
        assert_eq!(response.decision.branch, Branch::UpdatePrepaidQuantity);

        let calls = executor.calls.lock().await;
        assert_eq!(calls[0].1.candidate.options[0].quantity, Some(10));
    }

    #[tokio::test]
    async fn test_identical_request_never_executes() {
        let executor = Arc::new(RecordingExecutor::default());
        let service =
            service_with(vec![attached(&pro(), CusProductStatus::Active, 1)], executor.clone()).await;

        let err = service
            .attach(request(CandidateRequest::for_product(pro())))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "customer_already_has_product");
        assert!(executor.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_customer() {
        let executor = Arc::new(RecordingExecutor::default());
        let service = service_with(vec![], executor).await;
        let err = service
            .attach(AttachRequest::new(
                "org_1",
                AppEnv::Live,
                "cus_missing",
                CandidateRequest::for_product(pro()),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn test_preview_relaxes_and_does_not_execute() {
        let plan_product = product("usage_plan", vec![prepaid_price("credits", 1000, 1)]);
        let mut current = attached(&plan_product, CusProductStatus::Active, 1);
        current.options = vec![FeatureOptions::quantity("credits", 5)];
        let executor = Arc::new(RecordingExecutor::default());
        let service = service_with(vec![current], executor.clone()).await;

        // Same quantity as stored: attach rejects it, preview shows the update path
        let req = request(
            CandidateRequest::for_product(plan_product)
                .with_options(vec![FeatureOptions::quantity("credits", 5)]),
        );
        let decision = service.preview(&req).await.unwrap();
        assert_eq!(decision.branch, Branch::UpdatePrepaidQuantity);
        assert!(executor.calls.lock().await.is_empty());

        let err = service.attach(req).await.unwrap_err();
        assert_eq!(err.code(), "customer_already_has_product");
    }

    #[tokio::test]
    async fn test_public_caller_cannot_upgrade() {
        let executor = Arc::new(RecordingExecutor::default());
        let service =
            service_with(vec![attached(&basic(), CusProductStatus::Active, 1)], executor.clone()).await;

        let err = service
            .attach(request(CandidateRequest::for_product(pro())).with_flags(AttachFlags {
                is_public: true,
                ..AttachFlags::default()
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "restricted_caller_action");
        assert!(executor.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_external_product_on_other_entity_blocks_attach() {
        let mut seat_b = attached(&pro(), CusProductStatus::Active, 1);
        seat_b.entity_id = Some("seat_b".to_string());
        seat_b.processor = ProcessorType::RevenueCat;
        let executor = Arc::new(RecordingExecutor::default());
        let service = service_with(vec![seat_b], executor.clone()).await;

        for candidate in [
            CandidateRequest::for_product(pro()),
            CandidateRequest::for_product(pro()).for_entity("seat_a"),
        ] {
            let err = service.attach(request(candidate)).await.unwrap_err();
            assert_eq!(err.code(), "external_billing_conflict");
        }
        assert!(executor.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_execution_failure_releases_lock() {
        let executor = Arc::new(RecordingExecutor {
            fail: true,
            ..RecordingExecutor::default()
        });
        let service = service_with(vec![], executor.clone()).await;

        for _ in 0..2 {
            let err = service
                .attach(request(CandidateRequest::for_product(pro())))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "execution_failed");
        }
        assert_eq!(executor.calls.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_attach_for_one_customer() {
        let executor = Arc::new(RecordingExecutor {
            delay: Some(Duration::from_millis(100)),
            ..RecordingExecutor::default()
        });
        let service = service_with(vec![], executor.clone()).await;
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let service = service.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                service
                    .attach(request(CandidateRequest::for_product(pro())))
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_retryable()));
        assert_eq!(executor.calls.lock().await.len(), 1);
    }
}
