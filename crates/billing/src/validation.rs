//! Validation gate
//!
//! Last check before anything is executed. Rules run in a fixed order and
//! the first failure aborts the request; nothing has been mutated yet.

use tollgate_shared::{BillingType, Customer, Price};

use crate::branch::{check_multi_product, Branch};
use crate::dispatch::{dispatch_function, ExecutionFunction};
use crate::error::{BillingError, BillingResult};
use crate::execution::ExecutionConfig;
use crate::request::{AttachFlags, CandidateRequest};

/// Reject requests the caller may not make or the candidate cannot satisfy
pub fn validate(
    branch: Branch,
    config: &ExecutionConfig,
    flags: &AttachFlags,
    customer: &Customer,
    candidate: &CandidateRequest,
) -> BillingResult<()> {
    check_external_billing(customer)?;
    check_caller(branch, flags, candidate)?;

    if branch == Branch::MultiProduct {
        check_multi_product(&customer.products, candidate)?;
    }

    let function = dispatch_function(branch, config);
    let below_threshold: Vec<&Price> = candidate
        .prices
        .iter()
        .filter(|p| p.billing_type() == BillingType::UsageBelowThreshold)
        .collect();

    if function == ExecutionFunction::CreateCheckout && !below_threshold.is_empty() {
        return Err(BillingError::InvalidRequest(
            "Checkout is not supported for products with below-threshold prices".to_string(),
        ));
    }

    check_prepaid_quantities(function, candidate)?;

    for price in below_threshold {
        let feature_id = price.feature_id().unwrap_or_default();
        let has_threshold = candidate
            .option_for(feature_id)
            .and_then(|o| o.threshold)
            .is_some();
        if !has_threshold {
            return Err(BillingError::InvalidOptions {
                feature_id: feature_id.to_string(),
                reason: "threshold is required for below-threshold prices".to_string(),
            });
        }
    }

    Ok(())
}

fn check_external_billing(customer: &Customer) -> BillingResult<()> {
    if customer.billing_managed_externally {
        return Err(BillingError::ExternalBillingConflict {
            processor: "external".to_string(),
        });
    }

    if let Some(processor) = customer.live_external_processor() {
        return Err(BillingError::ExternalBillingConflict {
            processor: processor.to_string(),
        });
    }

    Ok(())
}

fn check_caller(branch: Branch, flags: &AttachFlags, candidate: &CandidateRequest) -> BillingResult<()> {
    if flags.is_public {
        if branch.is_in_place_update() {
            return Err(BillingError::RestrictedCallerAction {
                branch,
                reason: "this change requires a secret key".to_string(),
            });
        }
        if candidate.is_custom {
            return Err(BillingError::RestrictedCallerAction {
                branch,
                reason: "custom items require a secret key".to_string(),
            });
        }
    }

    if flags.force_checkout && branch.is_in_place_update() {
        return Err(BillingError::RestrictedCallerAction {
            branch,
            reason: "checkout cannot be forced when changing an existing product".to_string(),
        });
    }

    Ok(())
}

fn check_prepaid_quantities(function: ExecutionFunction, candidate: &CandidateRequest) -> BillingResult<()> {
    let only_price = candidate.prices.len() == 1;

    for usage in candidate
        .prices
        .iter()
        .filter(|p| p.is_prepaid())
        .filter_map(Price::usage_config)
    {
        let feature_id = usage.feature_id.as_str();
        let invalid = |reason: String| BillingError::InvalidOptions {
            feature_id: feature_id.to_string(),
            reason,
        };

        let quantity = match candidate.option_for(feature_id).and_then(|o| o.quantity) {
            Some(quantity) => quantity,
            // Hosted checkout collects the quantity itself
            None if function == ExecutionFunction::CreateCheckout => continue,
            None => return Err(invalid("quantity is required for prepaid features".to_string())),
        };

        if quantity < 0 {
            return Err(invalid("quantity must be zero or greater".to_string()));
        }
        if quantity == 0 && only_price {
            return Err(invalid(
                "quantity must be greater than zero when it is the only price".to_string(),
            ));
        }

        let limit = candidate
            .entitlements
            .iter()
            .find(|e| e.feature_id == feature_id)
            .and_then(|e| e.usage_limit.map(|limit| (limit, e.allowance.unwrap_or(0))));

        if let Some((usage_limit, allowance)) = limit {
            let units = i64::try_from(usage.billing_units.max(1)).unwrap_or(i64::MAX);
            let total = quantity.saturating_mul(units).saturating_add(allowance);
            if total > usage_limit {
                return Err(invalid(format!(
                    "quantity {total} exceeds the usage limit of {usage_limit}"
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{derive_config, BillingPolicy};
    use crate::test_support::*;
    use tollgate_shared::{CusProductStatus, FeatureOptions, ProcessorType};

    fn run(branch: Branch, flags: AttachFlags, customer: &Customer, candidate: &CandidateRequest) -> BillingResult<()> {
        let config = derive_config(&flags, branch, &BillingPolicy::default());
        validate(branch, &config, &flags, customer, candidate)
    }

    fn pro() -> CandidateRequest {
        CandidateRequest::for_product(product("pro", vec![monthly_price("pro", 2000)]))
    }

    fn public() -> AttachFlags {
        AttachFlags {
            is_public: true,
            ..AttachFlags::default()
        }
    }

    #[test]
    fn test_plain_new_attach_passes() {
        assert!(run(Branch::New, AttachFlags::default(), &customer(vec![]), &pro()).is_ok());
    }

    #[test]
    fn test_external_billing_blocks_everything() {
        let mut external = customer(vec![]);
        external.billing_managed_externally = true;
        let err = run(Branch::New, AttachFlags::default(), &external, &pro()).unwrap_err();
        assert_eq!(err.code(), "external_billing_conflict");

        let mut cp = attached(&product("basic", vec![monthly_price("basic", 900)]), CusProductStatus::Active, 1);
        cp.processor = ProcessorType::RevenueCat;
        let err = run(Branch::Upgrade, AttachFlags::default(), &customer(vec![cp]), &pro()).unwrap_err();
        assert!(matches!(err, BillingError::ExternalBillingConflict { ref processor } if processor == "revenuecat"));
    }

    #[test]
    fn test_expired_external_product_is_ignored() {
        let mut cp = attached(&product("basic", vec![monthly_price("basic", 900)]), CusProductStatus::Expired, 1);
        cp.processor = ProcessorType::Vercel;
        assert!(run(Branch::New, AttachFlags::default(), &customer(vec![cp]), &pro()).is_ok());
    }

    #[test]
    fn test_public_caller_restrictions() {
        for branch in Branch::ALL.into_iter().filter(Branch::is_in_place_update) {
            let err = run(branch, public(), &customer(vec![]), &pro()).unwrap_err();
            assert_eq!(err.code(), "restricted_caller_action", "{branch}");
            assert_eq!(err.field(), Some(format!("branch:{branch}")));
        }
        assert!(run(Branch::New, public(), &customer(vec![]), &pro()).is_ok());
        assert!(run(Branch::Renew, public(), &customer(vec![]), &pro()).is_ok());

        let custom = pro().with_custom_items(vec![monthly_price("pro", 100)], vec![]);
        let err = run(Branch::New, public(), &customer(vec![]), &custom).unwrap_err();
        assert_eq!(err.code(), "restricted_caller_action");
    }

    #[test]
    fn test_force_checkout_on_downgrade() {
        let flags = AttachFlags {
            force_checkout: true,
            ..AttachFlags::default()
        };
        let err = run(Branch::Downgrade, flags, &customer(vec![]), &pro()).unwrap_err();
        assert_eq!(err.code(), "restricted_caller_action");
        assert!(run(Branch::MainIsFree, flags, &customer(vec![]), &pro()).is_ok());
    }

    #[test]
    fn test_multi_product_rechecked_against_customer() {
        let basic = product("basic", vec![monthly_price("basic", 900)]);
        let credits = addon("credits", vec![monthly_price("credits", 500)]);
        let candidate = CandidateRequest::for_products(vec![
            product("pro", vec![monthly_price("pro", 2000)]),
            credits,
        ]);
        let owner = customer(vec![attached(&basic, CusProductStatus::Active, 1)]);
        let err = run(Branch::MultiProduct, AttachFlags::default(), &owner, &candidate).unwrap_err();
        assert_eq!(err.code(), "multi_product_conflict");
    }

    #[test]
    fn test_prepaid_quantity_rules() {
        let plan = product("usage_plan", vec![prepaid_price("credits", 1000, 100)]);
        let cus = customer(vec![]);

        // Missing quantity
        let missing = CandidateRequest::for_product(plan.clone());
        let err = run(Branch::New, AttachFlags::default(), &cus, &missing).unwrap_err();
        assert_eq!(err.field(), Some("options.credits".to_string()));

        // Checkout collects it instead
        let checkout = AttachFlags {
            no_payment_method: true,
            ..AttachFlags::default()
        };
        assert!(run(Branch::New, checkout, &cus, &missing).is_ok());

        // Negative
        let negative = missing.clone().with_options(vec![FeatureOptions::quantity("credits", -1)]);
        assert!(run(Branch::New, AttachFlags::default(), &cus, &negative).is_err());

        // Zero as the only price
        let zero = missing.clone().with_options(vec![FeatureOptions::quantity("credits", 0)]);
        assert!(run(Branch::New, AttachFlags::default(), &cus, &zero).is_err());

        let ok = missing.with_options(vec![FeatureOptions::quantity("credits", 3)]);
        assert!(run(Branch::New, AttachFlags::default(), &cus, &ok).is_ok());
    }

    #[test]
    fn test_zero_quantity_allowed_beside_base_price() {
        let plan = product(
            "pro_usage",
            vec![monthly_price("pro", 2000), prepaid_price("credits", 1000, 100)],
        );
        let candidate = CandidateRequest::for_product(plan)
            .with_options(vec![FeatureOptions::quantity("credits", 0)]);
        assert!(run(Branch::New, AttachFlags::default(), &customer(vec![]), &candidate).is_ok());
    }

    #[test]
    fn test_usage_limit_counts_allowance() {
        let mut plan = product("usage_plan", vec![prepaid_price("credits", 1000, 100)]);
        plan.entitlements = vec![entitlement("credits", Some(50), Some(1000))];

        // 9 packs * 100 + 50 = 950
        let within = CandidateRequest::for_product(plan.clone())
            .with_options(vec![FeatureOptions::quantity("credits", 9)]);
        assert!(run(Branch::New, AttachFlags::default(), &customer(vec![]), &within).is_ok());

        // 10 packs * 100 + 50 = 1050
        let over = CandidateRequest::for_product(plan)
            .with_options(vec![FeatureOptions::quantity("credits", 10)]);
        let err = run(Branch::New, AttachFlags::default(), &customer(vec![]), &over).unwrap_err();
        assert_eq!(err.code(), "invalid_options");
    }

    #[test]
    fn test_below_threshold_rules() {
        let plan = product(
            "metered",
            vec![monthly_price("base", 1000), below_threshold_price("api_calls", 1)],
        );
        let bare = CandidateRequest::for_product(plan);
        let err = run(Branch::New, AttachFlags::default(), &customer(vec![]), &bare).unwrap_err();
        assert_eq!(err.field(), Some("options.api_calls".to_string()));

        let with_threshold = bare.with_options(vec![FeatureOptions {
            feature_id: "api_calls".to_string(),
            quantity: None,
            threshold: Some(10_000),
        }]);
        assert!(run(Branch::New, AttachFlags::default(), &customer(vec![]), &with_threshold).is_ok());

        let err = run(Branch::New, public(), &customer(vec![]), &with_threshold).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }
}
