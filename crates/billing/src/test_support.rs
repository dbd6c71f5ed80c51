//! Builders shared by the unit tests

use time::{Duration, OffsetDateTime};
use tollgate_shared::{
    AppEnv, BillWhen, BillingInterval, CusProductStatus, Customer, CustomerProduct, Entitlement,
    Price, PriceConfig, ProcessorType, Product, UsagePriceConfig, UsageTier,
};

pub(crate) fn price_with_interval(id: &str, amount_cents: i64, interval: BillingInterval) -> Price {
    Price {
        id: format!("price_{id}"),
        config: PriceConfig::Fixed {
            amount_cents,
            interval,
            interval_count: 1,
        },
    }
}

pub(crate) fn monthly_price(id: &str, amount_cents: i64) -> Price {
    price_with_interval(id, amount_cents, BillingInterval::Month)
}

pub(crate) fn one_off_price(id: &str, amount_cents: i64) -> Price {
    price_with_interval(id, amount_cents, BillingInterval::OneOff)
}

fn usage_price(feature_id: &str, amount_cents: i64, bill_when: BillWhen, billing_units: u64) -> Price {
    Price {
        id: format!("price_{feature_id}"),
        config: PriceConfig::Usage(UsagePriceConfig {
            feature_id: feature_id.to_string(),
            bill_when,
            interval: BillingInterval::Month,
            interval_count: 1,
            billing_units,
            usage_tiers: vec![UsageTier {
                up_to: None,
                amount_cents,
            }],
            should_prorate: false,
        }),
    }
}

pub(crate) fn arrear_price(feature_id: &str, amount_cents: i64) -> Price {
    usage_price(feature_id, amount_cents, BillWhen::EndOfPeriod, 1)
}

pub(crate) fn prepaid_price(feature_id: &str, amount_cents: i64, billing_units: u64) -> Price {
    usage_price(feature_id, amount_cents, BillWhen::InAdvance, billing_units)
}

pub(crate) fn below_threshold_price(feature_id: &str, amount_cents: i64) -> Price {
    usage_price(feature_id, amount_cents, BillWhen::BelowThreshold, 1)
}

pub(crate) fn entitlement(feature_id: &str, allowance: Option<i64>, usage_limit: Option<i64>) -> Entitlement {
    Entitlement {
        id: format!("ent_{feature_id}"),
        feature_id: feature_id.to_string(),
        allowance,
        usage_limit,
        interval: Some(BillingInterval::Month),
    }
}

pub(crate) fn product(id: &str, prices: Vec<Price>) -> Product {
    Product {
        id: id.to_string(),
        name: id.to_string(),
        version: 1,
        is_add_on: false,
        group: String::new(),
        prices,
        entitlements: Vec::new(),
        free_trial: None,
    }
}

pub(crate) fn addon(id: &str, prices: Vec<Price>) -> Product {
    Product {
        is_add_on: true,
        ..product(id, prices)
    }
}

/// Attach `product` with the given status, created `day` days after the epoch
pub(crate) fn attached(product: &Product, status: CusProductStatus, day: i64) -> CustomerProduct {
    let created_at = OffsetDateTime::UNIX_EPOCH + Duration::days(day);
    CustomerProduct {
        id: format!("cp_{}_{}", product.id, day),
        product: product.clone(),
        entity_id: None,
        status,
        canceled: false,
        processor: ProcessorType::Stripe,
        subscription_ids: Vec::new(),
        scheduled_ids: Vec::new(),
        options: Vec::new(),
        free_trial: product.free_trial.clone(),
        starts_at: created_at,
        created_at,
    }
}

pub(crate) fn customer(products: Vec<CustomerProduct>) -> Customer {
    Customer {
        id: "cus_1".to_string(),
        internal_id: "cus_internal_1".to_string(),
        org_id: "org_1".to_string(),
        env: AppEnv::Live,
        billing_managed_externally: false,
        external_processor: None,
        products,
    }
}
