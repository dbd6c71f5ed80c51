#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Tollgate Shared Types
//!
//! Catalog and customer data model used by the billing engine and by any
//! service that assembles attach requests.

pub mod types;

pub use types::{
    is_free_price_set, is_one_off_price_set, AppEnv, BillWhen, BillingInterval, BillingType,
    CusProductStatus, Customer, CustomerProduct, Entitlement, FeatureOptions, FreeTrial,
    ParseEnumError, Price, PriceConfig, ProcessorType, Product, UsagePriceConfig, UsageTier,
};
