//! Attach request inputs
//!
//! A [`CandidateRequest`] describes what the caller wants attached; an
//! [`AttachFlags`] value describes who is asking and how. Both are built
//! once per request and never mutated by the pipeline.

use serde::{Deserialize, Serialize};
use tollgate_shared::{
    is_free_price_set, AppEnv, Entitlement, FeatureOptions, FreeTrial, Price, Product,
};

/// Candidate product(s) and the items that should be attached with them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRequest {
    pub products: Vec<Product>,
    /// Effective prices (catalog prices, or caller-supplied custom prices)
    pub prices: Vec<Price>,
    /// Effective entitlements (catalog or custom)
    pub entitlements: Vec<Entitlement>,
    pub free_trial: Option<FreeTrial>,
    pub options: Vec<FeatureOptions>,
    pub entity_id: Option<String>,
    /// Caller supplied ad hoc items instead of the catalog product's
    #[serde(default)]
    pub is_custom: bool,
}

impl CandidateRequest {
    pub fn for_product(product: Product) -> Self {
        Self::for_products(vec![product])
    }

    pub fn for_products(products: Vec<Product>) -> Self {
        let prices = products.iter().flat_map(|p| p.prices.clone()).collect();
        let entitlements = products
            .iter()
            .flat_map(|p| p.entitlements.clone())
            .collect();
        let free_trial = products.iter().find_map(|p| p.free_trial.clone());

        Self {
            products,
            prices,
            entitlements,
            free_trial,
            options: Vec::new(),
            entity_id: None,
            is_custom: false,
        }
    }

    /// Replace the catalog items with caller-supplied ones
    pub fn with_custom_items(mut self, prices: Vec<Price>, entitlements: Vec<Entitlement>) -> Self {
        self.prices = prices;
        self.entitlements = entitlements;
        self.is_custom = true;
        self
    }

    pub fn with_free_trial(mut self, free_trial: Option<FreeTrial>) -> Self {
        self.free_trial = free_trial;
        self
    }

    pub fn with_options(mut self, options: Vec<FeatureOptions>) -> Self {
        self.options = options;
        self
    }

    pub fn for_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// First (or only) candidate product
    pub fn primary(&self) -> Option<&Product> {
        self.products.first()
    }

    pub fn product_ids(&self) -> Vec<&str> {
        self.products.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn is_multi_product(&self) -> bool {
        self.products.len() > 1
    }

    pub fn is_add_on(&self) -> bool {
        self.primary().map(|p| p.is_add_on).unwrap_or(false)
    }

    pub fn is_free(&self) -> bool {
        is_free_price_set(&self.prices)
    }

    pub fn has_prepaid_price(&self) -> bool {
        self.prices.iter().any(Price::is_prepaid)
    }

    pub fn option_for(&self, feature_id: &str) -> Option<&FeatureOptions> {
        self.options.iter().find(|o| o.feature_id == feature_id)
    }
}

/// Caller identity and request switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachFlags {
    /// Request made with a publishable (restricted) key
    pub is_public: bool,
    pub force_checkout: bool,
    /// Send an invoice instead of charging or redirecting to checkout
    pub invoice_only: bool,
    pub is_free_candidate: bool,
    pub no_payment_method: bool,
    /// Explicit request to skip the product's free trial
    pub disable_trial: bool,
}

impl AttachFlags {
    /// Flags for a secret-key caller; `is_free_candidate` is taken from the candidate
    pub fn for_candidate(candidate: &CandidateRequest) -> Self {
        Self {
            is_free_candidate: candidate.is_free(),
            ..Self::default()
        }
    }
}

/// A complete attach request as handed to the attach service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachRequest {
    pub org_id: String,
    pub env: AppEnv,
    pub customer_id: String,
    pub candidate: CandidateRequest,
    pub flags: AttachFlags,
}

impl AttachRequest {
    pub fn new(
        org_id: impl Into<String>,
        env: AppEnv,
        customer_id: impl Into<String>,
        candidate: CandidateRequest,
    ) -> Self {
        let flags = AttachFlags::for_candidate(&candidate);
        Self {
            org_id: org_id.into(),
            env,
            customer_id: customer_id.into(),
            candidate,
            flags,
        }
    }

    pub fn with_flags(mut self, flags: AttachFlags) -> Self {
        self.flags = AttachFlags {
            is_free_candidate: self.candidate.is_free(),
            ..flags
        };
        self
    }
}
