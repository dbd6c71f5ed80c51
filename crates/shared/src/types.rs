//! Catalog and customer types

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::OffsetDateTime;

/// Error returned when a string does not name a known enum variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Processor environment an organization operates in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    Sandbox,
    Live,
}

impl AppEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnv::Sandbox => "sandbox",
            AppEnv::Live => "live",
        }
    }
}

impl std::fmt::Display for AppEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AppEnv {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sandbox" | "test" => Ok(AppEnv::Sandbox),
            "live" => Ok(AppEnv::Live),
            _ => Err(ParseEnumError::new("environment", s)),
        }
    }
}

// =============================================================================
// Prices
// =============================================================================

/// Billing interval, ordered from shortest to longest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    OneOff,
    Week,
    Month,
    Quarter,
    SemiAnnual,
    Year,
}

impl BillingInterval {
    /// Approximate length in days, used to order intervals with counts
    pub fn approx_days(&self) -> u32 {
        match self {
            BillingInterval::OneOff => 0,
            BillingInterval::Week => 7,
            BillingInterval::Month => 30,
            BillingInterval::Quarter => 91,
            BillingInterval::SemiAnnual => 182,
            BillingInterval::Year => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::OneOff => "one_off",
            BillingInterval::Week => "week",
            BillingInterval::Month => "month",
            BillingInterval::Quarter => "quarter",
            BillingInterval::SemiAnnual => "semi_annual",
            BillingInterval::Year => "year",
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// When a usage price is charged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillWhen {
    InAdvance,
    StartOfPeriod,
    EndOfPeriod,
    BelowThreshold,
}

/// How a price is billed, derived from its config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    OneOff,
    FixedCycle,
    /// Prepaid: quantity committed up front
    UsageInAdvance,
    UsageInArrear,
    InArrearProrated,
    UsageBelowThreshold,
}

/// One tier of a usage price. `up_to = None` means unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageTier {
    pub up_to: Option<u64>,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsagePriceConfig {
    pub feature_id: String,
    pub bill_when: BillWhen,
    pub interval: BillingInterval,
    pub interval_count: u32,
    /// Units sold per pack (e.g. 100 credits per pack)
    pub billing_units: u64,
    pub usage_tiers: Vec<UsageTier>,
    #[serde(default)]
    pub should_prorate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PriceConfig {
    Fixed {
        amount_cents: i64,
        interval: BillingInterval,
        interval_count: u32,
    },
    Usage(UsagePriceConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    pub config: PriceConfig,
}

impl Price {
    pub fn billing_type(&self) -> BillingType {
        match &self.config {
            PriceConfig::Fixed { interval, .. } if *interval == BillingInterval::OneOff => {
                BillingType::OneOff
            }
            PriceConfig::Fixed { .. } => BillingType::FixedCycle,
            PriceConfig::Usage(usage) => match usage.bill_when {
                BillWhen::InAdvance | BillWhen::StartOfPeriod => BillingType::UsageInAdvance,
                BillWhen::EndOfPeriod if usage.should_prorate => BillingType::InArrearProrated,
                BillWhen::EndOfPeriod => BillingType::UsageInArrear,
                BillWhen::BelowThreshold => BillingType::UsageBelowThreshold,
            },
        }
    }

    /// Interval and interval count (count of at least 1)
    pub fn interval(&self) -> (BillingInterval, u32) {
        match &self.config {
            PriceConfig::Fixed {
                interval,
                interval_count,
                ..
            } => (*interval, (*interval_count).max(1)),
            PriceConfig::Usage(usage) => (usage.interval, usage.interval_count.max(1)),
        }
    }

    pub fn feature_id(&self) -> Option<&str> {
        match &self.config {
            PriceConfig::Fixed { .. } => None,
            PriceConfig::Usage(usage) => Some(usage.feature_id.as_str()),
        }
    }

    pub fn usage_config(&self) -> Option<&UsagePriceConfig> {
        match &self.config {
            PriceConfig::Fixed { .. } => None,
            PriceConfig::Usage(usage) => Some(usage),
        }
    }

    pub fn is_prepaid(&self) -> bool {
        self.billing_type() == BillingType::UsageInAdvance
    }

    pub fn is_one_off(&self) -> bool {
        self.interval().0 == BillingInterval::OneOff
    }

    /// Fixed amount, or the first tier's amount for usage prices
    pub fn base_amount_cents(&self) -> i64 {
        match &self.config {
            PriceConfig::Fixed { amount_cents, .. } => *amount_cents,
            PriceConfig::Usage(usage) => usage
                .usage_tiers
                .first()
                .map(|t| t.amount_cents)
                .unwrap_or(0),
        }
    }

    /// Fixed amount, or the sum over every tier for usage prices (saturating)
    pub fn total_amount_cents(&self) -> i64 {
        match &self.config {
            PriceConfig::Fixed { amount_cents, .. } => *amount_cents,
            PriceConfig::Usage(usage) => usage
                .usage_tiers
                .iter()
                .fold(0i64, |total, t| total.saturating_add(t.amount_cents)),
        }
    }

    /// Every amount on the price is zero
    pub fn is_free(&self) -> bool {
        match &self.config {
            PriceConfig::Fixed { amount_cents, .. } => *amount_cents == 0,
            PriceConfig::Usage(usage) => usage.usage_tiers.iter().all(|t| t.amount_cents == 0),
        }
    }
}

/// A price set is free when it is empty or every amount is zero
pub fn is_free_price_set(prices: &[Price]) -> bool {
    prices.iter().all(Price::is_free)
}

/// A price set is one-off when every price is one-off and something costs money
pub fn is_one_off_price_set(prices: &[Price]) -> bool {
    prices.iter().all(Price::is_one_off) && prices.iter().any(|p| p.total_amount_cents() > 0)
}

// =============================================================================
// Entitlements and options
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: String,
    pub feature_id: String,
    /// Included usage before any prepaid packs
    pub allowance: Option<i64>,
    /// Hard cap on total usage (allowance plus purchased packs)
    pub usage_limit: Option<i64>,
    pub interval: Option<BillingInterval>,
}

impl Entitlement {
    /// Content equality, ignoring the row id
    pub fn same_terms(&self, other: &Entitlement) -> bool {
        self.feature_id == other.feature_id
            && self.allowance == other.allowance
            && self.usage_limit == other.usage_limit
            && self.interval == other.interval
    }
}

/// Per-feature options supplied with an attach request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureOptions {
    pub feature_id: String,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub threshold: Option<i64>,
}

impl FeatureOptions {
    pub fn quantity(feature_id: &str, quantity: i64) -> Self {
        Self {
            feature_id: feature_id.to_string(),
            quantity: Some(quantity),
            threshold: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeTrial {
    pub length_days: u32,
    #[serde(default)]
    pub unique_fingerprint: bool,
}

// =============================================================================
// Products
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub is_add_on: bool,
    /// Products in the same group replace each other; empty string is the default group
    #[serde(default)]
    pub group: String,
    pub prices: Vec<Price>,
    pub entitlements: Vec<Entitlement>,
    pub free_trial: Option<FreeTrial>,
}

impl Product {
    pub fn is_free(&self) -> bool {
        is_free_price_set(&self.prices)
    }

    pub fn has_prepaid_price(&self) -> bool {
        self.prices.iter().any(Price::is_prepaid)
    }
}

/// Payment processor a customer product is billed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorType {
    #[default]
    Stripe,
    RevenueCat,
    Vercel,
}

impl ProcessorType {
    pub fn is_default(&self) -> bool {
        *self == ProcessorType::Stripe
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorType::Stripe => "stripe",
            ProcessorType::RevenueCat => "revenuecat",
            ProcessorType::Vercel => "vercel",
        }
    }
}

impl std::fmt::Display for ProcessorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProcessorType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stripe" => Ok(ProcessorType::Stripe),
            "revenuecat" => Ok(ProcessorType::RevenueCat),
            "vercel" => Ok(ProcessorType::Vercel),
            _ => Err(ParseEnumError::new("processor", s)),
        }
    }
}

/// Lifecycle status of an attached product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CusProductStatus {
    Active,
    Trialing,
    PastDue,
    /// Queued to start at a future cycle boundary
    Scheduled,
    Expired,
}

impl CusProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CusProductStatus::Active => "active",
            CusProductStatus::Trialing => "trialing",
            CusProductStatus::PastDue => "past_due",
            CusProductStatus::Scheduled => "scheduled",
            CusProductStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for CusProductStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CusProductStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(CusProductStatus::Active),
            "trialing" => Ok(CusProductStatus::Trialing),
            "past_due" => Ok(CusProductStatus::PastDue),
            "scheduled" => Ok(CusProductStatus::Scheduled),
            "expired" => Ok(CusProductStatus::Expired),
            _ => Err(ParseEnumError::new("customer product status", s)),
        }
    }
}

/// A product instance attached to a customer (optionally to one of its entities)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProduct {
    pub id: String,
    /// Product as it was attached, including the prices and entitlements in force
    pub product: Product,
    pub entity_id: Option<String>,
    pub status: CusProductStatus,
    /// Canceled at period end but not yet expired
    #[serde(default)]
    pub canceled: bool,
    #[serde(default)]
    pub processor: ProcessorType,
    #[serde(default)]
    pub subscription_ids: Vec<String>,
    #[serde(default)]
    pub scheduled_ids: Vec<String>,
    /// Stored per-feature quantities, in billing-unit packs
    #[serde(default)]
    pub options: Vec<FeatureOptions>,
    pub free_trial: Option<FreeTrial>,
    pub starts_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl CustomerProduct {
    /// Active, trialing or past due
    pub fn is_live(&self) -> bool {
        matches!(
            self.status,
            CusProductStatus::Active | CusProductStatus::Trialing | CusProductStatus::PastDue
        )
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == CusProductStatus::Scheduled
    }

    pub fn is_trialing(&self) -> bool {
        self.status == CusProductStatus::Trialing
    }

    pub fn stored_quantity(&self, feature_id: &str) -> Option<i64> {
        self.options
            .iter()
            .find(|o| o.feature_id == feature_id)
            .and_then(|o| o.quantity)
    }
}

/// A customer together with every product instance currently attached to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub internal_id: String,
    pub org_id: String,
    pub env: AppEnv,
    /// Billing relationship is owned by a system outside this service
    #[serde(default)]
    pub billing_managed_externally: bool,
    /// Processor of any live product billed outside the default processor,
    /// taken across every entity before products are scoped
    #[serde(default)]
    pub external_processor: Option<ProcessorType>,
    pub products: Vec<CustomerProduct>,
}

impl Customer {
    pub fn live_products(&self) -> impl Iterator<Item = &CustomerProduct> {
        self.products.iter().filter(|cp| cp.is_live())
    }

    /// Non-default processor of a live product, whether or not that product
    /// is still in `products`
    pub fn live_external_processor(&self) -> Option<ProcessorType> {
        self.external_processor.or_else(|| {
            self.live_products()
                .map(|cp| cp.processor)
                .find(|processor| !processor.is_default())
        })
    }

    /// Keep customer-level products plus the given entity's products
    ///
    /// The external processor fact is recorded from the full product list
    /// first, since it applies to the whole customer.
    pub fn scope_to_entity(mut self, entity_id: Option<&str>) -> Self {
        self.external_processor = self.live_external_processor();
        if let Some(entity_id) = entity_id {
            self.products
                .retain(|cp| cp.entity_id.is_none() || cp.entity_id.as_deref() == Some(entity_id));
        }
        self
    }
}
