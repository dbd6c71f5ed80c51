//! Customer Product Invariants
//!
//! Consistency checks over a customer's attached products. The attach
//! service runs them on every snapshot it reads and logs what it finds;
//! a violation never blocks a request, it points at state that some earlier
//! write (or an external system) got wrong.
//!
//! ## Checks
//!
//! 1. **single_live_main**: at most one live main product per (group, entity)
//! 2. **single_scheduled**: at most one scheduled product per (group, entity)
//! 3. **unique_live_instance**: a product is live at most once per entity

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use tollgate_shared::CustomerProduct;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Customer product instances involved
    pub customer_product_ids: Vec<String>,
    pub description: String,
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - customer may be billed twice
    Critical,
    /// High - data inconsistency that needs attention
    High,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

/// (group, entity) scope key
type Scope<'a> = (&'a str, Option<&'a str>);

/// Runs the product invariants over one customer's products
#[derive(Debug, Clone, Copy, Default)]
pub struct InvariantChecker;

impl InvariantChecker {
    pub fn new() -> Self {
        Self
    }

    /// Run all checks and return a summary
    pub fn check_customer_products(&self, products: &[CustomerProduct]) -> InvariantCheckSummary {
        let mut violations = Vec::new();
        violations.extend(self.check_single_live_main(products));
        violations.extend(self.check_single_scheduled(products));
        violations.extend(self.check_unique_live_instance(products));

        let checks_run = Self::available_checks().len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        InvariantCheckSummary {
            checked_at: OffsetDateTime::now_utc(),
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }

    /// Emit one warning per violation
    pub fn log_violations(&self, org_id: &str, customer_id: &str, summary: &InvariantCheckSummary) {
        for violation in &summary.violations {
            tracing::warn!(
                org_id = %org_id,
                customer_id = %customer_id,
                invariant = %violation.invariant,
                severity = %violation.severity,
                customer_product_ids = ?violation.customer_product_ids,
                "{}",
                violation.description
            );
        }
    }

    /// Invariant 1: one live main product per (group, entity)
    ///
    /// Two live mains in a group means two subscriptions billing for the
    /// same slot.
    fn check_single_live_main(&self, products: &[CustomerProduct]) -> Vec<InvariantViolation> {
        let mut scopes: BTreeMap<Scope<'_>, Vec<&CustomerProduct>> = BTreeMap::new();
        for cp in products.iter().filter(|cp| cp.is_live() && !cp.product.is_add_on) {
            scopes
                .entry((cp.product.group.as_str(), cp.entity_id.as_deref()))
                .or_default()
                .push(cp);
        }

        scopes
            .into_iter()
            .filter(|(_, cps)| cps.len() > 1)
            .map(|((group, entity), cps)| InvariantViolation {
                invariant: "single_live_main".to_string(),
                customer_product_ids: cps.iter().map(|cp| cp.id.clone()).collect(),
                description: format!(
                    "{} live main products in group '{}' (expected at most 1)",
                    cps.len(),
                    group
                ),
                context: serde_json::json!({
                    "group": group,
                    "entity_id": entity,
                    "product_ids": cps.iter().map(|cp| cp.product.id.as_str()).collect::<Vec<_>>(),
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect()
    }

    /// Invariant 2: one scheduled product per (group, entity)
    fn check_single_scheduled(&self, products: &[CustomerProduct]) -> Vec<InvariantViolation> {
        let mut scopes: BTreeMap<Scope<'_>, Vec<&CustomerProduct>> = BTreeMap::new();
        for cp in products.iter().filter(|cp| cp.is_scheduled()) {
            scopes
                .entry((cp.product.group.as_str(), cp.entity_id.as_deref()))
                .or_default()
                .push(cp);
        }

        scopes
            .into_iter()
            .filter(|(_, cps)| cps.len() > 1)
            .map(|((group, entity), cps)| InvariantViolation {
                invariant: "single_scheduled".to_string(),
                customer_product_ids: cps.iter().map(|cp| cp.id.clone()).collect(),
                description: format!(
                    "{} scheduled products in group '{}' (expected at most 1)",
                    cps.len(),
                    group
                ),
                context: serde_json::json!({
                    "group": group,
                    "entity_id": entity,
                }),
                severity: ViolationSeverity::High,
            })
            .collect()
    }

    /// Invariant 3: a product id is live at most once per entity
    ///
    /// Add-ons are included; attaching an add-on again updates the existing
    /// instance rather than creating a second one.
    fn check_unique_live_instance(&self, products: &[CustomerProduct]) -> Vec<InvariantViolation> {
        let mut instances: BTreeMap<(&str, Option<&str>), Vec<&CustomerProduct>> = BTreeMap::new();
        for cp in products.iter().filter(|cp| cp.is_live()) {
            instances
                .entry((cp.product.id.as_str(), cp.entity_id.as_deref()))
                .or_default()
                .push(cp);
        }

        instances
            .into_iter()
            .filter(|(_, cps)| cps.len() > 1)
            .map(|((product_id, entity), cps)| InvariantViolation {
                invariant: "unique_live_instance".to_string(),
                customer_product_ids: cps.iter().map(|cp| cp.id.clone()).collect(),
                description: format!(
                    "Product '{}' is live {} times for the same scope",
                    product_id,
                    cps.len()
                ),
                context: serde_json::json!({
                    "product_id": product_id,
                    "entity_id": entity,
                }),
                severity: ViolationSeverity::High,
            })
            .collect()
    }

    /// Run a single invariant check by name
    pub fn run_check(&self, name: &str, products: &[CustomerProduct]) -> Vec<InvariantViolation> {
        match name {
            "single_live_main" => self.check_single_live_main(products),
            "single_scheduled" => self.check_single_scheduled(products),
            "unique_live_instance" => self.check_unique_live_instance(products),
            _ => vec![],
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec!["single_live_main", "single_scheduled", "unique_live_instance"]
    }
}
