//! Branch classification
//!
//! Every attach request is reduced to exactly one [`Branch`]: the kind of
//! transition it represents. [`resolve_branch`] is a pure, total function of
//! the customer's attached products and the candidate request; the first
//! matching rule wins.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tollgate_shared::{is_one_off_price_set, CustomerProduct, Entitlement, Price, Product};

use crate::comparator::PriceComparator;
use crate::error::{BillingError, BillingResult};
use crate::request::CandidateRequest;
use crate::snapshot::ProductSnapshot;

/// Kind of transition an attach request represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// Several products attached in one request
    MultiProduct,
    /// Only one-time prices
    OneOff,
    /// Same product, different catalog version
    NewVersion,
    /// Same product with caller-supplied prices
    SameCustom,
    /// Same product with caller-supplied entitlements only
    SameCustomEnts,
    UpdatePrepaidQuantity,
    AddOn,
    /// Cancel a pending downgrade or uncancel the current product
    Renew,
    /// Current main product is free; treated as a fresh attach
    MainIsFree,
    /// Upgrade out of a trial
    MainIsTrial,
    Upgrade,
    Downgrade,
    New,
}

impl Branch {
    pub const ALL: [Branch; 13] = [
        Branch::MultiProduct,
        Branch::OneOff,
        Branch::NewVersion,
        Branch::SameCustom,
        Branch::SameCustomEnts,
        Branch::UpdatePrepaidQuantity,
        Branch::AddOn,
        Branch::Renew,
        Branch::MainIsFree,
        Branch::MainIsTrial,
        Branch::Upgrade,
        Branch::Downgrade,
        Branch::New,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::MultiProduct => "multi_product",
            Branch::OneOff => "one_off",
            Branch::NewVersion => "new_version",
            Branch::SameCustom => "same_custom",
            Branch::SameCustomEnts => "same_custom_ents",
            Branch::UpdatePrepaidQuantity => "update_prepaid_quantity",
            Branch::AddOn => "add_on",
            Branch::Renew => "renew",
            Branch::MainIsFree => "main_is_free",
            Branch::MainIsTrial => "main_is_trial",
            Branch::Upgrade => "upgrade",
            Branch::Downgrade => "downgrade",
            Branch::New => "new",
        }
    }

    /// Branches that modify an existing paid relationship in place
    pub fn is_in_place_update(&self) -> bool {
        matches!(
            self,
            Branch::Upgrade
                | Branch::Downgrade
                | Branch::NewVersion
                | Branch::SameCustom
                | Branch::UpdatePrepaidQuantity
                | Branch::SameCustomEnts
        )
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify an attach request
///
/// `products` is every product instance attached to the customer. Returns
/// exactly one branch, or the error that makes the request invalid as
/// stated (e.g. re-attaching an identical product).
pub fn resolve_branch(
    products: &[CustomerProduct],
    candidate: &CandidateRequest,
    comparator: &dyn PriceComparator,
    from_preview: bool,
) -> BillingResult<Branch> {
    let product = candidate
        .primary()
        .ok_or_else(|| BillingError::InvalidRequest("No product provided".to_string()))?;

    // 1. Several products at once
    if candidate.is_multi_product() {
        check_multi_product(products, candidate)?;
        return Ok(Branch::MultiProduct);
    }

    // 2. One-time purchase
    if is_one_off_price_set(&candidate.prices) {
        return Ok(Branch::OneOff);
    }

    let snapshot = ProductSnapshot::locate(products, product, candidate.entity_id.as_deref());

    // 3. Customer already has this product
    if let Some(same) = snapshot.current_same {
        return resolve_same_product(same, &snapshot, product, candidate, from_preview);
    }

    // 4. Add-on alongside whatever is there
    if product.is_add_on {
        return Ok(Branch::AddOn);
    }

    // 5. Switching from the current main product
    if let Some(main) = snapshot.current_main {
        if main.product.is_free() {
            return Ok(Branch::MainIsFree);
        }

        let branch = if comparator.is_upgrade(&main.product.prices, &candidate.prices) {
            if main.is_trialing() {
                Branch::MainIsTrial
            } else {
                Branch::Upgrade
            }
        } else {
            Branch::Downgrade
        };
        return Ok(branch);
    }

    // 6. Nothing in scope
    Ok(Branch::New)
}

fn resolve_same_product(
    same: &CustomerProduct,
    snapshot: &ProductSnapshot<'_>,
    product: &Product,
    candidate: &CandidateRequest,
    from_preview: bool,
) -> BillingResult<Branch> {
    if same.product.version != product.version {
        return Ok(Branch::NewVersion);
    }

    if candidate.is_custom {
        let prices_same = same_price_terms(&same.product.prices, &candidate.prices);
        let ents_same =
            same_entitlement_terms(&same.product.entitlements, &candidate.entitlements);
        let trial_same = same.free_trial == candidate.free_trial;

        return match (prices_same && trial_same, ents_same) {
            (true, true) => Err(BillingError::AlreadyAttached {
                product_id: product.id.clone(),
            }),
            (true, false) => Ok(Branch::SameCustomEnts),
            (false, _) => Ok(Branch::SameCustom),
        };
    }

    if options_changed(same, candidate) {
        return Ok(Branch::UpdatePrepaidQuantity);
    }

    if product.is_add_on {
        return Ok(Branch::AddOn);
    }

    if let Some(scheduled) = snapshot.current_scheduled {
        if scheduled.product.id == product.id && scheduled.product.version == product.version {
            return Err(BillingError::AlreadyScheduled {
                product_id: product.id.clone(),
            });
        }
        return Ok(Branch::Renew);
    }

    if same.canceled {
        return Ok(Branch::Renew);
    }

    // Preview shows the quantity-update path for prepaid products even when
    // nothing changed yet, so the caller can render a quantity picker.
    if from_preview && candidate.has_prepaid_price() {
        return Ok(Branch::UpdatePrepaidQuantity);
    }

    Err(BillingError::AlreadyAttached {
        product_id: product.id.clone(),
    })
}

/// Conflict rules for attaching several products in one request
pub fn check_multi_product(
    products: &[CustomerProduct],
    candidate: &CandidateRequest,
) -> BillingResult<()> {
    let mut seen = HashSet::new();
    for product in &candidate.products {
        if !seen.insert(product.id.as_str()) {
            return Err(BillingError::InvalidRequest(
                "Not allowed duplicate product ids".to_string(),
            ));
        }
    }

    if let Some(second_trial) = candidate
        .products
        .iter()
        .filter(|p| p.free_trial.is_some())
        .nth(1)
    {
        return Err(BillingError::MultiProductConflict {
            product_id: second_trial.id.clone(),
            reason: "cannot attach multiple products with free trials".to_string(),
        });
    }

    for product in candidate.products.iter().filter(|p| !p.is_add_on) {
        if let Some(other) = candidate
            .products
            .iter()
            .find(|o| !o.is_add_on && o.group == product.group && o.id != product.id)
        {
            return Err(BillingError::MultiProductConflict {
                product_id: other.id.clone(),
                reason: format!(
                    "cannot attach two main products from the same group '{}'",
                    product.group
                ),
            });
        }
    }

    for product in &candidate.products {
        if is_one_off_price_set(&product.prices) {
            continue;
        }

        let snapshot = ProductSnapshot::locate(products, product, candidate.entity_id.as_deref());

        if snapshot.current_same.is_some() {
            return Err(BillingError::AlreadyAttached {
                product_id: product.id.clone(),
            });
        }

        if product.is_add_on {
            continue;
        }

        if let Some(main) = snapshot.current_main {
            if !main.product.is_free() {
                return Err(BillingError::MultiProductConflict {
                    product_id: product.id.clone(),
                    reason: format!(
                        "customer already has paid product '{}' in this group",
                        main.product.id
                    ),
                });
            }
        }

        if let Some(scheduled) = snapshot.current_scheduled {
            return Err(BillingError::MultiProductConflict {
                product_id: product.id.clone(),
                reason: format!(
                    "product '{}' is already scheduled in this group",
                    scheduled.product.id
                ),
            });
        }
    }

    Ok(())
}

/// Price sets match when every config appears on both sides (ids ignored)
fn same_price_terms(old: &[Price], new: &[Price]) -> bool {
    old.len() == new.len()
        && old.iter().all(|p| new.iter().any(|q| q.config == p.config))
        && new.iter().all(|q| old.iter().any(|p| p.config == q.config))
}

fn same_entitlement_terms(old: &[Entitlement], new: &[Entitlement]) -> bool {
    old.len() == new.len()
        && old.iter().all(|e| new.iter().any(|n| n.same_terms(e)))
        && new.iter().all(|n| old.iter().any(|e| e.same_terms(n)))
}

/// A requested quantity differs from the stored one (missing counts as different)
fn options_changed(same: &CustomerProduct, candidate: &CandidateRequest) -> bool {
    candidate.options.iter().any(|option| match option.quantity {
        Some(quantity) => same.stored_quantity(&option.feature_id) != Some(quantity),
        None => false,
    })
}
