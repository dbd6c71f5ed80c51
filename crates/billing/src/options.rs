//! Feature option normalization
//!
//! Callers send prepaid quantities in feature units. Stored options and the
//! payment processor work in packs of `billing_units`, so quantities are
//! converted (rounding up) before classification and validation.

use tollgate_shared::{FeatureOptions, Price};

use crate::error::{BillingError, BillingResult};

/// Convert requested quantities into billing-unit packs
///
/// Every option must refer to a feature priced by the candidate. A quantity
/// may only be given for a prepaid price. Negative quantities are passed
/// through for the validation gate to reject.
pub fn normalize_options(
    options: &[FeatureOptions],
    prices: &[Price],
) -> BillingResult<Vec<FeatureOptions>> {
    let mut normalized = Vec::with_capacity(options.len());

    for option in options {
        if !prices
            .iter()
            .any(|p| p.feature_id() == Some(option.feature_id.as_str()))
        {
            return Err(BillingError::InvalidOptions {
                feature_id: option.feature_id.clone(),
                reason: "feature not found on the requested product".to_string(),
            });
        }

        let quantity = match option.quantity {
            Some(quantity) => {
                let prepaid = prices
                    .iter()
                    .filter(|p| p.is_prepaid())
                    .find_map(|p| {
                        p.usage_config()
                            .filter(|u| u.feature_id == option.feature_id)
                    })
                    .ok_or_else(|| BillingError::InvalidOptions {
                        feature_id: option.feature_id.clone(),
                        reason: "no prepaid price found for feature".to_string(),
                    })?;

                Some(to_packs(quantity, prepaid.billing_units))
            }
            None => None,
        };

        normalized.push(FeatureOptions {
            feature_id: option.feature_id.clone(),
            quantity,
            threshold: option.threshold,
        });
    }

    Ok(normalized)
}

fn to_packs(quantity: i64, billing_units: u64) -> i64 {
    let units = i64::try_from(billing_units.max(1)).unwrap_or(i64::MAX);
    if quantity <= 0 {
        return quantity;
    }
    (quantity - 1) / units + 1
}
