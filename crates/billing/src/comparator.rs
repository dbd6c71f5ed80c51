//! Price set comparison
//!
//! Decides whether moving from one price set to another is an upgrade. The
//! engine only consumes the [`PriceComparator`] trait; the interval-aware
//! implementation below is the default used when no pricing service is
//! plugged in.

use tollgate_shared::{is_free_price_set, BillingType, Price};

/// Monotonic value ordering between two price sets
pub trait PriceComparator: Send + Sync {
    /// True when `new_prices` is strictly more valuable than `old_prices`
    fn is_upgrade(&self, old_prices: &[Price], new_prices: &[Price]) -> bool;
}

/// Default comparator: longest interval first, then total base price
#[derive(Debug, Clone)]
pub struct IntervalPriceComparator {
    /// Treat a switch between two pure pay-as-you-go products as an upgrade
    pub usage_always_upgrade: bool,
}

impl Default for IntervalPriceComparator {
    fn default() -> Self {
        Self {
            usage_always_upgrade: true,
        }
    }
}

impl IntervalPriceComparator {
    /// Longest (interval, count) among the prices, measured in days
    fn longest_interval_days(prices: &[Price]) -> u32 {
        prices
            .iter()
            .map(|p| {
                let (interval, count) = p.interval();
                interval.approx_days().saturating_mul(count)
            })
            .max()
            .unwrap_or(0)
    }

    fn total_base_cents(prices: &[Price]) -> i64 {
        prices
            .iter()
            .fold(0i64, |total, p| total.saturating_add(p.base_amount_cents()))
    }

    fn all_usage_in_arrear(prices: &[Price]) -> bool {
        !prices.is_empty()
            && prices
                .iter()
                .all(|p| p.billing_type() == BillingType::UsageInArrear)
    }
}

impl PriceComparator for IntervalPriceComparator {
    fn is_upgrade(&self, old_prices: &[Price], new_prices: &[Price]) -> bool {
        let old_free = is_free_price_set(old_prices);
        let new_free = is_free_price_set(new_prices);

        if old_free && !new_free {
            return true;
        }
        if !old_free && new_free {
            return false;
        }

        if self.usage_always_upgrade
            && Self::all_usage_in_arrear(old_prices)
            && Self::all_usage_in_arrear(new_prices)
        {
            return true;
        }

        let old_days = Self::longest_interval_days(old_prices);
        let new_days = Self::longest_interval_days(new_prices);

        if old_days == new_days {
            Self::total_base_cents(old_prices) < Self::total_base_cents(new_prices)
        } else {
            new_days > old_days
        }
    }
}
