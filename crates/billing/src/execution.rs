//! Execution config derivation
//!
//! Turns caller flags, the resolved branch, and the organization's billing
//! policy into the knobs the execution functions need.

use serde::{Deserialize, Serialize};

use crate::branch::Branch;
use crate::request::AttachFlags;

/// How price differences are settled when a subscription changes mid-cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProrationMode {
    /// Invoice the prorated difference now
    Immediate,
    /// Carry the prorated difference onto the next invoice
    NextCycle,
    /// No proration at all
    None,
}

/// Organization-level billing behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPolicy {
    pub bill_immediately: bool,
    pub prorate: bool,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            bill_immediately: true,
            prorate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Route the customer through a hosted checkout instead of charging directly
    pub only_checkout: bool,
    /// Carry current usage onto the replacement product
    pub carry_usage: bool,
    pub proration: ProrationMode,
    pub disable_trial: bool,
}

impl ExecutionConfig {
    /// Every distinct config, for exhaustive table tests
    pub fn all() -> Vec<ExecutionConfig> {
        let mut configs = Vec::with_capacity(24);
        for only_checkout in [false, true] {
            for carry_usage in [false, true] {
                for proration in [
                    ProrationMode::Immediate,
                    ProrationMode::NextCycle,
                    ProrationMode::None,
                ] {
                    for disable_trial in [false, true] {
                        configs.push(ExecutionConfig {
                            only_checkout,
                            carry_usage,
                            proration,
                            disable_trial,
                        });
                    }
                }
            }
        }
        configs
    }
}

/// Derive the execution config for a classified request
pub fn derive_config(flags: &AttachFlags, branch: Branch, policy: &BillingPolicy) -> ExecutionConfig {
    let wants_checkout = flags.is_public || flags.force_checkout || flags.no_payment_method;
    let only_checkout = wants_checkout && !flags.invoice_only && !flags.is_free_candidate;

    let proration = if !policy.prorate {
        ProrationMode::None
    } else if policy.bill_immediately {
        ProrationMode::Immediate
    } else {
        ProrationMode::NextCycle
    };

    ExecutionConfig {
        only_checkout,
        carry_usage: branch == Branch::SameCustom,
        proration,
        disable_trial: branch == Branch::NewVersion || flags.disable_trial,
    }
}
