//! Branch to execution function table

use serde::{Deserialize, Serialize};

use crate::branch::Branch;
use crate::execution::ExecutionConfig;

/// Side-effecting operation that carries out an attach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFunction {
    CreateCheckout,
    AddProduct,
    UpdateEntitlements,
    UpdateProduct,
    ScheduleProduct,
    UpdatePrepaidQuantity,
    Renew,
}

impl ExecutionFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionFunction::CreateCheckout => "create_checkout",
            ExecutionFunction::AddProduct => "add_product",
            ExecutionFunction::UpdateEntitlements => "update_entitlements",
            ExecutionFunction::UpdateProduct => "update_product",
            ExecutionFunction::ScheduleProduct => "schedule_product",
            ExecutionFunction::UpdatePrepaidQuantity => "update_prepaid_quantity",
            ExecutionFunction::Renew => "renew",
        }
    }
}

impl std::fmt::Display for ExecutionFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Select the execution function for a branch
pub fn dispatch_function(branch: Branch, config: &ExecutionConfig) -> ExecutionFunction {
    match branch {
        Branch::MultiProduct
        | Branch::OneOff
        | Branch::New
        | Branch::AddOn
        | Branch::MainIsFree
        | Branch::MainIsTrial => {
            if config.only_checkout {
                ExecutionFunction::CreateCheckout
            } else {
                ExecutionFunction::AddProduct
            }
        }
        Branch::SameCustomEnts => ExecutionFunction::UpdateEntitlements,
        Branch::NewVersion | Branch::SameCustom | Branch::Upgrade => ExecutionFunction::UpdateProduct,
        Branch::Downgrade => ExecutionFunction::ScheduleProduct,
        Branch::UpdatePrepaidQuantity => ExecutionFunction::UpdatePrepaidQuantity,
        Branch::Renew => ExecutionFunction::Renew,
    }
}
