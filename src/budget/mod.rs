//! Process-wide budget enforcement for model calls.

pub mod pricing;
mod tracker;

pub use pricing::{ModelPricing, PricingTable, PricingTableBuilder, global_pricing_table};
pub use tracker::{
    BudgetDenial, BudgetLimits, BudgetPermit, BudgetState, CostTracker, CostTrackingMode,
    global_tracker,
};
