//! Process-wide call and cost accounting.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::UsageRecord;
use crate::{Error, Result};

/// What to do when a completed call cannot be priced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostTrackingMode {
    /// Surface `CostComputation` and record nothing.
    #[default]
    Enforce,
    /// Count the call at zero cost and log a warning.
    IgnoreErrors,
}

impl FromStr for CostTrackingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enforce" | "default" => Ok(Self::Enforce),
            "ignore_errors" | "ignore-errors" => Ok(Self::IgnoreErrors),
            other => Err(format!(
                "unknown cost tracking mode '{}', expected 'enforce' or 'ignore_errors'",
                other
            )),
        }
    }
}

impl fmt::Display for CostTrackingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enforce => f.write_str("enforce"),
            Self::IgnoreErrors => f.write_str("ignore_errors"),
        }
    }
}

/// Global limits. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BudgetLimits {
    pub call_limit: u64,
    pub cost_limit: Decimal,
}

impl BudgetLimits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn calls(mut self, limit: u64) -> Self {
        self.call_limit = limit;
        self
    }

    pub fn cost(mut self, limit: Decimal) -> Self {
        self.cost_limit = limit;
        self
    }
}

/// Running totals. Never decrease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetState {
    pub calls: u64,
    pub cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BudgetDenial {
    #[error(
        "global call limit of {limit} reached ({used} calls made, {in_flight} in flight); \
         raise global_call_limit to continue"
    )]
    CallLimit { used: u64, in_flight: u64, limit: u64 },

    #[error(
        "global cost limit of ${limit} reached (${used} spent); \
         raise global_cost_limit to continue"
    )]
    CostLimit { used: Decimal, limit: Decimal },
}

#[derive(Debug, Default)]
struct Inner {
    state: BudgetState,
    in_flight: u64,
}

/// Shared call/cost accountant.
///
/// `precheck` reserves a slot for the call; the returned [`BudgetPermit`]
/// either records the call's usage or, when dropped unrecorded, gives the
/// slot back. Reserved slots count against the call limit, so concurrent
/// callers can never push the call count past it. The cost limit can only be
/// compared with costs already recorded, so it may be overshot by the calls
/// in flight when it is crossed.
#[derive(Debug, Default)]
pub struct CostTracker {
    inner: Mutex<Inner>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn precheck(&self, limits: &BudgetLimits) -> Result<BudgetPermit<'_>> {
        let mut inner = self.lock();

        if limits.call_limit > 0 && inner.state.calls + inner.in_flight >= limits.call_limit {
            let denial = BudgetDenial::CallLimit {
                used: inner.state.calls,
                in_flight: inner.in_flight,
                limit: limits.call_limit,
            };
            tracing::warn!(%denial, "budget precheck denied");
            return Err(denial.into());
        }
        if limits.cost_limit > Decimal::ZERO && inner.state.cost >= limits.cost_limit {
            let denial = BudgetDenial::CostLimit {
                used: inner.state.cost,
                limit: limits.cost_limit,
            };
            tracing::warn!(%denial, "budget precheck denied");
            return Err(denial.into());
        }

        inner.in_flight += 1;
        Ok(BudgetPermit {
            tracker: self,
            released: false,
        })
    }

    pub fn snapshot(&self) -> BudgetState {
        self.lock().state
    }

    pub fn in_flight(&self) -> u64 {
        self.lock().in_flight
    }

    fn release(&self) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    fn commit(&self, cost: Decimal) -> BudgetState {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.state.calls += 1;
        inner.state.cost += cost;
        inner.state
    }
}

/// A reserved call slot. Record exactly once, or drop to release.
#[derive(Debug)]
#[must_use = "dropping a permit releases the reserved call slot"]
pub struct BudgetPermit<'a> {
    tracker: &'a CostTracker,
    released: bool,
}

impl BudgetPermit<'_> {
    /// Charge the call. Returns the cost added to the running total.
    pub fn record(mut self, record: &UsageRecord, mode: CostTrackingMode) -> Result<Decimal> {
        let cost = match (record.cost, mode) {
            (Some(cost), _) => cost,
            (None, CostTrackingMode::IgnoreErrors) => {
                tracing::warn!(
                    model = %record.model,
                    prompt_tokens = record.prompt_tokens,
                    completion_tokens = record.completion_tokens,
                    "cost unavailable, counting call at zero cost"
                );
                Decimal::ZERO
            }
            (None, CostTrackingMode::Enforce) => {
                return Err(Error::CostComputation {
                    model: record.model.to_string(),
                    reason: "model has no known pricing and provider reported no cost; \
                             set cost_tracking=ignore_errors or add pricing"
                        .into(),
                });
            }
        };

        self.released = true;
        let state = self.tracker.commit(cost);
        tracing::debug!(
            model = %record.model,
            cost = %cost,
            total_calls = state.calls,
            total_cost = %state.cost,
            "usage recorded"
        );
        Ok(cost)
    }
}

impl Drop for BudgetPermit<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.tracker.release();
        }
    }
}

static GLOBAL_TRACKER: LazyLock<Arc<CostTracker>> = LazyLock::new(|| Arc::new(CostTracker::new()));

/// The process-wide tracker shared by every client that is not given its own.
pub fn global_tracker() -> Arc<CostTracker> {
    Arc::clone(&GLOBAL_TRACKER)
}
