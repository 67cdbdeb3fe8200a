//! Engine error taxonomy.
//!
//! - [`EntryRejection`]: an entry or increase was refused. Non-fatal; the
//!   driver records the [`SkipReason`] and keeps scanning.
//! - [`ArithmeticFault`]: a non-finite value or a zero denominator. Fatal for
//!   the run only.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryRejection {
    #[error("insufficient size: order of {size_usd:.3} with {available:.3} available")]
    InsufficientSize { size_usd: f64, available: f64 },

    #[error("order of {size_usd:.3} is below the minimum {min_usd:.3}")]
    BelowMinOrderSize { size_usd: f64, min_usd: f64 },

    #[error("order of {size_usd:.3} is above the maximum {max_usd:.3}")]
    AboveMaxOrderSize { size_usd: f64, max_usd: f64 },

    #[error(
        "leverage {leverage:.2} puts liquidation at {liq_price:.6}, not beyond the stop {sl_price:.6}"
    )]
    LeverageViolatesLiquiditySafety {
        leverage: f64,
        liq_price: f64,
        sl_price: f64,
    },

    #[error("stop {sl_price:.6} is not on the loss side of {reference:.6}")]
    StopOnWrongSide { sl_price: f64, reference: f64 },

    #[error("target {tp_price:.6} is not on the profit side of {avg_entry:.6}")]
    TargetOnWrongSide { tp_price: f64, avg_entry: f64 },

    #[error("possible loss {possible_loss:.3} exceeds the equity risk limit {limit:.3}")]
    RiskLimitExceeded { possible_loss: f64, limit: f64 },

    #[error("position already holds {entries} entries")]
    MaxEntriesReached { entries: u32 },
}

impl EntryRejection {
    pub fn reason(&self) -> SkipReason {
        match self {
            EntryRejection::InsufficientSize { .. } => SkipReason::InsufficientSize,
            EntryRejection::BelowMinOrderSize { .. } => SkipReason::BelowMinOrderSize,
            EntryRejection::AboveMaxOrderSize { .. } => SkipReason::AboveMaxOrderSize,
            EntryRejection::LeverageViolatesLiquiditySafety { .. } => {
                SkipReason::LeverageViolatesLiquiditySafety
            }
            EntryRejection::StopOnWrongSide { .. } => SkipReason::StopOnWrongSide,
            EntryRejection::TargetOnWrongSide { .. } => SkipReason::TargetOnWrongSide,
            EntryRejection::RiskLimitExceeded { .. } => SkipReason::RiskLimitExceeded,
            EntryRejection::MaxEntriesReached { .. } => SkipReason::MaxEntriesReached,
        }
    }
}

/// Why a signal did not produce a fill. Keys the per-run skip counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientSize,
    BelowMinOrderSize,
    AboveMaxOrderSize,
    LeverageViolatesLiquiditySafety,
    StopOnWrongSide,
    TargetOnWrongSide,
    RiskLimitExceeded,
    MaxEntriesReached,
    AccountDepleted,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("arithmetic fault: {what} is {value}")]
pub struct ArithmeticFault {
    pub what: &'static str,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] EntryRejection),
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticFault),
    #[error("no position is open")]
    NotOpen,
    #[error("a position is already open")]
    AlreadyOpen,
    #[error("bar {0} is outside the series")]
    BarOutOfRange(usize),
}

/// Pass `value` through if it is finite, otherwise fault with its name.
pub fn finite(what: &'static str, value: f64) -> Result<f64, ArithmeticFault> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ArithmeticFault { what, value })
    }
}

/// Divide, faulting on a zero denominator or a non-finite quotient.
pub fn checked_div(what: &'static str, num: f64, den: f64) -> Result<f64, ArithmeticFault> {
    if den == 0.0 {
        return Err(ArithmeticFault { what, value: den });
    }
    finite(what, num / den)
}
