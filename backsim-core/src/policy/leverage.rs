//! Leverage selection under the liquidation-safety invariant.
//!
//! Liquidation must never be reachable before the stop: for a long,
//! `liq_price < sl_price`; for a short, `liq_price > sl_price`. Dynamic
//! leverage is the largest value satisfying that with a small cushion. A
//! static request that breaks it is reduced or rejected per [`LeverageSafety`].

use serde::{Deserialize, Serialize};

use crate::domain::Side;
use crate::error::{checked_div, finite, EngineError, EntryRejection};
use crate::precision::{floor_to_step, round_money};

/// Gap kept between the stop and the liquidation price by dynamic leverage,
/// as a fraction of the stop.
pub const LIQ_CUSHION: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeverageType {
    Static { leverage: f64 },
    Dynamic,
}

/// What to do when the chosen leverage would liquidate before the stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeverageSafety {
    /// Lower leverage to the largest safe value; reject if that is below 1.
    #[default]
    Reduce,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeverageDecision {
    pub leverage: f64,
    pub liq_price: f64,
    pub bankruptcy_price: f64,
}

/// Margin taken from the available balance for one fill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginReservation {
    pub initial_margin: f64,
    pub fee_to_open: f64,
    pub bankruptcy_fee: f64,
    /// Sum of the three above.
    pub cost: f64,
    /// Notional financed beyond `cost`.
    pub borrowed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeveragePolicy {
    pub kind: LeverageType,
    pub max_leverage: f64,
    pub mmr_pct: f64,
    pub tick_step: f64,
    pub safety: LeverageSafety,
}

pub fn liquidation_price(side: Side, avg_entry: f64, leverage: f64, mmr_pct: f64) -> f64 {
    match side {
        Side::Long => avg_entry * (1.0 - 1.0 / leverage + mmr_pct),
        Side::Short => avg_entry * (1.0 + 1.0 / leverage - mmr_pct),
    }
}

pub fn bankruptcy_price(side: Side, avg_entry: f64, leverage: f64) -> f64 {
    match side {
        Side::Long => avg_entry * (leverage - 1.0) / leverage,
        Side::Short => avg_entry * (leverage + 1.0) / leverage,
    }
}

/// Leverage whose liquidation price sits [`LIQ_CUSHION`] beyond `sl_price`.
pub fn max_safe_leverage(
    side: Side,
    avg_entry: f64,
    sl_price: f64,
    mmr_pct: f64,
) -> Result<f64, EngineError> {
    let den = match side {
        Side::Long => avg_entry * (1.0 + mmr_pct) - sl_price * (1.0 - LIQ_CUSHION),
        Side::Short => sl_price * (1.0 + LIQ_CUSHION) - avg_entry * (1.0 - mmr_pct),
    };
    checked_div("max safe leverage", avg_entry, den).map_err(Into::into)
}

impl LeveragePolicy {
    pub fn decide(
        &self,
        side: Side,
        avg_entry: f64,
        sl_price: f64,
    ) -> Result<LeverageDecision, EngineError> {
        let requested = match self.kind {
            LeverageType::Static { leverage } => leverage,
            LeverageType::Dynamic => floor_to_step(
                max_safe_leverage(side, avg_entry, sl_price, self.mmr_pct)?,
                self.tick_step,
            ),
        };
        let leverage = finite("leverage", requested)?.clamp(1.0, self.max_leverage);

        let decision = self.decision(side, avg_entry, leverage)?;
        if side.is_adverse(decision.liq_price, sl_price) {
            return Ok(decision);
        }

        let violation = EntryRejection::LeverageViolatesLiquiditySafety {
            leverage,
            liq_price: decision.liq_price,
            sl_price,
        };
        match self.safety {
            LeverageSafety::Reject => Err(violation.into()),
            LeverageSafety::Reduce => {
                let safe = floor_to_step(
                    max_safe_leverage(side, avg_entry, sl_price, self.mmr_pct)?,
                    self.tick_step,
                )
                .min(leverage);
                if safe < 1.0 {
                    return Err(violation.into());
                }
                let reduced = self.decision(side, avg_entry, safe)?;
                if side.is_adverse(reduced.liq_price, sl_price) {
                    Ok(reduced)
                } else {
                    Err(violation.into())
                }
            }
        }
    }

    /// Margin for a fill of `entry_usd` at `leverage`.
    pub fn margin(&self, entry_usd: f64, leverage: f64, fee_entry: f64) -> MarginReservation {
        let initial_margin = entry_usd / leverage;
        let fee_to_open = entry_usd * fee_entry;
        let bankruptcy_fee = entry_usd * (leverage - 1.0) / leverage * self.mmr_pct;
        let cost = round_money(initial_margin + fee_to_open + bankruptcy_fee);
        MarginReservation {
            initial_margin,
            fee_to_open,
            bankruptcy_fee,
            cost,
            borrowed: round_money(entry_usd - cost),
        }
    }

    fn decision(
        &self,
        side: Side,
        avg_entry: f64,
        leverage: f64,
    ) -> Result<LeverageDecision, EngineError> {
        Ok(LeverageDecision {
            leverage,
            liq_price: finite(
                "liquidation price",
                liquidation_price(side, avg_entry, leverage, self.mmr_pct),
            )?,
            bankruptcy_price: finite(
                "bankruptcy price",
                bankruptcy_price(side, avg_entry, leverage),
            )?,
        })
    }
}
