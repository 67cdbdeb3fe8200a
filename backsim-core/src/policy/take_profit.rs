//! Take-profit targets.

use super::Fees;
use crate::domain::Side;
use crate::error::{checked_div, finite, EngineError, EntryRejection};
use crate::precision::{ceil_to_step, floor_to_step};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TakeProfitPolicy {
    /// Target `risk_reward` times the stop distance from avg_entry. With
    /// `fee_adjusted`, the target instead nets `risk_reward` times the fee-inclusive
    /// loss at the stop.
    RiskReward { risk_reward: f64, fee_adjusted: bool },
    /// Target a fixed fraction from avg_entry.
    Percent { tp_pct: f64 },
}

/// The position a target is computed for.
#[derive(Debug, Clone, Copy)]
pub struct TargetContext {
    pub side: Side,
    pub avg_entry: f64,
    pub sl_price: f64,
    pub size_usd: f64,
    pub size_asset: f64,
}

impl TakeProfitPolicy {
    pub fn target(
        &self,
        ctx: &TargetContext,
        fees: Fees,
        price_tick_step: Option<f64>,
    ) -> Result<f64, EngineError> {
        let side = ctx.side;
        let raw = match *self {
            TakeProfitPolicy::RiskReward {
                risk_reward,
                fee_adjusted: false,
            } => ctx.avg_entry + side.sign() * risk_reward * (ctx.avg_entry - ctx.sl_price).abs(),
            TakeProfitPolicy::RiskReward {
                risk_reward,
                fee_adjusted: true,
            } => {
                let profit =
                    risk_reward * fees.loss_at(side, ctx.size_usd, ctx.size_asset, ctx.sl_price);
                match side {
                    Side::Long => checked_div(
                        "take profit",
                        profit + ctx.size_usd * (1.0 + fees.entry),
                        ctx.size_asset * (1.0 - fees.exit),
                    )?,
                    Side::Short => checked_div(
                        "take profit",
                        ctx.size_usd * (1.0 - fees.entry) - profit,
                        ctx.size_asset * (1.0 + fees.exit),
                    )?,
                }
            }
            TakeProfitPolicy::Percent { tp_pct } => ctx.avg_entry * (1.0 + side.sign() * tp_pct),
        };

        // Targets round toward avg_entry.
        let tp = match (price_tick_step, side) {
            (None, _) => raw,
            (Some(step), Side::Long) => floor_to_step(raw, step),
            (Some(step), Side::Short) => ceil_to_step(raw, step),
        };
        let tp = finite("take profit", tp)?;
        if tp <= 0.0 || !side.is_adverse(ctx.avg_entry, tp) {
            return Err(EntryRejection::TargetOnWrongSide {
                tp_price: tp,
                avg_entry: ctx.avg_entry,
            }
            .into());
        }
        Ok(tp)
    }
}
