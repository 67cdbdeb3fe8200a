//! Entry and increase sizing.
//!
//! Fixed variants size in quote currency directly. Risk variants solve for the
//! notional whose loss at the stop, fees on both legs included, equals the
//! position's accumulated loss budget.

use serde::{Deserialize, Serialize};

use super::Fees;
use crate::domain::Side;
use crate::error::{checked_div, finite, EngineError, EntryRejection};
use crate::precision::{floor_to_step, round_money};

/// How the size of each fill is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntrySize {
    /// Fixed notional per fill.
    Amount { amount: f64 },
    /// Fraction of current equity per fill.
    PctAccount { pct: f64 },
    /// Fixed loss budget per fill.
    RiskAmount { amount: f64 },
    /// Loss budget as a fraction of current equity per fill.
    RiskPctAccount { risk_pct: f64 },
}

/// What the position already holds. Zero for a fresh entry.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Exposure {
    pub size_usd: f64,
    pub size_asset: f64,
    pub possible_loss: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SizingContext {
    pub side: Side,
    pub equity: f64,
    pub entry_price: f64,
    pub sl_price: f64,
    pub existing: Exposure,
}

/// Size of one fill plus the position-wide loss budget after it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeDecision {
    pub size_usd: f64,
    pub size_asset: f64,
    pub possible_loss: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingPolicy {
    pub kind: EntrySize,
    pub fees: Fees,
    pub asset_tick_step: Option<f64>,
}

impl SizingPolicy {
    pub fn size(&self, ctx: &SizingContext) -> Result<SizeDecision, EngineError> {
        let (entry_usd, budget) = match self.kind {
            EntrySize::Amount { amount } => (amount, None),
            EntrySize::PctAccount { pct } => (ctx.equity * pct, None),
            EntrySize::RiskAmount { amount } => {
                let budget = ctx.existing.possible_loss + amount;
                (self.risk_sized(ctx, budget)?, Some(budget))
            }
            EntrySize::RiskPctAccount { risk_pct } => {
                let budget = ctx.existing.possible_loss + ctx.equity * risk_pct;
                (self.risk_sized(ctx, budget)?, Some(budget))
            }
        };
        let entry_usd = finite("entry size", entry_usd)?;
        if entry_usd <= 0.0 {
            return Err(EntryRejection::InsufficientSize {
                size_usd: entry_usd,
                available: ctx.equity,
            }
            .into());
        }

        let mut size_asset = checked_div("entry asset size", entry_usd, ctx.entry_price)?;
        if let Some(step) = self.asset_tick_step {
            size_asset = floor_to_step(size_asset, step);
        }
        if size_asset <= 0.0 {
            return Err(EntryRejection::InsufficientSize {
                size_usd: size_asset * ctx.entry_price,
                available: ctx.equity,
            }
            .into());
        }
        let size_usd = size_asset * ctx.entry_price;

        let possible_loss = match budget {
            Some(budget) => budget,
            None => self.fees.loss_at(
                ctx.side,
                ctx.existing.size_usd + size_usd,
                ctx.existing.size_asset + size_asset,
                ctx.sl_price,
            ),
        };

        Ok(SizeDecision {
            size_usd,
            size_asset,
            possible_loss: round_money(finite("possible loss", possible_loss)?),
        })
    }

    /// Notional `e` such that the whole position (existing plus `e`) loses
    /// exactly `budget` if stopped at `sl_price`.
    ///
    /// Long:  `e = (P - S0(1+fe) + q0·L(1-fx)) / ((1+fe) - L(1-fx)/E)`
    /// Short: `e = (P + S0(1-fe) - q0·L(1+fx)) / (L(1+fx)/E - (1-fe))`
    fn risk_sized(&self, ctx: &SizingContext, budget: f64) -> Result<f64, EngineError> {
        let fe = self.fees.entry;
        let fx = self.fees.exit;
        let l = ctx.sl_price;
        let e = ctx.entry_price;
        let s0 = ctx.existing.size_usd;
        let q0 = ctx.existing.size_asset;

        let (num, den) = match ctx.side {
            Side::Long => (
                budget - s0 * (1.0 + fe) + q0 * l * (1.0 - fx),
                (1.0 + fe) - l * (1.0 - fx) / e,
            ),
            Side::Short => (
                budget + s0 * (1.0 - fe) - q0 * l * (1.0 + fx),
                l * (1.0 + fx) / e - (1.0 - fe),
            ),
        };
        checked_div("risk sizing", num, den).map_err(Into::into)
    }
}
