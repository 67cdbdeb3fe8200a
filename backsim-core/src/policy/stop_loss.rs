//! Stop-loss placement: initial stop, trailing proposals, break-even move.
//!
//! Every function here is pure. The engine feeds the proposals through a
//! [`StopRatchet`](super::StopRatchet) before touching the position.

use serde::{Deserialize, Serialize};

use super::Fees;
use crate::domain::{Candle, CandleBody, Side};
use crate::error::{finite, EngineError, EntryRejection};
use crate::precision::{ceil_to_step, floor_to_step};

/// How the initial stop is placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopLossType {
    /// Extreme of the entry candle (and `lookback` candles before it): lowest
    /// low for longs, highest high for shorts, pushed out by `add_pct`.
    CandleBody {
        #[serde(default)]
        lookback: usize,
        #[serde(default)]
        add_pct: f64,
    },
    /// Fixed distance from the fill price.
    Percent { sl_pct: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingRule {
    pub trail_pct: f64,
    /// Favorable move from avg_entry that must be exceeded before trailing starts.
    #[serde(default)]
    pub activation_pct: f64,
}

/// Where the stop lands on a break-even move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakevenTarget {
    /// The exit price at which PnL net of both fees is zero.
    #[default]
    FeeAdjusted,
    /// Exactly avg_entry.
    AvgEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakevenRule {
    /// Favorable move from avg_entry that must be exceeded to trigger.
    pub trigger_pct: f64,
    #[serde(default)]
    pub target: BreakevenTarget,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLossPolicy {
    pub initial: StopLossType,
    pub trailing: Option<TrailingRule>,
    pub breakeven: Option<BreakevenRule>,
    /// Candle field that break-even and trailing measure.
    pub trigger_body: CandleBody,
    pub price_tick_step: Option<f64>,
}

impl StopLossPolicy {
    /// Stop for a fill at `entry_price` on `candles[bar_index]`.
    ///
    /// Rejects with `StopOnWrongSide` unless the stop is strictly on the loss
    /// side of the fill and positive.
    pub fn initial_stop(
        &self,
        side: Side,
        candles: &[Candle],
        bar_index: usize,
        entry_price: f64,
    ) -> Result<f64, EngineError> {
        let raw = match self.initial {
            StopLossType::CandleBody { lookback, add_pct } => {
                let start = bar_index.saturating_sub(lookback);
                let window = candles.get(start..=bar_index).unwrap_or(&[]);
                match side {
                    Side::Long => {
                        window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min)
                            * (1.0 - add_pct)
                    }
                    Side::Short => {
                        window
                            .iter()
                            .map(|c| c.high)
                            .fold(f64::NEG_INFINITY, f64::max)
                            * (1.0 + add_pct)
                    }
                }
            }
            StopLossType::Percent { sl_pct } => entry_price * (1.0 - side.sign() * sl_pct),
        };

        let stop = finite("stop loss", self.snap_stop(side, raw))?;
        if stop <= 0.0 || !side.is_adverse(stop, entry_price) {
            return Err(EntryRejection::StopOnWrongSide {
                sl_price: stop,
                reference: entry_price,
            }
            .into());
        }
        Ok(stop)
    }

    /// Break-even level if this candle triggers the move, else `None`.
    ///
    /// The level must sit behind the triggering price; a fee-adjusted level
    /// above a barely-triggered close is not proposed.
    pub fn breakeven_level(
        &self,
        side: Side,
        candle: &Candle,
        avg_entry: f64,
        fees: Fees,
    ) -> Option<f64> {
        let rule = self.breakeven?;
        let price = candle.price(self.trigger_body);
        if side.favorable_move(avg_entry, price) <= rule.trigger_pct {
            return None;
        }
        let level = match rule.target {
            BreakevenTarget::AvgEntry => avg_entry,
            BreakevenTarget::FeeAdjusted => fees.breakeven_price(side, avg_entry),
        };
        let level = self.snap_stop(side, level);
        side.is_adverse(level, price).then_some(level)
    }

    /// Trailing proposal for this candle, if trailing is active.
    pub fn trailing_level(&self, side: Side, candle: &Candle, avg_entry: f64) -> Option<f64> {
        let rule = self.trailing?;
        let price = candle.price(self.trigger_body);
        if side.favorable_move(avg_entry, price) <= rule.activation_pct {
            return None;
        }
        let level = price * (1.0 - side.sign() * rule.trail_pct);
        Some(self.snap_stop(side, level))
    }

    /// Stops round away from price.
    fn snap_stop(&self, side: Side, price: f64) -> f64 {
        match (self.price_tick_step, side) {
            (None, _) => price,
            (Some(step), Side::Long) => floor_to_step(price, step),
            (Some(step), Side::Short) => ceil_to_step(price, step),
        }
    }
}
