//! Policy configuration and the immutable per-run policy set.
//!
//! `PolicyConfig` is the serializable description of a strategy's money
//! management. [`PolicySet::new`] validates it once and resolves every policy
//! family to a concrete variant; the engine only ever sees the resolved set.

pub mod leverage;
pub mod ratchet;
pub mod sizing;
pub mod stop_loss;
pub mod take_profit;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CandleBody, Side};
use crate::error::EntryRejection;

pub use leverage::{
    bankruptcy_price, liquidation_price, max_safe_leverage, LeverageDecision, LeveragePolicy,
    LeverageSafety, LeverageType, MarginReservation, LIQ_CUSHION,
};
pub use ratchet::StopRatchet;
pub use sizing::{EntrySize, Exposure, SizeDecision, SizingContext, SizingPolicy};
pub use stop_loss::{BreakevenRule, BreakevenTarget, StopLossPolicy, StopLossType, TrailingRule};
pub use take_profit::{TakeProfitPolicy, TargetContext};

/// Configuration rejected before any simulation runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: both risk_reward and tp_pct are set")]
    ConflictingTakeProfit,

    #[error("invalid configuration: {field} is required when {when}")]
    MissingParameter {
        field: &'static str,
        when: &'static str,
    },

    #[error("invalid configuration: {field} = {value} must be {expected}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
}

/// What happens to a position still open when the candles run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfStream {
    /// Report it open with its unrealized PnL.
    #[default]
    LeaveOpen,
    /// Close it at the last candle's close.
    ForceClose,
}

/// Serializable money-management configuration for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub side: Side,
    pub entry_size: EntrySize,
    pub stop_loss: StopLossType,

    #[serde(default)]
    pub trailing_enabled: bool,
    #[serde(default)]
    pub trail_pct: Option<f64>,
    #[serde(default)]
    pub trail_activation_pct: f64,
    #[serde(default)]
    pub breakeven: Option<BreakevenRule>,
    /// Candle field break-even and trailing measure against.
    #[serde(default)]
    pub trigger_body: CandleBody,

    /// Exactly one of `risk_reward` / `tp_pct` must be set.
    #[serde(default)]
    pub risk_reward: Option<f64>,
    #[serde(default)]
    pub tp_pct: Option<f64>,
    #[serde(default)]
    pub tp_fee_adjusted: bool,

    pub leverage: LeverageType,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    #[serde(default)]
    pub mmr_pct: f64,
    #[serde(default = "default_leverage_tick_step")]
    pub leverage_tick_step: f64,
    #[serde(default)]
    pub leverage_safety: LeverageSafety,

    #[serde(default)]
    pub fee_pct_entry: f64,
    #[serde(default)]
    pub fee_pct_exit: f64,

    #[serde(default)]
    pub min_order_size_pct: f64,
    #[serde(default)]
    pub max_order_size_pct: Option<f64>,
    #[serde(default)]
    pub min_order_size_value: f64,
    #[serde(default)]
    pub max_order_size_value: Option<f64>,
    /// Cap on a position's accumulated possible loss, as a fraction of equity.
    #[serde(default)]
    pub max_equity_risk_pct: Option<f64>,
    #[serde(default)]
    pub asset_tick_step: Option<f64>,
    #[serde(default)]
    pub price_tick_step: Option<f64>,

    /// Fills allowed per position. 1 disables increases.
    #[serde(default = "default_max_entries")]
    pub max_entries: u32,
    #[serde(default)]
    pub end_of_stream: EndOfStream,
    /// Bars before this index never open a position.
    #[serde(default)]
    pub starting_bar: usize,
}

fn default_max_leverage() -> f64 {
    100.0
}

fn default_leverage_tick_step() -> f64 {
    0.01
}

fn default_max_entries() -> u32 {
    1
}

impl Default for PolicyConfig {
    /// Long, 1% equity risk, 5% stop, 2R target, 1x leverage, no fees.
    fn default() -> Self {
        Self {
            side: Side::Long,
            entry_size: EntrySize::RiskPctAccount { risk_pct: 0.01 },
            stop_loss: StopLossType::Percent { sl_pct: 0.05 },
            trailing_enabled: false,
            trail_pct: None,
            trail_activation_pct: 0.0,
            breakeven: None,
            trigger_body: CandleBody::Close,
            risk_reward: Some(2.0),
            tp_pct: None,
            tp_fee_adjusted: false,
            leverage: LeverageType::Static { leverage: 1.0 },
            max_leverage: default_max_leverage(),
            mmr_pct: 0.0,
            leverage_tick_step: default_leverage_tick_step(),
            leverage_safety: LeverageSafety::Reduce,
            fee_pct_entry: 0.0,
            fee_pct_exit: 0.0,
            min_order_size_pct: 0.0,
            max_order_size_pct: None,
            min_order_size_value: 0.0,
            max_order_size_value: None,
            max_equity_risk_pct: None,
            asset_tick_step: None,
            price_tick_step: None,
            max_entries: default_max_entries(),
            end_of_stream: EndOfStream::LeaveOpen,
            starting_bar: 0,
        }
    }
}

// ─── Validation helpers ─────────────────────────────────────────────

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "finite and > 0",
        })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "finite and >= 0",
        })
    }
}

/// `0 < value < 1`
fn fraction(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "in (0, 1)",
        })
    }
}

/// `0 <= value < 1`
fn rate(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            expected: "in [0, 1)",
        })
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.entry_size {
            EntrySize::Amount { amount } => positive("entry_size.amount", amount)?,
            EntrySize::PctAccount { pct } => positive("entry_size.pct", pct)?,
            EntrySize::RiskAmount { amount } => positive("entry_size.amount", amount)?,
            EntrySize::RiskPctAccount { risk_pct } => fraction("entry_size.risk_pct", risk_pct)?,
        }

        match self.stop_loss {
            StopLossType::CandleBody { add_pct, .. } => rate("stop_loss.add_pct", add_pct)?,
            StopLossType::Percent { sl_pct } => fraction("stop_loss.sl_pct", sl_pct)?,
        }

        if self.trailing_enabled {
            let trail_pct = self.trail_pct.ok_or(ConfigError::MissingParameter {
                field: "trail_pct",
                when: "trailing_enabled is true",
            })?;
            fraction("trail_pct", trail_pct)?;
        }
        non_negative("trail_activation_pct", self.trail_activation_pct)?;
        if let Some(rule) = &self.breakeven {
            non_negative("breakeven.trigger_pct", rule.trigger_pct)?;
        }

        match (self.risk_reward, self.tp_pct) {
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingTakeProfit),
            (None, None) => {
                return Err(ConfigError::MissingParameter {
                    field: "risk_reward or tp_pct",
                    when: "a take-profit target is configured",
                })
            }
            (Some(rr), None) => positive("risk_reward", rr)?,
            (None, Some(pct)) => match self.side {
                Side::Long => positive("tp_pct", pct)?,
                Side::Short => fraction("tp_pct", pct)?,
            },
        }

        if !(self.max_leverage.is_finite() && self.max_leverage >= 1.0) {
            return Err(ConfigError::OutOfRange {
                field: "max_leverage",
                value: self.max_leverage,
                expected: "finite and >= 1",
            });
        }
        if let LeverageType::Static { leverage } = self.leverage {
            positive("leverage.leverage", leverage)?;
        }
        rate("mmr_pct", self.mmr_pct)?;
        positive("leverage_tick_step", self.leverage_tick_step)?;

        rate("fee_pct_entry", self.fee_pct_entry)?;
        rate("fee_pct_exit", self.fee_pct_exit)?;

        non_negative("min_order_size_pct", self.min_order_size_pct)?;
        non_negative("min_order_size_value", self.min_order_size_value)?;
        if let Some(max) = self.max_order_size_pct {
            positive("max_order_size_pct", max)?;
            if max < self.min_order_size_pct {
                return Err(ConfigError::OutOfRange {
                    field: "max_order_size_pct",
                    value: max,
                    expected: ">= min_order_size_pct",
                });
            }
        }
        if let Some(max) = self.max_order_size_value {
            positive("max_order_size_value", max)?;
            if max < self.min_order_size_value {
                return Err(ConfigError::OutOfRange {
                    field: "max_order_size_value",
                    value: max,
                    expected: ">= min_order_size_value",
                });
            }
        }
        if let Some(pct) = self.max_equity_risk_pct {
            positive("max_equity_risk_pct", pct)?;
        }
        if let Some(step) = self.asset_tick_step {
            positive("asset_tick_step", step)?;
        }
        if let Some(step) = self.price_tick_step {
            positive("price_tick_step", step)?;
        }

        if self.max_entries == 0 {
            return Err(ConfigError::OutOfRange {
                field: "max_entries",
                value: 0.0,
                expected: ">= 1",
            });
        }
        Ok(())
    }
}

// ─── Resolved policies ──────────────────────────────────────────────

/// Entry and exit fee rates, as fractions of notional.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Fees {
    pub entry: f64,
    pub exit: f64,
}

impl Fees {
    /// PnL net of both fees for a position of cost basis `cost_usd` and
    /// `size_asset` units, exited at `exit_price`.
    pub fn net_pnl(&self, side: Side, cost_usd: f64, size_asset: f64, exit_price: f64) -> f64 {
        match side {
            Side::Long => size_asset * exit_price * (1.0 - self.exit) - cost_usd * (1.0 + self.entry),
            Side::Short => cost_usd * (1.0 - self.entry) - size_asset * exit_price * (1.0 + self.exit),
        }
    }

    /// Loss (as a positive number) if exited at `stop_price`.
    pub fn loss_at(&self, side: Side, cost_usd: f64, size_asset: f64, stop_price: f64) -> f64 {
        -self.net_pnl(side, cost_usd, size_asset, stop_price)
    }

    /// Exit price at which net PnL is zero.
    pub fn breakeven_price(&self, side: Side, avg_entry: f64) -> f64 {
        match side {
            Side::Long => avg_entry * (1.0 + self.entry) / (1.0 - self.exit),
            Side::Short => avg_entry * (1.0 - self.entry) / (1.0 + self.exit),
        }
    }
}

/// Order size bounds and the optional equity risk cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderLimits {
    pub min_pct: f64,
    pub max_pct: Option<f64>,
    pub min_value: f64,
    pub max_value: Option<f64>,
    pub max_equity_risk_pct: Option<f64>,
}

impl OrderLimits {
    /// Reject a fill outside the value and percent-of-equity bounds. Sizes
    /// are never clamped.
    pub fn check_size(&self, size_usd: f64, equity: f64) -> Result<(), EntryRejection> {
        let min_usd = self.min_value.max(self.min_pct * equity);
        if size_usd < min_usd {
            return Err(EntryRejection::BelowMinOrderSize { size_usd, min_usd });
        }
        let max_usd = match (self.max_value, self.max_pct) {
            (None, None) => return Ok(()),
            (Some(v), None) => v,
            (None, Some(p)) => p * equity,
            (Some(v), Some(p)) => v.min(p * equity),
        };
        if size_usd > max_usd {
            return Err(EntryRejection::AboveMaxOrderSize { size_usd, max_usd });
        }
        Ok(())
    }

    pub fn check_risk(&self, possible_loss: f64, equity: f64) -> Result<(), EntryRejection> {
        match self.max_equity_risk_pct {
            Some(pct) if possible_loss > equity * pct => Err(EntryRejection::RiskLimitExceeded {
                possible_loss,
                limit: equity * pct,
            }),
            _ => Ok(()),
        }
    }
}

/// Validated, immutable dispatch for one run.
///
/// Built once from a [`PolicyConfig`]; shared read-only by the engine. No
/// state is kept between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySet {
    pub side: Side,
    pub sizing: SizingPolicy,
    pub stop_loss: StopLossPolicy,
    pub take_profit: TakeProfitPolicy,
    pub leverage: LeveragePolicy,
    pub fees: Fees,
    pub limits: OrderLimits,
    pub price_tick_step: Option<f64>,
    pub max_entries: u32,
    pub end_of_stream: EndOfStream,
    pub starting_bar: usize,
}

impl PolicySet {
    pub fn new(config: &PolicyConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let fees = Fees {
            entry: config.fee_pct_entry,
            exit: config.fee_pct_exit,
        };

        let trailing = match (config.trailing_enabled, config.trail_pct) {
            (true, Some(trail_pct)) => Some(TrailingRule {
                trail_pct,
                activation_pct: config.trail_activation_pct,
            }),
            _ => None,
        };

        let take_profit = match (config.risk_reward, config.tp_pct) {
            (Some(risk_reward), _) => TakeProfitPolicy::RiskReward {
                risk_reward,
                fee_adjusted: config.tp_fee_adjusted,
            },
            (None, Some(tp_pct)) => TakeProfitPolicy::Percent { tp_pct },
            (None, None) => {
                return Err(ConfigError::MissingParameter {
                    field: "risk_reward or tp_pct",
                    when: "a take-profit target is configured",
                })
            }
        };

        Ok(Self {
            side: config.side,
            sizing: SizingPolicy {
                kind: config.entry_size,
                fees,
                asset_tick_step: config.asset_tick_step,
            },
            stop_loss: StopLossPolicy {
                initial: config.stop_loss,
                trailing,
                breakeven: config.breakeven,
                trigger_body: config.trigger_body,
                price_tick_step: config.price_tick_step,
            },
            take_profit,
            leverage: LeveragePolicy {
                kind: config.leverage,
                max_leverage: config.max_leverage,
                mmr_pct: config.mmr_pct,
                tick_step: config.leverage_tick_step,
                safety: config.leverage_safety,
            },
            fees,
            limits: OrderLimits {
                min_pct: config.min_order_size_pct,
                max_pct: config.max_order_size_pct,
                min_value: config.min_order_size_value,
                max_value: config.max_order_size_value,
                max_equity_risk_pct: config.max_equity_risk_pct,
            },
            price_tick_step: config.price_tick_step,
            max_entries: config.max_entries,
            end_of_stream: config.end_of_stream,
            starting_bar: config.starting_bar,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let set = PolicySet::new(&PolicyConfig::default()).unwrap();
        assert_eq!(set.max_entries, 1);
        assert_eq!(set.end_of_stream, EndOfStream::LeaveOpen);
        assert!(set.stop_loss.trailing.is_none());
    }

    #[test]
    fn both_targets_is_invalid() {
        let config = PolicyConfig {
            risk_reward: Some(2.0),
            tp_pct: Some(0.1),
            ..PolicyConfig::default()
        };
        assert_eq!(
            PolicySet::new(&config).unwrap_err(),
            ConfigError::ConflictingTakeProfit
        );
    }

    #[test]
    fn no_target_is_invalid() {
        let config = PolicyConfig {
            risk_reward: None,
            ..PolicyConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingParameter { .. })
        ));
    }

    #[test]
    fn trailing_needs_trail_pct() {
        let config = PolicyConfig {
            trailing_enabled: true,
            ..PolicyConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingParameter {
                field: "trail_pct",
                ..
            })
        ));
    }

    #[test]
    fn trail_pct_without_enable_is_ignored() {
        let config = PolicyConfig {
            trail_pct: Some(0.02),
            ..PolicyConfig::default()
        };
        let set = PolicySet::new(&config).unwrap();
        assert!(set.stop_loss.trailing.is_none());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let bad = [
            PolicyConfig {
                stop_loss: StopLossType::Percent { sl_pct: 1.5 },
                ..PolicyConfig::default()
            },
            PolicyConfig {
                fee_pct_entry: -0.01,
                ..PolicyConfig::default()
            },
            PolicyConfig {
                max_leverage: 0.5,
                ..PolicyConfig::default()
            },
            PolicyConfig {
                max_entries: 0,
                ..PolicyConfig::default()
            },
            PolicyConfig {
                entry_size: EntrySize::RiskPctAccount { risk_pct: f64::NAN },
                ..PolicyConfig::default()
            },
            PolicyConfig {
                side: Side::Short,
                risk_reward: None,
                tp_pct: Some(1.0),
                ..PolicyConfig::default()
            },
            PolicyConfig {
                min_order_size_value: 100.0,
                max_order_size_value: Some(50.0),
                ..PolicyConfig::default()
            },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(ConfigError::OutOfRange { .. })),
                "{config:?}"
            );
        }
    }

    #[test]
    fn deserializes_from_toml_with_defaults() {
        let toml_str = r#"
            side = "short"
            tp_pct = 0.04
            fee_pct_entry = 0.0006
            fee_pct_exit = 0.0006

            [entry_size]
            type = "RISK_AMOUNT"
            amount = 25.0

            [stop_loss]
            type = "CANDLE_BODY"
            lookback = 3

            [leverage]
            type = "DYNAMIC"
        "#;
        let config: PolicyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.side, Side::Short);
        assert_eq!(config.entry_size, EntrySize::RiskAmount { amount: 25.0 });
        assert_eq!(
            config.stop_loss,
            StopLossType::CandleBody {
                lookback: 3,
                add_pct: 0.0
            }
        );
        assert_eq!(config.max_leverage, 100.0);
        assert_eq!(config.max_entries, 1);
        let set = PolicySet::new(&config).unwrap();
        assert_eq!(set.take_profit, TakeProfitPolicy::Percent { tp_pct: 0.04 });
    }

    #[test]
    fn order_limits() {
        let limits = OrderLimits {
            min_pct: 0.01,
            max_pct: Some(0.5),
            min_value: 5.0,
            max_value: Some(10_000.0),
            max_equity_risk_pct: Some(0.02),
        };
        assert!(limits.check_size(100.0, 1000.0).is_ok());
        assert_eq!(
            limits.check_size(8.0, 1000.0),
            Err(EntryRejection::BelowMinOrderSize {
                size_usd: 8.0,
                min_usd: 10.0
            })
        );
        assert_eq!(
            limits.check_size(600.0, 1000.0),
            Err(EntryRejection::AboveMaxOrderSize {
                size_usd: 600.0,
                max_usd: 500.0
            })
        );
        assert!(limits.check_risk(20.0, 1000.0).is_ok());
        assert!(limits.check_risk(20.5, 1000.0).is_err());
    }

    #[test]
    fn fee_math() {
        let fees = Fees {
            entry: 0.001,
            exit: 0.002,
        };
        let be = fees.breakeven_price(Side::Long, 100.0);
        assert!(fees.net_pnl(Side::Long, 100.0, 1.0, be).abs() < 1e-9);
        let be = fees.breakeven_price(Side::Short, 100.0);
        assert!(fees.net_pnl(Side::Short, 100.0, 1.0, be).abs() < 1e-9);
        assert!((fees.loss_at(Side::Long, 100.0, 1.0, 95.0) - (100.1 - 95.0 * 0.998)).abs() < 1e-9);
    }
}
