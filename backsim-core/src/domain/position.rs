use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of the simulated position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    #[default]
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short. Multiplies a price move into PnL.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// True when `a` is strictly on the adverse side of `b` (below for longs,
    /// above for shorts).
    pub fn is_adverse(self, a: f64, b: f64) -> bool {
        match self {
            Side::Long => a < b,
            Side::Short => a > b,
        }
    }

    /// Signed fractional move from `reference` to `price`, positive when favorable.
    pub fn favorable_move(self, reference: f64, price: f64) -> f64 {
        self.sign() * (price - reference) / reference
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    #[default]
    Flat,
    Open,
}

/// The single position the engine manages.
///
/// While `Open`, `sl_price` is the live stop (initial, break-even or trailing).
/// `trailing_sl_price` is `Some` only while the live stop was last placed by
/// the trailing rule; a stop-out in that state is a trailing exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub side: Side,
    pub status: PositionStatus,
    /// Fill price of the most recent entry or increase.
    pub entry_price: f64,
    /// Size-weighted average entry across all fills.
    pub avg_entry: f64,
    pub position_size_asset: f64,
    /// Cost basis in quote currency (sum of fill notionals).
    pub position_size_usd: f64,
    pub leverage: f64,
    pub sl_price: f64,
    pub trailing_sl_price: Option<f64>,
    pub moved_to_breakeven: bool,
    pub tp_price: f64,
    pub liq_price: f64,
    pub bankruptcy_price: f64,
    /// Loss budget allocated to this position, fees included.
    pub possible_loss: f64,
    /// Fills in this position lifetime (entry counts as one).
    pub entries: u32,
    pub opened_at: Option<usize>,
}

impl PositionState {
    /// A zeroed, flat position.
    pub fn flat(side: Side) -> Self {
        Self {
            side,
            status: PositionStatus::Flat,
            entry_price: 0.0,
            avg_entry: 0.0,
            position_size_asset: 0.0,
            position_size_usd: 0.0,
            leverage: 1.0,
            sl_price: 0.0,
            trailing_sl_price: None,
            moved_to_breakeven: false,
            tp_price: 0.0,
            liq_price: 0.0,
            bankruptcy_price: 0.0,
            possible_loss: 0.0,
            entries: 0,
            opened_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Stop below avg_entry below target (long), inverted for shorts.
    pub fn brackets_are_ordered(&self) -> bool {
        self.side.is_adverse(self.sl_price, self.avg_entry)
            && self.side.is_adverse(self.avg_entry, self.tp_price)
    }

    /// Liquidation strictly beyond the stop in the adverse direction.
    pub fn liquidation_is_safe(&self) -> bool {
        self.side.is_adverse(self.liq_price, self.sl_price)
    }
}
