//! OrderEvent — the append-only ledger the engine emits.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind {
    EntryLong,
    EntryShort,
    IncreasePosition,
    StopLossExit,
    TrailingStopLossExit,
    TakeProfitExit,
    MoveSlToBreakeven,
    MoveTrailingStop,
    EndOfStreamExit,
}

impl OrderEventKind {
    /// Exits are the only events that carry a realized PnL.
    pub fn is_exit(self) -> bool {
        matches!(
            self,
            OrderEventKind::StopLossExit
                | OrderEventKind::TrailingStopLossExit
                | OrderEventKind::TakeProfitExit
                | OrderEventKind::EndOfStreamExit
        )
    }

    pub fn is_entry(self) -> bool {
        matches!(self, OrderEventKind::EntryLong | OrderEventKind::EntryShort)
    }

    /// Stable small integer used when hashing event logs.
    pub fn code(self) -> u8 {
        match self {
            OrderEventKind::EntryLong => 0,
            OrderEventKind::EntryShort => 1,
            OrderEventKind::IncreasePosition => 2,
            OrderEventKind::StopLossExit => 3,
            OrderEventKind::TrailingStopLossExit => 4,
            OrderEventKind::TakeProfitExit => 5,
            OrderEventKind::MoveSlToBreakeven => 6,
            OrderEventKind::MoveTrailingStop => 7,
            OrderEventKind::EndOfStreamExit => 8,
        }
    }
}

impl fmt::Display for OrderEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrderEventKind::EntryLong => "entry_long",
            OrderEventKind::EntryShort => "entry_short",
            OrderEventKind::IncreasePosition => "increase_position",
            OrderEventKind::StopLossExit => "stop_loss_exit",
            OrderEventKind::TrailingStopLossExit => "trailing_stop_loss_exit",
            OrderEventKind::TakeProfitExit => "take_profit_exit",
            OrderEventKind::MoveSlToBreakeven => "move_sl_to_breakeven",
            OrderEventKind::MoveTrailingStop => "move_trailing_stop",
            OrderEventKind::EndOfStreamExit => "end_of_stream_exit",
        };
        f.write_str(name)
    }
}

/// One ledger entry. Never mutated after creation.
///
/// `price` is the fill price for entries and exits, and the new stop level for
/// stop moves. `size` is the asset quantity filled (or held, for stop moves).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub bar_index: usize,
    pub timestamp: i64,
    pub kind: OrderEventKind,
    pub price: f64,
    pub size: f64,
    pub realized_pnl: Option<f64>,
}
