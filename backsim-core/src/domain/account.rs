use serde::{Deserialize, Serialize};

/// Run-wide account balances.
///
/// `fees_paid`, `realized_pnl` and `total_trades` accumulate over the run.
/// Equity is never clamped: a losing run may leave it at or below zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: f64,
    pub available_balance: f64,
    pub cash_used: f64,
    pub cash_borrowed: f64,
    pub fees_paid: f64,
    pub realized_pnl: f64,
    /// Closed positions.
    pub total_trades: usize,
}

impl AccountState {
    pub fn new(initial_equity: f64) -> Self {
        Self {
            equity: initial_equity,
            available_balance: initial_equity,
            cash_used: 0.0,
            cash_borrowed: 0.0,
            fees_paid: 0.0,
            realized_pnl: 0.0,
            total_trades: 0,
        }
    }

    pub fn is_depleted(&self) -> bool {
        self.equity <= 0.0
    }
}
