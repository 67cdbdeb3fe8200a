//! PositionEngine — the flat → open → flat state machine.
//!
//! Owns the single position and the account. Every fill, stop move and exit
//! goes through here and comes back as an [`OrderEvent`]; the caller appends
//! it to the ledger.

use tracing::{debug, warn};

use crate::domain::{
    AccountState, Candle, OrderEvent, OrderEventKind, PositionState, PositionStatus, Side,
};
use crate::error::{checked_div, finite, ArithmeticFault, EngineError, EntryRejection};
use crate::policy::{
    Exposure, LeverageDecision, MarginReservation, PolicySet, SizeDecision, SizingContext,
    StopRatchet, TargetContext,
};
use crate::precision::round_money;

/// Outcome of testing one candle against the open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoAction,
    Increase,
    StopLossHit,
    TakeProfitHit,
}

/// Why a position is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Fill at `sl_price`.
    StopLoss,
    /// Fill at `tp_price`.
    TakeProfit,
    /// Fill at the candle's close.
    EndOfStream,
}

/// Everything a fill needs, computed before any state is touched.
#[derive(Debug, Clone, Copy)]
struct FillPlan {
    entry_price: f64,
    size: SizeDecision,
    avg_entry: f64,
    total_usd: f64,
    total_asset: f64,
    sl_price: f64,
    tp_price: f64,
    leverage: LeverageDecision,
    margin: MarginReservation,
}

pub struct PositionEngine<'a> {
    policies: &'a PolicySet,
    position: PositionState,
    account: AccountState,
}

impl<'a> PositionEngine<'a> {
    pub fn new(policies: &'a PolicySet, initial_equity: f64) -> Self {
        Self {
            policies,
            position: PositionState::flat(policies.side),
            account: AccountState::new(initial_equity),
        }
    }

    pub fn position(&self) -> &PositionState {
        &self.position
    }

    pub fn account(&self) -> &AccountState {
        &self.account
    }

    pub fn into_parts(self) -> (PositionState, AccountState) {
        (self.position, self.account)
    }

    /// Open a position at the close of `candles[bar_index]`.
    ///
    /// Stop first, then size against that stop, then leverage and target, then
    /// the margin reservation. Nothing is mutated unless every step succeeds.
    pub fn open(
        &mut self,
        candles: &[Candle],
        bar_index: usize,
    ) -> Result<OrderEvent, EngineError> {
        if self.position.is_open() {
            return Err(EngineError::AlreadyOpen);
        }
        let candle = candle_at(candles, bar_index)?;
        let plan = self.plan_fill(candles, bar_index, Exposure::default())?;
        self.apply_fill(&plan, bar_index);

        let kind = match self.policies.side {
            Side::Long => OrderEventKind::EntryLong,
            Side::Short => OrderEventKind::EntryShort,
        };
        debug!(
            bar = bar_index,
            price = plan.entry_price,
            size = plan.size.size_asset,
            sl = plan.sl_price,
            tp = plan.tp_price,
            leverage = plan.leverage.leverage,
            "position opened"
        );
        Ok(OrderEvent {
            bar_index,
            timestamp: candle.timestamp,
            kind,
            price: plan.entry_price,
            size: plan.size.size_asset,
            realized_pnl: None,
        })
    }

    /// Add to the open position at the close of `candles[bar_index]`.
    ///
    /// The stop is re-placed for the new fill, the size is solved against the
    /// whole position, and leverage and target are recomputed from the new
    /// average entry. Break-even state carries over; trailing restarts.
    pub fn increase(
        &mut self,
        candles: &[Candle],
        bar_index: usize,
    ) -> Result<OrderEvent, EngineError> {
        if !self.position.is_open() {
            return Err(EngineError::NotOpen);
        }
        if self.position.entries >= self.policies.max_entries {
            return Err(EntryRejection::MaxEntriesReached {
                entries: self.position.entries,
            }
            .into());
        }
        let candle = candle_at(candles, bar_index)?;
        let existing = Exposure {
            size_usd: self.position.position_size_usd,
            size_asset: self.position.position_size_asset,
            possible_loss: self.position.possible_loss,
        };
        let plan = self.plan_fill(candles, bar_index, existing)?;
        self.apply_fill(&plan, bar_index);

        debug!(
            bar = bar_index,
            price = plan.entry_price,
            size = plan.size.size_asset,
            avg_entry = plan.avg_entry,
            entries = self.position.entries,
            "position increased"
        );
        Ok(OrderEvent {
            bar_index,
            timestamp: candle.timestamp,
            kind: OrderEventKind::IncreasePosition,
            price: plan.entry_price,
            size: plan.size.size_asset,
            realized_pnl: None,
        })
    }

    /// Test a candle against the open position. Pure.
    ///
    /// Precedence: increase, then stop-loss, then take-profit. A candle that
    /// crosses both the stop and the target is a stop-out.
    pub fn evaluate(&self, candle: &Candle, signal: bool) -> Decision {
        let p = &self.position;
        if !p.is_open() {
            return Decision::NoAction;
        }
        if signal && p.entries < self.policies.max_entries {
            return Decision::Increase;
        }
        let (sl_hit, tp_hit) = match p.side {
            Side::Long => (candle.low <= p.sl_price, candle.high >= p.tp_price),
            Side::Short => (candle.high >= p.sl_price, candle.low <= p.tp_price),
        };
        if sl_hit {
            Decision::StopLossHit
        } else if tp_hit {
            Decision::TakeProfitHit
        } else {
            Decision::NoAction
        }
    }

    /// Close the position, book realized PnL and fees, and reset to flat.
    pub fn close(
        &mut self,
        candle: &Candle,
        bar_index: usize,
        exit: ExitKind,
    ) -> Result<OrderEvent, EngineError> {
        let p = &self.position;
        if !p.is_open() {
            return Err(EngineError::NotOpen);
        }
        let (price, kind) = match exit {
            ExitKind::StopLoss if p.trailing_sl_price.is_some() => {
                (p.sl_price, OrderEventKind::TrailingStopLossExit)
            }
            ExitKind::StopLoss => (p.sl_price, OrderEventKind::StopLossExit),
            ExitKind::TakeProfit => (p.tp_price, OrderEventKind::TakeProfitExit),
            ExitKind::EndOfStream => (candle.close, OrderEventKind::EndOfStreamExit),
        };
        let price = finite("exit price", price)?;

        let size = p.position_size_asset;
        let fees = self.policies.fees;
        let fee_open = size * p.avg_entry * fees.entry;
        let fee_close = size * price * fees.exit;
        let pnl = p.side.sign() * size * (price - p.avg_entry);
        let realized = round_money(finite("realized pnl", pnl - fee_open - fee_close)?);

        let account = &mut self.account;
        account.equity = round_money(account.equity + realized);
        account.fees_paid = round_money(account.fees_paid + fee_open + fee_close);
        account.realized_pnl = round_money(account.realized_pnl + realized);
        account.total_trades += 1;
        account.available_balance = account.equity;
        account.cash_used = 0.0;
        account.cash_borrowed = 0.0;

        debug!(bar = bar_index, %kind, price, realized, equity = account.equity, "position closed");
        if account.is_depleted() {
            warn!(bar = bar_index, equity = account.equity, "account depleted");
        }

        self.position = PositionState::flat(self.policies.side);
        Ok(OrderEvent {
            bar_index,
            timestamp: candle.timestamp,
            kind,
            price,
            size,
            realized_pnl: Some(realized),
        })
    }

    /// Break-even, then trailing. Each move is emitted only if it tightened
    /// the stop.
    pub fn update_stops(&mut self, candle: &Candle, bar_index: usize) -> Vec<OrderEvent> {
        let mut events = Vec::new();
        if !self.position.is_open() {
            return events;
        }
        let policies = self.policies;
        let stops = &policies.stop_loss;
        let side = self.position.side;
        let avg_entry = self.position.avg_entry;
        let mut ratchet = StopRatchet::new(side, self.position.sl_price);

        if !self.position.moved_to_breakeven {
            if let Some(level) = stops.breakeven_level(side, candle, avg_entry, policies.fees) {
                self.position.moved_to_breakeven = true;
                if let Some(level) = ratchet.tighten(level) {
                    self.position.sl_price = level;
                    self.position.trailing_sl_price = None;
                    events.push(self.stop_event(candle, bar_index, OrderEventKind::MoveSlToBreakeven));
                }
            }
        }

        if let Some(level) = stops.trailing_level(side, candle, avg_entry) {
            if let Some(level) = ratchet.tighten(level) {
                self.position.sl_price = level;
                self.position.trailing_sl_price = Some(level);
                events.push(self.stop_event(candle, bar_index, OrderEventKind::MoveTrailingStop));
            }
        }
        events
    }

    /// PnL net of both fees if the position were closed at `price`.
    pub fn unrealized_pnl(&self, price: f64) -> Option<f64> {
        let p = &self.position;
        p.is_open().then(|| {
            round_money(self.policies.fees.net_pnl(
                p.side,
                p.position_size_usd,
                p.position_size_asset,
                price,
            ))
        })
    }

    // ─── Helpers ───────────────────────────────────────────────────

    fn plan_fill(
        &self,
        candles: &[Candle],
        bar_index: usize,
        existing: Exposure,
    ) -> Result<FillPlan, EngineError> {
        let policies = self.policies;
        let side = policies.side;
        let equity = self.account.equity;
        let candle = candle_at(candles, bar_index)?;

        let entry_price = finite("entry price", candle.close)?;
        if entry_price <= 0.0 {
            return Err(ArithmeticFault {
                what: "entry price",
                value: entry_price,
            }
            .into());
        }

        let sl_price = policies
            .stop_loss
            .initial_stop(side, candles, bar_index, entry_price)?;

        let size = policies.sizing.size(&SizingContext {
            side,
            equity,
            entry_price,
            sl_price,
            existing,
        })?;
        policies.limits.check_size(size.size_usd, equity)?;
        policies.limits.check_risk(size.possible_loss, equity)?;

        let total_usd = existing.size_usd + size.size_usd;
        let total_asset = existing.size_asset + size.size_asset;
        let avg_entry = checked_div("average entry", total_usd, total_asset)?;
        if !side.is_adverse(sl_price, avg_entry) {
            return Err(EntryRejection::StopOnWrongSide {
                sl_price,
                reference: avg_entry,
            }
            .into());
        }

        let leverage = policies.leverage.decide(side, avg_entry, sl_price)?;
        let tp_price = policies.take_profit.target(
            &TargetContext {
                side,
                avg_entry,
                sl_price,
                size_usd: total_usd,
                size_asset: total_asset,
            },
            policies.fees,
            policies.price_tick_step,
        )?;

        let margin = policies
            .leverage
            .margin(size.size_usd, leverage.leverage, policies.fees.entry);
        if margin.cost > self.account.available_balance {
            return Err(EntryRejection::InsufficientSize {
                size_usd: size.size_usd,
                available: self.account.available_balance,
            }
            .into());
        }

        Ok(FillPlan {
            entry_price,
            size,
            avg_entry,
            total_usd,
            total_asset,
            sl_price,
            tp_price,
            leverage,
            margin,
        })
    }

    fn apply_fill(&mut self, plan: &FillPlan, bar_index: usize) {
        let account = &mut self.account;
        account.available_balance = round_money(account.available_balance - plan.margin.cost);
        account.cash_used = round_money(account.cash_used + plan.margin.cost);
        account.cash_borrowed = round_money(account.cash_borrowed + plan.margin.borrowed);

        let p = &mut self.position;
        p.status = PositionStatus::Open;
        p.entry_price = plan.entry_price;
        p.avg_entry = plan.avg_entry;
        p.position_size_usd = plan.total_usd;
        p.position_size_asset = plan.total_asset;
        p.leverage = plan.leverage.leverage;
        p.liq_price = plan.leverage.liq_price;
        p.bankruptcy_price = plan.leverage.bankruptcy_price;
        p.sl_price = plan.sl_price;
        p.trailing_sl_price = None;
        p.tp_price = plan.tp_price;
        p.possible_loss = plan.size.possible_loss;
        p.entries += 1;
        p.opened_at.get_or_insert(bar_index);
    }

    fn stop_event(&self, candle: &Candle, bar_index: usize, kind: OrderEventKind) -> OrderEvent {
        debug!(bar = bar_index, %kind, sl = self.position.sl_price, "stop moved");
        OrderEvent {
            bar_index,
            timestamp: candle.timestamp,
            kind,
            price: self.position.sl_price,
            size: self.position.position_size_asset,
            realized_pnl: None,
        }
    }
}

fn candle_at(candles: &[Candle], bar_index: usize) -> Result<&Candle, EngineError> {
    candles
        .get(bar_index)
        .ok_or(EngineError::BarOutOfRange(bar_index))
}
