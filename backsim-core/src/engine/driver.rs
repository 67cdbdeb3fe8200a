//! SimulationDriver — one forward pass over the series.
//!
//! Per bar, flat:  signal ⇒ open at the close (rejections are counted, not fatal).
//! Per bar, open:  increase → stop-loss → take-profit → break-even/trailing.
//!
//! A bar that closes a position is never also an entry bar: the flat branch is
//! only taken on bars that start flat. A bar that fills an entry or an increase
//! is never tested for exits; the brackets placed at its close first apply to
//! the next bar. Cancellation is checked before each bar, so a run never stops
//! halfway through one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::position_engine::{Decision, ExitKind, PositionEngine};
use crate::domain::{AccountState, Candle, OrderEvent, PositionState, PriceSeries};
use crate::error::{EngineError, SkipReason};
use crate::policy::{ConfigError, EndOfStream, PolicyConfig, PolicySet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Cancelled before the last bar; results are partial.
    Incomplete,
    /// An arithmetic fault ended the run at `bar_index`.
    Failed { bar_index: usize, reason: String },
}

/// Everything a run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub events: Vec<OrderEvent>,
    pub account: AccountState,
    /// Position still open when the run ended (never set after a force-close).
    pub open_position: Option<PositionState>,
    /// Net PnL of `open_position` at the last processed close.
    pub unrealized_pnl: Option<f64>,
    pub status: RunStatus,
    pub bars_processed: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Realized PnL of each closed position, in order.
    pub fn trade_pnls(&self) -> Vec<f64> {
        self.events
            .iter()
            .filter_map(|e| e.kind.is_exit().then_some(e.realized_pnl).flatten())
            .collect()
    }
}

/// Validate `config` and run it over `series`.
pub fn run(
    series: &PriceSeries,
    config: &PolicyConfig,
    initial_equity: f64,
    cancel: Option<&AtomicBool>,
) -> Result<RunResult, ConfigError> {
    let policies = PolicySet::new(config)?;
    Ok(run_with_policies(series, &policies, initial_equity, cancel))
}

/// Run an already-validated policy set over `series`.
pub fn run_with_policies(
    series: &PriceSeries,
    policies: &PolicySet,
    initial_equity: f64,
    cancel: Option<&AtomicBool>,
) -> RunResult {
    run_with_cancel_check(series, policies, initial_equity, |_| {
        cancel.is_some_and(|f| f.load(Ordering::Relaxed))
    })
}

/// Run `policies` over `series`, asking `should_stop` before each bar index.
/// Returning `true` for bar `k` leaves bars `0..k` processed and the run
/// `Incomplete`.
pub fn run_with_cancel_check(
    series: &PriceSeries,
    policies: &PolicySet,
    initial_equity: f64,
    should_stop: impl Fn(usize) -> bool,
) -> RunResult {
    let candles = series.candles();
    let mut engine = PositionEngine::new(policies, initial_equity);
    let mut ledger = Ledger::default();
    let mut status = RunStatus::Completed;
    let mut bars_processed = 0;

    for (i, (candle, &signal)) in candles.iter().zip(series.signals()).enumerate() {
        if should_stop(i) {
            debug!(bar = i, "run cancelled");
            status = RunStatus::Incomplete;
            break;
        }

        let step = if engine.position().is_open() {
            step_open(&mut engine, candles, i, candle, signal, &mut ledger)
        } else if signal && i >= policies.starting_bar {
            step_flat(&mut engine, candles, i, &mut ledger)
        } else {
            Ok(())
        };
        bars_processed = i + 1;

        if let Err(err) = step {
            warn!(bar = i, error = %err, "run failed");
            status = RunStatus::Failed {
                bar_index: i,
                reason: err.to_string(),
            };
            break;
        }
    }

    let mut unrealized_pnl = None;
    if let Some(last) = bars_processed.checked_sub(1).and_then(|i| candles.get(i)) {
        if engine.position().is_open() {
            match (&status, policies.end_of_stream) {
                (RunStatus::Completed, EndOfStream::ForceClose) => {
                    match engine.close(last, bars_processed - 1, ExitKind::EndOfStream) {
                        Ok(event) => ledger.events.push(event),
                        Err(err) => {
                            status = RunStatus::Failed {
                                bar_index: bars_processed - 1,
                                reason: err.to_string(),
                            };
                        }
                    }
                }
                _ => {
                    unrealized_pnl = engine
                        .unrealized_pnl(last.close)
                        .filter(|pnl| pnl.is_finite())
                }
            }
        }
    }

    let (position, account) = engine.into_parts();
    debug!(
        events = ledger.events.len(),
        trades = account.total_trades,
        equity = account.equity,
        ?status,
        "run finished"
    );
    RunResult {
        events: ledger.events,
        account,
        open_position: position.is_open().then_some(position),
        unrealized_pnl,
        status,
        bars_processed,
        skipped: ledger.skipped,
    }
}

#[derive(Default)]
struct Ledger {
    events: Vec<OrderEvent>,
    skipped: BTreeMap<SkipReason, usize>,
    depletion_logged: bool,
}

impl Ledger {
    fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    /// Append `result`'s event, or count its rejection. Fatal errors pass through.
    fn record(&mut self, bar: usize, result: Result<OrderEvent, EngineError>) -> Result<(), EngineError> {
        match result {
            Ok(event) => {
                self.events.push(event);
                Ok(())
            }
            Err(EngineError::Rejected(rejection)) => {
                debug!(bar, reason = %rejection, "fill skipped");
                self.skip(rejection.reason());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

fn step_flat(
    engine: &mut PositionEngine<'_>,
    candles: &[Candle],
    i: usize,
    ledger: &mut Ledger,
) -> Result<(), EngineError> {
    if engine.account().is_depleted() {
        if !ledger.depletion_logged {
            warn!(bar = i, equity = engine.account().equity, "account depleted, entries disabled");
            ledger.depletion_logged = true;
        }
        ledger.skip(SkipReason::AccountDepleted);
        return Ok(());
    }
    let result = engine.open(candles, i);
    ledger.record(i, result)
}

fn step_open(
    engine: &mut PositionEngine<'_>,
    candles: &[Candle],
    i: usize,
    candle: &Candle,
    signal: bool,
    ledger: &mut Ledger,
) -> Result<(), EngineError> {
    let mut decision = engine.evaluate(candle, signal);
    if decision == Decision::Increase {
        match engine.increase(candles, i) {
            Ok(event) => {
                ledger.events.push(event);
                return Ok(());
            }
            Err(err) => ledger.record(i, Err(err))?,
        }
        decision = engine.evaluate(candle, false);
    }

    match decision {
        Decision::StopLossHit => {
            let event = engine.close(candle, i, ExitKind::StopLoss)?;
            ledger.events.push(event);
        }
        Decision::TakeProfitHit => {
            let event = engine.close(candle, i, ExitKind::TakeProfit)?;
            ledger.events.push(event);
        }
        Decision::NoAction | Decision::Increase => {
            ledger.events.extend(engine.update_stops(candle, i));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderEventKind;

    fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    fn series(candles: Vec<Candle>, signals: Vec<bool>) -> PriceSeries {
        PriceSeries::new(candles, signals).unwrap()
    }

    #[test]
    fn empty_series_completes() {
        let r = run(&series(vec![], vec![]), &PolicyConfig::default(), 1000.0, None).unwrap();
        assert!(r.is_completed());
        assert!(r.events.is_empty());
        assert_eq!(r.bars_processed, 0);
        assert_eq!(r.account, AccountState::new(1000.0));
    }

    #[test]
    fn invalid_config_never_runs() {
        let config = PolicyConfig {
            tp_pct: Some(0.1),
            ..PolicyConfig::default()
        };
        let err = run(&series(vec![], vec![]), &config, 1000.0, None).unwrap_err();
        assert_eq!(err, ConfigError::ConflictingTakeProfit);
    }

    #[test]
    fn pre_cancelled_run_is_incomplete() {
        let flag = AtomicBool::new(true);
        let s = series(vec![candle(0, 100.0, 101.0, 99.0, 100.0)], vec![true]);
        let r = run(&s, &PolicyConfig::default(), 1000.0, Some(&flag)).unwrap();
        assert_eq!(r.status, RunStatus::Incomplete);
        assert_eq!(r.bars_processed, 0);
        assert!(r.events.is_empty());
    }

    #[test]
    fn starting_bar_suppresses_early_signals() {
        let s = series(
            vec![
                candle(0, 100.0, 101.0, 99.0, 100.0),
                candle(1, 100.0, 101.0, 99.0, 100.0),
            ],
            vec![true, true],
        );
        let config = PolicyConfig {
            starting_bar: 1,
            ..PolicyConfig::default()
        };
        let r = run(&s, &config, 1000.0, None).unwrap();
        assert_eq!(r.events.len(), 1);
        assert_eq!(r.events[0].bar_index, 1);
    }

    #[test]
    fn leave_open_reports_unrealized() {
        let s = series(
            vec![
                candle(0, 100.0, 101.0, 99.0, 100.0),
                candle(1, 100.0, 104.0, 99.0, 103.0),
            ],
            vec![true, false],
        );
        let r = run(&s, &PolicyConfig::default(), 1000.0, None).unwrap();
        assert!(r.open_position.is_some());
        assert_eq!(r.unrealized_pnl, Some(6.0));
        assert_eq!(r.account.total_trades, 0);
    }

    #[test]
    fn force_close_books_the_last_close() {
        let s = series(
            vec![
                candle(0, 100.0, 101.0, 99.0, 100.0),
                candle(1, 100.0, 104.0, 99.0, 103.0),
            ],
            vec![true, false],
        );
        let config = PolicyConfig {
            end_of_stream: EndOfStream::ForceClose,
            ..PolicyConfig::default()
        };
        let r = run(&s, &config, 1000.0, None).unwrap();
        let last = r.events.last().unwrap();
        assert_eq!(last.kind, OrderEventKind::EndOfStreamExit);
        assert_eq!(last.bar_index, 1);
        assert_eq!(last.realized_pnl, Some(6.0));
        assert!(r.open_position.is_none());
        assert_eq!(r.account.equity, 1006.0);
        assert_eq!(r.trade_pnls(), vec![6.0]);
    }

    #[test]
    fn rejected_entries_are_counted() {
        let s = series(
            vec![
                candle(0, 100.0, 101.0, 99.0, 100.0),
                candle(1, 100.0, 101.0, 99.0, 100.0),
            ],
            vec![true, true],
        );
        let config = PolicyConfig {
            min_order_size_value: 500.0,
            ..PolicyConfig::default()
        };
        let r = run(&s, &config, 1000.0, None).unwrap();
        assert!(r.events.is_empty());
        assert_eq!(r.skipped.get(&SkipReason::BelowMinOrderSize), Some(&2));
        assert!(r.is_completed());
    }

    #[test]
    fn non_finite_close_fails_the_run() {
        let s = series(
            vec![
                candle(0, 100.0, 101.0, 99.0, 100.0),
                candle(1, 100.0, 101.0, 99.0, f64::NAN),
            ],
            vec![false, true],
        );
        let r = run(&s, &PolicyConfig::default(), 1000.0, None).unwrap();
        match r.status {
            RunStatus::Failed { bar_index, reason } => {
                assert_eq!(bar_index, 1);
                assert!(reason.contains("entry price"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
