//! Integration tests for the simulation driver.
//!
//! Tests:
//! 1. Stop-loss and take-profit round trips at the bracket prices
//! 2. Risk sizing loses exactly the budget at the stop, fees included
//! 3. Leverage safety: unsafe requests are reduced or rejected
//! 4. Bar sequencing: no re-entry on a closing bar, increases, starting bar
//! 5. Run status: completed, cancelled, force-closed, failed

use backsim_core::domain::{Candle, OrderEventKind, PriceSeries, Side};
use backsim_core::engine::{run, run_with_cancel_check, RunStatus};
use backsim_core::error::SkipReason;
use backsim_core::policy::{
    EndOfStream, EntrySize, LeverageSafety, LeverageType, PolicyConfig, PolicySet, StopLossType,
};
use std::sync::atomic::AtomicBool;

const MINUTE: i64 = 60_000;

fn candle(i: usize, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        timestamp: i as i64 * MINUTE,
        open,
        high,
        low,
        close,
        volume: 1.0,
    }
}

/// Helper: flat bars around 100 that never touch a 5% bracket.
fn quiet(i: usize) -> Candle {
    candle(i, 100.0, 100.5, 99.5, 100.0)
}

fn series(candles: Vec<Candle>, signals: Vec<bool>) -> PriceSeries {
    PriceSeries::new(candles, signals).unwrap()
}

// ── 1. Bracket exits ─────────────────────────────────────────────────

#[test]
fn long_stop_loss_exit_at_stop_price() {
    let config = PolicyConfig {
        fee_pct_entry: 0.001,
        fee_pct_exit: 0.001,
        ..PolicyConfig::default()
    };
    let s = series(
        vec![quiet(0), candle(1, 99.0, 99.5, 94.0, 96.0)],
        vec![true, false],
    );
    let r = run(&s, &config, 1000.0, None).unwrap();

    assert_eq!(r.events.len(), 2);
    assert_eq!(r.events[0].kind, OrderEventKind::EntryLong);
    let exit = &r.events[1];
    assert_eq!(exit.kind, OrderEventKind::StopLossExit);
    assert_eq!(exit.price, 95.0);

    let size = exit.size;
    let expected = size * (95.0 - 100.0) - size * 100.0 * 0.001 - size * 95.0 * 0.001;
    let realized = exit.realized_pnl.unwrap();
    assert!(realized < 0.0);
    assert!((realized - (expected * 1000.0).round() / 1000.0).abs() < 1e-9);
    assert_eq!(r.account.total_trades, 1);
    assert!(r.open_position.is_none());
}

#[test]
fn long_take_profit_exit_at_target() {
    let s = series(
        vec![quiet(0), candle(1, 101.0, 111.0, 100.5, 108.0)],
        vec![true, false],
    );
    let r = run(&s, &PolicyConfig::default(), 1000.0, None).unwrap();
    let exit = r.events.last().unwrap();
    assert_eq!(exit.kind, OrderEventKind::TakeProfitExit);
    assert_eq!(exit.price, 110.0);
    assert_eq!(exit.realized_pnl, Some(20.0));
    assert_eq!(r.account.equity, 1020.0);
}

#[test]
fn short_stop_loss_exit() {
    let config = PolicyConfig {
        side: Side::Short,
        ..PolicyConfig::default()
    };
    let s = series(
        vec![quiet(0), candle(1, 101.0, 106.0, 100.5, 104.0)],
        vec![true, false],
    );
    let r = run(&s, &config, 1000.0, None).unwrap();
    assert_eq!(r.events[0].kind, OrderEventKind::EntryShort);
    let exit = &r.events[1];
    assert_eq!(exit.kind, OrderEventKind::StopLossExit);
    assert_eq!(exit.price, 105.0);
    assert_eq!(exit.realized_pnl, Some(-10.0));
}

#[test]
fn gap_through_stop_still_fills_at_stop() {
    let s = series(
        vec![quiet(0), candle(1, 90.0, 91.0, 89.0, 90.0)],
        vec![true, false],
    );
    let r = run(&s, &PolicyConfig::default(), 1000.0, None).unwrap();
    assert_eq!(r.events[1].price, 95.0);
}

// ── 2. Risk sizing ───────────────────────────────────────────────────

#[test]
fn risk_pct_sizing_loses_exactly_the_budget() {
    let config = PolicyConfig {
        entry_size: EntrySize::RiskPctAccount { risk_pct: 0.01 },
        fee_pct_entry: 0.0006,
        fee_pct_exit: 0.0006,
        ..PolicyConfig::default()
    };
    let s = series(
        vec![quiet(0), candle(1, 99.0, 99.5, 94.0, 96.0)],
        vec![true, false],
    );
    let r = run(&s, &config, 1000.0, None).unwrap();
    let realized = r.events[1].realized_pnl.unwrap();
    assert!((realized + 10.0).abs() <= 0.001, "realized {realized}");
}

#[test]
fn fixed_amount_sizing() {
    let config = PolicyConfig {
        entry_size: EntrySize::Amount { amount: 300.0 },
        ..PolicyConfig::default()
    };
    let s = series(vec![quiet(0)], vec![true]);
    let r = run(&s, &config, 1000.0, None).unwrap();
    assert!((r.events[0].size - 3.0).abs() < 1e-9);
    assert_eq!(r.account.cash_used, 300.0);
}

// ── 3. Leverage safety ───────────────────────────────────────────────

fn leveraged(safety: LeverageSafety) -> PolicyConfig {
    PolicyConfig {
        leverage: LeverageType::Static { leverage: 50.0 },
        leverage_safety: safety,
        mmr_pct: 0.005,
        ..PolicyConfig::default()
    }
}

#[test]
fn unsafe_leverage_is_reduced() {
    let s = series(vec![quiet(0)], vec![true]);
    let r = run(&s, &leveraged(LeverageSafety::Reduce), 1000.0, None).unwrap();
    let p = r.open_position.unwrap();
    assert!(p.leverage < 50.0);
    assert!(p.leverage >= 1.0);
    assert!(p.liq_price < p.sl_price);
    assert!(p.liquidation_is_safe());
}

#[test]
fn unsafe_leverage_is_rejected() {
    let s = series(vec![quiet(0), quiet(1)], vec![true, true]);
    let r = run(&s, &leveraged(LeverageSafety::Reject), 1000.0, None).unwrap();
    assert!(r.events.is_empty());
    assert!(r.open_position.is_none());
    assert_eq!(
        r.skipped.get(&SkipReason::LeverageViolatesLiquiditySafety),
        Some(&2)
    );
}

#[test]
fn dynamic_leverage_sits_behind_the_stop() {
    let config = PolicyConfig {
        leverage: LeverageType::Dynamic,
        mmr_pct: 0.005,
        ..PolicyConfig::default()
    };
    let s = series(vec![quiet(0)], vec![true]);
    let r = run(&s, &config, 1000.0, None).unwrap();
    let p = r.open_position.unwrap();
    assert!(p.leverage > 1.0);
    assert!(p.liq_price < p.sl_price);
}

// ── 4. Bar sequencing ────────────────────────────────────────────────

#[test]
fn no_reentry_on_the_closing_bar() {
    let s = series(
        vec![
            quiet(0),
            candle(1, 99.0, 99.5, 94.0, 96.0),
            candle(2, 96.0, 96.5, 95.5, 96.0),
        ],
        vec![true, true, true],
    );
    let r = run(&s, &PolicyConfig::default(), 1000.0, None).unwrap();
    let kinds: Vec<_> = r.events.iter().map(|e| (e.bar_index, e.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (0, OrderEventKind::EntryLong),
            (1, OrderEventKind::StopLossExit),
            (2, OrderEventKind::EntryLong),
        ]
    );
}

#[test]
fn entry_bar_is_not_evaluated_for_exits() {
    // The entry bar's own low is below the stop; only later bars count.
    let s = series(
        vec![candle(0, 100.0, 100.5, 90.0, 100.0), quiet(1)],
        vec![true, false],
    );
    let r = run(&s, &PolicyConfig::default(), 1000.0, None).unwrap();
    assert_eq!(r.events.len(), 1);
    assert!(r.open_position.is_some());
}

#[test]
fn signal_while_open_increases_up_to_max_entries() {
    let config = PolicyConfig {
        max_entries: 2,
        ..PolicyConfig::default()
    };
    let s = series(
        vec![quiet(0), quiet(1), quiet(2)],
        vec![true, true, true],
    );
    let r = run(&s, &config, 1000.0, None).unwrap();
    let kinds: Vec<_> = r.events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![OrderEventKind::EntryLong, OrderEventKind::IncreasePosition]
    );
    let p = r.open_position.unwrap();
    assert_eq!(p.entries, 2);
    assert!(p.brackets_are_ordered());
}

#[test]
fn increase_bar_is_not_evaluated_for_exits() {
    // Bar 1 fills the increase at 102 and moves the stop to its own low (99).
    // That low printed before the fill, so only bar 2 may test the new stop.
    let config = PolicyConfig {
        stop_loss: StopLossType::CandleBody {
            lookback: 0,
            add_pct: 0.0,
        },
        leverage: LeverageType::Static { leverage: 10.0 },
        max_entries: 2,
        ..PolicyConfig::default()
    };
    let s = series(
        vec![
            candle(0, 100.0, 101.0, 98.0, 100.0),
            candle(1, 100.0, 103.0, 99.0, 102.0),
            candle(2, 102.0, 104.0, 101.0, 103.0),
        ],
        vec![true, true, false],
    );
    let r = run(&s, &config, 1000.0, None).unwrap();
    let kinds: Vec<_> = r.events.iter().map(|e| (e.bar_index, e.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (0, OrderEventKind::EntryLong),
            (1, OrderEventKind::IncreasePosition),
        ]
    );
    assert_eq!(r.events[1].price, 102.0);

    let p = r.open_position.unwrap();
    assert_eq!(p.entries, 2);
    assert_eq!(p.sl_price, 99.0);
    assert_eq!(r.account.total_trades, 0);
}

#[test]
fn increase_bar_stop_applies_from_the_next_bar() {
    let config = PolicyConfig {
        stop_loss: StopLossType::CandleBody {
            lookback: 0,
            add_pct: 0.0,
        },
        leverage: LeverageType::Static { leverage: 10.0 },
        max_entries: 2,
        ..PolicyConfig::default()
    };
    let s = series(
        vec![
            candle(0, 100.0, 101.0, 98.0, 100.0),
            candle(1, 100.0, 103.0, 99.0, 102.0),
            candle(2, 102.0, 102.5, 98.5, 99.5),
        ],
        vec![true, true, false],
    );
    let r = run(&s, &config, 1000.0, None).unwrap();
    let exit = r.events.last().unwrap();
    assert_eq!(exit.bar_index, 2);
    assert_eq!(exit.kind, OrderEventKind::StopLossExit);
    assert_eq!(exit.price, 99.0);
    assert!(r.open_position.is_none());
}

#[test]
fn candle_body_stop_uses_lookback_low() {
    let config = PolicyConfig {
        stop_loss: StopLossType::CandleBody {
            lookback: 2,
            add_pct: 0.0,
        },
        ..PolicyConfig::default()
    };
    let s = series(
        vec![
            candle(0, 100.0, 101.0, 97.0, 100.0),
            candle(1, 100.0, 101.0, 98.0, 100.0),
            candle(2, 100.0, 101.0, 99.0, 100.0),
        ],
        vec![false, false, true],
    );
    let r = run(&s, &config, 1000.0, None).unwrap();
    assert_eq!(r.open_position.unwrap().sl_price, 97.0);
}

// ── 5. Run status ────────────────────────────────────────────────────

#[test]
fn uncancelled_flag_completes() {
    let flag = AtomicBool::new(false);
    let s = series(vec![quiet(0), quiet(1)], vec![true, false]);
    let r = run(&s, &PolicyConfig::default(), 1000.0, Some(&flag)).unwrap();
    assert_eq!(r.status, RunStatus::Completed);
    assert_eq!(r.bars_processed, 2);
}

#[test]
fn cancelled_mid_run_keeps_the_bars_before_it() {
    // Bar 0 enters, bar 1 takes profit at 110, bar 2 would re-enter.
    let s = series(
        vec![
            quiet(0),
            candle(1, 101.0, 111.0, 100.5, 108.0),
            quiet(2),
            quiet(3),
        ],
        vec![true, false, true, false],
    );
    let policies = PolicySet::new(&PolicyConfig::default()).unwrap();
    let r = run_with_cancel_check(&s, &policies, 1000.0, |bar| bar >= 2);

    assert_eq!(r.status, RunStatus::Incomplete);
    assert_eq!(r.bars_processed, 2);
    let kinds: Vec<_> = r.events.iter().map(|e| (e.bar_index, e.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            (0, OrderEventKind::EntryLong),
            (1, OrderEventKind::TakeProfitExit),
        ]
    );
    assert_eq!(r.account.equity, 1020.0);
    assert_eq!(r.account.total_trades, 1);
    assert!(r.open_position.is_none());
}

#[test]
fn cancelled_with_a_position_open_reports_it_unsettled() {
    let config = PolicyConfig {
        end_of_stream: EndOfStream::ForceClose,
        ..PolicyConfig::default()
    };
    let s = series(
        vec![quiet(0), candle(1, 100.0, 104.0, 99.0, 103.0), quiet(2)],
        vec![true, false, false],
    );
    let policies = PolicySet::new(&config).unwrap();
    let r = run_with_cancel_check(&s, &policies, 1000.0, |bar| bar >= 2);

    assert_eq!(r.status, RunStatus::Incomplete);
    assert_eq!(r.bars_processed, 2);
    assert_eq!(r.events.len(), 1);
    assert!(r.open_position.is_some());
    assert_eq!(r.unrealized_pnl, Some(6.0));
    assert_eq!(r.account.equity, 1000.0);
}

#[test]
fn force_close_leaves_nothing_open() {
    let config = PolicyConfig {
        end_of_stream: EndOfStream::ForceClose,
        ..PolicyConfig::default()
    };
    let s = series(vec![quiet(0), candle(1, 100.0, 102.0, 99.5, 101.0)], vec![true, false]);
    let r = run(&s, &config, 1000.0, None).unwrap();
    assert!(r.open_position.is_none());
    assert!(r.unrealized_pnl.is_none());
    let last = r.events.last().unwrap();
    assert_eq!(last.kind, OrderEventKind::EndOfStreamExit);
    assert_eq!(last.price, 101.0);
    assert_eq!(r.account.realized_pnl, 2.0);
}

#[test]
fn depleted_account_never_enters() {
    let s = series(vec![quiet(0), quiet(1), quiet(2)], vec![true, false, true]);
    let r = run(&s, &PolicyConfig::default(), 0.0, None).unwrap();
    assert!(r.events.is_empty());
    assert_eq!(r.skipped.get(&SkipReason::AccountDepleted), Some(&2));
    assert!(r.is_completed());
}

#[test]
fn void_bar_while_open_triggers_nothing() {
    let s = series(
        vec![
            quiet(0),
            candle(1, f64::NAN, f64::NAN, f64::NAN, f64::NAN),
            quiet(2),
        ],
        vec![true, false, false],
    );
    let r = run(&s, &PolicyConfig::default(), 1000.0, None).unwrap();
    assert!(r.is_completed());
    assert_eq!(r.events.len(), 1);
    assert_eq!(r.unrealized_pnl, Some(0.0));
}

#[test]
fn failed_run_keeps_events_so_far() {
    let s = series(
        vec![
            quiet(0),
            candle(1, 101.0, 111.0, 100.5, 108.0),
            candle(2, 100.0, 100.5, 99.5, f64::NAN),
            quiet(3),
        ],
        vec![true, false, true, true],
    );
    let r = run(&s, &PolicyConfig::default(), 1000.0, None).unwrap();
    assert_eq!(r.events.len(), 2);
    assert_eq!(r.bars_processed, 3);
    match r.status {
        RunStatus::Failed { bar_index, .. } => assert_eq!(bar_index, 2),
        other => panic!("expected a failed run, got {other:?}"),
    }
    assert_eq!(r.account.equity, 1020.0);
}
