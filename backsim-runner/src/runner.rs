//! Backtest runner — wires together config, data, engine, and metrics.
//!
//! Two entry points:
//! - `run_single()`: loads the candle CSV named by the config, then runs. Used by CLI.
//! - `run_from_data()`: takes pre-loaded data. Used by sweeps, which share one
//!   series across every combination.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use backsim_core::domain::{AccountState, OrderEvent, PositionState};
use backsim_core::engine::{run, RunStatus};
use backsim_core::error::SkipReason;
use backsim_core::fingerprint::{config_hash, event_log_digest};
use backsim_core::policy::PolicyConfig;

use crate::config::{BacktestConfig, ConfigError};
use crate::data_loader::{load_csv, LoadError, LoadedData};
use crate::metrics::PerformanceMetrics;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Policy(#[from] backsim_core::policy::ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("no candle data: set [run].data or pass --data")]
    NoData,
    #[error("failed to hash policy config: {0}")]
    Hash(#[from] serde_json::Error),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub config_hash: String,
    pub dataset_hash: String,
    /// BLAKE3 of the event log; equal digests mean bit-identical replays.
    pub event_digest: String,
    pub policy: PolicyConfig,
    pub initial_equity: f64,
    pub status: RunStatus,
    pub metrics: PerformanceMetrics,
    pub account: AccountState,
    pub open_position: Option<PositionState>,
    pub unrealized_pnl: Option<f64>,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub bar_count: usize,
    pub bars_processed: usize,
    pub signal_count: usize,
    pub events: Vec<OrderEvent>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// Run a single backtest from a `BacktestConfig`, loading its candle file.
///
/// `data` overrides `[run].data`.
pub fn run_single(config: &BacktestConfig, data: Option<&Path>) -> Result<BacktestResult, RunError> {
    let path: PathBuf = data
        .map(Path::to_path_buf)
        .or_else(|| config.run.data.clone())
        .ok_or(RunError::NoData)?;
    let loaded = load_csv(&path)?;
    run_from_data(&config.policy, config.run.initial_equity, &loaded, None)
}

/// Run with pre-loaded data — no I/O.
pub fn run_from_data(
    policy: &PolicyConfig,
    initial_equity: f64,
    data: &LoadedData,
    cancel: Option<&AtomicBool>,
) -> Result<BacktestResult, RunError> {
    let hash = config_hash(policy)?;
    let series = &data.series;
    info!(
        config = %&hash[..12],
        bars = series.len(),
        signals = series.signal_count(),
        initial_equity,
        "run started"
    );

    let result = run(series, policy, initial_equity, cancel)?;
    let metrics = PerformanceMetrics::compute(&result, initial_equity);

    match &result.status {
        RunStatus::Completed => info!(
            trades = metrics.total_trades,
            gains_pct = metrics.gains_pct,
            final_equity = metrics.final_equity,
            "run finished"
        ),
        RunStatus::Incomplete => warn!(bars = result.bars_processed, "run cancelled"),
        RunStatus::Failed { bar_index, reason } => {
            warn!(bar = bar_index, %reason, "run failed")
        }
    }

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        config_hash: hash,
        dataset_hash: data.dataset_hash.clone(),
        event_digest: event_log_digest(&result.events),
        policy: policy.clone(),
        initial_equity,
        status: result.status,
        metrics,
        account: result.account,
        open_position: result.open_position,
        unrealized_pnl: result.unrealized_pnl,
        skipped: result.skipped,
        bar_count: series.len(),
        bars_processed: result.bars_processed,
        signal_count: series.signal_count(),
        events: result.events,
    })
}
