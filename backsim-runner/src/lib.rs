//! Backsim Runner — backtest orchestration, sweeps, metrics, artifacts.
//!
//! This crate builds on `backsim-core` to provide:
//! - TOML run files and candle/signal CSV loading
//! - Single-run execution with fingerprints and performance metrics
//! - Parallel parameter sweeps over a base policy
//! - JSON/CSV artifact export

pub mod config;
pub mod data_loader;
pub mod export;
pub mod metrics;
pub mod runner;
pub mod sweep;

pub use config::{BacktestConfig, ConfigError, RunSection};
pub use data_loader::{load_csv, read_csv, LoadError, LoadedData};
pub use export::{load_artifacts, save_artifacts, save_sweep};
pub use metrics::PerformanceMetrics;
pub use runner::{run_from_data, run_single, BacktestResult, RunError, SCHEMA_VERSION};
pub use sweep::{ParamGrid, ParamSweep, RowStatus, SweepConfig, SweepResults, SweepRow};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn results_are_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
        assert_send::<SweepResults>();
        assert_sync::<SweepResults>();
        assert_send::<PerformanceMetrics>();
        assert_sync::<PerformanceMetrics>();
    }

    #[test]
    fn shared_sweep_inputs_are_sync() {
        // Rayon workers borrow these across threads.
        assert_sync::<LoadedData>();
        assert_sync::<ParamSweep<'static>>();
        assert_send::<BacktestConfig>();
        assert_sync::<SweepConfig>();
    }
}
