//! Simulation engine — the per-position state machine and the bar loop that
//! drives it.
//!
//! - [`PositionEngine`]: open, increase, evaluate, close and stop updates for
//!   the single position, plus account bookkeeping.
//! - [`run`] / [`run_with_policies`]: one deterministic forward pass over a
//!   [`PriceSeries`](crate::domain::PriceSeries).

pub mod driver;
pub mod position_engine;

pub use driver::{run, run_with_cancel_check, run_with_policies, RunResult, RunStatus};
pub use position_engine::{Decision, ExitKind, PositionEngine};
