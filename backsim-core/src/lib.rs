//! Backsim Core — candles, money-management policies, the position state
//! machine and the simulation driver.
//!
//! - Domain types (candles, series, position, account, order events)
//! - Policies: sizing, stop-loss (with break-even and trailing), take-profit,
//!   leverage under the liquidation-safety invariant
//! - [`engine::PositionEngine`]: flat → open → flat for a single position
//! - [`engine::run`]: one deterministic pass over a [`domain::PriceSeries`]
//!
//! No I/O happens here. Loading data and writing artifacts live in
//! `backsim-runner`.

pub mod domain;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod policy;
pub mod precision;
