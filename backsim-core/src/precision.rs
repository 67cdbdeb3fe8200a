//! Fixed-precision helpers.
//!
//! Money values (realized PnL, equity, fees, margin) are rounded to
//! [`MONEY_DECIMALS`] places at every mutation so replays stay bit-identical.
//! Step rounding snaps sizes, prices and leverage to exchange increments.

/// Decimal places kept on account balances and realized PnL.
pub const MONEY_DECIMALS: u32 = 3;

/// Nudge applied before flooring/ceiling so that `17.87 / 0.01` lands on 1787
/// instead of 1786.9999.
const STEP_EPSILON: f64 = 1e-9;

pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

pub fn round_money(value: f64) -> f64 {
    round_to(value, MONEY_DECIMALS)
}

/// Largest multiple of `step` not above `value`. Non-positive steps are a no-op.
pub fn floor_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    tidy(((value / step) + STEP_EPSILON).floor() * step, step)
}

/// Smallest multiple of `step` not below `value`. Non-positive steps are a no-op.
pub fn ceil_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    tidy(((value / step) - STEP_EPSILON).ceil() * step, step)
}

/// Strip representation noise left by `n * step` (0.1 * 3 = 0.30000000000000004).
fn tidy(value: f64, step: f64) -> f64 {
    let decimals = step_decimals(step);
    round_to(value, decimals)
}

/// Decimal places needed to represent `step`, capped at 12.
fn step_decimals(step: f64) -> u32 {
    let mut decimals = 0;
    let mut scaled = step;
    while decimals < 12 && (scaled - scaled.round()).abs() > 1e-9 {
        scaled *= 10.0;
        decimals += 1;
    }
    decimals
}
