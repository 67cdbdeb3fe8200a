//! Candle — the fundamental market data unit.

use serde::{Deserialize, Serialize};

/// OHLCV candle for the simulated instrument.
///
/// `timestamp` is epoch milliseconds. Candles are immutable once handed to a
/// [`PriceSeries`](super::PriceSeries).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    /// Returns true if any OHLC field is NaN or infinite.
    pub fn is_void(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
    }

    /// Basic OHLC sanity check: high bounds the body, low bounds it from below,
    /// prices are positive.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.low > 0.0
    }

    /// The price of the requested candle field.
    pub fn price(&self, body: CandleBody) -> f64 {
        match body {
            CandleBody::Open => self.open,
            CandleBody::High => self.high,
            CandleBody::Low => self.low,
            CandleBody::Close => self.close,
        }
    }
}

/// Which candle field a stop rule reads when testing how far price has moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandleBody {
    Open,
    High,
    Low,
    #[default]
    Close,
}
