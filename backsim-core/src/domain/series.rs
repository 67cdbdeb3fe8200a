//! PriceSeries — candles plus the entry-signal flags aligned with them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::bar::Candle;

/// Errors raised when assembling a price series.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("signal count {signals} does not match candle count {candles}")]
    LengthMismatch { candles: usize, signals: usize },

    #[error("candle {index} has timestamp {timestamp} not after its predecessor")]
    OutOfOrder { index: usize, timestamp: i64 },
}

/// Read-only, time-ordered candles with one entry flag per candle.
///
/// Index `i` of `signals` refers to candle `i`. The series is validated on
/// construction and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSeries")]
pub struct PriceSeries {
    candles: Vec<Candle>,
    signals: Vec<bool>,
}

/// Unchecked wire form; deserialization goes through [`PriceSeries::new`].
#[derive(Deserialize)]
struct RawSeries {
    candles: Vec<Candle>,
    signals: Vec<bool>,
}

impl TryFrom<RawSeries> for PriceSeries {
    type Error = SeriesError;

    fn try_from(raw: RawSeries) -> Result<Self, Self::Error> {
        Self::new(raw.candles, raw.signals)
    }
}

impl PriceSeries {
    pub fn new(candles: Vec<Candle>, signals: Vec<bool>) -> Result<Self, SeriesError> {
        if candles.len() != signals.len() {
            return Err(SeriesError::LengthMismatch {
                candles: candles.len(),
                signals: signals.len(),
            });
        }
        for (index, pair) in candles.windows(2).enumerate() {
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(SeriesError::OutOfOrder {
                    index: index + 1,
                    timestamp: pair[1].timestamp,
                });
            }
        }
        Ok(Self { candles, signals })
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn signals(&self) -> &[bool] {
        &self.signals
    }

    pub fn signal_count(&self) -> usize {
        self.signals.iter().filter(|&&s| s).count()
    }

    /// Number of candles that fail [`Candle::is_sane`].
    pub fn insane_count(&self) -> usize {
        self.candles.iter().filter(|c| !c.is_sane()).count()
    }
}
