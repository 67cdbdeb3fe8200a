//! Candle and signal loading for the runner.
//!
//! Input is a headed CSV:
//!
//! ```text
//! timestamp,open,high,low,close,volume,signal
//! 2024-01-02T00:00:00Z,100.0,101.5,99.2,101.0,1200,1
//! ```
//!
//! - `timestamp`: epoch milliseconds, RFC 3339, or a bare `YYYY-MM-DD` (UTC midnight)
//! - `volume`: optional, defaults to 0
//! - `signal`: optional; `1/0/true/false`, blank is false; a missing column means no signals
//!
//! Column order does not matter; header names are matched case-insensitively.

use chrono::{DateTime, NaiveDate};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use backsim_core::domain::{Candle, PriceSeries, SeriesError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),
    #[error("line {line}: cannot parse timestamp '{value}'")]
    BadTimestamp { line: u64, value: String },
    #[error("line {line}: cannot parse {column} '{value}'")]
    BadNumber {
        line: u64,
        column: &'static str,
        value: String,
    },
    #[error("line {line}: cannot parse signal '{value}' (expected 0/1/true/false)")]
    BadSignal { line: u64, value: String },
    #[error("invalid series: {0}")]
    Series(#[from] SeriesError),
}

/// Result of loading a candle file.
#[derive(Debug, Clone)]
pub struct LoadedData {
    pub series: PriceSeries,
    /// BLAKE3 over every candle and signal, for fingerprinting.
    pub dataset_hash: String,
    /// Candles failing `Candle::is_sane`. Loaded anyway; reported as a warning.
    pub insane_candles: usize,
}

pub fn load_csv(path: &Path) -> Result<LoadedData, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let loaded = read_csv(file)?;
    debug!(
        path = %path.display(),
        candles = loaded.series.len(),
        signals = loaded.series.signal_count(),
        "candles loaded"
    );
    Ok(loaded)
}

/// Parse candles from any reader. Used by `load_csv` and by tests.
pub fn read_csv<R: Read>(reader: R) -> Result<LoadedData, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let columns = Columns::locate(rdr.headers()?)?;

    let mut candles = Vec::new();
    let mut signals = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let number = |column: &'static str, idx: usize| -> Result<f64, LoadError> {
            let raw = field(idx);
            raw.parse::<f64>().map_err(|_| LoadError::BadNumber {
                line,
                column,
                value: raw.to_string(),
            })
        };

        candles.push(Candle {
            timestamp: parse_timestamp(field(columns.timestamp))
                .ok_or_else(|| LoadError::BadTimestamp {
                    line,
                    value: field(columns.timestamp).to_string(),
                })?,
            open: number("open", columns.open)?,
            high: number("high", columns.high)?,
            low: number("low", columns.low)?,
            close: number("close", columns.close)?,
            volume: match columns.volume {
                Some(idx) if !field(idx).is_empty() => number("volume", idx)?,
                _ => 0.0,
            },
        });
        signals.push(match columns.signal {
            Some(idx) => parse_signal(field(idx)).ok_or_else(|| LoadError::BadSignal {
                line,
                value: field(idx).to_string(),
            })?,
            None => false,
        });
    }

    let series = PriceSeries::new(candles, signals)?;
    let insane_candles = series.insane_count();
    if insane_candles > 0 {
        warn!(insane_candles, "candles with inconsistent OHLC loaded");
    }
    Ok(LoadedData {
        dataset_hash: dataset_hash(&series),
        series,
        insane_candles,
    })
}

/// BLAKE3 over the bit patterns of every candle field and signal.
pub fn dataset_hash(series: &PriceSeries) -> String {
    let mut hasher = blake3::Hasher::new();
    for (c, &s) in series.candles().iter().zip(series.signals()) {
        hasher.update(&c.timestamp.to_le_bytes());
        for v in [c.open, c.high, c.low, c.close, c.volume] {
            hasher.update(&v.to_bits().to_le_bytes());
        }
        hasher.update(&[u8::from(s)]);
    }
    hasher.finalize().to_hex().to_string()
}

struct Columns {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
    signal: Option<usize>,
}

impl Columns {
    fn locate(headers: &csv::StringRecord) -> Result<Self, LoadError> {
        let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
        let require = |name: &'static str| find(name).ok_or(LoadError::MissingColumn(name));
        Ok(Self {
            timestamp: require("timestamp")?,
            open: require("open")?,
            high: require("high")?,
            low: require("low")?,
            close: require("close")?,
            volume: find("volume"),
            signal: find("signal"),
        })
    }
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn parse_signal(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_millis_and_signals() {
        let csv = "timestamp,open,high,low,close,volume,signal\n\
                   1000,100,101,99,100.5,10,1\n\
                   2000,100.5,102,100,101,12,0\n";
        let loaded = read_csv(csv.as_bytes()).unwrap();
        assert_eq!(loaded.series.len(), 2);
        assert_eq!(loaded.series.signals(), &[true, false]);
        let c = loaded.series.candles()[1];
        assert_eq!(c.timestamp, 2000);
        assert_eq!(c.high, 102.0);
        assert_eq!(c.volume, 12.0);
        assert_eq!(loaded.insane_candles, 0);
    }

    #[test]
    fn reads_rfc3339_and_dates() {
        assert_eq!(parse_timestamp("1970-01-01T00:00:01Z"), Some(1000));
        assert_eq!(parse_timestamp("1970-01-01T01:00:00+01:00"), Some(0));
        assert_eq!(parse_timestamp("1970-01-02"), Some(86_400_000));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn missing_signal_column_means_no_signals() {
        let csv = "Timestamp,Open,High,Low,Close\n1,1,1,1,1\n2,1,1,1,1\n";
        let loaded = read_csv(csv.as_bytes()).unwrap();
        assert_eq!(loaded.series.signal_count(), 0);
        assert_eq!(loaded.series.candles()[0].volume, 0.0);
    }

    #[test]
    fn signal_spellings() {
        assert_eq!(parse_signal("TRUE"), Some(true));
        assert_eq!(parse_signal("1"), Some(true));
        assert_eq!(parse_signal(""), Some(false));
        assert_eq!(parse_signal("yes"), None);
    }

    #[test]
    fn errors_name_the_problem() {
        let err = read_csv("timestamp,open,high,low\n1,1,1,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn("close")));

        let err = read_csv("timestamp,open,high,low,close\n1,1,x,1,1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, LoadError::BadNumber { column: "high", .. }));

        let err =
            read_csv("timestamp,open,high,low,close,signal\n1,1,1,1,1,maybe\n".as_bytes()).unwrap_err();
        assert!(matches!(err, LoadError::BadSignal { .. }));

        let err = read_csv("timestamp,open,high,low,close\n2,1,1,1,1\n1,1,1,1,1\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, LoadError::Series(SeriesError::OutOfOrder { .. })));
    }

    #[test]
    fn dataset_hash_sees_signals() {
        let a = read_csv("timestamp,open,high,low,close,signal\n1,1,1,1,1,0\n".as_bytes()).unwrap();
        let b = read_csv("timestamp,open,high,low,close,signal\n1,1,1,1,1,1\n".as_bytes()).unwrap();
        assert_ne!(a.dataset_hash, b.dataset_hash);
    }
}
