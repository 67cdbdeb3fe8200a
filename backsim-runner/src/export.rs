//! Export — JSON and CSV artifact generation.
//!
//! - **JSON**: full round-trip serialization of a `BacktestResult` with schema versioning
//! - **CSV**: the event log and the sweep table for external analysis tools
//!
//! All persisted JSON carries a `schema_version` field. Newer versions are
//! rejected on load.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::DateTime;

use backsim_core::domain::OrderEvent;

use crate::runner::{BacktestResult, SCHEMA_VERSION};
use crate::sweep::{RowStatus, SweepResults};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: bar_index, timestamp, datetime, kind, price, size, realized_pnl
///
/// `datetime` is the RFC 3339 rendering of the millisecond timestamp;
/// `realized_pnl` is blank for non-closing events.
pub fn export_events_csv(events: &[OrderEvent]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "bar_index",
        "timestamp",
        "datetime",
        "kind",
        "price",
        "size",
        "realized_pnl",
    ])?;

    for e in events {
        let datetime = DateTime::from_timestamp_millis(e.timestamp)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();
        wtr.write_record([
            &e.bar_index.to_string(),
            &e.timestamp.to_string(),
            &datetime,
            &e.kind.to_string(),
            &format!("{:.6}", e.price),
            &format!("{:.8}", e.size),
            &e.realized_pnl.map(|p| format!("{p:.3}")).unwrap_or_default(),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// One line per combination, swept parameters first.
pub fn export_sweep_csv(results: &SweepResults) -> Result<String> {
    let params: BTreeSet<&str> = results
        .rows
        .values()
        .flat_map(|r| r.params.keys().map(String::as_str))
        .collect();

    let mut header: Vec<&str> = vec!["index"];
    header.extend(params.iter().copied());
    header.extend([
        "status",
        "reason",
        "total_trades",
        "win_rate",
        "gains_pct",
        "max_drawdown",
        "to_the_upside",
        "final_equity",
        "config_hash",
    ]);

    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(&header)?;

    for row in results.rows.values() {
        let mut record = vec![row.index.to_string()];
        for name in &params {
            record.push(row.params.get(*name).map(f64::to_string).unwrap_or_default());
        }
        let (status, reason) = match &row.status {
            RowStatus::Completed => ("completed", String::new()),
            RowStatus::Incomplete => ("incomplete", String::new()),
            RowStatus::Failed { bar_index, reason } => {
                ("failed", format!("bar {bar_index}: {reason}"))
            }
            RowStatus::Invalid { reason } => ("invalid", reason.clone()),
        };
        record.push(status.to_string());
        record.push(reason);
        match &row.metrics {
            Some(m) => record.extend([
                m.total_trades.to_string(),
                format!("{:.3}", m.win_rate),
                format!("{:.3}", m.gains_pct),
                format!("{:.3}", m.max_drawdown),
                format!("{:.3}", m.to_the_upside),
                format!("{:.3}", m.final_equity),
            ]),
            None => record.extend(std::iter::repeat(String::new()).take(6)),
        }
        record.push(row.config_hash.clone().unwrap_or_default());
        wtr.write_record(&record)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the artifact set for a single run.
///
/// Creates `{config_hash[..12]}_{timestamp}/` under `output_dir` containing
/// `result.json` and `events.csv`. Returns the created directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let prefix: String = result.config_hash.chars().take(12).collect();
    let dirname = format!("{}_{}", prefix, chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("result.json"), export_json(result)?)?;
    std::fs::write(run_dir.join("events.csv"), export_events_csv(&result.events)?)?;

    Ok(run_dir)
}

/// Load a `BacktestResult` from an artifact directory's result.json.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let path = dir.join("result.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_json(&json)
}

/// Write `sweep.csv` and `sweep.json` under `output_dir`. Returns the CSV path.
pub fn save_sweep(results: &SweepResults, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir: {}", output_dir.display()))?;
    let csv_path = output_dir.join("sweep.csv");
    std::fs::write(&csv_path, export_sweep_csv(results)?)?;
    let json = serde_json::to_string_pretty(results).context("failed to serialize sweep")?;
    std::fs::write(output_dir.join("sweep.json"), json)?;
    Ok(csv_path)
}
