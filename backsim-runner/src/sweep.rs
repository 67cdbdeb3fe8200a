//! Parameter sweeps over a base policy.
//!
//! A grid lists values for a handful of numeric parameters; the sweep runs
//! the cartesian product, one independent engine per combination, in
//! parallel on rayon. Each combination is validated on its own: an invalid
//! or failed combination becomes a row, never an error for its siblings.
//! Rows are keyed by combination index, so output order does not depend on
//! scheduling.

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use backsim_core::engine::RunStatus;
use backsim_core::policy::{EntrySize, LeverageType, PolicyConfig, StopLossType};

use crate::config::RunSection;
use crate::data_loader::LoadedData;
use crate::metrics::PerformanceMetrics;
use crate::runner::run_from_data;

/// A numeric knob a grid can turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SweepParam {
    RiskPct,
    RiskReward,
    TrailPct,
    SlPct,
    StaticLeverage,
    TpPct,
}

impl SweepParam {
    pub fn name(self) -> &'static str {
        match self {
            SweepParam::RiskPct => "risk_pct",
            SweepParam::RiskReward => "risk_reward",
            SweepParam::TrailPct => "trail_pct",
            SweepParam::SlPct => "sl_pct",
            SweepParam::StaticLeverage => "static_leverage",
            SweepParam::TpPct => "tp_pct",
        }
    }
}

/// Write one grid value into a policy.
///
/// Setting a take-profit parameter clears the other one, so a base config
/// with `risk_reward` can be swept over `tp_pct`.
pub fn set_param(config: &mut PolicyConfig, param: SweepParam, value: f64) {
    match param {
        SweepParam::RiskPct => config.entry_size = EntrySize::RiskPctAccount { risk_pct: value },
        SweepParam::RiskReward => {
            config.risk_reward = Some(value);
            config.tp_pct = None;
        }
        SweepParam::TrailPct => {
            config.trailing_enabled = true;
            config.trail_pct = Some(value);
        }
        SweepParam::SlPct => config.stop_loss = StopLossType::Percent { sl_pct: value },
        SweepParam::StaticLeverage => config.leverage = LeverageType::Static { leverage: value },
        SweepParam::TpPct => {
            config.tp_pct = Some(value);
            config.risk_reward = None;
        }
    }
}

/// Values to sweep per parameter. An empty list leaves the base value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    #[serde(default)]
    pub risk_pct: Vec<f64>,
    #[serde(default)]
    pub risk_reward: Vec<f64>,
    #[serde(default)]
    pub trail_pct: Vec<f64>,
    #[serde(default)]
    pub sl_pct: Vec<f64>,
    #[serde(default)]
    pub static_leverage: Vec<f64>,
    #[serde(default)]
    pub tp_pct: Vec<f64>,
}

impl ParamGrid {
    fn axes(&self) -> Vec<(SweepParam, &[f64])> {
        [
            (SweepParam::RiskPct, self.risk_pct.as_slice()),
            (SweepParam::RiskReward, self.risk_reward.as_slice()),
            (SweepParam::TrailPct, self.trail_pct.as_slice()),
            (SweepParam::SlPct, self.sl_pct.as_slice()),
            (SweepParam::StaticLeverage, self.static_leverage.as_slice()),
            (SweepParam::TpPct, self.tp_pct.as_slice()),
        ]
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .collect()
    }

    /// Number of combinations. An empty grid has one: the base config.
    pub fn size(&self) -> usize {
        self.axes().iter().map(|(_, v)| v.len()).product()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.risk_reward.is_empty() && !self.tp_pct.is_empty() {
            bail!("grid sweeps both risk_reward and tp_pct; pick one take-profit rule");
        }
        for (param, values) in self.axes() {
            if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
                bail!("grid.{} contains non-finite value {bad}", param.name());
            }
        }
        Ok(())
    }

    /// Every combination in index order. The last axis varies fastest.
    pub fn combinations(&self) -> Vec<Vec<(SweepParam, f64)>> {
        self.axes()
            .into_iter()
            .fold(vec![Vec::new()], |acc, (param, values)| {
                acc.iter()
                    .flat_map(|prefix| {
                        values.iter().map(move |&v| {
                            let mut combo = prefix.clone();
                            combo.push((param, v));
                            combo
                        })
                    })
                    .collect()
            })
    }
}

/// Sweep file: a run file plus a `[grid]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub run: RunSection,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub grid: ParamGrid,
}

impl SweepConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("failed to parse sweep config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sweep config {}", path.display()))?;
        let mut config = Self::from_toml(&text)
            .with_context(|| format!("invalid sweep config {}", path.display()))?;
        if let (Some(data), Some(dir)) = (config.run.data.as_mut(), path.parent()) {
            if data.is_relative() {
                *data = dir.join(&*data);
            }
        }
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let equity = self.run.initial_equity;
        if !(equity.is_finite() && equity > 0.0) {
            bail!("initial_equity must be finite and > 0, got {equity}");
        }
        self.grid.validate()
    }
}

/// How a combination ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowStatus {
    Completed,
    /// Cancelled mid-run, or never started because the sweep was cancelled.
    Incomplete,
    Failed { bar_index: usize, reason: String },
    /// The combination's config failed validation; nothing ran.
    Invalid { reason: String },
}

impl From<RunStatus> for RowStatus {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => RowStatus::Completed,
            RunStatus::Incomplete => RowStatus::Incomplete,
            RunStatus::Failed { bar_index, reason } => RowStatus::Failed { bar_index, reason },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub index: usize,
    /// Parameter name → value for this combination.
    pub params: BTreeMap<String, f64>,
    pub status: RowStatus,
    pub config_hash: Option<String>,
    pub event_digest: Option<String>,
    pub metrics: Option<PerformanceMetrics>,
}

/// All rows of a sweep, keyed by combination index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepResults {
    pub rows: BTreeMap<usize, SweepRow>,
}

impl SweepResults {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn completed(&self) -> impl Iterator<Item = &SweepRow> {
        self.rows.values().filter(|r| r.status == RowStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.rows
            .values()
            .filter(|r| matches!(r.status, RowStatus::Failed { .. } | RowStatus::Invalid { .. }))
            .count()
    }

    /// Completed row maximizing `key`. Ties keep the lower index.
    pub fn best_by<F>(&self, key: F) -> Option<&SweepRow>
    where
        F: Fn(&PerformanceMetrics) -> f64,
    {
        self.completed()
            .filter_map(|row| row.metrics.as_ref().map(|m| (row, key(m))))
            .fold(None, |best: Option<(&SweepRow, f64)>, (row, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((row, score)),
            })
            .map(|(row, _)| row)
    }
}

/// Parameter sweep executor over one shared data set.
pub struct ParamSweep<'a> {
    data: &'a LoadedData,
    initial_equity: f64,
    parallel: bool,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> ParamSweep<'a> {
    pub fn new(data: &'a LoadedData, initial_equity: f64) -> Self {
        Self {
            data,
            initial_equity,
            parallel: true,
            cancel: None,
        }
    }

    /// Enables or disables parallel execution.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Shared cancellation flag, forwarded to every run.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run(&self, base: &PolicyConfig, grid: &ParamGrid) -> SweepResults {
        let combos = grid.combinations();
        info!(combinations = combos.len(), parallel = self.parallel, "sweep started");

        let rows: BTreeMap<usize, SweepRow> = if self.parallel {
            combos
                .par_iter()
                .enumerate()
                .map(|(i, combo)| (i, self.run_one(i, base, combo)))
                .collect()
        } else {
            combos
                .iter()
                .enumerate()
                .map(|(i, combo)| (i, self.run_one(i, base, combo)))
                .collect()
        };

        let results = SweepResults { rows };
        info!(
            rows = results.len(),
            completed = results.completed().count(),
            failed = results.failed_count(),
            "sweep finished"
        );
        results
    }

    fn run_one(&self, index: usize, base: &PolicyConfig, combo: &[(SweepParam, f64)]) -> SweepRow {
        let mut config = base.clone();
        for &(param, value) in combo {
            set_param(&mut config, param, value);
        }
        let params = combo
            .iter()
            .map(|&(p, v)| (p.name().to_string(), v))
            .collect();
        let mut row = SweepRow {
            index,
            params,
            status: RowStatus::Incomplete,
            config_hash: None,
            event_digest: None,
            metrics: None,
        };

        if self.cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
            debug!(index, "combination skipped after cancel");
            return row;
        }

        match run_from_data(&config, self.initial_equity, self.data, self.cancel) {
            Ok(result) => {
                row.status = result.status.into();
                if let RowStatus::Failed { bar_index, reason } = &row.status {
                    warn!(index, bar = bar_index, %reason, "combination failed");
                }
                row.config_hash = Some(result.config_hash);
                row.event_digest = Some(result.event_digest);
                row.metrics = Some(result.metrics);
            }
            Err(err) => {
                warn!(index, error = %err, "combination rejected");
                row.status = RowStatus::Invalid {
                    reason: err.to_string(),
                };
            }
        }
        row
    }
}
