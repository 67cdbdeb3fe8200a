//! Backsim CLI — single runs and parameter sweeps.
//!
//! Commands:
//! - `run` — execute one backtest from a TOML run file and a candle CSV
//! - `sweep` — run a parameter grid over one candle CSV, in parallel
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `info` filter.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use backsim_core::engine::RunStatus;
use backsim_runner::{
    load_csv, run_single, save_artifacts, save_sweep, BacktestConfig, BacktestResult, ParamSweep,
    SweepConfig, SweepResults, SweepRow,
};

#[derive(Parser)]
#[command(name = "backsim", about = "Backsim — single-position backtest simulator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML run file.
    Run {
        /// Path to the TOML run file.
        #[arg(long)]
        config: PathBuf,

        /// Candle CSV. Overrides `[run].data`.
        #[arg(long)]
        data: Option<PathBuf>,

        /// Output directory for result.json and events.csv.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Print the full result as JSON instead of the summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Run every combination of a parameter grid.
    Sweep {
        /// Path to the TOML sweep file (a run file plus a `[grid]` table).
        #[arg(long)]
        config: PathBuf,

        /// Candle CSV. Overrides `[run].data`.
        #[arg(long)]
        data: Option<PathBuf>,

        /// Run combinations one at a time.
        #[arg(long, default_value_t = false)]
        sequential: bool,

        /// Number of best rows to print, ranked by gains.
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Output directory for sweep.csv and sweep.json.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            data,
            output_dir,
            json,
        } => run_cmd(&config, data.as_deref(), &output_dir, json),
        Commands::Sweep {
            config,
            data,
            sequential,
            top,
            output_dir,
        } => sweep_cmd(&config, data.as_deref(), sequential, top, &output_dir),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn run_cmd(config_path: &Path, data: Option<&Path>, output_dir: &Path, json: bool) -> Result<()> {
    let config = BacktestConfig::load(config_path)?;
    info!(run_id = %config.run_id(), "config loaded");

    let result = run_single(&config, data)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    let run_dir = save_artifacts(&result, output_dir)?;
    eprintln!("Artifacts saved to: {}", run_dir.display());

    if let RunStatus::Failed { bar_index, reason } = &result.status {
        bail!("run failed at bar {bar_index}: {reason}");
    }
    Ok(())
}

fn sweep_cmd(
    config_path: &Path,
    data: Option<&Path>,
    sequential: bool,
    top: usize,
    output_dir: &Path,
) -> Result<()> {
    let config = SweepConfig::load(config_path)?;
    let data_path = data
        .map(Path::to_path_buf)
        .or_else(|| config.run.data.clone())
        .context("no candle data: set [run].data or pass --data")?;
    let loaded = load_csv(&data_path)?;

    let results = ParamSweep::new(&loaded, config.run.initial_equity)
        .with_parallelism(!sequential)
        .run(&config.policy, &config.grid);

    print_sweep(&results, top);

    let csv_path = save_sweep(&results, output_dir)?;
    eprintln!("Sweep table saved to: {}", csv_path.display());
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!();
    println!("=== Backtest Result ===");
    println!("Config:         {}", &result.config_hash[..12]);
    println!("Status:         {}", status_label(&result.status));
    println!(
        "Bars:           {} of {} processed",
        result.bars_processed, result.bar_count
    );
    println!("Signals:        {}", result.signal_count);
    println!("Trades:         {} ({} won)", m.total_trades, m.wins);
    println!();
    println!("--- Performance ---");
    println!("Gains:          {:.3}%", m.gains_pct);
    println!("Final Equity:   {:.2}", m.final_equity);
    println!("Realized PnL:   {:.3}", m.total_pnl);
    println!("Fees Paid:      {:.3}", m.fees_paid);
    println!("Win Rate:       {:.1}%", m.win_rate * 100.0);
    println!("Max Drawdown:   {:.2}%", m.max_drawdown * 100.0);
    match m.profit_factor {
        Some(pf) => println!("Profit Factor:  {pf:.2}"),
        None => println!("Profit Factor:  n/a"),
    }
    println!("To The Upside:  {:.3}", m.to_the_upside);

    if let Some(pos) = &result.open_position {
        println!();
        println!(
            "Open position:  {:?} {:.6} @ {:.6}",
            pos.side, pos.position_size_asset, pos.avg_entry
        );
        if let Some(pnl) = result.unrealized_pnl {
            println!("Unrealized PnL: {pnl:.3}");
        }
    }
    if !result.skipped.is_empty() {
        println!();
        println!("--- Skipped ---");
        for (reason, count) in &result.skipped {
            println!("{:<28} {count}", format!("{reason:?}"));
        }
    }
    println!();
}

fn print_sweep(results: &SweepResults, top: usize) {
    let mut ranked: Vec<&SweepRow> = results.completed().collect();
    ranked.sort_by(|a, b| {
        let score = |r: &SweepRow| r.metrics.as_ref().map_or(f64::NEG_INFINITY, |m| m.gains_pct);
        score(b).total_cmp(&score(a)).then(a.index.cmp(&b.index))
    });

    println!();
    println!(
        "=== Sweep: {} combinations, {} completed, {} failed ===",
        results.len(),
        results.completed().count(),
        results.failed_count()
    );
    println!(
        "{:>5}  {:<40} {:>7} {:>10} {:>8} {:>8}",
        "Index", "Params", "Trades", "Gains %", "MaxDD %", "Upside"
    );
    println!("{}", "-".repeat(84));
    for row in ranked.into_iter().take(top) {
        let Some(m) = &row.metrics else { continue };
        let params: Vec<String> = row.params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!(
            "{:>5}  {:<40} {:>7} {:>10.3} {:>8.2} {:>8.3}",
            row.index,
            params.join(" "),
            m.total_trades,
            m.gains_pct,
            m.max_drawdown * 100.0,
            m.to_the_upside
        );
    }
    println!();
}

fn status_label(status: &RunStatus) -> String {
    match status {
        RunStatus::Completed => "completed".into(),
        RunStatus::Incomplete => "incomplete".into(),
        RunStatus::Failed { bar_index, reason } => format!("FAILED at bar {bar_index}: {reason}"),
    }
}
