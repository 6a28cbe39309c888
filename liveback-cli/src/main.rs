//! liveback CLI: run and verify backtests.
//!
//! Commands:
//! - `run`: replay a JSON-lines event file through the backtest engine
//! - `verify`: run the same backtest twice in parallel and compare fingerprints

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use liveback_core::data::ReplayData;
use liveback_core::domain::Event;
use liveback_core::engine::{BacktestEngine, RunReport, TradingEngine};
use liveback_core::recorder::{Record, Recorder};
use liveback_core::strategy::{MaCrossStrategy, NoOpStrategy};
use liveback_core::{LivebackConfig, Strategy};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "liveback",
    about = "liveback: one event-driven engine for backtests and live trading"
)]
struct Cli {
    /// Log filter (e.g. info, debug, liveback_core=trace). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay an event file through the backtest engine.
    Run {
        #[command(flatten)]
        input: RunInput,

        /// Append every event, order update, fill and equity point as JSON lines.
        #[arg(long)]
        record: Option<PathBuf>,

        /// Write the full run report as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Run the same backtest twice concurrently and check the fingerprints match.
    Verify {
        #[command(flatten)]
        input: RunInput,
    },
}

#[derive(Args, Clone)]
struct RunInput {
    /// TOML config. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON-lines file, one event per line.
    #[arg(long)]
    events: PathBuf,

    #[arg(long, value_enum, default_value_t = StrategyKind::MaCross)]
    strategy: StrategyKind,

    /// Fast moving average window (ma-cross).
    #[arg(long, default_value_t = 5)]
    fast: usize,

    /// Slow moving average window (ma-cross).
    #[arg(long, default_value_t = 20)]
    slow: usize,

    /// Position size taken on a cross (ma-cross).
    #[arg(long, default_value_t = 100.0)]
    quantity: f64,

    /// Go short on bearish crosses instead of flat (ma-cross).
    #[arg(long, default_value_t = false)]
    shorts: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyKind {
    Noop,
    MaCross,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref())?;

    match cli.command {
        Commands::Run {
            input,
            record,
            report,
        } => run_cmd(&input, record.as_deref(), report.as_deref()),
        Commands::Verify { input } => verify_cmd(&input),
    }
}

fn init_tracing(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid --log-level '{level}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

// ── Inputs ───────────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<LivebackConfig> {
    match path {
        Some(path) => LivebackConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(LivebackConfig::default()),
    }
}

/// Read one event per non-blank line. Lines starting with `#` are comments.
fn read_events(path: &Path) -> Result<Vec<Event>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut events = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event: Event = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: not an event", path.display(), i + 1))?;
        events.push(event);
    }
    Ok(events)
}

fn build_strategy(input: &RunInput) -> Result<Box<dyn Strategy>> {
    match input.strategy {
        StrategyKind::Noop => Ok(Box::new(NoOpStrategy)),
        StrategyKind::MaCross => {
            if input.fast == 0 || input.slow <= input.fast {
                bail!(
                    "ma-cross needs 0 < --fast < --slow, got fast={} slow={}",
                    input.fast,
                    input.slow
                );
            }
            if input.quantity.is_nan() || input.quantity <= 0.0 {
                bail!("--quantity must be positive, got {}", input.quantity);
            }
            let mut strategy = MaCrossStrategy::new(input.fast, input.slow, input.quantity);
            if input.shorts {
                strategy = strategy.with_shorts();
            }
            Ok(Box::new(strategy))
        }
    }
}

fn backtest(
    config: &LivebackConfig,
    events: &[Event],
    input: &RunInput,
    recorder: Option<Box<dyn Recorder>>,
) -> Result<RunReport> {
    let data = ReplayData::new(events.to_vec());
    let mut engine = BacktestEngine::new(config, data, build_strategy(input)?)?;
    if let Some(recorder) = recorder {
        engine = engine.with_recorder(recorder);
    }
    let report = engine.run().context("backtest aborted")?;
    Ok(report)
}

// ── Commands ─────────────────────────────────────────────────────────

fn run_cmd(input: &RunInput, record: Option<&Path>, report_path: Option<&Path>) -> Result<()> {
    let config = load_config(input.config.as_deref())?;
    let events = read_events(&input.events)?;
    info!(events = events.len(), path = %input.events.display(), "loaded events");

    let mut record_failed = None;
    let recorder: Option<Box<dyn Recorder>> = match record {
        Some(path) => {
            let recorder = JsonlRecorder::create(path)?;
            record_failed = Some((path, recorder.failure_flag()));
            Some(Box::new(recorder))
        }
        None => None,
    };
    let report = backtest(&config, &events, input, recorder)?;
    print_summary(&report);

    if let Some(path) = report_path {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &report)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Report saved to: {}", path.display());
    }
    if let Some((path, failed)) = record_failed {
        check_recording(path, &failed)?;
    }
    Ok(())
}

/// A run whose record file is incomplete must not exit cleanly.
fn check_recording(path: &Path, failed: &AtomicBool) -> Result<()> {
    if failed.load(Ordering::SeqCst) {
        bail!("recording to {} failed, the record file is incomplete", path.display());
    }
    Ok(())
}

fn verify_cmd(input: &RunInput) -> Result<()> {
    let config = load_config(input.config.as_deref())?;
    let events = read_events(&input.events)?;

    let (a, b) = rayon::join(
        || backtest(&config, &events, input, None),
        || backtest(&config, &events, input, None),
    );
    let (a, b) = (a?, b?);

    println!("run A: {}", a.fingerprint);
    println!("run B: {}", b.fingerprint);
    if a.fingerprint != b.fingerprint {
        bail!(
            "runs diverged: fills {} vs {}, equity {} vs {}",
            a.fingerprint.fills_hash,
            b.fingerprint.fills_hash,
            a.fingerprint.equity_hash,
            b.fingerprint.equity_hash
        );
    }
    println!("deterministic: {}", a.fingerprint.digest);
    Ok(())
}

fn print_summary(report: &RunReport) {
    let s = &report.summary;
    println!();
    println!("=== Run Result ===");
    println!("Status:         {}", report.status);
    println!("Run id:         {}", &report.run_id[..16.min(report.run_id.len())]);
    println!("Strategy:       {}", report.strategy);
    println!("Execution:      {}", report.execution);
    println!("Events:         {}", report.bus_stats.delivered);
    println!("Orders:         {}", report.orders.len());
    println!("Fills:          {}", s.fill_count);
    println!("Rejections:     {}", s.rejection_count);
    println!();
    println!("--- Performance ---");
    println!("Final Equity:   {:.2}", s.final_equity);
    println!("Total Return:   {:.2}%", s.total_return_pct);
    println!("Annual Return:  {:.2}%", s.annualized_return_pct);
    println!("Max Drawdown:   {:.2}%", s.max_drawdown_pct);
    println!("Sharpe:         {:.3}", s.sharpe);
    println!("Duration:       {:.1} days", s.duration_days);
    println!();
    println!("--- Trades ---");
    println!("Closed Trades:  {}", s.trade_count);
    println!("Win Rate:       {:.1}%", s.win_rate_pct);
    match s.profit_factor {
        Some(pf) => println!("Profit Factor:  {pf:.2}"),
        None => println!("Profit Factor:  inf"),
    }
    println!("Avg Trade PnL:  {:.2}", s.avg_trade_pnl);
    println!("Realized PnL:   {:.2}", s.realized_pnl);
    println!("Fees:           {:.2}", s.total_fees);
    println!();
    println!("Fingerprint:    {}", report.fingerprint);
    for err in &report.data_errors {
        println!("WARNING: skipped event: {err}");
    }
    for err in &report.order_errors {
        println!("WARNING: {err}");
    }
    println!();
}

// ── JSON-lines recorder ──────────────────────────────────────────────

/// Appends each record as one JSON object per line.
struct JsonlRecorder {
    path: PathBuf,
    out: BufWriter<Box<dyn Write + Send>>,
    /// Shared with the caller, which outlives the engine that owns the recorder.
    failed: Arc<AtomicBool>,
}

impl JsonlRecorder {
    fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        Ok(Self::new(path, Box::new(file)))
    }

    fn new(path: &Path, sink: Box<dyn Write + Send>) -> Self {
        Self {
            path: path.to_path_buf(),
            out: BufWriter::new(sink),
            failed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set once any write or the final flush has failed.
    fn failure_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failed)
    }

    fn write(&mut self, record: &Record) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")
    }
}

impl Recorder for JsonlRecorder {
    fn record(&mut self, record: Record) {
        if self.failed.load(Ordering::SeqCst) {
            return;
        }
        // One warning, then the sink goes quiet; the run itself continues.
        if let Err(e) = self.write(&record) {
            warn!(path = %self.path.display(), error = %e, "recorder write failed, recording stopped");
            self.failed.store(true, Ordering::SeqCst);
        }
    }

    fn flush(&mut self) {
        if self.failed.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.out.flush() {
            warn!(path = %self.path.display(), error = %e, "recorder flush failed");
            self.failed.store(true, Ordering::SeqCst);
        }
    }
}
