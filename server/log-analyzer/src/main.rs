//! Binary entrypoint: tail a log file and redraw the analysis report.
//!
//! The report goes to stdout (cleared-screen text, or one JSON object per
//! refresh with `--format json`). Diagnostics go to stderr via `RUST_LOG`.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use log_analyzer::pipeline::spawn_reports;
use log_analyzer::{Config, Pipeline, Renderer, Report};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
  Text,
  Json,
}

#[derive(Debug, Parser)]
#[command(name = "log-analyzer", about = "Live rate statistics and alerts for a growing log file")]
struct Cli {
  /// Log file to tail.
  #[arg(long, env = "LOG_ANALYZER_FILE", default_value = "test_logs.log")]
  file: PathBuf,

  /// Read the file from the beginning instead of only newly appended lines.
  #[arg(long, env = "LOG_ANALYZER_FROM_START")]
  from_start: bool,

  /// Dispatch workers.
  #[arg(long, env = "LOG_ANALYZER_CONCURRENCY", default_value_t = 30)]
  concurrency: usize,

  /// Error events per window that raise an alert.
  #[arg(long, env = "LOG_ANALYZER_ERROR_THRESHOLD", default_value_t = 5)]
  error_threshold: u64,

  /// Level label treated as an error.
  #[arg(long, env = "LOG_ANALYZER_ERROR_LEVEL", default_value = "ERROR")]
  error_level: String,

  /// Sliding-window length in milliseconds.
  #[arg(long, env = "LOG_ANALYZER_WINDOW_MS", default_value_t = 1000)]
  window_ms: u64,

  /// Snapshot cadence in milliseconds.
  #[arg(long, env = "LOG_ANALYZER_SNAPSHOT_MS", default_value_t = 1000)]
  snapshot_ms: u64,

  /// File poll interval at EOF in milliseconds.
  #[arg(long, env = "LOG_ANALYZER_POLL_MS", default_value_t = 100)]
  poll_ms: u64,

  #[arg(long, env = "LOG_ANALYZER_MIN_DELAY_MS", default_value_t = 250)]
  min_delay_ms: u64,

  #[arg(long, env = "LOG_ANALYZER_MAX_DELAY_MS", default_value_t = 5000)]
  max_delay_ms: u64,

  #[arg(long, value_enum, env = "LOG_ANALYZER_FORMAT", default_value = "text")]
  format: Format,
}

impl Cli {
  fn config(&self) -> Config {
    let defaults = Config::default();
    let min_report_delay = Duration::from_millis(self.min_delay_ms);
    let max_report_delay = Duration::from_millis(self.max_delay_ms);
    Config {
      poll_interval: Duration::from_millis(self.poll_ms),
      concurrency: self.concurrency,
      window: Duration::from_millis(self.window_ms),
      snapshot_interval: Duration::from_millis(self.snapshot_ms),
      error_level: self.error_level.clone(),
      error_threshold: self.error_threshold,
      initial_report_delay: defaults
        .initial_report_delay
        .max(min_report_delay)
        .min(max_report_delay),
      min_report_delay,
      max_report_delay,
      ..defaults
    }
  }
}

/// Clears the terminal and redraws the text report.
struct Terminal;

impl Renderer for Terminal {
  fn render(&mut self, report: &Report) -> io::Result<()> {
    let mut out = io::stdout().lock();
    write!(out, "\x1b[2J\x1b[H{}", report)?;
    writeln!(out, "{}", "-".repeat(80))?;
    writeln!(out, "Press Ctrl+C to exit")?;
    out.flush()
  }
}

/// One JSON object per refresh.
struct JsonLines;

impl Renderer for JsonLines {
  fn render(&mut self, report: &Report) -> io::Result<()> {
    let mut out = io::stdout().lock();
    serde_json::to_writer(&mut out, report)?;
    writeln!(out)?;
    out.flush()
  }
}

fn init_logging() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(io::stderr)
    .with_target(false)
    .init();
}

async fn shutdown_on_signal(cancel: CancellationToken) {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
      Ok(mut term) => {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => {}
          _ = term.recv() => {}
        }
      }
      Err(e) => {
        warn!(error = %e, "SIGTERM handler unavailable; listening for Ctrl+C only");
        let _ = tokio::signal::ctrl_c().await;
      }
    }
  }
  #[cfg(not(unix))]
  {
    let _ = tokio::signal::ctrl_c().await;
  }
  info!("shutdown signal received");
  cancel.cancel();
}

#[tokio::main]
async fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging();

  let pipeline = match Pipeline::new(cli.config()) {
    Ok(p) => p,
    Err(e) => {
      error!(error = %e, "invalid configuration");
      return ExitCode::from(2);
    }
  };

  let cancel = CancellationToken::new();
  tokio::spawn(shutdown_on_signal(cancel.clone()));

  let reports = match cli.format {
    Format::Text => spawn_reports(pipeline.analyzer(), Terminal, cancel.clone()),
    Format::Json => spawn_reports(pipeline.analyzer(), JsonLines, cancel.clone()),
  };

  let result = pipeline.run(&cli.file, !cli.from_start, cancel.clone()).await;
  cancel.cancel();

  match reports.await {
    Ok(Err(e)) => warn!(error = %e, "report output failed"),
    Err(e) => warn!(error = %e, "report task aborted"),
    Ok(Ok(())) => {}
  }

  match result {
    Ok(()) => {
      info!(path = %cli.file.display(), "stopped tailing");
      ExitCode::SUCCESS
    }
    Err(e) => {
      error!(path = %cli.file.display(), error = %e, "stopped tailing");
      ExitCode::FAILURE
    }
  }
}
