//! Wiring: tailer -> dispatch pool -> analyzer, plus the periodic snapshot
//! and report tasks.

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::dispatch::{self, Rule};
use crate::engine::Analyzer;
use crate::error::{ConfigError, PipelineError};
use crate::tail::Tailer;
use crate::types::Report;

/// Display surface for periodic reports.
pub trait Renderer: Send + 'static {
  fn render(&mut self, report: &Report) -> io::Result<()>;
}

pub struct Pipeline {
  config: Config,
  analyzer: Arc<Analyzer>,
}

impl Pipeline {
  pub fn new(config: Config) -> Result<Self, ConfigError> {
    config.validate()?;
    let analyzer = Arc::new(Analyzer::new(config.clone()));
    Ok(Self { config, analyzer })
  }

  pub fn analyzer(&self) -> Arc<Analyzer> {
    Arc::clone(&self.analyzer)
  }

  /// Route lines matching `line_pattern` into the analyzer.
  pub fn analyzer_rule(&self) -> Result<Rule, ConfigError> {
    let analyzer = Arc::clone(&self.analyzer);
    let rule = Rule::new(&self.config.line_pattern, move |line| analyzer.include_line(line))
      .map_err(|e| ConfigError::invalid("line_pattern", &e.to_string()))?;
    Ok(rule.named("analyzer"))
  }

  /// Count lines no pattern rule took, so format drift shows up in the report.
  pub fn unmatched_rule(&self) -> Rule {
    let analyzer = Arc::clone(&self.analyzer);
    Rule::unmatched(move |line| analyzer.unmatched_line(line))
  }

  /// Tail `path` until cancelled, the tailer fails, or a handler fails.
  ///
  /// Open failures return before anything is spawned. On return every task
  /// started here has finished.
  pub async fn run(
    &self,
    path: impl AsRef<Path>,
    start_at_end: bool,
    cancel: CancellationToken,
  ) -> Result<(), PipelineError> {
    let rules = vec![self.analyzer_rule()?, self.unmatched_rule()];
    let tailer = Tailer::open(path, start_at_end, &self.config).await?;

    let stop = cancel.child_token();
    let stream = tailer.lines(stop.clone());
    let snapshots = spawn_snapshots(self.analyzer(), stop.clone());

    let dispatched = dispatch::run(stop.clone(), stream.lines, self.config.concurrency, rules).await;
    debug!("dispatch pool finished");

    stop.cancel();
    let tailed = stream.handle.await?;
    snapshots.await?;

    dispatched?;
    tailed?;
    info!(
      processed = self.analyzer.entries_processed(),
      skipped = self.analyzer.entries_skipped(),
      unmatched = self.analyzer.entries_unmatched(),
      "pipeline stopped"
    );
    Ok(())
  }
}

/// Snapshot every `snapshot_interval`, starting one interval from now.
pub fn spawn_snapshots(analyzer: Arc<Analyzer>, cancel: CancellationToken) -> JoinHandle<()> {
  let period = analyzer.config().snapshot_interval;
  tokio::spawn(async move {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = ticker.tick() => {
          analyzer.snapshot();
        }
      }
    }
  })
}

/// Render immediately, then again after each adaptive report delay.
pub fn spawn_reports<R: Renderer>(
  analyzer: Arc<Analyzer>,
  renderer: R,
  cancel: CancellationToken,
) -> JoinHandle<io::Result<()>> {
  tokio::spawn(report_loop(analyzer, renderer, cancel))
}

async fn report_loop<R: Renderer>(
  analyzer: Arc<Analyzer>,
  mut renderer: R,
  cancel: CancellationToken,
) -> io::Result<()> {
  loop {
    // Copied out under the lock; rendering happens without it.
    let report = analyzer.report();
    renderer.render(&report)?;

    let delay = analyzer.report_delay();
    tokio::select! {
      _ = cancel.cancelled() => return Ok(()),
      _ = tokio::time::sleep(delay) => {}
    }
  }
}
