//! Core engine: owns every counter behind one lock, observes records,
//! takes snapshots, raises alerts, and produces reports.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;

use crate::config::Config;
use crate::error::HandlerError;
use crate::record;
use crate::stats::{CounterSet, RateCounter};
use crate::types::*;

/// Mutable aggregate. Only ever touched with the `Analyzer` lock held.
struct AnalyzerState {
  total: RateCounter,
  levels: CounterSet,
  messages: CounterSet,
  skipped: u64,
  unmatched: u64,
  /// Shared with reports; appends copy only while a report still holds it.
  alerts: Arc<Vec<Alert>>,
  /// Last snapshot saw the error rate at or above threshold.
  error_alert_active: bool,
  report_delay: Duration,
}

/// The rate engine. Shared across dispatch workers and periodic tasks.
pub struct Analyzer {
  config: Config,
  state: Mutex<AnalyzerState>,
}

impl Analyzer {
  pub fn new(config: Config) -> Self {
    let state = AnalyzerState {
      total: RateCounter::new(config.window),
      levels: CounterSet::new(config.window),
      messages: CounterSet::new(config.window),
      skipped: 0,
      unmatched: 0,
      alerts: Arc::new(Vec::new()),
      error_alert_active: false,
      report_delay: config
        .initial_report_delay
        .max(config.min_report_delay)
        .min(config.max_report_delay),
    };
    Self {
      config,
      state: Mutex::new(state),
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default())
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  /// Dispatch handler: parse and observe. Unparseable lines are logged and skipped.
  pub fn include_line(&self, line: &str) -> Result<(), HandlerError> {
    match record::parse(line) {
      Ok(rec) => self.observe(&rec),
      Err(e) => {
        warn!(error = %e, "failed to parse log line");
        self.state.lock().skipped += 1;
      }
    }
    Ok(())
  }

  /// Dispatch fallback for lines no pattern rule took.
  pub fn unmatched_line(&self, _line: &str) -> Result<(), HandlerError> {
    self.state.lock().unmatched += 1;
    Ok(())
  }

  pub fn observe(&self, rec: &LogRecord) {
    let mut state = self.state.lock();
    // Taken under the lock so slot timestamps stay ordered.
    let now = Instant::now();
    state.observe_at(rec, now);
  }

  pub fn observe_at(&self, rec: &LogRecord, now: Instant) {
    self.state.lock().observe_at(rec, now);
  }

  /// Advance peaks, evaluate the error alert, retune the report interval.
  ///
  /// Returns the alert raised by this snapshot, if any.
  pub fn snapshot(&self) -> Option<Alert> {
    self.snapshot_at(Instant::now(), Utc::now())
  }

  pub fn snapshot_at(&self, now: Instant, wall: DateTime<Utc>) -> Option<Alert> {
    let raised = {
      let mut state = self.state.lock();
      state.total.snapshot_at(now);
      state.levels.snapshot_at(now);
      state.messages.snapshot_at(now);

      let error_rate = state.levels.rate_at(&self.config.error_level, now);
      let above = error_rate >= self.config.error_threshold;

      // Edge-triggered: one alert per crossing, re-armed once the rate falls back.
      let raised = if above && !state.error_alert_active {
        let alert = Alert {
          timestamp: wall,
          message: format!(
            "{} rate {} per {:?} reached threshold {}",
            self.config.error_level, error_rate, self.config.window, self.config.error_threshold
          ),
        };
        Arc::make_mut(&mut state.alerts).push(alert.clone());
        Some(alert)
      } else {
        None
      };
      state.error_alert_active = above;
      state.report_delay = next_report_delay(state.report_delay, error_rate, &self.config);
      raised
    };

    if let Some(alert) = &raised {
      warn!(message = %alert.message, "alert raised");
    }
    raised
  }

  pub fn report(&self) -> Report {
    self.report_at(Instant::now(), Utc::now())
  }

  /// Copy out everything the renderer needs. O(labels) under the lock.
  pub fn report_at(&self, now: Instant, wall: DateTime<Utc>) -> Report {
    let state = self.state.lock();

    let level_total = state.levels.grand_total();
    let mut levels: Vec<LabelShare> = state
      .levels
      .iter()
      .map(|(label, counter)| share(label, counter, level_total, now))
      .collect();
    levels.sort_by(|a, b| a.label.cmp(&b.label));

    let message_total = state.messages.grand_total();
    let mut top_messages: Vec<LabelShare> = state
      .messages
      .iter()
      .filter(|(label, _)| !label.is_empty())
      .map(|(label, counter)| share(label, counter, message_total, now))
      .collect();
    top_messages.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.label.cmp(&b.label)));
    top_messages.truncate(self.config.top_messages);

    let error = state.levels.get(&self.config.error_level);

    Report {
      generated_at: wall,
      entries_processed: state.total.total(),
      entries_skipped: state.skipped,
      entries_unmatched: state.unmatched,
      current_rate: state.total.rate_at(now),
      peak_rate: state.total.peak(),
      report_delay_ms: state.report_delay.as_millis() as u64,
      levels,
      top_messages,
      error_level: self.config.error_level.clone(),
      error_rate: error.map_or(0, |c| c.rate_at(now)),
      error_peak: error.map_or(0, RateCounter::peak),
      alerts: Arc::clone(&state.alerts),
    }
  }

  /// Current adaptive report interval, always within the configured bounds.
  pub fn report_delay(&self) -> Duration {
    self.state.lock().report_delay
  }

  pub fn alerts(&self) -> Arc<Vec<Alert>> {
    Arc::clone(&self.state.lock().alerts)
  }

  pub fn entries_processed(&self) -> u64 {
    self.state.lock().total.total()
  }

  pub fn entries_skipped(&self) -> u64 {
    self.state.lock().skipped
  }

  pub fn entries_unmatched(&self) -> u64 {
    self.state.lock().unmatched
  }
}

impl AnalyzerState {
  fn observe_at(&mut self, rec: &LogRecord, now: Instant) {
    self.total.incr_at(now);
    self.levels.incr_at(&rec.level, now);
    self.messages.incr_at(&rec.message, now);
  }
}

fn share(label: &str, counter: &RateCounter, grand_total: u64, now: Instant) -> LabelShare {
  let percent = if grand_total == 0 {
    0.0
  } else {
    counter.total() as f64 / grand_total as f64 * 100.0
  };
  LabelShare {
    label: label.to_string(),
    total: counter.total(),
    percent,
    rate: counter.rate_at(now),
    peak: counter.peak(),
  }
}

/// Halve while errors are at threshold, grow by one step while quiet, clamp to bounds.
fn next_report_delay(current: Duration, error_rate: u64, config: &Config) -> Duration {
  let next = if error_rate >= config.error_threshold {
    current / 2
  } else if error_rate == 0 {
    current.saturating_add(config.report_delay_step)
  } else {
    current
  };
  next.max(config.min_report_delay).min(config.max_report_delay)
}
