//! Analyzer configuration with sane defaults.

use std::time::Duration;

use regex::Regex;

use crate::error::ConfigError;

/// Tunables for the tailer, dispatch pool, and rate engine.
#[derive(Debug, Clone)]
pub struct Config {
  /// How often the tailer re-checks the file size once it reaches EOF.
  pub poll_interval: Duration,
  /// Capacity of the tailer's buffered reader. Longer lines are reassembled.
  pub read_buffer_capacity: usize,
  /// Number of dispatch workers pulling lines.
  pub concurrency: usize,
  /// Lines matching this pattern are routed to the analyzer.
  pub line_pattern: String,
  /// Sliding-window length used by every rate counter.
  pub window: Duration,
  /// Cadence of peak tracking and alert evaluation.
  pub snapshot_interval: Duration,
  /// Level label whose rate drives alerts and the adaptive report interval.
  pub error_level: String,
  /// Error events per window at which an alert fires.
  pub error_threshold: u64,
  pub initial_report_delay: Duration,
  pub min_report_delay: Duration,
  pub max_report_delay: Duration,
  /// Growth applied to the report interval per quiet snapshot.
  pub report_delay_step: Duration,
  /// Number of message signatures listed in the report.
  pub top_messages: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_millis(100),
      read_buffer_capacity: 4096,
      concurrency: 30,
      line_pattern: r"^\[[^\]]+\] ".to_string(),
      window: Duration::from_secs(1),
      snapshot_interval: Duration::from_secs(1),
      error_level: "ERROR".to_string(),
      error_threshold: 5,
      initial_report_delay: Duration::from_secs(1),
      min_report_delay: Duration::from_millis(250),
      max_report_delay: Duration::from_secs(5),
      report_delay_step: Duration::from_millis(250),
      top_messages: 5,
    }
  }
}

impl Config {
  /// Reject settings the pipeline cannot run with.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.concurrency == 0 {
      return Err(ConfigError::invalid("concurrency", "must be at least 1"));
    }
    if self.read_buffer_capacity == 0 {
      return Err(ConfigError::invalid("read_buffer_capacity", "must not be zero"));
    }
    if self.poll_interval.is_zero() {
      return Err(ConfigError::invalid("poll_interval", "must not be zero"));
    }
    if self.window.is_zero() {
      return Err(ConfigError::invalid("window", "must not be zero"));
    }
    if self.snapshot_interval.is_zero() {
      return Err(ConfigError::invalid("snapshot_interval", "must not be zero"));
    }
    if self.error_threshold == 0 {
      return Err(ConfigError::invalid("error_threshold", "must be at least 1"));
    }
    if self.min_report_delay.is_zero() {
      return Err(ConfigError::invalid("min_report_delay", "must not be zero"));
    }
    if self.min_report_delay > self.max_report_delay {
      return Err(ConfigError::invalid(
        "min_report_delay",
        "must not exceed max_report_delay",
      ));
    }
    if self.initial_report_delay < self.min_report_delay
      || self.initial_report_delay > self.max_report_delay
    {
      return Err(ConfigError::invalid(
        "initial_report_delay",
        "must lie within [min_report_delay, max_report_delay]",
      ));
    }
    if let Err(e) = Regex::new(&self.line_pattern) {
      return Err(ConfigError::invalid("line_pattern", &e.to_string()));
    }
    Ok(())
  }
}
