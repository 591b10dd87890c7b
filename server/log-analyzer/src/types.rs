//! Core value types: parsed records, alerts, and report snapshots.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Parsed input
// ---------------------------------------------------------------------------

/// One log line, fully validated. Only `record::parse` builds these from text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
  pub source_address: IpAddr,
  pub timestamp: DateTime<Utc>,
  pub level: String,
  /// Empty when the line carries no `Error <code> - ` segment.
  pub error_code: String,
  pub message: String,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Raised by a snapshot when the error rate crosses its threshold. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
  pub timestamp: DateTime<Utc>,
  pub message: String,
}

// ---------------------------------------------------------------------------
// Report snapshot (what the renderer consumes)
// ---------------------------------------------------------------------------

/// Per-label slice of a breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelShare {
  pub label: String,
  pub total: u64,
  /// `total / sum(all totals) * 100`.
  pub percent: f64,
  pub rate: u64,
  pub peak: u64,
}

/// Consistent copy of the analyzer state, taken under its lock.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
  pub generated_at: DateTime<Utc>,
  pub entries_processed: u64,
  /// Lines that parsed badly after matching the analyzer rule.
  pub entries_skipped: u64,
  /// Lines no dispatch rule matched.
  pub entries_unmatched: u64,
  pub current_rate: u64,
  pub peak_rate: u64,
  pub report_delay_ms: u64,
  /// Sorted by label.
  pub levels: Vec<LabelShare>,
  /// Most frequent non-empty messages, highest total first.
  pub top_messages: Vec<LabelShare>,
  pub error_level: String,
  pub error_rate: u64,
  pub error_peak: u64,
  pub alerts: Arc<Vec<Alert>>,
}
