//! Text rendering of a `Report` snapshot.

use std::fmt;

use crate::types::{Alert, LabelShare, Report};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

impl fmt::Display for Report {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(
      f,
      "Log Analysis Report (Last Updated: {})",
      self.generated_at.format("%Y-%m-%dT%H:%M:%SZ")
    )?;
    writeln!(f, "{}", RULE)?;

    writeln!(f, "Runtime Stats:")?;
    writeln!(f, "• Entries Processed: {}", self.entries_processed)?;
    writeln!(f, "• Entries Skipped: {}", self.entries_skipped)?;
    writeln!(f, "• Entries Unmatched: {}", self.entries_unmatched)?;
    writeln!(
      f,
      "• Current Rate: {} entries/sec (peak {})",
      self.current_rate, self.peak_rate
    )?;
    writeln!(f, "• Adaptive Window: {}ms", self.report_delay_ms)?;
    writeln!(f)?;

    writeln!(f, "Pattern Analysis:")?;
    write_shares(f, &self.levels, "< no entries >")?;
    writeln!(f)?;

    writeln!(f, "Dynamic Insights:")?;
    writeln!(
      f,
      "• {} Rate: {} entries/sec (peak {})",
      self.error_level, self.error_rate, self.error_peak
    )?;
    writeln!(f, "• Top Messages:")?;
    write_shares(f, &self.top_messages, "< no messages >")?;
    writeln!(f)?;

    writeln!(f, "Self-Evolving Alerts:")?;
    if self.alerts.is_empty() {
      writeln!(f, "< no alerts >")?;
    }
    for alert in self.alerts.iter() {
      writeln!(f, "{}", alert)?;
    }
    Ok(())
  }
}

impl fmt::Display for Alert {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}] ⚠️ {}", self.timestamp.format("%H:%M:%S"), self.message)
  }
}

fn write_shares(f: &mut fmt::Formatter<'_>, shares: &[LabelShare], placeholder: &str) -> fmt::Result {
  if shares.is_empty() {
    return writeln!(f, "{}", placeholder);
  }
  for s in shares {
    writeln!(
      f,
      " - {}: {:.2}% ({} entries, {}/sec, peak {})",
      s.label, s.percent, s.total, s.rate, s.peak
    )?;
  }
  Ok(())
}
