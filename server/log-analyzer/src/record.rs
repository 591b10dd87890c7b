//! Raw line -> `LogRecord` extraction.
//!
//! Line grammar:
//!
//! ```text
//! [<RFC3339 timestamp>] <LEVEL> - IP:<v4-or-v6> [Error <code> - ]<free text>
//! ```

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ParseError;
use crate::types::LogRecord;

static RECORD_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"^\[(?P<timestamp>[^\]]*)\] (?P<level>\S+) - IP:(?P<address>\S+)(?: Error (?P<code>\S+) - )?[ \t]*(?P<message>.*)$",
  )
  .expect("record pattern is a valid literal")
});

/// Parse one line. Either every field validates or nothing is returned.
pub fn parse(line: &str) -> Result<LogRecord, ParseError> {
  let caps = RECORD_RE
    .captures(line)
    .ok_or_else(|| ParseError::Shape(line.to_string()))?;

  let raw_ts = &caps["timestamp"];
  let timestamp = DateTime::parse_from_rfc3339(raw_ts)
    .map_err(|e| ParseError::Timestamp {
      value: raw_ts.to_string(),
      reason: e.to_string(),
    })?
    .with_timezone(&Utc);

  let raw_addr = &caps["address"];
  let source_address: IpAddr = raw_addr
    .parse()
    .map_err(|_| ParseError::Address(raw_addr.to_string()))?;

  Ok(LogRecord {
    source_address,
    timestamp,
    level: caps["level"].to_string(),
    error_code: caps
      .name("code")
      .map(|m| m.as_str().to_string())
      .unwrap_or_default(),
    message: caps["message"].to_string(),
  })
}

impl fmt::Display for LogRecord {
  /// Render back into the line grammar; `parse` accepts the result.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "[{}] {} - IP:{} ",
      self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
      self.level,
      self.source_address
    )?;
    if !self.error_code.is_empty() {
      write!(f, "Error {} - ", self.error_code)?;
    }
    f.write_str(&self.message)
  }
}
