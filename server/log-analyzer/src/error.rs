//! Structured error types for the analyzer pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal to the tailer. Open/stat failures surface at startup; read failures end the loop.
#[derive(Debug, Error)]
pub enum TailError {
  #[error("open {}: {source}", .path.display())]
  Open { path: PathBuf, source: io::Error },

  #[error("seek {}: {source}", .path.display())]
  Seek { path: PathBuf, source: io::Error },

  #[error("stat {}: {source}", .path.display())]
  Stat { path: PathBuf, source: io::Error },

  #[error("read {}: {source}", .path.display())]
  Read { path: PathBuf, source: io::Error },
}

/// A line that could not be turned into a record. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
  #[error("line does not match the record shape: {0:?}")]
  Shape(String),

  #[error("timestamp {value:?}: {reason}")]
  Timestamp { value: String, reason: String },

  #[error("invalid IP address {0:?}")]
  Address(String),
}

/// Failure reported by a dispatch handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
  pub fn new(msg: impl Into<String>) -> Self {
    Self(msg.into())
  }
}

#[derive(Debug, Error)]
pub enum DispatchError {
  #[error("handler for rule {rule:?} failed: {source}")]
  Handler {
    rule: String,
    #[source]
    source: HandlerError,
  },

  #[error("dispatch worker aborted: {0}")]
  Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config: {field}: {reason}")]
  Invalid { field: String, reason: String },
}

impl ConfigError {
  pub fn invalid(field: &str, reason: &str) -> Self {
    Self::Invalid {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }
}

/// Everything that can stop the assembled pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Tail(#[from] TailError),

  #[error(transparent)]
  Dispatch(#[from] DispatchError),

  #[error("task aborted: {0}")]
  Join(#[from] tokio::task::JoinError),
}
