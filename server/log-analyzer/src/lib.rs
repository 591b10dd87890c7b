//! Live log analyzer: tails an append-only log, classifies each line, and keeps
//! sliding-window rate statistics with threshold alerts.
//!
//! Pipeline: file bytes -> `tail` -> zero-capacity channel -> `dispatch`
//! workers -> `record::parse` -> `engine::Analyzer`, with periodic snapshots
//! and reports running beside it.
//!
//! No persistence, no network; in-memory state only.

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod stats;
pub mod tail;
pub mod types;

pub use config::Config;
pub use dispatch::Rule;
pub use engine::Analyzer;
pub use error::{ConfigError, DispatchError, HandlerError, ParseError, PipelineError, TailError};
pub use pipeline::{Pipeline, Renderer};
pub use tail::{TailStream, Tailer};
pub use types::{Alert, LogRecord, Report};
