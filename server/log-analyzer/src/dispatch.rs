//! Concurrent line dispatch: N workers share one hand-off channel and run
//! every matching rule's handler for each line they take.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{DispatchError, HandlerError};

pub type Handler = Arc<dyn Fn(&str) -> Result<(), HandlerError> + Send + Sync>;

/// Pattern + handler. Rules are evaluated in registration order.
///
/// A rule built with [`Rule::unmatched`] has no pattern and runs only for
/// lines no pattern rule matched.
#[derive(Clone)]
pub struct Rule {
  name: String,
  pattern: Option<Regex>,
  handler: Handler,
}

impl Rule {
  pub fn new<F>(pattern: &str, handler: F) -> Result<Self, regex::Error>
  where
    F: Fn(&str) -> Result<(), HandlerError> + Send + Sync + 'static,
  {
    Ok(Self {
      name: pattern.to_string(),
      pattern: Some(Regex::new(pattern)?),
      handler: Arc::new(handler),
    })
  }

  /// Fallback for lines that match no pattern rule.
  pub fn unmatched<F>(handler: F) -> Self
  where
    F: Fn(&str) -> Result<(), HandlerError> + Send + Sync + 'static,
  {
    Self {
      name: "unmatched".to_string(),
      pattern: None,
      handler: Arc::new(handler),
    }
  }

  /// Name used in errors and logs; defaults to the pattern text.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Always false for an `unmatched` fallback.
  pub fn matches(&self, line: &str) -> bool {
    self.pattern.as_ref().is_some_and(|p| p.is_match(line))
  }

  fn is_fallback(&self) -> bool {
    self.pattern.is_none()
  }
}

impl fmt::Debug for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Rule")
      .field("name", &self.name)
      .field("pattern", &self.pattern.as_ref().map(Regex::as_str))
      .finish_non_exhaustive()
  }
}

/// Run `concurrency` workers until the channel closes, `cancel` fires, or a handler fails.
///
/// The first handler failure stops the remaining workers after their in-flight
/// line; it is returned once every worker has exited. Closure and cancellation
/// both return `Ok(())`.
pub async fn run(
  cancel: CancellationToken,
  lines: flume::Receiver<String>,
  concurrency: usize,
  rules: Vec<Rule>,
) -> Result<(), DispatchError> {
  let rules: Arc<[Rule]> = rules.into();
  let stop = cancel.child_token();
  let mut workers = JoinSet::new();

  for id in 0..concurrency.max(1) {
    workers.spawn(worker(id, stop.clone(), lines.clone(), Arc::clone(&rules)));
  }
  // Workers own the only receivers; once they exit the producer sees a disconnect.
  drop(lines);

  let mut first_err = None;
  while let Some(joined) = workers.join_next().await {
    let result = joined.unwrap_or_else(|e| Err(DispatchError::Join(e)));
    if let Err(e) = result {
      stop.cancel();
      first_err.get_or_insert(e);
    }
  }

  match first_err {
    Some(e) => Err(e),
    None => Ok(()),
  }
}

async fn worker(
  id: usize,
  stop: CancellationToken,
  lines: flume::Receiver<String>,
  rules: Arc<[Rule]>,
) -> Result<(), DispatchError> {
  loop {
    let line = tokio::select! {
      biased;
      _ = stop.cancelled() => {
        debug!(worker = id, "dispatch worker cancelled");
        return Ok(());
      }
      next = lines.recv_async() => match next {
        Ok(line) => line,
        Err(_) => return Ok(()),
      },
    };

    if let Err(e) = dispatch_line(&line, &rules) {
      error!(worker = id, error = %e, "handler failed; stopping dispatch");
      stop.cancel();
      return Err(e);
    }
  }
}

fn dispatch_line(line: &str, rules: &[Rule]) -> Result<(), DispatchError> {
  let mut matched = false;
  for rule in rules.iter().filter(|r| r.matches(line)) {
    matched = true;
    invoke(rule, line)?;
  }
  if !matched {
    warn!(line = %line, "line matched no dispatch rule; skipping");
    for rule in rules.iter().filter(|r| r.is_fallback()) {
      invoke(rule, line)?;
    }
  }
  Ok(())
}

fn invoke(rule: &Rule, line: &str) -> Result<(), DispatchError> {
  (rule.handler)(line).map_err(|source| DispatchError::Handler {
    rule: rule.name.clone(),
    source,
  })
}
