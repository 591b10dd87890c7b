//! File tailer: emits complete lines as they are appended, survives truncation.
//!
//! Reads go through a fixed-capacity buffered reader. A line longer than the
//! buffer is accumulated across refills; bytes after the last newline are held
//! until their newline arrives. At EOF the tailer polls the file size and
//! restarts from offset 0 when the file shrinks.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use memchr::memchr;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::TailError;

pub struct Tailer {
  path: PathBuf,
  reader: BufReader<File>,
  /// Bytes of a line whose newline has not been read yet.
  pending: Vec<u8>,
  /// Bytes consumed from the start of the file.
  offset: u64,
  last_size: u64,
  poll_interval: Duration,
}

/// Running tailer: the line hand-off plus the task that feeds it.
///
/// `handle` resolves to the reason the tailer stopped; `Ok(())` means
/// cancellation or every receiver was dropped.
pub struct TailStream {
  pub lines: flume::Receiver<String>,
  pub handle: JoinHandle<Result<(), TailError>>,
}

impl Tailer {
  /// Open `path`, positioned at the start or, with `start_at_end`, at the current end.
  pub async fn open(
    path: impl AsRef<Path>,
    start_at_end: bool,
    config: &Config,
  ) -> Result<Self, TailError> {
    let path = path.as_ref().to_path_buf();
    let mut file = File::open(&path).await.map_err(|source| TailError::Open {
      path: path.clone(),
      source,
    })?;
    let size = file
      .metadata()
      .await
      .map_err(|source| TailError::Stat {
        path: path.clone(),
        source,
      })?
      .len();

    let offset = if start_at_end {
      info!(path = %path.display(), "moving to end of log file");
      file
        .seek(SeekFrom::End(0))
        .await
        .map_err(|source| TailError::Seek {
          path: path.clone(),
          source,
        })?
    } else {
      0
    };

    Ok(Self {
      path,
      reader: BufReader::with_capacity(config.read_buffer_capacity, file),
      pending: Vec::new(),
      offset,
      last_size: size,
      poll_interval: config.poll_interval,
    })
  }

  /// Spawn the read/poll loop behind a zero-capacity channel.
  pub fn lines(self, cancel: CancellationToken) -> TailStream {
    let (tx, rx) = flume::bounded(0);
    let handle = tokio::spawn(self.run(cancel, tx));
    TailStream { lines: rx, handle }
  }

  /// Read/poll loop. Each send blocks until a consumer takes the line.
  pub async fn run(
    mut self,
    cancel: CancellationToken,
    tx: flume::Sender<String>,
  ) -> Result<(), TailError> {
    info!(path = %self.path.display(), "tailing file");

    loop {
      while let Some(line) = self.read_line().await? {
        if line.is_empty() {
          continue;
        }
        tokio::select! {
          biased;
          _ = cancel.cancelled() => {
            info!(path = %self.path.display(), "tailer cancelled");
            return Ok(());
          }
          sent = tx.send_async(line) => {
            if sent.is_err() {
              debug!(path = %self.path.display(), "no line consumers left");
              return Ok(());
            }
          }
        }
      }

      if !self.wait_for_change(&cancel).await? {
        info!(path = %self.path.display(), "stopped waiting for log updates");
        return Ok(());
      }
    }
  }

  /// Next complete line, or `None` at EOF. A partial trailing line stays in `pending`.
  async fn read_line(&mut self) -> Result<Option<String>, TailError> {
    loop {
      let chunk = self
        .reader
        .fill_buf()
        .await
        .map_err(|source| TailError::Read {
          path: self.path.clone(),
          source,
        })?;
      if chunk.is_empty() {
        return Ok(None);
      }

      let (take, complete) = match memchr(b'\n', chunk) {
        Some(i) => (i + 1, true),
        None => (chunk.len(), false),
      };
      self.pending.extend_from_slice(&chunk[..take]);
      self.reader.consume(take);
      self.offset += take as u64;

      if complete {
        let mut raw = std::mem::take(&mut self.pending);
        raw.pop();
        if raw.last() == Some(&b'\r') {
          raw.pop();
        }
        let line = String::from_utf8(raw)
          .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
        return Ok(Some(line));
      }
    }
  }

  /// Sleep-and-stat until the file changes. `Ok(false)` means cancelled.
  async fn wait_for_change(&mut self, cancel: &CancellationToken) -> Result<bool, TailError> {
    loop {
      tokio::select! {
        _ = cancel.cancelled() => return Ok(false),
        _ = tokio::time::sleep(self.poll_interval) => {}
      }

      let size = self.file_size().await?;
      if size < self.last_size || size < self.offset {
        warn!(
          path = %self.path.display(),
          previous_size = self.last_size,
          current_size = size,
          "file truncated or rotated; reading from start"
        );
        self.rewind().await?;
      } else if size == self.last_size && size == self.offset {
        continue;
      }

      self.last_size = size;
      return Ok(true);
    }
  }

  async fn file_size(&self) -> Result<u64, TailError> {
    let meta = self
      .reader
      .get_ref()
      .metadata()
      .await
      .map_err(|source| TailError::Stat {
        path: self.path.clone(),
        source,
      })?;
    Ok(meta.len())
  }

  /// Back to offset 0 with an empty buffer; unread bytes are abandoned.
  async fn rewind(&mut self) -> Result<(), TailError> {
    // Seeking through the BufReader drops whatever it had buffered.
    self
      .reader
      .seek(SeekFrom::Start(0))
      .await
      .map_err(|source| TailError::Seek {
        path: self.path.clone(),
        source,
      })?;
    self.pending.clear();
    self.offset = 0;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  fn test_config() -> Config {
    Config {
      poll_interval: Duration::from_millis(10),
      ..Config::default()
    }
  }

  fn append(path: &Path, data: &str) {
    let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    f.write_all(data.as_bytes()).unwrap();
    f.flush().unwrap();
  }

  async fn recv(rx: &flume::Receiver<String>) -> Option<String> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv_async())
      .await
      .ok()
      .and_then(|r| r.ok())
  }

  #[tokio::test]
  async fn reads_existing_lines_and_skips_blank_ones() {
    let file = tempfile::NamedTempFile::new().unwrap();
    append(file.path(), "first\n\nsecond\r\nthird\n");

    let cancel = CancellationToken::new();
    let tailer = Tailer::open(file.path(), false, &test_config()).await.unwrap();
    let stream = tailer.lines(cancel.clone());

    assert_eq!(stream.lines.capacity(), Some(0), "hand-off must not buffer");
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("first"));
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("second"));
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("third"));

    cancel.cancel();
    assert!(stream.handle.await.unwrap().is_ok());
  }

  #[tokio::test]
  async fn start_at_end_only_sees_new_lines() {
    let file = tempfile::NamedTempFile::new().unwrap();
    append(file.path(), "old line\n");

    let cancel = CancellationToken::new();
    let tailer = Tailer::open(file.path(), true, &test_config()).await.unwrap();
    let stream = tailer.lines(cancel.clone());

    append(file.path(), "new line\n");
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("new line"));
    cancel.cancel();
  }

  #[tokio::test]
  async fn line_longer_than_buffer_is_emitted_once() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let long = "x".repeat(1000);
    append(file.path(), &format!("{}\nshort\n", long));

    let config = Config {
      read_buffer_capacity: 8,
      ..test_config()
    };
    let cancel = CancellationToken::new();
    let stream = Tailer::open(file.path(), false, &config)
      .await
      .unwrap()
      .lines(cancel.clone());

    assert_eq!(recv(&stream.lines).await, Some(long));
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("short"));
    cancel.cancel();
  }

  #[tokio::test]
  async fn partial_line_waits_for_its_newline() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let cancel = CancellationToken::new();
    let stream = Tailer::open(file.path(), false, &test_config())
      .await
      .unwrap()
      .lines(cancel.clone());

    append(file.path(), "hal");
    let early = tokio::time::timeout(Duration::from_millis(150), stream.lines.recv_async()).await;
    assert!(early.is_err(), "fragment must not be emitted");

    append(file.path(), "f done\n");
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("half done"));
    cancel.cancel();
  }

  #[tokio::test]
  async fn truncation_restarts_from_offset_zero() {
    let file = tempfile::NamedTempFile::new().unwrap();
    append(file.path(), "a fairly long first line\nanother long second line\n");

    let cancel = CancellationToken::new();
    let stream = Tailer::open(file.path(), false, &test_config())
      .await
      .unwrap()
      .lines(cancel.clone());
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("a fairly long first line"));
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("another long second line"));

    std::fs::write(file.path(), "fresh\n").unwrap();
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("fresh"));

    append(file.path(), "after\n");
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("after"));
    cancel.cancel();
  }

  #[tokio::test]
  async fn cancellation_closes_the_stream() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let cancel = CancellationToken::new();
    let stream = Tailer::open(file.path(), false, &test_config())
      .await
      .unwrap()
      .lines(cancel.clone());

    cancel.cancel();
    assert!(stream.handle.await.unwrap().is_ok());
    assert!(stream.lines.recv_async().await.is_err(), "sender dropped");
  }

  #[tokio::test]
  async fn dropped_receiver_ends_tailer() {
    let file = tempfile::NamedTempFile::new().unwrap();
    append(file.path(), "one\ntwo\n");
    let stream = Tailer::open(file.path(), false, &test_config())
      .await
      .unwrap()
      .lines(CancellationToken::new());

    drop(stream.lines);
    let result = tokio::time::timeout(Duration::from_secs(2), stream.handle)
      .await
      .unwrap()
      .unwrap();
    assert!(result.is_ok());
  }

  #[tokio::test]
  async fn producer_waits_for_a_taker() {
    let file = tempfile::NamedTempFile::new().unwrap();
    append(file.path(), "one\ntwo\n");
    let cancel = CancellationToken::new();
    let stream = Tailer::open(file.path(), false, &test_config())
      .await
      .unwrap()
      .lines(cancel.clone());

    // Nobody is receiving: nothing may pile up in the channel.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(stream.lines.len(), 0);
    assert!(!stream.handle.is_finished());

    assert_eq!(recv(&stream.lines).await.as_deref(), Some("one"));
    assert_eq!(recv(&stream.lines).await.as_deref(), Some("two"));
    cancel.cancel();
  }

  #[cfg(target_os = "linux")]
  #[tokio::test]
  async fn read_failure_ends_the_stream_with_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let stream = Tailer::open(dir.path(), false, &test_config())
      .await
      .unwrap()
      .lines(CancellationToken::new());

    let result = tokio::time::timeout(Duration::from_secs(2), stream.handle)
      .await
      .unwrap()
      .unwrap();
    assert!(matches!(result, Err(TailError::Read { .. })), "{:?}", result);
    assert!(stream.lines.recv_async().await.is_err(), "sender dropped");
  }

  #[tokio::test]
  async fn missing_file_is_an_open_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.log");
    let err = Tailer::open(&missing, false, &test_config()).await.err().unwrap();
    assert!(matches!(err, TailError::Open { .. }));
    assert!(err.to_string().contains("nope.log"));
  }
}
