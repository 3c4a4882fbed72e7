//! Local downstream sinks: a filesystem archive, a JSON-lines event log, and a
//! notifier that writes to the log.
//!
//! All three are safe to call repeatedly for the same submission. The
//! archive overwrites `<record_id>.json`; event log consumers deduplicate on
//! `external_reference`.

use std::{io, path::PathBuf};

use serde_json::json;
use sha2::{Digest, Sha256};
use tandem_core::{
  record::Record,
  sink::{Archive, ArchiveReference, EventPublisher, Notification, Notifier, RecordEvent, SinkError},
  submission::Submission,
};
use tokio::{io::AsyncWriteExt as _, sync::Mutex};

/// Map an I/O error onto the retry taxonomy. Malformed input will not get
/// better on retry; everything else might.
fn io_failure(context: &str, err: io::Error) -> SinkError {
  match err.kind() {
    io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
      SinkError::permanent(format!("{context}: {err}"))
    }
    _ => SinkError::transport(format!("{context}: {err}")),
  }
}

// ─── Archive ─────────────────────────────────────────────────────────────────

/// Writes one JSON document per record into a directory.
///
/// The archive reference is the SHA-256 hex digest of the bytes written.
#[derive(Debug, Clone)]
pub struct FsArchive {
  dir: PathBuf,
}

impl FsArchive {
  pub fn new(dir: impl Into<PathBuf>) -> Self { Self { dir: dir.into() } }
}

impl Archive for FsArchive {
  async fn archive(
    &self,
    record: &Record,
    submission: &Submission,
  ) -> Result<ArchiveReference, SinkError> {
    let doc = json!({
      "external_reference": submission.external_reference,
      "record": record,
    });
    let bytes = serde_json::to_vec_pretty(&doc)
      .map_err(|e| SinkError::permanent(format!("encode archive document: {e}")))?;

    tokio::fs::create_dir_all(&self.dir)
      .await
      .map_err(|e| io_failure("create archive dir", e))?;

    // Write then rename so a crash never leaves a half-written document.
    let path = self.dir.join(format!("{}.json", record.record_id));
    let tmp = self.dir.join(format!("{}.json.tmp", record.record_id));
    tokio::fs::write(&tmp, &bytes)
      .await
      .map_err(|e| io_failure("write archive document", e))?;
    tokio::fs::rename(&tmp, &path)
      .await
      .map_err(|e| io_failure("move archive document", e))?;

    Ok(ArchiveReference(hex::encode(Sha256::digest(&bytes))))
  }
}

// ─── Event log ───────────────────────────────────────────────────────────────

/// Appends each event as one JSON line.
#[derive(Debug)]
pub struct JsonlEventLog {
  path: PathBuf,
  /// Serialises appends from concurrent attempts within this process.
  lock: Mutex<()>,
}

impl JsonlEventLog {
  pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into(), lock: Mutex::new(()) } }
}

impl EventPublisher for JsonlEventLog {
  async fn publish(&self, event: &RecordEvent) -> Result<(), SinkError> {
    let mut line = serde_json::to_vec(event)
      .map_err(|e| SinkError::permanent(format!("encode event: {e}")))?;
    line.push(b'\n');

    let _guard = self.lock.lock().await;
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| io_failure("create event log dir", e))?;
    }
    let mut file = tokio::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .await
      .map_err(|e| io_failure("open event log", e))?;
    file
      .write_all(&line)
      .await
      .map_err(|e| io_failure("append event", e))?;
    file.flush().await.map_err(|e| io_failure("flush event log", e))?;
    Ok(())
  }
}

// ─── Notifier ────────────────────────────────────────────────────────────────

/// Emits notifications as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  async fn notify(&self, notification: &Notification) -> Result<(), SinkError> {
    tracing::info!(
      external_reference = %notification.external_reference,
      recipient = notification.recipient.as_ref().map(|a| a.user_id.as_str()),
      "{}",
      notification.message
    );
    Ok(())
  }
}
