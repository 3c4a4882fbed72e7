//! Submissions — the processing ticket attached to every submitted record.
//!
//! A submission is created in the same transaction that files its record and
//! is never deleted. Its status moves through the downstream pipeline:
//!
//! ```text
//! Received ──start──▶ Processing ──success──▶ Done
//!                     Processing ──transport──▶ SinkFailed ──start──▶ Processing
//!                     Processing ──permanent──▶ PermanentlyFailed
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore as _};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on stored error text, in characters.
pub const MAX_ERROR_LEN: usize = 2000;

// ─── Status ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
  Received,
  Processing,
  Done,
  /// A sink was unreachable; eligible for retry.
  SinkFailed,
  /// A sink rejected the record; requires manual intervention.
  PermanentlyFailed,
}

impl SubmissionStatus {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Received => "received",
      Self::Processing => "processing",
      Self::Done => "done",
      Self::SinkFailed => "sink_failed",
      Self::PermanentlyFailed => "permanently_failed",
    }
  }

  /// No further processing happens from a terminal state.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Done | Self::PermanentlyFailed)
  }

  /// States from which an attempt may (re)start.
  pub fn can_start(self) -> bool {
    matches!(self, Self::Received | Self::Processing | Self::SinkFailed)
  }

  /// States an attempt may resolve to.
  pub fn is_outcome(self) -> bool {
    matches!(self, Self::Done | Self::SinkFailed | Self::PermanentlyFailed)
  }
}

impl fmt::Display for SubmissionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

// ─── External reference ──────────────────────────────────────────────────────

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Human-facing identifier handed out once per submission, e.g.
/// `XBW-7K2M9Q4TXR0D`. Downstream sinks use it as their idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalReference(String);

impl ExternalReference {
  pub const PREFIX: &'static str = "XBW-";

  /// Draw a fresh reference from the OS random source.
  pub fn generate() -> Self {
    let mut bits = OsRng.next_u64();
    let mut out = String::with_capacity(Self::PREFIX.len() + 12);
    out.push_str(Self::PREFIX);
    // 12 symbols × 5 bits = 60 bits of entropy.
    for _ in 0..12 {
      out.push(CROCKFORD[(bits & 0x1f) as usize] as char);
      bits >>= 5;
    }
    Self(out)
  }

  /// Wrap a value read back from storage.
  pub fn from_stored(value: String) -> Self { Self(value) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ExternalReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

// ─── Submission ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
  pub submission_id:      Uuid,
  pub record_id:          Uuid,
  pub status:             SubmissionStatus,
  /// Number of resolved attempts; never decreases.
  pub attempt_count:      u32,
  pub last_attempt_at:    Option<DateTime<Utc>>,
  pub last_error:         Option<String>,
  pub external_reference: ExternalReference,
  pub created_at:         DateTime<Utc>,
}

impl Submission {
  /// A fresh ticket for a record that has just been filed.
  pub fn received(record_id: Uuid, now: DateTime<Utc>) -> Self {
    Self {
      submission_id: Uuid::new_v4(),
      record_id,
      status: SubmissionStatus::Received,
      attempt_count: 0,
      last_attempt_at: None,
      last_error: None,
      external_reference: ExternalReference::generate(),
      created_at: now,
    }
  }

  /// Whether the retry sweep should pick this submission up.
  ///
  /// Mirrors the store's retry-candidate query so the two can be checked
  /// against each other.
  pub fn is_retry_candidate(&self, stale_since: DateTime<Utc>, max_attempts: u32) -> bool {
    if self.attempt_count >= max_attempts {
      return false;
    }
    match self.status {
      SubmissionStatus::SinkFailed => true,
      SubmissionStatus::Processing => {
        self.last_attempt_at.is_some_and(|at| at < stale_since)
      }
      SubmissionStatus::Received => self.created_at < stale_since,
      SubmissionStatus::Done | SubmissionStatus::PermanentlyFailed => false,
    }
  }
}

/// Clamp downstream error text to [`MAX_ERROR_LEN`] characters.
pub fn truncate_error(message: &str) -> String {
  match message.char_indices().nth(MAX_ERROR_LEN) {
    Some((cut, _)) => message[..cut].to_owned(),
    None => message.to_owned(),
  }
}

#[cfg(test)]
mod tests {
  use chrono::Duration;

  use super::*;

  #[test]
  fn reference_has_prefix_and_alphabet() {
    let r = ExternalReference::generate();
    let body = r.as_str().strip_prefix(ExternalReference::PREFIX).unwrap();
    assert_eq!(body.len(), 12);
    assert!(body.bytes().all(|b| CROCKFORD.contains(&b)));
  }

  #[test]
  fn references_differ() {
    assert_ne!(ExternalReference::generate(), ExternalReference::generate());
  }

  #[test]
  fn truncate_keeps_short_text() {
    assert_eq!(truncate_error("connection refused"), "connection refused");
  }

  #[test]
  fn truncate_cuts_on_char_boundary() {
    let long = "é".repeat(MAX_ERROR_LEN + 10);
    let cut = truncate_error(&long);
    assert_eq!(cut.chars().count(), MAX_ERROR_LEN);
  }

  #[test]
  fn fresh_submission_is_received() {
    let s = Submission::received(Uuid::new_v4(), Utc::now());
    assert_eq!(s.status, SubmissionStatus::Received);
    assert_eq!(s.attempt_count, 0);
    assert!(s.last_attempt_at.is_none());
  }

  #[test]
  fn retry_predicate_excludes_terminal_and_exhausted() {
    let now = Utc::now();
    let mut s = Submission::received(Uuid::new_v4(), now - Duration::hours(1));
    s.status = SubmissionStatus::SinkFailed;
    s.attempt_count = 2;
    assert!(s.is_retry_candidate(now, 3));
    assert!(!s.is_retry_candidate(now, 2));

    s.status = SubmissionStatus::Done;
    assert!(!s.is_retry_candidate(now, 10));
    s.status = SubmissionStatus::PermanentlyFailed;
    assert!(!s.is_retry_candidate(now, 10));
  }

  #[test]
  fn retry_predicate_respects_staleness() {
    let now = Utc::now();
    let mut s = Submission::received(Uuid::new_v4(), now);
    s.status = SubmissionStatus::Processing;
    s.last_attempt_at = Some(now - Duration::minutes(5));
    assert!(!s.is_retry_candidate(now - Duration::minutes(15), 3));
    assert!(s.is_retry_candidate(now, 3));
  }

  #[test]
  fn status_helpers() {
    assert!(SubmissionStatus::SinkFailed.can_start());
    assert!(!SubmissionStatus::Done.can_start());
    assert!(SubmissionStatus::PermanentlyFailed.is_terminal());
    assert!(!SubmissionStatus::Processing.is_outcome());
  }
}
