//! The `DeclarationStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `tandem-store-sqlite`).
//! The [`Processor`](crate::processor::Processor) and the worker depend on
//! this abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::{
  actor::Actor,
  record::{NewRecord, Record},
  submission::{Submission, SubmissionStatus},
  submit::SubmitReceipt,
};

/// Abstraction over a Tandem store backend.
///
/// All methods return `Send` futures so the trait can be used in multi-threaded
/// async runtimes.
pub trait DeclarationStore: Send + Sync {
  type Error: std::error::Error + From<crate::Error> + Send + Sync + 'static;

  // ── Records ───────────────────────────────────────────────────────────

  /// Persist a new draft record.
  fn create_record(
    &self,
    input: NewRecord,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + '_;

  /// Replace the content of a draft. Fails once the record is submitted.
  fn update_record(
    &self,
    id: Uuid,
    input: NewRecord,
  ) -> impl Future<Output = Result<Record, Self::Error>> + Send + '_;

  /// Retrieve a record by id. Returns `None` if not found.
  fn get_record(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Record>, Self::Error>> + Send + '_;

  /// All submitted records for an employee.
  fn find_submitted_by_party<'a>(
    &'a self,
    subject_id: &'a str,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + 'a;

  /// File a draft: flip its status, link it, and open its submission, all in
  /// one transaction. Concurrent submits for the same case are serialised.
  fn submit(
    &self,
    record_id: Uuid,
    actor: Actor,
  ) -> impl Future<Output = Result<SubmitReceipt, Self::Error>> + Send + '_;

  // ── Submissions ───────────────────────────────────────────────────────

  fn get_submission(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Submission>, Self::Error>> + Send + '_;

  fn find_submission_by_record(
    &self,
    record_id: Uuid,
  ) -> impl Future<Output = Result<Option<Submission>, Self::Error>> + Send + '_;

  /// Move a submission to `Processing` and stamp `last_attempt_at`.
  ///
  /// Safe to call again while an attempt is in flight. Fails with
  /// [`Error::InvalidTransition`](crate::Error::InvalidTransition) from a
  /// terminal state.
  fn mark_started(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Submission, Self::Error>> + Send + '_;

  /// Persist the result of an attempt: `status`, `attempt_count + 1`,
  /// `last_attempt_at = now`, and the truncated `error`.
  fn record_outcome(
    &self,
    id: Uuid,
    status: SubmissionStatus,
    error: Option<String>,
  ) -> impl Future<Output = Result<Submission, Self::Error>> + Send + '_;

  /// Submissions the retry sweep should re-drive, oldest first.
  ///
  /// Includes `SinkFailed`, `Processing` with `last_attempt_at` before
  /// `stale_since`, and `Received` created before `stale_since`; never more
  /// than `max_attempts - 1` attempts.
  ///
  /// An attempt that dies before `record_outcome` is not counted, so a
  /// submission whose attempts keep crashing stays eligible indefinitely.
  /// The sweep logs each such pickup at `warn`.
  fn find_retry_candidates(
    &self,
    stale_since: DateTime<Utc>,
    max_attempts: u32,
  ) -> impl Future<Output = Result<Vec<Submission>, Self::Error>> + Send + '_;

  // ── Sweep leases ──────────────────────────────────────────────────────

  /// Take or renew the named lease for `ttl`. Returns `false` if another
  /// holder owns an unexpired lease.
  fn try_acquire_lease<'a>(
    &'a self,
    name: &'a str,
    holder: &'a str,
    ttl: Duration,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Drop the named lease if `holder` owns it.
  fn release_lease<'a>(
    &'a self,
    name: &'a str,
    holder: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
