//! The submit unit of work.
//!
//! Filing a record flips it to [`RecordStatus::Submitted`], links it against
//! the records already on file, and opens its [`Submission`]. All of it runs
//! against a [`RecordRepository`] bound to a single open transaction; the
//! backend commits once [`submit_record`] returns `Ok` and rolls back
//! otherwise, so up to three records and one submission land together or not
//! at all.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Error,
  actor::Actor,
  linking::{self, Linkage},
  record::{Record, RecordStatus},
  submission::Submission,
};

/// Synchronous record access inside one transaction.
pub trait RecordRepository {
  type Error: From<Error>;

  fn find_by_id(&mut self, id: Uuid) -> Result<Option<Record>, Self::Error>;

  /// Every submitted record for `subject_id`.
  fn find_submitted_by_party(&mut self, subject_id: &str) -> Result<Vec<Record>, Self::Error>;

  /// Insert or overwrite `record`.
  fn save(&mut self, record: &Record) -> Result<(), Self::Error>;

  fn insert_submission(&mut self, submission: &Submission) -> Result<(), Self::Error>;
}

/// What a successful submit produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
  pub record:     Record,
  pub submission: Submission,
}

/// File `record_id` on behalf of `actor`.
pub fn submit_record<R: RecordRepository>(
  repo: &mut R,
  record_id: Uuid,
  actor: Actor,
  now: DateTime<Utc>,
) -> Result<SubmitReceipt, R::Error> {
  let mut record = repo
    .find_by_id(record_id)?
    .ok_or(Error::RecordNotFound(record_id))?;

  if record.is_submitted() {
    return Err(Error::AlreadySubmitted(record_id).into());
  }

  record.status = RecordStatus::Submitted;
  record.submitted_at = Some(now);
  record.submitted_by = Some(actor);
  record.updated_at = now;

  let mut candidates = repo.find_submitted_by_party(&record.subject_id)?;
  let Linkage { supersedes_record_id, linked_record_id, touched } =
    linking::link(&mut record, &mut candidates)?;

  repo.save(&record)?;
  for id in &touched {
    if let Some(changed) = candidates.iter_mut().find(|c| c.record_id == *id) {
      changed.updated_at = now;
      repo.save(changed)?;
    }
  }

  let submission = Submission::received(record.record_id, now);
  repo.insert_submission(&submission)?;

  tracing::info!(
    record_id = %record.record_id,
    external_reference = %submission.external_reference,
    supersedes = ?supersedes_record_id,
    linked = ?linked_record_id,
    "record submitted"
  );

  Ok(SubmitReceipt { record, submission })
}
