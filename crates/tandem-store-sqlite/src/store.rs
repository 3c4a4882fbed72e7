//! [`SqliteStore`] — the SQLite implementation of [`DeclarationStore`].

use std::{path::Path, time::Duration as StdDuration};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension as _, TransactionBehavior};
use uuid::Uuid;

use tandem_core::{
  actor::Actor,
  record::{NewRecord, Record},
  store::DeclarationStore,
  submission::{Submission, SubmissionStatus, truncate_error},
  submit::{self, RecordRepository, SubmitReceipt},
};

use crate::{
  Error, Result,
  encode::{
    RECORD_COLUMNS, RawRecord, RawSubmission, SUBMISSION_COLUMNS, encode_actor, encode_date,
    encode_dt, encode_part, encode_record_status, encode_submission_status, encode_uuid,
  },
  schema::SCHEMA,
};

/// How long a writer waits on another connection's lock before giving up.
const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(10);

// ─── Row helpers ─────────────────────────────────────────────────────────────
//
// These take a plain `&Connection` so they work both on the bare connection
// and on an open `Transaction` (which derefs to one).

fn load_record(conn: &Connection, id: Uuid) -> Result<Option<Record>> {
  let raw = conn
    .query_row(
      &format!("SELECT {RECORD_COLUMNS} FROM records WHERE record_id = ?1"),
      rusqlite::params![encode_uuid(id)],
      RawRecord::from_row,
    )
    .optional()?;
  raw.map(RawRecord::into_record).transpose()
}

fn load_submitted_by_party(conn: &Connection, subject_id: &str) -> Result<Vec<Record>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {RECORD_COLUMNS} FROM records
     WHERE subject_id = ?1 AND status = 'submitted'
     ORDER BY submitted_at DESC, record_id"
  ))?;
  let raws = stmt
    .query_map(rusqlite::params![subject_id], RawRecord::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawRecord::into_record).collect()
}

fn upsert_record(conn: &Connection, r: &Record) -> Result<()> {
  let submitted_by = r.submitted_by.as_ref().map(encode_actor).transpose()?;
  conn.execute(
    "INSERT INTO records (
       record_id, subject_id, counterparty_id, part, legal_entity_id,
       period_from, period_to, payload, status, linked_record_id,
       supersedes_record_id, created_at, updated_at, submitted_at, submitted_by
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
     ON CONFLICT(record_id) DO UPDATE SET
       subject_id           = excluded.subject_id,
       counterparty_id      = excluded.counterparty_id,
       part                 = excluded.part,
       legal_entity_id      = excluded.legal_entity_id,
       period_from          = excluded.period_from,
       period_to            = excluded.period_to,
       payload              = excluded.payload,
       status               = excluded.status,
       linked_record_id     = excluded.linked_record_id,
       supersedes_record_id = excluded.supersedes_record_id,
       updated_at           = excluded.updated_at,
       submitted_at         = excluded.submitted_at,
       submitted_by         = excluded.submitted_by",
    rusqlite::params![
      encode_uuid(r.record_id),
      r.subject_id,
      r.counterparty_id,
      encode_part(r.part),
      r.legal_entity_id,
      r.period.map(|p| encode_date(p.start())),
      r.period.map(|p| encode_date(p.end())),
      r.payload.to_string(),
      encode_record_status(r.status),
      r.linked_record_id.map(encode_uuid),
      r.supersedes_record_id.map(encode_uuid),
      encode_dt(r.created_at),
      encode_dt(r.updated_at),
      r.submitted_at.map(encode_dt),
      submitted_by,
    ],
  )?;
  Ok(())
}

fn load_submission_where(conn: &Connection, column: &str, id: Uuid) -> Result<Option<Submission>> {
  let raw = conn
    .query_row(
      &format!("SELECT {SUBMISSION_COLUMNS} FROM submissions WHERE {column} = ?1"),
      rusqlite::params![encode_uuid(id)],
      RawSubmission::from_row,
    )
    .optional()?;
  raw.map(RawSubmission::into_submission).transpose()
}

fn require_submission(conn: &Connection, id: Uuid) -> Result<Submission> {
  load_submission_where(conn, "submission_id", id)?
    .ok_or_else(|| tandem_core::Error::SubmissionNotFound(id).into())
}

fn insert_submission(conn: &Connection, s: &Submission) -> Result<()> {
  conn.execute(
    "INSERT INTO submissions (
       submission_id, record_id, status, attempt_count,
       last_attempt_at, last_error, external_reference, created_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    rusqlite::params![
      encode_uuid(s.submission_id),
      encode_uuid(s.record_id),
      encode_submission_status(s.status),
      i64::from(s.attempt_count),
      s.last_attempt_at.map(encode_dt),
      s.last_error,
      s.external_reference.as_str(),
      encode_dt(s.created_at),
    ],
  )?;
  Ok(())
}

// ─── Transactional repository ────────────────────────────────────────────────

/// [`RecordRepository`] bound to one open transaction.
struct TxRepository<'a> {
  conn: &'a Connection,
}

impl RecordRepository for TxRepository<'_> {
  type Error = Error;

  fn find_by_id(&mut self, id: Uuid) -> Result<Option<Record>> { load_record(self.conn, id) }

  fn find_submitted_by_party(&mut self, subject_id: &str) -> Result<Vec<Record>> {
    load_submitted_by_party(self.conn, subject_id)
  }

  fn save(&mut self, record: &Record) -> Result<()> { upsert_record(self.conn, record) }

  fn insert_submission(&mut self, submission: &Submission) -> Result<()> {
    insert_submission(self.conn, submission)
  }
}

/// `BEGIN IMMEDIATE` takes the write lock before the candidate read, so two
/// concurrent submits for the same case cannot both see "no counterpart".
fn submit_tx(conn: &mut Connection, record_id: Uuid, actor: Actor) -> Result<SubmitReceipt> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let receipt = {
    let mut repo = TxRepository { conn: &tx };
    submit::submit_record(&mut repo, record_id, actor, Utc::now())?
  };
  tx.commit()?;
  Ok(receipt)
}

fn update_record_tx(conn: &mut Connection, id: Uuid, input: NewRecord) -> Result<Record> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let mut record =
    load_record(&tx, id)?.ok_or(tandem_core::Error::RecordNotFound(id))?;
  record.revise(input, Utc::now())?;
  upsert_record(&tx, &record)?;
  tx.commit()?;
  Ok(record)
}

fn mark_started_tx(conn: &mut Connection, id: Uuid) -> Result<Submission> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let current = require_submission(&tx, id)?;
  if !current.status.can_start() {
    return Err(
      tandem_core::Error::InvalidTransition {
        id,
        from: current.status,
        to: SubmissionStatus::Processing,
      }
      .into(),
    );
  }
  tx.execute(
    "UPDATE submissions SET status = ?2, last_attempt_at = ?3 WHERE submission_id = ?1",
    rusqlite::params![
      encode_uuid(id),
      encode_submission_status(SubmissionStatus::Processing),
      encode_dt(Utc::now()),
    ],
  )?;
  let updated = require_submission(&tx, id)?;
  tx.commit()?;
  Ok(updated)
}

fn record_outcome_tx(
  conn: &mut Connection,
  id: Uuid,
  status: SubmissionStatus,
  error: Option<String>,
) -> Result<Submission> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let current = require_submission(&tx, id)?;
  if !status.is_outcome() {
    return Err(
      tandem_core::Error::InvalidTransition { id, from: current.status, to: status }.into(),
    );
  }
  // The increment happens in SQL so overlapping attempts never lose a count.
  tx.execute(
    "UPDATE submissions
     SET status = ?2,
         attempt_count = attempt_count + 1,
         last_attempt_at = ?3,
         last_error = ?4
     WHERE submission_id = ?1",
    rusqlite::params![
      encode_uuid(id),
      encode_submission_status(status),
      encode_dt(Utc::now()),
      error.as_deref().map(truncate_error),
    ],
  )?;
  let updated = require_submission(&tx, id)?;
  tx.commit()?;
  Ok(updated)
}

fn retry_candidates(
  conn: &Connection,
  stale_since: DateTime<Utc>,
  max_attempts: u32,
) -> Result<Vec<Submission>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {SUBMISSION_COLUMNS} FROM submissions
     WHERE attempt_count < ?2
       AND (status = 'sink_failed'
            OR (status = 'processing' AND last_attempt_at < ?1)
            OR (status = 'received'   AND created_at      < ?1))
     ORDER BY created_at, submission_id"
  ))?;
  let raws = stmt
    .query_map(
      rusqlite::params![encode_dt(stale_since), i64::from(max_attempts)],
      RawSubmission::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawSubmission::into_submission).collect()
}

fn acquire_lease(
  conn: &Connection,
  name: &str,
  holder: &str,
  now: DateTime<Utc>,
  ttl: Duration,
) -> Result<bool> {
  let changes = conn.execute(
    "INSERT INTO sweep_leases (name, holder, acquired_at, expires_at)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(name) DO UPDATE SET
       holder      = excluded.holder,
       acquired_at = CASE
                       WHEN sweep_leases.holder = excluded.holder
                       THEN sweep_leases.acquired_at
                       ELSE excluded.acquired_at
                     END,
       expires_at  = excluded.expires_at
     WHERE sweep_leases.holder = excluded.holder
        OR sweep_leases.expires_at <= excluded.acquired_at",
    rusqlite::params![name, holder, encode_dt(now), encode_dt(now + ttl)],
  )?;
  Ok(changes > 0)
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tandem store backed by a single SQLite file.
///
/// Clones share one background connection thread. Several
/// processes (or several `SqliteStore`s) may open the same file; writers are
/// serialised by SQLite's lock with a busy timeout.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open a private in-memory store, mainly for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── DeclarationStore impl ───────────────────────────────────────────────────

impl DeclarationStore for SqliteStore {
  type Error = Error;

  // ── Records ───────────────────────────────────────────────────────────────

  async fn create_record(&self, input: NewRecord) -> Result<Record> {
    let record = Record::draft(input, Utc::now())?;
    let row = record.clone();
    self
      .conn
      .call(move |conn| Ok(upsert_record(conn, &row)))
      .await??;
    Ok(record)
  }

  async fn update_record(&self, id: Uuid, input: NewRecord) -> Result<Record> {
    self
      .conn
      .call(move |conn| Ok(update_record_tx(conn, id, input)))
      .await?
  }

  async fn get_record(&self, id: Uuid) -> Result<Option<Record>> {
    self.conn.call(move |conn| Ok(load_record(conn, id))).await?
  }

  async fn find_submitted_by_party(&self, subject_id: &str) -> Result<Vec<Record>> {
    let subject_id = subject_id.to_owned();
    self
      .conn
      .call(move |conn| Ok(load_submitted_by_party(conn, &subject_id)))
      .await?
  }

  async fn submit(&self, record_id: Uuid, actor: Actor) -> Result<SubmitReceipt> {
    self
      .conn
      .call(move |conn| Ok(submit_tx(conn, record_id, actor)))
      .await?
  }

  // ── Submissions ───────────────────────────────────────────────────────────

  async fn get_submission(&self, id: Uuid) -> Result<Option<Submission>> {
    self
      .conn
      .call(move |conn| Ok(load_submission_where(conn, "submission_id", id)))
      .await?
  }

  async fn find_submission_by_record(&self, record_id: Uuid) -> Result<Option<Submission>> {
    self
      .conn
      .call(move |conn| Ok(load_submission_where(conn, "record_id", record_id)))
      .await?
  }

  async fn mark_started(&self, id: Uuid) -> Result<Submission> {
    self.conn.call(move |conn| Ok(mark_started_tx(conn, id))).await?
  }

  async fn record_outcome(
    &self,
    id: Uuid,
    status: SubmissionStatus,
    error: Option<String>,
  ) -> Result<Submission> {
    let outcome = self
      .conn
      .call(move |conn| Ok(record_outcome_tx(conn, id, status, error)))
      .await??;
    tracing::debug!(
      submission_id = %id,
      status = %outcome.status,
      attempts = outcome.attempt_count,
      "outcome recorded"
    );
    Ok(outcome)
  }

  async fn find_retry_candidates(
    &self,
    stale_since: DateTime<Utc>,
    max_attempts: u32,
  ) -> Result<Vec<Submission>> {
    self
      .conn
      .call(move |conn| Ok(retry_candidates(conn, stale_since, max_attempts)))
      .await?
  }

  // ── Sweep leases ──────────────────────────────────────────────────────────

  async fn try_acquire_lease(&self, name: &str, holder: &str, ttl: Duration) -> Result<bool> {
    let (name, holder) = (name.to_owned(), holder.to_owned());
    self
      .conn
      .call(move |conn| Ok(acquire_lease(conn, &name, &holder, Utc::now(), ttl)))
      .await?
  }

  async fn release_lease(&self, name: &str, holder: &str) -> Result<()> {
    let (name, holder) = (name.to_owned(), holder.to_owned());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM sweep_leases WHERE name = ?1 AND holder = ?2",
          rusqlite::params![name, holder],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
